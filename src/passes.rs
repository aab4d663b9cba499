//! Phase list and rewrite pass pipeline.
//!
//! The phase order is fixed. Rewrite passes are contributed by the engine
//! builder and its extensions, grouped into the three rewrite phases, and run
//! in `(group, order, registration)` order.

use std::fmt;
use std::sync::Arc;

use crate::code_document::RazorCodeDocument;
use crate::error::PipelineError;
use crate::ir::IntermediateNode;

// ═══════════════════════════════════════════════════════════════════════════════
// PHASES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Parsing,
    TagHelperDiscovery,
    TagHelperRewrite,
    Lowering,
    DocumentClassifier,
    DirectiveClassifier,
    Optimization,
    CodeGeneration,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::Parsing,
        Phase::TagHelperDiscovery,
        Phase::TagHelperRewrite,
        Phase::Lowering,
        Phase::DocumentClassifier,
        Phase::DirectiveClassifier,
        Phase::Optimization,
        Phase::CodeGeneration,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Parsing => "parsing",
            Phase::TagHelperDiscovery => "tag-helper-discovery",
            Phase::TagHelperRewrite => "tag-helper-rewrite",
            Phase::Lowering => "lowering",
            Phase::DocumentClassifier => "document-classifier",
            Phase::DirectiveClassifier => "directive-classifier",
            Phase::Optimization => "optimization",
            Phase::CodeGeneration => "code-generation",
        }
    }

    /// Phases from `start` to `end`, both inclusive.
    pub fn range(start: Phase, end: Phase) -> &'static [Phase] {
        &Self::ALL[start.index()..=end.index()]
    }

    pub fn pass_group(self) -> Option<PassGroup> {
        match self {
            Phase::DocumentClassifier => Some(PassGroup::DocumentClassifier),
            Phase::DirectiveClassifier => Some(PassGroup::DirectiveClassifier),
            Phase::Optimization => Some(PassGroup::Optimization),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASSES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PassGroup {
    DocumentClassifier,
    DirectiveClassifier,
    Optimization,
}

/// One rewrite over the intermediate tree.
///
/// Passes must tolerate running twice: a second run either no-ops or leaves
/// the tree exactly as the first run did.
pub trait IntermediateNodePass: Send + Sync {
    fn name(&self) -> &'static str;

    fn group(&self) -> PassGroup;

    /// Position within the group; lower runs first.
    fn order(&self) -> i32 {
        0
    }

    fn execute(
        &self,
        document: &RazorCodeDocument,
        ir: &mut IntermediateNode,
    ) -> Result<(), PipelineError>;
}

/// Registered passes, sorted once at construction.
#[derive(Clone, Default)]
pub struct PassPipeline {
    passes: Vec<Arc<dyn IntermediateNodePass>>,
}

impl PassPipeline {
    pub fn new(passes: Vec<Arc<dyn IntermediateNodePass>>) -> Self {
        let mut passes = passes;
        // Stable sort keeps registration order for ties.
        passes.sort_by_key(|p| (p.group(), p.order()));
        Self { passes }
    }

    pub fn passes(&self) -> &[Arc<dyn IntermediateNodePass>] {
        &self.passes
    }

    pub fn group(&self, group: PassGroup) -> impl Iterator<Item = &Arc<dyn IntermediateNodePass>> {
        self.passes.iter().filter(move |p| p.group() == group)
    }

    pub fn run_group(
        &self,
        group: PassGroup,
        document: &RazorCodeDocument,
        ir: &mut IntermediateNode,
    ) -> Result<(), PipelineError> {
        for pass in self.group(group) {
            log::trace!("running pass {}", pass.name());
            pass.execute(document, ir)?;
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

impl fmt::Debug for PassPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
