//! Per-compilation aggregate.
//!
//! A `RazorCodeDocument` holds the outputs of every phase that has run for
//! one document. Getters fail with `PipelineError::MissingOutput` when the
//! producing phase has not run yet.

use std::sync::Arc;

use crate::codegen::RazorCSharpDocument;
use crate::config::{FileKind, ParserOptions, RazorCodeGenerationOptions};
use crate::diagnostics::RazorDiagnostic;
use crate::error::PipelineError;
use crate::ir::IntermediateNode;
use crate::source::SourceDocument;
use crate::syntax::RazorSyntaxTree;
use crate::tag_helpers::{TagHelperCollection, TagHelperDocumentContext};

/// Where a document sits in the incremental pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessingState {
    Unparsed,
    Parsed,
    TagHelpersBound,
    CodeGenerated,
}

#[derive(Debug, Clone)]
pub struct RazorCodeDocument {
    source: SourceDocument,
    imports: Vec<SourceDocument>,
    file_kind: FileKind,
    state: ProcessingState,

    parser_options: Option<Arc<ParserOptions>>,
    codegen_options: Option<RazorCodeGenerationOptions>,

    syntax_tree: Option<RazorSyntaxTree>,
    pre_tag_helper_syntax_tree: Option<RazorSyntaxTree>,
    import_syntax_trees: Option<Vec<RazorSyntaxTree>>,

    tag_helpers: Option<Arc<TagHelperCollection>>,
    tag_helper_context: Option<TagHelperDocumentContext>,
    discovery_diagnostics: Vec<RazorDiagnostic>,
    referenced_tag_helpers: Option<Arc<TagHelperCollection>>,

    document_ir: Option<IntermediateNode>,
    csharp_document: Option<RazorCSharpDocument>,
}

impl RazorCodeDocument {
    pub fn new(source: SourceDocument, imports: Vec<SourceDocument>) -> Self {
        let file_kind = source
            .relative_path()
            .or(source.file_path())
            .map(FileKind::from_path)
            .unwrap_or_default();
        Self {
            source,
            imports,
            file_kind,
            state: ProcessingState::Unparsed,
            parser_options: None,
            codegen_options: None,
            syntax_tree: None,
            pre_tag_helper_syntax_tree: None,
            import_syntax_trees: None,
            tag_helpers: None,
            tag_helper_context: None,
            discovery_diagnostics: Vec::new(),
            referenced_tag_helpers: None,
            document_ir: None,
            csharp_document: None,
        }
    }

    pub fn source(&self) -> &SourceDocument {
        &self.source
    }

    pub fn imports(&self) -> &[SourceDocument] {
        &self.imports
    }

    pub fn file_kind(&self) -> FileKind {
        self.file_kind
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ProcessingState) {
        self.state = state;
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Options
    // ───────────────────────────────────────────────────────────────────────────

    pub fn parser_options(&self) -> Result<&Arc<ParserOptions>, PipelineError> {
        self.parser_options
            .as_ref()
            .ok_or(PipelineError::MissingOutput("parser options"))
    }

    pub fn set_parser_options(&mut self, options: Arc<ParserOptions>) {
        self.parser_options = Some(options);
    }

    pub fn codegen_options(&self) -> Result<&RazorCodeGenerationOptions, PipelineError> {
        self.codegen_options
            .as_ref()
            .ok_or(PipelineError::MissingOutput("code generation options"))
    }

    pub fn set_codegen_options(&mut self, options: RazorCodeGenerationOptions) {
        self.codegen_options = Some(options);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Syntax trees
    // ───────────────────────────────────────────────────────────────────────────

    /// The current tree; bound once the rewrite phase has run.
    pub fn syntax_tree(&self) -> Result<&RazorSyntaxTree, PipelineError> {
        self.syntax_tree
            .as_ref()
            .ok_or(PipelineError::MissingOutput("syntax tree"))
    }

    pub fn set_syntax_tree(&mut self, tree: RazorSyntaxTree) {
        self.syntax_tree = Some(tree);
    }

    /// The tree as parsed, before any tag helper binding.
    pub fn pre_tag_helper_syntax_tree(&self) -> Result<&RazorSyntaxTree, PipelineError> {
        self.pre_tag_helper_syntax_tree
            .as_ref()
            .ok_or(PipelineError::MissingOutput("pre-tag-helper syntax tree"))
    }

    pub fn set_pre_tag_helper_syntax_tree(&mut self, tree: RazorSyntaxTree) {
        self.pre_tag_helper_syntax_tree = Some(tree);
    }

    pub fn import_syntax_trees(&self) -> Result<&[RazorSyntaxTree], PipelineError> {
        self.import_syntax_trees
            .as_deref()
            .ok_or(PipelineError::MissingOutput("import syntax trees"))
    }

    pub fn set_import_syntax_trees(&mut self, trees: Vec<RazorSyntaxTree>) {
        self.import_syntax_trees = Some(trees);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Tag helpers
    // ───────────────────────────────────────────────────────────────────────────

    /// The project-wide descriptor set last supplied for this document.
    pub fn tag_helpers(&self) -> Option<&Arc<TagHelperCollection>> {
        self.tag_helpers.as_ref()
    }

    pub fn set_tag_helpers(&mut self, tag_helpers: Arc<TagHelperCollection>) {
        self.tag_helpers = Some(tag_helpers);
    }

    pub fn tag_helper_context(&self) -> Result<&TagHelperDocumentContext, PipelineError> {
        self.tag_helper_context
            .as_ref()
            .ok_or(PipelineError::MissingOutput("tag helper context"))
    }

    pub fn set_tag_helper_context(
        &mut self,
        context: TagHelperDocumentContext,
        diagnostics: Vec<RazorDiagnostic>,
    ) {
        self.tag_helper_context = Some(context);
        self.discovery_diagnostics = diagnostics;
    }

    pub fn discovery_diagnostics(&self) -> &[RazorDiagnostic] {
        &self.discovery_diagnostics
    }

    /// Descriptors the last rewrite actually bound to an element.
    pub fn referenced_tag_helpers(&self) -> Result<&Arc<TagHelperCollection>, PipelineError> {
        self.referenced_tag_helpers
            .as_ref()
            .ok_or(PipelineError::MissingOutput("referenced tag helpers"))
    }

    pub fn set_referenced_tag_helpers(&mut self, referenced: Arc<TagHelperCollection>) {
        self.referenced_tag_helpers = Some(referenced);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Intermediate and generated output
    // ───────────────────────────────────────────────────────────────────────────

    pub fn document_ir(&self) -> Result<&IntermediateNode, PipelineError> {
        self.document_ir
            .as_ref()
            .ok_or(PipelineError::MissingOutput("document intermediate node"))
    }

    pub fn set_document_ir(&mut self, ir: IntermediateNode) {
        self.document_ir = Some(ir);
    }

    /// Moves the stored tree out so a pass group can rewrite it.
    pub(crate) fn take_document_ir(&mut self) -> Result<IntermediateNode, PipelineError> {
        self.document_ir
            .take()
            .ok_or(PipelineError::MissingOutput("document intermediate node"))
    }

    pub fn csharp_document(&self) -> Result<&RazorCSharpDocument, PipelineError> {
        self.csharp_document
            .as_ref()
            .ok_or(PipelineError::MissingOutput("C# document"))
    }

    pub fn set_csharp_document(&mut self, document: RazorCSharpDocument) {
        self.csharp_document = Some(document);
    }

    /// Drops every output that depends on the tag helper rewrite.
    pub(crate) fn clear_rewrite_outputs(&mut self) {
        self.referenced_tag_helpers = None;
        self.document_ir = None;
        self.csharp_document = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_outputs_fail_fast() {
        let doc = RazorCodeDocument::new(SourceDocument::from_text("<p></p>"), Vec::new());
        assert_eq!(doc.state(), ProcessingState::Unparsed);
        assert!(matches!(
            doc.syntax_tree(),
            Err(PipelineError::MissingOutput("syntax tree"))
        ));
        assert!(doc.document_ir().is_err());
        assert!(doc.csharp_document().is_err());
        assert!(doc.tag_helpers().is_none());
    }

    #[test]
    fn test_file_kind_from_relative_path() {
        let source = SourceDocument::new("", None, Some("/Pages/Counter.razor".into()));
        let doc = RazorCodeDocument::new(source, Vec::new());
        assert_eq!(doc.file_kind(), FileKind::Component);
    }
}
