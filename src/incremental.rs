//! Incremental processing.
//!
//! The full phase list is split into three re-entrant stages so an editor can
//! parse once, rebind whenever the project's tag helper set changes, and only
//! regenerate when the rebinding could have changed the output:
//!
//! 1. `process_initial_parse` runs parsing.
//! 2. `process_tag_helpers` runs discovery and, unless the idempotency check
//!    proves it unnecessary, the tag helper rewrite.
//! 3. `process_remaining` runs lowering through code generation, or returns
//!    the existing output when nothing upstream changed.

use std::sync::Arc;

use crate::code_document::{ProcessingState, RazorCodeDocument};
use crate::codegen::RazorCSharpDocument;
use crate::engine::{CancellationToken, RazorProjectEngine};
use crate::error::PipelineError;
use crate::passes::Phase;
use crate::source::SourceDocument;
use crate::tag_helpers::{TagHelperCollection, TagHelperDescriptor};

/// What `process_tag_helpers` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagHelperProcessingOutcome {
    /// The new set equals the previous one in value and order; nothing ran.
    Unchanged,
    /// Discovery ran, but nothing newly in scope and nothing referenced went
    /// missing, so the bound tree and generated output were kept.
    ScopeUnchanged,
    /// The rewrite ran; later stages must run again.
    Rebound,
}

impl RazorProjectEngine {
    pub fn process_initial_parse(
        &self,
        source: SourceDocument,
        imports: Vec<SourceDocument>,
        design_time: bool,
    ) -> Result<RazorCodeDocument, PipelineError> {
        let mut document = self.create_code_document(source, imports, design_time);
        self.execute_phases(&[Phase::Parsing], &mut document, &CancellationToken::new())?;
        Ok(document)
    }

    /// Binds `document` against `tag_helpers`.
    ///
    /// With `check_for_idempotency`, a document that was already bound skips
    /// the rewrite when the descriptors in scope gained nothing and every
    /// descriptor the previous rewrite used is still in scope by value.
    pub fn process_tag_helpers(
        &self,
        document: &mut RazorCodeDocument,
        tag_helpers: Arc<TagHelperCollection>,
        check_for_idempotency: bool,
    ) -> Result<TagHelperProcessingOutcome, PipelineError> {
        if document.state() < ProcessingState::Parsed {
            return Err(PipelineError::InvalidState(
                "tag helpers processed before the document was parsed".to_string(),
            ));
        }
        let cancellation = CancellationToken::new();
        let path = document.source().file_path().unwrap_or("<anonymous>").to_string();

        let previous = match (check_for_idempotency, document.state() >= ProcessingState::TagHelpersBound) {
            (true, true) => document.tag_helpers().cloned(),
            _ => None,
        };
        let Some(previous) = previous else {
            document.set_tag_helpers(tag_helpers);
            document.clear_rewrite_outputs();
            self.execute_phases(
                Phase::range(Phase::TagHelperDiscovery, Phase::TagHelperRewrite),
                document,
                &cancellation,
            )?;
            return Ok(TagHelperProcessingOutcome::Rebound);
        };

        if Arc::ptr_eq(&previous, &tag_helpers) || *previous == *tag_helpers {
            log::debug!("{}: tag helper set unchanged, skipping", path);
            return Ok(TagHelperProcessingOutcome::Unchanged);
        }

        let previous_in_scope = Arc::clone(&document.tag_helper_context()?.tag_helpers);
        let previous_referenced = Arc::clone(document.referenced_tag_helpers()?);

        document.set_tag_helpers(tag_helpers);
        self.execute_phases(&[Phase::TagHelperDiscovery], document, &cancellation)?;
        let in_scope = Arc::clone(&document.tag_helper_context()?.tag_helpers);

        let added = in_scope.difference(&previous_in_scope);
        let dropped = previous_referenced.difference(&in_scope);
        // Binding ties and field order follow collection order.
        let reordered = referenced_order(&previous_in_scope, &previous_referenced)
            != referenced_order(&in_scope, &previous_referenced);
        if added.is_empty() && dropped.is_empty() && !reordered {
            log::debug!("{}: tag helpers in scope unchanged, keeping bound tree", path);
            return Ok(TagHelperProcessingOutcome::ScopeUnchanged);
        }

        log::debug!(
            "{}: {} tag helpers entered scope, {} referenced ones left, reordered: {}, rebinding",
            path,
            added.len(),
            dropped.len(),
            reordered
        );
        document.clear_rewrite_outputs();
        self.execute_phases(&[Phase::TagHelperRewrite], document, &cancellation)?;
        Ok(TagHelperProcessingOutcome::Rebound)
    }

    /// Runs lowering through code generation unless the document already
    /// holds generated output for its current binding.
    pub fn process_remaining<'d>(
        &self,
        document: &'d mut RazorCodeDocument,
        cancellation: &CancellationToken,
    ) -> Result<&'d RazorCSharpDocument, PipelineError> {
        match document.state() {
            ProcessingState::CodeGenerated => {
                log::debug!(
                    "{}: generated output is current",
                    document.source().file_path().unwrap_or("<anonymous>")
                );
            }
            ProcessingState::TagHelpersBound => {
                self.execute_phases(
                    Phase::range(Phase::Lowering, Phase::CodeGeneration),
                    document,
                    cancellation,
                )?;
            }
            state => {
                return Err(PipelineError::InvalidState(format!(
                    "remaining phases requested in state {:?}",
                    state
                )));
            }
        }
        document.csharp_document()
    }
}

/// The descriptors of `scope` that `referenced` holds, in `scope` order.
fn referenced_order(scope: &TagHelperCollection, referenced: &TagHelperCollection) -> Vec<Arc<TagHelperDescriptor>> {
    scope.iter().filter(|d| referenced.contains(d)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RazorConfiguration;
    use crate::tag_helpers::{BoundAttributeDescriptor, TagHelperDescriptor, TagMatchingRuleDescriptor};
    use pretty_assertions::assert_eq;

    const TEXT: &str = "@addTagHelper *, TestAssembly\n<tagcloud foo=\"17\"></tagcloud>\n<p>Hi</p>";

    fn tag_cloud() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.TagCloudTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("tagcloud"))
            .with_bound_attribute(BoundAttributeDescriptor::new("foo", "Foo", "System.Int32"))
    }

    fn paragraph() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.PTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("p"))
    }

    fn emphasis() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.EmphasisTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("p"))
    }

    fn unrelated() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Other.DivTagHelper", "OtherAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("div"))
    }

    fn source() -> SourceDocument {
        SourceDocument::new(TEXT, Some("/Index.cshtml".into()), Some("/Index.cshtml".into()))
    }

    fn engine() -> RazorProjectEngine {
        RazorProjectEngine::create(RazorConfiguration::default_legacy(), None)
    }

    fn processed(engine: &RazorProjectEngine, tag_helpers: Vec<TagHelperDescriptor>) -> RazorCodeDocument {
        let mut document = engine.process_initial_parse(source(), Vec::new(), false).unwrap();
        engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::create(tag_helpers)), true)
            .unwrap();
        engine.process_remaining(&mut document, &CancellationToken::new()).unwrap();
        document
    }

    fn generated(document: &RazorCodeDocument) -> String {
        document.csharp_document().unwrap().generated_code.clone()
    }

    #[test]
    fn test_stage_ordering_is_enforced() {
        let engine = engine();
        let mut document = engine.create_code_document(source(), Vec::new(), false);
        let err = engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::new()), true)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState(_)));

        let mut parsed = engine.process_initial_parse(source(), Vec::new(), false).unwrap();
        assert!(engine.process_remaining(&mut parsed, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_equal_set_is_a_no_op() {
        let engine = engine();
        let mut document = processed(&engine, vec![tag_cloud()]);
        let before = generated(&document);
        let outcome = engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::create(vec![tag_cloud()])), true)
            .unwrap();
        assert_eq!(outcome, TagHelperProcessingOutcome::Unchanged);
        assert_eq!(document.state(), ProcessingState::CodeGenerated);
        let code = engine
            .process_remaining(&mut document, &CancellationToken::new())
            .unwrap()
            .generated_code
            .clone();
        assert_eq!(code, before);
    }

    #[test]
    fn test_reordered_set_rebinds_and_matches_full_rebuild() {
        let engine = engine();
        let mut document = processed(&engine, vec![paragraph(), emphasis()]);
        let before = generated(&document);

        let reordered = vec![emphasis(), paragraph()];
        let outcome = engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::create(reordered.clone())), true)
            .unwrap();
        assert_eq!(outcome, TagHelperProcessingOutcome::Rebound);
        let code = engine
            .process_remaining(&mut document, &CancellationToken::new())
            .unwrap()
            .generated_code
            .clone();
        assert_eq!(code, generated(&processed(&engine, reordered)));
        assert_ne!(code, before);
    }

    #[test]
    fn test_out_of_scope_addition_keeps_output_and_matches_full_rebuild() {
        let engine = engine();
        let mut document = processed(&engine, vec![tag_cloud()]);
        let before = generated(&document);

        // OtherAssembly is never added to the document's scope.
        let widened = vec![tag_cloud(), unrelated()];
        let outcome = engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::create(widened.clone())), true)
            .unwrap();
        assert_eq!(outcome, TagHelperProcessingOutcome::ScopeUnchanged);
        let code = engine
            .process_remaining(&mut document, &CancellationToken::new())
            .unwrap()
            .generated_code
            .clone();
        assert_eq!(code, before);

        let fresh = processed(&engine, widened);
        assert_eq!(generated(&fresh), code);
    }

    #[test]
    fn test_new_in_scope_descriptor_triggers_rebind() {
        let engine = engine();
        let mut document = processed(&engine, vec![tag_cloud()]);
        let before = generated(&document);

        let outcome = engine
            .process_tag_helpers(
                &mut document,
                Arc::new(TagHelperCollection::create(vec![tag_cloud(), paragraph()])),
                true,
            )
            .unwrap();
        assert_eq!(outcome, TagHelperProcessingOutcome::Rebound);
        assert_eq!(document.state(), ProcessingState::TagHelpersBound);
        let code = engine
            .process_remaining(&mut document, &CancellationToken::new())
            .unwrap()
            .generated_code
            .clone();
        assert_ne!(code, before);
        assert!(code.contains("Test.PTagHelper"));
    }

    #[test]
    fn test_dropped_referenced_descriptor_triggers_rebind() {
        let engine = engine();
        let mut document = processed(&engine, vec![tag_cloud(), paragraph()]);
        let outcome = engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::create(vec![tag_cloud()])), true)
            .unwrap();
        assert_eq!(outcome, TagHelperProcessingOutcome::Rebound);
        let code = engine
            .process_remaining(&mut document, &CancellationToken::new())
            .unwrap()
            .generated_code
            .clone();
        assert!(!code.contains("Test.PTagHelper"));
        assert_eq!(code, generated(&processed(&engine, vec![tag_cloud()])));
    }

    #[test]
    fn test_without_idempotency_check_always_rebinds() {
        let engine = engine();
        let mut document = processed(&engine, vec![tag_cloud()]);
        let outcome = engine
            .process_tag_helpers(&mut document, Arc::new(TagHelperCollection::create(vec![tag_cloud()])), false)
            .unwrap();
        assert_eq!(outcome, TagHelperProcessingOutcome::Rebound);
        assert!(document.csharp_document().is_err());
    }
}
