//! # Razor Template Compiler
//!
//! Compiles Razor templates (HTML interleaved with C#) into C# class source.
//!
//! ## Pipeline
//!
//! A document moves through a fixed phase list, each phase reading the
//! outputs of the ones before it from the [`RazorCodeDocument`]:
//!
//! 1. **Parsing**: lossless markup/code syntax tree for the document and its imports.
//! 2. **Tag helper discovery**: `@addTagHelper` / `@removeTagHelper` /
//!    `@tagHelperPrefix` resolve the descriptors in scope.
//! 3. **Tag helper rewrite**: elements matching descriptors become bound
//!    tag helper nodes.
//! 4. **Lowering**: syntax tree to the intermediate document tree.
//! 5. **Classifier / directive / optimization passes**: registered
//!    [`IntermediateNodePass`]es, ordered by group then order.
//! 6. **Code generation**: C# text plus source mappings back to the template.
//!
//! ## Invariants
//!
//! 1. **Lossless parse**: concatenating every token of a syntax tree yields the
//!    source text exactly, whatever diagnostics were reported.
//! 2. **Determinism**: identical inputs (source, imports, descriptors,
//!    configuration, options) produce byte-identical output.
//! 3. **Phase order**: reading a phase output before its phase ran is a
//!    [`PipelineError`], never a silent default.
//! 4. **Incremental equivalence**: the incremental path produces the same
//!    output as a full rebuild with the final inputs.

pub mod binder;
pub mod cache;
pub mod classifier;
pub mod code_document;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod directive_passes;
pub mod directives;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod incremental;
pub mod ir;
pub mod lexer;
pub mod lowering;
pub mod parse;
pub mod passes;
pub mod project;
pub mod serialization;
pub mod source;
pub mod syntax;
pub mod tag_helper_passes;
pub mod tag_helpers;
pub mod visitor;

#[cfg(test)]
mod binder_tests;
#[cfg(test)]
mod lexer_tests;
#[cfg(test)]
mod lowering_tests;
#[cfg(test)]
mod parse_tests;

pub use cache::{CacheKey, CompilationCache};
pub use code_document::{ProcessingState, RazorCodeDocument};
pub use codegen::{MappingKind, RazorCSharpDocument, SourceMapping};
pub use config::{
    FileKind, ParserOptions, RazorCodeGenerationOptions, RazorConfiguration, RazorLanguageVersion,
};
pub use diagnostics::{RazorDiagnostic, Severity};
pub use directives::{DirectiveDescriptor, DirectiveKind, DirectiveRegistry};
pub use engine::{
    CancellationToken, MvcViewExtension, RazorEngineExtension, RazorPagesExtension, RazorProjectEngine,
    RazorProjectEngineBuilder, ViewComponentExtension,
};
pub use error::{IrError, PipelineError, SerializationError};
pub use incremental::TagHelperProcessingOutcome;
pub use ir::{IntermediateNode, NodeKind};
pub use parse::parse;
pub use passes::{IntermediateNodePass, PassGroup, Phase};
pub use project::{RazorProjectFileSystem, RazorProjectItem};
pub use serialization::{DocumentSnapshotHandle, RazorProjectInfo};
pub use source::{SourceDocument, SourceLocation, SourceSpan, TextSpan};
pub use syntax::{RazorSyntaxTree, SyntaxKind, SyntaxNode};
pub use tag_helpers::{
    BoundAttributeDescriptor, RequiredAttributeDescriptor, TagHelperCollection, TagHelperDescriptor,
    TagHelperDocumentContext, TagMatchingRuleDescriptor,
};
pub use visitor::IntermediateNodeVisitor;
