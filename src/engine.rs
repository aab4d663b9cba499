//! Project engine.
//!
//! `RazorProjectEngineBuilder` collects directives, passes and default
//! imports from the legacy defaults and any registered extensions, then
//! freezes them into a `RazorProjectEngine`. The engine owns the fixed phase
//! list and runs it over one `RazorCodeDocument` per compilation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::binder::compute_bindings;
use crate::classifier::{DefaultDocumentClassifierPass, MvcViewDocumentClassifierPass, RazorPageDocumentClassifierPass};
use crate::code_document::{ProcessingState, RazorCodeDocument};
use crate::codegen::generate;
use crate::config::{ParserOptions, RazorCodeGenerationOptions, RazorConfiguration, MVC_EXTENSION};
use crate::directive_passes::{
    DesignTimeDirectivePass, FunctionsDirectivePass, ImplementsDirectivePass, InheritsDirectivePass,
    InjectDirectivePass, MetadataAttributePass, ModelDirectivePass, NamespaceDirectivePass, PageDirectivePass,
    SectionDirectivePass,
};
use crate::directives::{
    implements_directive, inject_directive, model_directive, namespace_directive, page_directive,
    DirectiveDescriptor, DirectiveRegistry,
};
use crate::discovery::discover;
use crate::error::PipelineError;
use crate::lowering::lower;
use crate::parse::parse;
use crate::passes::{IntermediateNodePass, PassPipeline, Phase};
use crate::project::RazorProjectFileSystem;
use crate::source::SourceDocument;
use crate::syntax::RazorSyntaxTree;
use crate::tag_helper_passes::{
    DefaultTagHelperOptimizationPass, DirectiveRemovalOptimizationPass, ViewComponentTagHelperPass,
};
use crate::tag_helpers::TagHelperCollection;

/// Relative path given to the import document an extension contributes.
pub const DEFAULT_IMPORTS_PATH: &str = "/_DefaultImports.cshtml";

const MVC_DEFAULT_IMPORTS: &str = "@using System
@using System.Collections.Generic
@using System.Linq
@using System.Threading.Tasks
@using Microsoft.AspNetCore.Mvc
@using Microsoft.AspNetCore.Mvc.Rendering
@using Microsoft.AspNetCore.Mvc.ViewFeatures
@inject global::Microsoft.AspNetCore.Mvc.Rendering.IHtmlHelper<TModel> Html
@inject global::Microsoft.AspNetCore.Mvc.Json.IJsonHelper Json
@inject global::Microsoft.AspNetCore.Mvc.IViewComponentHelper Component
@inject global::Microsoft.AspNetCore.Mvc.IUrlHelper Url
@inject global::Microsoft.AspNetCore.Mvc.ViewFeatures.IModelExpressionProvider ModelExpressionProvider
@addTagHelper Microsoft.AspNetCore.Mvc.Razor.TagHelpers.UrlResolutionTagHelper, Microsoft.AspNetCore.Mvc.Razor
@addTagHelper Microsoft.AspNetCore.Mvc.Razor.TagHelpers.HeadTagHelper, Microsoft.AspNetCore.Mvc.Razor
@addTagHelper Microsoft.AspNetCore.Mvc.Razor.TagHelpers.BodyTagHelper, Microsoft.AspNetCore.Mvc.Razor
";

// ═══════════════════════════════════════════════════════════════════════════════
// CANCELLATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Cooperative cancellation flag, checked between phases.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self, before: Phase) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled(before.name()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTENSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A bundle of directives, passes and imports for one platform feature.
pub trait RazorEngineExtension: Send + Sync {
    fn name(&self) -> &'static str;

    fn register(&self, builder: &mut RazorProjectEngineBuilder);
}

/// MVC views: `@model`, `@inject`, `@namespace`, `@implements` and the
/// default MVC imports.
#[derive(Debug, Default)]
pub struct MvcViewExtension;

impl RazorEngineExtension for MvcViewExtension {
    fn name(&self) -> &'static str {
        "mvc"
    }

    fn register(&self, builder: &mut RazorProjectEngineBuilder) {
        builder
            .add_directive(model_directive())
            .add_directive(inject_directive())
            .add_directive(namespace_directive())
            .add_directive(implements_directive())
            .add_pass(MvcViewDocumentClassifierPass)
            .add_pass(NamespaceDirectivePass)
            .add_pass(ModelDirectivePass)
            .add_pass(InjectDirectivePass)
            .add_pass(ImplementsDirectivePass)
            .add_default_import(SourceDocument::new(
                MVC_DEFAULT_IMPORTS,
                None,
                Some(DEFAULT_IMPORTS_PATH.to_string()),
            ));
    }
}

/// Razor Pages: `@page` documents.
#[derive(Debug, Default)]
pub struct RazorPagesExtension;

impl RazorEngineExtension for RazorPagesExtension {
    fn name(&self) -> &'static str {
        "razor-pages"
    }

    fn register(&self, builder: &mut RazorProjectEngineBuilder) {
        builder
            .add_directive(page_directive())
            .add_pass(RazorPageDocumentClassifierPass)
            .add_pass(PageDirectivePass);
    }
}

#[derive(Debug, Default)]
pub struct ViewComponentExtension;

impl RazorEngineExtension for ViewComponentExtension {
    fn name(&self) -> &'static str {
        "view-components"
    }

    fn register(&self, builder: &mut RazorProjectEngineBuilder) {
        builder.add_pass(ViewComponentTagHelperPass);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct RazorProjectEngineBuilder {
    configuration: RazorConfiguration,
    directives: DirectiveRegistry,
    passes: Vec<Arc<dyn IntermediateNodePass>>,
    default_imports: Vec<SourceDocument>,
    file_system: Option<RazorProjectFileSystem>,
    codegen_options: RazorCodeGenerationOptions,
    extensions: Vec<&'static str>,
}

impl RazorProjectEngineBuilder {
    /// Builder preloaded with the legacy directives and passes.
    pub fn new(configuration: RazorConfiguration) -> Self {
        let mut builder = Self {
            configuration,
            directives: DirectiveRegistry::legacy(),
            passes: Vec::new(),
            default_imports: Vec::new(),
            file_system: None,
            codegen_options: RazorCodeGenerationOptions::default(),
            extensions: Vec::new(),
        };
        builder
            .add_pass(DefaultDocumentClassifierPass)
            .add_pass(FunctionsDirectivePass)
            .add_pass(InheritsDirectivePass)
            .add_pass(SectionDirectivePass)
            .add_pass(DesignTimeDirectivePass)
            .add_pass(MetadataAttributePass)
            .add_pass(DefaultTagHelperOptimizationPass)
            .add_pass(DirectiveRemovalOptimizationPass);
        builder
    }

    pub fn configuration(&self) -> &RazorConfiguration {
        &self.configuration
    }

    pub fn add_pass(&mut self, pass: impl IntermediateNodePass + 'static) -> &mut Self {
        self.passes.push(Arc::new(pass));
        self
    }

    pub fn add_directive(&mut self, descriptor: DirectiveDescriptor) -> &mut Self {
        self.directives.register(descriptor);
        self
    }

    pub fn add_default_import(&mut self, import: SourceDocument) -> &mut Self {
        self.default_imports.push(import);
        self
    }

    pub fn add_extension(&mut self, extension: &dyn RazorEngineExtension) -> &mut Self {
        if !self.extensions.contains(&extension.name()) {
            extension.register(self);
            self.extensions.push(extension.name());
        }
        self
    }

    pub fn set_file_system(&mut self, file_system: RazorProjectFileSystem) -> &mut Self {
        self.file_system = Some(file_system);
        self
    }

    pub fn set_codegen_options(&mut self, options: RazorCodeGenerationOptions) -> &mut Self {
        self.codegen_options = options;
        self
    }

    pub fn set_root_namespace(&mut self, namespace: &str) -> &mut Self {
        self.codegen_options.root_namespace = Some(namespace.to_string());
        self
    }

    pub fn build(self) -> RazorProjectEngine {
        let parser_options = ParserOptions::new(self.configuration.language_version, self.directives);
        let passes = PassPipeline::new(self.passes);
        log::debug!(
            "built engine '{}' with extensions {:?} and passes {:?}",
            self.configuration.configuration_name,
            self.extensions,
            passes
        );
        RazorProjectEngine {
            configuration: self.configuration,
            parser_options: Arc::new(parser_options),
            passes,
            default_imports: self.default_imports,
            file_system: self.file_system,
            codegen_options: self.codegen_options,
            extensions: self.extensions,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct RazorProjectEngine {
    configuration: RazorConfiguration,
    parser_options: Arc<ParserOptions>,
    passes: PassPipeline,
    default_imports: Vec<SourceDocument>,
    file_system: Option<RazorProjectFileSystem>,
    codegen_options: RazorCodeGenerationOptions,
    extensions: Vec<&'static str>,
}

impl RazorProjectEngine {
    /// Engine for `configuration`; MVC configurations get the MVC, Razor
    /// Pages and view component extensions.
    pub fn create(configuration: RazorConfiguration, file_system: Option<RazorProjectFileSystem>) -> Self {
        Self::create_with(configuration, file_system, |_| {})
    }

    pub fn create_with<F>(
        configuration: RazorConfiguration,
        file_system: Option<RazorProjectFileSystem>,
        configure: F,
    ) -> Self
    where
        F: FnOnce(&mut RazorProjectEngineBuilder),
    {
        let mvc = configuration.has_extension(MVC_EXTENSION);
        let mut builder = RazorProjectEngineBuilder::new(configuration);
        if mvc {
            builder
                .add_extension(&MvcViewExtension)
                .add_extension(&RazorPagesExtension)
                .add_extension(&ViewComponentExtension);
        }
        if let Some(file_system) = file_system {
            builder.set_file_system(file_system);
        }
        configure(&mut builder);
        builder.build()
    }

    pub fn configuration(&self) -> &RazorConfiguration {
        &self.configuration
    }

    pub fn passes(&self) -> &PassPipeline {
        &self.passes
    }

    pub fn extensions(&self) -> &[&'static str] {
        &self.extensions
    }

    pub fn file_system(&self) -> Option<&RazorProjectFileSystem> {
        self.file_system.as_ref()
    }

    pub fn codegen_options(&self) -> &RazorCodeGenerationOptions {
        &self.codegen_options
    }

    /// A fresh document with this engine's options and default imports
    /// ahead of `imports`.
    pub fn create_code_document(
        &self,
        source: SourceDocument,
        imports: Vec<SourceDocument>,
        design_time: bool,
    ) -> RazorCodeDocument {
        let mut all_imports = self.default_imports.clone();
        all_imports.extend(imports);
        let mut document = RazorCodeDocument::new(source, all_imports);

        let base = &self.parser_options;
        let parser_options = if base.design_time == design_time && base.file_kind == document.file_kind() {
            Arc::clone(base)
        } else {
            Arc::new(
                (**base)
                    .clone()
                    .design_time(design_time)
                    .with_file_kind(document.file_kind()),
            )
        };
        document.set_parser_options(parser_options);
        document.set_codegen_options(RazorCodeGenerationOptions {
            design_time,
            ..self.codegen_options.clone()
        });
        document
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Phases
    // ───────────────────────────────────────────────────────────────────────────

    /// Runs one phase against the outputs already stored on `document`.
    pub fn execute_phase(&self, phase: Phase, document: &mut RazorCodeDocument) -> Result<(), PipelineError> {
        match phase {
            Phase::Parsing => {
                let options = Arc::clone(document.parser_options()?);
                let tree = parse(document.source(), Arc::clone(&options));
                let imports: Vec<RazorSyntaxTree> = document
                    .imports()
                    .iter()
                    .map(|import| parse(import, Arc::clone(&options)))
                    .collect();
                document.set_pre_tag_helper_syntax_tree(tree.clone());
                document.set_syntax_tree(tree);
                document.set_import_syntax_trees(imports);
                document.set_state(ProcessingState::Parsed);
            }
            Phase::TagHelperDiscovery => {
                let tag_helpers = document
                    .tag_helpers()
                    .cloned()
                    .unwrap_or_else(|| Arc::new(TagHelperCollection::new()));
                let result = discover(
                    document.import_syntax_trees()?,
                    document.pre_tag_helper_syntax_tree()?,
                    &tag_helpers,
                );
                log::trace!(
                    "{} of {} tag helpers in scope",
                    result.context.tag_helpers.len(),
                    tag_helpers.len()
                );
                document.set_tag_helper_context(result.context, result.diagnostics);
            }
            Phase::TagHelperRewrite => {
                let context = document.tag_helper_context()?;
                let result = compute_bindings(
                    document.pre_tag_helper_syntax_tree()?,
                    &context.tag_helpers,
                    context.prefix.as_deref(),
                );
                document.set_syntax_tree(result.tree);
                document.set_referenced_tag_helpers(Arc::new(result.referenced));
                document.set_state(ProcessingState::TagHelpersBound);
            }
            Phase::Lowering => {
                let ir = lower(
                    document.syntax_tree()?,
                    document.import_syntax_trees()?,
                    document.codegen_options()?,
                )?;
                document.set_document_ir(ir);
            }
            Phase::DocumentClassifier | Phase::DirectiveClassifier | Phase::Optimization => {
                let Some(group) = phase.pass_group() else {
                    return Ok(());
                };
                let mut ir = document.take_document_ir()?;
                let result = self.passes.run_group(group, document, &mut ir);
                document.set_document_ir(ir);
                result?;
            }
            Phase::CodeGeneration => {
                let csharp = generate(document)?;
                document.set_csharp_document(csharp);
                document.set_state(ProcessingState::CodeGenerated);
            }
        }
        Ok(())
    }

    /// Runs `phases` in order, checking `cancellation` before each one.
    pub fn execute_phases(
        &self,
        phases: &[Phase],
        document: &mut RazorCodeDocument,
        cancellation: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let path = document.source().file_path().unwrap_or("<anonymous>").to_string();
        for &phase in phases {
            cancellation.check(phase)?;
            log::debug!("{}: starting {}", path, phase);
            self.execute_phase(phase, document)?;
            log::debug!("{}: finished {}", path, phase);
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Whole-document processing
    // ───────────────────────────────────────────────────────────────────────────

    pub fn process(
        &self,
        source: SourceDocument,
        imports: Vec<SourceDocument>,
        tag_helpers: Arc<TagHelperCollection>,
    ) -> Result<RazorCodeDocument, PipelineError> {
        self.process_with_cancellation(source, imports, tag_helpers, false, &CancellationToken::new())
    }

    pub fn process_design_time(
        &self,
        source: SourceDocument,
        imports: Vec<SourceDocument>,
        tag_helpers: Arc<TagHelperCollection>,
    ) -> Result<RazorCodeDocument, PipelineError> {
        self.process_with_cancellation(source, imports, tag_helpers, true, &CancellationToken::new())
    }

    pub fn process_with_cancellation(
        &self,
        source: SourceDocument,
        imports: Vec<SourceDocument>,
        tag_helpers: Arc<TagHelperCollection>,
        design_time: bool,
        cancellation: &CancellationToken,
    ) -> Result<RazorCodeDocument, PipelineError> {
        let mut document = self.create_code_document(source, imports, design_time);
        document.set_tag_helpers(tag_helpers);
        self.execute_phases(&Phase::ALL, &mut document, cancellation)?;
        Ok(document)
    }

    /// Reads `path` and its hierarchical imports from the project file system.
    pub fn process_item(
        &self,
        path: &str,
        tag_helpers: Arc<TagHelperCollection>,
    ) -> Result<RazorCodeDocument, PipelineError> {
        let file_system = self
            .file_system
            .as_ref()
            .ok_or_else(|| PipelineError::InvalidState("engine has no project file system".to_string()))?;
        let item = file_system.get_item(path);
        if !item.exists() {
            return Err(PipelineError::ItemNotFound(item.relative_path));
        }
        let source = item.read()?;
        let imports = file_system.import_sources(&item)?;
        self.process(source, imports, tag_helpers)
    }

    /// Compiles independent documents in parallel. Results keep input order.
    pub fn process_batch(
        &self,
        documents: Vec<(SourceDocument, Vec<SourceDocument>)>,
        tag_helpers: &Arc<TagHelperCollection>,
    ) -> Vec<Result<RazorCodeDocument, PipelineError>> {
        use rayon::prelude::*;

        documents
            .into_par_iter()
            .map(|(source, imports)| self.process(source, imports, Arc::clone(tag_helpers)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{MVC_VIEW_DOCUMENT_KIND, RAZOR_PAGE_DOCUMENT_KIND};
    use crate::classifier::document_kind;

    #[test]
    fn test_mvc_engine_registers_extensions_once() {
        let engine = RazorProjectEngine::create_with(RazorConfiguration::mvc(), None, |builder| {
            builder.add_extension(&MvcViewExtension);
        });
        assert_eq!(engine.extensions(), &["mvc", "razor-pages", "view-components"]);
        let names = engine.passes().names();
        assert_eq!(names[0], "razor-page-document-classifier");
        assert_eq!(names[1], "mvc-view-document-classifier");
        assert_eq!(names[2], "default-document-classifier");
        assert_eq!(names.last(), Some(&"directive-removal"));
    }

    #[test]
    fn test_classifier_selection() {
        let engine = RazorProjectEngine::create(RazorConfiguration::mvc(), None);
        let empty = Arc::new(TagHelperCollection::new());

        let page = engine
            .process(SourceDocument::from_text("@page\n<p></p>"), Vec::new(), empty.clone())
            .unwrap();
        assert_eq!(document_kind(page.document_ir().unwrap()), Some(RAZOR_PAGE_DOCUMENT_KIND));

        let view = engine
            .process(SourceDocument::from_text("<p></p>"), Vec::new(), empty)
            .unwrap();
        assert_eq!(document_kind(view.document_ir().unwrap()), Some(MVC_VIEW_DOCUMENT_KIND));
        assert_eq!(view.state(), ProcessingState::CodeGenerated);
    }

    #[test]
    fn test_cancellation_between_phases() {
        let engine = RazorProjectEngine::create(RazorConfiguration::default_legacy(), None);
        let token = CancellationToken::new();
        token.cancel();
        let err = engine
            .process_with_cancellation(
                SourceDocument::from_text("<p></p>"),
                Vec::new(),
                Arc::new(TagHelperCollection::new()),
                false,
                &token,
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled("parsing")));
    }

    #[test]
    fn test_batch_keeps_order() {
        let engine = RazorProjectEngine::create(RazorConfiguration::default_legacy(), None);
        let documents = (0..8)
            .map(|i| {
                let path = format!("/Page{}.cshtml", i);
                (SourceDocument::new(format!("<p>{}</p>", i), Some(path.clone()), Some(path)), Vec::new())
            })
            .collect();
        let results = engine.process_batch(documents, &Arc::new(TagHelperCollection::new()));
        assert_eq!(results.len(), 8);
        for (i, result) in results.into_iter().enumerate() {
            let document = result.unwrap();
            let code = &document.csharp_document().unwrap().generated_code;
            assert!(code.contains(&format!("class _Page{}\n", i)), "{}", code);
        }
    }
}
