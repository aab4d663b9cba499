//! Document classifiers.
//!
//! The first classifier whose match test succeeds stamps the document kind
//! and wraps the lowered content in the primary namespace, class and method.
//! Every later classifier sees the kind already set and leaves the tree alone.

use crate::code_document::RazorCodeDocument;
use crate::directives::PAGE;
use crate::error::PipelineError;
use crate::ir::{IntermediateNode, NodeKind};
use crate::lowering::class_name_for;
use crate::passes::{IntermediateNodePass, PassGroup};

pub const DEFAULT_DOCUMENT_KIND: &str = "default";
pub const MVC_VIEW_DOCUMENT_KIND: &str = "mvc.1.0.view";
pub const RAZOR_PAGE_DOCUMENT_KIND: &str = "mvc.1.0.razor-page";

pub const DEFAULT_NAMESPACE: &str = "Razor";
pub const MVC_NAMESPACE: &str = "AspNetCore";
pub const MVC_VIEW_BASE_TYPE: &str = "global::Microsoft.AspNetCore.Mvc.Razor.RazorPage<TModel>";
pub const RAZOR_PAGE_BASE_TYPE: &str = "global::Microsoft.AspNetCore.Mvc.RazorPages.Page";
pub const EXECUTE_METHOD_NAME: &str = "ExecuteAsync";
pub const TASK_TYPE: &str = "global::System.Threading.Tasks.Task";

/// Shape of the generated skeleton.
#[derive(Debug, Clone)]
struct Skeleton {
    kind: &'static str,
    namespace: String,
    class_name: String,
    base_type: Option<String>,
}

/// Current document kind of a lowered document node.
pub fn document_kind(ir: &IntermediateNode) -> Option<&str> {
    match &ir.kind {
        NodeKind::Document { document_kind } => document_kind.as_deref(),
        _ => None,
    }
}

fn skeleton(document: &RazorCodeDocument, kind: &'static str, namespace: &str, base_type: Option<&str>) -> Result<Skeleton, PipelineError> {
    let options = document.codegen_options()?;
    let source = document.source();
    Ok(Skeleton {
        kind,
        namespace: options
            .root_namespace
            .clone()
            .unwrap_or_else(|| namespace.to_string()),
        class_name: class_name_for(source.relative_path(), &source.checksum_hex()),
        base_type: base_type.map(str::to_string),
    })
}

/// Moves the document's content into namespace/class/method. `using`
/// nodes go to the namespace; everything else becomes the method body.
fn apply(document: &RazorCodeDocument, ir: &mut IntermediateNode, skeleton: Skeleton) -> Result<(), PipelineError> {
    let NodeKind::Document { document_kind } = &mut ir.kind else {
        return Err(PipelineError::InvalidState(
            "classifier expected a document node at the root".to_string(),
        ));
    };
    if document_kind.is_some() {
        return Ok(());
    }
    *document_kind = Some(skeleton.kind.to_string());

    let (usings, body): (Vec<_>, Vec<_>) = std::mem::take(&mut ir.children)
        .into_iter()
        .partition(|n| matches!(n.kind, NodeKind::Using { .. }));

    let method = IntermediateNode::new(NodeKind::Method {
        modifiers: vec!["public".into(), "async".into(), "override".into()],
        return_type: TASK_TYPE.to_string(),
        method_name: EXECUTE_METHOD_NAME.to_string(),
        is_primary: true,
    })
    .with_children(body);
    let class = IntermediateNode::new(NodeKind::Class {
        modifiers: vec!["public".into()],
        class_name: skeleton.class_name,
        base_type: skeleton.base_type,
        interfaces: Vec::new(),
        is_primary: true,
    })
    .with_children(vec![method]);
    let mut namespace_children = usings;
    namespace_children.push(class);
    let namespace = IntermediateNode::new(NodeKind::Namespace {
        content: skeleton.namespace,
        is_primary: true,
    })
    .with_children(namespace_children);

    let options = document.codegen_options()?;
    let source = document.source();
    if !options.suppress_checksum {
        ir.children.push(IntermediateNode::new(NodeKind::Checksum {
            algorithm: source.checksum_algorithm().to_string(),
            checksum: source.checksum_hex(),
            file_path: source.file_path().map(str::to_string),
        }));
    }
    ir.children.push(namespace);
    log::debug!(
        "classified {} as {}",
        source.file_path().unwrap_or("<anonymous>"),
        skeleton.kind
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFIER PASSES
// ═══════════════════════════════════════════════════════════════════════════════

/// `@page` documents.
#[derive(Debug, Default)]
pub struct RazorPageDocumentClassifierPass;

impl IntermediateNodePass for RazorPageDocumentClassifierPass {
    fn name(&self) -> &'static str {
        "razor-page-document-classifier"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DocumentClassifier
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        if document_kind(ir).is_some() {
            return Ok(());
        }
        let is_page = document
            .syntax_tree()?
            .directives()
            .iter()
            .any(|d| d.directive_name() == Some(PAGE));
        if !is_page {
            return Ok(());
        }
        let skeleton = skeleton(document, RAZOR_PAGE_DOCUMENT_KIND, MVC_NAMESPACE, Some(RAZOR_PAGE_BASE_TYPE))?;
        apply(document, ir, skeleton)
    }
}

/// Every other document once the MVC extension is registered.
#[derive(Debug, Default)]
pub struct MvcViewDocumentClassifierPass;

impl IntermediateNodePass for MvcViewDocumentClassifierPass {
    fn name(&self) -> &'static str {
        "mvc-view-document-classifier"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DocumentClassifier
    }

    fn order(&self) -> i32 {
        100
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        if document_kind(ir).is_some() {
            return Ok(());
        }
        let skeleton = skeleton(document, MVC_VIEW_DOCUMENT_KIND, MVC_NAMESPACE, Some(MVC_VIEW_BASE_TYPE))?;
        apply(document, ir, skeleton)
    }
}

/// Fallback for plain Razor documents.
#[derive(Debug, Default)]
pub struct DefaultDocumentClassifierPass;

impl IntermediateNodePass for DefaultDocumentClassifierPass {
    fn name(&self) -> &'static str {
        "default-document-classifier"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DocumentClassifier
    }

    fn order(&self) -> i32 {
        1000
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        if document_kind(ir).is_some() {
            return Ok(());
        }
        let skeleton = skeleton(document, DEFAULT_DOCUMENT_KIND, DEFAULT_NAMESPACE, None)?;
        apply(document, ir, skeleton)
    }
}
