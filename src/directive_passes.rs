//! Directive classifier passes.
//!
//! Each pass folds one directive into the document skeleton: base type,
//! namespace, injected properties, class members and sections. Passes look
//! up directive nodes wherever lowering left them and are safe to run twice.

use std::collections::HashSet;

use crate::classifier::document_kind;
use crate::code_document::RazorCodeDocument;
use crate::directives::{FUNCTIONS, IMPLEMENTS, INHERITS, INJECT, MODEL, NAMESPACE, PAGE, SECTION};
use crate::error::{IrError, PipelineError};
use crate::ir::{IntermediateNode, NodeKind};
use crate::lowering::sanitize_identifier;
use crate::passes::{IntermediateNodePass, PassGroup};

pub const DEFAULT_MODEL_TYPE: &str = "dynamic";
pub const RAZOR_INJECT_ATTRIBUTE: &str = "global::Microsoft.AspNetCore.Mvc.Razor.Internal.RazorInjectAttribute";
pub const ROUTE_TEMPLATE_KEY: &str = "RouteTemplate";

/// Token contents of every well-formed `name` directive, in tree order.
fn directive_tokens(ir: &IntermediateNode, name: &str) -> Vec<Vec<String>> {
    ir.find_directives(name)
        .into_iter()
        .map(|d| {
            d.children
                .iter()
                .filter_map(|c| match &c.kind {
                    NodeKind::DirectiveToken { content, .. } => Some(content.trim().to_string()),
                    _ => None,
                })
                .collect()
        })
        .collect()
}

/// First token of the last `name` directive.
fn last_token(ir: &IntermediateNode, name: &str) -> Option<String> {
    directive_tokens(ir, name)
        .into_iter()
        .rev()
        .find_map(|tokens| tokens.into_iter().next())
}

pub(crate) fn primary_class(ir: &mut IntermediateNode) -> Result<&mut IntermediateNode, IrError> {
    ir.find_primary_class_mut().ok_or(IrError::MissingPrimary("class"))
}

fn primary_namespace(ir: &mut IntermediateNode) -> Result<&mut IntermediateNode, IrError> {
    ir.find_primary_namespace_mut()
        .ok_or(IrError::MissingPrimary("namespace"))
}

/// Index of the primary class among the primary namespace's children.
fn class_position(namespace: &IntermediateNode) -> usize {
    namespace
        .children
        .iter()
        .position(|c| c.kind.is_primary_class())
        .unwrap_or(namespace.children.len())
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAMESPACE / INHERITS / IMPLEMENTS / MODEL
// ═══════════════════════════════════════════════════════════════════════════════

/// `@namespace`. A namespace declared in an import is extended with the
/// folders between the import and the document.
#[derive(Debug, Default)]
pub struct NamespaceDirectivePass;

impl NamespaceDirectivePass {
    fn namespace_for(document: &RazorCodeDocument, declared: &str, declared_in: Option<&str>) -> String {
        let source = document.source();
        if declared_in.is_none() || declared_in == source.file_path() {
            return declared.to_string();
        }
        let import_relative = document
            .imports()
            .iter()
            .find(|i| i.file_path() == declared_in)
            .and_then(|i| i.relative_path());
        let (Some(import_relative), Some(relative)) = (import_relative, source.relative_path()) else {
            return declared.to_string();
        };
        let import_dir = import_relative.rsplit_once('/').map_or("", |(dir, _)| dir);
        let document_dir = relative.rsplit_once('/').map_or("", |(dir, _)| dir);
        let Some(suffix) = document_dir.strip_prefix(import_dir) else {
            return declared.to_string();
        };
        suffix
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(declared.to_string(), |mut ns, segment| {
                ns.push('.');
                ns.push_str(&sanitize_identifier(segment));
                ns
            })
    }
}

impl IntermediateNodePass for NamespaceDirectivePass {
    fn name(&self) -> &'static str {
        "namespace-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let Some(directive) = ir.find_directives(NAMESPACE).last().map(|d| (*d).clone()) else {
            return Ok(());
        };
        let Some(declared) = directive.children.iter().find_map(|c| match &c.kind {
            NodeKind::DirectiveToken { content, .. } => Some(content.trim().to_string()),
            _ => None,
        }) else {
            return Ok(());
        };
        let declared_in = directive.source.as_ref().and_then(|s| s.file_path.as_deref());
        let namespace = Self::namespace_for(document, &declared, declared_in);
        if let NodeKind::Namespace { content, .. } = &mut primary_namespace(ir)?.kind {
            *content = namespace;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InheritsDirectivePass;

impl IntermediateNodePass for InheritsDirectivePass {
    fn name(&self) -> &'static str {
        "inherits-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        10
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let Some(base) = last_token(ir, INHERITS) else {
            return Ok(());
        };
        if let NodeKind::Class { base_type, .. } = &mut primary_class(ir)?.kind {
            *base_type = Some(base);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ImplementsDirectivePass;

impl IntermediateNodePass for ImplementsDirectivePass {
    fn name(&self) -> &'static str {
        "implements-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        10
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let declared: Vec<String> = directive_tokens(ir, IMPLEMENTS)
            .into_iter()
            .filter_map(|t| t.into_iter().next())
            .collect();
        if declared.is_empty() {
            return Ok(());
        }
        if let NodeKind::Class { interfaces, .. } = &mut primary_class(ir)?.kind {
            for interface in declared {
                if !interfaces.contains(&interface) {
                    interfaces.push(interface);
                }
            }
        }
        Ok(())
    }
}

/// Substitutes the model type for `TModel` in the base type.
#[derive(Debug, Default)]
pub struct ModelDirectivePass;

impl ModelDirectivePass {
    pub fn model_type(ir: &IntermediateNode) -> String {
        last_token(ir, MODEL).unwrap_or_else(|| DEFAULT_MODEL_TYPE.to_string())
    }
}

pub(crate) fn substitute_model(type_name: &str, model: &str) -> String {
    type_name.replace("<TModel>", &format!("<{}>", model))
}

impl IntermediateNodePass for ModelDirectivePass {
    fn name(&self) -> &'static str {
        "model-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        20
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let model = Self::model_type(ir);
        if let NodeKind::Class {
            base_type: Some(base),
            ..
        } = &mut primary_class(ir)?.kind
        {
            *base = substitute_model(base, &model);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INJECT / FUNCTIONS / SECTION / PAGE
// ═══════════════════════════════════════════════════════════════════════════════

/// `@inject Type Name` becomes an injected property. The last declaration
/// of a name wins.
#[derive(Debug, Default)]
pub struct InjectDirectivePass;

impl IntermediateNodePass for InjectDirectivePass {
    fn name(&self) -> &'static str {
        "inject-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        30
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let model = ModelDirectivePass::model_type(ir);
        let mut declared: Vec<(String, String)> = Vec::new();
        for tokens in directive_tokens(ir, INJECT) {
            let [type_name, member] = tokens.as_slice() else {
                continue;
            };
            declared.retain(|(_, name)| name != member);
            declared.push((substitute_model(type_name, &model), member.clone()));
        }
        if declared.is_empty() {
            return Ok(());
        }

        let class = primary_class(ir)?;
        let existing: HashSet<String> = class
            .children
            .iter()
            .filter_map(|c| match &c.kind {
                NodeKind::Property { property_name, .. } => Some(property_name.clone()),
                _ => None,
            })
            .collect();
        let properties: Vec<IntermediateNode> = declared
            .into_iter()
            .filter(|(_, name)| !existing.contains(name))
            .map(|(property_type, property_name)| {
                IntermediateNode::new(NodeKind::Property {
                    modifiers: vec!["public".into()],
                    property_type,
                    property_name,
                    attributes: vec![RAZOR_INJECT_ATTRIBUTE.to_string()],
                    initializer: None,
                })
            })
            .collect();
        class.children.splice(0..0, properties);
        Ok(())
    }
}

/// Moves `@functions` bodies into the class.
#[derive(Debug, Default)]
pub struct FunctionsDirectivePass;

impl IntermediateNodePass for FunctionsDirectivePass {
    fn name(&self) -> &'static str {
        "functions-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        40
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let functions = ir.extract_all(&|k: &NodeKind| k.is_directive(FUNCTIONS));
        if functions.is_empty() {
            return Ok(());
        }
        let class = primary_class(ir)?;
        for directive in functions {
            class
                .children
                .extend(directive.children.into_iter().filter(|c| {
                    !matches!(c.kind, NodeKind::DirectiveToken { .. })
                }));
        }
        Ok(())
    }
}

/// `@section name { ... }` becomes a section node around its body.
#[derive(Debug, Default)]
pub struct SectionDirectivePass;

impl IntermediateNodePass for SectionDirectivePass {
    fn name(&self) -> &'static str {
        "section-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        50
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        ir.flat_map_descendants(&mut |node| {
            if !node.kind.is_directive(SECTION) {
                return vec![node];
            }
            let section_name = node
                .children
                .iter()
                .find_map(|c| match &c.kind {
                    NodeKind::DirectiveToken { content, .. } => Some(content.trim().to_string()),
                    _ => None,
                })
                .unwrap_or_default();
            vec![IntermediateNode {
                kind: NodeKind::Section { section_name },
                ..node
            }]
        });
        Ok(())
    }
}

/// Records the `@page` route template as class metadata.
#[derive(Debug, Default)]
pub struct PageDirectivePass;

impl IntermediateNodePass for PageDirectivePass {
    fn name(&self) -> &'static str {
        "page-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        60
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let Some(template) = last_token(ir, PAGE) else {
            return Ok(());
        };
        let template = strip_quotes(&template).to_string();
        let namespace = primary_namespace(ir)?;
        let recorded = namespace.children.iter().any(|c| {
            matches!(&c.kind, NodeKind::RazorCompiledItemMetadataAttribute { key, .. } if key == ROUTE_TEMPLATE_KEY)
        });
        if !recorded {
            let at = class_position(namespace);
            namespace.children.insert(
                at,
                IntermediateNode::new(NodeKind::RazorCompiledItemMetadataAttribute {
                    key: ROUTE_TEMPLATE_KEY.to_string(),
                    value: template,
                }),
            );
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DESIGN TIME / METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Copies every directive token into a helper node so the editor can map
/// them. Design time only.
#[derive(Debug, Default)]
pub struct DesignTimeDirectivePass;

impl IntermediateNodePass for DesignTimeDirectivePass {
    fn name(&self) -> &'static str {
        "design-time-directive"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        900
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        if !document.codegen_options()?.design_time {
            return Ok(());
        }
        if ir.find_first(&|k: &NodeKind| matches!(k, NodeKind::DesignTimeDirective)).is_some() {
            return Ok(());
        }
        let tokens: Vec<IntermediateNode> = ir
            .find_all(&|k: &NodeKind| {
                matches!(k, NodeKind::Directive { .. } | NodeKind::Section { .. })
            })
            .into_iter()
            .flat_map(|d| d.children.iter())
            .filter(|c| matches!(c.kind, NodeKind::DirectiveToken { .. }))
            .cloned()
            .collect();
        primary_class(ir)?.children.insert(
            0,
            IntermediateNode::new(NodeKind::DesignTimeDirective).with_children(tokens),
        );
        Ok(())
    }
}

/// Compiled-item and source-checksum attributes. Runtime only.
#[derive(Debug, Default)]
pub struct MetadataAttributePass;

impl IntermediateNodePass for MetadataAttributePass {
    fn name(&self) -> &'static str {
        "metadata-attribute"
    }

    fn group(&self) -> PassGroup {
        PassGroup::DirectiveClassifier
    }

    fn order(&self) -> i32 {
        1000
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let options = document.codegen_options()?;
        if options.design_time || options.suppress_metadata_attributes {
            return Ok(());
        }
        let Some(kind) = document_kind(ir).map(str::to_string) else {
            return Ok(());
        };
        let source = document.source();
        let Some(relative) = source.relative_path() else {
            return Ok(());
        };
        let identifier = if relative.starts_with('/') {
            relative.to_string()
        } else {
            format!("/{}", relative)
        };
        let exists = ir
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::RazorCompiledItemAttribute { .. }))
            .is_some();
        if exists {
            return Ok(());
        }

        let type_name = match (
            ir.find_primary_namespace().map(|n| &n.kind),
            ir.find_primary_class().map(|c| &c.kind),
        ) {
            (Some(NodeKind::Namespace { content, .. }), Some(NodeKind::Class { class_name, .. })) => {
                format!("{}.{}", content, class_name)
            }
            (_, Some(NodeKind::Class { class_name, .. })) => class_name.clone(),
            _ => return Err(IrError::MissingPrimary("class").into()),
        };

        let at = ir
            .children
            .iter()
            .position(|c| c.kind.is_primary_namespace())
            .unwrap_or(ir.children.len());
        ir.children.insert(
            at,
            IntermediateNode::new(NodeKind::RazorCompiledItemAttribute {
                kind,
                identifier: identifier.clone(),
                type_name,
            }),
        );

        let namespace = primary_namespace(ir)?;
        let at = class_position(namespace);
        namespace.children.insert(
            at,
            IntermediateNode::new(NodeKind::RazorSourceChecksumAttribute {
                algorithm: source.checksum_algorithm().to_string(),
                checksum: source.checksum_hex(),
                identifier,
            }),
        );
        Ok(())
    }
}
