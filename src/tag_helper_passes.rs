//! Optimization passes.
//!
//! Tag helper field allocation, the generated view component tag helper
//! classes, and removal of directive nodes once every classifier has read
//! them.

use std::collections::{BTreeMap, HashMap};

use crate::codegen::string_literal;
use crate::code_document::RazorCodeDocument;
use crate::directive_passes::primary_class;
use crate::error::PipelineError;
use crate::ir::{IntermediateNode, NodeKind};
use crate::lowering::sanitize_identifier;
use crate::passes::{IntermediateNodePass, PassGroup};
use crate::tag_helpers::TagHelperDescriptor;

pub const GENERATED_CLASS_PREFIX: &str = "__Generated__";
pub const VIEW_COMPONENT_CLASS_SUFFIX: &str = "ViewComponentTagHelper";
const DICTIONARY_TYPE: &str = "global::System.Collections.Generic.Dictionary";

/// Field holding the instance of `type_name`.
pub fn field_name_for(type_name: &str) -> String {
    format!("__{}", sanitize_identifier(&type_name.replace('.', "_")))
}

fn has_tag_helpers(ir: &IntermediateNode) -> bool {
    ir.find_first(&|k| matches!(k, NodeKind::TagHelper { .. })).is_some()
}

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW COMPONENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Generates a nested tag helper class for each view component used by the
/// document and points the create/property nodes at it.
#[derive(Debug, Default)]
pub struct ViewComponentTagHelperPass;

impl ViewComponentTagHelperPass {
    pub fn class_name(descriptor: &TagHelperDescriptor) -> String {
        let name = descriptor.view_component_name().unwrap_or(&descriptor.name);
        format!(
            "{}{}{}",
            GENERATED_CLASS_PREFIX,
            sanitize_identifier(name),
            VIEW_COMPONENT_CLASS_SUFFIX
        )
    }

    fn helper_class(descriptor: &TagHelperDescriptor, class_name: String) -> IntermediateNode {
        let properties = descriptor
            .bound_attributes
            .iter()
            .map(|attribute| {
                let initializer = attribute.indexer_type_name.as_ref().map(|value_type| {
                    format!("new {}<string, global::{}>()", DICTIONARY_TYPE, value_type)
                });
                IntermediateNode::new(NodeKind::Property {
                    modifiers: vec!["public".into()],
                    property_type: format!("global::{}", attribute.type_name),
                    property_name: attribute.property_name.clone(),
                    attributes: Vec::new(),
                    initializer,
                })
            })
            .collect();
        IntermediateNode::new(NodeKind::ViewComponentTagHelper {
            class_name,
            view_component_name: descriptor.view_component_name().unwrap_or_default().to_string(),
            tag_helper_type: descriptor.type_name().to_string(),
        })
        .with_children(properties)
    }
}

impl IntermediateNodePass for ViewComponentTagHelperPass {
    fn name(&self) -> &'static str {
        "view-component-tag-helper"
    }

    fn group(&self) -> PassGroup {
        PassGroup::Optimization
    }

    fn order(&self) -> i32 {
        -10
    }

    fn execute(&self, document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        if !has_tag_helpers(ir) {
            return Ok(());
        }
        let Ok(context) = document.tag_helper_context() else {
            return Ok(());
        };
        let view_components: BTreeMap<String, &TagHelperDescriptor> = context
            .tag_helpers
            .iter()
            .filter(|d| d.is_view_component())
            .map(|d| (d.type_name().to_string(), d.as_ref()))
            .collect();
        if view_components.is_empty() {
            return Ok(());
        }

        let namespace = match ir.find_primary_namespace().map(|n| &n.kind) {
            Some(NodeKind::Namespace { content, .. }) => content.clone(),
            _ => String::new(),
        };
        let class = match ir.find_primary_class().map(|n| &n.kind) {
            Some(NodeKind::Class { class_name, .. }) => class_name.clone(),
            _ => return Ok(()),
        };
        let qualify = |generated: &str| {
            if namespace.is_empty() {
                format!("{}.{}", class, generated)
            } else {
                format!("{}.{}.{}", namespace, class, generated)
            }
        };

        // Type name -> generated class, in first-use order.
        let mut used: Vec<(String, String)> = Vec::new();
        ir.for_each_mut(&mut |node| {
            let type_name = match &mut node.kind {
                NodeKind::TagHelperCreate { type_name, .. } => type_name,
                NodeKind::TagHelperProperty { tag_helper_type, .. } => tag_helper_type,
                _ => return,
            };
            let Some(descriptor) = view_components.get(type_name.as_str()) else {
                return;
            };
            let generated = Self::class_name(descriptor);
            if !used.iter().any(|(t, _)| t == type_name) {
                used.push((type_name.clone(), generated.clone()));
            }
            *type_name = qualify(&generated);
        });

        let class_node = primary_class(ir)?;
        for (type_name, generated) in used {
            let exists = class_node.children.iter().any(|c| {
                matches!(&c.kind, NodeKind::ViewComponentTagHelper { class_name, .. } if *class_name == generated)
            });
            if exists {
                continue;
            }
            if let Some(descriptor) = view_components.get(type_name.as_str()) {
                log::debug!("generating {} for view component {}", generated, type_name);
                class_node.children.push(Self::helper_class(descriptor, generated));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIELD ALLOCATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Adds the runtime scaffolding plus one field per tag helper type, and
/// fills in the field every create and property node targets. A repeated
/// attribute reuses the value already assigned to the first property.
#[derive(Debug, Default)]
pub struct DefaultTagHelperOptimizationPass;

impl IntermediateNodePass for DefaultTagHelperOptimizationPass {
    fn name(&self) -> &'static str {
        "default-tag-helper-optimization"
    }

    fn group(&self) -> PassGroup {
        PassGroup::Optimization
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        if !has_tag_helpers(ir) {
            return Ok(());
        }
        let already_ran = ir
            .find_primary_class()
            .is_some_and(|c| c.children.iter().any(|n| matches!(n.kind, NodeKind::TagHelperRuntime)));
        if already_ran {
            return Ok(());
        }

        let mut types: Vec<String> = Vec::new();
        ir.for_each_mut(&mut |node| match &mut node.kind {
            NodeKind::TagHelperCreate { type_name, field_name } => {
                if !types.contains(type_name) {
                    types.push(type_name.clone());
                }
                *field_name = field_name_for(type_name);
            }
            NodeKind::TagHelperProperty {
                tag_helper_type,
                field_name,
                ..
            } => *field_name = field_name_for(tag_helper_type),
            _ => {}
        });

        ir.for_each_mut(&mut |node| {
            if !matches!(node.kind, NodeKind::TagHelper { .. }) {
                return;
            }
            let mut rendered: HashMap<String, String> = HashMap::new();
            for child in &mut node.children {
                let NodeKind::TagHelperProperty {
                    attribute_name,
                    property_name,
                    field_name,
                    indexer_key,
                    ..
                } = &child.kind
                else {
                    continue;
                };
                let accessor = match indexer_key {
                    Some(key) => format!("{}.{}[{}]", field_name, property_name, string_literal(key)),
                    None => format!("{}.{}", field_name, property_name),
                };
                match rendered.get(attribute_name) {
                    Some(previous) if !child.children.is_empty() => {
                        child.children = vec![IntermediateNode::new(NodeKind::CSharpExpression)
                            .with_children(vec![IntermediateNode::csharp(previous.clone(), None)])];
                    }
                    Some(_) => {}
                    None => {
                        rendered.insert(attribute_name.clone(), accessor);
                    }
                }
            }
        });

        let class = primary_class(ir)?;
        let mut scaffolding = vec![IntermediateNode::new(NodeKind::TagHelperRuntime)];
        scaffolding.extend(types.iter().map(|type_name| {
            IntermediateNode::new(NodeKind::Field {
                modifiers: vec!["private".into()],
                field_type: format!("global::{}", type_name),
                field_name: field_name_for(type_name),
            })
        }));
        class.children.splice(0..0, scaffolding);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVE REMOVAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Drops directive nodes. Their diagnostics move to the document node.
#[derive(Debug, Default)]
pub struct DirectiveRemovalOptimizationPass;

impl IntermediateNodePass for DirectiveRemovalOptimizationPass {
    fn name(&self) -> &'static str {
        "directive-removal"
    }

    fn group(&self) -> PassGroup {
        PassGroup::Optimization
    }

    fn order(&self) -> i32 {
        50
    }

    fn execute(&self, _document: &RazorCodeDocument, ir: &mut IntermediateNode) -> Result<(), PipelineError> {
        let removed = ir.extract_all(&|k| {
            matches!(k, NodeKind::Directive { .. } | NodeKind::MalformedDirective { .. })
        });
        for directive in removed {
            ir.diagnostics.extend(directive.all_diagnostics());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RazorCodeGenerationOptions;
    use crate::source::SourceDocument;
    use crate::tag_helpers::{
        AttributeStructure, TagHelperCollection, TagHelperDocumentContext, TagMode,
        METADATA_VIEW_COMPONENT_NAME,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn property(attribute: &str, type_name: &str, prop: &str, value: &str) -> IntermediateNode {
        IntermediateNode::new(NodeKind::TagHelperProperty {
            attribute_name: attribute.into(),
            property_name: prop.into(),
            property_type: "System.String".into(),
            value_type: "System.String".into(),
            tag_helper_type: type_name.into(),
            field_name: String::new(),
            structure: AttributeStructure::DoubleQuotes,
            indexer_key: None,
            is_enum: false,
        })
        .with_children(vec![IntermediateNode::html(value, None)])
    }

    fn create(type_name: &str) -> IntermediateNode {
        IntermediateNode::new(NodeKind::TagHelperCreate {
            type_name: type_name.into(),
            field_name: String::new(),
        })
    }

    fn classified(body: Vec<IntermediateNode>) -> IntermediateNode {
        let method = IntermediateNode::new(NodeKind::Method {
            modifiers: vec!["public".into()],
            return_type: "void".into(),
            method_name: "ExecuteAsync".into(),
            is_primary: true,
        })
        .with_children(body);
        let class = IntermediateNode::new(NodeKind::Class {
            modifiers: vec!["public".into()],
            class_name: "Index".into(),
            base_type: None,
            interfaces: Vec::new(),
            is_primary: true,
        })
        .with_children(vec![method]);
        let namespace = IntermediateNode::new(NodeKind::Namespace {
            content: "Razor".into(),
            is_primary: true,
        })
        .with_children(vec![class]);
        IntermediateNode::new(NodeKind::Document {
            document_kind: Some("default".into()),
        })
        .with_children(vec![namespace])
    }

    fn tag_helper(children: Vec<IntermediateNode>) -> IntermediateNode {
        IntermediateNode::new(NodeKind::TagHelper {
            tag_name: "p".into(),
            tag_mode: TagMode::StartTagAndEndTag,
        })
        .with_children(children)
    }

    fn document() -> RazorCodeDocument {
        let mut doc = RazorCodeDocument::new(SourceDocument::from_text("<p></p>"), Vec::new());
        doc.set_codegen_options(RazorCodeGenerationOptions::default());
        doc
    }

    #[test]
    fn test_fields_allocated_once_per_type() {
        let mut ir = classified(vec![
            tag_helper(vec![
                create("Test.PTagHelper"),
                create("Test.FormTagHelper"),
                property("title", "Test.PTagHelper", "Title", "a"),
                property("title", "Test.FormTagHelper", "Title", "a"),
            ]),
            tag_helper(vec![create("Test.PTagHelper")]),
        ]);
        let doc = document();
        DefaultTagHelperOptimizationPass.execute(&doc, &mut ir).unwrap();

        let class = ir.find_primary_class().unwrap();
        assert!(matches!(class.children[0].kind, NodeKind::TagHelperRuntime));
        let fields: Vec<&str> = class
            .children
            .iter()
            .filter_map(|c| match &c.kind {
                NodeKind::Field { field_name, .. } => Some(field_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fields, vec!["__Test_PTagHelper", "__Test_FormTagHelper"]);

        // Second property reuses the first assignment.
        let second = ir
            .find_all(&|k| matches!(k, NodeKind::TagHelperProperty { tag_helper_type, .. } if tag_helper_type == "Test.FormTagHelper"))[0]
            .clone();
        assert_eq!(second.children.len(), 1);
        assert!(second.children[0].source.is_none());
        assert_eq!(second.children[0].content(), "__Test_PTagHelper.Title");

        let once = ir.clone();
        DefaultTagHelperOptimizationPass.execute(&doc, &mut ir).unwrap();
        assert_eq!(ir, once);
    }

    #[test]
    fn test_directive_removal_keeps_diagnostics() {
        let span = crate::source::SourceSpan::default();
        let mut malformed = IntermediateNode::new(NodeKind::MalformedDirective { name: "inherits".into() });
        malformed
            .diagnostics
            .push(crate::diagnostics::RazorDiagnostic::error("RZ1013", "bad", span));
        let mut ir = classified(vec![
            IntermediateNode::new(NodeKind::Directive { name: "section".into() }),
            malformed,
            IntermediateNode::new(NodeKind::HtmlContent),
        ]);
        DirectiveRemovalOptimizationPass.execute(&document(), &mut ir).unwrap();
        assert_eq!(ir.find_primary_method().unwrap().children.len(), 1);
        assert_eq!(ir.diagnostics.len(), 1);
    }

    #[test]
    fn test_view_component_class_generated() {
        let descriptor = TagHelperDescriptor::new("__Generated__Cart", "App")
            .with_metadata(METADATA_VIEW_COMPONENT_NAME, "Cart")
            .with_bound_attribute(
                crate::tag_helpers::BoundAttributeDescriptor::new("items", "Items", "System.Collections.Generic.IDictionary<System.String, System.Int32>")
                    .with_indexer("items-", "System.Int32"),
            );
        let mut doc = document();
        doc.set_tag_helper_context(
            TagHelperDocumentContext::new(None, Arc::new(TagHelperCollection::create(vec![descriptor]))),
            Vec::new(),
        );
        let mut ir = classified(vec![tag_helper(vec![create("__Generated__Cart")])]);
        ViewComponentTagHelperPass.execute(&doc, &mut ir).unwrap();
        ViewComponentTagHelperPass.execute(&doc, &mut ir).unwrap();

        let class = ir.find_primary_class().unwrap();
        let generated: Vec<&IntermediateNode> = class
            .children
            .iter()
            .filter(|c| matches!(c.kind, NodeKind::ViewComponentTagHelper { .. }))
            .collect();
        assert_eq!(generated.len(), 1);
        assert!(matches!(
            &generated[0].children[0].kind,
            NodeKind::Property { initializer: Some(init), .. } if init.contains("Dictionary<string, global::System.Int32>")
        ));
        let create = ir.find_first(&|k| matches!(k, NodeKind::TagHelperCreate { .. })).unwrap();
        assert!(matches!(
            &create.kind,
            NodeKind::TagHelperCreate { type_name, .. } if type_name == "Razor.Index.__Generated__CartViewComponentTagHelper"
        ));
    }
}
