use crate::ir::{IntermediateNode, NodeKind};

/// The single traversal mechanism for intermediate trees.
///
/// Implementers override `visit_*` methods to add behavior and call
/// `walk_children` to continue into a node unless pruning is intended.
/// Kinds without a dedicated method go through `visit_default`.
pub trait IntermediateNodeVisitor {
    fn visit(&mut self, node: &IntermediateNode) {
        walk_node(self, node);
    }

    fn visit_default(&mut self, node: &IntermediateNode) {
        walk_children(self, node);
    }

    fn visit_document(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_using(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_namespace(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_class(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_method(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_field(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_property(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_html_content(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_html_attribute(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_html_attribute_value(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_csharp_expression_attribute_value(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_csharp_code_attribute_value(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_csharp_expression(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_csharp_code(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_directive(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_section(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_design_time_directive(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper_body(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper_create(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper_property(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper_html_attribute(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper_execute(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_tag_helper_runtime(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_view_component_tag_helper(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_checksum(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_compiled_item_attribute(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_source_checksum_attribute(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }

    fn visit_compiled_item_metadata_attribute(&mut self, node: &IntermediateNode) {
        self.visit_default(node);
    }
}

pub fn walk_node<V: IntermediateNodeVisitor + ?Sized>(visitor: &mut V, node: &IntermediateNode) {
    match &node.kind {
        NodeKind::Document { .. } => visitor.visit_document(node),
        NodeKind::Using { .. } => visitor.visit_using(node),
        NodeKind::Namespace { .. } => visitor.visit_namespace(node),
        NodeKind::Class { .. } => visitor.visit_class(node),
        NodeKind::Method { .. } => visitor.visit_method(node),
        NodeKind::Field { .. } => visitor.visit_field(node),
        NodeKind::Property { .. } => visitor.visit_property(node),
        NodeKind::HtmlContent => visitor.visit_html_content(node),
        NodeKind::HtmlAttribute { .. } => visitor.visit_html_attribute(node),
        NodeKind::HtmlAttributeValue { .. } => visitor.visit_html_attribute_value(node),
        NodeKind::CSharpExpressionAttributeValue { .. } => {
            visitor.visit_csharp_expression_attribute_value(node)
        }
        NodeKind::CSharpCodeAttributeValue { .. } => visitor.visit_csharp_code_attribute_value(node),
        NodeKind::CSharpExpression => visitor.visit_csharp_expression(node),
        NodeKind::CSharpCode => visitor.visit_csharp_code(node),
        NodeKind::Directive { .. } | NodeKind::MalformedDirective { .. } => {
            visitor.visit_directive(node)
        }
        NodeKind::Section { .. } => visitor.visit_section(node),
        NodeKind::DesignTimeDirective => visitor.visit_design_time_directive(node),
        NodeKind::TagHelper { .. } => visitor.visit_tag_helper(node),
        NodeKind::TagHelperBody => visitor.visit_tag_helper_body(node),
        NodeKind::TagHelperCreate { .. } => visitor.visit_tag_helper_create(node),
        NodeKind::TagHelperProperty { .. } => visitor.visit_tag_helper_property(node),
        NodeKind::TagHelperHtmlAttribute { .. } => visitor.visit_tag_helper_html_attribute(node),
        NodeKind::TagHelperExecute => visitor.visit_tag_helper_execute(node),
        NodeKind::TagHelperRuntime => visitor.visit_tag_helper_runtime(node),
        NodeKind::ViewComponentTagHelper { .. } => visitor.visit_view_component_tag_helper(node),
        NodeKind::Checksum { .. } => visitor.visit_checksum(node),
        NodeKind::RazorCompiledItemAttribute { .. } => visitor.visit_compiled_item_attribute(node),
        NodeKind::RazorSourceChecksumAttribute { .. } => {
            visitor.visit_source_checksum_attribute(node)
        }
        NodeKind::RazorCompiledItemMetadataAttribute { .. } => {
            visitor.visit_compiled_item_metadata_attribute(node)
        }
        // Leaf; nothing to walk.
        NodeKind::Token { .. } | NodeKind::DirectiveToken { .. } => {}
    }
}

pub fn walk_children<V: IntermediateNodeVisitor + ?Sized>(visitor: &mut V, node: &IntermediateNode) {
    for child in &node.children {
        visitor.visit(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collector {
        expressions: Vec<String>,
        html: usize,
    }

    impl IntermediateNodeVisitor for Collector {
        fn visit_csharp_expression(&mut self, node: &IntermediateNode) {
            self.expressions.push(node.content());
        }

        fn visit_html_content(&mut self, _node: &IntermediateNode) {
            self.html += 1;
        }
    }

    #[test]
    fn test_dispatch_reaches_nested_nodes() {
        let tree = IntermediateNode::new(NodeKind::Document {
            document_kind: None,
        })
        .with_children(vec![
            IntermediateNode::new(NodeKind::HtmlContent),
            IntermediateNode::new(NodeKind::TagHelperBody).with_children(vec![
                IntermediateNode::new(NodeKind::CSharpExpression)
                    .with_children(vec![IntermediateNode::csharp("Model.Name", None)]),
            ]),
        ]);
        let mut collector = Collector::default();
        collector.visit(&tree);
        assert_eq!(collector.expressions, vec!["Model.Name".to_string()]);
        assert_eq!(collector.html, 1);
    }
}
