#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::binder::compute_bindings;
    use crate::diagnostics::*;
    use crate::parse::parse_with_defaults;
    use crate::source::SourceDocument;
    use crate::syntax::{RazorSyntaxTree, SyntaxKind, SyntaxNode};
    use crate::tag_helpers::{
        BoundAttributeDescriptor, TagHelperBinding, TagHelperCollection, TagHelperDescriptor, TagMatchingRuleDescriptor,
        TagMode, TagStructure,
    };
    use pretty_assertions::assert_eq;

    fn tag_cloud() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.TagCloudTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("tagcloud"))
            .with_bound_attribute(BoundAttributeDescriptor::new("foo", "Foo", "System.Int32"))
            .with_bound_attribute(BoundAttributeDescriptor::new("title", "Title", "System.String"))
    }

    fn paragraph() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.PTagHelper", "TestAssembly").with_rule(TagMatchingRuleDescriptor::for_tag("p"))
    }

    fn anchor() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.AnchorTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("a"))
            .with_bound_attribute(
                BoundAttributeDescriptor::new(
                    "asp-all-route-data",
                    "RouteValues",
                    "System.Collections.Generic.IDictionary<System.String, System.String>",
                )
                .with_indexer("asp-route-", "System.String"),
            )
    }

    fn parse_text(text: &str) -> RazorSyntaxTree {
        parse_with_defaults(&SourceDocument::from_text(text))
    }

    fn tag_helper_elements(tree: &RazorSyntaxTree) -> Vec<SyntaxNode> {
        tree.root()
            .descendants()
            .into_iter()
            .filter(|n| n.kind() == SyntaxKind::MarkupTagHelperElement)
            .collect()
    }

    fn binding(node: &SyntaxNode) -> &TagHelperBinding {
        node.tag_helper_binding().unwrap()
    }

    fn codes(tree: &RazorSyntaxTree) -> Vec<String> {
        tree.diagnostics().iter().map(|d| d.code.clone()).collect()
    }

    #[test]
    fn test_bound_elements_are_rewritten_and_the_rest_is_shared() {
        let tree = parse_text("<div><tagcloud foo=\"17\" /></div>\n<span>x</span>");
        let tag_helpers = TagHelperCollection::create(vec![tag_cloud(), paragraph()]);
        let result = compute_bindings(&tree, &tag_helpers, None);

        assert_eq!(result.tree.root().text(), tree.root().text());
        let bound = tag_helper_elements(&result.tree);
        assert_eq!(bound.len(), 1);
        let binding = binding(&bound[0]);
        assert_eq!(binding.tag_name, "tagcloud");
        assert_eq!(binding.tag_mode, TagMode::SelfClosing);
        assert_eq!(binding.parent_tag_name.as_deref(), Some("div"));
        assert_eq!(binding.attributes[0].value.as_deref(), Some("17"));
        assert_eq!(binding.attributes[0].matches[0].attribute().property_name, "Foo");

        let original_span = tree.root().child_nodes().last().unwrap();
        let rewritten_span = result.tree.root().child_nodes().last().unwrap();
        assert!(rewritten_span.ptr_eq(original_span));

        let referenced: Vec<&str> = result.referenced.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(referenced, vec!["Test.TagCloudTagHelper"]);
    }

    #[test]
    fn test_nothing_bound_returns_the_same_tree() {
        let tree = parse_text("<div><span>x</span></div>");
        let result = compute_bindings(&tree, &TagHelperCollection::create(vec![tag_cloud()]), None);
        assert!(result.tree.root().ptr_eq(tree.root()));
        assert!(result.referenced.is_empty());
    }

    #[test]
    fn test_binding_is_deterministic() {
        let text = "<p><tagcloud foo=\"1\" title=\"t\"></tagcloud></p><a asp-route-id=\"3\">x</a><p>y</p>";
        let tag_helpers = TagHelperCollection::create(vec![anchor(), tag_cloud(), paragraph()]);
        let first = compute_bindings(&parse_text(text), &tag_helpers, None);
        let second = compute_bindings(&parse_text(text), &tag_helpers, None);
        assert_eq!(first.tree.root(), second.tree.root());
        assert_eq!(first.referenced, second.referenced);

        // Referenced descriptors follow collection order, not document order.
        let referenced: Vec<&str> = first.referenced.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            referenced,
            vec!["Test.AnchorTagHelper", "Test.TagCloudTagHelper", "Test.PTagHelper"]
        );
        let nested = tag_helper_elements(&first.tree)
            .into_iter()
            .find(|n| n.tag_name() == Some("tagcloud"))
            .unwrap();
        assert_eq!(binding(&nested).parent_tag_name.as_deref(), Some("p"));
    }

    #[test]
    fn test_prefix_is_required_and_kept_in_the_binding() {
        let tree = parse_text("<th:p>x</th:p><p>y</p>");
        let result = compute_bindings(&tree, &TagHelperCollection::create(vec![paragraph()]), Some("th:"));
        let bound = tag_helper_elements(&result.tree);
        assert_eq!(bound.len(), 1);
        let binding = binding(&bound[0]);
        assert_eq!(binding.tag_name, "th:p");
        assert_eq!(binding.prefix.as_deref(), Some("th:"));
        assert_eq!(result.tree.root().text(), "<th:p>x</th:p><p>y</p>");
    }

    #[test]
    fn test_opt_out_element_is_not_bound() {
        let tree = parse_text("<!p>x</!p>");
        let result = compute_bindings(&tree, &TagHelperCollection::create(vec![paragraph()]), None);
        assert!(tag_helper_elements(&result.tree).is_empty());
        assert!(result.referenced.is_empty());
    }

    #[test]
    fn test_bound_attribute_value_diagnostics() {
        let tag_helpers = TagHelperCollection::create(vec![tag_cloud(), anchor()]);
        let cases: &[(&str, &str)] = &[
            ("<tagcloud foo></tagcloud>", RZ_MINIMIZED_BOUND_ATTRIBUTE),
            ("<tagcloud foo=\"  \"></tagcloud>", RZ_EMPTY_BOUND_ATTRIBUTE),
            ("<a asp-route-=\"x\">y</a>", RZ_INDEXER_KEY_MISSING),
        ];
        for (text, code) in cases {
            let result = compute_bindings(&parse_text(text), &tag_helpers, None);
            assert!(
                codes(&result.tree).iter().any(|c| c == code),
                "{:?} should report {} but got {:?}",
                text,
                code,
                codes(&result.tree)
            );
        }

        // An empty string-typed attribute is fine.
        let result = compute_bindings(&parse_text("<tagcloud title=\"\"></tagcloud>"), &tag_helpers, None);
        assert!(result.tree.diagnostics().is_empty());
    }

    #[test]
    fn test_tag_structure_and_child_restrictions() {
        let widget = TagHelperDescriptor::new("Test.WidgetTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("widget").with_structure(TagStructure::WithoutEndTag));
        let mut list = TagHelperDescriptor::new("Test.ListTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("list"));
        list.allowed_child_tags.push("item".to_string());
        let tag_helpers = TagHelperCollection::create(vec![widget, list]);

        let result = compute_bindings(&parse_text("<widget></widget>"), &tag_helpers, None);
        assert_eq!(codes(&result.tree), vec![RZ_TAG_STRUCTURE_MISMATCH.to_string()]);

        let result = compute_bindings(
            &parse_text("<list><item></item><span></span></list>"),
            &tag_helpers,
            None,
        );
        assert_eq!(codes(&result.tree), vec![RZ_INVALID_NESTED_TAG.to_string()]);
        assert_eq!(result.tree.diagnostics()[0].span.absolute_index, 19);
    }

    #[test]
    fn test_shared_descriptors_are_marked_referenced_once() {
        let shared = Arc::new(paragraph());
        let tag_helpers = TagHelperCollection::from_shared(vec![shared.clone()]);
        let result = compute_bindings(&parse_text("<p>a</p><p>b</p>"), &tag_helpers, None);
        assert_eq!(tag_helper_elements(&result.tree).len(), 2);
        assert_eq!(result.referenced.len(), 1);
        assert!(Arc::ptr_eq(result.referenced.get(0).unwrap(), &shared));
    }
}
