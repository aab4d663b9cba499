#[cfg(test)]
mod tests {
    use crate::binder::compute_bindings;
    use crate::config::RazorCodeGenerationOptions;
    use crate::ir::{IntermediateNode, NodeKind};
    use crate::lowering::lower;
    use crate::parse::parse_with_defaults;
    use crate::source::SourceDocument;
    use crate::syntax::RazorSyntaxTree;
    use crate::tag_helpers::{
        AttributeStructure, BoundAttributeDescriptor, TagHelperCollection, TagHelperDescriptor,
        TagMatchingRuleDescriptor, TagMode,
    };
    use pretty_assertions::assert_eq;

    fn parse_text(text: &str) -> RazorSyntaxTree {
        parse_with_defaults(&SourceDocument::new(text, Some("/Test.cshtml".into()), Some("/Test.cshtml".into())))
    }

    fn lower_text(text: &str) -> IntermediateNode {
        lower(&parse_text(text), &[], &RazorCodeGenerationOptions::default()).unwrap()
    }

    fn tag_cloud() -> TagHelperDescriptor {
        TagHelperDescriptor::new("Test.TagCloudTagHelper", "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("tagcloud"))
            .with_bound_attribute(BoundAttributeDescriptor::new("foo", "Foo", "System.Int32"))
            .with_bound_attribute(BoundAttributeDescriptor::new("title", "Title", "System.String"))
    }

    fn lower_bound(text: &str) -> IntermediateNode {
        let tree = parse_text(text);
        let result = compute_bindings(&tree, &TagHelperCollection::create(vec![tag_cloud()]), None);
        lower(&result.tree, &[], &RazorCodeGenerationOptions::default()).unwrap()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MARKUP AND CODE
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_literal_markup_is_one_html_node() {
        let document = lower_text("<p class=\"x\">Hello</p>");
        assert!(matches!(document.kind, NodeKind::Document { .. }));
        assert_eq!(document.children.len(), 1);
        assert_eq!(document.children[0].kind, NodeKind::HtmlContent);
        assert_eq!(document.children[0].content(), "<p class=\"x\">Hello</p>");
        assert_eq!(document.children[0].source.as_ref().unwrap().absolute_index, 0);
    }

    #[test]
    fn test_implicit_expression_splits_markup() {
        let document = lower_text("<p>@DateTime.Now</p>");
        let kinds: Vec<&NodeKind> = document.children.iter().map(|c| &c.kind).collect();
        assert_eq!(
            kinds,
            vec![&NodeKind::HtmlContent, &NodeKind::CSharpExpression, &NodeKind::HtmlContent]
        );
        assert_eq!(document.children[0].content(), "<p>");
        assert_eq!(document.children[1].content(), "DateTime.Now");
        let source = document.children[1].source.as_ref().unwrap();
        assert_eq!((source.absolute_index, source.length), (4, 12));
        assert_eq!(document.children[2].content(), "</p>");
    }

    #[test]
    fn test_explicit_expression_and_code_block() {
        let document = lower_text("@(a + b)@{ var x = 1; }");
        assert_eq!(document.children[0].kind, NodeKind::CSharpExpression);
        assert_eq!(document.children[0].content(), "a + b");
        assert_eq!(document.children[1].kind, NodeKind::CSharpCode);
        assert_eq!(document.children[1].content(), " var x = 1; ");
    }

    #[test]
    fn test_dynamic_attribute_becomes_attribute_node() {
        let document = lower_text("<a href=\"~/@page\">x</a>");
        let attribute = document
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::HtmlAttribute { .. }))
            .unwrap();
        assert_eq!(
            attribute.kind,
            NodeKind::HtmlAttribute {
                attribute_name: "href".into(),
                prefix: "href=\"".into(),
                suffix: "\"".into(),
            }
        );
        assert_eq!(attribute.children.len(), 2);
        assert_eq!(attribute.children[0].content(), "~/");
        assert!(matches!(
            attribute.children[1].kind,
            NodeKind::CSharpExpressionAttributeValue { .. }
        ));
        assert_eq!(attribute.children[1].content(), "page");
        assert_eq!(document.children.last().unwrap().content(), ">x</a>");
    }

    #[test]
    fn test_comments_are_dropped_and_escapes_unescaped() {
        let document = lower_text("a@* hidden *@b @@c");
        let text: String = document
            .find_all(&|k: &NodeKind| *k == NodeKind::HtmlContent)
            .iter()
            .map(|n| n.content())
            .collect();
        assert_eq!(text, "ab @c");
        assert!(document.find_first(&|k: &NodeKind| *k == NodeKind::CSharpExpression).is_none());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIRECTIVES
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_usings_are_deduplicated() {
        let document = lower_text("@using System\n@using System\n@using System.Linq\n");
        let usings: Vec<&NodeKind> = document
            .find_all(&|k: &NodeKind| matches!(k, NodeKind::Using { .. }))
            .into_iter()
            .map(|n| &n.kind)
            .collect();
        assert_eq!(
            usings,
            vec![
                &NodeKind::Using { content: "System".into() },
                &NodeKind::Using { content: "System.Linq".into() },
            ]
        );
    }

    #[test]
    fn test_imported_directives_come_first_and_yield_to_the_document() {
        let import = parse_with_defaults(&SourceDocument::new(
            "@using Shared\n@inherits ImportedBase\n",
            Some("/_ViewImports.cshtml".into()),
            Some("/_ViewImports.cshtml".into()),
        ));
        let tree = parse_text("@inherits OwnBase\n<p></p>");
        let document = lower(&tree, &[import], &RazorCodeGenerationOptions::default()).unwrap();

        assert_eq!(document.children[0].kind, NodeKind::Using { content: "Shared".into() });
        let inherits = document.find_all(&|k: &NodeKind| k.is_directive("inherits"));
        assert_eq!(inherits.len(), 1);
        assert!(matches!(
            &inherits[0].children[0].kind,
            NodeKind::DirectiveToken { content, .. } if content == "OwnBase"
        ));
    }

    #[test]
    fn test_imported_spans_keep_the_import_path_or_are_dropped() {
        let named = parse_with_defaults(&SourceDocument::new(
            "@using Named\n",
            Some("/_ViewImports.cshtml".into()),
            Some("/_ViewImports.cshtml".into()),
        ));
        let unnamed = parse_with_defaults(&SourceDocument::new("@using Unnamed\n", None, None));
        let tree = parse_text("@using Own\n");
        let document = lower(&tree, &[named, unnamed], &RazorCodeGenerationOptions::default()).unwrap();

        let using = |name: &str| {
            document
                .find_first(&|k: &NodeKind| matches!(k, NodeKind::Using { content } if content == name))
                .unwrap()
                .clone()
        };
        let named = using("Named");
        assert_eq!(
            named.source.as_ref().unwrap().file_path.as_deref(),
            Some("/_ViewImports.cshtml")
        );
        assert!(using("Unnamed").source.is_none());
        assert_eq!(
            using("Own").source.as_ref().unwrap().file_path.as_deref(),
            Some("/Test.cshtml")
        );
    }

    #[test]
    fn test_directive_missing_its_token_is_malformed() {
        let document = lower_text("@inherits\n");
        assert!(document
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::MalformedDirective { name } if name == "inherits"))
            .is_some());
        assert!(document.find_first(&|k: &NodeKind| k.is_directive("inherits")).is_none());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TAG HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_tag_helper_lowers_to_create_property_execute() {
        let document = lower_bound("<tagcloud foo=\"17\"></tagcloud>");
        let tag_helper = document
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::TagHelper { .. }))
            .unwrap();
        assert_eq!(
            tag_helper.kind,
            NodeKind::TagHelper {
                tag_name: "tagcloud".into(),
                tag_mode: TagMode::StartTagAndEndTag,
            }
        );

        let steps: Vec<&IntermediateNode> = tag_helper
            .children
            .iter()
            .filter(|c| c.kind != NodeKind::TagHelperBody)
            .collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0].kind,
            NodeKind::TagHelperCreate {
                type_name: "Test.TagCloudTagHelper".into(),
                field_name: String::new(),
            }
        );
        match &steps[1].kind {
            NodeKind::TagHelperProperty {
                attribute_name,
                property_name,
                property_type,
                structure,
                indexer_key,
                ..
            } => {
                assert_eq!(attribute_name, "foo");
                assert_eq!(property_name, "Foo");
                assert_eq!(property_type, "System.Int32");
                assert_eq!(*structure, AttributeStructure::DoubleQuotes);
                assert_eq!(*indexer_key, None);
            }
            other => panic!("expected a property node, got {:?}", other),
        }
        assert_eq!(steps[1].children[0].kind, NodeKind::CSharpExpression);
        assert_eq!(steps[1].children[0].content(), "17");
        assert_eq!(steps[2].kind, NodeKind::TagHelperExecute);
    }

    #[test]
    fn test_string_property_keeps_html_and_unbound_attribute_is_passed_through() {
        let document = lower_bound("<tagcloud title=\"Hi @name\" class=\"c\" />");
        let tag_helper = document
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::TagHelper { .. }))
            .unwrap();
        assert!(tag_helper.children.iter().all(|c| c.kind != NodeKind::TagHelperBody));

        let title = tag_helper
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::TagHelperProperty { property_name, .. } if property_name == "Title"))
            .unwrap();
        let parts: Vec<(&NodeKind, String)> = title.children.iter().map(|c| (&c.kind, c.content())).collect();
        assert_eq!(
            parts,
            vec![
                (&NodeKind::HtmlContent, "Hi ".to_string()),
                (&NodeKind::CSharpExpression, "name".to_string()),
            ]
        );

        let class = tag_helper
            .find_first(&|k: &NodeKind| matches!(k, NodeKind::TagHelperHtmlAttribute { .. }))
            .unwrap();
        assert!(matches!(
            &class.kind,
            NodeKind::TagHelperHtmlAttribute { attribute_name, .. } if attribute_name == "class"
        ));
        assert_eq!(class.children[0].content(), "c");
    }

    #[test]
    fn test_tag_helper_body_is_lowered_markup() {
        let document = lower_bound("<tagcloud>inner @x</tagcloud>");
        let body = document.find_first(&|k: &NodeKind| *k == NodeKind::TagHelperBody).unwrap();
        assert_eq!(body.children[0].content(), "inner ");
        assert_eq!(body.children[1].kind, NodeKind::CSharpExpression);
    }
}
