#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::ParserOptions;
    use crate::diagnostics::*;
    use crate::parse::{parse, parse_with_defaults};
    use crate::source::{SourceDocument, TextSpan};
    use crate::syntax::{RazorSyntaxTree, SyntaxKind, SyntaxNode};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FRAGMENTS: &[&str] = &[
        "<div>", "</div>", "<p id=\"x\">", "</p>", "<br />", "<a href=\"@url\">", "</a>", "<text>", "</text>",
        "@", "@@", "@name", "@a.b(c)", "@(x)", "@(", ")", "@{", "{", "}", "@if (c) {", "@while (true) {",
        "@* c *@", "@*", "*@", "<!-- c -->", "<!--", "-->", "@:", "\n", " ", "\"", "'", ";", "x@y.z",
        "@using System", "@inherits Base<T>", "@section S {", "@functions {", "@addTagHelper *, Lib",
        "@tagHelperPrefix th:", "<th:p>", "hello", "=", "<", ">",
    ];

    fn parse_text(text: &str) -> RazorSyntaxTree {
        parse_with_defaults(&SourceDocument::new(text, Some("/Test.cshtml".into()), Some("/Test.cshtml".into())))
    }

    fn codes(tree: &RazorSyntaxTree) -> Vec<String> {
        tree.diagnostics().iter().map(|d| d.code.clone()).collect()
    }

    fn find(tree: &RazorSyntaxTree, kind: SyntaxKind) -> Vec<SyntaxNode> {
        tree.root().descendants().into_iter().filter(|n| n.kind() == kind).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOSSLESSNESS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_random_documents_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..400 {
            let count = rng.random_range(1..30);
            let text: String = (0..count)
                .map(|_| FRAGMENTS[rng.random_range(0..FRAGMENTS.len())])
                .collect();
            let tree = parse_text(&text);
            assert_eq!(tree.root().text(), text);
            assert_eq!(tree.root().span(), TextSpan::new(0, text.len()));
        }
    }

    #[test]
    fn test_children_are_contiguous() {
        let text = "@using System\n<p class=\"a @b\">@DateTime.Now @(1 + 2)</p>\n@{ var x = 1; <b>@x</b> }";
        let tree = parse_text(text);
        for node in std::iter::once(tree.root().clone()).chain(tree.root().descendants()) {
            let mut offset = node.span().start;
            for child in node.children() {
                assert_eq!(child.span().start, offset, "gap inside {:?}", node.kind());
                offset = child.span().end;
            }
            assert_eq!(offset, node.span().end);
        }
        assert!(tree.diagnostics().is_empty(), "{:?}", tree.diagnostics());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STRUCTURE
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_implicit_expression_inside_element() {
        let tree = parse_text("<p>@DateTime.Now</p>");
        assert_eq!(tree.root().children().len(), 1);
        let element = tree.root().child_nodes().next().unwrap();
        assert_eq!(element.kind(), SyntaxKind::MarkupElement);
        assert_eq!(element.tag_name(), Some("p"));
        assert!(element.end_tag().is_some());

        let expressions = find(&tree, SyntaxKind::CSharpImplicitExpression);
        assert_eq!(expressions.len(), 1);
        assert_eq!(expressions[0].text(), "@DateTime.Now");
        assert_eq!(expressions[0].span(), TextSpan::new(3, 16));
    }

    #[test]
    fn test_statement_with_markup_island() {
        let tree = parse_text("@if (ok) { <b>yes</b> }");
        assert!(tree.diagnostics().is_empty());
        let statements = find(&tree, SyntaxKind::CSharpStatement);
        assert_eq!(statements.len(), 1);
        let island = statements[0]
            .child_nodes()
            .find(|n| n.kind() == SyntaxKind::MarkupBlock)
            .unwrap();
        let element = island.child_nodes().find(|n| n.kind() == SyntaxKind::MarkupElement).unwrap();
        assert_eq!(element.tag_name(), Some("b"));
    }

    #[test]
    fn test_attribute_value_with_code() {
        let tree = parse_text("<a href=\"~/@page\" hidden>x</a>");
        let element = tree.root().child_nodes().next().unwrap();
        let attributes = element.attributes();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].attribute_name(), Some("href"));
        assert_eq!(attributes[1].kind(), SyntaxKind::MarkupMinimizedAttributeBlock);
        let value = attributes[0].attribute_value().unwrap();
        assert!(value
            .child_nodes()
            .any(|n| n.kind() == SyntaxKind::CSharpImplicitExpression && n.text() == "@page"));
    }

    #[test]
    fn test_directives_are_recognized_at_top_level() {
        let tree = parse_text("@addTagHelper *, TestAssembly\n@using System.Linq\n<p>@name</p>");
        let directives = tree.directives();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].directive_name(), Some("addTagHelper"));
        assert_eq!(directives[0].directive_tokens()[0].text(), "*, TestAssembly");
        assert_eq!(directives[1].directive_tokens()[0].text(), "System.Linq");
        assert!(find(&tree, SyntaxKind::MarkupElement)[0].end_tag().is_some());
    }

    #[test]
    fn test_section_body_is_markup() {
        let tree = parse_text("@section Scripts {\n<script>go();</script>\n}");
        assert!(tree.diagnostics().is_empty(), "{:?}", tree.diagnostics());
        let directive = &tree.directives()[0];
        assert_eq!(directive.directive_tokens()[0].text(), "Scripts");
        let body = directive.directive_body().unwrap();
        assert!(body.child_nodes().any(|n| n.kind() == SyntaxKind::MarkupBlock));
    }

    #[test]
    fn test_escaped_transition_and_email_are_text() {
        let tree = parse_text("@@user a@b.com");
        assert!(tree.diagnostics().is_empty());
        assert!(find(&tree, SyntaxKind::CSharpImplicitExpression).is_empty());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIAGNOSTICS
    // ═══════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_structural_errors_are_reported() {
        let cases: &[(&str, &str)] = &[
            ("<div>", RZ_MISSING_END_TAG),
            ("</p>", RZ_UNEXPECTED_END_TAG),
            ("@{ var x = 1;", RZ_UNTERMINATED_CODE_BLOCK),
            ("@(a + b", RZ_UNTERMINATED_EXPLICIT_EXPRESSION),
            ("@* open", RZ_UNTERMINATED_COMMENT),
            ("<!-- open", RZ_UNTERMINATED_COMMENT),
            ("@ x", RZ_UNEXPECTED_TRANSITION),
            ("@{ var s = \"abc\n}", RZ_UNTERMINATED_STRING),
            ("<p class=\"a>", RZ_UNTERMINATED_ATTRIBUTE_VALUE),
            ("@inherits\n", RZ_DIRECTIVE_EXPECTS_TOKEN),
            ("@inherits A\n@inherits B\n", RZ_DUPLICATE_DIRECTIVE),
            ("@functions x { }", RZ_UNEXPECTED_DIRECTIVE_CONTENT),
            ("@functions\n<p></p>", RZ_DIRECTIVE_EXPECTS_BLOCK),
            ("@section S { }\n@section S { }", RZ_SECTION_REDEFINED),
        ];
        for (text, code) in cases {
            let tree = parse_text(text);
            assert!(
                codes(&tree).iter().any(|c| c == code),
                "{:?} should report {} but got {:?}",
                text,
                code,
                codes(&tree)
            );
            assert_eq!(tree.root().text(), *text);
        }
    }

    #[test]
    fn test_diagnostic_spans_are_located() {
        let tree = parse_text("<p>\n  <div>\n</p>");
        let missing = tree
            .diagnostics()
            .iter()
            .find(|d| d.code == RZ_MISSING_END_TAG)
            .unwrap();
        assert_eq!(missing.span.line_index, 1);
        assert_eq!(missing.span.character_index, 2);
        assert_eq!(missing.span.file_path.as_deref(), Some("/Test.cshtml"));
    }

    #[test]
    fn test_invalid_transition_is_code_at_design_time() {
        let source = SourceDocument::from_text("@ x");
        let runtime = parse_with_defaults(&source);
        assert_eq!(
            runtime.root().child_nodes().next().map(|n| n.kind()),
            Some(SyntaxKind::MarkupTextLiteral)
        );
        let design = parse(&source, Arc::new(ParserOptions::default().design_time(true)));
        assert_eq!(
            design.root().child_nodes().next().map(|n| n.kind()),
            Some(SyntaxKind::CSharpImplicitExpression)
        );
    }

    #[test]
    fn test_nesting_limit_is_a_diagnostic() {
        let options = ParserOptions {
            max_nesting_depth: 3,
            ..ParserOptions::default()
        };
        let text = "<a><b><c><d><e>deep</e></d></c></b></a>";
        let tree = parse(&SourceDocument::from_text(text), Arc::new(options));
        assert!(codes(&tree).iter().any(|c| c == RZ_NESTING_TOO_DEEP));
        assert_eq!(tree.root().text(), text);
    }
}
