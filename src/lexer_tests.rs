#[cfg(test)]
mod tests {
    use crate::config::ParserOptions;
    use crate::lexer::{LexMode, Token, TokenKind, Tokenizer};
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FRAGMENTS: &[&str] = &[
        "<div>", "</div>", "<p class=\"a\">", "</p>", "<br/>", "<input value='@x' />", "<text>",
        "</text>", "@", "@@", "@x", "@x.y", "@(a + b)", "@{", "}", "{", "@if (a) {", "@foreach (var i in xs) {",
        "@* c *@", "@*", "*@", "<!-- h -->", "<!--", "-->", "@:", "\n", "\r\n", " ", "\t", "\"", "'",
        "a@b.com", "@using System", "@section S {", "@functions {", "@addTagHelper *, A", "text", "é",
        "<", ">", "=", "/", "(", ")", ";", "@DateTime.Now", "@Model?.Name", "@await Foo()", "<a href=\"@u\">",
    ];

    fn tokens(text: &str) -> Vec<Token> {
        let options = ParserOptions::default();
        Tokenizer::new(text, &options).collect()
    }

    fn assert_lossless(text: &str) {
        let tokens = tokens(text);
        let mut offset = 0;
        for token in &tokens {
            assert_eq!(token.span.start, offset, "gap before {:?} in {:?}", token, text);
            assert!(!token.span.is_empty(), "empty token {:?} in {:?}", token, text);
            assert_eq!(&text[token.span.start..token.span.end], token.text);
            offset = token.span.end;
        }
        assert_eq!(offset, text.len(), "tokens stop short in {:?}", text);
    }

    #[test]
    fn test_known_inputs_are_lossless() {
        for text in [
            "",
            "plain text",
            "<p>@DateTime.Now</p>",
            "@{ var x = \"}\"; }<b>@x</b>",
            "@if (ok) { <span>yes</span> } else { <span>no</span> }",
            "@* unterminated",
            "<div class=\"@cls other\" @attr>",
            "@section Scripts { <script>var a = 1;</script> }",
            "mail me at a@b.com",
            "@(\"unterminated",
            "<!-- @x -->",
        ] {
            assert_lossless(text);
        }
    }

    #[test]
    fn test_random_fragment_sequences_are_lossless() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..500 {
            let count = rng.random_range(1..24);
            let text: String = (0..count)
                .map(|_| FRAGMENTS[rng.random_range(0..FRAGMENTS.len())])
                .collect();
            assert_lossless(&text);
        }
    }

    #[test]
    fn test_implicit_expression_tokens() {
        let tokens = tokens("<p>@DateTime.Now</p>");
        let code: Vec<(TokenKind, &str)> = tokens
            .iter()
            .filter(|t| t.mode == LexMode::Code)
            .map(|t| (t.kind, t.text.as_str()))
            .collect();
        assert_eq!(
            code,
            vec![
                (TokenKind::Identifier, "DateTime"),
                (TokenKind::Dot, "."),
                (TokenKind::Identifier, "Now"),
            ]
        );
        let transition = tokens.iter().find(|t| t.kind == TokenKind::Transition).unwrap();
        assert!(tokens
            .iter()
            .filter(|t| t.mode == LexMode::Code)
            .all(|t| t.depth > transition.depth));
    }

    #[test]
    fn test_escaped_transition_and_email_stay_markup() {
        let tokens = tokens("@@home a@b.com");
        assert_eq!(tokens[0].kind, TokenKind::EscapedTransition);
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Transition));
    }

    #[test]
    fn test_razor_comment_tokens() {
        let kinds: Vec<TokenKind> = tokens("@* note *@").iter().map(|t| t.kind).collect();
        assert_eq!(kinds.first(), Some(&TokenKind::RazorCommentOpen));
        assert_eq!(kinds.last(), Some(&TokenKind::RazorCommentClose));
    }
}
