//! Parse Module
//!
//! Recursive-descent parser over the mode-aware token stream. Markup parsing
//! and code parsing call into each other at transitions. Every token lands in
//! exactly one leaf, so the tree text always equals the source text.
//!
//! User errors never abort the parse: they become diagnostics on the node
//! that contains them.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::config::ParserOptions;
use crate::diagnostics::*;
use crate::directives::{
    validate_token, DirectiveKind, DirectiveTokenKind, DirectiveUsage, SECTION,
};
use crate::lexer::{
    is_void_element, transition_target, LexMode, Token, TokenKind, Tokenizer, TransitionTarget,
};
use crate::source::{SourceDocument, TextSpan};
use crate::syntax::{RazorSyntaxTree, SyntaxElement, SyntaxKind, SyntaxNode};

/// Parses a document into an immutable syntax tree.
pub fn parse(source: &SourceDocument, options: Arc<ParserOptions>) -> RazorSyntaxTree {
    let root = {
        let tokens: VecDeque<Token> = Tokenizer::new(source.text(), &options).collect();
        let token_count = tokens.len();
        let mut parser = Parser {
            source,
            options: &options,
            tokens,
            nesting: 0,
            singly_occurring: HashSet::new(),
            sections: HashSet::new(),
        };
        let mut children = parser.parse_markup_sequence(0, &mut Vec::new(), false);
        while let Some(token) = parser.tokens.pop_front() {
            children.push(token.into());
        }
        log::trace!(
            "parsed {} tokens for {}",
            token_count,
            source.file_path().unwrap_or("<anonymous>")
        );
        SyntaxNode::with_start(SyntaxKind::Document, 0, children)
    };
    RazorSyntaxTree::new(root, source.clone(), options)
}

pub fn parse_with_defaults(source: &SourceDocument) -> RazorSyntaxTree {
    parse(source, Arc::new(ParserOptions::default()))
}

struct Parser<'a> {
    source: &'a SourceDocument,
    options: &'a ParserOptions,
    tokens: VecDeque<Token>,
    nesting: usize,
    singly_occurring: HashSet<String>,
    sections: HashSet<String>,
}

fn describe_token_kind(kind: DirectiveTokenKind) -> &'static str {
    match kind {
        DirectiveTokenKind::Type => "type name",
        DirectiveTokenKind::Member => "identifier",
        DirectiveTokenKind::Namespace => "namespace name",
        DirectiveTokenKind::String => "string, surrounded by double quotes",
        DirectiveTokenKind::Attribute => "C# attribute",
        DirectiveTokenKind::Boolean => "boolean value",
        DirectiveTokenKind::Text => "value",
    }
}

fn is_unterminated_literal(token: &Token) -> bool {
    let text = token.text.as_str();
    let quote = match token.kind {
        TokenKind::StringLiteral => '"',
        TokenKind::CharLiteral => '\'',
        _ => return false,
    };
    let body = text.trim_start_matches(['@', '$']);
    if body.len() < 2 || !body.ends_with(quote) {
        return true;
    }
    if text.starts_with('@') || text.starts_with("$@") {
        return false;
    }
    let escapes = body[..body.len() - 1]
        .chars()
        .rev()
        .take_while(|&c| c == '\\')
        .count();
    escapes % 2 == 1
}

fn balance(children: &[SyntaxElement], open: TokenKind, close: TokenKind) -> (usize, i64) {
    let mut opened = 0;
    let mut depth = 0i64;
    for token in children.iter().filter_map(SyntaxElement::as_token) {
        if token.kind == open {
            opened += 1;
            depth += 1;
        } else if token.kind == close {
            depth -= 1;
        }
    }
    (opened, depth)
}

impl<'a> Parser<'a> {
    // ═══════════════════════════════════════════════════════════════════════════
    // TOKEN CURSOR
    // ═══════════════════════════════════════════════════════════════════════════

    fn peek(&self) -> Option<&Token> {
        self.tokens.front()
    }

    fn peek_n(&self, n: usize) -> Option<&Token> {
        self.tokens.get(n)
    }

    fn bump(&mut self) -> Option<Token> {
        self.tokens.pop_front()
    }

    fn bump_into(&mut self, children: &mut Vec<SyntaxElement>) {
        if let Some(token) = self.bump() {
            children.push(token.into());
        }
    }

    fn at(&self, kind: TokenKind, depth: usize) -> bool {
        self.peek()
            .map_or(false, |t| t.kind == kind && t.depth == depth)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.source.len(), |t| t.span.start)
    }

    fn error(&self, code: &str, message: impl Into<String>, span: TextSpan) -> RazorDiagnostic {
        RazorDiagnostic::error(code, message, self.source.source_span(span))
    }

    fn enter(&mut self) -> bool {
        if self.nesting >= self.options.max_nesting_depth {
            return false;
        }
        self.nesting += 1;
        true
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    /// Consumes every token deeper than `depth` without structure.
    fn flatten(&mut self, depth: usize, children: &mut Vec<SyntaxElement>) {
        while self.peek().map_or(false, |t| t.depth > depth) {
            self.bump_into(children);
        }
    }

    fn too_deep(&self, span: TextSpan) -> RazorDiagnostic {
        self.error(
            RZ_NESTING_TOO_DEEP,
            format!(
                "Markup and code are nested more than {} levels deep.",
                self.options.max_nesting_depth
            ),
            span,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MARKUP
    // ═══════════════════════════════════════════════════════════════════════════

    fn flush_text(text: &mut Vec<SyntaxElement>, children: &mut Vec<SyntaxElement>) {
        if !text.is_empty() {
            let literal = SyntaxNode::new(SyntaxKind::MarkupTextLiteral, std::mem::take(text));
            children.push(literal.into());
        }
    }

    fn is_end_tag_start(&self) -> bool {
        match (self.peek(), self.peek_n(1)) {
            (Some(open), Some(slash)) => {
                open.kind == TokenKind::OpenAngle
                    && slash.kind == TokenKind::ForwardSlash
                    && slash.depth == open.depth
            }
            _ => false,
        }
    }

    fn end_tag_name(&self) -> Option<&str> {
        let depth = self.peek()?.depth;
        self.tokens
            .iter()
            .skip(2)
            .take(2)
            .find(|t| t.kind == TokenKind::Text && t.depth == depth)
            .map(|t| t.text.as_str())
    }

    /// Markup content at `depth` until the frame ends or an end tag closes one
    /// of the `open` elements.
    fn parse_markup_sequence(
        &mut self,
        depth: usize,
        open: &mut Vec<String>,
        transition_elements: bool,
    ) -> Vec<SyntaxElement> {
        let mut children = Vec::new();
        let mut text = Vec::new();
        while let Some(token) = self.peek() {
            if token.depth < depth {
                break;
            }
            let starts_construct = match token.kind {
                TokenKind::Transition => {
                    token.mode == LexMode::Markup && token.depth == depth
                }
                TokenKind::RazorCommentOpen
                | TokenKind::HtmlCommentOpen
                | TokenKind::OpenAngle => true,
                _ => false,
            };
            if !starts_construct {
                self.bump_into(&mut text);
                continue;
            }

            let kind = token.kind;
            if kind == TokenKind::OpenAngle && self.is_end_tag_start() {
                let closes_open = self.end_tag_name().map_or(false, |name| {
                    open.iter().any(|o| o.eq_ignore_ascii_case(name))
                });
                if closes_open {
                    break;
                }
                Self::flush_text(&mut text, &mut children);
                let stray = self.parse_stray_end_tag();
                children.push(stray.into());
                continue;
            }

            Self::flush_text(&mut text, &mut children);
            let node = match kind {
                TokenKind::Transition => self.parse_transition(),
                TokenKind::RazorCommentOpen => self.parse_razor_comment(),
                TokenKind::HtmlCommentOpen => self.parse_html_comment(),
                _ => self.parse_element(depth, open, transition_elements),
            };
            children.push(node.into());
        }
        Self::flush_text(&mut text, &mut children);
        children
    }

    fn parse_stray_end_tag(&mut self) -> SyntaxNode {
        let end_tag = self.parse_tag();
        let name = end_tag.tag_name().unwrap_or_default().to_string();
        let span = end_tag.span();
        SyntaxNode::new(SyntaxKind::MarkupElement, vec![end_tag.into()]).with_diagnostic(
            self.error(
                RZ_UNEXPECTED_END_TAG,
                format!(
                    "Encountered end tag \"{}\" with no matching start tag.",
                    name
                ),
                span,
            ),
        )
    }

    fn is_declaration(start_tag: &SyntaxNode) -> bool {
        let mut tokens = start_tag.child_tokens().skip(1);
        match tokens.next().map(|t| t.kind) {
            Some(TokenKind::QuestionMark) => true,
            Some(TokenKind::Bang) => tokens.next().map_or(true, |t| {
                t.text.eq_ignore_ascii_case("doctype") || t.text.starts_with('[')
            }),
            _ => false,
        }
    }

    fn parse_element(
        &mut self,
        depth: usize,
        open: &mut Vec<String>,
        transition_allowed: bool,
    ) -> SyntaxNode {
        let start_tag = self.parse_tag();
        let terminated = start_tag
            .child_tokens()
            .last()
            .map_or(false, |t| t.kind == TokenKind::CloseAngle);
        let Some(name) = start_tag.tag_name().map(str::to_string) else {
            return SyntaxNode::new(SyntaxKind::MarkupElement, vec![start_tag.into()]);
        };
        let kind = if transition_allowed && name == "text" {
            SyntaxKind::MarkupTransitionElement
        } else {
            SyntaxKind::MarkupElement
        };
        if !terminated
            || start_tag.is_self_closing()
            || is_void_element(&name)
            || Self::is_declaration(&start_tag)
        {
            return SyntaxNode::new(kind, vec![start_tag.into()]);
        }

        let start_span = start_tag.span();
        if !self.enter() {
            let diagnostic = self.too_deep(start_span);
            return SyntaxNode::new(kind, vec![start_tag.into()]).with_diagnostic(diagnostic);
        }
        open.push(name.clone());
        let mut children: Vec<SyntaxElement> = vec![start_tag.into()];
        children.extend(self.parse_markup_sequence(depth, open, false));
        open.pop();
        self.leave();

        let closes_this = self.is_end_tag_start()
            && self
                .end_tag_name()
                .map_or(false, |n| n.eq_ignore_ascii_case(&name));
        if closes_this {
            let end_tag = self.parse_tag();
            children.push(end_tag.into());
            return SyntaxNode::new(kind, children);
        }
        let diagnostic = self.error(
            RZ_MISSING_END_TAG,
            format!(
                "The \"{}\" element was not closed. All elements must be either self-closing or have a matching end tag.",
                name
            ),
            start_span,
        );
        SyntaxNode::new(kind, children).with_diagnostic(diagnostic)
    }

    /// Start or end tag beginning at the current `<`.
    fn parse_tag(&mut self) -> SyntaxNode {
        let start = self.offset();
        let Some(open) = self.bump() else {
            return SyntaxNode::with_start(SyntaxKind::MarkupStartTag, start, Vec::new());
        };
        let depth = open.depth;
        let is_end = self.at(TokenKind::ForwardSlash, depth);
        let mut children: Vec<SyntaxElement> = vec![open.into()];
        let mut seen_name = false;
        let mut closed = false;

        while let Some(token) = self.peek() {
            if token.depth < depth {
                break;
            }
            let (kind, same_depth) = (token.kind, token.depth == depth);
            match kind {
                TokenKind::CloseAngle if same_depth => {
                    self.bump_into(&mut children);
                    closed = true;
                    break;
                }
                // The next tag started before this one closed.
                TokenKind::OpenAngle | TokenKind::HtmlCommentOpen if same_depth => break,
                TokenKind::Text if same_depth && !seen_name => {
                    seen_name = true;
                    self.bump_into(&mut children);
                }
                TokenKind::Text if same_depth && !is_end => {
                    let attribute = self.parse_attribute(depth);
                    children.push(attribute.into());
                }
                TokenKind::Transition if same_depth => {
                    let code = self.parse_transition();
                    children.push(code.into());
                }
                TokenKind::RazorCommentOpen => {
                    let comment = self.parse_razor_comment();
                    children.push(comment.into());
                }
                _ => self.bump_into(&mut children),
            }
        }

        let kind = if is_end {
            SyntaxKind::MarkupEndTag
        } else {
            SyntaxKind::MarkupStartTag
        };
        let node = SyntaxNode::new(kind, children);
        if closed {
            return node;
        }
        let diagnostic = self.error(
            RZ_UNTERMINATED_TAG,
            format!(
                "The tag \"{}\" is missing its closing \">\".",
                node.tag_name().unwrap_or_default()
            ),
            node.span(),
        );
        node.with_diagnostic(diagnostic)
    }

    fn parse_attribute(&mut self, depth: usize) -> SyntaxNode {
        let mut children = Vec::new();
        self.bump_into(&mut children);

        let mut lookahead = 0;
        while self.peek_n(lookahead).map_or(false, |t| {
            t.depth == depth && matches!(t.kind, TokenKind::Whitespace | TokenKind::NewLine)
        }) {
            lookahead += 1;
        }
        let has_value = self
            .peek_n(lookahead)
            .map_or(false, |t| t.depth == depth && t.kind == TokenKind::Equals);
        if !has_value {
            return SyntaxNode::new(SyntaxKind::MarkupMinimizedAttributeBlock, children);
        }

        for _ in 0..=lookahead {
            self.bump_into(&mut children);
        }
        while self.peek().map_or(false, |t| {
            t.depth == depth && matches!(t.kind, TokenKind::Whitespace | TokenKind::NewLine)
        }) {
            self.bump_into(&mut children);
        }
        if let Some(value) = self.parse_attribute_value(depth) {
            children.push(value.into());
        }
        SyntaxNode::new(SyntaxKind::MarkupAttributeBlock, children)
    }

    fn parse_attribute_value(&mut self, depth: usize) -> Option<SyntaxNode> {
        let token = self.peek()?;
        if token.depth != depth {
            return None;
        }
        match token.kind {
            TokenKind::DoubleQuote | TokenKind::SingleQuote => {
                let quote = token.kind;
                let mut children = Vec::new();
                let mut literal = Vec::new();
                let mut closed = false;
                self.bump_into(&mut children);
                while let Some(t) = self.peek() {
                    if t.depth < depth {
                        break;
                    }
                    if t.depth == depth && t.kind == quote {
                        Self::flush_text(&mut literal, &mut children);
                        self.bump_into(&mut children);
                        closed = true;
                        break;
                    }
                    if t.depth == depth && t.kind == TokenKind::Transition {
                        Self::flush_text(&mut literal, &mut children);
                        let code = self.parse_transition();
                        children.push(code.into());
                        continue;
                    }
                    if t.kind == TokenKind::RazorCommentOpen {
                        Self::flush_text(&mut literal, &mut children);
                        let comment = self.parse_razor_comment();
                        children.push(comment.into());
                        continue;
                    }
                    self.bump_into(&mut literal);
                }
                Self::flush_text(&mut literal, &mut children);
                let value = SyntaxNode::new(SyntaxKind::MarkupAttributeValue, children);
                if closed {
                    return Some(value);
                }
                let diagnostic = self.error(
                    RZ_UNTERMINATED_ATTRIBUTE_VALUE,
                    "The attribute value is missing its closing quote.",
                    value.span(),
                );
                Some(value.with_diagnostic(diagnostic))
            }
            TokenKind::Text => {
                let mut literal = Vec::new();
                self.bump_into(&mut literal);
                let text = SyntaxNode::new(SyntaxKind::MarkupTextLiteral, literal);
                Some(SyntaxNode::new(
                    SyntaxKind::MarkupAttributeValue,
                    vec![text.into()],
                ))
            }
            TokenKind::Transition => {
                let code = self.parse_transition();
                Some(SyntaxNode::new(
                    SyntaxKind::MarkupAttributeValue,
                    vec![code.into()],
                ))
            }
            _ => None,
        }
    }

    fn parse_html_comment(&mut self) -> SyntaxNode {
        let mut children = Vec::new();
        let Some(open) = self.bump() else {
            return SyntaxNode::with_start(SyntaxKind::MarkupCommentBlock, self.offset(), children);
        };
        let depth = open.depth;
        children.push(open.into());
        let mut closed = false;
        while let Some(t) = self.peek() {
            if t.depth < depth {
                break;
            }
            let (kind, same_depth) = (t.kind, t.depth == depth);
            match kind {
                TokenKind::HtmlCommentClose if same_depth => {
                    self.bump_into(&mut children);
                    closed = true;
                    break;
                }
                TokenKind::Transition if same_depth => {
                    let code = self.parse_transition();
                    children.push(code.into());
                }
                TokenKind::RazorCommentOpen => {
                    let comment = self.parse_razor_comment();
                    children.push(comment.into());
                }
                _ => self.bump_into(&mut children),
            }
        }
        let node = SyntaxNode::new(SyntaxKind::MarkupCommentBlock, children);
        if closed {
            return node;
        }
        let diagnostic = self.error(
            RZ_UNTERMINATED_COMMENT,
            "The HTML comment is missing its terminating \"-->\".",
            node.span(),
        );
        node.with_diagnostic(diagnostic)
    }

    fn parse_razor_comment(&mut self) -> SyntaxNode {
        let mut children = Vec::new();
        let Some(open) = self.bump() else {
            return SyntaxNode::with_start(SyntaxKind::RazorComment, self.offset(), children);
        };
        let depth = open.depth;
        children.push(open.into());
        while self.at(TokenKind::RazorCommentBody, depth) {
            self.bump_into(&mut children);
        }
        let closed = self.at(TokenKind::RazorCommentClose, depth);
        if closed {
            self.bump_into(&mut children);
        }
        let node = SyntaxNode::new(SyntaxKind::RazorComment, children);
        if closed {
            return node;
        }
        let diagnostic = self.error(
            RZ_UNTERMINATED_COMMENT,
            "The Razor comment is missing its terminating \"*@\".",
            node.span(),
        );
        node.with_diagnostic(diagnostic)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CODE
    // ═══════════════════════════════════════════════════════════════════════════

    fn parse_transition(&mut self) -> SyntaxNode {
        let start = self.offset();
        let Some(transition) = self.bump() else {
            return SyntaxNode::with_start(SyntaxKind::CSharpImplicitExpression, start, Vec::new());
        };
        let depth = transition.depth;
        let target = transition_target(
            &self.source.text()[transition.span.end..],
            transition.mode,
            depth == 0,
            &self.options.directives,
        );
        let has_code = self.peek().map_or(false, |t| t.depth > depth);

        if !has_code || target == TransitionTarget::Invalid {
            let kind = if self.options.design_time {
                SyntaxKind::CSharpImplicitExpression
            } else {
                SyntaxKind::MarkupTextLiteral
            };
            let diagnostic = self.error(
                RZ_UNEXPECTED_TRANSITION,
                "A space, line break or invalid character was encountered after the \"@\" character. Only valid identifiers, keywords, comments, \"(\" and \"{\" are valid at the start of a code block.",
                transition.span,
            );
            return SyntaxNode::new(kind, vec![transition.into()]).with_diagnostic(diagnostic);
        }

        let mut children: Vec<SyntaxElement> = vec![transition.into()];
        if !self.enter() {
            self.flatten(depth, &mut children);
            let node = SyntaxNode::new(SyntaxKind::CSharpCodeBlock, children);
            let diagnostic = self.too_deep(node.span());
            return node.with_diagnostic(diagnostic);
        }

        let node = match target {
            TransitionTarget::Directive(kind) => self.parse_directive(children, kind),
            TransitionTarget::Explicit => {
                children.extend(self.parse_code_body(depth + 1));
                let (_, open) = balance(&children, TokenKind::LeftParen, TokenKind::RightParen);
                let node = SyntaxNode::new(SyntaxKind::CSharpExplicitExpression, children);
                if open == 0 {
                    node
                } else {
                    let diagnostic = self.error(
                        RZ_UNTERMINATED_EXPLICIT_EXPRESSION,
                        "The explicit expression block is missing a closing \")\" character.",
                        node.span(),
                    );
                    node.with_diagnostic(diagnostic)
                }
            }
            TransitionTarget::Block | TransitionTarget::Statement => {
                children.extend(self.parse_code_body(depth + 1));
                let kind = if target == TransitionTarget::Block {
                    SyntaxKind::CSharpCodeBlock
                } else {
                    SyntaxKind::CSharpStatement
                };
                let (opened, open) = balance(&children, TokenKind::LeftBrace, TokenKind::RightBrace);
                let node = SyntaxNode::new(kind, children);
                let missing_block = target == TransitionTarget::Block && opened == 0;
                if open == 0 && !missing_block {
                    node
                } else {
                    let diagnostic = self.error(
                        RZ_UNTERMINATED_CODE_BLOCK,
                        "The code block is missing a closing \"}\" character.",
                        node.span(),
                    );
                    node.with_diagnostic(diagnostic)
                }
            }
            TransitionTarget::Implicit | TransitionTarget::Invalid => {
                children.extend(self.parse_code_body(depth + 1));
                SyntaxNode::new(SyntaxKind::CSharpImplicitExpression, children)
            }
        };
        self.leave();
        let literals = self.literal_diagnostics(node.children());
        node.with_diagnostics(literals)
    }

    fn literal_diagnostics(&self, children: &[SyntaxElement]) -> Vec<RazorDiagnostic> {
        children
            .iter()
            .filter_map(SyntaxElement::as_token)
            .filter(|t| is_unterminated_literal(t))
            .map(|t| {
                self.error(
                    RZ_UNTERMINATED_STRING,
                    "Unterminated string literal. Strings that start with a quotation mark must be terminated before the end of the line.",
                    t.span,
                )
            })
            .collect()
    }

    /// Code tokens at `depth` with any markup islands and comments nested in them.
    fn parse_code_body(&mut self, depth: usize) -> Vec<SyntaxElement> {
        let mut children = Vec::new();
        while let Some(token) = self.peek() {
            if token.depth < depth {
                break;
            }
            if token.depth == depth {
                if token.kind == TokenKind::RazorCommentOpen {
                    let comment = self.parse_razor_comment();
                    children.push(comment.into());
                } else {
                    self.bump_into(&mut children);
                }
                continue;
            }
            let (kind, mode, adjacent) = (token.kind, token.mode, token.depth == depth + 1);
            let node = match (kind, mode) {
                (TokenKind::RazorCommentOpen, _) if adjacent => self.parse_razor_comment(),
                (TokenKind::Transition, LexMode::Markup) if adjacent => {
                    self.parse_markup_line()
                }
                _ => self.parse_markup_island(depth + 1),
            };
            children.push(node.into());
        }
        children
    }

    fn parse_markup_island(&mut self, depth: usize) -> SyntaxNode {
        let start = self.offset();
        if !self.enter() {
            let mut children = Vec::new();
            self.flatten(depth - 1, &mut children);
            let node = SyntaxNode::with_start(SyntaxKind::MarkupBlock, start, children);
            let diagnostic = self.too_deep(node.span());
            return node.with_diagnostic(diagnostic);
        }
        let children = self.parse_markup_sequence(depth, &mut Vec::new(), true);
        self.leave();
        SyntaxNode::with_start(SyntaxKind::MarkupBlock, start, children)
    }

    fn parse_markup_line(&mut self) -> SyntaxNode {
        let start = self.offset();
        let mut children = Vec::new();
        let depth = self.peek().map_or(0, |t| t.depth);
        self.bump_into(&mut children);
        if self.at(TokenKind::Colon, depth) {
            self.bump_into(&mut children);
        }
        children.extend(self.parse_markup_sequence(depth, &mut Vec::new(), false));
        SyntaxNode::with_start(SyntaxKind::MarkupLine, start, children)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIRECTIVES
    // ═══════════════════════════════════════════════════════════════════════════

    fn take_inline_whitespace(&mut self, depth: usize, children: &mut Vec<SyntaxElement>) {
        while self.at(TokenKind::Whitespace, depth) {
            self.bump_into(children);
        }
    }

    fn parse_directive(&mut self, mut children: Vec<SyntaxElement>, kind: DirectiveKind) -> SyntaxNode {
        let depth = children
            .first()
            .and_then(SyntaxElement::as_token)
            .map_or(0, |t| t.depth)
            + 1;
        let Some(keyword) = self.bump() else {
            return SyntaxNode::new(SyntaxKind::RazorDirective, children);
        };
        let name = keyword.text.clone();
        let keyword_span = keyword.span;
        children.push(keyword.into());
        let descriptor = self.options.directives.get(&name).cloned();
        let mut diagnostics = Vec::new();

        if let Some(descriptor) = &descriptor {
            for expected in &descriptor.tokens {
                self.take_inline_whitespace(depth, &mut children);
                let available = self.peek().map_or(false, |t| {
                    t.depth == depth && !matches!(t.kind, TokenKind::NewLine | TokenKind::LeftBrace)
                });
                if !available {
                    if !expected.optional {
                        diagnostics.push(self.error(
                            RZ_DIRECTIVE_EXPECTS_TOKEN,
                            format!(
                                "The '{}' directive expects a {}.",
                                name,
                                describe_token_kind(expected.kind)
                            ),
                            TextSpan::empty(keyword_span.end),
                        ));
                    }
                    break;
                }
                let mut token = self.parse_directive_token(depth, expected.kind, kind);
                if !validate_token(expected.kind, &token.text()) {
                    let diagnostic = self.error(
                        RZ_DIRECTIVE_EXPECTS_TOKEN,
                        format!(
                            "The '{}' directive expects a {}.",
                            name,
                            describe_token_kind(expected.kind)
                        ),
                        token.span(),
                    );
                    token = token.with_diagnostic(diagnostic);
                }
                children.push(token.into());
            }
        }

        match kind {
            DirectiveKind::SingleLine => {
                let mut unexpected: Option<TextSpan> = None;
                while let Some(t) = self.peek() {
                    if t.depth < depth {
                        break;
                    }
                    if t.kind == TokenKind::RazorCommentOpen {
                        let comment = self.parse_razor_comment();
                        children.push(comment.into());
                        continue;
                    }
                    if unexpected.is_none() && !t.kind.is_trivia() {
                        unexpected = Some(t.span);
                    }
                    self.bump_into(&mut children);
                }
                if let Some(span) = unexpected {
                    diagnostics.push(self.error(
                        RZ_UNEXPECTED_DIRECTIVE_CONTENT,
                        format!("Unexpected content after the '{}' directive.", name),
                        span,
                    ));
                }
            }
            DirectiveKind::CodeBlock | DirectiveKind::RazorBlock => {
                let mut unexpected: Option<TextSpan> = None;
                while let Some(t) = self.peek() {
                    if t.depth != depth || t.kind == TokenKind::LeftBrace {
                        break;
                    }
                    if t.kind == TokenKind::RazorCommentOpen {
                        let comment = self.parse_razor_comment();
                        children.push(comment.into());
                        continue;
                    }
                    if unexpected.is_none() && !t.kind.is_trivia() {
                        unexpected = Some(t.span);
                    }
                    self.bump_into(&mut children);
                }
                if let Some(span) = unexpected {
                    diagnostics.push(self.error(
                        RZ_UNEXPECTED_DIRECTIVE_CONTENT,
                        format!("Unexpected content after the '{}' directive.", name),
                        span,
                    ));
                }
                if self.at(TokenKind::LeftBrace, depth) {
                    let body = self.parse_directive_body(depth, kind);
                    children.push(body.into());
                } else {
                    diagnostics.push(self.error(
                        RZ_DIRECTIVE_EXPECTS_BLOCK,
                        format!(
                            "The '{}' directive expects a block surrounded by '{{' and '}}'.",
                            name
                        ),
                        TextSpan::empty(self.offset()),
                    ));
                }
            }
        }

        let singly = descriptor
            .as_ref()
            .map_or(false, |d| d.usage == DirectiveUsage::FileScopedSinglyOccurring);
        if singly && !self.singly_occurring.insert(name.clone()) {
            diagnostics.push(self.error(
                RZ_DUPLICATE_DIRECTIVE,
                format!(
                    "The '{}' directive may only occur once per document.",
                    name
                ),
                keyword_span,
            ));
        }

        let node = SyntaxNode::new(SyntaxKind::RazorDirective, children);
        if name == SECTION {
            if let Some(section) = node.directive_tokens().first().map(|t| t.text()) {
                if !self.sections.insert(section.clone()) {
                    diagnostics.push(self.error(
                        RZ_SECTION_REDEFINED,
                        format!("Section '{}' is already defined.", section),
                        keyword_span,
                    ));
                }
            }
        }
        node.with_diagnostics(diagnostics)
    }

    fn parse_directive_token(
        &mut self,
        depth: usize,
        kind: DirectiveTokenKind,
        directive: DirectiveKind,
    ) -> SyntaxNode {
        let mut parts = Vec::new();
        let same = |t: &Token| t.depth == depth;
        match kind {
            DirectiveTokenKind::Text => {
                while let Some(t) = self.peek() {
                    let stop = !same(t)
                        || t.kind == TokenKind::NewLine
                        || (directive != DirectiveKind::SingleLine
                            && t.kind == TokenKind::LeftBrace);
                    if stop {
                        break;
                    }
                    self.bump_into(&mut parts);
                }
                // Trailing whitespace is not part of the value.
                while parts
                    .last()
                    .and_then(SyntaxElement::as_token)
                    .map_or(false, |t| t.kind == TokenKind::Whitespace)
                {
                    if let Some(SyntaxElement::Token(t)) = parts.pop() {
                        self.tokens.push_front(t);
                    }
                }
            }
            DirectiveTokenKind::Namespace => {
                while self.peek().map_or(false, |t| {
                    same(t)
                        && matches!(
                            t.kind,
                            TokenKind::Identifier | TokenKind::Keyword | TokenKind::Dot
                        )
                }) {
                    self.bump_into(&mut parts);
                }
            }
            DirectiveTokenKind::Type => {
                let mut nesting = 0i32;
                while let Some(t) = self.peek() {
                    if !same(t) {
                        break;
                    }
                    let stop = match t.kind {
                        TokenKind::Whitespace => nesting <= 0,
                        TokenKind::NewLine | TokenKind::LeftBrace | TokenKind::Semicolon => true,
                        _ => false,
                    };
                    if stop {
                        break;
                    }
                    match (t.kind, t.text.as_str()) {
                        (TokenKind::Punctuation, "<")
                        | (TokenKind::LeftParen, _)
                        | (TokenKind::LeftBracket, _) => nesting += 1,
                        (TokenKind::Punctuation, ">")
                        | (TokenKind::RightParen, _)
                        | (TokenKind::RightBracket, _) => nesting -= 1,
                        _ => {}
                    }
                    self.bump_into(&mut parts);
                }
            }
            DirectiveTokenKind::Attribute if self.at(TokenKind::LeftBracket, depth) => {
                let mut nesting = 0i32;
                while let Some(t) = self.peek() {
                    if !same(t) || t.kind == TokenKind::NewLine {
                        break;
                    }
                    let kind = t.kind;
                    self.bump_into(&mut parts);
                    match kind {
                        TokenKind::LeftBracket => nesting += 1,
                        TokenKind::RightBracket => {
                            nesting -= 1;
                            if nesting == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        if parts.is_empty() {
            self.bump_into(&mut parts);
        }
        SyntaxNode::new(SyntaxKind::DirectiveToken, parts)
    }

    fn parse_directive_body(&mut self, depth: usize, kind: DirectiveKind) -> SyntaxNode {
        let mut children = Vec::new();
        self.bump_into(&mut children);
        match kind {
            DirectiveKind::RazorBlock => {
                let start = self.offset();
                let content = self.parse_markup_sequence(depth + 1, &mut Vec::new(), false);
                if !content.is_empty() {
                    children.push(
                        SyntaxNode::with_start(SyntaxKind::MarkupBlock, start, content).into(),
                    );
                }
                if self.at(TokenKind::RightBrace, depth) {
                    self.bump_into(&mut children);
                    return SyntaxNode::new(SyntaxKind::RazorDirectiveBody, children);
                }
            }
            _ => {
                children.extend(self.parse_code_body(depth));
                let (_, open) = balance(&children, TokenKind::LeftBrace, TokenKind::RightBrace);
                if open == 0 {
                    let literals = self.literal_diagnostics(&children);
                    return SyntaxNode::new(SyntaxKind::RazorDirectiveBody, children)
                        .with_diagnostics(literals);
                }
            }
        }
        let node = SyntaxNode::new(SyntaxKind::RazorDirectiveBody, children);
        let diagnostic = self.error(
            RZ_UNTERMINATED_CODE_BLOCK,
            "The directive block is missing a closing \"}\" character.",
            node.span(),
        );
        node.with_diagnostic(diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_text(text: &str) -> RazorSyntaxTree {
        parse_with_defaults(&SourceDocument::from_text(text))
    }

    #[test]
    fn test_describe_token_kind() {
        assert_eq!(describe_token_kind(DirectiveTokenKind::Type), "type name");
    }

    #[test]
    fn test_empty_document() {
        let tree = parse_text("");
        assert_eq!(tree.root().kind(), SyntaxKind::Document);
        assert!(tree.root().children().is_empty());
        assert!(tree.diagnostics().is_empty());
    }
}
