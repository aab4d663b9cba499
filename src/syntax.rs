//! Immutable, lossless syntax tree.
//!
//! Nodes are reference counted and never mutated. A rewrite produces a new
//! node that reuses every unchanged child by pointer. A node's span is the
//! union of its children's spans, and siblings are contiguous.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::ParserOptions;
use crate::diagnostics::{sort_diagnostics, RazorDiagnostic};
use crate::lexer::{Token, TokenKind};
use crate::source::{SourceDocument, TextSpan};
use crate::tag_helpers::TagHelperBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyntaxKind {
    Document,
    /// Markup nested in code: an island or a markup directive body.
    MarkupBlock,
    /// `@:` followed by markup up to the end of the line.
    MarkupLine,
    MarkupTextLiteral,
    MarkupElement,
    /// `<text>` inside code; its tags are transitions, not output.
    MarkupTransitionElement,
    MarkupTagHelperElement,
    MarkupStartTag,
    MarkupEndTag,
    MarkupAttributeBlock,
    MarkupMinimizedAttributeBlock,
    MarkupAttributeValue,
    MarkupCommentBlock,
    RazorComment,
    CSharpImplicitExpression,
    CSharpExplicitExpression,
    CSharpCodeBlock,
    CSharpStatement,
    RazorDirective,
    RazorDirectiveBody,
    DirectiveToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxElement {
    Node(SyntaxNode),
    Token(Token),
}

impl SyntaxElement {
    pub fn span(&self) -> TextSpan {
        match self {
            SyntaxElement::Node(n) => n.span(),
            SyntaxElement::Token(t) => t.span,
        }
    }

    pub fn as_node(&self) -> Option<&SyntaxNode> {
        match self {
            SyntaxElement::Node(n) => Some(n),
            SyntaxElement::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            SyntaxElement::Token(t) => Some(t),
            SyntaxElement::Node(_) => None,
        }
    }

    fn write_text(&self, out: &mut String) {
        match self {
            SyntaxElement::Node(n) => n.write_text(out),
            SyntaxElement::Token(t) => out.push_str(&t.text),
        }
    }
}

impl From<Token> for SyntaxElement {
    fn from(token: Token) -> Self {
        SyntaxElement::Token(token)
    }
}

impl From<SyntaxNode> for SyntaxElement {
    fn from(node: SyntaxNode) -> Self {
        SyntaxElement::Node(node)
    }
}

#[derive(Debug, PartialEq)]
struct NodeData {
    kind: SyntaxKind,
    span: TextSpan,
    children: Vec<SyntaxElement>,
    diagnostics: Vec<RazorDiagnostic>,
    binding: Option<Arc<TagHelperBinding>>,
}

#[derive(Debug, Clone)]
pub struct SyntaxNode(Arc<NodeData>);

impl PartialEq for SyntaxNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl SyntaxNode {
    /// Builds a node over non-empty, contiguous children.
    pub fn new(kind: SyntaxKind, children: Vec<SyntaxElement>) -> Self {
        let start = children.first().map_or(0, |c| c.span().start);
        Self::with_start(kind, start, children)
    }

    /// Builds a node that may have no children, anchored at `start`.
    pub fn with_start(kind: SyntaxKind, start: usize, children: Vec<SyntaxElement>) -> Self {
        let end = children.last().map_or(start, |c| c.span().end);
        debug_assert!(
            children
                .windows(2)
                .all(|w| w[0].span().end == w[1].span().start),
            "children of {:?} are not contiguous",
            kind
        );
        Self(Arc::new(NodeData {
            kind,
            span: TextSpan::new(start, end),
            children,
            diagnostics: Vec::new(),
            binding: None,
        }))
    }

    pub fn kind(&self) -> SyntaxKind {
        self.0.kind
    }

    pub fn span(&self) -> TextSpan {
        self.0.span
    }

    pub fn children(&self) -> &[SyntaxElement] {
        &self.0.children
    }

    pub fn diagnostics(&self) -> &[RazorDiagnostic] {
        &self.0.diagnostics
    }

    pub fn tag_helper_binding(&self) -> Option<&Arc<TagHelperBinding>> {
        self.0.binding.as_ref()
    }

    pub fn ptr_eq(&self, other: &SyntaxNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn rebuild(
        &self,
        kind: SyntaxKind,
        children: Vec<SyntaxElement>,
        diagnostics: Vec<RazorDiagnostic>,
        binding: Option<Arc<TagHelperBinding>>,
    ) -> Self {
        Self(Arc::new(NodeData {
            kind,
            span: self.0.span,
            children,
            diagnostics,
            binding,
        }))
    }

    pub fn with_diagnostic(&self, diagnostic: RazorDiagnostic) -> Self {
        let mut diagnostics = self.0.diagnostics.clone();
        diagnostics.push(diagnostic);
        self.rebuild(
            self.0.kind,
            self.0.children.clone(),
            diagnostics,
            self.0.binding.clone(),
        )
    }

    pub fn with_diagnostics(&self, extra: Vec<RazorDiagnostic>) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        let mut diagnostics = self.0.diagnostics.clone();
        diagnostics.extend(extra);
        self.rebuild(
            self.0.kind,
            self.0.children.clone(),
            diagnostics,
            self.0.binding.clone(),
        )
    }

    /// Same text, new children. Unchanged children keep their identity.
    pub fn with_children(&self, children: Vec<SyntaxElement>) -> Self {
        debug_assert_eq!(
            children.first().map(|c| c.span().start),
            self.0.children.first().map(|c| c.span().start)
        );
        self.rebuild(
            self.0.kind,
            children,
            self.0.diagnostics.clone(),
            self.0.binding.clone(),
        )
    }

    pub fn with_binding(&self, kind: SyntaxKind, binding: Arc<TagHelperBinding>) -> Self {
        self.rebuild(
            kind,
            self.0.children.clone(),
            self.0.diagnostics.clone(),
            Some(binding),
        )
    }

    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.0.span.len());
        self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) {
        for child in &self.0.children {
            child.write_text(out);
        }
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.0.children.iter().filter_map(SyntaxElement::as_node)
    }

    pub fn child_tokens(&self) -> impl Iterator<Item = &Token> {
        self.0.children.iter().filter_map(SyntaxElement::as_token)
    }

    pub fn first_token(&self) -> Option<&Token> {
        for child in &self.0.children {
            match child {
                SyntaxElement::Token(t) => return Some(t),
                SyntaxElement::Node(n) => {
                    if let Some(t) = n.first_token() {
                        return Some(t);
                    }
                }
            }
        }
        None
    }

    /// Preorder walk over this node and every descendant node.
    pub fn descendants(&self) -> Vec<SyntaxNode> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            for child in node.children().iter().rev() {
                if let SyntaxElement::Node(n) = child {
                    stack.push(n.clone());
                }
            }
            out.push(node);
        }
        out
    }

    /// All tokens under this node, in text order.
    pub fn tokens(&self) -> Vec<&Token> {
        let mut out = Vec::new();
        self.collect_tokens(&mut out);
        out
    }

    fn collect_tokens<'a>(&'a self, out: &mut Vec<&'a Token>) {
        for child in &self.0.children {
            match child {
                SyntaxElement::Token(t) => out.push(t),
                SyntaxElement::Node(n) => n.collect_tokens(out),
            }
        }
    }

    pub fn all_diagnostics(&self) -> Vec<RazorDiagnostic> {
        let mut out = Vec::new();
        for node in self.descendants() {
            out.extend(node.diagnostics().iter().cloned());
        }
        out
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Markup element helpers
    // ───────────────────────────────────────────────────────────────────────────

    pub fn start_tag(&self) -> Option<&SyntaxNode> {
        self.child_nodes()
            .find(|n| n.kind() == SyntaxKind::MarkupStartTag)
    }

    pub fn end_tag(&self) -> Option<&SyntaxNode> {
        self.child_nodes().find(|n| n.kind() == SyntaxKind::MarkupEndTag)
    }

    /// Tag name as written, without `<`, `/` or `!`.
    pub fn tag_name(&self) -> Option<&str> {
        let tag = match self.kind() {
            SyntaxKind::MarkupStartTag | SyntaxKind::MarkupEndTag => self,
            _ => self.start_tag().or_else(|| self.end_tag())?,
        };
        tag.child_tokens()
            .find(|t| t.kind == TokenKind::Text)
            .map(|t| t.text.as_str())
    }

    /// `<!p>` opts an element out of tag helper binding.
    pub fn is_opt_out(&self) -> bool {
        let tag = match self.kind() {
            SyntaxKind::MarkupStartTag => self,
            _ => match self.start_tag() {
                Some(t) => t,
                None => return false,
            },
        };
        let mut tokens = tag.child_tokens();
        tokens.next().map(|t| t.kind) == Some(TokenKind::OpenAngle)
            && tokens.next().map(|t| t.kind) == Some(TokenKind::Bang)
    }

    pub fn is_self_closing(&self) -> bool {
        let tag = match self.kind() {
            SyntaxKind::MarkupStartTag => self,
            _ => match self.start_tag() {
                Some(t) => t,
                None => return false,
            },
        };
        let tokens: Vec<&Token> = tag.child_tokens().collect();
        tokens.len() >= 2
            && tokens[tokens.len() - 1].kind == TokenKind::CloseAngle
            && tokens[tokens.len() - 2].kind == TokenKind::ForwardSlash
    }

    /// Attribute nodes of a start tag, in source order.
    pub fn attributes(&self) -> Vec<&SyntaxNode> {
        let tag = match self.kind() {
            SyntaxKind::MarkupStartTag => Some(self),
            _ => self.start_tag(),
        };
        tag.map(|t| {
            t.child_nodes()
                .filter(|n| {
                    matches!(
                        n.kind(),
                        SyntaxKind::MarkupAttributeBlock | SyntaxKind::MarkupMinimizedAttributeBlock
                    )
                })
                .collect()
        })
        .unwrap_or_default()
    }

    /// Attribute name of an attribute block.
    pub fn attribute_name(&self) -> Option<&str> {
        self.child_tokens()
            .find(|t| t.kind == TokenKind::Text)
            .map(|t| t.text.as_str())
    }

    pub fn attribute_value(&self) -> Option<&SyntaxNode> {
        self.child_nodes()
            .find(|n| n.kind() == SyntaxKind::MarkupAttributeValue)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Directive helpers
    // ───────────────────────────────────────────────────────────────────────────

    /// Name of a `RazorDirective` node.
    pub fn directive_name(&self) -> Option<&str> {
        if self.kind() != SyntaxKind::RazorDirective {
            return None;
        }
        self.child_tokens()
            .find(|t| matches!(t.kind, TokenKind::Identifier | TokenKind::Keyword))
            .map(|t| t.text.as_str())
    }

    pub fn directive_tokens(&self) -> Vec<&SyntaxNode> {
        self.child_nodes()
            .filter(|n| n.kind() == SyntaxKind::DirectiveToken)
            .collect()
    }

    pub fn directive_body(&self) -> Option<&SyntaxNode> {
        self.child_nodes()
            .find(|n| n.kind() == SyntaxKind::RazorDirectiveBody)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNTAX TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct RazorSyntaxTree {
    root: SyntaxNode,
    source: SourceDocument,
    options: Arc<ParserOptions>,
    diagnostics: Vec<RazorDiagnostic>,
}

impl RazorSyntaxTree {
    pub fn new(root: SyntaxNode, source: SourceDocument, options: Arc<ParserOptions>) -> Self {
        let mut diagnostics = root.all_diagnostics();
        sort_diagnostics(&mut diagnostics);
        Self {
            root,
            source,
            options,
            diagnostics,
        }
    }

    pub fn root(&self) -> &SyntaxNode {
        &self.root
    }

    pub fn source(&self) -> &SourceDocument {
        &self.source
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn shared_options(&self) -> Arc<ParserOptions> {
        self.options.clone()
    }

    /// Every diagnostic in the tree, ordered by position.
    pub fn diagnostics(&self) -> &[RazorDiagnostic] {
        &self.diagnostics
    }

    pub fn with_root(&self, root: SyntaxNode) -> Self {
        Self::new(root, self.source.clone(), self.options.clone())
    }

    /// Directive nodes in document order.
    pub fn directives(&self) -> Vec<SyntaxNode> {
        self.root
            .descendants()
            .into_iter()
            .filter(|n| n.kind() == SyntaxKind::RazorDirective)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::LexMode;

    fn token(kind: TokenKind, start: usize, text: &str) -> Token {
        Token {
            kind,
            mode: LexMode::Markup,
            depth: 0,
            span: TextSpan::new(start, start + text.len()),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_span_is_union_of_children() {
        let inner = SyntaxNode::new(
            SyntaxKind::MarkupTextLiteral,
            vec![token(TokenKind::Text, 3, "hi").into()],
        );
        let root = SyntaxNode::new(
            SyntaxKind::Document,
            vec![token(TokenKind::Text, 0, "abc").into(), inner.into()],
        );
        assert_eq!(root.span(), TextSpan::new(0, 5));
        assert_eq!(root.text(), "abchi");
        assert_eq!(root.descendants().len(), 2);
    }

    #[test]
    fn test_rewrite_shares_unchanged_children() {
        let a = SyntaxNode::new(
            SyntaxKind::MarkupTextLiteral,
            vec![token(TokenKind::Text, 0, "a").into()],
        );
        let root = SyntaxNode::new(SyntaxKind::Document, vec![a.clone().into()]);
        let annotated = root.with_diagnostic(RazorDiagnostic::error(
            crate::diagnostics::RZ_UNTERMINATED_TAG,
            "x",
            Default::default(),
        ));
        assert!(!annotated.ptr_eq(&root));
        assert!(annotated.child_nodes().next().unwrap().ptr_eq(&a));
        assert_eq!(annotated.text(), root.text());
        assert_eq!(annotated.all_diagnostics().len(), 1);
    }
}
