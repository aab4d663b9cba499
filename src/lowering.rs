//! Lowering Module
//!
//! Single depth-first walk from the bound syntax tree to the intermediate
//! tree. Markup becomes HTML content, code becomes expression/code nodes, and
//! bound elements become the tag helper family (create, property, execute).
//! The class/namespace/method skeleton is left to the document classifier.

use std::collections::HashSet;

use crate::config::RazorCodeGenerationOptions;
use crate::directives::{DirectiveRegistry, DirectiveTokenKind, DirectiveUsage, USING};
use crate::error::IrError;
use crate::ir::{IntermediateNode, NodeBuilder, NodeKind};
use crate::lexer::{is_identifier_part, is_identifier_start, TokenKind};
use crate::source::{SourceDocument, TextSpan};
use crate::syntax::{RazorSyntaxTree, SyntaxElement, SyntaxKind, SyntaxNode};
use crate::tag_helpers::{AttributeStructure, TagMode};

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS NAMES
// ═══════════════════════════════════════════════════════════════════════════════

pub const FALLBACK_CLASS_PREFIX: &str = "AspNetCore_";

/// Replaces every character that cannot appear in an identifier with `_`.
pub fn sanitize_identifier(text: &str) -> String {
    text.chars()
        .map(|c| if is_identifier_part(c) { c } else { '_' })
        .collect()
}

/// Class name for a document: its relative path without the `.cshtml`
/// extension, sanitized. Paths that cannot yield a valid identifier fall back
/// to a checksum-derived name.
pub fn class_name_for(relative_path: Option<&str>, checksum_hex: &str) -> String {
    let sanitized = relative_path
        .map(|path| sanitize_identifier(path.strip_suffix(".cshtml").unwrap_or(path)))
        .unwrap_or_default();
    match sanitized.chars().next() {
        Some(c) if is_identifier_start(c) => sanitized,
        _ => format!("{}{}", FALLBACK_CLASS_PREFIX, checksum_hex),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOWERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Lowers `tree` to a flat document node. Directives from `imports` that the
/// document does not override come first.
pub fn lower(
    tree: &RazorSyntaxTree,
    imports: &[RazorSyntaxTree],
    options: &RazorCodeGenerationOptions,
) -> Result<IntermediateNode, IrError> {
    let registry = &tree.options().directives;
    let mut lowerer = Lowerer {
        source: tree.source(),
        registry,
        builder: NodeBuilder::with_root(IntermediateNode::new(NodeKind::Document {
            document_kind: None,
        })),
        html: None,
        usings: HashSet::new(),
        design_time: options.design_time,
        mapped: true,
    };

    let own: HashSet<String> = tree
        .directives()
        .iter()
        .filter_map(|d| d.directive_name().map(str::to_string))
        .collect();
    for (import, directive) in imported_directives(imports, registry, &own) {
        // A path-less import has no file to map back to.
        lowerer.source = import.source();
        lowerer.mapped = import.source().file_path().is_some();
        lowerer.lower_directive(&directive)?;
    }
    lowerer.source = tree.source();
    lowerer.mapped = true;

    lowerer.lower_node(tree.root())?;
    lowerer.flush_html()?;
    let document = lowerer.builder.build()?;
    log::trace!(
        "lowered {} into {} nodes",
        tree.source().file_path().unwrap_or("<anonymous>"),
        document.node_count()
    );
    Ok(document)
}

/// File-scoped directives of the imports, nearest import last. A singly
/// occurring directive keeps only its last import occurrence and is dropped
/// when the document declares it.
fn imported_directives<'t>(
    imports: &'t [RazorSyntaxTree],
    registry: &DirectiveRegistry,
    own: &HashSet<String>,
) -> Vec<(&'t RazorSyntaxTree, SyntaxNode)> {
    let mut found: Vec<(&RazorSyntaxTree, SyntaxNode, String)> = Vec::new();
    for import in imports {
        for directive in import.directives() {
            let Some(name) = directive.directive_name().map(str::to_string) else {
                continue;
            };
            if name == USING {
                found.push((import, directive, name));
                continue;
            }
            let Some(descriptor) = registry.get(&name) else {
                continue;
            };
            match descriptor.usage {
                DirectiveUsage::Unrestricted => {}
                DirectiveUsage::FileScopedMultipleOccurring => found.push((import, directive, name)),
                DirectiveUsage::FileScopedSinglyOccurring => {
                    if own.contains(&name) {
                        continue;
                    }
                    found.retain(|(_, _, existing)| *existing != name);
                    found.push((import, directive, name));
                }
            }
        }
    }
    found.into_iter().map(|(tree, node, _)| (tree, node)).collect()
}

struct Lowerer<'a> {
    source: &'a SourceDocument,
    registry: &'a DirectiveRegistry,
    builder: NodeBuilder,
    html: Option<(String, TextSpan)>,
    usings: HashSet<String>,
    design_time: bool,
    mapped: bool,
}

fn is_code_node(kind: SyntaxKind) -> bool {
    matches!(
        kind,
        SyntaxKind::CSharpImplicitExpression
            | SyntaxKind::CSharpExplicitExpression
            | SyntaxKind::CSharpCodeBlock
            | SyntaxKind::CSharpStatement
    )
}

fn has_code(node: &SyntaxNode) -> bool {
    node.descendants().iter().any(|n| is_code_node(n.kind()))
}

impl<'a> Lowerer<'a> {
    // ───────────────────────────────────────────────────────────────────────────
    // Builder plumbing
    // ───────────────────────────────────────────────────────────────────────────

    fn span(&self, span: TextSpan) -> Option<crate::source::SourceSpan> {
        self.mapped.then(|| self.source.source_span(span))
    }

    fn append_html(&mut self, text: &str, span: TextSpan) -> Result<(), IrError> {
        if let Some((pending, pending_span)) = &mut self.html {
            if pending_span.end == span.start {
                pending.push_str(text);
                pending_span.end = span.end;
                return Ok(());
            }
        }
        self.flush_html()?;
        self.html = Some((text.to_string(), span));
        Ok(())
    }

    fn flush_html(&mut self) -> Result<(), IrError> {
        let Some((text, span)) = self.html.take() else {
            return Ok(());
        };
        let source = self.span(span);
        self.builder.add(
            IntermediateNode::new(NodeKind::HtmlContent)
                .with_source(source.clone())
                .with_children(vec![IntermediateNode::html(text, source)]),
        )
    }

    fn push(&mut self, node: IntermediateNode) -> Result<(), IrError> {
        self.flush_html()?;
        self.builder.push(node);
        Ok(())
    }

    fn pop(&mut self) -> Result<(), IrError> {
        self.flush_html()?;
        self.builder.pop()?;
        Ok(())
    }

    fn add(&mut self, node: IntermediateNode) -> Result<(), IrError> {
        self.flush_html()?;
        self.builder.add(node)
    }

    fn add_code(&mut self, kind: NodeKind, text: String, span: TextSpan) -> Result<(), IrError> {
        let source = self.span(span);
        self.add(
            IntermediateNode::new(kind)
                .with_source(source.clone())
                .with_children(vec![IntermediateNode::csharp(text, source)]),
        )
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Markup
    // ───────────────────────────────────────────────────────────────────────────

    fn lower_element(&mut self, element: &SyntaxElement) -> Result<(), IrError> {
        match element {
            SyntaxElement::Token(token) => match token.kind {
                TokenKind::EscapedTransition => self.append_html("@", token.span),
                _ => self.append_html(&token.text, token.span),
            },
            SyntaxElement::Node(node) => self.lower_node(node),
        }
    }

    fn lower_children(&mut self, node: &SyntaxNode) -> Result<(), IrError> {
        for child in node.children() {
            self.lower_element(child)?;
        }
        Ok(())
    }

    fn lower_node(&mut self, node: &SyntaxNode) -> Result<(), IrError> {
        match node.kind() {
            SyntaxKind::RazorComment => Ok(()),
            SyntaxKind::MarkupTransitionElement => {
                for child in node.children() {
                    let is_tag = child.as_node().map_or(false, |n| {
                        matches!(n.kind(), SyntaxKind::MarkupStartTag | SyntaxKind::MarkupEndTag)
                    });
                    if !is_tag {
                        self.lower_element(child)?;
                    }
                }
                Ok(())
            }
            SyntaxKind::MarkupLine => {
                for child in node.children().iter().skip_while(|c| {
                    c.as_token().map_or(false, |t| {
                        matches!(t.kind, TokenKind::Transition | TokenKind::Colon)
                    })
                }) {
                    self.lower_element(child)?;
                }
                Ok(())
            }
            SyntaxKind::MarkupStartTag => self.lower_start_tag(node),
            SyntaxKind::MarkupTagHelperElement => self.lower_tag_helper(node),
            SyntaxKind::CSharpImplicitExpression | SyntaxKind::CSharpExplicitExpression => {
                self.lower_expression(node)
            }
            SyntaxKind::CSharpCodeBlock => self.lower_code(node, true),
            SyntaxKind::CSharpStatement => self.lower_code(node, false),
            SyntaxKind::RazorDirective => self.lower_directive(node),
            _ => self.lower_children(node),
        }
    }

    /// Literal attributes stay HTML; attributes with code become attribute nodes.
    fn lower_start_tag(&mut self, tag: &SyntaxNode) -> Result<(), IrError> {
        for child in tag.children() {
            let dynamic = child.as_node().filter(|n| {
                n.kind() == SyntaxKind::MarkupAttributeBlock && has_code(n)
            });
            match dynamic {
                Some(attribute) => self.lower_html_attribute(attribute)?,
                None => self.lower_element(child)?,
            }
        }
        Ok(())
    }

    fn lower_html_attribute(&mut self, attribute: &SyntaxNode) -> Result<(), IrError> {
        let Some(value) = attribute.attribute_value() else {
            return self.lower_children(attribute);
        };
        let open_quote = value
            .first_token()
            .filter(|t| matches!(t.kind, TokenKind::DoubleQuote | TokenKind::SingleQuote))
            .map(|t| t.text.clone())
            .unwrap_or_default();
        let prefix_end = value.span().start + open_quote.len();
        let prefix = self
            .source
            .slice(TextSpan::new(attribute.span().start, prefix_end))
            .to_string();
        let parts = value.children();
        let suffix = match parts.last().and_then(SyntaxElement::as_token) {
            Some(t)
                if parts.len() > 1
                    && matches!(t.kind, TokenKind::DoubleQuote | TokenKind::SingleQuote) =>
            {
                t.text.clone()
            }
            _ => String::new(),
        };

        self.push(
            IntermediateNode::new(NodeKind::HtmlAttribute {
                attribute_name: attribute.attribute_name().unwrap_or_default().to_string(),
                prefix,
                suffix,
            })
            .with_source(self.span(attribute.span())),
        )?;
        for part in value.child_nodes() {
            if part.kind() == SyntaxKind::MarkupTextLiteral {
                let source = self.span(part.span());
                self.add(
                    IntermediateNode::new(NodeKind::HtmlAttributeValue {
                        prefix: String::new(),
                    })
                    .with_source(source.clone())
                    .with_children(vec![IntermediateNode::html(part.text(), source)]),
                )?;
            } else if let Some((code, span)) = expression_code(part) {
                let kind = if part.kind() == SyntaxKind::CSharpCodeBlock
                    || part.kind() == SyntaxKind::CSharpStatement
                {
                    NodeKind::CSharpCodeAttributeValue {
                        prefix: String::new(),
                    }
                } else {
                    NodeKind::CSharpExpressionAttributeValue {
                        prefix: String::new(),
                    }
                };
                self.add_code(kind, code, span)?;
            }
        }
        self.pop()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Code
    // ───────────────────────────────────────────────────────────────────────────

    fn lower_expression(&mut self, node: &SyntaxNode) -> Result<(), IrError> {
        match expression_code(node) {
            Some((code, span)) => self.add_code(NodeKind::CSharpExpression, code, span),
            // A lone `@`: literal at runtime, an empty mapped expression at design time.
            None if self.design_time => {
                let at = node.span().end;
                self.add_code(NodeKind::CSharpExpression, String::new(), TextSpan::empty(at))
            }
            None => self.lower_children(node),
        }
    }

    /// Code runs become `CSharpCode`; islands inside are lowered as markup.
    fn lower_code(&mut self, node: &SyntaxNode, braced: bool) -> Result<(), IrError> {
        let children = node.children();
        let mut start = children
            .iter()
            .position(|c| c.as_token().map_or(true, |t| t.kind != TokenKind::Transition))
            .unwrap_or(children.len());
        let mut end = children.len();
        if braced {
            if children
                .get(start)
                .and_then(SyntaxElement::as_token)
                .map_or(false, |t| t.kind == TokenKind::LeftBrace)
            {
                start += 1;
            }
            if end > start
                && children[end - 1]
                    .as_token()
                    .map_or(false, |t| t.kind == TokenKind::RightBrace)
            {
                end -= 1;
            }
        }
        self.lower_code_run(&children[start..end])
    }

    fn lower_code_run(&mut self, children: &[SyntaxElement]) -> Result<(), IrError> {
        let mut code: Option<(String, TextSpan)> = None;
        for child in children {
            match child {
                SyntaxElement::Token(token) => match &mut code {
                    Some((text, span)) => {
                        text.push_str(&token.text);
                        span.end = token.span.end;
                    }
                    None => code = Some((token.text.clone(), token.span)),
                },
                SyntaxElement::Node(node) => {
                    if let Some((text, span)) = code.take() {
                        self.add_code(NodeKind::CSharpCode, text, span)?;
                    }
                    self.lower_node(node)?;
                }
            }
        }
        if let Some((text, span)) = code {
            self.add_code(NodeKind::CSharpCode, text, span)?;
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Directives
    // ───────────────────────────────────────────────────────────────────────────

    fn lower_directive(&mut self, directive: &SyntaxNode) -> Result<(), IrError> {
        let Some(name) = directive.directive_name().map(str::to_string) else {
            return self.lower_children(directive);
        };
        let tokens = directive.directive_tokens();

        if name == USING {
            if let Some(token) = tokens.first() {
                let content = token.text().trim().trim_end_matches(';').trim().to_string();
                if self.usings.insert(content.clone()) {
                    self.add(
                        IntermediateNode::new(NodeKind::Using { content })
                            .with_source(self.span(token.span())),
                    )?;
                }
            }
            return Ok(());
        }

        let malformed = !directive.all_diagnostics().is_empty();
        let kind = if malformed {
            NodeKind::MalformedDirective { name: name.clone() }
        } else {
            NodeKind::Directive { name: name.clone() }
        };
        self.push(IntermediateNode::new(kind).with_source(self.span(directive.span())))?;

        let expected: Vec<DirectiveTokenKind> = self
            .registry
            .get(&name)
            .map(|d| d.tokens.iter().map(|t| t.kind).collect())
            .unwrap_or_default();
        for (index, token) in tokens.iter().enumerate() {
            let token_kind = expected.get(index).copied().unwrap_or(DirectiveTokenKind::Text);
            self.add(
                IntermediateNode::new(NodeKind::DirectiveToken {
                    token_kind,
                    content: token.text(),
                })
                .with_source(self.span(token.span())),
            )?;
        }

        if let Some(body) = directive.directive_body() {
            let children = body.children();
            let mut start = 0;
            let mut end = children.len();
            if children
                .first()
                .and_then(SyntaxElement::as_token)
                .map_or(false, |t| t.kind == TokenKind::LeftBrace)
            {
                start = 1;
            }
            if end > start
                && children[end - 1]
                    .as_token()
                    .map_or(false, |t| t.kind == TokenKind::RightBrace)
            {
                end -= 1;
            }
            self.lower_code_run(&children[start..end])?;
        }
        self.pop()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Tag helpers
    // ───────────────────────────────────────────────────────────────────────────

    fn lower_tag_helper(&mut self, element: &SyntaxNode) -> Result<(), IrError> {
        let Some(binding) = element.tag_helper_binding().cloned() else {
            return self.lower_children(element);
        };
        self.push(
            IntermediateNode::new(NodeKind::TagHelper {
                tag_name: binding.tag_name.clone(),
                tag_mode: binding.tag_mode,
            })
            .with_source(self.span(element.span())),
        )?;

        if binding.tag_mode == TagMode::StartTagAndEndTag {
            self.push(IntermediateNode::new(NodeKind::TagHelperBody))?;
            for child in element.children() {
                let is_tag = child.as_node().map_or(false, |n| {
                    matches!(n.kind(), SyntaxKind::MarkupStartTag | SyntaxKind::MarkupEndTag)
                });
                if !is_tag {
                    self.lower_element(child)?;
                }
            }
            self.pop()?;
        }

        for descriptor in &binding.descriptors {
            self.add(IntermediateNode::new(NodeKind::TagHelperCreate {
                type_name: descriptor.type_name().to_string(),
                field_name: String::new(),
            }))?;
        }

        let attribute_nodes = element.attributes();
        for (attribute, node) in binding.attributes.iter().zip(attribute_nodes) {
            let value = node.attribute_value();
            if !attribute.is_bound() {
                self.push(
                    IntermediateNode::new(NodeKind::TagHelperHtmlAttribute {
                        attribute_name: attribute.name.clone(),
                        structure: attribute.structure,
                    })
                    .with_source(self.span(node.span())),
                )?;
                self.lower_attribute_value(value, false)?;
                self.pop()?;
                continue;
            }
            for m in &attribute.matches {
                let bound = m.attribute();
                let value_type = if m.is_indexer {
                    bound.indexer_type_name.clone().unwrap_or_default()
                } else {
                    bound.type_name.clone()
                };
                let indexer_key = if m.is_indexer {
                    let prefix_len = bound.indexer_name_prefix.as_deref().map_or(0, str::len);
                    Some(attribute.name.get(prefix_len..).unwrap_or_default().to_string())
                } else {
                    None
                };
                let is_string = if m.is_indexer {
                    bound.is_indexer_string_property()
                } else {
                    bound.is_string_property()
                };
                self.push(
                    IntermediateNode::new(NodeKind::TagHelperProperty {
                        attribute_name: attribute.name.clone(),
                        property_name: bound.property_name.clone(),
                        property_type: bound.type_name.clone(),
                        value_type,
                        tag_helper_type: m.descriptor.type_name().to_string(),
                        field_name: String::new(),
                        structure: attribute.structure,
                        indexer_key,
                        is_enum: bound.is_enum,
                    })
                    .with_source(self.span(node.span())),
                )?;
                if attribute.structure != AttributeStructure::Minimized {
                    self.lower_attribute_value(value, !is_string)?;
                }
                self.pop()?;
            }
        }

        self.add(IntermediateNode::new(NodeKind::TagHelperExecute))?;
        self.pop()
    }

    /// String-like values keep HTML and expression parts; other values are
    /// one C# expression.
    fn lower_attribute_value(&mut self, value: Option<&SyntaxNode>, as_code: bool) -> Result<(), IrError> {
        let Some(value) = value else {
            return Ok(());
        };
        let parts: Vec<&SyntaxNode> = value.child_nodes().collect();
        if as_code {
            let mut text = String::new();
            let mut span: Option<TextSpan> = None;
            for part in &parts {
                let piece = if part.kind() == SyntaxKind::MarkupTextLiteral {
                    Some((part.text(), part.span()))
                } else {
                    expression_code(part)
                };
                if let Some((piece, piece_span)) = piece {
                    text.push_str(&piece);
                    span = Some(span.map_or(piece_span, |s| s.cover(piece_span)));
                }
            }
            if let Some(span) = span {
                self.add_code(NodeKind::CSharpExpression, text, span)?;
            }
            return Ok(());
        }
        for part in parts {
            if part.kind() == SyntaxKind::MarkupTextLiteral {
                self.append_html(&part.text(), part.span())?;
            } else if let Some((code, span)) = expression_code(part) {
                self.add_code(NodeKind::CSharpExpression, code, span)?;
            }
        }
        self.flush_html()
    }
}

/// Code text of an expression node without the transition or the explicit
/// parentheses, with its span. `None` when there is no code.
fn expression_code(node: &SyntaxNode) -> Option<(String, TextSpan)> {
    let tokens: Vec<&crate::lexer::Token> = node
        .children()
        .iter()
        .filter_map(SyntaxElement::as_token)
        .filter(|t| t.kind != TokenKind::Transition)
        .collect();
    let mut slice: &[&crate::lexer::Token] = &tokens;
    if node.kind() == SyntaxKind::CSharpExplicitExpression {
        if slice.first().map_or(false, |t| t.kind == TokenKind::LeftParen) {
            slice = &slice[1..];
        }
        if slice.last().map_or(false, |t| t.kind == TokenKind::RightParen) {
            slice = &slice[..slice.len() - 1];
        }
    }
    let first = slice.first()?;
    let last = slice.last()?;
    let text: String = slice.iter().map(|t| t.text.as_str()).collect();
    Some((text, TextSpan::new(first.span.start, last.span.end)))
}
