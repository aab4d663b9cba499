//! Mode-aware tokenizer.
//!
//! Produces a lossless, contiguous token stream over two interleaved
//! sublanguages. The tokenizer keeps a stack of modes: markup text, the inside
//! of a tag, embedded code, and comments. `@` pushes a code mode, `<` pushes a
//! tag mode, and markup islands inside code blocks push markup again.
//!
//! Every token records how many markup and code frames enclose it. Tags and
//! comments do not add a level. A construct opened at depth `d` owns every
//! following token deeper than `d`, which is how the parser finds where an
//! implicit expression or a markup island ends without re-deriving the
//! lexer's decisions.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::{ParserOptions, RazorParserFeatureFlags};
use crate::directives::{DirectiveKind, DirectiveRegistry, USING};
use crate::source::{SourceDocument, TextSpan};

lazy_static! {
    static ref CSHARP_KEYWORDS: HashSet<&'static str> = [
        "abstract", "as", "base", "bool", "break", "byte", "case", "catch", "char", "checked",
        "class", "const", "continue", "decimal", "default", "delegate", "do", "double", "else",
        "enum", "event", "explicit", "extern", "false", "finally", "fixed", "float", "for",
        "foreach", "goto", "if", "implicit", "in", "int", "interface", "internal", "is", "lock",
        "long", "namespace", "new", "null", "object", "operator", "out", "override", "params",
        "private", "protected", "public", "readonly", "ref", "return", "sbyte", "sealed",
        "short", "sizeof", "stackalloc", "static", "string", "struct", "switch", "this",
        "throw", "true", "try", "typeof", "uint", "ulong", "unchecked", "unsafe", "ushort",
        "using", "virtual", "void", "volatile", "while", "await",
    ]
    .into_iter()
    .collect();

    /// Keywords that open a statement block after `@`.
    static ref STATEMENT_KEYWORDS: HashSet<&'static str> =
        ["if", "for", "foreach", "while", "switch", "do", "try", "lock"]
            .into_iter()
            .collect();

    static ref VOID_ELEMENTS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ]
    .into_iter()
    .collect();
}

pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.contains(name.to_ascii_lowercase().as_str())
}

pub fn is_csharp_keyword(word: &str) -> bool {
    CSHARP_KEYWORDS.contains(word)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Text,
    Whitespace,
    NewLine,
    Transition,
    EscapedTransition,
    RazorCommentOpen,
    RazorCommentBody,
    RazorCommentClose,
    // markup
    OpenAngle,
    CloseAngle,
    ForwardSlash,
    Bang,
    QuestionMark,
    Equals,
    DoubleQuote,
    SingleQuote,
    HtmlCommentOpen,
    HtmlCommentClose,
    // code
    Identifier,
    Keyword,
    NumericLiteral,
    StringLiteral,
    CharLiteral,
    CodeComment,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Dot,
    Semicolon,
    Colon,
    Punctuation,
}

impl TokenKind {
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenKind::Whitespace | TokenKind::NewLine | TokenKind::CodeComment
        )
    }
}

/// Which sublanguage produced a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LexMode {
    Markup,
    Tag,
    Code,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub mode: LexMode,
    pub depth: usize,
    pub span: TextSpan,
    pub text: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODE STACK
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkupEnd {
    /// Document level, never ends.
    Eof,
    /// Island in code: ends when its first element closes.
    Element,
    /// `@:` line: ends after the newline.
    Line,
    /// Markup directive body: ends before the closing `}`.
    Brace,
}

#[derive(Debug, Clone)]
struct MarkupFrame {
    end: MarkupEnd,
    elements: Vec<String>,
    started: bool,
    pending_colon: bool,
}

impl MarkupFrame {
    fn new(end: MarkupEnd) -> Self {
        Self {
            end,
            elements: Vec::new(),
            started: false,
            pending_colon: end == MarkupEnd::Line,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TagFrame {
    name: Option<String>,
    is_end: bool,
    declaration: bool,
    self_closing: bool,
    quote: Option<char>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImplicitState {
    ExpectIdentifier,
    AwaitSpace,
    AfterIdentifier,
    Brackets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeKind {
    Implicit(ImplicitState),
    Explicit,
    Block,
    Statement,
    DirectiveLine,
    DirectiveCode,
    DirectiveMarkup,
}

#[derive(Debug, Clone, Copy)]
struct CodeFrame {
    kind: CodeKind,
    braces: usize,
    parens: usize,
    statement_start: bool,
    opened: bool,
    do_loop: bool,
}

impl CodeFrame {
    fn new(kind: CodeKind) -> Self {
        Self {
            kind,
            braces: 0,
            parens: 0,
            statement_start: false,
            opened: false,
            do_loop: false,
        }
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Markup(MarkupFrame),
    Tag(TagFrame),
    Code(CodeFrame),
    HtmlComment,
    RazorComment,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENIZER
// ═══════════════════════════════════════════════════════════════════════════════

/// Lazy token iterator. Cloning yields a checkpoint that can be resumed later.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    text: &'a str,
    pos: usize,
    stack: Vec<Frame>,
    directives: &'a DirectiveRegistry,
    flags: RazorParserFeatureFlags,
}

pub fn tokenize<'a>(source: &'a SourceDocument, options: &'a ParserOptions) -> Tokenizer<'a> {
    Tokenizer::new(source.text(), options)
}

impl<'a> Tokenizer<'a> {
    pub fn new(text: &'a str, options: &'a ParserOptions) -> Self {
        Self {
            text,
            pos: 0,
            stack: vec![Frame::Markup(MarkupFrame::new(MarkupEnd::Eof))],
            directives: &options.directives,
            flags: options.feature_flags,
        }
    }

    /// Byte offset of the next token.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Markup and code frames nest; tags and comments sit at the depth of
    /// the frame that encloses them.
    fn depth(&self) -> usize {
        self.stack
            .iter()
            .filter(|f| matches!(f, Frame::Markup(_) | Frame::Code(_)))
            .count()
            .saturating_sub(1)
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn emit(&mut self, kind: TokenKind, mode: LexMode, len: usize) -> Token {
        let start = self.pos;
        let end = (start + len).min(self.text.len());
        self.pos = end;
        Token {
            kind,
            mode,
            depth: self.depth(),
            span: TextSpan::new(start, end),
            text: self.text[start..end].to_string(),
        }
    }

    /// Byte length of the prefix of the remaining text before `stop` holds.
    fn run_len(&self, stop: impl Fn(&Self, usize, char) -> bool) -> usize {
        for (i, c) in self.rest().char_indices() {
            if stop(self, self.pos + i, c) {
                return i;
            }
        }
        self.rest().len()
    }

    /// `@` between two word characters is literal text, as in an e-mail address.
    fn is_literal_at(&self, at: usize) -> bool {
        let prev = self.text[..at].chars().next_back();
        let next = self.text[at + 1..].chars().next();
        matches!(prev, Some(p) if p.is_alphanumeric())
            && matches!(next, Some(n) if n.is_alphanumeric())
    }

    fn is_transition_at(&self, at: usize) -> bool {
        self.text[at..].starts_with('@') && !self.is_literal_at(at)
    }

    fn is_tag_start(&self, at: usize) -> bool {
        let mut chars = self.text[at + 1..].chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => true,
            Some('/') => matches!(chars.next(), Some(c) if c.is_ascii_alphabetic()),
            Some('!') | Some('?') => true,
            _ => false,
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Markup
    // ───────────────────────────────────────────────────────────────────────────

    fn lex_markup(&mut self) -> Option<Token> {
        let (end, done, pending_colon) = match self.stack.last() {
            Some(Frame::Markup(m)) => (m.end, m.started && m.elements.is_empty(), m.pending_colon),
            _ => return None,
        };
        if pending_colon {
            if let Some(Frame::Markup(m)) = self.stack.last_mut() {
                m.pending_colon = false;
            }
            return Some(self.emit(TokenKind::Colon, LexMode::Markup, 1));
        }
        if end == MarkupEnd::Element && done {
            self.stack.pop();
            return None;
        }
        let c = self.peek()?;
        if end == MarkupEnd::Brace && c == '}' {
            self.stack.pop();
            return None;
        }

        let nl = newline_len(self.rest());
        if nl > 0 {
            let token = self.emit(TokenKind::NewLine, LexMode::Markup, nl);
            if end == MarkupEnd::Line {
                self.stack.pop();
            }
            return Some(token);
        }
        if is_inline_whitespace(c) {
            let len = inline_whitespace_len(self.rest());
            return Some(self.emit(TokenKind::Whitespace, LexMode::Markup, len));
        }
        if c == '@' && !self.is_literal_at(self.pos) {
            return Some(self.lex_transition(LexMode::Markup));
        }
        if c == '<' && self.is_tag_start(self.pos) {
            if let Some(Frame::Markup(m)) = self.stack.last_mut() {
                m.started = true;
            }
            if self.rest().starts_with("<!--") {
                self.stack.push(Frame::HtmlComment);
                return Some(self.emit(TokenKind::HtmlCommentOpen, LexMode::Comment, 4));
            }
            self.stack.push(Frame::Tag(TagFrame::default()));
            return Some(self.emit(TokenKind::OpenAngle, LexMode::Tag, 1));
        }

        let brace = end == MarkupEnd::Brace;
        let len = self.run_len(|t, at, ch| {
            ch.is_whitespace()
                || (ch == '@' && !t.is_literal_at(at))
                || (ch == '<' && t.is_tag_start(at))
                || (brace && ch == '}')
        });
        Some(self.emit(TokenKind::Text, LexMode::Markup, len.max(c.len_utf8())))
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Tags
    // ───────────────────────────────────────────────────────────────────────────

    fn tag_frame(&mut self) -> Option<&mut TagFrame> {
        match self.stack.last_mut() {
            Some(Frame::Tag(tag)) => Some(tag),
            _ => None,
        }
    }

    fn lex_tag(&mut self) -> Option<Token> {
        let (quote, has_name, is_end) = match self.stack.last() {
            Some(Frame::Tag(t)) => (t.quote, t.name.is_some(), t.is_end),
            _ => return None,
        };
        let c = self.peek()?;
        let nl = newline_len(self.rest());

        if let Some(q) = quote {
            if c == q {
                if let Some(tag) = self.tag_frame() {
                    tag.quote = None;
                }
                return Some(self.emit(quote_kind(q), LexMode::Tag, 1));
            }
            if nl > 0 {
                return Some(self.emit(TokenKind::NewLine, LexMode::Tag, nl));
            }
            if is_inline_whitespace(c) {
                let len = inline_whitespace_len(self.rest());
                return Some(self.emit(TokenKind::Whitespace, LexMode::Tag, len));
            }
            if c == '@' && !self.is_literal_at(self.pos) {
                return Some(self.lex_transition(LexMode::Tag));
            }
            let len = self.run_len(|t, at, ch| {
                ch == q || ch.is_whitespace() || (ch == '@' && !t.is_literal_at(at))
            });
            return Some(self.emit(TokenKind::Text, LexMode::Tag, len.max(c.len_utf8())));
        }

        match c {
            '>' => {
                let token = self.emit(TokenKind::CloseAngle, LexMode::Tag, 1);
                self.close_tag();
                Some(token)
            }
            '<' => {
                // A new tag starts before this one closed.
                self.close_tag();
                None
            }
            '/' if !has_name && !is_end => {
                if let Some(tag) = self.tag_frame() {
                    tag.is_end = true;
                }
                Some(self.emit(TokenKind::ForwardSlash, LexMode::Tag, 1))
            }
            '/' if self.peek_at(1) == Some('>') => {
                if let Some(tag) = self.tag_frame() {
                    tag.self_closing = true;
                }
                Some(self.emit(TokenKind::ForwardSlash, LexMode::Tag, 1))
            }
            '!' if !has_name => {
                let after = &self.rest()[1..];
                let declaration = after.starts_with('[')
                    || after
                        .get(..7)
                        .map_or(false, |s| s.eq_ignore_ascii_case("doctype"));
                if let Some(tag) = self.tag_frame() {
                    tag.declaration = declaration;
                }
                Some(self.emit(TokenKind::Bang, LexMode::Tag, 1))
            }
            '?' if !has_name => {
                if let Some(tag) = self.tag_frame() {
                    tag.declaration = true;
                }
                Some(self.emit(TokenKind::QuestionMark, LexMode::Tag, 1))
            }
            '=' => Some(self.emit(TokenKind::Equals, LexMode::Tag, 1)),
            '"' | '\'' => {
                if let Some(tag) = self.tag_frame() {
                    tag.quote = Some(c);
                }
                Some(self.emit(quote_kind(c), LexMode::Tag, 1))
            }
            '@' if !self.is_literal_at(self.pos) => Some(self.lex_transition(LexMode::Tag)),
            _ if nl > 0 => Some(self.emit(TokenKind::NewLine, LexMode::Tag, nl)),
            _ if is_inline_whitespace(c) => {
                let len = inline_whitespace_len(self.rest());
                Some(self.emit(TokenKind::Whitespace, LexMode::Tag, len))
            }
            _ => {
                let len = self.run_len(|t, at, ch| {
                    ch.is_whitespace()
                        || matches!(ch, '>' | '<' | '=' | '"' | '\'')
                        || (ch == '@' && !t.is_literal_at(at))
                        || (ch == '/' && t.text[at + 1..].starts_with('>'))
                });
                let token = self.emit(TokenKind::Text, LexMode::Tag, len.max(c.len_utf8()));
                if !has_name {
                    let name = token.text.clone();
                    if let Some(tag) = self.tag_frame() {
                        tag.name = Some(name);
                    }
                }
                Some(token)
            }
        }
    }

    /// Pops the current tag and records it on the enclosing markup frame.
    fn close_tag(&mut self) {
        let Some(Frame::Tag(tag)) = self.stack.pop() else {
            return;
        };
        let Some(Frame::Markup(markup)) = self.stack.last_mut() else {
            return;
        };
        markup.started = true;
        if tag.declaration {
            return;
        }
        let Some(name) = tag.name else {
            return;
        };
        if tag.is_end {
            if let Some(i) = markup
                .elements
                .iter()
                .rposition(|open| open.eq_ignore_ascii_case(&name))
            {
                markup.elements.truncate(i);
            }
        } else if !tag.self_closing && !is_void_element(&name) {
            markup.elements.push(name);
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Transitions
    // ───────────────────────────────────────────────────────────────────────────

    fn lex_transition(&mut self, mode: LexMode) -> Token {
        let next = self.peek_at(1);
        match next {
            Some('@') => return self.emit(TokenKind::EscapedTransition, mode, 2),
            Some('*') => {
                self.stack.push(Frame::RazorComment);
                return self.emit(TokenKind::RazorCommentOpen, LexMode::Comment, 2);
            }
            _ => {}
        }

        let top_level = self.stack.len() == 1;
        let token = self.emit(TokenKind::Transition, mode, 1);
        let kind = match transition_target(self.rest(), mode, top_level, self.directives) {
            TransitionTarget::Explicit => Some(CodeKind::Explicit),
            TransitionTarget::Block => Some(CodeKind::Block),
            TransitionTarget::Statement => Some(CodeKind::Statement),
            TransitionTarget::Implicit => {
                Some(CodeKind::Implicit(ImplicitState::ExpectIdentifier))
            }
            TransitionTarget::Directive(DirectiveKind::SingleLine) => {
                Some(CodeKind::DirectiveLine)
            }
            TransitionTarget::Directive(DirectiveKind::CodeBlock) => {
                Some(CodeKind::DirectiveCode)
            }
            TransitionTarget::Directive(DirectiveKind::RazorBlock) => {
                Some(CodeKind::DirectiveMarkup)
            }
            TransitionTarget::Invalid => None,
        };
        if let Some(kind) = kind {
            self.stack.push(Frame::Code(CodeFrame::new(kind)));
        }
        token
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Code
    // ───────────────────────────────────────────────────────────────────────────

    fn lex_code(&mut self) -> Option<Token> {
        let idx = self.stack.len() - 1;
        let frame = match self.stack.last() {
            Some(Frame::Code(f)) => *f,
            _ => return None,
        };
        match frame.kind {
            CodeKind::Implicit(state) => self.lex_implicit(idx, frame, state),
            _ => self.lex_code_body(idx, frame),
        }
    }

    fn store(&mut self, idx: usize, frame: CodeFrame) {
        self.stack[idx] = Frame::Code(frame);
    }

    fn lex_implicit(
        &mut self,
        idx: usize,
        mut frame: CodeFrame,
        state: ImplicitState,
    ) -> Option<Token> {
        let c = self.peek()?;
        match state {
            ImplicitState::ExpectIdentifier => {
                if !is_identifier_start(c) {
                    self.stack.truncate(idx);
                    return None;
                }
                let len = identifier_len(self.rest());
                let word = &self.rest()[..len];
                let kind = if is_csharp_keyword(word) {
                    TokenKind::Keyword
                } else {
                    TokenKind::Identifier
                };
                let next = if word == "await" {
                    ImplicitState::AwaitSpace
                } else {
                    ImplicitState::AfterIdentifier
                };
                frame.kind = CodeKind::Implicit(next);
                self.store(idx, frame);
                Some(self.emit(kind, LexMode::Code, len))
            }
            ImplicitState::AwaitSpace => {
                if is_inline_whitespace(c) {
                    frame.kind = CodeKind::Implicit(ImplicitState::ExpectIdentifier);
                    self.store(idx, frame);
                    let len = inline_whitespace_len(self.rest());
                    return Some(self.emit(TokenKind::Whitespace, LexMode::Code, len));
                }
                frame.kind = CodeKind::Implicit(ImplicitState::AfterIdentifier);
                self.store(idx, frame);
                None
            }
            ImplicitState::AfterIdentifier => {
                let next = self.peek_at(1);
                if c == '.' && next.map_or(false, is_identifier_start) {
                    frame.kind = CodeKind::Implicit(ImplicitState::ExpectIdentifier);
                    self.store(idx, frame);
                    return Some(self.emit(TokenKind::Dot, LexMode::Code, 1));
                }
                if c == '(' || c == '[' {
                    frame.parens = 1;
                    frame.kind = CodeKind::Implicit(ImplicitState::Brackets);
                    self.store(idx, frame);
                    let kind = if c == '(' {
                        TokenKind::LeftParen
                    } else {
                        TokenKind::LeftBracket
                    };
                    return Some(self.emit(kind, LexMode::Code, 1));
                }
                if c == '?'
                    && next == Some('.')
                    && self.flags.allow_null_conditional_operator_in_implicit_expressions
                    && self.peek_at(2).map_or(false, is_identifier_start)
                {
                    frame.kind = CodeKind::Implicit(ImplicitState::ExpectIdentifier);
                    self.store(idx, frame);
                    return Some(self.emit(TokenKind::Punctuation, LexMode::Code, 2));
                }
                self.stack.truncate(idx);
                None
            }
            ImplicitState::Brackets => {
                if self.rest().starts_with("@*") {
                    self.stack.push(Frame::RazorComment);
                    return Some(self.emit(TokenKind::RazorCommentOpen, LexMode::Comment, 2));
                }
                let (kind, len) = scan_code(self.rest());
                match kind {
                    TokenKind::LeftParen | TokenKind::LeftBracket => frame.parens += 1,
                    TokenKind::RightParen | TokenKind::RightBracket => {
                        frame.parens = frame.parens.saturating_sub(1);
                        if frame.parens == 0 {
                            frame.kind = CodeKind::Implicit(ImplicitState::AfterIdentifier);
                        }
                    }
                    _ => {}
                }
                self.store(idx, frame);
                Some(self.emit(kind, LexMode::Code, len))
            }
        }
    }

    fn island_allowed(&self, frame: &CodeFrame) -> bool {
        match frame.kind {
            CodeKind::Block | CodeKind::Statement => frame.braces > 0,
            CodeKind::DirectiveCode => {
                frame.braces > 0 && self.flags.allow_razor_in_all_code_blocks
            }
            _ => false,
        }
    }

    fn lex_code_body(&mut self, idx: usize, mut frame: CodeFrame) -> Option<Token> {
        let c = self.peek()?;

        match frame.kind {
            CodeKind::DirectiveCode | CodeKind::DirectiveMarkup if !frame.opened => {
                if c == '{' {
                    frame.opened = true;
                    frame.braces = 1;
                    frame.statement_start = true;
                    self.store(idx, frame);
                    let token = self.emit(TokenKind::LeftBrace, LexMode::Code, 1);
                    if frame.kind == CodeKind::DirectiveMarkup {
                        self.stack
                            .push(Frame::Markup(MarkupFrame::new(MarkupEnd::Brace)));
                    }
                    return Some(token);
                }
                if c == '<' || c == '@' {
                    // No body follows; the parser reports the missing block.
                    self.stack.truncate(idx);
                    return None;
                }
            }
            CodeKind::DirectiveMarkup => {
                if c == '}' {
                    let token = self.emit(TokenKind::RightBrace, LexMode::Code, 1);
                    self.stack.truncate(idx);
                    return Some(token);
                }
                self.stack.truncate(idx);
                return None;
            }
            CodeKind::Statement if frame.braces == 0 && frame.parens == 0 && c == '<' => {
                self.stack.truncate(idx);
                return None;
            }
            _ => {}
        }

        if frame.statement_start && self.island_allowed(&frame) {
            if c == '<' && self.is_tag_start(self.pos) {
                self.stack
                    .push(Frame::Markup(MarkupFrame::new(MarkupEnd::Element)));
                return None;
            }
            if c == '@' && self.peek_at(1) == Some(':') {
                self.stack.push(Frame::Markup(MarkupFrame::new(MarkupEnd::Line)));
                return Some(self.emit(TokenKind::Transition, LexMode::Markup, 1));
            }
        }
        if self.rest().starts_with("@*") {
            self.stack.push(Frame::RazorComment);
            return Some(self.emit(TokenKind::RazorCommentOpen, LexMode::Comment, 2));
        }

        let (kind, len) = scan_code(self.rest());
        match kind {
            TokenKind::LeftBrace => frame.braces += 1,
            TokenKind::RightBrace => frame.braces = frame.braces.saturating_sub(1),
            TokenKind::LeftParen | TokenKind::LeftBracket => frame.parens += 1,
            TokenKind::RightParen | TokenKind::RightBracket => {
                frame.parens = frame.parens.saturating_sub(1)
            }
            _ => {}
        }
        frame.statement_start = match kind {
            TokenKind::LeftBrace
            | TokenKind::RightBrace
            | TokenKind::Semicolon
            | TokenKind::Colon => true,
            k if k.is_trivia() => frame.statement_start,
            _ => false,
        };

        let at_top = frame.braces == 0 && frame.parens == 0;
        let done = match frame.kind {
            CodeKind::Explicit => kind == TokenKind::RightParen && frame.parens == 0,
            CodeKind::Block | CodeKind::DirectiveCode => {
                kind == TokenKind::RightBrace && frame.braces == 0
            }
            CodeKind::DirectiveLine => kind == TokenKind::NewLine,
            CodeKind::Statement => {
                if kind == TokenKind::Keyword && at_top && &self.rest()[..len] == "do" {
                    frame.do_loop = true;
                }
                if kind == TokenKind::Semicolon && at_top {
                    true
                } else if kind == TokenKind::RightBrace && at_top {
                    match continuation_keyword(&self.rest()[len..]) {
                        Some("else") | Some("catch") | Some("finally") => false,
                        Some("while") => !frame.do_loop,
                        _ => true,
                    }
                } else {
                    false
                }
            }
            _ => false,
        };

        self.store(idx, frame);
        let token = self.emit(kind, LexMode::Code, len);
        if done {
            self.stack.truncate(idx);
        }
        Some(token)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Comments
    // ───────────────────────────────────────────────────────────────────────────

    fn lex_razor_comment(&mut self) -> Option<Token> {
        if self.rest().is_empty() {
            return None;
        }
        if self.rest().starts_with("*@") {
            let token = self.emit(TokenKind::RazorCommentClose, LexMode::Comment, 2);
            self.stack.pop();
            return Some(token);
        }
        let len = self.rest().find("*@").unwrap_or(self.rest().len());
        Some(self.emit(TokenKind::RazorCommentBody, LexMode::Comment, len))
    }

    fn lex_html_comment(&mut self) -> Option<Token> {
        let c = self.peek()?;
        if self.rest().starts_with("-->") {
            let token = self.emit(TokenKind::HtmlCommentClose, LexMode::Comment, 3);
            self.stack.pop();
            return Some(token);
        }
        let nl = newline_len(self.rest());
        if nl > 0 {
            return Some(self.emit(TokenKind::NewLine, LexMode::Comment, nl));
        }
        if is_inline_whitespace(c) {
            let len = inline_whitespace_len(self.rest());
            return Some(self.emit(TokenKind::Whitespace, LexMode::Comment, len));
        }
        if self.is_transition_at(self.pos) {
            return Some(self.lex_transition(LexMode::Comment));
        }
        let len = self.run_len(|t, at, ch| {
            ch.is_whitespace() || t.text[at..].starts_with("-->") || t.is_transition_at(at)
        });
        Some(self.emit(TokenKind::Text, LexMode::Comment, len.max(c.len_utf8())))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        while self.pos < self.text.len() {
            let token = match self.stack.last() {
                Some(Frame::Markup(_)) => self.lex_markup(),
                Some(Frame::Tag(_)) => self.lex_tag(),
                Some(Frame::Code(_)) => self.lex_code(),
                Some(Frame::HtmlComment) => self.lex_html_comment(),
                Some(Frame::RazorComment) => self.lex_razor_comment(),
                None => return None,
            };
            if token.is_some() {
                return token;
            }
        }
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// What a single `@` opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTarget {
    Implicit,
    Explicit,
    Block,
    Statement,
    Directive(DirectiveKind),
    /// Nothing valid follows the `@`.
    Invalid,
}

/// Classifies the construct after an `@`. `after` is the text following it.
/// Directives are only recognized in document-level markup.
pub fn transition_target(
    after: &str,
    mode: LexMode,
    top_level: bool,
    directives: &DirectiveRegistry,
) -> TransitionTarget {
    let Some(first) = after.chars().next() else {
        return TransitionTarget::Invalid;
    };
    match first {
        '(' => return TransitionTarget::Explicit,
        '{' => return TransitionTarget::Block,
        c if !is_identifier_start(c) => return TransitionTarget::Invalid,
        _ => {}
    }
    if mode != LexMode::Markup {
        return TransitionTarget::Implicit;
    }

    let word = &after[..identifier_len(after)];
    if word == USING {
        let rest = after[word.len()..].trim_start_matches(is_inline_whitespace);
        if rest.starts_with('(') {
            return TransitionTarget::Statement;
        }
    }
    if top_level {
        if let Some(kind) = directives.kind_of(word) {
            return TransitionTarget::Directive(kind);
        }
    }
    if STATEMENT_KEYWORDS.contains(word) {
        TransitionTarget::Statement
    } else {
        TransitionTarget::Implicit
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHARACTER CLASSES
// ═══════════════════════════════════════════════════════════════════════════════

fn quote_kind(q: char) -> TokenKind {
    if q == '"' {
        TokenKind::DoubleQuote
    } else {
        TokenKind::SingleQuote
    }
}

pub(crate) fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub(crate) fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_inline_whitespace(c: char) -> bool {
    c.is_whitespace() && c != '\n' && c != '\r'
}

fn newline_len(s: &str) -> usize {
    if s.starts_with("\r\n") {
        2
    } else if s.starts_with('\n') || s.starts_with('\r') {
        1
    } else {
        0
    }
}

fn inline_whitespace_len(s: &str) -> usize {
    s.find(|c: char| !is_inline_whitespace(c)).unwrap_or(s.len())
}

fn identifier_len(s: &str) -> usize {
    s.char_indices()
        .find(|&(i, c)| {
            if i == 0 {
                !is_identifier_start(c)
            } else {
                !is_identifier_part(c)
            }
        })
        .map_or(s.len(), |(i, _)| i)
}

fn number_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let decimal_point =
            b == b'.' && bytes.get(i + 1).map_or(false, |n| n.is_ascii_digit());
        if b.is_ascii_alphanumeric() || b == b'_' || decimal_point {
            i += 1;
        } else {
            break;
        }
    }
    i.max(1)
}

/// Length of a `"`- or `'`-delimited literal with backslash escapes. Stops
/// before a newline when unterminated.
fn quoted_len(s: &str, quote: char) -> usize {
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '\n' | '\r' => return i,
            c if c == quote => return i + 1,
            _ => {}
        }
    }
    s.len()
}

/// Length of a verbatim string starting at its opening quote; `""` escapes.
fn verbatim_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn continuation_keyword(s: &str) -> Option<&str> {
    let trimmed = s.trim_start();
    let len = identifier_len(trimmed);
    (len > 0).then(|| &trimmed[..len])
}

/// Delimits one code token. Never evaluates literals.
fn scan_code(s: &str) -> (TokenKind, usize) {
    let mut chars = s.chars();
    let Some(c) = chars.next() else {
        return (TokenKind::Punctuation, 0);
    };
    let next = chars.next();

    let nl = newline_len(s);
    if nl > 0 {
        return (TokenKind::NewLine, nl);
    }
    if is_inline_whitespace(c) {
        return (TokenKind::Whitespace, inline_whitespace_len(s));
    }
    if is_identifier_start(c) {
        let len = identifier_len(s);
        let kind = if is_csharp_keyword(&s[..len]) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        return (kind, len);
    }
    if c.is_ascii_digit() {
        return (TokenKind::NumericLiteral, number_len(s));
    }

    match (c, next) {
        ('@', Some('"')) => (TokenKind::StringLiteral, 1 + verbatim_len(&s[1..])),
        ('@', Some('$')) | ('$', Some('@')) if s[2..].starts_with('"') => {
            (TokenKind::StringLiteral, 2 + verbatim_len(&s[2..]))
        }
        ('$', Some('"')) => (TokenKind::StringLiteral, 1 + quoted_len(&s[1..], '"')),
        ('@', Some(n)) if is_identifier_start(n) => {
            (TokenKind::Identifier, 1 + identifier_len(&s[1..]))
        }
        ('@', _) => (TokenKind::Transition, 1),
        ('"', _) => (TokenKind::StringLiteral, quoted_len(s, '"')),
        ('\'', _) => (TokenKind::CharLiteral, quoted_len(s, '\'')),
        ('/', Some('/')) => (
            TokenKind::CodeComment,
            s.find(|ch| ch == '\n' || ch == '\r').unwrap_or(s.len()),
        ),
        ('/', Some('*')) => (
            TokenKind::CodeComment,
            s[2..].find("*/").map_or(s.len(), |i| i + 4),
        ),
        ('(', _) => (TokenKind::LeftParen, 1),
        (')', _) => (TokenKind::RightParen, 1),
        ('{', _) => (TokenKind::LeftBrace, 1),
        ('}', _) => (TokenKind::RightBrace, 1),
        ('[', _) => (TokenKind::LeftBracket, 1),
        (']', _) => (TokenKind::RightBracket, 1),
        ('.', _) => (TokenKind::Dot, 1),
        (';', _) => (TokenKind::Semicolon, 1),
        (':', _) => (TokenKind::Colon, 1),
        _ => (TokenKind::Punctuation, c.len_utf8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_code_literals() {
        assert_eq!(scan_code("\"a\\\"b\" rest"), (TokenKind::StringLiteral, 6));
        assert_eq!(scan_code("@\"a\"\"b\"x"), (TokenKind::StringLiteral, 7));
        assert_eq!(scan_code("'x')"), (TokenKind::CharLiteral, 3));
        assert_eq!(scan_code("3.14f;"), (TokenKind::NumericLiteral, 5));
        assert_eq!(scan_code("// c\nx"), (TokenKind::CodeComment, 4));
        assert_eq!(scan_code("/* a */b"), (TokenKind::CodeComment, 7));
        assert_eq!(scan_code("@class "), (TokenKind::Identifier, 6));
    }

    #[test]
    fn test_unterminated_string_stops_at_newline() {
        assert_eq!(scan_code("\"abc\ndef"), (TokenKind::StringLiteral, 4));
    }

    #[test]
    fn test_void_elements_are_case_insensitive() {
        assert!(is_void_element("BR"));
        assert!(!is_void_element("div"));
    }
}
