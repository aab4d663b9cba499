//! Codegen module
//!
//! Deterministic C# emission from the final intermediate tree. A single walk
//! writes through a `CodeWriter` that tracks indentation and the current
//! line/column, and every run of text that came from the template is recorded
//! as a `SourceMapping`.
//!
//! Two targets share the walk: runtime output writes literals and wraps
//! mapped code in `#line` pragmas; design-time output skips literals and
//! assigns expressions to a discard so the editor can map them.

use serde::{Deserialize, Serialize};

use crate::code_document::RazorCodeDocument;
use crate::config::RazorCodeGenerationOptions;
use crate::diagnostics::{sort_diagnostics, RazorDiagnostic};
use crate::directives::DirectiveTokenKind;
use crate::error::PipelineError;
use crate::ir::{IntermediateNode, NodeKind};
use crate::source::{SourceLocation, SourceSpan};
use crate::tag_helpers::{AttributeStructure, TagMode, STRING_TYPE_NAME};
use crate::visitor::{walk_children, IntermediateNodeVisitor};

/// Longest literal written by a single `WriteLiteral` call.
pub const MAX_LITERAL_CHUNK: usize = 1024;

const SHA256_CHECKSUM_GUID: &str = "{8829d00f-11b8-4213-878b-770e8597ac16}";
const SHA1_CHECKSUM_GUID: &str = "{ff1816ec-aa5e-4d10-87f7-6f4963833460}";

const TAG_HELPERS_NS: &str = "global::Microsoft.AspNetCore.Razor.TagHelpers";
const RUNTIME_NS: &str = "global::Microsoft.AspNetCore.Razor.Runtime.TagHelpers";
const HOSTING_NS: &str = "global::Microsoft.AspNetCore.Razor.Hosting";

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingKind {
    /// Generated text is the source text, character for character.
    Exact,
    /// Generated text was derived from the source span but differs from it.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapping {
    pub original_span: SourceSpan,
    pub generated_span: SourceSpan,
    pub kind: MappingKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorCSharpDocument {
    pub generated_code: String,
    #[serde(default)]
    pub source_mappings: Vec<SourceMapping>,
    #[serde(default)]
    pub diagnostics: Vec<RazorDiagnostic>,
    #[serde(default)]
    pub options: RazorCodeGenerationOptions,
}

impl RazorCSharpDocument {
    /// Generated text covered by `mapping`.
    pub fn generated_text(&self, mapping: &SourceMapping) -> Option<&str> {
        self.generated_code
            .get(mapping.generated_span.absolute_index..mapping.generated_span.end_index())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LITERALS
// ═══════════════════════════════════════════════════════════════════════════════

/// `@"..."` with doubled quotes.
pub fn verbatim_string(text: &str) -> String {
    format!("@\"{}\"", text.replace('"', "\"\""))
}

/// Regular `"..."` literal with backslash escapes.
pub fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Splits `text` into pieces of at most `max` characters.
pub fn literal_chunks(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == max {
            chunks.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

// ═══════════════════════════════════════════════════════════════════════════════
// CODE WRITER
// ═══════════════════════════════════════════════════════════════════════════════

/// Text buffer with an explicit cursor: indent level plus the line and
/// column of the next character.
#[derive(Debug)]
pub struct CodeWriter {
    buffer: String,
    indent_level: usize,
    indent_size: usize,
    indent_with_tabs: bool,
    line: usize,
    column: usize,
    at_line_start: bool,
}

impl CodeWriter {
    pub fn new(options: &RazorCodeGenerationOptions) -> Self {
        Self {
            buffer: String::new(),
            indent_level: 0,
            indent_size: options.indent_size,
            indent_with_tabs: options.indent_with_tabs,
            line: 0,
            column: 0,
            at_line_start: true,
        }
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            absolute_index: self.buffer.len(),
            line_index: self.line,
            character_index: self.column,
        }
    }

    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn push(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        self.at_line_start = text.ends_with('\n') || (self.at_line_start && text.is_empty());
        self.buffer.push_str(text);
    }

    fn write_indent(&mut self) {
        if !self.at_line_start || self.indent_level == 0 {
            return;
        }
        let indent = if self.indent_with_tabs {
            "\t".repeat(self.indent_level)
        } else {
            " ".repeat(self.indent_level * self.indent_size)
        };
        self.push(&indent);
        self.at_line_start = false;
    }

    pub fn write(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        self.write_indent();
        self.push(text);
        self
    }

    pub fn write_line(&mut self, text: &str) -> &mut Self {
        self.write(text);
        self.push("\n");
        self
    }

    /// Starts a new line unless the cursor already is at one.
    pub fn ensure_new_line(&mut self) -> &mut Self {
        if !self.at_line_start {
            self.push("\n");
        }
        self
    }

    /// A whole line at column zero, ignoring the indent level.
    pub fn write_pragma(&mut self, text: &str) -> &mut Self {
        self.ensure_new_line();
        self.push(text);
        self.push("\n");
        self
    }

    /// Spaces up to `column`, ignoring the indent level.
    pub fn write_padding(&mut self, column: usize) -> &mut Self {
        if self.at_line_start && column > 0 {
            self.push(&" ".repeat(column));
            self.at_line_start = false;
        }
        self
    }

    pub fn begin_block(&mut self, header: &str) {
        self.write_line(header);
        self.write_line("{");
        self.indent();
    }

    pub fn end_block(&mut self, footer: &str) {
        self.dedent();
        self.ensure_new_line();
        self.write("}");
        self.write_line(footer);
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Generates C# for the document's final tree and collects every diagnostic
/// the document has accumulated, ordered by position.
pub fn generate(document: &RazorCodeDocument) -> Result<RazorCSharpDocument, PipelineError> {
    let ir = document.document_ir()?;
    let options = document.codegen_options()?.clone();
    let (generated_code, source_mappings) = write_csharp(ir, &options)?;

    let mut diagnostics: Vec<RazorDiagnostic> = document.syntax_tree()?.diagnostics().to_vec();
    diagnostics.extend(document.discovery_diagnostics().iter().cloned());
    diagnostics.extend(ir.all_diagnostics());
    sort_diagnostics(&mut diagnostics);
    diagnostics.dedup();

    Ok(RazorCSharpDocument {
        generated_code,
        source_mappings,
        diagnostics,
        options,
    })
}

/// Text and mappings for a classified tree.
pub fn write_csharp(
    ir: &IntermediateNode,
    options: &RazorCodeGenerationOptions,
) -> Result<(String, Vec<SourceMapping>), PipelineError> {
    ir.validate_primaries()?;
    let mut renderer = CSharpRenderer {
        writer: CodeWriter::new(options),
        mappings: Vec::new(),
        design_time: options.design_time,
        tag_helper_count: 0,
    };
    renderer.visit(ir);
    Ok((renderer.writer.finish(), renderer.mappings))
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

struct CSharpRenderer {
    writer: CodeWriter,
    mappings: Vec<SourceMapping>,
    design_time: bool,
    tag_helper_count: usize,
}

fn html_only(node: &IntermediateNode) -> bool {
    node.children
        .iter()
        .all(|c| matches!(c.kind, NodeKind::HtmlContent | NodeKind::HtmlAttributeValue { .. }))
}

fn html_text(node: &IntermediateNode) -> String {
    node.children.iter().map(IntermediateNode::content).collect()
}

fn value_style(structure: AttributeStructure) -> String {
    let style = match structure {
        AttributeStructure::DoubleQuotes => "DoubleQuotes",
        AttributeStructure::SingleQuotes => "SingleQuotes",
        AttributeStructure::NoQuotes => "NoQuotes",
        AttributeStructure::Minimized => "Minimized",
    };
    format!("{}.HtmlAttributeValueStyle.{}", TAG_HELPERS_NS, style)
}

fn tag_mode_name(mode: TagMode) -> &'static str {
    match mode {
        TagMode::StartTagAndEndTag => "StartTagAndEndTag",
        TagMode::SelfClosing => "SelfClosing",
        TagMode::StartTagOnly => "StartTagOnly",
    }
}

fn is_simple_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl CSharpRenderer {
    // ───────────────────────────────────────────────────────────────────────────
    // Mapping helpers
    // ───────────────────────────────────────────────────────────────────────────

    /// Writes `text` and maps it to `source` when there is one.
    fn write_mapped(&mut self, text: &str, source: Option<&SourceSpan>) {
        let start = self.writer.location();
        self.writer.write(text);
        let Some(original) = source else {
            return;
        };
        // Indentation written ahead of the text is not part of the mapping.
        let end = self.writer.location();
        let generated_start = SourceLocation {
            absolute_index: end.absolute_index - text.len(),
            line_index: if text.contains('\n') { start.line_index } else { end.line_index },
            character_index: if text.contains('\n') {
                start.character_index
            } else {
                end.character_index - text.chars().count()
            },
        };
        let kind = if text.len() == original.length {
            MappingKind::Exact
        } else {
            MappingKind::BestEffort
        };
        self.mappings.push(SourceMapping {
            original_span: original.clone(),
            generated_span: SourceSpan::new(None, generated_start, text.len()),
            kind,
        });
    }

    /// Token children mapped, anything else visited.
    fn write_csharp_children(&mut self, node: &IntermediateNode) {
        for child in &node.children {
            match &child.kind {
                NodeKind::Token { content, .. } => self.write_mapped(content, child.source.as_ref()),
                _ => self.visit(child),
            }
        }
    }

    fn begin_line_pragma(&mut self, source: Option<&SourceSpan>) -> bool {
        if self.design_time {
            return false;
        }
        let Some(SourceSpan {
            file_path: Some(path),
            line_index,
            ..
        }) = source
        else {
            return false;
        };
        self.writer
            .write_pragma(&format!("#line {} \"{}\"", line_index + 1, path));
        true
    }

    fn end_line_pragma(&mut self, began: bool) {
        if began {
            self.writer.ensure_new_line();
            self.writer.write_pragma("#line default");
            self.writer.write_pragma("#line hidden");
        }
    }

    fn write_literal(&mut self, text: &str) {
        for chunk in literal_chunks(text, MAX_LITERAL_CHUNK) {
            self.writer
                .write("WriteLiteral(")
                .write(&verbatim_string(chunk))
                .write_line(");");
        }
    }

    /// Runtime: collects mixed HTML and expressions into the tag helper
    /// string buffer. Design time: only the expressions.
    fn write_buffered_value(&mut self, node: &IntermediateNode) {
        if self.design_time {
            walk_children(self, node);
            return;
        }
        self.writer.write_line("BeginWriteTagHelperAttribute();");
        walk_children(self, node);
        self.writer
            .write_line("__tagHelperStringValueBuffer = EndWriteTagHelperAttribute();");
    }
}

impl IntermediateNodeVisitor for CSharpRenderer {
    // ───────────────────────────────────────────────────────────────────────────
    // Document structure
    // ───────────────────────────────────────────────────────────────────────────

    fn visit_checksum(&mut self, node: &IntermediateNode) {
        let NodeKind::Checksum {
            algorithm,
            checksum,
            file_path: Some(path),
        } = &node.kind
        else {
            return;
        };
        let guid = if algorithm.eq_ignore_ascii_case("SHA1") {
            SHA1_CHECKSUM_GUID
        } else {
            SHA256_CHECKSUM_GUID
        };
        self.writer
            .write_pragma(&format!("#pragma checksum \"{}\" \"{}\" \"{}\"", path, guid, checksum));
    }

    fn visit_compiled_item_attribute(&mut self, node: &IntermediateNode) {
        if let NodeKind::RazorCompiledItemAttribute {
            kind,
            identifier,
            type_name,
        } = &node.kind
        {
            self.writer.write_line(&format!(
                "[assembly: {}.RazorCompiledItemAttribute(typeof(global::{}), {}, {})]",
                HOSTING_NS,
                type_name,
                verbatim_string(kind),
                verbatim_string(identifier)
            ));
        }
    }

    fn visit_source_checksum_attribute(&mut self, node: &IntermediateNode) {
        if let NodeKind::RazorSourceChecksumAttribute {
            algorithm,
            checksum,
            identifier,
        } = &node.kind
        {
            self.writer.write_line(&format!(
                "[{}.RazorSourceChecksumAttribute({}, {}, {})]",
                HOSTING_NS,
                verbatim_string(algorithm),
                verbatim_string(checksum),
                verbatim_string(identifier)
            ));
        }
    }

    fn visit_compiled_item_metadata_attribute(&mut self, node: &IntermediateNode) {
        if let NodeKind::RazorCompiledItemMetadataAttribute { key, value } = &node.kind {
            self.writer.write_line(&format!(
                "[{}.RazorCompiledItemMetadataAttribute({}, {})]",
                HOSTING_NS,
                string_literal(key),
                string_literal(value)
            ));
        }
    }

    fn visit_namespace(&mut self, node: &IntermediateNode) {
        let NodeKind::Namespace { content, .. } = &node.kind else {
            return;
        };
        self.writer.begin_block(&format!("namespace {}", content));
        if !self.design_time {
            self.writer.write_pragma("#line hidden");
        }
        walk_children(self, node);
        self.writer.end_block("");
    }

    fn visit_using(&mut self, node: &IntermediateNode) {
        let NodeKind::Using { content } = &node.kind else {
            return;
        };
        let began = self.begin_line_pragma(node.source.as_ref());
        self.writer.write("using ");
        self.write_mapped(content, node.source.as_ref());
        self.writer.write_line(";");
        self.end_line_pragma(began);
    }

    fn visit_class(&mut self, node: &IntermediateNode) {
        let NodeKind::Class {
            modifiers,
            class_name,
            base_type,
            interfaces,
            ..
        } = &node.kind
        else {
            return;
        };
        let mut header = format!("{} class {}", modifiers.join(" "), class_name);
        let supertypes: Vec<&str> = base_type
            .iter()
            .map(String::as_str)
            .chain(interfaces.iter().map(String::as_str))
            .collect();
        if !supertypes.is_empty() {
            header.push_str(" : ");
            header.push_str(&supertypes.join(", "));
        }
        self.writer.begin_block(header.trim_start());
        if self.design_time && node.kind.is_primary_class() {
            self.writer.write_line("#pragma warning disable 0414");
            self.writer.write_line("private static global::System.Object __o = null;");
            self.writer.write_line("#pragma warning restore 0414");
        }
        walk_children(self, node);
        self.writer.end_block("");
    }

    fn visit_method(&mut self, node: &IntermediateNode) {
        let NodeKind::Method {
            modifiers,
            return_type,
            method_name,
            ..
        } = &node.kind
        else {
            return;
        };
        self.writer.write_line("#pragma warning disable 1998");
        self.writer.begin_block(&format!(
            "{} {} {}()",
            modifiers.join(" "),
            return_type,
            method_name
        ));
        walk_children(self, node);
        self.writer.end_block("");
        self.writer.write_line("#pragma warning restore 1998");
    }

    fn visit_field(&mut self, node: &IntermediateNode) {
        if let NodeKind::Field {
            modifiers,
            field_type,
            field_name,
        } = &node.kind
        {
            self.writer
                .write_line(&format!("{} {} {};", modifiers.join(" "), field_type, field_name));
        }
    }

    fn visit_property(&mut self, node: &IntermediateNode) {
        let NodeKind::Property {
            modifiers,
            property_type,
            property_name,
            attributes,
            initializer,
        } = &node.kind
        else {
            return;
        };
        for attribute in attributes {
            self.writer.write_line(&format!("[{}]", attribute));
        }
        let accessors = if attributes.is_empty() {
            "{ get; set; }"
        } else {
            "{ get; private set; }"
        };
        let mut line = format!(
            "{} {} {} {}",
            modifiers.join(" "),
            property_type,
            property_name,
            accessors
        );
        if let Some(initializer) = initializer {
            line.push_str(&format!(" = {};", initializer));
        }
        self.writer.write_line(&line);
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Markup and code
    // ───────────────────────────────────────────────────────────────────────────

    fn visit_html_content(&mut self, node: &IntermediateNode) {
        if self.design_time {
            return;
        }
        let text = node.content();
        if !text.is_empty() {
            self.write_literal(&text);
        }
    }

    fn visit_csharp_expression(&mut self, node: &IntermediateNode) {
        if self.design_time {
            self.writer.write("__o = ");
            self.write_csharp_children(node);
            self.writer.write_line(";");
            return;
        }
        let began = self.begin_line_pragma(node.source.as_ref());
        self.writer.write("Write(");
        self.write_csharp_children(node);
        self.writer.write_line(");");
        self.end_line_pragma(began);
    }

    fn visit_csharp_code(&mut self, node: &IntermediateNode) {
        let began = self.begin_line_pragma(node.source.as_ref());
        if let Some(source) = &node.source {
            self.writer.write_padding(source.character_index);
        }
        self.write_csharp_children(node);
        self.writer.ensure_new_line();
        self.end_line_pragma(began);
    }

    fn visit_html_attribute(&mut self, node: &IntermediateNode) {
        let NodeKind::HtmlAttribute {
            attribute_name,
            prefix,
            suffix,
        } = &node.kind
        else {
            return;
        };
        if self.design_time {
            walk_children(self, node);
            return;
        }
        let start = node.source.as_ref().map_or(0, |s| s.absolute_index);
        let end = node.source.as_ref().map_or(0, |s| s.end_index() - suffix.len());
        self.writer.write_line(&format!(
            "BeginWriteAttribute({}, {}, {}, {}, {}, {});",
            string_literal(attribute_name),
            string_literal(prefix),
            start,
            string_literal(suffix),
            end,
            node.children.len()
        ));
        walk_children(self, node);
        self.writer.write_line("EndWriteAttribute();");
    }

    fn visit_html_attribute_value(&mut self, node: &IntermediateNode) {
        if self.design_time {
            return;
        }
        let NodeKind::HtmlAttributeValue { prefix } = &node.kind else {
            return;
        };
        let (start, len) = node.source.as_ref().map_or((0, 0), |s| (s.absolute_index, s.length));
        self.writer.write_line(&format!(
            "WriteAttributeValue({}, {}, {}, {}, {}, true);",
            string_literal(prefix),
            start,
            string_literal(&node.content()),
            start,
            len
        ));
    }

    fn visit_csharp_expression_attribute_value(&mut self, node: &IntermediateNode) {
        if self.design_time {
            self.writer.write("__o = ");
            self.write_csharp_children(node);
            self.writer.write_line(";");
            return;
        }
        let NodeKind::CSharpExpressionAttributeValue { prefix } = &node.kind else {
            return;
        };
        let (start, len) = node.source.as_ref().map_or((0, 0), |s| (s.absolute_index, s.length));
        self.writer
            .write_line(&format!("WriteAttributeValue({}, {}, ", string_literal(prefix), start));
        let began = self.begin_line_pragma(node.source.as_ref());
        self.write_csharp_children(node);
        self.end_line_pragma(began);
        self.writer.ensure_new_line();
        self.writer.write_line(&format!(", {}, {}, false);", start, len));
    }

    fn visit_csharp_code_attribute_value(&mut self, node: &IntermediateNode) {
        if self.design_time {
            self.visit_csharp_code(node);
            return;
        }
        let NodeKind::CSharpCodeAttributeValue { prefix } = &node.kind else {
            return;
        };
        let (start, len) = node.source.as_ref().map_or((0, 0), |s| (s.absolute_index, s.length));
        self.writer.write_line(&format!(
            "WriteAttributeValue({}, {}, new global::Microsoft.AspNetCore.Mvc.Razor.HelperResult(async(__razor_attribute_value_writer) => {{",
            string_literal(prefix),
            start
        ));
        self.writer.indent();
        self.visit_csharp_code(node);
        self.writer.dedent();
        self.writer.write_line(&format!("}}), {}, {}, false);", start, len));
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Directives
    // ───────────────────────────────────────────────────────────────────────────

    fn visit_directive(&mut self, _node: &IntermediateNode) {}

    fn visit_section(&mut self, node: &IntermediateNode) {
        let NodeKind::Section { section_name } = &node.kind else {
            return;
        };
        let lambda = if self.design_time {
            "async(__razor_section_writer) =>"
        } else {
            "async() =>"
        };
        self.writer.write_line(&format!(
            "DefineSection({}, {} {{",
            string_literal(section_name),
            lambda
        ));
        self.writer.indent();
        walk_children(self, node);
        self.writer.dedent();
        self.writer.ensure_new_line();
        self.writer.write_line("});");
    }

    fn visit_design_time_directive(&mut self, node: &IntermediateNode) {
        self.writer.write_line("#pragma warning disable 219");
        self.writer.begin_block("private void __RazorDirectiveTokenHelpers__()");
        for token in &node.children {
            let NodeKind::DirectiveToken {
                token_kind,
                content,
            } = &token.kind
            else {
                continue;
            };
            let source = token.source.as_ref();
            match token_kind {
                DirectiveTokenKind::Type => {
                    self.writer.write_line("((global::System.Action)(() => {");
                    self.write_mapped(content, source);
                    self.writer
                        .write_line(&format!(" __typeHelper = default({});", content));
                    self.writer.write_line("}))();");
                }
                DirectiveTokenKind::Member => {
                    self.writer.write_line("((global::System.Action)(() => {");
                    self.writer.write("global::System.Object ");
                    self.write_mapped(content, source);
                    self.writer.write_line(" = null;");
                    self.writer.write_line("}))();");
                }
                DirectiveTokenKind::Namespace => {
                    self.writer.write_line("((global::System.Action)(() => {");
                    self.writer.write("global::System.Object __typeHelper = nameof(");
                    self.write_mapped(content, source);
                    self.writer.write_line(");");
                    self.writer.write_line("}))();");
                }
                DirectiveTokenKind::String => {
                    self.writer.write_line("((global::System.Action)(() => {");
                    self.writer.write("global::System.Object __typeHelper = ");
                    self.write_mapped(content, source);
                    self.writer.write_line(";");
                    self.writer.write_line("}))();");
                }
                DirectiveTokenKind::Text => {
                    self.writer.write_line("((global::System.Action)(() => {");
                    self.writer.write("global::System.Object __typeHelper = ");
                    self.write_mapped(&string_literal(content.trim()), source);
                    self.writer.write_line(";");
                    self.writer.write_line("}))();");
                }
                DirectiveTokenKind::Attribute | DirectiveTokenKind::Boolean => {}
            }
        }
        self.writer.end_block("");
        self.writer.write_line("#pragma warning restore 219");
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Tag helpers
    // ───────────────────────────────────────────────────────────────────────────

    fn visit_tag_helper_runtime(&mut self, _node: &IntermediateNode) {
        if self.design_time {
            return;
        }
        let w = &mut self.writer;
        w.write_line("#line hidden");
        w.write_line("#pragma warning disable 0649");
        w.write_line(&format!(
            "private {}.TagHelperExecutionContext __tagHelperExecutionContext;",
            RUNTIME_NS
        ));
        w.write_line("#pragma warning restore 0649");
        w.write_line(&format!(
            "private {ns}.TagHelperRunner __tagHelperRunner = new {ns}.TagHelperRunner();",
            ns = RUNTIME_NS
        ));
        w.write_line("#pragma warning disable 0169");
        w.write_line("private string __tagHelperStringValueBuffer;");
        w.write_line("#pragma warning restore 0169");
        w.write_line(&format!(
            "private {}.TagHelperScopeManager __backed__tagHelperScopeManager = null;",
            RUNTIME_NS
        ));
        w.begin_block(&format!(
            "private {}.TagHelperScopeManager __tagHelperScopeManager",
            RUNTIME_NS
        ));
        w.begin_block("get");
        w.begin_block("if (__backed__tagHelperScopeManager == null)");
        w.write_line(&format!(
            "__backed__tagHelperScopeManager = new {}.TagHelperScopeManager(StartTagHelperWritingScope, EndTagHelperWritingScope);",
            RUNTIME_NS
        ));
        w.end_block("");
        w.write_line("return __backed__tagHelperScopeManager;");
        w.end_block("");
        w.end_block("");
    }

    fn visit_tag_helper(&mut self, node: &IntermediateNode) {
        let NodeKind::TagHelper { tag_name, tag_mode } = &node.kind else {
            return;
        };
        let body = node
            .children
            .iter()
            .find(|c| matches!(c.kind, NodeKind::TagHelperBody));
        if self.design_time {
            walk_children(self, node);
            return;
        }

        let id = format!("{:032x}", self.tag_helper_count);
        self.tag_helper_count += 1;
        self.writer.write_line(&format!(
            "__tagHelperExecutionContext = __tagHelperScopeManager.Begin({}, {}.TagMode.{}, {}, async() => {{",
            string_literal(tag_name),
            TAG_HELPERS_NS,
            tag_mode_name(*tag_mode),
            string_literal(&id)
        ));
        self.writer.indent();
        if let Some(body) = body {
            self.visit(body);
        }
        self.writer.dedent();
        self.writer.ensure_new_line();
        self.writer.write_line("}");
        self.writer.write_line(");");
        for child in &node.children {
            if !matches!(child.kind, NodeKind::TagHelperBody) {
                self.visit(child);
            }
        }
    }

    fn visit_tag_helper_create(&mut self, node: &IntermediateNode) {
        let NodeKind::TagHelperCreate {
            type_name,
            field_name,
        } = &node.kind
        else {
            return;
        };
        self.writer.write_line(&format!(
            "{} = CreateTagHelper<global::{}>();",
            field_name, type_name
        ));
        if !self.design_time {
            self.writer
                .write_line(&format!("__tagHelperExecutionContext.Add({});", field_name));
        }
    }

    fn visit_tag_helper_property(&mut self, node: &IntermediateNode) {
        let NodeKind::TagHelperProperty {
            attribute_name,
            property_name,
            value_type,
            field_name,
            structure,
            indexer_key,
            is_enum,
            ..
        } = &node.kind
        else {
            return;
        };
        let target = match indexer_key {
            Some(key) => format!("{}.{}[{}]", field_name, property_name, string_literal(key)),
            None => format!("{}.{}", field_name, property_name),
        };
        let reused = match node.children.as_slice() {
            [only] => matches!(only.kind, NodeKind::CSharpExpression) && only.source.is_none(),
            _ => false,
        };
        let is_string = value_type == STRING_TYPE_NAME || value_type == "string";

        if *structure == AttributeStructure::Minimized {
            self.writer.write_line(&format!("{} = true;", target));
        } else if reused {
            self.writer.write(&format!("{} = ", target));
            self.write_csharp_children(&node.children[0]);
            self.writer.write_line(";");
        } else if is_string && html_only(node) {
            self.writer
                .write_line(&format!("{} = {};", target, string_literal(&html_text(node))));
        } else if is_string {
            self.write_buffered_value(node);
            if !self.design_time {
                self.writer
                    .write_line(&format!("{} = __tagHelperStringValueBuffer;", target));
            }
        } else {
            for child in &node.children {
                let began = self.begin_line_pragma(child.source.as_ref());
                self.writer.write(&format!("{} = ", target));
                let content = child.content();
                if *is_enum && is_simple_identifier(content.trim()) {
                    self.writer.write(&format!("global::{}.", value_type));
                }
                self.write_csharp_children(child);
                self.writer.write_line(";");
                self.end_line_pragma(began);
            }
        }

        if !self.design_time {
            self.writer.write_line(&format!(
                "__tagHelperExecutionContext.AddTagHelperAttribute({}, {}, {});",
                string_literal(attribute_name),
                target,
                value_style(*structure)
            ));
        }
    }

    fn visit_tag_helper_html_attribute(&mut self, node: &IntermediateNode) {
        let NodeKind::TagHelperHtmlAttribute {
            attribute_name,
            structure,
        } = &node.kind
        else {
            return;
        };
        if self.design_time {
            walk_children(self, node);
            return;
        }
        if *structure == AttributeStructure::Minimized {
            self.writer.write_line(&format!(
                "__tagHelperExecutionContext.AddHtmlAttribute(new {}.TagHelperAttribute({}));",
                TAG_HELPERS_NS,
                string_literal(attribute_name)
            ));
        } else if html_only(node) {
            self.writer.write_line(&format!(
                "__tagHelperExecutionContext.AddHtmlAttribute({}, new global::Microsoft.AspNetCore.Html.HtmlString({}), {});",
                string_literal(attribute_name),
                string_literal(&html_text(node)),
                value_style(*structure)
            ));
        } else {
            self.write_buffered_value(node);
            self.writer.write_line(&format!(
                "__tagHelperExecutionContext.AddHtmlAttribute({}, Html.Raw(__tagHelperStringValueBuffer), {});",
                string_literal(attribute_name),
                value_style(*structure)
            ));
        }
    }

    fn visit_tag_helper_execute(&mut self, _node: &IntermediateNode) {
        if self.design_time {
            return;
        }
        let w = &mut self.writer;
        w.write_line("await __tagHelperRunner.RunAsync(__tagHelperExecutionContext);");
        w.begin_block("if (!__tagHelperExecutionContext.Output.IsContentModified)");
        w.write_line("await __tagHelperExecutionContext.SetOutputContentAsync();");
        w.end_block("");
        w.write_line("Write(__tagHelperExecutionContext.Output);");
        w.write_line("__tagHelperExecutionContext = __tagHelperScopeManager.End();");
    }

    fn visit_view_component_tag_helper(&mut self, node: &IntermediateNode) {
        let NodeKind::ViewComponentTagHelper {
            class_name,
            view_component_name,
            ..
        } = &node.kind
        else {
            return;
        };
        let w = &mut self.writer;
        w.begin_block(&format!("public class {} : {}.TagHelper", class_name, TAG_HELPERS_NS));
        w.write_line("private readonly global::Microsoft.AspNetCore.Mvc.IViewComponentHelper __helper = null;");
        w.begin_block(&format!(
            "public {}(global::Microsoft.AspNetCore.Mvc.IViewComponentHelper helper)",
            class_name
        ));
        w.write_line("__helper = helper;");
        w.end_block("");
        w.write_line(&format!(
            "[{}.HtmlAttributeNotBoundAttribute, global::Microsoft.AspNetCore.Mvc.ViewFeatures.ViewContextAttribute]",
            TAG_HELPERS_NS
        ));
        w.write_line("public global::Microsoft.AspNetCore.Mvc.Rendering.ViewContext ViewContext { get; set; }");
        walk_children(self, node);

        let arguments: Vec<&str> = node
            .children
            .iter()
            .filter_map(|c| match &c.kind {
                NodeKind::Property { property_name, .. } => Some(property_name.as_str()),
                _ => None,
            })
            .collect();
        let w = &mut self.writer;
        w.begin_block(&format!(
            "public override async global::System.Threading.Tasks.Task ProcessAsync({ns}.TagHelperContext __context, {ns}.TagHelperOutput __output)",
            ns = TAG_HELPERS_NS
        ));
        w.write_line("(__helper as global::Microsoft.AspNetCore.Mvc.ViewFeatures.IViewContextAware)?.Contextualize(ViewContext);");
        w.write_line(&format!(
            "var __helperContent = await __helper.InvokeAsync({}, new {{ {} }});",
            string_literal(view_component_name),
            arguments.join(", ")
        ));
        w.write_line("__output.TagName = null;");
        w.write_line("__output.Content.SetHtmlContent(__helperContent);");
        w.end_block("");
        w.end_block("");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_verbatim_and_regular_literals() {
        assert_eq!(verbatim_string("say \"hi\"\n"), "@\"say \"\"hi\"\"\n\"");
        assert_eq!(string_literal("a\\b\"c\n"), "\"a\\\\b\\\"c\\n\"");
    }

    #[test]
    fn test_literal_chunks_respect_char_boundaries() {
        let text = "ab\u{e9}cd";
        assert_eq!(literal_chunks(text, 2), vec!["ab", "\u{e9}c", "d"]);
        assert!(literal_chunks("", 4).is_empty());
        assert_eq!(literal_chunks("abc", 10), vec!["abc"]);
    }

    #[test]
    fn test_writer_tracks_cursor_and_indentation() {
        let mut writer = CodeWriter::new(&RazorCodeGenerationOptions::default());
        writer.begin_block("class A");
        writer.write("x");
        let loc = writer.location();
        assert_eq!((loc.line_index, loc.character_index), (2, 5));
        writer.write_pragma("#line hidden");
        writer.end_block("");
        assert_eq!(writer.finish(), "class A\n{\n    x\n#line hidden\n}\n");
    }

    #[test]
    fn test_tabs_indentation() {
        let options = RazorCodeGenerationOptions {
            indent_with_tabs: true,
            ..RazorCodeGenerationOptions::default()
        };
        let mut writer = CodeWriter::new(&options);
        writer.indent();
        writer.write_line("y;");
        assert_eq!(writer.finish(), "\ty;\n");
    }

    #[test]
    fn test_missing_primary_class_is_an_error() {
        let ir = IntermediateNode::new(NodeKind::Document {
            document_kind: None,
        });
        let err = write_csharp(&ir, &RazorCodeGenerationOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Ir(crate::error::IrError::MissingPrimary("class"))));
    }
}
