//! Source documents and spans.
//!
//! A `SourceDocument` is immutable: an edit produces a new document. The
//! checksum is computed once at construction, the line index lazily on first
//! location lookup.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

pub const CHECKSUM_ALGORITHM: &str = "SHA256";

// ═══════════════════════════════════════════════════════════════════════════════
// SPANS
// ═══════════════════════════════════════════════════════════════════════════════

/// Half-open byte range `[start, end)` into a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {} after end {}", start, end);
        Self { start, end }
    }

    pub fn empty(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Smallest span covering both.
    pub fn cover(&self, other: TextSpan) -> TextSpan {
        TextSpan::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for TextSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

/// Zero-based position of an offset in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub absolute_index: usize,
    pub line_index: usize,
    pub character_index: usize,
}

/// A located span, as carried by diagnostics, IR nodes and source mappings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    #[serde(default)]
    pub file_path: Option<String>,
    pub absolute_index: usize,
    pub line_index: usize,
    pub character_index: usize,
    pub length: usize,
}

impl SourceSpan {
    pub fn new(file_path: Option<String>, start: SourceLocation, length: usize) -> Self {
        Self {
            file_path,
            absolute_index: start.absolute_index,
            line_index: start.line_index,
            character_index: start.character_index,
            length,
        }
    }

    pub fn end_index(&self) -> usize {
        self.absolute_index + self.length
    }

    pub fn text_span(&self) -> TextSpan {
        TextSpan::new(self.absolute_index, self.end_index())
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{},{} [{}] {})",
            self.absolute_index,
            self.line_index,
            self.character_index,
            self.length,
            self.file_path.as_deref().unwrap_or("")
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LINE INDEX
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct LineIndex {
    /// Byte offset of the first character of every line.
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn build(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut line_starts = vec![0];
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' => {
                    if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                        i += 1;
                    }
                    line_starts.push(i + 1);
                }
                b'\n' => line_starts.push(i + 1),
                _ => {}
            }
            i += 1;
        }
        Self { line_starts }
    }

    fn locate(&self, text: &str, offset: usize) -> SourceLocation {
        let offset = offset.min(text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let character_index = text
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - line_start);
        SourceLocation {
            absolute_index: offset,
            line_index: line,
            character_index,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE DOCUMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct SourceDocumentInner {
    text: String,
    file_path: Option<String>,
    relative_path: Option<String>,
    encoding: String,
    checksum: [u8; 32],
    lines: OnceLock<LineIndex>,
}

/// Immutable template source plus identity. Cloning is cheap and shares the text.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    inner: Arc<SourceDocumentInner>,
}

impl SourceDocument {
    pub fn new(
        text: impl Into<String>,
        file_path: Option<String>,
        relative_path: Option<String>,
    ) -> Self {
        let text = text.into();
        let checksum = compute_checksum(text.as_bytes());
        Self {
            inner: Arc::new(SourceDocumentInner {
                text,
                file_path,
                relative_path,
                encoding: "utf-8".to_string(),
                checksum,
                lines: OnceLock::new(),
            }),
        }
    }

    /// Anonymous document with no path, as produced from an editor buffer.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text, None, None)
    }

    pub fn from_file(path: &Path, relative_path: Option<String>) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::new(
            text,
            Some(path.to_string_lossy().to_string()),
            relative_path,
        ))
    }

    pub fn text(&self) -> &str {
        &self.inner.text
    }

    pub fn len(&self) -> usize {
        self.inner.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.text.is_empty()
    }

    pub fn file_path(&self) -> Option<&str> {
        self.inner.file_path.as_deref()
    }

    pub fn relative_path(&self) -> Option<&str> {
        self.inner.relative_path.as_deref()
    }

    pub fn encoding(&self) -> &str {
        &self.inner.encoding
    }

    pub fn checksum(&self) -> &[u8; 32] {
        &self.inner.checksum
    }

    pub fn checksum_hex(&self) -> String {
        to_hex(&self.inner.checksum)
    }

    pub fn checksum_algorithm(&self) -> &'static str {
        CHECKSUM_ALGORITHM
    }

    pub fn slice(&self, span: TextSpan) -> &str {
        &self.inner.text[span.start..span.end]
    }

    pub fn location(&self, offset: usize) -> SourceLocation {
        self.inner
            .lines
            .get_or_init(|| LineIndex::build(&self.inner.text))
            .locate(&self.inner.text, offset)
    }

    pub fn line_count(&self) -> usize {
        self.inner
            .lines
            .get_or_init(|| LineIndex::build(&self.inner.text))
            .line_starts
            .len()
    }

    /// Locate a byte range as a `SourceSpan` tagged with this document's path.
    pub fn source_span(&self, span: TextSpan) -> SourceSpan {
        SourceSpan::new(
            self.file_path().map(str::to_string),
            self.location(span.start),
            span.len(),
        )
    }

    /// True when both documents share the same text allocation.
    pub fn ptr_eq(&self, other: &SourceDocument) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for SourceDocument {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.checksum == other.inner.checksum
                && self.inner.file_path == other.inner.file_path
                && self.inner.relative_path == other.inner.relative_path)
    }
}

impl Eq for SourceDocument {}

pub fn compute_checksum(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_handles_all_newline_styles() {
        let doc = SourceDocument::from_text("a\r\nb\nc\rd");
        assert_eq!(doc.line_count(), 4);
        let loc = doc.location(3);
        assert_eq!((loc.line_index, loc.character_index), (1, 0));
        let loc = doc.location(7);
        assert_eq!((loc.line_index, loc.character_index), (3, 0));
    }

    #[test]
    fn test_checksum_is_stable_and_content_based() {
        let a = SourceDocument::new("<p>hi</p>", Some("/a.cshtml".into()), None);
        let b = SourceDocument::new("<p>hi</p>", Some("/b.cshtml".into()), None);
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum_hex().len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_source_span_uses_character_columns() {
        let doc = SourceDocument::new("é\n  @x", Some("/x.cshtml".into()), None);
        let span = doc.source_span(TextSpan::new(5, 7));
        assert_eq!(span.line_index, 1);
        assert_eq!(span.character_index, 2);
        assert_eq!(span.length, 2);
        assert_eq!(span.file_path.as_deref(), Some("/x.cshtml"));
    }
}
