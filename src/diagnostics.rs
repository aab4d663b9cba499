use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::SourceSpan;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

// Syntax (RZ1xxx)
pub const RZ_UNTERMINATED_COMMENT: &str = "RZ1001";
pub const RZ_UNTERMINATED_TAG: &str = "RZ1002";
pub const RZ_MISSING_END_TAG: &str = "RZ1003";
pub const RZ_UNEXPECTED_END_TAG: &str = "RZ1004";
pub const RZ_UNTERMINATED_CODE_BLOCK: &str = "RZ1005";
pub const RZ_UNTERMINATED_EXPLICIT_EXPRESSION: &str = "RZ1006";
pub const RZ_UNTERMINATED_STRING: &str = "RZ1007";
pub const RZ_NESTING_TOO_DEEP: &str = "RZ1008";
pub const RZ_UNEXPECTED_TRANSITION: &str = "RZ1009";
pub const RZ_UNTERMINATED_ATTRIBUTE_VALUE: &str = "RZ1010";
pub const RZ_DIRECTIVE_EXPECTS_TOKEN: &str = "RZ1013";
pub const RZ_DIRECTIVE_EXPECTS_BLOCK: &str = "RZ1014";
pub const RZ_UNEXPECTED_DIRECTIVE_CONTENT: &str = "RZ1017";

// Directive semantics (RZ2xxx)
pub const RZ_DUPLICATE_DIRECTIVE: &str = "RZ2001";
pub const RZ_INVALID_TAG_HELPER_SPEC: &str = "RZ2002";
pub const RZ_INVALID_TAG_HELPER_PREFIX: &str = "RZ2003";
pub const RZ_SECTION_REDEFINED: &str = "RZ2004";
pub const RZ_INVALID_NESTED_TAG: &str = "RZ2010";

// Tag helpers (RZ3xxx)
pub const RZ_EMPTY_BOUND_ATTRIBUTE: &str = "RZ3001";
pub const RZ_MINIMIZED_BOUND_ATTRIBUTE: &str = "RZ3002";
pub const RZ_INDEXER_KEY_MISSING: &str = "RZ3003";
pub const RZ_TAG_STRUCTURE_MISMATCH: &str = "RZ3004";
pub const RZ_MALFORMED_TAG_HELPER: &str = "RZ3005";

/// Short, stable description of what a code means, independent of the instance message.
pub fn describe(code: &str) -> &'static str {
    match code {
        RZ_UNTERMINATED_COMMENT => "Comment is not terminated before the end of the document.",
        RZ_UNTERMINATED_TAG => "Tag is not terminated before the end of the document.",
        RZ_MISSING_END_TAG => "Element is missing its end tag.",
        RZ_UNEXPECTED_END_TAG => "End tag has no matching start tag.",
        RZ_UNTERMINATED_CODE_BLOCK => "Code block is missing its closing brace.",
        RZ_UNTERMINATED_EXPLICIT_EXPRESSION => {
            "Explicit expression is missing its closing parenthesis."
        }
        RZ_UNTERMINATED_STRING => "String literal is not terminated.",
        RZ_NESTING_TOO_DEEP => "Markup and code are nested too deeply to be parsed.",
        RZ_UNEXPECTED_TRANSITION => "A transition character is not followed by valid code.",
        RZ_UNTERMINATED_ATTRIBUTE_VALUE => "Attribute value quote is not closed.",
        RZ_DIRECTIVE_EXPECTS_TOKEN => "Directive is missing a required token.",
        RZ_DIRECTIVE_EXPECTS_BLOCK => "Directive requires a braced block.",
        RZ_UNEXPECTED_DIRECTIVE_CONTENT => "Directive has unexpected trailing content.",
        RZ_DUPLICATE_DIRECTIVE => "Directive may only occur once per document.",
        RZ_INVALID_TAG_HELPER_SPEC => "Tag helper directive value is malformed.",
        RZ_INVALID_TAG_HELPER_PREFIX => "Tag helper prefix contains invalid characters.",
        RZ_SECTION_REDEFINED => "Section is defined more than once.",
        RZ_INVALID_NESTED_TAG => "Child tag is not allowed by its parent tag helper.",
        RZ_EMPTY_BOUND_ATTRIBUTE => "Bound tag helper attribute requires a value.",
        RZ_MINIMIZED_BOUND_ATTRIBUTE => "Bound tag helper attribute cannot be minimized.",
        RZ_INDEXER_KEY_MISSING => "Indexer tag helper attribute is missing a key.",
        RZ_TAG_STRUCTURE_MISMATCH => "Tag helper element does not follow its tag structure.",
        RZ_MALFORMED_TAG_HELPER => "Tag helper element is malformed.",
        _ => "Unknown diagnostic.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A problem with user input. Recorded, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorDiagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub span: SourceSpan,
}

impl RazorDiagnostic {
    pub fn error(code: &str, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            message: message.into(),
            span,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Warning,
            message: message.into(),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn description(&self) -> &'static str {
        describe(&self.code)
    }
}

impl fmt::Display for RazorDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(
            f,
            "{}({},{}): {} {}: {}",
            self.span.file_path.as_deref().unwrap_or("<anonymous>"),
            self.span.line_index + 1,
            self.span.character_index + 1,
            severity,
            self.code,
            self.message
        )
    }
}

/// Orders diagnostics by source position, then code. Stable for equal keys.
pub fn sort_diagnostics(diagnostics: &mut [RazorDiagnostic]) {
    diagnostics.sort_by(|a, b| {
        a.span
            .absolute_index
            .cmp(&b.span.absolute_index)
            .then_with(|| a.code.cmp(&b.code))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_one_based() {
        let span = SourceSpan {
            file_path: Some("/Index.cshtml".into()),
            absolute_index: 4,
            line_index: 0,
            character_index: 4,
            length: 1,
        };
        let d = RazorDiagnostic::error(RZ_MISSING_END_TAG, "The \"p\" element was not closed.", span);
        assert_eq!(
            d.to_string(),
            "/Index.cshtml(1,5): error RZ1003: The \"p\" element was not closed."
        );
        assert_eq!(d.description(), "Element is missing its end tag.");
    }

    #[test]
    fn test_sort_by_position() {
        let at = |i| SourceSpan {
            absolute_index: i,
            ..Default::default()
        };
        let mut list = vec![
            RazorDiagnostic::error(RZ_UNTERMINATED_TAG, "b", at(10)),
            RazorDiagnostic::warning(RZ_UNTERMINATED_COMMENT, "a", at(2)),
        ];
        sort_diagnostics(&mut list);
        assert_eq!(list[0].message, "a");
    }
}
