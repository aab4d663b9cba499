//! Discovery Module
//!
//! Resolves which tag helpers a document can see. `@addTagHelper`,
//! `@removeTagHelper` and `@tagHelperPrefix` are applied in source order,
//! imports first, against the project's descriptor collection.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use crate::diagnostics::*;
use crate::directives::{ADD_TAG_HELPER, REMOVE_TAG_HELPER, TAG_HELPER_PREFIX};
use crate::syntax::RazorSyntaxTree;
use crate::tag_helpers::{TagHelperCollection, TagHelperDescriptor, TagHelperDocumentContext};

lazy_static! {
    static ref LOOKUP_TEXT: Regex = Regex::new(r"^\s*([^,]*?)\s*,\s*(.*?)\s*$").unwrap();
}

const INVALID_PREFIX_CHARS: &[char] = &[
    '!', '@', '/', '<', '?', '[', '>', ']', '=', '"', '\'', '*',
];

// ═══════════════════════════════════════════════════════════════════════════════
// LOOKUP SPECS
// ═══════════════════════════════════════════════════════════════════════════════

/// Parsed `"TypePattern, AssemblyName"` value of an add/remove directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInfo {
    pub type_pattern: String,
    pub assembly_name: String,
}

impl LookupInfo {
    pub fn parse(value: &str) -> Option<Self> {
        let value = strip_quotes(value)?;
        let captures = LOOKUP_TEXT.captures(value)?;
        let type_pattern = captures.get(1)?.as_str();
        let assembly_name = captures.get(2)?.as_str();
        if type_pattern.is_empty() || assembly_name.is_empty() {
            return None;
        }
        Some(Self {
            type_pattern: type_pattern.to_string(),
            assembly_name: assembly_name.to_string(),
        })
    }

    pub fn matches(&self, descriptor: &TagHelperDescriptor) -> bool {
        if descriptor.assembly_name != self.assembly_name {
            return false;
        }
        if self.type_pattern == "*" {
            return true;
        }
        match self.type_pattern.strip_suffix('*') {
            Some(prefix) => descriptor.name.starts_with(prefix),
            None => descriptor.name == self.type_pattern,
        }
    }
}

/// `None` for a quote that opens without closing.
fn strip_quotes(value: &str) -> Option<&str> {
    let value = value.trim();
    match value.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"'),
        None => Some(value),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub context: TagHelperDocumentContext,
    pub diagnostics: Vec<RazorDiagnostic>,
}

/// Applies the tag helper directives of `imports` then `document` to
/// `tag_helpers`. The in-scope set keeps collection order.
pub fn discover(
    imports: &[RazorSyntaxTree],
    document: &RazorSyntaxTree,
    tag_helpers: &TagHelperCollection,
) -> DiscoveryResult {
    let mut in_scope = vec![false; tag_helpers.len()];
    let mut prefix: Option<String> = None;
    let mut diagnostics = Vec::new();

    for tree in imports.iter().chain(std::iter::once(document)) {
        for directive in tree.directives() {
            let Some(name) = directive.directive_name() else {
                continue;
            };
            if name != ADD_TAG_HELPER && name != REMOVE_TAG_HELPER && name != TAG_HELPER_PREFIX {
                continue;
            }
            let Some(token) = directive.directive_tokens().first().map(|t| (*t).clone()) else {
                continue;
            };
            let value = token.text();
            let span = tree.source().source_span(token.span());

            if name == TAG_HELPER_PREFIX {
                let Some(value) = strip_quotes(&value) else {
                    diagnostics.push(RazorDiagnostic::error(
                        RZ_INVALID_TAG_HELPER_PREFIX,
                        "The tag helper prefix value is missing its closing quote.",
                        span,
                    ));
                    continue;
                };
                if let Some(invalid) = value
                    .chars()
                    .find(|c| c.is_whitespace() || INVALID_PREFIX_CHARS.contains(c))
                {
                    diagnostics.push(RazorDiagnostic::error(
                        RZ_INVALID_TAG_HELPER_PREFIX,
                        format!(
                            "Invalid tag helper directive '{}' value. '{}' is not allowed in prefix '{}'.",
                            TAG_HELPER_PREFIX, invalid, value
                        ),
                        span,
                    ));
                    continue;
                }
                prefix = (!value.is_empty()).then(|| value.to_string());
                continue;
            }

            let Some(lookup) = LookupInfo::parse(&value) else {
                diagnostics.push(RazorDiagnostic::error(
                    RZ_INVALID_TAG_HELPER_SPEC,
                    format!(
                        "Invalid tag helper directive look up text '{}'. The correct look up text format is: \"name, assemblyName\".",
                        value.trim()
                    ),
                    span,
                ));
                continue;
            };
            let add = name == ADD_TAG_HELPER;
            for (flag, descriptor) in in_scope.iter_mut().zip(tag_helpers.iter()) {
                if lookup.matches(descriptor) {
                    *flag = add;
                }
            }
        }
    }

    let visible = TagHelperCollection::from_shared(
        tag_helpers
            .iter()
            .zip(&in_scope)
            .filter(|(_, &visible)| visible)
            .map(|(d, _)| d.clone()),
    );
    log::trace!(
        "{} of {} tag helpers in scope for {}",
        visible.len(),
        tag_helpers.len(),
        document.source().file_path().unwrap_or("<anonymous>")
    );
    DiscoveryResult {
        context: TagHelperDocumentContext::new(prefix, Arc::new(visible)),
        diagnostics,
    }
}
