//! Directive descriptors and the registry the parser is driven by.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ADD_TAG_HELPER: &str = "addTagHelper";
pub const REMOVE_TAG_HELPER: &str = "removeTagHelper";
pub const TAG_HELPER_PREFIX: &str = "tagHelperPrefix";
pub const USING: &str = "using";
pub const FUNCTIONS: &str = "functions";
pub const INHERITS: &str = "inherits";
pub const SECTION: &str = "section";
pub const MODEL: &str = "model";
pub const INJECT: &str = "inject";
pub const NAMESPACE: &str = "namespace";
pub const PAGE: &str = "page";
pub const IMPLEMENTS: &str = "implements";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveKind {
    /// Tokens up to and including the end of the line.
    SingleLine,
    /// Tokens followed by a braced block of markup.
    RazorBlock,
    /// Tokens followed by a braced block of code.
    CodeBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveUsage {
    Unrestricted,
    FileScopedSinglyOccurring,
    FileScopedMultipleOccurring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectiveTokenKind {
    Type,
    Member,
    Namespace,
    String,
    Attribute,
    Boolean,
    /// Remainder of the line, quotes optional.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveTokenDescriptor {
    pub kind: DirectiveTokenKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub name: Option<String>,
}

impl DirectiveTokenDescriptor {
    pub fn required(kind: DirectiveTokenKind, name: &str) -> Self {
        Self {
            kind,
            optional: false,
            name: Some(name.to_string()),
        }
    }

    pub fn optional(kind: DirectiveTokenKind, name: &str) -> Self {
        Self {
            kind,
            optional: true,
            name: Some(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveDescriptor {
    pub directive: String,
    pub kind: DirectiveKind,
    pub usage: DirectiveUsage,
    pub tokens: Vec<DirectiveTokenDescriptor>,
    #[serde(default)]
    pub description: String,
}

impl DirectiveDescriptor {
    pub fn single_line(directive: &str, tokens: Vec<DirectiveTokenDescriptor>) -> Self {
        Self::create(directive, DirectiveKind::SingleLine, tokens)
    }

    pub fn code_block(directive: &str, tokens: Vec<DirectiveTokenDescriptor>) -> Self {
        Self::create(directive, DirectiveKind::CodeBlock, tokens)
    }

    pub fn razor_block(directive: &str, tokens: Vec<DirectiveTokenDescriptor>) -> Self {
        Self::create(directive, DirectiveKind::RazorBlock, tokens)
    }

    fn create(directive: &str, kind: DirectiveKind, tokens: Vec<DirectiveTokenDescriptor>) -> Self {
        Self {
            directive: directive.to_string(),
            kind,
            usage: DirectiveUsage::Unrestricted,
            tokens,
            description: String::new(),
        }
    }

    pub fn with_usage(mut self, usage: DirectiveUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-IN DIRECTIVES
// ═══════════════════════════════════════════════════════════════════════════════

use DirectiveTokenKind as T;

pub fn add_tag_helper_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        ADD_TAG_HELPER,
        vec![DirectiveTokenDescriptor::required(T::Text, "TagHelperSpec")],
    )
    .with_description("Register tag helpers from an assembly.")
}

pub fn remove_tag_helper_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        REMOVE_TAG_HELPER,
        vec![DirectiveTokenDescriptor::required(T::Text, "TagHelperSpec")],
    )
    .with_description("Remove previously registered tag helpers.")
}

pub fn tag_helper_prefix_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        TAG_HELPER_PREFIX,
        vec![DirectiveTokenDescriptor::required(T::Text, "Prefix")],
    )
    .with_description("Require a prefix on tag helper elements.")
}

pub fn using_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        USING,
        vec![DirectiveTokenDescriptor::required(T::Text, "Namespace")],
    )
}

pub fn functions_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::code_block(FUNCTIONS, vec![])
        .with_description("Members added to the generated class.")
}

pub fn inherits_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        INHERITS,
        vec![DirectiveTokenDescriptor::required(T::Type, "TypeName")],
    )
    .with_usage(DirectiveUsage::FileScopedSinglyOccurring)
}

pub fn section_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::razor_block(
        SECTION,
        vec![DirectiveTokenDescriptor::required(T::Member, "SectionName")],
    )
}

pub fn model_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        MODEL,
        vec![DirectiveTokenDescriptor::required(T::Type, "TypeName")],
    )
    .with_usage(DirectiveUsage::FileScopedSinglyOccurring)
}

pub fn inject_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        INJECT,
        vec![
            DirectiveTokenDescriptor::required(T::Type, "TypeName"),
            DirectiveTokenDescriptor::required(T::Member, "PropertyName"),
        ],
    )
    .with_usage(DirectiveUsage::FileScopedMultipleOccurring)
}

pub fn namespace_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        NAMESPACE,
        vec![DirectiveTokenDescriptor::required(T::Namespace, "Namespace")],
    )
    .with_usage(DirectiveUsage::FileScopedSinglyOccurring)
}

pub fn page_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        PAGE,
        vec![DirectiveTokenDescriptor::optional(T::String, "RouteTemplate")],
    )
    .with_usage(DirectiveUsage::FileScopedSinglyOccurring)
}

pub fn implements_directive() -> DirectiveDescriptor {
    DirectiveDescriptor::single_line(
        IMPLEMENTS,
        vec![DirectiveTokenDescriptor::required(T::Type, "TypeName")],
    )
    .with_usage(DirectiveUsage::FileScopedMultipleOccurring)
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Name -> descriptor, preserving registration order. Re-registering a name replaces it in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveRegistry {
    descriptors: Vec<DirectiveDescriptor>,
    index: HashMap<String, usize>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directives every legacy document understands.
    pub fn legacy() -> Self {
        let mut registry = Self::new();
        registry.register(add_tag_helper_directive());
        registry.register(remove_tag_helper_directive());
        registry.register(tag_helper_prefix_directive());
        registry.register(using_directive());
        registry.register(functions_directive());
        registry.register(inherits_directive());
        registry.register(section_directive());
        registry
    }

    pub fn register(&mut self, descriptor: DirectiveDescriptor) {
        match self.index.get(&descriptor.directive) {
            Some(&i) => self.descriptors[i] = descriptor,
            None => {
                self.index
                    .insert(descriptor.directive.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&DirectiveDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<DirectiveKind> {
        self.get(name).map(|d| d.kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectiveDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref MEMBER_RE: Regex = Regex::new(r"^@?[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref NAMESPACE_RE: Regex =
        Regex::new(r"^@?[A-Za-z_][A-Za-z0-9_]*(\.@?[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref TYPE_RE: Regex =
        Regex::new(r"^(global::)?(@?[A-Za-z_(][A-Za-z0-9_.,:<>\[\]()?\s]*)$").unwrap();
    static ref STRING_RE: Regex = Regex::new(r#"^"([^"\\]|\\.)*"$"#).unwrap();
    static ref ATTRIBUTE_RE: Regex = Regex::new(r"^\[.*\]$").unwrap();
}

/// Whether `content` is an acceptable value for a token of `kind`.
pub fn validate_token(kind: DirectiveTokenKind, content: &str) -> bool {
    match kind {
        DirectiveTokenKind::Member => MEMBER_RE.is_match(content),
        DirectiveTokenKind::Namespace => NAMESPACE_RE.is_match(content),
        DirectiveTokenKind::Type => TYPE_RE.is_match(content) && balanced_generics(content),
        DirectiveTokenKind::String => STRING_RE.is_match(content),
        DirectiveTokenKind::Attribute => ATTRIBUTE_RE.is_match(content),
        DirectiveTokenKind::Boolean => content == "true" || content == "false",
        DirectiveTokenKind::Text => !content.trim().is_empty(),
    }
}

fn balanced_generics(content: &str) -> bool {
    let mut depth: i32 = 0;
    for c in content.chars() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_replaces_in_place() {
        let mut registry = DirectiveRegistry::legacy();
        let before = registry.len();
        registry.register(
            DirectiveDescriptor::single_line(USING, vec![]).with_description("custom"),
        );
        assert_eq!(registry.len(), before);
        assert_eq!(registry.get(USING).unwrap().description, "custom");
        assert_eq!(registry.kind_of(SECTION), Some(DirectiveKind::RazorBlock));
        assert!(!registry.contains(MODEL));
    }

    #[test]
    fn test_token_validation() {
        assert!(validate_token(T::Member, "Scripts"));
        assert!(!validate_token(T::Member, "1abc"));
        assert!(validate_token(T::Namespace, "My.App.Views"));
        assert!(validate_token(T::Type, "List<Dictionary<string, int>>"));
        assert!(validate_token(T::Type, "global::Foo.Bar?"));
        assert!(!validate_token(T::Type, "List<int"));
        assert!(validate_token(T::String, "\"/route/{id}\""));
        assert!(!validate_token(T::String, "route"));
        assert!(validate_token(T::Boolean, "true"));
    }
}
