//! Binder Module
//!
//! Matches markup elements against in-scope tag helper descriptors and
//! rewrites bound elements into `MarkupTagHelperElement` nodes carrying their
//! binding. Binding is a pure function of (tree, descriptors, prefix).

use std::collections::HashMap;
use std::sync::Arc;

use crate::diagnostics::*;
use crate::lexer::TokenKind;
use crate::syntax::{RazorSyntaxTree, SyntaxElement, SyntaxKind, SyntaxNode};
use crate::tag_helpers::{
    AttributeMatch, AttributeStructure, TagHelperAttributeBinding, TagHelperBinding,
    TagHelperCollection, TagHelperDescriptor, TagMatchingRuleDescriptor, TagMode, TagStructure,
    CATCH_ALL_TAG_NAME,
};

// ═══════════════════════════════════════════════════════════════════════════════
// BINDER INDEX
// ═══════════════════════════════════════════════════════════════════════════════

/// Tag name index over a descriptor collection. Candidates for a tag are the
/// exact-name entries plus the `*` entries, merged back into collection order.
#[derive(Debug, Clone)]
pub struct TagHelperBinder {
    prefix: Option<String>,
    descriptors: Vec<Arc<TagHelperDescriptor>>,
    by_tag: HashMap<String, Vec<usize>>,
    catch_all: Vec<usize>,
}

impl TagHelperBinder {
    pub fn new(prefix: Option<&str>, tag_helpers: &TagHelperCollection) -> Self {
        let mut by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        let mut catch_all = Vec::new();
        let descriptors: Vec<Arc<TagHelperDescriptor>> = tag_helpers.iter().cloned().collect();
        for (index, descriptor) in descriptors.iter().enumerate() {
            for rule in &descriptor.tag_matching_rules {
                if rule.tag_name == CATCH_ALL_TAG_NAME {
                    if catch_all.last() != Some(&index) {
                        catch_all.push(index);
                    }
                    continue;
                }
                let entry = by_tag.entry(rule.tag_name.to_ascii_lowercase()).or_default();
                if entry.last() != Some(&index) {
                    entry.push(index);
                }
            }
        }
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            descriptors,
            by_tag,
            catch_all,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Strips the prefix; `None` when a prefix is required and missing.
    fn strip_prefix<'t>(&self, tag_name: &'t str) -> Option<&'t str> {
        let Some(prefix) = &self.prefix else {
            return Some(tag_name);
        };
        let head = tag_name.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) || tag_name.len() == prefix.len() {
            return None;
        }
        Some(&tag_name[prefix.len()..])
    }

    fn candidates(&self, tag_name: &str) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .by_tag
            .get(&tag_name.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default();
        indices.extend(&self.catch_all);
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// The binding for one element, or `None` when nothing matches.
    pub fn get_binding(
        &self,
        tag_name: &str,
        attributes: Vec<TagHelperAttributeBinding>,
        parent_tag_name: Option<&str>,
        parent_is_tag_helper: bool,
        tag_mode: TagMode,
    ) -> Option<TagHelperBinding> {
        let name = self.strip_prefix(tag_name)?;
        let parent = parent_tag_name.map(|p| {
            if parent_is_tag_helper {
                self.strip_prefix(p).unwrap_or(p)
            } else {
                p
            }
        });

        let mut descriptors = Vec::new();
        let mut matched_rules = Vec::new();
        for index in self.candidates(name) {
            let descriptor = &self.descriptors[index];
            let rule = descriptor
                .tag_matching_rules
                .iter()
                .position(|rule| rule_matches(rule, name, parent, &attributes));
            if let Some(rule) = rule {
                descriptors.push(descriptor.clone());
                matched_rules.push(rule);
            }
        }
        if descriptors.is_empty() {
            return None;
        }

        let attributes = attributes
            .into_iter()
            .map(|mut attribute| {
                attribute.matches = descriptors
                    .iter()
                    .filter_map(|d| match_attribute(d, &attribute.name))
                    .collect();
                attribute
            })
            .collect();

        Some(TagHelperBinding {
            tag_name: tag_name.to_string(),
            prefix: self.prefix.clone(),
            parent_tag_name: parent_tag_name.map(str::to_string),
            tag_mode,
            descriptors,
            matched_rules,
            attributes,
        })
    }
}

fn rule_matches(
    rule: &TagMatchingRuleDescriptor,
    tag_name: &str,
    parent_tag_name: Option<&str>,
    attributes: &[TagHelperAttributeBinding],
) -> bool {
    let tag_ok = rule.tag_name == CATCH_ALL_TAG_NAME || rule.tag_name.eq_ignore_ascii_case(tag_name);
    let parent_ok = match &rule.parent_tag {
        Some(required) => parent_tag_name.map_or(false, |p| p.eq_ignore_ascii_case(required)),
        None => true,
    };
    tag_ok
        && parent_ok
        && rule.attributes.iter().all(|required| {
            attributes
                .iter()
                .any(|a| required.is_satisfied_by(&a.name, a.value.as_deref()))
        })
}

/// Exact name beats any indexer prefix.
fn match_attribute(descriptor: &Arc<TagHelperDescriptor>, name: &str) -> Option<AttributeMatch> {
    let exact = descriptor
        .bound_attributes
        .iter()
        .position(|b| b.name.eq_ignore_ascii_case(name));
    if let Some(index) = exact {
        return Some(AttributeMatch {
            descriptor: descriptor.clone(),
            bound_attribute: index,
            is_indexer: false,
        });
    }
    descriptor
        .bound_attributes
        .iter()
        .position(|b| {
            b.indexer_name_prefix.as_deref().map_or(false, |prefix| {
                name.get(..prefix.len())
                    .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
            })
        })
        .map(|index| AttributeMatch {
            descriptor: descriptor.clone(),
            bound_attribute: index,
            is_indexer: true,
        })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE REWRITE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TagHelperRewriteResult {
    pub tree: RazorSyntaxTree,
    /// Descriptors bound to at least one element, in collection order.
    pub referenced: TagHelperCollection,
}

/// Rewrites every bindable element of `tree`. Unchanged subtrees are shared.
pub fn compute_bindings(
    tree: &RazorSyntaxTree,
    tag_helpers: &TagHelperCollection,
    prefix: Option<&str>,
) -> TagHelperRewriteResult {
    if tag_helpers.is_empty() {
        return TagHelperRewriteResult {
            tree: tree.clone(),
            referenced: TagHelperCollection::new(),
        };
    }
    let mut rewriter = Rewriter {
        binder: TagHelperBinder::new(prefix, tag_helpers),
        tree,
        used: vec![false; tag_helpers.len()],
        allow_minimized_booleans: tree
            .options()
            .feature_flags
            .allow_minimized_boolean_tag_helper_attributes,
    };
    let root = rewriter.rewrite(tree.root(), None);
    let referenced = TagHelperCollection::from_shared(
        tag_helpers
            .iter()
            .zip(&rewriter.used)
            .filter(|(_, &used)| used)
            .map(|(d, _)| d.clone()),
    );
    let tree = if root.ptr_eq(tree.root()) {
        tree.clone()
    } else {
        tree.with_root(root)
    };
    TagHelperRewriteResult { tree, referenced }
}

struct Rewriter<'a> {
    binder: TagHelperBinder,
    tree: &'a RazorSyntaxTree,
    used: Vec<bool>,
    allow_minimized_booleans: bool,
}

/// Enclosing element name and whether it is a tag helper.
type Parent<'p> = Option<(&'p str, bool)>;

impl<'a> Rewriter<'a> {
    fn rewrite(&mut self, node: &SyntaxNode, parent: Parent<'_>) -> SyntaxNode {
        if node.kind() == SyntaxKind::MarkupElement && !node.is_opt_out() {
            if let Some(tag_name) = node.start_tag().and(node.tag_name()) {
                return self.rewrite_element(node, tag_name, parent);
            }
        }
        self.rewrite_children(node, parent)
    }

    fn rewrite_children(&mut self, node: &SyntaxNode, parent: Parent<'_>) -> SyntaxNode {
        let mut changed = false;
        let children: Vec<SyntaxElement> = node
            .children()
            .iter()
            .map(|child| match child {
                SyntaxElement::Node(n) => {
                    let rewritten = self.rewrite(n, parent);
                    changed |= !rewritten.ptr_eq(n);
                    rewritten.into()
                }
                SyntaxElement::Token(_) => child.clone(),
            })
            .collect();
        if changed {
            node.with_children(children)
        } else {
            node.clone()
        }
    }

    fn rewrite_element(
        &mut self,
        element: &SyntaxNode,
        tag_name: &str,
        parent: Parent<'_>,
    ) -> SyntaxNode {
        let tag_mode = if element.is_self_closing() {
            TagMode::SelfClosing
        } else if element.end_tag().is_none() {
            TagMode::StartTagOnly
        } else {
            TagMode::StartTagAndEndTag
        };
        let attributes = element
            .attributes()
            .into_iter()
            .map(attribute_binding)
            .collect();
        let binding = self.binder.get_binding(
            tag_name,
            attributes,
            parent.map(|(name, _)| name),
            parent.map_or(false, |(_, is_tag_helper)| is_tag_helper),
            tag_mode,
        );
        let Some(mut binding) = binding else {
            return self.rewrite_children(element, Some((tag_name, false)));
        };

        for descriptor in &binding.descriptors {
            if let Some(index) = self.binder.descriptors.iter().position(|d| Arc::ptr_eq(d, descriptor)) {
                self.used[index] = true;
            }
        }

        let mut diagnostics = Vec::new();
        for (descriptor, &rule) in binding.descriptors.iter().zip(&binding.matched_rules) {
            let structure = descriptor.tag_matching_rules[rule].tag_structure;
            if structure == TagStructure::WithoutEndTag && tag_mode == TagMode::StartTagAndEndTag {
                let span = element.end_tag().map_or(element.span(), |t| t.span());
                diagnostics.push(self.error(
                    RZ_TAG_STRUCTURE_MISMATCH,
                    format!(
                        "Found an end tag (</{}>) for tag helper '{}' with tag structure that disallows an end tag ('WithoutEndTag').",
                        tag_name, descriptor.display_name
                    ),
                    span,
                ));
            }
        }

        let attribute_nodes = element.attributes();
        let mut attribute_diagnostics: Vec<Vec<RazorDiagnostic>> = Vec::new();
        for (attribute, node) in binding.attributes.iter_mut().zip(&attribute_nodes) {
            let found = self.validate_attribute(tag_name, attribute, node);
            if !found.is_empty() {
                attribute.matches.clear();
            }
            attribute_diagnostics.push(found);
        }

        let child_parent = Some((tag_name, true));
        let mut children = Vec::with_capacity(element.children().len());
        for child in element.children() {
            match child {
                SyntaxElement::Node(n) if n.kind() == SyntaxKind::MarkupStartTag => {
                    children.push(annotate_attributes(n, &attribute_diagnostics).into());
                }
                SyntaxElement::Node(n) if n.kind() == SyntaxKind::MarkupEndTag => {
                    children.push(child.clone());
                }
                SyntaxElement::Node(n) => {
                    children.push(self.rewrite(n, child_parent).into());
                }
                SyntaxElement::Token(_) => children.push(child.clone()),
            }
        }
        diagnostics.extend(self.validate_children(tag_name, &binding, &children));

        element
            .with_children(children)
            .with_binding(SyntaxKind::MarkupTagHelperElement, Arc::new(binding))
            .with_diagnostics(diagnostics)
    }

    fn error(&self, code: &str, message: String, span: crate::source::TextSpan) -> RazorDiagnostic {
        RazorDiagnostic::error(code, message, self.tree.source().source_span(span))
    }

    fn validate_attribute(
        &self,
        tag_name: &str,
        attribute: &TagHelperAttributeBinding,
        node: &SyntaxNode,
    ) -> Vec<RazorDiagnostic> {
        let mut found = Vec::new();
        for m in &attribute.matches {
            let bound = m.attribute();
            let boolean = if m.is_indexer {
                bound.is_indexer_boolean_property()
            } else {
                bound.is_boolean_property()
            };
            let string = if m.is_indexer {
                bound.is_indexer_string_property()
            } else {
                bound.is_string_property()
            };
            let type_name = if m.is_indexer {
                bound.indexer_type_name.as_deref().unwrap_or_default()
            } else {
                bound.type_name.as_str()
            };

            if m.is_indexer
                && bound
                    .indexer_name_prefix
                    .as_deref()
                    .map_or(false, |p| p.len() == attribute.name.len())
            {
                found.push(self.error(
                    RZ_INDEXER_KEY_MISSING,
                    format!(
                        "The tag helper attribute '{}' in element '{}' is missing a key. The syntax is '<{} {}{{ key }}=\"value\">'.",
                        attribute.name, tag_name, tag_name, attribute.name
                    ),
                    node.span(),
                ));
                continue;
            }
            if attribute.structure == AttributeStructure::Minimized {
                if !(boolean && self.allow_minimized_booleans) {
                    found.push(self.error(
                        RZ_MINIMIZED_BOUND_ATTRIBUTE,
                        format!(
                            "Attribute '{}' on tag helper element '{}' requires a value. Tag helper bound attributes of type '{}' cannot be empty or contain only whitespace.",
                            attribute.name, tag_name, type_name
                        ),
                        node.span(),
                    ));
                }
                continue;
            }
            let empty = attribute.value.as_deref().map_or(true, |v| v.trim().is_empty());
            if empty && !string {
                found.push(self.error(
                    RZ_EMPTY_BOUND_ATTRIBUTE,
                    format!(
                        "Attribute '{}' on tag helper element '{}' requires a value. Tag helper bound attributes of type '{}' cannot be empty or contain only whitespace.",
                        attribute.name, tag_name, type_name
                    ),
                    node.span(),
                ));
            }
        }
        found.dedup_by(|a, b| a.code == b.code);
        found
    }

    fn validate_children(
        &self,
        tag_name: &str,
        binding: &TagHelperBinding,
        children: &[SyntaxElement],
    ) -> Vec<RazorDiagnostic> {
        let allowed: Vec<&str> = binding
            .descriptors
            .iter()
            .flat_map(|d| d.allowed_child_tags.iter().map(String::as_str))
            .collect();
        if allowed.is_empty() {
            return Vec::new();
        }
        children
            .iter()
            .filter_map(SyntaxElement::as_node)
            .filter(|n| {
                matches!(
                    n.kind(),
                    SyntaxKind::MarkupElement | SyntaxKind::MarkupTagHelperElement
                )
            })
            .filter_map(|n| {
                let child = n.tag_name()?;
                let unprefixed = self.binder.strip_prefix(child).unwrap_or(child);
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(unprefixed)) {
                    return None;
                }
                Some(self.error(
                    RZ_INVALID_NESTED_TAG,
                    format!(
                        "The <{}> tag is not allowed by parent <{}> tag helper. Only child tags with name(s) '{}' are allowed.",
                        child,
                        tag_name,
                        allowed.join(", ")
                    ),
                    n.span(),
                ))
            })
            .collect()
    }
}

/// Name, literal value and quoting of one attribute node.
fn attribute_binding(node: &SyntaxNode) -> TagHelperAttributeBinding {
    let name = node.attribute_name().unwrap_or_default().to_string();
    if node.kind() == SyntaxKind::MarkupMinimizedAttributeBlock {
        return TagHelperAttributeBinding {
            name,
            value: None,
            structure: AttributeStructure::Minimized,
            matches: Vec::new(),
        };
    }
    let (value, structure) = match node.attribute_value() {
        Some(value) => attribute_value_text(value),
        None => (String::new(), AttributeStructure::NoQuotes),
    };
    TagHelperAttributeBinding {
        name,
        value: Some(value),
        structure,
        matches: Vec::new(),
    }
}

/// Value text without its quotes.
pub(crate) fn attribute_value_text(value: &SyntaxNode) -> (String, AttributeStructure) {
    let structure = match value.first_token().map(|t| t.kind) {
        Some(TokenKind::DoubleQuote) => AttributeStructure::DoubleQuotes,
        Some(TokenKind::SingleQuote) => AttributeStructure::SingleQuotes,
        _ => AttributeStructure::NoQuotes,
    };
    let inner: String = value
        .children()
        .iter()
        .filter(|c| {
            !matches!(
                c.as_token().map(|t| t.kind),
                Some(TokenKind::DoubleQuote) | Some(TokenKind::SingleQuote)
            )
        })
        .map(|c| match c {
            SyntaxElement::Node(n) => n.text(),
            SyntaxElement::Token(t) => t.text.clone(),
        })
        .collect();
    (inner, structure)
}

/// Attaches per-attribute diagnostics to the attribute nodes of a start tag.
fn annotate_attributes(start_tag: &SyntaxNode, diagnostics: &[Vec<RazorDiagnostic>]) -> SyntaxNode {
    if diagnostics.iter().all(Vec::is_empty) {
        return start_tag.clone();
    }
    let mut attribute_index = 0;
    let children = start_tag
        .children()
        .iter()
        .map(|child| match child {
            SyntaxElement::Node(n)
                if matches!(
                    n.kind(),
                    SyntaxKind::MarkupAttributeBlock | SyntaxKind::MarkupMinimizedAttributeBlock
                ) =>
            {
                let found = diagnostics.get(attribute_index).cloned().unwrap_or_default();
                attribute_index += 1;
                n.with_diagnostics(found).into()
            }
            _ => child.clone(),
        })
        .collect();
    start_tag.with_children(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag_helpers::{BoundAttributeDescriptor, RequiredAttributeDescriptor};

    fn unbound(name: &str, value: Option<&str>) -> TagHelperAttributeBinding {
        TagHelperAttributeBinding {
            name: name.to_string(),
            value: value.map(str::to_string),
            structure: if value.is_some() {
                AttributeStructure::DoubleQuotes
            } else {
                AttributeStructure::Minimized
            },
            matches: Vec::new(),
        }
    }

    fn collection() -> TagHelperCollection {
        TagHelperCollection::create(vec![
            TagHelperDescriptor::new("CatchAll", "A").with_rule(
                TagMatchingRuleDescriptor::for_tag("*")
                    .with_attribute(RequiredAttributeDescriptor::named("catch")),
            ),
            TagHelperDescriptor::new("Anchor", "A")
                .with_rule(TagMatchingRuleDescriptor::for_tag("a"))
                .with_bound_attribute(BoundAttributeDescriptor::new(
                    "asp-route",
                    "Route",
                    "System.String",
                ))
                .with_bound_attribute(
                    BoundAttributeDescriptor::new(
                        "asp-all-route-data",
                        "RouteValues",
                        "System.Collections.Generic.IDictionary<System.String, System.String>",
                    )
                    .with_indexer("asp-route-", "System.String"),
                ),
            TagHelperDescriptor::new("ListItem", "A")
                .with_rule(TagMatchingRuleDescriptor::for_tag("li").with_parent("ul")),
        ])
    }

    #[test]
    fn test_candidates_follow_collection_order() {
        let binder = TagHelperBinder::new(None, &collection());
        let binding = binder
            .get_binding(
                "a",
                vec![unbound("catch", Some("x"))],
                None,
                false,
                TagMode::StartTagAndEndTag,
            )
            .unwrap();
        let names: Vec<&str> = binding.descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["CatchAll", "Anchor"]);
    }

    #[test]
    fn test_exact_attribute_beats_indexer() {
        let binder = TagHelperBinder::new(None, &collection());
        let binding = binder
            .get_binding(
                "a",
                vec![unbound("asp-route", Some("x")), unbound("asp-route-id", Some("1"))],
                None,
                false,
                TagMode::StartTagAndEndTag,
            )
            .unwrap();
        assert!(!binding.attributes[0].matches[0].is_indexer);
        assert_eq!(binding.attributes[0].matches[0].attribute().property_name, "Route");
        assert!(binding.attributes[1].matches[0].is_indexer);
    }

    #[test]
    fn test_parent_rule() {
        let binder = TagHelperBinder::new(None, &collection());
        assert!(binder
            .get_binding("li", Vec::new(), Some("ol"), false, TagMode::StartTagAndEndTag)
            .is_none());
        assert!(binder
            .get_binding("li", Vec::new(), Some("UL"), false, TagMode::StartTagAndEndTag)
            .is_some());
    }

    #[test]
    fn test_prefix_is_required_and_stripped() {
        let binder = TagHelperBinder::new(Some("th:"), &collection());
        assert!(binder
            .get_binding("a", Vec::new(), None, false, TagMode::StartTagAndEndTag)
            .is_none());
        let binding = binder
            .get_binding("th:a", Vec::new(), None, false, TagMode::StartTagAndEndTag)
            .unwrap();
        assert_eq!(binding.tag_name, "th:a");
        assert_eq!(binding.descriptors.len(), 1);
        assert!(binder
            .get_binding("th:", Vec::new(), None, false, TagMode::StartTagAndEndTag)
            .is_none());
    }
}
