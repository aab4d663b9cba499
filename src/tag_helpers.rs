//! Tag helper descriptors, collections and bindings.
//!
//! Descriptors arrive from outside the compiler and are compared by value.
//! A `TagHelperCollection` is shared read-only between documents.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const TAG_HELPER_KIND: &str = "ITagHelper";
pub const CATCH_ALL_TAG_NAME: &str = "*";

/// Metadata key naming the runtime type that implements a descriptor.
pub const METADATA_TYPE_NAME: &str = "Common.TypeName";
/// Metadata key marking a descriptor generated for a view component.
pub const METADATA_VIEW_COMPONENT_NAME: &str = "MVC.ViewComponent.Name";

pub const BOOLEAN_TYPE_NAME: &str = "System.Boolean";
pub const STRING_TYPE_NAME: &str = "System.String";

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TagStructure {
    #[default]
    Unspecified,
    NormalOrSelfClosing,
    WithoutEndTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NameComparisonMode {
    #[default]
    FullMatch,
    PrefixMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueComparisonMode {
    #[default]
    None,
    FullMatch,
    PrefixMatch,
    SuffixMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredAttributeDescriptor {
    pub name: String,
    #[serde(default)]
    pub name_comparison: NameComparisonMode,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_comparison: ValueComparisonMode,
}

impl RequiredAttributeDescriptor {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            name_comparison: NameComparisonMode::FullMatch,
            value: None,
            value_comparison: ValueComparisonMode::None,
        }
    }

    /// Attribute names compare case-insensitively; values case-sensitively.
    pub fn is_satisfied_by(&self, name: &str, value: Option<&str>) -> bool {
        let name_matches = match self.name_comparison {
            NameComparisonMode::FullMatch => name.eq_ignore_ascii_case(&self.name),
            NameComparisonMode::PrefixMatch => {
                name.len() > self.name.len()
                    && name
                        .get(..self.name.len())
                        .map_or(false, |p| p.eq_ignore_ascii_case(&self.name))
            }
        };
        if !name_matches {
            return false;
        }
        let expected = self.value.as_deref().unwrap_or_default();
        let actual = value.unwrap_or_default();
        match self.value_comparison {
            ValueComparisonMode::None => true,
            ValueComparisonMode::FullMatch => actual == expected,
            ValueComparisonMode::PrefixMatch => actual.starts_with(expected),
            ValueComparisonMode::SuffixMatch => actual.ends_with(expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMatchingRuleDescriptor {
    pub tag_name: String,
    #[serde(default)]
    pub parent_tag: Option<String>,
    #[serde(default)]
    pub tag_structure: TagStructure,
    #[serde(default)]
    pub attributes: Vec<RequiredAttributeDescriptor>,
}

impl TagMatchingRuleDescriptor {
    pub fn for_tag(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_string(),
            parent_tag: None,
            tag_structure: TagStructure::Unspecified,
            attributes: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent_tag = Some(parent.to_string());
        self
    }

    pub fn with_attribute(mut self, attribute: RequiredAttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_structure(mut self, structure: TagStructure) -> Self {
        self.tag_structure = structure;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundAttributeDescriptor {
    pub name: String,
    pub property_name: String,
    pub type_name: String,
    #[serde(default)]
    pub is_enum: bool,
    /// Attributes starting with this prefix bind to the dictionary property.
    #[serde(default)]
    pub indexer_name_prefix: Option<String>,
    #[serde(default)]
    pub indexer_type_name: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BoundAttributeDescriptor {
    pub fn new(name: &str, property_name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            property_name: property_name.to_string(),
            type_name: type_name.to_string(),
            is_enum: false,
            indexer_name_prefix: None,
            indexer_type_name: None,
            documentation: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_indexer(mut self, prefix: &str, value_type_name: &str) -> Self {
        self.indexer_name_prefix = Some(prefix.to_string());
        self.indexer_type_name = Some(value_type_name.to_string());
        self
    }

    pub fn is_boolean_property(&self) -> bool {
        self.type_name == BOOLEAN_TYPE_NAME
    }

    pub fn is_string_property(&self) -> bool {
        self.type_name == STRING_TYPE_NAME
    }

    pub fn is_indexer_boolean_property(&self) -> bool {
        self.indexer_type_name.as_deref() == Some(BOOLEAN_TYPE_NAME)
    }

    pub fn is_indexer_string_property(&self) -> bool {
        self.indexer_type_name.as_deref() == Some(STRING_TYPE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagHelperDescriptor {
    pub kind: String,
    /// Type name, e.g. `TestNamespace.PTagHelper`.
    pub name: String,
    pub assembly_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub tag_output_hint: Option<String>,
    #[serde(default)]
    pub tag_matching_rules: Vec<TagMatchingRuleDescriptor>,
    #[serde(default)]
    pub bound_attributes: Vec<BoundAttributeDescriptor>,
    #[serde(default)]
    pub allowed_child_tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TagHelperDescriptor {
    pub fn new(name: &str, assembly_name: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_TYPE_NAME.to_string(), name.to_string());
        Self {
            kind: TAG_HELPER_KIND.to_string(),
            name: name.to_string(),
            assembly_name: assembly_name.to_string(),
            display_name: name.to_string(),
            documentation: None,
            tag_output_hint: None,
            tag_matching_rules: Vec::new(),
            bound_attributes: Vec::new(),
            allowed_child_tags: Vec::new(),
            metadata,
        }
    }

    pub fn with_rule(mut self, rule: TagMatchingRuleDescriptor) -> Self {
        self.tag_matching_rules.push(rule);
        self
    }

    pub fn with_bound_attribute(mut self, attribute: BoundAttributeDescriptor) -> Self {
        self.bound_attributes.push(attribute);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Runtime type name; falls back to the descriptor name.
    pub fn type_name(&self) -> &str {
        self.metadata
            .get(METADATA_TYPE_NAME)
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    pub fn view_component_name(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_VIEW_COMPONENT_NAME)
            .map(String::as_str)
    }

    pub fn is_view_component(&self) -> bool {
        self.view_component_name().is_some()
    }

    pub fn identity(&self) -> (&str, &str) {
        (&self.name, &self.assembly_name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Order-preserving set of descriptors. On duplicate identity the first wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(
    from = "Vec<TagHelperDescriptor>",
    into = "Vec<TagHelperDescriptor>"
)]
pub struct TagHelperCollection {
    descriptors: Vec<Arc<TagHelperDescriptor>>,
    by_identity: HashMap<(String, String), usize>,
}

impl TagHelperCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = TagHelperDescriptor>,
    {
        Self::from_shared(descriptors.into_iter().map(Arc::new))
    }

    pub fn from_shared<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Arc<TagHelperDescriptor>>,
    {
        let mut collection = Self::new();
        for descriptor in descriptors {
            collection.push_shared(descriptor);
        }
        collection
    }

    fn push_shared(&mut self, descriptor: Arc<TagHelperDescriptor>) -> bool {
        let key = (descriptor.name.clone(), descriptor.assembly_name.clone());
        if self.by_identity.contains_key(&key) {
            return false;
        }
        self.by_identity.insert(key, self.descriptors.len());
        self.descriptors.push(descriptor);
        true
    }

    /// Union in order: `self` first, then new identities from `other`.
    pub fn merge(&self, other: &TagHelperCollection) -> Self {
        let mut merged = self.clone();
        for descriptor in &other.descriptors {
            merged.push_shared(descriptor.clone());
        }
        merged
    }

    pub fn contains(&self, descriptor: &TagHelperDescriptor) -> bool {
        self.index_of(descriptor).is_some()
    }

    /// Position of a value-equal descriptor.
    pub fn index_of(&self, descriptor: &TagHelperDescriptor) -> Option<usize> {
        let key = (descriptor.name.clone(), descriptor.assembly_name.clone());
        self.by_identity
            .get(&key)
            .copied()
            .filter(|&i| *self.descriptors[i] == *descriptor)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<TagHelperDescriptor>> {
        self.descriptors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TagHelperDescriptor>> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors of `self` that `other` does not contain by value.
    pub fn difference(&self, other: &TagHelperCollection) -> Vec<Arc<TagHelperDescriptor>> {
        self.descriptors
            .iter()
            .filter(|d| !other.contains(d))
            .cloned()
            .collect()
    }

    /// Order-insensitive value equality.
    pub fn set_equals(&self, other: &TagHelperCollection) -> bool {
        self.len() == other.len() && self.descriptors.iter().all(|d| other.contains(d))
    }
}

impl PartialEq for TagHelperCollection {
    fn eq(&self, other: &Self) -> bool {
        self.descriptors.len() == other.descriptors.len()
            && self
                .descriptors
                .iter()
                .zip(&other.descriptors)
                .all(|(a, b)| Arc::ptr_eq(a, b) || a == b)
    }
}

impl Eq for TagHelperCollection {}

impl From<Vec<TagHelperDescriptor>> for TagHelperCollection {
    fn from(descriptors: Vec<TagHelperDescriptor>) -> Self {
        Self::create(descriptors)
    }
}

impl From<TagHelperCollection> for Vec<TagHelperDescriptor> {
    fn from(collection: TagHelperCollection) -> Self {
        collection
            .descriptors
            .into_iter()
            .map(Arc::unwrap_or_clone)
            .collect()
    }
}

impl FromIterator<TagHelperDescriptor> for TagHelperCollection {
    fn from_iter<I: IntoIterator<Item = TagHelperDescriptor>>(iter: I) -> Self {
        Self::create(iter)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TagMode {
    StartTagAndEndTag,
    SelfClosing,
    StartTagOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeStructure {
    DoubleQuotes,
    SingleQuotes,
    NoQuotes,
    Minimized,
}

/// Why an attribute is bound: the descriptor and which of its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeMatch {
    pub descriptor: Arc<TagHelperDescriptor>,
    pub bound_attribute: usize,
    pub is_indexer: bool,
}

impl AttributeMatch {
    pub fn attribute(&self) -> &BoundAttributeDescriptor {
        &self.descriptor.bound_attributes[self.bound_attribute]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagHelperAttributeBinding {
    pub name: String,
    pub value: Option<String>,
    pub structure: AttributeStructure,
    /// Empty when the attribute is plain HTML on a bound element.
    pub matches: Vec<AttributeMatch>,
}

impl TagHelperAttributeBinding {
    pub fn is_bound(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// The binding decision for one element. Pure function of the element and the
/// in-scope descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagHelperBinding {
    pub tag_name: String,
    pub prefix: Option<String>,
    pub parent_tag_name: Option<String>,
    pub tag_mode: TagMode,
    /// Matched descriptors in collection order.
    pub descriptors: Vec<Arc<TagHelperDescriptor>>,
    /// Index into `tag_matching_rules` of the first rule that matched, per descriptor.
    pub matched_rules: Vec<usize>,
    pub attributes: Vec<TagHelperAttributeBinding>,
}

impl TagHelperBinding {
    pub fn bound_attributes(&self) -> impl Iterator<Item = &TagHelperAttributeBinding> {
        self.attributes.iter().filter(|a| a.is_bound())
    }
}

/// The tag helpers a document can see, plus its element prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagHelperDocumentContext {
    pub prefix: Option<String>,
    pub tag_helpers: Arc<TagHelperCollection>,
}

impl TagHelperDocumentContext {
    pub fn new(prefix: Option<String>, tag_helpers: Arc<TagHelperCollection>) -> Self {
        Self {
            prefix,
            tag_helpers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> TagHelperDescriptor {
        TagHelperDescriptor::new(name, "TestAssembly")
            .with_rule(TagMatchingRuleDescriptor::for_tag("p"))
    }

    #[test]
    fn test_collection_first_occurrence_wins() {
        let first = descriptor("A").with_metadata("k", "1");
        let second = descriptor("A").with_metadata("k", "2");
        let collection = TagHelperCollection::create(vec![first.clone(), second.clone(), descriptor("B")]);
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.index_of(&first), Some(0));
        assert!(!collection.contains(&second));
    }

    #[test]
    fn test_merge_preserves_order() {
        let a = TagHelperCollection::create(vec![descriptor("A"), descriptor("B")]);
        let b = TagHelperCollection::create(vec![descriptor("C"), descriptor("A")]);
        let merged = a.merge(&b);
        let names: Vec<&str> = merged.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(merged.set_equals(&b.merge(&a)));
        assert_ne!(merged, b.merge(&a));
    }

    #[test]
    fn test_required_attribute_comparison() {
        let prefix = RequiredAttributeDescriptor {
            name: "asp-route-".into(),
            name_comparison: NameComparisonMode::PrefixMatch,
            value: None,
            value_comparison: ValueComparisonMode::None,
        };
        assert!(prefix.is_satisfied_by("ASP-ROUTE-id", Some("1")));
        assert!(!prefix.is_satisfied_by("asp-route-", Some("1")));

        let suffix = RequiredAttributeDescriptor {
            name: "href".into(),
            name_comparison: NameComparisonMode::FullMatch,
            value: Some(".css".into()),
            value_comparison: ValueComparisonMode::SuffixMatch,
        };
        assert!(suffix.is_satisfied_by("href", Some("site.css")));
        assert!(!suffix.is_satisfied_by("href", Some("site.CSS")));
    }
}
