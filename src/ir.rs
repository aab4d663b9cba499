//! Intermediate representation.
//!
//! A tagged tree closer to the generated code than the syntax tree. Each node
//! carries an optional source span, ordered children and diagnostics. Passes
//! own the tree for the duration of their run and may restructure it freely.

use serde::{Deserialize, Serialize};

use crate::diagnostics::RazorDiagnostic;
use crate::directives::DirectiveTokenKind;
use crate::error::IrError;
use crate::source::SourceSpan;
use crate::tag_helpers::{AttributeStructure, TagMode};

// ═══════════════════════════════════════════════════════════════════════════════
// NODE KINDS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IrTokenKind {
    Html,
    CSharp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeKind {
    Document {
        document_kind: Option<String>,
    },
    Namespace {
        content: String,
        is_primary: bool,
    },
    Using {
        content: String,
    },
    Class {
        modifiers: Vec<String>,
        class_name: String,
        base_type: Option<String>,
        interfaces: Vec<String>,
        is_primary: bool,
    },
    Method {
        modifiers: Vec<String>,
        return_type: String,
        method_name: String,
        is_primary: bool,
    },
    Field {
        modifiers: Vec<String>,
        field_type: String,
        field_name: String,
    },
    Property {
        modifiers: Vec<String>,
        property_type: String,
        property_name: String,
        attributes: Vec<String>,
        #[serde(default)]
        initializer: Option<String>,
    },

    HtmlContent,
    HtmlAttribute {
        attribute_name: String,
        prefix: String,
        suffix: String,
    },
    HtmlAttributeValue {
        prefix: String,
    },
    CSharpExpressionAttributeValue {
        prefix: String,
    },
    CSharpCodeAttributeValue {
        prefix: String,
    },
    CSharpExpression,
    CSharpCode,
    Token {
        token_kind: IrTokenKind,
        content: String,
    },

    Directive {
        name: String,
    },
    DirectiveToken {
        token_kind: DirectiveTokenKind,
        content: String,
    },
    MalformedDirective {
        name: String,
    },
    Section {
        section_name: String,
    },
    DesignTimeDirective,

    TagHelper {
        tag_name: String,
        tag_mode: TagMode,
    },
    TagHelperBody,
    TagHelperCreate {
        type_name: String,
        field_name: String,
    },
    TagHelperProperty {
        attribute_name: String,
        property_name: String,
        /// Declared type of the bound property.
        property_type: String,
        /// Type assigned by this attribute; the indexer value type for indexers.
        value_type: String,
        tag_helper_type: String,
        field_name: String,
        structure: AttributeStructure,
        /// Dictionary key for an indexer match; `None` for a plain property.
        #[serde(default)]
        indexer_key: Option<String>,
        is_enum: bool,
    },
    TagHelperHtmlAttribute {
        attribute_name: String,
        structure: AttributeStructure,
    },
    TagHelperExecute,
    TagHelperRuntime,
    ViewComponentTagHelper {
        class_name: String,
        view_component_name: String,
        tag_helper_type: String,
    },

    Checksum {
        algorithm: String,
        checksum: String,
        file_path: Option<String>,
    },
    RazorCompiledItemAttribute {
        kind: String,
        identifier: String,
        type_name: String,
    },
    RazorSourceChecksumAttribute {
        algorithm: String,
        checksum: String,
        identifier: String,
    },
    RazorCompiledItemMetadataAttribute {
        key: String,
        value: String,
    },
}

impl NodeKind {
    pub fn is_primary_class(&self) -> bool {
        matches!(self, NodeKind::Class { is_primary: true, .. })
    }

    pub fn is_primary_method(&self) -> bool {
        matches!(self, NodeKind::Method { is_primary: true, .. })
    }

    pub fn is_primary_namespace(&self) -> bool {
        matches!(self, NodeKind::Namespace { is_primary: true, .. })
    }

    pub fn is_directive(&self, directive: &str) -> bool {
        matches!(self, NodeKind::Directive { name } if name == directive)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntermediateNode {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub source: Option<SourceSpan>,
    #[serde(default)]
    pub children: Vec<IntermediateNode>,
    #[serde(default)]
    pub diagnostics: Vec<RazorDiagnostic>,
}

impl IntermediateNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            source: None,
            children: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Option<SourceSpan>) -> Self {
        self.source = source;
        self
    }

    pub fn with_children(mut self, children: Vec<IntermediateNode>) -> Self {
        self.children = children;
        self
    }

    pub fn token(token_kind: IrTokenKind, content: impl Into<String>, source: Option<SourceSpan>) -> Self {
        Self::new(NodeKind::Token {
            token_kind,
            content: content.into(),
        })
        .with_source(source)
    }

    pub fn html(content: impl Into<String>, source: Option<SourceSpan>) -> Self {
        Self::token(IrTokenKind::Html, content, source)
    }

    pub fn csharp(content: impl Into<String>, source: Option<SourceSpan>) -> Self {
        Self::token(IrTokenKind::CSharp, content, source)
    }

    /// Concatenated content of the direct token children.
    pub fn content(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match &c.kind {
                NodeKind::Token { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_token(&self) -> bool {
        matches!(self.kind, NodeKind::Token { .. })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Search
    // ───────────────────────────────────────────────────────────────────────────

    /// Depth-first, stops at the first match.
    pub fn find_first(&self, pred: &impl Fn(&NodeKind) -> bool) -> Option<&IntermediateNode> {
        if pred(&self.kind) {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find_first(pred) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_first_mut(
        &mut self,
        pred: &impl Fn(&NodeKind) -> bool,
    ) -> Option<&mut IntermediateNode> {
        if pred(&self.kind) {
            return Some(self);
        }
        for child in &mut self.children {
            if let Some(found) = child.find_first_mut(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Every matching node in preorder.
    pub fn find_all(&self, pred: &impl Fn(&NodeKind) -> bool) -> Vec<&IntermediateNode> {
        let mut out = Vec::new();
        self.collect(pred, &mut out);
        out
    }

    /// Calls `f` on this node and every descendant in preorder.
    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut IntermediateNode)) {
        f(self);
        for child in &mut self.children {
            child.for_each_mut(f);
        }
    }

    fn collect<'a>(&'a self, pred: &impl Fn(&NodeKind) -> bool, out: &mut Vec<&'a IntermediateNode>) {
        if pred(&self.kind) {
            out.push(self);
        }
        for child in &self.children {
            child.collect(pred, out);
        }
    }

    pub fn find_primary_class(&self) -> Option<&IntermediateNode> {
        self.find_first(&NodeKind::is_primary_class)
    }

    pub fn find_primary_class_mut(&mut self) -> Option<&mut IntermediateNode> {
        self.find_first_mut(&NodeKind::is_primary_class)
    }

    pub fn find_primary_method(&self) -> Option<&IntermediateNode> {
        self.find_first(&NodeKind::is_primary_method)
    }

    pub fn find_primary_method_mut(&mut self) -> Option<&mut IntermediateNode> {
        self.find_first_mut(&NodeKind::is_primary_method)
    }

    pub fn find_primary_namespace(&self) -> Option<&IntermediateNode> {
        self.find_first(&NodeKind::is_primary_namespace)
    }

    pub fn find_primary_namespace_mut(&mut self) -> Option<&mut IntermediateNode> {
        self.find_first_mut(&NodeKind::is_primary_namespace)
    }

    pub fn find_directives(&self, name: &str) -> Vec<&IntermediateNode> {
        self.find_all(&|k: &NodeKind| k.is_directive(name))
    }

    /// Exactly one primary class, at most one primary method and namespace.
    pub fn validate_primaries(&self) -> Result<(), IrError> {
        match self.find_all(&NodeKind::is_primary_class).len() {
            0 => return Err(IrError::MissingPrimary("class")),
            1 => {}
            _ => return Err(IrError::DuplicatePrimary("class")),
        }
        if self.find_all(&NodeKind::is_primary_method).len() > 1 {
            return Err(IrError::DuplicatePrimary("method"));
        }
        if self.find_all(&NodeKind::is_primary_namespace).len() > 1 {
            return Err(IrError::DuplicatePrimary("namespace"));
        }
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Rewriting
    // ───────────────────────────────────────────────────────────────────────────

    /// Replaces every descendant, children first, with the nodes `f` returns for it.
    pub fn flat_map_descendants<F>(&mut self, f: &mut F)
    where
        F: FnMut(IntermediateNode) -> Vec<IntermediateNode>,
    {
        let children = std::mem::take(&mut self.children);
        for mut child in children {
            child.flat_map_descendants(f);
            self.children.extend(f(child));
        }
    }

    /// Removes and returns every descendant matching `pred`, outermost first.
    pub fn extract_all(&mut self, pred: &impl Fn(&NodeKind) -> bool) -> Vec<IntermediateNode> {
        let mut out = Vec::new();
        let children = std::mem::take(&mut self.children);
        for mut child in children {
            if pred(&child.kind) {
                out.push(child);
            } else {
                out.extend(child.extract_all(pred));
                self.children.push(child);
            }
        }
        out
    }

    pub fn all_diagnostics(&self) -> Vec<RazorDiagnostic> {
        let mut out = self.diagnostics.clone();
        for child in &self.children {
            out.extend(child.all_diagnostics());
        }
        out
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(IntermediateNode::node_count).sum::<usize>()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Explicit cursor stack for building a tree depth-first. A pushed node is
/// the current node until popped, then becomes the last child of its parent.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    stack: Vec<IntermediateNode>,
    finished: Option<IntermediateNode>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: IntermediateNode) -> Self {
        Self {
            stack: vec![root],
            finished: None,
        }
    }

    pub fn current(&self) -> Option<&IntermediateNode> {
        self.stack.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut IntermediateNode> {
        self.stack.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, node: IntermediateNode) {
        self.stack.push(node);
    }

    pub fn pop(&mut self) -> Result<&IntermediateNode, IrError> {
        let node = self.stack.pop().ok_or(IrError::EmptyStack)?;
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(node);
                let last = parent.children.len() - 1;
                Ok(&parent.children[last])
            }
            None => Ok(self.finished.insert(node)),
        }
    }

    pub fn add(&mut self, node: IntermediateNode) -> Result<(), IrError> {
        let current = self.stack.last_mut().ok_or(IrError::EmptyStack)?;
        current.children.push(node);
        Ok(())
    }

    pub fn insert(&mut self, index: usize, node: IntermediateNode) -> Result<(), IrError> {
        let current = self.stack.last_mut().ok_or(IrError::EmptyStack)?;
        let len = current.children.len();
        if index > len {
            return Err(IrError::InsertOutOfRange { index, len });
        }
        current.children.insert(index, node);
        Ok(())
    }

    /// Pops everything still open and returns the root.
    pub fn build(mut self) -> Result<IntermediateNode, IrError> {
        while !self.stack.is_empty() {
            self.pop()?;
        }
        self.finished.take().ok_or(IrError::EmptyStack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn labeled(label: usize) -> IntermediateNode {
        IntermediateNode::html(label.to_string(), None)
    }

    fn label(node: &IntermediateNode) -> usize {
        match &node.kind {
            NodeKind::Token { content, .. } => content.parse().unwrap(),
            _ => usize::MAX,
        }
    }

    /// Reference model: parent of each label and the ordered children per label.
    #[derive(Default)]
    struct Model {
        children: std::collections::BTreeMap<usize, Vec<usize>>,
        stack: Vec<usize>,
    }

    fn flatten(node: &IntermediateNode, out: &mut std::collections::BTreeMap<usize, Vec<usize>>) {
        out.insert(label(node), node.children.iter().map(label).collect());
        for child in &node.children {
            flatten(child, out);
        }
    }

    #[test]
    fn test_pop_empty_fails() {
        let mut builder = NodeBuilder::new();
        assert_eq!(builder.pop().unwrap_err(), IrError::EmptyStack);
        assert_eq!(builder.add(labeled(1)).unwrap_err(), IrError::EmptyStack);
        assert_eq!(NodeBuilder::new().build().unwrap_err(), IrError::EmptyStack);
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut builder = NodeBuilder::with_root(labeled(0));
        builder.add(labeled(1)).unwrap();
        assert_eq!(
            builder.insert(3, labeled(2)).unwrap_err(),
            IrError::InsertOutOfRange { index: 3, len: 1 }
        );
        builder.insert(0, labeled(2)).unwrap();
        let root = builder.build().unwrap();
        assert_eq!(root.children.iter().map(label).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn test_random_sequences_match_model() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let mut builder = NodeBuilder::with_root(labeled(0));
            let mut model = Model::default();
            model.children.insert(0, Vec::new());
            model.stack.push(0);
            let mut next = 1;

            for _ in 0..rng.random_range(1..60) {
                let current = *model.stack.last().unwrap();
                match rng.random_range(0..4) {
                    0 => {
                        builder.push(labeled(next));
                        model.children.insert(next, Vec::new());
                        model.stack.push(next);
                        next += 1;
                    }
                    1 if model.stack.len() > 1 => {
                        let popped = builder.pop().unwrap();
                        let id = model.stack.pop().unwrap();
                        assert_eq!(label(popped), id);
                        let parent = *model.stack.last().unwrap();
                        model.children.get_mut(&parent).unwrap().push(id);
                    }
                    2 => {
                        builder.add(labeled(next)).unwrap();
                        model.children.insert(next, Vec::new());
                        model.children.get_mut(&current).unwrap().push(next);
                        next += 1;
                    }
                    _ => {
                        let len = model.children[&current].len();
                        let index = rng.random_range(0..=len);
                        builder.insert(index, labeled(next)).unwrap();
                        model.children.insert(next, Vec::new());
                        model.children.get_mut(&current).unwrap().insert(index, next);
                        next += 1;
                    }
                }
            }

            while model.stack.len() > 1 {
                let id = model.stack.pop().unwrap();
                let parent = *model.stack.last().unwrap();
                model.children.get_mut(&parent).unwrap().push(id);
            }
            let root = builder.build().unwrap();
            assert_eq!(root.node_count(), next);
            let mut actual = std::collections::BTreeMap::new();
            flatten(&root, &mut actual);
            assert_eq!(actual, model.children);
        }
    }

    fn class(primary: bool) -> IntermediateNode {
        IntermediateNode::new(NodeKind::Class {
            modifiers: vec!["public".into()],
            class_name: "C".into(),
            base_type: None,
            interfaces: Vec::new(),
            is_primary: primary,
        })
    }

    #[test]
    fn test_primary_lookup_and_validation() {
        let mut doc = IntermediateNode::new(NodeKind::Document {
            document_kind: None,
        });
        assert_eq!(doc.validate_primaries(), Err(IrError::MissingPrimary("class")));
        doc.children.push(class(false).with_children(vec![class(true)]));
        assert!(doc.find_primary_class().is_some());
        assert!(doc.validate_primaries().is_ok());
        doc.children.push(class(true));
        assert_eq!(doc.validate_primaries(), Err(IrError::DuplicatePrimary("class")));
    }

    #[test]
    fn test_extract_and_flat_map() {
        let mut doc = IntermediateNode::new(NodeKind::HtmlContent).with_children(vec![
            IntermediateNode::new(NodeKind::Directive { name: "a".into() }),
            IntermediateNode::new(NodeKind::CSharpCode).with_children(vec![IntermediateNode::new(
                NodeKind::Directive { name: "a".into() },
            )]),
        ]);
        assert_eq!(doc.find_directives("a").len(), 2);
        let extracted = doc.extract_all(&|k: &NodeKind| k.is_directive("a"));
        assert_eq!(extracted.len(), 2);
        assert_eq!(doc.node_count(), 2);

        doc.flat_map_descendants(&mut |node| vec![node.clone(), node]);
        assert_eq!(doc.children.len(), 2);
    }

    #[test]
    fn test_serde_uses_type_tag() {
        let node = IntermediateNode::new(NodeKind::TagHelperCreate {
            type_name: "T".into(),
            field_name: "__T".into(),
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "tagHelperCreate");
        assert_eq!(json["fieldName"], "__T");
        let back: IntermediateNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
