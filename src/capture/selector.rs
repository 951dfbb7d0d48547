// src/capture/selector.rs
//! Node lookup and selector resolution
//!
//! Click enrichment needs more than the node id the capture provider reports:
//! a selector path, the node's own text and its bounding box. The provider
//! answers lookups with a `NodeSnapshot`; a `SelectorResolver` turns that into
//! a CSS path.

use serde::{Deserialize, Serialize};

/// Selector used when the node cannot be resolved
pub const FALLBACK_SELECTOR: &str = "html > body";

/// Maximum characters of leaf text attached to a click
pub const MAX_TEXT_LENGTH: usize = 50;

/// One element on the path from a node to the document root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementStep {
    /// Lowercase tag name
    pub tag: String,

    /// `id` attribute, when non-empty
    pub id: Option<String>,

    /// 1-based position among siblings with the same tag
    pub nth_of_type: usize,
}

impl ElementStep {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            id: None,
            nth_of_type: 1,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_nth_of_type(mut self, nth: usize) -> Self {
        self.nth_of_type = nth;
        self
    }
}

/// Element bounding box in viewport coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Kind of a node's first child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildKind {
    Text,
    Element,
    Other,
}

/// What the capture provider knows about a live node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// The node itself first, then its ancestors up to `html`
    pub ancestry: Vec<ElementStep>,

    pub first_child: Option<ChildKind>,

    /// Any child is an element
    pub has_element_child: bool,

    pub inner_text: String,

    pub bounding_box: Rect,
}

/// Resolves capture-provider node ids to live nodes
pub trait NodeLookup: Send {
    fn node(&self, id: i64) -> Option<NodeSnapshot>;
}

/// Turns a node into a selector string
pub trait SelectorResolver: Send + Sync {
    fn selector(&self, node: &NodeSnapshot) -> String;
}

/// CSS path resolver
///
/// Walks from the node towards the root, stopping at the first element with an
/// id. Steps get `:nth-of-type(n)` only when they are not the first of their
/// tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssPathResolver;

impl SelectorResolver for CssPathResolver {
    fn selector(&self, node: &NodeSnapshot) -> String {
        let mut path: Vec<String> = Vec::with_capacity(node.ancestry.len());

        for step in &node.ancestry {
            match step.id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => {
                    path.push(format!("{}#{}", step.tag, id));
                    break;
                }
                None if step.nth_of_type != 1 => {
                    path.push(format!("{}:nth-of-type({})", step.tag, step.nth_of_type));
                }
                None => path.push(step.tag.clone()),
            }
        }

        if path.is_empty() {
            return FALLBACK_SELECTOR.to_string();
        }

        path.reverse();
        path.join(" > ")
    }
}

/// Text of a leaf node: only when it has no element children and starts with
/// a text node, capped at `MAX_TEXT_LENGTH` characters
pub fn leaf_text(node: &NodeSnapshot) -> Option<String> {
    if node.has_element_child || node.first_child != Some(ChildKind::Text) {
        return None;
    }

    Some(node.inner_text.chars().take(MAX_TEXT_LENGTH).collect())
}
