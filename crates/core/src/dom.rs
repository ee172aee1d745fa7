//! In-memory document model standing in for the browser DOM.
//!
//! Components never reach for a global document: the host builds a
//! [`Document`], shares it as a [`SharedDocument`], and reports changes as
//! [`DomMutation`] values to whoever observes them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

pub type SharedDocument = Arc<RwLock<Document>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub classes: BTreeSet<String>,
    pub text: String,
    pub disabled: bool,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    detached: bool,
}

/// Observed change to the document, fed to reconcilers and trackers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomMutation {
    ChildAdded { parent: NodeId, child: NodeId },
    ChildRemoved { parent: NodeId, child: NodeId },
    AttributeChanged { node: NodeId, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Element>,
    root: NodeId,
    pub location: Url,
    pub title: String,
    pub referrer: Option<String>,
    pub viewport: Viewport,
    meta: HashMap<String, String>,
}

impl Document {
    pub fn new(location: Url) -> Self {
        let body = Element {
            tag: "body".into(),
            ..Element::default()
        };
        Self {
            nodes: vec![body],
            root: NodeId(0),
            location,
            title: String::new(),
            referrer: None,
            viewport: Viewport {
                width: 1280,
                height: 800,
            },
            meta: HashMap::new(),
        }
    }

    /// Parse `url` and build an empty document at that location.
    pub fn at(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn into_shared(self) -> SharedDocument {
        Arc::new(RwLock::new(self))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    // ---- page metadata -------------------------------------------------

    pub fn set_meta(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.meta.insert(name.into(), content.into());
    }

    pub fn meta(&self, name: &str) -> Option<&str> {
        self.meta.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.location
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    // ---- tree construction ---------------------------------------------

    /// Create a detached element. Attach it with [`Document::append_child`].
    pub fn create_element(&mut self, tag: impl Into<String>) -> NodeId {
        self.nodes.push(Element {
            tag: tag.into(),
            detached: true,
            ..Element::default()
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomMutation {
        if let Some(old_parent) = self.nodes[child.0].parent {
            self.nodes[old_parent.0].children.retain(|c| *c != child);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        let attached = !self.nodes[parent.0].detached;
        self.set_detached(child, !attached);
        DomMutation::ChildAdded { parent, child }
    }

    /// Detach `node` (and its subtree) from its parent.
    pub fn remove(&mut self, node: NodeId) -> Option<DomMutation> {
        let parent = self.nodes[node.0].parent.take()?;
        self.nodes[parent.0].children.retain(|c| *c != node);
        self.set_detached(node, true);
        Some(DomMutation::ChildRemoved {
            parent,
            child: node,
        })
    }

    fn set_detached(&mut self, node: NodeId, detached: bool) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            self.nodes[n.0].detached = detached;
            stack.extend(self.nodes[n.0].children.iter().copied());
        }
    }

    // ---- element accessors ---------------------------------------------

    pub fn element(&self, node: NodeId) -> &Element {
        &self.nodes[node.0]
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes[node.0].attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.nodes[node.0].attributes.contains_key(name)
    }

    pub fn set_attr(
        &mut self,
        node: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> DomMutation {
        let name = name.into();
        self.nodes[node.0]
            .attributes
            .insert(name.clone(), value.into());
        DomMutation::AttributeChanged { node, name }
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> Option<DomMutation> {
        self.nodes[node.0].attributes.remove(name)?;
        Some(DomMutation::AttributeChanged {
            node,
            name: name.to_string(),
        })
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.nodes[node.0].classes.contains(class)
    }

    pub fn toggle_class(&mut self, node: NodeId, class: &str, on: bool) {
        let classes = &mut self.nodes[node.0].classes;
        if on {
            classes.insert(class.to_string());
        } else {
            classes.remove(class);
        }
    }

    pub fn text(&self, node: NodeId) -> &str {
        &self.nodes[node.0].text
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        self.nodes[node.0].text = text.into();
    }

    pub fn set_disabled(&mut self, node: NodeId, disabled: bool) {
        self.nodes[node.0].disabled = disabled;
    }

    pub fn is_disabled(&self, node: NodeId) -> bool {
        self.nodes[node.0].disabled
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    // ---- queries -------------------------------------------------------

    pub fn is_connected(&self, node: NodeId) -> bool {
        node == self.root || !self.nodes[node.0].detached
    }

    /// Visible when connected and neither the node nor an ancestor is `hidden`.
    pub fn is_visible(&self, node: NodeId) -> bool {
        if !self.is_connected(node) {
            return false;
        }
        let mut current = Some(node);
        while let Some(n) = current {
            let el = &self.nodes[n.0];
            if el.attributes.contains_key("hidden") || el.classes.contains("hidden") {
                return false;
            }
            current = el.parent;
        }
        true
    }

    /// Is `node` inside `ancestor`'s subtree (or `ancestor` itself)?
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.nodes[n.0].parent;
        }
        false
    }

    /// Descendants of `root` (excluding `root`) carrying `attr`, in document order.
    pub fn query_attr(&self, root: NodeId, attr: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[root.0].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            if self.nodes[n.0].attributes.contains_key(attr) {
                found.push(n);
            }
            stack.extend(self.nodes[n.0].children.iter().rev().copied());
        }
        found
    }

    pub fn query_attr_first(&self, root: NodeId, attr: &str) -> Option<NodeId> {
        self.query_attr(root, attr).into_iter().next()
    }

    /// Nearest inclusive ancestor carrying `attr`.
    pub fn closest_with_attr(&self, node: NodeId, attr: &str) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(n) = current {
            if self.nodes[n.0].attributes.contains_key(attr) {
                return Some(n);
            }
            current = self.nodes[n.0].parent;
        }
        None
    }

    /// `node` plus all its descendants.
    pub fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![node];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.nodes[out[i].0].children.iter().copied());
            i += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::at("https://shop.example.com/collections/summer?ignore=false").unwrap()
    }

    #[test]
    fn test_query_attr_in_document_order() {
        let mut d = doc();
        let root = d.root();
        let a = d.create_element("div");
        let b = d.create_element("div");
        let nested = d.create_element("span");
        d.set_attr(a, "data-next-package-id", "1");
        d.set_attr(nested, "data-next-package-id", "2");
        d.set_attr(b, "data-next-package-id", "3");
        d.append_child(root, a);
        d.append_child(a, nested);
        d.append_child(root, b);

        assert_eq!(d.query_attr(root, "data-next-package-id"), vec![a, nested, b]);
        assert_eq!(d.closest_with_attr(nested, "data-next-package-id"), Some(nested));
        assert!(d.contains(a, nested));
        assert!(!d.contains(b, nested));
    }

    #[test]
    fn test_remove_detaches_subtree() {
        let mut d = doc();
        let root = d.root();
        let card = d.create_element("div");
        let button = d.create_element("button");
        d.append_child(root, card);
        d.append_child(card, button);
        assert!(d.is_connected(button));

        let mutation = d.remove(card).unwrap();
        assert_eq!(mutation, DomMutation::ChildRemoved { parent: root, child: card });
        assert!(!d.is_connected(card));
        assert!(!d.is_connected(button));
        assert!(d.query_attr(root, "data-x").is_empty());
    }

    #[test]
    fn test_visibility_follows_ancestors() {
        let mut d = doc();
        let root = d.root();
        let wrapper = d.create_element("section");
        let card = d.create_element("div");
        d.append_child(root, wrapper);
        d.append_child(wrapper, card);
        assert!(d.is_visible(card));
        d.set_attr(wrapper, "hidden", "");
        assert!(!d.is_visible(card));
    }

    #[test]
    fn test_page_metadata() {
        let mut d = doc();
        d.set_meta("next-analytics-list-id", "summer");
        assert_eq!(d.meta("next-analytics-list-id"), Some("summer"));
        assert_eq!(d.query_param("ignore").as_deref(), Some("false"));
        assert_eq!(d.query_param("missing"), None);
    }
}
