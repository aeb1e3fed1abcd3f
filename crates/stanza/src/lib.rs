//! Arena-backed XML element tree (component C).
//!
//! The original `xmlnode.c` lineage builds trees out of a pool allocator
//! with raw back-pointers from child to parent. Per the Design Notes, this
//! crate instead holds every node in one `Vec`-backed [`StanzaArena`] and
//! links parent/child relationships through [`NodeId`] indices — a cycle
//! through a dangling back-reference is not representable.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Element {
        name: String,
        children: Vec<NodeId>,
        parent: Option<NodeId>,
    },
    Attribute {
        name: String,
        value: String,
        parent: Option<NodeId>,
    },
    CharData {
        text: String,
        parent: Option<NodeId>,
    },
}

struct Slot {
    node: Node,
    hidden: bool,
}

/// Owns every node of one or more element trees. Nodes are never freed
/// individually; [`StanzaArena::hide`] performs the "logical delete without
/// physical free" the spec calls for, and the whole arena is dropped at
/// once when its owning [`Stanza`]/session ends.
#[derive(Default)]
pub struct StanzaArena {
    slots: Vec<Slot>,
}

#[derive(Debug, Error)]
pub enum StanzaError {
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
}

impl StanzaArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_element(&mut self, name: impl Into<String>) -> NodeId {
        self.push(Node::Element {
            name: name.into(),
            children: Vec::new(),
            parent: None,
        })
    }

    pub fn new_char_data(&mut self, text: impl Into<String>) -> NodeId {
        self.push(Node::CharData {
            text: text.into(),
            parent: None,
        })
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.slots.len() as u32);
        self.slots.push(Slot {
            node,
            hidden: false,
        });
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.slots[id.0 as usize].node
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.slots[id.0 as usize].node
    }

    /// Append `child` to `parent`'s child list, recording the back-link.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), StanzaError> {
        match self.node_mut(parent) {
            Node::Element { children, .. } => children.push(child),
            _ => return Err(StanzaError::NotAnElement(parent)),
        }
        self.set_parent(child, Some(parent));
        Ok(())
    }

    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        match &mut self.slots[id.0 as usize].node {
            Node::Element { parent: p, .. } => *p = parent,
            Node::Attribute { parent: p, .. } => *p = parent,
            Node::CharData { parent: p, .. } => *p = parent,
        }
    }

    /// Set (or replace) an attribute on `element`. Matches "put attribute
    /// (replace if exists)" from the component's operation list.
    pub fn put_attribute(
        &mut self,
        element: NodeId,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StanzaError> {
        let name = name.into();
        let value = value.into();

        let children = match self.node(element) {
            Node::Element { children, .. } => children.clone(),
            _ => return Err(StanzaError::NotAnElement(element)),
        };

        for child in &children {
            if let Node::Attribute {
                name: existing,
                value: existing_value,
                ..
            } = self.node_mut(*child)
            {
                if *existing == name {
                    *existing_value = value;
                    return Ok(());
                }
            }
        }

        let attr_id = self.push(Node::Attribute {
            name,
            value,
            parent: Some(element),
        });
        if let Node::Element { children, .. } = self.node_mut(element) {
            children.push(attr_id);
        }
        Ok(())
    }

    pub fn get_attribute<'a>(&'a self, element: NodeId, name: &str) -> Option<&'a str> {
        self.element_children(element)
            .ok()?
            .iter()
            .find_map(|child| match self.node(*child) {
                Node::Attribute {
                    name: n, value, ..
                } if n == name && !self.slots[child.0 as usize].hidden => Some(value.as_str()),
                _ => None,
            })
    }

    fn element_children(&self, id: NodeId) -> Result<&[NodeId], StanzaError> {
        match self.node(id) {
            Node::Element { children, .. } => Ok(children),
            _ => Err(StanzaError::NotAnElement(id)),
        }
    }

    pub fn element_name(&self, id: NodeId) -> Option<&str> {
        match self.node(id) {
            Node::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Logically delete `id` without freeing its arena slot.
    pub fn hide(&mut self, id: NodeId) {
        self.slots[id.0 as usize].hidden = true;
    }

    pub fn is_hidden(&self, id: NodeId) -> bool {
        self.slots[id.0 as usize].hidden
    }

    /// Deep-copy the subtree rooted at `id` into the same arena, returning
    /// the new root. Hidden nodes are not carried over.
    pub fn duplicate(&mut self, id: NodeId) -> NodeId {
        match self.node(id).clone() {
            Node::Element { name, children, .. } => {
                let new_id = self.new_element(name);
                for child in children {
                    if self.is_hidden(child) {
                        continue;
                    }
                    let new_child = self.duplicate(child);
                    // re-link without going through append_child's element-only check
                    // since `child` may be an Attribute node.
                    self.set_parent(new_child, Some(new_id));
                    if let Node::Element { children, .. } = self.node_mut(new_id) {
                        children.push(new_child);
                    }
                }
                new_id
            }
            Node::Attribute { name, value, .. } => self.push(Node::Attribute {
                name,
                value,
                parent: None,
            }),
            Node::CharData { text, .. } => self.new_char_data(text),
        }
    }

    /// Structural equality, ignoring hidden nodes and element/attribute
    /// ordering sensitivity only for attributes (attribute order is
    /// insignificant in XML; child element/text order is significant).
    pub fn structurally_equal(&self, a: NodeId, b: NodeId) -> bool {
        match (self.node(a), self.node(b)) {
            (
                Node::Element {
                    name: name_a,
                    children: children_a,
                    ..
                },
                Node::Element {
                    name: name_b,
                    children: children_b,
                    ..
                },
            ) => {
                if name_a != name_b {
                    return false;
                }
                let (attrs_a, elems_a) = self.split_children(children_a);
                let (attrs_b, elems_b) = self.split_children(children_b);
                if attrs_a.len() != attrs_b.len() || elems_a.len() != elems_b.len() {
                    return false;
                }
                for (attr_name, attr_value) in &attrs_a {
                    if attrs_b.iter().all(|(n, v)| n != attr_name || v != attr_value) {
                        return false;
                    }
                }
                elems_a
                    .iter()
                    .zip(elems_b.iter())
                    .all(|(x, y)| self.structurally_equal(*x, *y))
            }
            (Node::CharData { text: a, .. }, Node::CharData { text: b, .. }) => a == b,
            _ => false,
        }
    }

    fn split_children(&self, children: &[NodeId]) -> (Vec<(String, String)>, Vec<NodeId>) {
        let mut attrs = Vec::new();
        let mut rest = Vec::new();
        for child in children {
            if self.is_hidden(*child) {
                continue;
            }
            match self.node(*child) {
                Node::Attribute { name, value, .. } => attrs.push((name.clone(), value.clone())),
                _ => rest.push(*child),
            }
        }
        (attrs, rest)
    }

    /// Serialise the subtree rooted at `id` to XML text.
    pub fn serialize(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize_into(id, &mut out);
        out
    }

    fn serialize_into(&self, id: NodeId, out: &mut String) {
        if self.is_hidden(id) {
            return;
        }
        match self.node(id) {
            Node::Element { name, children, .. } => {
                let (attrs, rest) = self.split_children(children);
                out.push('<');
                out.push_str(name);
                for (k, v) in &attrs {
                    out.push(' ');
                    out.push_str(k);
                    out.push_str("=\"");
                    escape_into(v, out);
                    out.push('"');
                }
                if rest.is_empty() {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    for child in rest {
                        self.serialize_into(child, out);
                    }
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
            }
            Node::CharData { text, .. } => escape_into(text, out),
            Node::Attribute { .. } => {}
        }
    }

    /// Resolve a `/`-separated path of the form `a/b/c`, `?attrib`,
    /// `=cdata`, or `name?attr=value` starting from `root`'s children.
    /// See the module docs and SPEC_FULL.md §4.C for the grammar.
    pub fn query(&self, root: NodeId, path: &str) -> Option<NodeId> {
        let mut current = root;
        for segment in path.split('/') {
            current = self.match_segment(current, segment)?;
        }
        Some(current)
    }

    fn match_segment(&self, parent: NodeId, segment: &str) -> Option<NodeId> {
        let children = self.element_children(parent).ok()?;

        if let Some(expected) = segment.strip_prefix('=') {
            return children.iter().copied().find(|c| {
                !self.is_hidden(*c)
                    && matches!(self.node(*c), Node::CharData { text, .. } if text == expected)
            });
        }

        if let Some(attr_spec) = segment.strip_prefix('?') {
            let (attr, expected_value) = split_attr_spec(attr_spec);
            return children.iter().copied().find(|c| {
                !self.is_hidden(*c) && self.element_has_attr(*c, attr, expected_value)
            });
        }

        if let Some((name, attr_spec)) = segment.split_once('?') {
            let (attr, expected_value) = split_attr_spec(attr_spec);
            return children.iter().copied().find(|c| {
                !self.is_hidden(*c)
                    && self.element_name(*c) == Some(name)
                    && self.element_has_attr(*c, attr, expected_value)
            });
        }

        children.iter().copied().find(|c| {
            !self.is_hidden(*c) && self.element_name(*c) == Some(segment)
        })
    }

    fn element_has_attr(&self, element: NodeId, attr: &str, expected_value: Option<&str>) -> bool {
        match self.get_attribute(element, attr) {
            Some(value) => expected_value.is_none_or(|expected| expected == value),
            None => false,
        }
    }
}

fn split_attr_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once('=') {
        Some((attr, value)) => (attr, Some(value)),
        None => (spec, None),
    }
}

fn escape_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (StanzaArena, NodeId) {
        let mut arena = StanzaArena::new();
        let message = arena.new_element("message");
        arena.put_attribute(message, "type", "chat").unwrap();
        arena.put_attribute(message, "to", "bob@example.com").unwrap();

        let body = arena.new_element("body");
        let text = arena.new_char_data("hi & bye <3");
        arena.append_child(body, text).unwrap();
        arena.append_child(message, body).unwrap();

        (arena, message)
    }

    #[test]
    fn serialize_escapes_and_round_trips_attrs() {
        let (arena, root) = sample_tree();
        let xml = arena.serialize(root);
        assert!(xml.starts_with("<message"));
        assert!(xml.contains("type=\"chat\""));
        assert!(xml.contains("&amp; bye &lt;3"));
        assert!(xml.ends_with("</message>"));
    }

    #[test]
    fn put_attribute_replaces_existing() {
        let (mut arena, root) = sample_tree();
        arena.put_attribute(root, "type", "groupchat").unwrap();
        assert_eq!(arena.get_attribute(root, "type"), Some("groupchat"));
    }

    #[test]
    fn hide_removes_node_from_serialization_but_keeps_slot() {
        let (mut arena, root) = sample_tree();
        let body = arena.query(root, "body").unwrap();
        arena.hide(body);
        let xml = arena.serialize(root);
        assert!(!xml.contains("<body>"));
        assert!(arena.is_hidden(body));
    }

    #[test]
    fn duplicate_produces_structurally_equal_copy() {
        let (mut arena, root) = sample_tree();
        let copy = arena.duplicate(root);
        assert!(arena.structurally_equal(root, copy));
    }

    #[test]
    fn query_descends_by_name() {
        let (arena, root) = sample_tree();
        let body = arena.query(root, "body").unwrap();
        assert_eq!(arena.element_name(body), Some("body"));
    }

    #[test]
    fn query_matches_attribute_presence() {
        let mut arena = StanzaArena::new();
        let parent = arena.new_element("x");
        let item_a = arena.new_element("item");
        let item_b = arena.new_element("item");
        arena.put_attribute(item_b, "jid", "a@b.c").unwrap();
        arena.append_child(parent, item_a).unwrap();
        arena.append_child(parent, item_b).unwrap();

        let found = arena.query(parent, "?jid").unwrap();
        assert_eq!(found, item_b);
    }

    #[test]
    fn query_matches_name_and_attribute_value_combo() {
        let mut arena = StanzaArena::new();
        let parent = arena.new_element("x");
        let status_10 = arena.new_element("status");
        arena.put_attribute(status_10, "code", "110").unwrap();
        let status_30 = arena.new_element("status");
        arena.put_attribute(status_30, "code", "303").unwrap();
        arena.append_child(parent, status_10).unwrap();
        arena.append_child(parent, status_30).unwrap();

        let found = arena.query(parent, "status?code=303").unwrap();
        assert_eq!(found, status_30);
    }

    #[test]
    fn query_matches_cdata_equality() {
        let (arena, root) = sample_tree();
        let body = arena.query(root, "body").unwrap();
        let found = arena.query(body, "=hi & bye <3").unwrap();
        assert!(matches!(arena.node(found), Node::CharData { .. }));
    }

    #[test]
    fn serialize_is_structurally_stable_across_duplication() {
        let (mut arena, root) = sample_tree();
        let copy = arena.duplicate(root);
        // Attribute ordering may differ but structural equality must hold
        // regardless of the textual serialization order.
        assert!(arena.structurally_equal(root, copy));
    }
}
