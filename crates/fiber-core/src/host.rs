//! Host adapter seam and an in-memory host.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::collections::map::HashMap;
use crate::element::{EventHandler, PropValue, Props};
use crate::error::NodeError;

pub type NodeId = usize;

/// Operations the reconciler performs on the host's node tree.
///
/// `parent` arguments are either the root container or an instance created
/// by [`HostConfig::create_instance`]. Appending or inserting a child that
/// already has a parent moves it.
pub trait HostConfig {
    fn create_instance(&mut self, tag: &str, props: &Props) -> NodeId;

    fn create_text_instance(&mut self, content: &str) -> NodeId;

    /// Attaches a child to an instance that is not yet part of the container.
    fn append_initial_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), NodeError>;

    fn append_child_to_container(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), NodeError>;

    fn insert_child_to_container(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: NodeId,
    ) -> Result<(), NodeError>;

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), NodeError>;

    fn commit_text_update(&mut self, text: NodeId, content: &str) -> Result<(), NodeError>;

    /// Applies new attributes to an existing instance.
    fn commit_update(
        &mut self,
        instance: NodeId,
        old_props: &Props,
        new_props: &Props,
    ) -> Result<(), NodeError>;

    /// Drops a node created for a render that was thrown away. The node was
    /// never attached to the container.
    fn release_instance(&mut self, _instance: NodeId) {}
}

/// Host operation recorded by [`MemoryHost`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    CreateInstance { id: NodeId, tag: String },
    CreateText { id: NodeId, content: String },
    AppendInitialChild { parent: NodeId, child: NodeId },
    AppendChild { parent: NodeId, child: NodeId },
    InsertBefore { parent: NodeId, child: NodeId, before: NodeId },
    RemoveChild { parent: NodeId, child: NodeId },
    CommitTextUpdate { id: NodeId, content: String },
    CommitUpdate { id: NodeId },
}

#[derive(Clone, Debug)]
pub enum MemoryNodeKind {
    Container,
    Element { tag: String, props: Props },
    Text(String),
}

#[derive(Clone, Debug)]
pub struct MemoryNode {
    pub kind: MemoryNodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Default)]
struct MemoryHostInner {
    nodes: HashMap<NodeId, MemoryNode>,
    // ids are never reused
    next_id: NodeId,
    ops: Vec<HostOp>,
}

impl MemoryHostInner {
    fn insert(&mut self, kind: MemoryNodeKind) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            MemoryNode {
                kind,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    fn node(&self, id: NodeId) -> Result<&MemoryNode, NodeError> {
        self.nodes.get(&id).ok_or(NodeError::Missing { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemoryNode, NodeError> {
        self.nodes.get_mut(&id).ok_or(NodeError::Missing { id })
    }

    fn detach(&mut self, child: NodeId) -> Result<(), NodeError> {
        if let Some(parent) = self.node_mut(child)?.parent.take() {
            self.node_mut(parent)?.children.retain(|&id| id != child);
        }
        Ok(())
    }

    fn append(&mut self, parent: NodeId, child: NodeId) -> Result<(), NodeError> {
        self.node(parent)?;
        self.detach(child)?;
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: NodeId,
    ) -> Result<(), NodeError> {
        self.node(parent)?;
        self.detach(child)?;
        let index = self
            .node(parent)?
            .children
            .iter()
            .position(|&id| id == before)
            .ok_or(NodeError::NotAChild {
                parent,
                child: before,
            })?;
        self.node_mut(parent)?.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for child in node.children {
            self.drop_subtree(child);
        }
    }
}

/// In-memory host tree with an operation log.
///
/// Cloning yields another handle to the same tree, so one handle can be
/// given to a root while another inspects the result.
#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Rc<RefCell<MemoryHostInner>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty container node to render into.
    pub fn create_container(&self) -> NodeId {
        self.inner.borrow_mut().insert(MemoryNodeKind::Container)
    }

    pub fn node(&self, id: NodeId) -> Option<MemoryNode> {
        self.inner.borrow().node(id).ok().cloned()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).map(|node| node.children).unwrap_or_default()
    }

    /// Number of live nodes, containers included.
    pub fn len(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.inner.borrow().ops.clone()
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        std::mem::take(&mut self.inner.borrow_mut().ops)
    }

    /// Serializes the children of `id` as markup. Handlers are omitted.
    pub fn html(&self, id: NodeId) -> String {
        let inner = self.inner.borrow();
        let mut output = String::new();
        if let Ok(node) = inner.node(id) {
            for &child in &node.children {
                write_node(&inner, &mut output, child);
            }
        }
        output
    }

    /// Depth-first search below `root` for the first element with `tag`.
    pub fn find_by_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.find(root, &|node: &MemoryNode| {
            matches!(&node.kind, MemoryNodeKind::Element { tag: t, .. } if t == tag)
        })
    }

    /// Depth-first search below `root` for an element whose `id` attribute
    /// equals `value`.
    pub fn find_by_id(&self, root: NodeId, value: &str) -> Option<NodeId> {
        self.find(root, &|node: &MemoryNode| match &node.kind {
            MemoryNodeKind::Element { props, .. } => props.get_str("id") == Some(value),
            _ => false,
        })
    }

    fn find(&self, root: NodeId, predicate: &dyn Fn(&MemoryNode) -> bool) -> Option<NodeId> {
        let inner = self.inner.borrow();
        let mut stack: Vec<NodeId> =
            inner.node(root).ok()?.children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Ok(node) = inner.node(id) else { continue };
            if predicate(node) {
                return Some(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    pub fn handler(&self, id: NodeId, event: &str) -> Option<EventHandler> {
        match &self.node(id)?.kind {
            MemoryNodeKind::Element { props, .. } => props.handler(event).cloned(),
            _ => None,
        }
    }

    /// Invokes the `onClick` handler of `id`. Returns `false` when there is
    /// none.
    pub fn click(&self, id: NodeId) -> bool {
        // the handler may re-enter the host through a synchronous render
        match self.handler(id, "onClick") {
            Some(handler) => {
                handler.call();
                true
            }
            None => false,
        }
    }
}

fn write_node(inner: &MemoryHostInner, output: &mut String, id: NodeId) {
    let Ok(node) = inner.node(id) else { return };
    match &node.kind {
        MemoryNodeKind::Text(content) => output.push_str(&escape(content)),
        MemoryNodeKind::Container => {
            for &child in &node.children {
                write_node(inner, output, child);
            }
        }
        MemoryNodeKind::Element { tag, props } => {
            output.push('<');
            output.push_str(tag);
            for (name, value) in props.attributes() {
                let text = match value {
                    PropValue::Str(value) => escape(value),
                    PropValue::Int(value) => value.to_string(),
                    PropValue::Float(value) => value.to_string(),
                    PropValue::Bool(value) => value.to_string(),
                    PropValue::Handler(_) | PropValue::Any(_) => continue,
                };
                let _ = write!(output, " {name}=\"{text}\"");
            }
            output.push('>');
            for &child in &node.children {
                write_node(inner, output, child);
            }
            let _ = write!(output, "</{tag}>");
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl HostConfig for MemoryHost {
    fn create_instance(&mut self, tag: &str, props: &Props) -> NodeId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.insert(MemoryNodeKind::Element {
            tag: tag.to_owned(),
            props: props.clone(),
        });
        inner.ops.push(HostOp::CreateInstance {
            id,
            tag: tag.to_owned(),
        });
        id
    }

    fn create_text_instance(&mut self, content: &str) -> NodeId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.insert(MemoryNodeKind::Text(content.to_owned()));
        inner.ops.push(HostOp::CreateText {
            id,
            content: content.to_owned(),
        });
        id
    }

    fn append_initial_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), NodeError> {
        let mut inner = self.inner.borrow_mut();
        inner.append(parent, child)?;
        inner.ops.push(HostOp::AppendInitialChild { parent, child });
        Ok(())
    }

    fn append_child_to_container(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<(), NodeError> {
        let mut inner = self.inner.borrow_mut();
        inner.append(parent, child)?;
        inner.ops.push(HostOp::AppendChild { parent, child });
        Ok(())
    }

    fn insert_child_to_container(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: NodeId,
    ) -> Result<(), NodeError> {
        let mut inner = self.inner.borrow_mut();
        inner.insert_before(parent, child, before)?;
        inner.ops.push(HostOp::InsertBefore {
            parent,
            child,
            before,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), NodeError> {
        let mut inner = self.inner.borrow_mut();
        if inner.node(child)?.parent != Some(parent) {
            return Err(NodeError::NotAChild { parent, child });
        }
        inner.detach(child)?;
        inner.drop_subtree(child);
        inner.ops.push(HostOp::RemoveChild { parent, child });
        Ok(())
    }

    fn commit_text_update(&mut self, text: NodeId, content: &str) -> Result<(), NodeError> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.node_mut(text)?.kind {
            MemoryNodeKind::Text(current) => {
                *current = content.to_owned();
            }
            _ => {
                return Err(NodeError::TypeMismatch {
                    id: text,
                    expected: "text",
                })
            }
        }
        inner.ops.push(HostOp::CommitTextUpdate {
            id: text,
            content: content.to_owned(),
        });
        Ok(())
    }

    fn commit_update(
        &mut self,
        instance: NodeId,
        _old_props: &Props,
        new_props: &Props,
    ) -> Result<(), NodeError> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.node_mut(instance)?.kind {
            MemoryNodeKind::Element { props, .. } => {
                *props = new_props.clone();
            }
            _ => {
                return Err(NodeError::TypeMismatch {
                    id: instance,
                    expected: "element",
                })
            }
        }
        inner.ops.push(HostOp::CommitUpdate { id: instance });
        Ok(())
    }

    fn release_instance(&mut self, instance: NodeId) {
        let mut inner = self.inner.borrow_mut();
        if inner.nodes.contains_key(&instance) {
            let _ = inner.detach(instance);
            inner.nodes.remove(&instance);
        }
    }
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
