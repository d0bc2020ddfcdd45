//! NoteTree - the in-memory local tree of note items.
//!
//! Items live in an arena and are addressed by [`NodeId`] handles. Parent and
//! child links are stored as handles, so reassigning an identity or moving a
//! subtree never invalidates a handle held elsewhere.

use crate::{
    error::Result,
    note::{NoteKind, NotePayload, PermanentFolder, ROOT_IDENTITY},
    Error, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Handle to a node in a [`NoteTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single item in the local tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteNode {
    /// Stable, globally unique identity
    pub identity: Uuid,
    pub kind: NoteKind,
    pub title: String,
    pub content: String,
    pub url: String,
    /// When the item was first created (milliseconds since epoch)
    pub creation_time: Timestamp,
    /// Set for the permanent top-level folders
    pub permanent: Option<PermanentFolder>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl NoteNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent.is_some()
    }

    /// Snapshot of the content fields.
    pub fn payload(&self) -> NotePayload {
        NotePayload {
            kind: self.kind,
            title: self.title.clone(),
            content: self.content.clone(),
            url: self.url.clone(),
        }
    }
}

/// The local tree store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTree {
    nodes: Vec<Option<NoteNode>>,
    #[serde(skip)]
    by_identity: HashMap<Uuid, NodeId>,
    root: NodeId,
}

impl NoteTree {
    /// Create a tree holding the root and every permanent folder.
    pub fn new(creation_time: Timestamp) -> Self {
        let root = NoteNode {
            identity: ROOT_IDENTITY,
            kind: NoteKind::Folder,
            title: String::new(),
            content: String::new(),
            url: String::new(),
            creation_time,
            permanent: None,
            parent: None,
            children: Vec::new(),
        };

        let mut tree = Self {
            nodes: vec![Some(root)],
            by_identity: HashMap::from([(ROOT_IDENTITY, NodeId(0))]),
            root: NodeId(0),
        };

        let mut folders = Vec::with_capacity(PermanentFolder::ALL.len());
        for folder in PermanentFolder::ALL {
            let id = tree.alloc(NoteNode {
                identity: folder.identity(),
                kind: NoteKind::Folder,
                title: folder.title().to_string(),
                content: String::new(),
                url: String::new(),
                creation_time,
                permanent: Some(folder),
                parent: Some(tree.root),
                children: Vec::new(),
            });
            folders.push(id);
        }
        if let Some(Some(root)) = tree.nodes.first_mut() {
            root.children = folders;
        }

        tree
    }

    /// The invisible root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Handle of a permanent folder.
    pub fn permanent_node(&self, folder: PermanentFolder) -> Option<NodeId> {
        self.find_by_identity(&folder.identity())
    }

    /// Get a node by handle.
    pub fn get(&self, id: NodeId) -> Option<&NoteNode> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Get a node by handle or fail with [`Error::NodeNotFound`].
    pub fn node(&self, id: NodeId) -> Result<&NoteNode> {
        self.get(id).ok_or(Error::NodeNotFound(id))
    }

    /// Check if a handle refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Find a live node by identity.
    pub fn find_by_identity(&self, identity: &Uuid) -> Option<NodeId> {
        self.by_identity.get(identity).copied()
    }

    /// Children of `id`, empty for unknown handles.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Position of `id` among its siblings.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// True if `ancestor` is `id` itself or lies on its parent chain.
    pub fn has_ancestor(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Number of live nodes, including the root and permanent folders.
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-order depth-first traversal starting at the root.
    pub fn iter(&self) -> DepthFirst<'_> {
        self.iter_from(self.root)
    }

    /// Pre-order depth-first traversal of the subtree rooted at `start`.
    pub fn iter_from(&self, start: NodeId) -> DepthFirst<'_> {
        DepthFirst {
            tree: self,
            stack: vec![start],
        }
    }

    /// Create a node under `parent` at `index`.
    pub fn add(
        &mut self,
        parent: NodeId,
        index: usize,
        identity: Uuid,
        payload: NotePayload,
        creation_time: Timestamp,
    ) -> Result<NodeId> {
        let parent_node = self.node(parent)?;
        if parent == self.root {
            return Err(Error::PermanentNode(parent));
        }
        if !parent_node.kind.accepts_child(payload.kind) {
            return Err(Error::InvalidParent {
                parent: parent_node.kind.to_string(),
                child: payload.kind.to_string(),
            });
        }
        if index > parent_node.children.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: parent_node.children.len(),
            });
        }
        if self.by_identity.contains_key(&identity) {
            return Err(Error::DuplicateIdentity(identity));
        }

        let id = self.alloc(NoteNode {
            identity,
            kind: payload.kind,
            title: payload.title,
            content: payload.content,
            url: payload.url,
            creation_time,
            permanent: None,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.node_mut(parent)?.children.insert(index, id);
        Ok(id)
    }

    /// Move `id` so that it ends up at `index` among the children of
    /// `new_parent`. Moving a node onto its current position is a no-op.
    pub fn move_node(&mut self, id: NodeId, new_parent: NodeId, index: usize) -> Result<()> {
        let node = self.node(id)?;
        if node.is_permanent() || id == self.root {
            return Err(Error::PermanentNode(id));
        }
        let kind = node.kind;
        let old_parent = node.parent.ok_or(Error::PermanentNode(id))?;

        let target = self.node(new_parent)?;
        if new_parent == self.root {
            return Err(Error::PermanentNode(new_parent));
        }
        if !target.kind.accepts_child(kind) {
            return Err(Error::InvalidParent {
                parent: target.kind.to_string(),
                child: kind.to_string(),
            });
        }
        if self.has_ancestor(new_parent, id) {
            return Err(Error::InvalidMove {
                node: id,
                new_parent,
            });
        }

        let max_index = if old_parent == new_parent {
            target.children.len() - 1
        } else {
            target.children.len()
        };
        if index > max_index {
            return Err(Error::IndexOutOfBounds {
                index,
                len: target.children.len(),
            });
        }
        if old_parent == new_parent && self.index_of(id) == Some(index) {
            return Ok(());
        }

        self.node_mut(old_parent)?.children.retain(|&c| c != id);
        self.node_mut(new_parent)?.children.insert(index, id);
        self.node_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    /// Remove `id` and its whole subtree. Returns the removed nodes in
    /// pre-order.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NoteNode>> {
        let node = self.node(id)?;
        if node.is_permanent() || id == self.root {
            return Err(Error::PermanentNode(id));
        }
        if let Some(parent) = node.parent {
            self.node_mut(parent)?.children.retain(|&c| c != id);
        }

        let doomed: Vec<NodeId> = self.iter_from(id).collect();
        let mut removed = Vec::with_capacity(doomed.len());
        for handle in doomed {
            if let Some(node) = self.nodes[handle.0].take() {
                self.by_identity.remove(&node.identity);
                removed.push(node);
            }
        }
        Ok(removed)
    }

    /// Overwrite the content fields of `id`. The kind cannot change.
    ///
    /// Returns `true` if anything changed.
    pub fn update_payload(&mut self, id: NodeId, payload: &NotePayload) -> Result<bool> {
        let node = self.node(id)?;
        if node.kind != payload.kind {
            return Err(Error::KindMismatch {
                expected: node.kind.to_string(),
                actual: payload.kind.to_string(),
            });
        }
        if node.title == payload.title && node.content == payload.content && node.url == payload.url
        {
            return Ok(false);
        }

        let node = self.node_mut(id)?;
        node.title.clone_from(&payload.title);
        node.content.clone_from(&payload.content);
        node.url.clone_from(&payload.url);
        Ok(true)
    }

    /// Give `id` a new identity. The handle stays valid.
    pub fn replace_identity(&mut self, id: NodeId, identity: Uuid) -> Result<()> {
        let node = self.node(id)?;
        if node.is_permanent() || id == self.root {
            return Err(Error::PermanentNode(id));
        }
        if node.identity == identity {
            return Ok(());
        }
        if self.by_identity.contains_key(&identity) {
            return Err(Error::DuplicateIdentity(identity));
        }

        let old = node.identity;
        self.by_identity.remove(&old);
        self.by_identity.insert(identity, id);
        self.node_mut(id)?.identity = identity;
        Ok(())
    }

    /// Rebuild the identity index after deserialization.
    ///
    /// Fails if two live nodes share an identity.
    pub fn reindex(&mut self) -> Result<()> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (i, slot) in self.nodes.iter().enumerate() {
            if let Some(node) = slot {
                if index.insert(node.identity, NodeId(i)).is_some() {
                    return Err(Error::DuplicateIdentity(node.identity));
                }
            }
        }
        self.by_identity = index;
        Ok(())
    }

    fn alloc(&mut self, node: NoteNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_identity.insert(node.identity, id);
        self.nodes.push(Some(node));
        id
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NoteNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::NodeNotFound(id))
    }
}

/// Pre-order iterator over node handles.
#[derive(Debug)]
pub struct DepthFirst<'a> {
    tree: &'a NoteTree,
    stack: Vec<NodeId>,
}

impl Iterator for DepthFirst<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}
