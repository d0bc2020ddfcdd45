//! Identity matching between the local tree and the remote forest.
//!
//! Matching happens in two phases. [`IdentityMatches`] is built once before
//! the merge and never changes afterwards. [`ConsumedMatches`] records which
//! proposed matches the merge has already applied.

use crate::{
    config::MergeConfig,
    error::Result,
    forest::{RemoteForest, RemoteNodeId},
    tracker::Tracker,
    tree::{NodeId, NoteTree},
    update::RemoteUpdate,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A local item and the remote node sharing its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityMatch {
    pub local: NodeId,
    pub remote: RemoteNodeId,
}

/// Proposed identity matches for one merge pass.
#[derive(Debug, Clone, Default)]
pub struct IdentityMatches {
    by_identity: HashMap<Uuid, IdentityMatch>,
    by_local: HashSet<NodeId>,
    reassigned: Vec<NodeId>,
}

impl IdentityMatches {
    /// Match local items to remote nodes by identity.
    ///
    /// Only remote nodes under permanent folders this client merges are
    /// considered. Pairs whose kind differs, or whose content differs for a
    /// content-bearing kind, are split by giving the local item a fresh
    /// random identity. A local item already tracked as the remote entity
    /// only needs a matching kind, since its content may carry local edits.
    pub fn build(
        tree: &mut NoteTree,
        forest: &RemoteForest,
        tracker: &Tracker,
        config: &MergeConfig,
    ) -> Result<Self> {
        let remote_by_identity = reachable_remote_nodes(forest, config);
        let mut matches = Self::default();
        let mut collisions = Vec::new();

        for local in tree.iter() {
            let Some(node) = tree.get(local) else {
                continue;
            };
            if node.is_permanent() || local == tree.root() {
                continue;
            }
            let Some(&remote) = remote_by_identity.get(&node.identity) else {
                continue;
            };

            let update = forest.node(remote).update();
            let compatible = node.kind == update.kind
                && (!node.kind.is_content_bearing()
                    || node.content == update.content
                    || is_same_entity(tracker, local, update));
            if !compatible {
                collisions.push(local);
                continue;
            }

            if matches.by_identity.contains_key(&node.identity) {
                tracing::error!(identity = %node.identity, "duplicate local identity");
                continue;
            }
            matches
                .by_identity
                .insert(node.identity, IdentityMatch { local, remote });
            matches.by_local.insert(local);
        }

        for local in collisions {
            let fresh = Uuid::new_v4();
            if let Some(node) = tree.get(local) {
                tracing::warn!(
                    old = %node.identity,
                    new = %fresh,
                    "identity collision with incompatible remote item, reassigning"
                );
            }
            tree.replace_identity(local, fresh)?;
            matches.reassigned.push(local);
        }

        Ok(matches)
    }

    /// Proposed match for an identity.
    pub fn get(&self, identity: &Uuid) -> Option<IdentityMatch> {
        self.by_identity.get(identity).copied()
    }

    /// Whether `local` is claimed by identity.
    pub fn is_matched(&self, local: NodeId) -> bool {
        self.by_local.contains(&local)
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    /// Number of local items that received a fresh identity.
    pub fn reassigned(&self) -> usize {
        self.reassigned.len()
    }

    /// Local items that received a fresh identity, in tree order.
    pub fn reassigned_nodes(&self) -> &[NodeId] {
        &self.reassigned
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &IdentityMatch)> + '_ {
        self.by_identity.iter()
    }
}

/// Identities whose proposed match the merge has already applied.
#[derive(Debug, Clone, Default)]
pub struct ConsumedMatches {
    identities: HashSet<Uuid>,
}

impl ConsumedMatches {
    /// Mark a match as applied. Returns `false` if it already was.
    pub fn consume(&mut self, identity: Uuid) -> bool {
        self.identities.insert(identity)
    }

    pub fn is_consumed(&self, identity: &Uuid) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Proposed matches that were never applied.
    pub fn unconsumed<'a>(
        &'a self,
        matches: &'a IdentityMatches,
    ) -> impl Iterator<Item = &'a Uuid> + 'a {
        matches
            .iter()
            .map(|(identity, _)| identity)
            .filter(move |identity| !self.identities.contains(*identity))
    }
}

/// Whether `local` is tracked as the entity behind `update`, either under
/// its sync id or through a commit whose response has not arrived yet.
fn is_same_entity(tracker: &Tracker, local: NodeId, update: &RemoteUpdate) -> bool {
    tracker
        .get_by_node(local)
        .is_some_and(|entity| entity.sync_id() == update.sync_id || entity.commit_may_have_started())
}

fn reachable_remote_nodes(forest: &RemoteForest, config: &MergeConfig) -> HashMap<Uuid, RemoteNodeId> {
    let mut found = HashMap::new();
    let mut stack: Vec<RemoteNodeId> = forest
        .roots()
        .filter(|(tag, _)| config.folder_for_tag(tag).is_some())
        .map(|(_, id)| id)
        .collect();

    while let Some(id) = stack.pop() {
        let node = forest.node(id);
        if !node.is_permanent() {
            if let Some(identity) = node.identity() {
                found.insert(identity, id);
            }
        }
        stack.extend(node.children().iter().copied());
    }
    found
}
