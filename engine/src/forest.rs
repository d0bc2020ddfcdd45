//! Remote forest construction.
//!
//! Turns the flat, unordered update list of one sync cycle into one tree per
//! permanent folder tag. Anything that cannot be reached from a permanent
//! root is counted and dropped.
//!
//! # Algorithm
//!
//! 1. Partition updates: deletions are dropped, permanent roots are kept
//!    (first per tag), regular updates are validated
//! 2. Resolve duplicate identities (folder wins, else later creation time)
//! 3. Group the survivors by parent identity
//! 4. Expand every root from an explicit worklist with a depth budget,
//!    sorting each child list by position key
//! 5. Count whatever is left in the parent groups as ignored

use crate::{
    config::MergeConfig,
    note::{NoteKind, PermanentFolder, ROOT_TAG},
    update::RemoteUpdate,
    ServerVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::{hash_map::Entry, BTreeMap, HashMap};
use uuid::Uuid;

/// Handle to a node in a [`RemoteForest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteNodeId(usize);

/// A remote update placed in its tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTreeNode {
    update: RemoteUpdate,
    identity: Option<Uuid>,
    children: Vec<RemoteNodeId>,
}

impl RemoteTreeNode {
    pub fn update(&self) -> &RemoteUpdate {
        &self.update
    }

    /// Parsed identity. Permanent roots with an unknown tag have none.
    pub fn identity(&self) -> Option<Uuid> {
        self.identity
    }

    pub fn kind(&self) -> NoteKind {
        self.update.kind
    }

    /// Children sorted by position key.
    pub fn children(&self) -> &[RemoteNodeId] {
        &self.children
    }

    pub fn is_permanent(&self) -> bool {
        self.update.is_permanent()
    }
}

/// Diagnostic counters for valid updates that never made it into a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoredUpdates {
    pub count: i64,
    /// Highest server version among the ignored updates
    pub max_version: Option<ServerVersion>,
}

impl IgnoredUpdates {
    fn record(&mut self, update: &RemoteUpdate) {
        self.count += 1;
        self.max_version = Some(
            self.max_version
                .map_or(update.server_version, |v| v.max(update.server_version)),
        );
    }
}

/// One tree per permanent folder tag, built from a single update batch.
#[derive(Debug, Clone, Default)]
pub struct RemoteForest {
    nodes: Vec<RemoteTreeNode>,
    roots: BTreeMap<String, RemoteNodeId>,
    by_identity: HashMap<Uuid, RemoteNodeId>,
    ignored: IgnoredUpdates,
}

/// Build the remote forest for one sync cycle.
pub fn build_remote_forest(
    updates: impl IntoIterator<Item = RemoteUpdate>,
    config: &MergeConfig,
) -> RemoteForest {
    RemoteForest::build(updates, config)
}

/// A regular update that passed validation.
struct Candidate {
    identity: Uuid,
    parent: Uuid,
    update: RemoteUpdate,
}

impl RemoteForest {
    /// Build a forest from `updates`. Never fails: malformed, orphaned and
    /// duplicate updates are dropped.
    pub fn build(updates: impl IntoIterator<Item = RemoteUpdate>, config: &MergeConfig) -> Self {
        let mut forest = Self::default();
        let mut candidates: Vec<Candidate> = Vec::new();

        for update in updates {
            if update.is_deleted {
                continue;
            }

            if let Some(tag) = update.permanent_tag.clone().filter(|t| !t.is_empty()) {
                if tag == ROOT_TAG {
                    continue;
                }
                if forest.roots.contains_key(&tag) {
                    tracing::debug!(tag = %tag, sync_id = %update.sync_id, "duplicate permanent folder update dropped");
                    continue;
                }
                let identity = PermanentFolder::from_tag(&tag)
                    .map(PermanentFolder::identity)
                    .or_else(|| update.parsed_identity());
                let id = forest.alloc(update, identity);
                forest.roots.insert(tag, id);
                continue;
            }

            match update.validate() {
                Ok((identity, parent)) => candidates.push(Candidate {
                    identity,
                    parent,
                    update,
                }),
                Err(err) => tracing::debug!(error = %err, "malformed remote update dropped"),
            }
        }

        let candidates = resolve_duplicates(candidates);

        let mut by_parent: HashMap<Uuid, Vec<Candidate>> = HashMap::new();
        for candidate in candidates {
            by_parent.entry(candidate.parent).or_default().push(candidate);
        }

        let mut stack: Vec<(RemoteNodeId, usize)> = forest
            .roots
            .values()
            .map(|&root| (root, config.max_tree_depth))
            .collect();

        while let Some((id, budget)) = stack.pop() {
            if budget == 0 {
                continue;
            }
            let node = &forest.nodes[id.0];
            if !node.is_permanent() && !node.kind().can_have_children() {
                continue;
            }
            let Some(identity) = node.identity else {
                continue;
            };
            let Some(mut children) = by_parent.remove(&identity) else {
                continue;
            };

            let parent_kind = if node.is_permanent() {
                NoteKind::Folder
            } else {
                node.kind()
            };
            children.retain(|child| {
                let fits = child.update.kind == NoteKind::Unsupported
                    || parent_kind.accepts_child(child.update.kind);
                if !fits {
                    tracing::debug!(
                        sync_id = %child.update.sync_id,
                        parent = %parent_kind,
                        child = %child.update.kind,
                        "remote child of the wrong kind dropped"
                    );
                }
                fits
            });
            children.sort_by(|a, b| {
                a.update
                    .position
                    .cmp(&b.update.position)
                    .then_with(|| a.update.sync_id.cmp(&b.update.sync_id))
            });

            for child in children {
                let child_id = forest.alloc(child.update, Some(child.identity));
                forest.by_identity.insert(child.identity, child_id);
                forest.nodes[id.0].children.push(child_id);
                stack.push((child_id, budget - 1));
            }
        }

        for update in by_parent.values().flatten().map(|c| &c.update) {
            forest.ignored.record(update);
        }
        if forest.ignored.count > 0 {
            tracing::warn!(
                count = forest.ignored.count,
                max_version = ?forest.ignored.max_version,
                "remote updates unreachable from any permanent folder"
            );
        }

        forest
    }

    fn alloc(&mut self, update: RemoteUpdate, identity: Option<Uuid>) -> RemoteNodeId {
        let id = RemoteNodeId(self.nodes.len());
        self.nodes.push(RemoteTreeNode {
            update,
            identity,
            children: Vec::new(),
        });
        id
    }

    /// Root node for a permanent folder tag.
    pub fn root(&self, tag: &str) -> Option<RemoteNodeId> {
        self.roots.get(tag).copied()
    }

    /// All roots in tag order.
    pub fn roots(&self) -> impl Iterator<Item = (&str, RemoteNodeId)> + '_ {
        self.roots.iter().map(|(tag, &id)| (tag.as_str(), id))
    }

    pub fn node(&self, id: RemoteNodeId) -> &RemoteTreeNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: RemoteNodeId) -> &[RemoteNodeId] {
        &self.nodes[id.0].children
    }

    /// Find a non-permanent node by identity.
    pub fn find_by_identity(&self, identity: &Uuid) -> Option<RemoteNodeId> {
        self.by_identity.get(identity).copied()
    }

    /// Number of materialized nodes, roots included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Counters for updates that were valid but unreachable.
    pub fn ignored_updates(&self) -> IgnoredUpdates {
        self.ignored
    }
}

/// Keep exactly one update per identity, preserving input order of the
/// survivors.
fn resolve_duplicates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut winners: HashMap<Uuid, usize> = HashMap::with_capacity(candidates.len());
    for (i, candidate) in candidates.iter().enumerate() {
        match winners.entry(candidate.identity) {
            Entry::Vacant(slot) => {
                slot.insert(i);
            }
            Entry::Occupied(mut slot) => {
                let current = &candidates[*slot.get()].update;
                tracing::warn!(
                    identity = %candidate.identity,
                    kept = %current.sync_id,
                    other = %candidate.update.sync_id,
                    "duplicate identity in remote updates"
                );
                if prefers(&candidate.update, current) {
                    slot.insert(i);
                }
            }
        }
    }

    candidates
        .into_iter()
        .enumerate()
        .filter(|(i, c)| winners.get(&c.identity) == Some(i))
        .map(|(_, c)| c)
        .collect()
}

/// Whether `a` should replace `b` when both claim the same identity.
fn prefers(a: &RemoteUpdate, b: &RemoteUpdate) -> bool {
    let a_folder = a.kind == NoteKind::Folder;
    let b_folder = b.kind == NoteKind::Folder;
    if a_folder != b_folder {
        return a_folder;
    }
    (a.creation_time, &a.sync_id) > (b.creation_time, &b.sync_id)
}
