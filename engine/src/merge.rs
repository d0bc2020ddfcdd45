//! Merge of a remote forest into the local tree.
//!
//! This is the core of the initial sync. After a merge every remote tree is
//! reflected structurally and positionally in the local tree, and the
//! tracker describes every item under a merged permanent folder.
//!
//! # Algorithm
//!
//! For each remote root with a local permanent folder:
//!
//! 1. Track the local folder against the remote root
//! 2. Walk the remote children in order, keeping a local insertion index:
//!    - match by identity, else by content starting at the index,
//!      else create a new local item
//!    - move the match to the index, adopt the remote identity and payload
//!    - descend into the child
//! 3. Local children past the last remote child are local-only creations,
//!    unless they are claimed by identity elsewhere and will be moved
//!
//! The walk uses an explicit frame stack, so remote depth is bounded only by
//! the forest builder's depth ceiling.

use crate::{
    config::{MergeConfig, ReuploadPolicy},
    error::Result,
    forest::{RemoteForest, RemoteNodeId},
    matcher::{ConsumedMatches, IdentityMatches},
    metadata::EntityMetadata,
    note::{syncable_hash, NoteKind},
    position::PositionKey,
    tracker::{TrackedEntity, Tracker},
    tree::{NodeId, NoteNode, NoteTree},
    update::RemoteUpdate,
    ServerVersion, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Server version of an entity that has never been committed.
pub const UNCOMMITTED_VERSION: ServerVersion = -1;

/// What a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    /// Local items created from remote nodes
    pub remote_created: usize,
    pub matched_by_identity: usize,
    pub matched_by_content: usize,
    /// Local-only items registered for commit
    pub local_creations: usize,
    /// Local items given a fresh identity to break a collision
    pub identities_reassigned: usize,
    /// Valid remote updates that could not be placed
    pub ignored_updates: i64,
}

/// Merge `forest` into `tree`, recording every pairing in `tracker`.
///
/// `now` is used as the creation time of local-only entities. Errors are only
/// returned when the local tree rejects an operation, which means its own
/// invariants were already broken.
pub fn merge(
    forest: RemoteForest,
    tree: &mut NoteTree,
    tracker: &mut Tracker,
    config: &MergeConfig,
    now: Timestamp,
) -> Result<MergeStats> {
    NoteMerger::new(forest, tree, tracker, config, now)
        .run()
        .inspect_err(|err| tracing::error!(error = %err, "merge aborted"))
}

enum Frame {
    /// Reconcile the children of `local` against those of `remote`.
    Subtree {
        local: NodeId,
        remote: RemoteNodeId,
        next_remote: usize,
        local_index: usize,
    },
    /// Register the local-only children of `parent` from `next` onwards.
    LocalOnly { parent: NodeId, next: usize },
}

struct NoteMerger<'a> {
    forest: RemoteForest,
    tree: &'a mut NoteTree,
    tracker: &'a mut Tracker,
    config: &'a MergeConfig,
    now: Timestamp,
    matches: IdentityMatches,
    consumed: ConsumedMatches,
    stats: MergeStats,
}

impl<'a> NoteMerger<'a> {
    fn new(
        forest: RemoteForest,
        tree: &'a mut NoteTree,
        tracker: &'a mut Tracker,
        config: &'a MergeConfig,
        now: Timestamp,
    ) -> Self {
        Self {
            forest,
            tree,
            tracker,
            config,
            now,
            matches: IdentityMatches::default(),
            consumed: ConsumedMatches::default(),
            stats: MergeStats::default(),
        }
    }

    fn run(mut self) -> Result<MergeStats> {
        self.matches = IdentityMatches::build(self.tree, &self.forest, self.tracker, self.config)?;
        self.stats.identities_reassigned = self.matches.reassigned();

        // A tracked item given a fresh identity is a local change to commit.
        for &node in self.matches.reassigned_nodes() {
            let Some(sync_id) = self.tracker.get_by_node(node).map(|e| e.sync_id().to_string()) else {
                continue;
            };
            let identity = self.tree.node(node)?.identity;
            self.tracker.update_identity(&sync_id, identity)?;
            self.tracker.increment_sequence_number(&sync_id)?;
        }

        let mut roots = Vec::new();
        for (tag, remote) in self.forest.roots() {
            match self.config.folder_for_tag(tag) {
                Some(folder) => roots.push((folder, remote)),
                None => tracing::warn!(tag, "remote permanent folder not merged by this client"),
            }
        }

        for (folder, remote) in roots {
            let Some(local) = self.tree.permanent_node(folder) else {
                tracing::warn!(tag = folder.tag(), "no local permanent folder");
                continue;
            };
            self.merge_subtree(local, remote)?;
        }

        for identity in self.consumed.unconsumed(&self.matches) {
            tracing::warn!(%identity, "identity match never applied");
        }

        let ignored = self.forest.ignored_updates();
        self.tracker.record_ignored_updates(ignored);
        self.stats.ignored_updates = ignored.count;

        if self.config.reupload == ReuploadPolicy::Enabled {
            self.tracker.set_notes_reuploaded();
        }

        tracing::debug!(stats = ?self.stats, "merge finished");
        Ok(self.stats)
    }

    fn merge_subtree(&mut self, local: NodeId, remote: RemoteNodeId) -> Result<()> {
        self.track_remote(local, remote)?;

        let mut stack = vec![Frame::Subtree {
            local,
            remote,
            next_remote: 0,
            local_index: 0,
        }];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Subtree {
                    local,
                    remote,
                    next_remote,
                    local_index,
                } => {
                    let Some(child) = self.forest.children(remote).get(next_remote).copied() else {
                        stack.push(Frame::LocalOnly {
                            parent: local,
                            next: local_index,
                        });
                        continue;
                    };

                    match self.place_remote_child(local, child, local_index)? {
                        Some(placed) => {
                            stack.push(Frame::Subtree {
                                local,
                                remote,
                                next_remote: next_remote + 1,
                                local_index: local_index + 1,
                            });
                            stack.push(Frame::Subtree {
                                local: placed,
                                remote: child,
                                next_remote: 0,
                                local_index: 0,
                            });
                        }
                        None => stack.push(Frame::Subtree {
                            local,
                            remote,
                            next_remote: next_remote + 1,
                            local_index,
                        }),
                    }
                }
                Frame::LocalOnly { parent, next } => {
                    let Some(&child) = self.tree.children(parent).get(next) else {
                        continue;
                    };
                    stack.push(Frame::LocalOnly {
                        parent,
                        next: next + 1,
                    });
                    // Claimed by identity: a later subtree moves it into place.
                    if self.matches.is_matched(child) {
                        continue;
                    }
                    self.track_local_creation(child)?;
                    stack.push(Frame::LocalOnly {
                        parent: child,
                        next: 0,
                    });
                }
            }
        }
        Ok(())
    }

    /// Put the local counterpart of `remote` at `index` under `parent`.
    ///
    /// Returns `None` if the remote node was skipped and consumed no index.
    fn place_remote_child(
        &mut self,
        parent: NodeId,
        remote: RemoteNodeId,
        index: usize,
    ) -> Result<Option<NodeId>> {
        let node = self.forest.node(remote);
        let update = node.update();
        let Some(identity) = node.identity() else {
            return Ok(None);
        };
        if node.kind() == NoteKind::Unsupported {
            tracing::debug!(sync_id = %update.sync_id, "remote item of unsupported kind skipped");
            return Ok(None);
        }

        // A pending local deletion wins. It may still be keyed by the sync id
        // the item was committed under before the server assigned one.
        let tombstone = [
            self.tracker.get(&update.sync_id),
            self.tracker.get_by_identity(&identity),
        ]
        .into_iter()
        .flatten()
        .find(|e| e.is_tombstone())
        .map(|e| e.sync_id().to_string());
        if let Some(tombstone) = tombstone {
            if tombstone != update.sync_id && self.tracker.get(&update.sync_id).is_none() {
                self.tracker
                    .update_sync_id_if_needed(&tombstone, &update.sync_id)?;
            }
            tracing::debug!(sync_id = %update.sync_id, "remote item has a pending local deletion");
            return Ok(None);
        }

        let payload = update.payload();
        let creation_time = update.creation_time;

        let matched = match self.matches.get(&identity).filter(|m| m.remote == remote) {
            Some(found) => {
                self.consumed.consume(identity);
                self.stats.matched_by_identity += 1;
                Some(found.local)
            }
            None => {
                let found = self.find_content_match(parent, index, update);
                if found.is_some() {
                    self.stats.matched_by_content += 1;
                }
                found
            }
        };

        let local = match matched {
            Some(local) => {
                self.tree.move_node(local, parent, index)?;
                self.tree.replace_identity(local, identity)?;
                // Uncommitted local edits to this very entity are kept.
                let edited = self
                    .tracker
                    .get_by_node(local)
                    .is_some_and(|e| e.sync_id() == update.sync_id && e.is_unsynced());
                if !edited {
                    self.tree.update_payload(local, &payload)?;
                }
                local
            }
            None => {
                self.stats.remote_created += 1;
                self.tree
                    .add(parent, index, identity, payload, creation_time)?
            }
        };

        self.track_remote(local, remote)?;
        Ok(Some(local))
    }

    /// First unclaimed child of `parent` at or after `start` that matches
    /// `update` by content.
    fn find_content_match(&self, parent: NodeId, start: usize, update: &RemoteUpdate) -> Option<NodeId> {
        let remote_title = update.canonical_title(self.config.canonicalize_title);
        self.tree
            .children(parent)
            .iter()
            .skip(start)
            .copied()
            .filter(|&child| !self.matches.is_matched(child))
            .find(|&child| {
                self.tree
                    .get(child)
                    .is_some_and(|local| self.semantics_match(local, update, &remote_title))
            })
    }

    fn semantics_match(&self, local: &NoteNode, update: &RemoteUpdate, remote_title: &str) -> bool {
        if local.kind != update.kind || local.is_permanent() {
            return false;
        }
        if local.kind.is_content_bearing() && (local.url != update.url || local.content != update.content) {
            return false;
        }
        local.title == remote_title || (self.config.canonicalize_title)(&local.title) == remote_title
    }

    /// Record `local` as the counterpart of `remote`.
    fn track_remote(&mut self, local: NodeId, remote: RemoteNodeId) -> Result<()> {
        let update = self.forest.node(remote).update();
        let item = self.tree.node(local)?;
        let identity = item.identity;
        let payload = item.payload();
        let reupload = !item.is_permanent() && self.config.reupload.is_reupload_needed(update);

        // The remote entity may still be tracked for a local item that lost
        // its identity to a collision. That item stops being the entity.
        let displaced = self
            .tracker
            .get(&update.sync_id)
            .filter(|entity| entity.node() != Some(local))
            .map(TrackedEntity::node);
        if displaced.is_some() {
            tracing::warn!(
                sync_id = %update.sync_id,
                "remote item tracked for another local item, moving entity"
            );
            self.tracker.remove(&update.sync_id)?;
        }

        let existing = self
            .tracker
            .get_by_node(local)
            .map(|e| (e.sync_id().to_string(), e.is_unsynced()));

        match existing {
            Some((sync_id, unsynced)) => {
                self.tracker
                    .update_sync_id_if_needed(&sync_id, &update.sync_id)?;
                self.tracker.update_identity(&update.sync_id, identity)?;
                self.tracker.update(
                    &update.sync_id,
                    update.server_version,
                    update.position.clone(),
                    payload,
                )?;
                if reupload && !unsynced {
                    self.tracker.increment_sequence_number(&update.sync_id)?;
                }
            }
            None => {
                let metadata = EntityMetadata::new(
                    identity,
                    update.sync_id.clone(),
                    update.server_version,
                    update.creation_time,
                    update.position.clone(),
                    payload,
                );
                self.tracker.add(local, metadata)?;
                if reupload {
                    self.tracker.increment_sequence_number(&update.sync_id)?;
                }
            }
        }

        if let Some(Some(node)) = displaced {
            if self.tree.contains(node) && !self.matches.is_matched(node) {
                self.track_local_creation(node)?;
            }
        }
        Ok(())
    }

    /// Register a local-only item so it gets committed.
    fn track_local_creation(&mut self, local: NodeId) -> Result<()> {
        if self.tracker.get_by_node(local).is_some() {
            return Ok(());
        }

        let item = self.tree.node(local)?;
        let identity = item.identity;
        let payload = item.payload();
        let sync_id = identity.hyphenated().to_string();
        let suffix = syncable_hash(&self.config.client_id, &sync_id);
        let position = self.position_for_local(local, suffix.as_bytes());

        self.tracker.add(
            local,
            EntityMetadata::new(
                identity,
                sync_id.clone(),
                UNCOMMITTED_VERSION,
                self.now,
                position,
                payload,
            ),
        )?;
        self.tracker.increment_sequence_number(&sync_id)?;
        self.stats.local_creations += 1;
        Ok(())
    }

    /// Position after the nearest tracked preceding sibling.
    fn position_for_local(&self, local: NodeId, suffix: &[u8]) -> PositionKey {
        let siblings = self
            .tree
            .parent(local)
            .map(|parent| self.tree.children(parent))
            .unwrap_or(&[]);
        let index = siblings.iter().position(|&s| s == local).unwrap_or(0);

        siblings[..index]
            .iter()
            .rev()
            .find_map(|&s| self.tracker.get_by_node(s).and_then(|e| e.position()))
            .map_or_else(
                || PositionKey::initial(suffix),
                |prev| PositionKey::after(prev, suffix),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        forest::build_remote_forest,
        note::{legacy_canonicalized_title, NotePayload, PermanentFolder},
    };
    use uuid::Uuid;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn main_id() -> Uuid {
        PermanentFolder::Main.identity()
    }

    fn item(sync: &str, n: u128, parent: Uuid, pos: u8, payload: NotePayload) -> RemoteUpdate {
        RemoteUpdate::new(sync, id(n), parent, PositionKey::from_bytes(vec![pos]), payload, 5, 100)
    }

    fn run(
        updates: Vec<RemoteUpdate>,
        tree: &mut NoteTree,
        tracker: &mut Tracker,
        config: &MergeConfig,
    ) -> MergeStats {
        let mut all = vec![RemoteUpdate::permanent("main", "main_notes", 1)];
        all.extend(updates);
        let forest = build_remote_forest(all, config);
        merge(forest, tree, tracker, config, 9999).unwrap()
    }

    fn titles(tree: &NoteTree, parent: NodeId) -> Vec<String> {
        tree.children(parent)
            .iter()
            .map(|&c| tree.node(c).unwrap().title.clone())
            .collect()
    }

    #[test]
    fn creates_remote_tree() {
        let mut tree = NoteTree::new(0);
        let mut tracker = Tracker::new();
        let stats = run(
            vec![
                item("a", 1, main_id(), 10, NotePayload::folder("A")),
                item("n", 2, id(1), 10, NotePayload::note("N", "body").with_url("https://x")),
                item("att", 3, id(2), 10, NotePayload::attachment("file", "blob")),
            ],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );

        assert_eq!(stats.remote_created, 3);
        let n = tree.find_by_identity(&id(2)).unwrap();
        let node = tree.node(n).unwrap();
        assert_eq!(node.url, "https://x");
        assert_eq!(node.creation_time, 100);
        assert_eq!(tree.children(n).len(), 1);

        assert_eq!(tracker.len(), 4);
        let entity = tracker.get_by_node(n).unwrap();
        assert_eq!(entity.sync_id(), "n");
        assert_eq!(entity.server_version(), 5);
        assert!(!tracker.has_local_changes());
        assert!(tracker.check_all_nodes_tracked(&tree));
    }

    #[test]
    fn identity_match_wins_over_content_match() {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        let decoy = tree.add(main, 0, id(50), NotePayload::folder("Shared"), 0).unwrap();
        let owner = tree.add(main, 1, id(1), NotePayload::folder("Old name"), 0).unwrap();

        let mut tracker = Tracker::new();
        let stats = run(
            vec![item("a", 1, main_id(), 10, NotePayload::folder("Shared"))],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );

        assert_eq!(stats.matched_by_identity, 1);
        assert_eq!(stats.matched_by_content, 0);
        assert_eq!(tree.children(main), &[owner, decoy]);
        assert_eq!(tree.node(owner).unwrap().title, "Shared");
        assert_eq!(tree.node(decoy).unwrap().identity, id(50));
        assert_eq!(stats.local_creations, 1);
    }

    #[test]
    fn content_match_adopts_remote_identity() {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        let local = tree
            .add(main, 0, id(50), NotePayload::note("Groceries", "milk"), 0)
            .unwrap();

        let mut tracker = Tracker::new();
        let stats = run(
            vec![item("g", 1, main_id(), 10, NotePayload::note("Groceries", "milk"))],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );

        assert_eq!(stats.matched_by_content, 1);
        assert_eq!(tree.node(local).unwrap().identity, id(1));
        assert_eq!(tracker.get_by_node(local).unwrap().sync_id(), "g");
    }

    #[test]
    fn content_match_requires_equal_content() {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        tree.add(main, 0, id(50), NotePayload::note("Groceries", "milk"), 0)
            .unwrap();

        let mut tracker = Tracker::new();
        let stats = run(
            vec![item("g", 1, main_id(), 10, NotePayload::note("Groceries", "eggs"))],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );

        assert_eq!(stats.matched_by_content, 0);
        assert_eq!(stats.remote_created, 1);
        assert_eq!(titles(&tree, main), vec!["Groceries", "Groceries"]);
    }

    #[test]
    fn legacy_title_matches_canonicalized_local() {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        let local = tree.add(main, 0, id(50), NotePayload::folder(".."), 0).unwrap();

        let mut remote = item("f", 1, main_id(), 10, NotePayload::folder("..")).into_legacy();
        remote.legacy_title = legacy_canonicalized_title("..");

        let mut tracker = Tracker::new();
        let stats = run(vec![remote], &mut tree, &mut tracker, &MergeConfig::default());
        assert_eq!(stats.matched_by_content, 1);
        assert_eq!(tree.node(local).unwrap().identity, id(1));
    }

    #[test]
    fn unsupported_remote_child_consumes_no_index() {
        let mut tree = NoteTree::new(0);
        let mut future = item("u", 1, main_id(), 10, NotePayload::folder("U"));
        future.kind = NoteKind::Unsupported;

        let mut tracker = Tracker::new();
        run(
            vec![future, item("b", 2, main_id(), 20, NotePayload::folder("B"))],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        assert_eq!(titles(&tree, main), vec!["B"]);
        assert!(tree.find_by_identity(&id(1)).is_none());
    }

    #[test]
    fn local_only_items_registered_for_commit() {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        let x = tree.add(main, 0, id(50), NotePayload::folder("X"), 0).unwrap();
        let x1 = tree.add(x, 0, id(51), NotePayload::note("x1", "c"), 0).unwrap();

        let mut tracker = Tracker::new();
        let stats = run(
            vec![item("a", 1, main_id(), 10, NotePayload::folder("A"))],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );

        assert_eq!(stats.local_creations, 2);
        let entity = tracker.get_by_node(x).unwrap();
        assert_eq!(entity.sync_id(), id(50).to_string());
        assert_eq!(entity.server_version(), UNCOMMITTED_VERSION);
        assert_eq!(entity.creation_time(), 9999);
        assert!(entity.is_unsynced());

        let a = tree.find_by_identity(&id(1)).unwrap();
        let a_pos = tracker.get_by_node(a).unwrap().position().unwrap();
        assert!(entity.position().unwrap() > a_pos);

        let pending: Vec<_> = tracker
            .entities_with_local_changes(&tree)
            .iter()
            .map(|e| e.node())
            .collect();
        assert_eq!(pending, vec![Some(x), Some(x1)]);
    }

    #[test]
    fn local_position_suffix_is_client_specific() {
        let positions: Vec<PositionKey> = ["laptop", "phone"]
            .into_iter()
            .map(|client| {
                let mut tree = NoteTree::new(0);
                let main = tree.permanent_node(PermanentFolder::Main).unwrap();
                let x = tree.add(main, 0, id(50), NotePayload::folder("X"), 0).unwrap();
                let mut tracker = Tracker::new();
                run(
                    Vec::new(),
                    &mut tree,
                    &mut tracker,
                    &MergeConfig::default().with_client_id(client),
                );
                tracker.get_by_node(x).unwrap().position().unwrap().clone()
            })
            .collect();

        let sync_id = id(50).to_string();
        assert!(positions[0]
            .as_bytes()
            .ends_with(syncable_hash("laptop", &sync_id).as_bytes()));
        assert_ne!(positions[0], positions[1]);
    }

    #[test]
    fn matched_item_elsewhere_is_moved_not_committed() {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        let a = tree.add(main, 0, id(1), NotePayload::folder("A"), 0).unwrap();
        let b = tree.add(main, 1, id(2), NotePayload::folder("B"), 0).unwrap();
        let inner = tree.add(a, 0, id(3), NotePayload::folder("Inner"), 0).unwrap();

        let mut tracker = Tracker::new();
        let stats = run(
            vec![
                item("a", 1, main_id(), 10, NotePayload::folder("A")),
                item("b", 2, main_id(), 20, NotePayload::folder("B")),
                item("i", 3, id(2), 10, NotePayload::folder("Inner")),
            ],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );

        assert_eq!(stats.local_creations, 0);
        assert_eq!(stats.matched_by_identity, 3);
        assert!(tree.children(a).is_empty());
        assert_eq!(tree.children(b), &[inner]);
        assert_eq!(tracker.get_by_node(inner).unwrap().sync_id(), "i");
        assert!(!tracker.has_local_changes());
    }

    #[test]
    fn pending_deletion_not_resurrected() {
        let mut tree = NoteTree::new(0);
        let mut tracker = Tracker::new();
        let updates = vec![item("a", 1, main_id(), 10, NotePayload::folder("A"))];
        run(updates.clone(), &mut tree, &mut tracker, &MergeConfig::default());

        let a = tree.find_by_identity(&id(1)).unwrap();
        tree.remove(a).unwrap();
        tracker.mark_deleted("a").unwrap();

        let stats = run(updates, &mut tree, &mut tracker, &MergeConfig::default());
        assert_eq!(stats.remote_created, 0);
        assert!(tree.find_by_identity(&id(1)).is_none());
    }

    #[test]
    fn reupload_marks_legacy_entities() {
        let config = MergeConfig::default().with_reupload(ReuploadPolicy::Enabled);
        let mut tree = NoteTree::new(0);
        let mut tracker = Tracker::new();
        run(
            vec![
                item("old", 1, main_id(), 10, NotePayload::folder("Old")).into_legacy(),
                item("new", 2, main_id(), 20, NotePayload::folder("New")),
            ],
            &mut tree,
            &mut tracker,
            &config,
        );

        assert!(tracker.get("old").unwrap().is_unsynced());
        assert!(!tracker.get("new").unwrap().is_unsynced());
        assert!(!tracker.get("main").unwrap().is_unsynced());
        assert!(tracker.notes_reuploaded());
    }

    #[test]
    fn unknown_root_tag_ignored() {
        let mut tree = NoteTree::new(0);
        let mut tracker = Tracker::new();
        let config = MergeConfig::default();
        let forest = build_remote_forest(
            vec![
                RemoteUpdate::permanent("f", "future_notes", 1),
                RemoteUpdate::permanent("main", "main_notes", 1),
            ],
            &config,
        );
        merge(forest, &mut tree, &mut tracker, &config, 0).unwrap();
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("f").is_none());
    }

    #[test]
    fn ignored_counters_recorded() {
        let mut tree = NoteTree::new(0);
        let mut tracker = Tracker::new();
        let stats = run(
            vec![item("o", 1, id(77), 10, NotePayload::folder("orphan"))],
            &mut tree,
            &mut tracker,
            &MergeConfig::default(),
        );
        assert_eq!(stats.ignored_updates, 1);
        assert_eq!(tracker.ignored_updates().max_version, Some(5));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn scenario(
            remote_titles: &[String],
            local_titles: &[String],
            shared: &[bool],
        ) -> (NoteTree, Vec<RemoteUpdate>, Vec<Uuid>) {
            let mut tree = NoteTree::new(0);
            let main = tree.permanent_node(PermanentFolder::Main).unwrap();
            for (i, title) in local_titles.iter().enumerate() {
                tree.add(main, i, id(1 + i as u128), NotePayload::folder(title.clone()), 0)
                    .unwrap();
            }

            let mut updates = Vec::new();
            let mut remote_ids = Vec::new();
            for (i, title) in remote_titles.iter().enumerate() {
                let identity = if shared[i] && i < local_titles.len() {
                    id(1 + i as u128)
                } else {
                    id(1000 + i as u128)
                };
                remote_ids.push(identity);
                updates.push(RemoteUpdate::new(
                    format!("s{i}"),
                    identity,
                    main_id(),
                    PositionKey::from_bytes(vec![1 + i as u8]),
                    NotePayload::folder(title.clone()),
                    1,
                    0,
                ));
            }
            (tree, updates, remote_ids)
        }

        proptest! {
            #[test]
            fn prop_order_uniqueness_idempotence(
                remote_titles in prop::collection::vec("[a-c]", 0..8),
                local_titles in prop::collection::vec("[a-c]", 0..8),
                shared in prop::collection::vec(any::<bool>(), 8),
            ) {
                let (mut tree, updates, remote_ids) = scenario(&remote_titles, &local_titles, &shared);
                let mut tracker = Tracker::new();
                let config = MergeConfig::default();
                run(updates.clone(), &mut tree, &mut tracker, &config);

                let main = tree.permanent_node(PermanentFolder::Main).unwrap();
                let children: Vec<Uuid> = tree
                    .children(main)
                    .iter()
                    .map(|&c| tree.node(c).unwrap().identity)
                    .collect();
                prop_assert_eq!(&children[..remote_ids.len()], &remote_ids[..]);

                let mut seen = std::collections::HashSet::new();
                for node in tree.iter() {
                    prop_assert!(seen.insert(tree.node(node).unwrap().identity));
                }
                prop_assert!(tracker.check_all_nodes_tracked(&tree));

                let tree_before = tree.clone();
                let metadata_before = tracker.build_metadata();
                let stats = run(updates, &mut tree, &mut tracker, &config);
                prop_assert_eq!(stats.remote_created, 0);
                prop_assert_eq!(stats.local_creations, 0);
                prop_assert_eq!(&tree, &tree_before);
                prop_assert_eq!(tracker.build_metadata(), metadata_before);
            }
        }
    }
}
