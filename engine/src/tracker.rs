//! Entity tracker - durable sync bookkeeping for the local tree.
//!
//! Every local item known to sync is paired with exactly one remote sync id.
//! Deleting a tracked item turns its entity into a tombstone that is kept,
//! in commit order, until the server acknowledges the deletion.

use crate::{
    config::ReuploadPolicy,
    error::Result,
    forest::IgnoredUpdates,
    metadata::{EntityMetadata, TombstoneMetadata, TrackerMetadata, METADATA_FORMAT_VERSION},
    note::{client_tag_hash, is_reserved_identity, NotePayload, PermanentFolder},
    position::PositionKey,
    tree::{NodeId, NoteTree},
    Error, SequenceNumber, ServerVersion, SyncId, Timestamp,
};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Whether an entity still has a live local item.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntityState {
    Live {
        node: NodeId,
        position: PositionKey,
        payload: NotePayload,
    },
    Tombstone,
}

/// The tracker's record for one remote entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntity {
    sync_id: SyncId,
    identity: Uuid,
    server_version: ServerVersion,
    creation_time: Timestamp,
    sequence_number: SequenceNumber,
    acked_sequence_number: SequenceNumber,
    commit_may_have_started: bool,
    state: EntityState,
}

impl TrackedEntity {
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    pub fn identity(&self) -> Uuid {
        self.identity
    }

    pub fn server_version(&self) -> ServerVersion {
        self.server_version
    }

    pub fn creation_time(&self) -> Timestamp {
        self.creation_time
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub fn acked_sequence_number(&self) -> SequenceNumber {
        self.acked_sequence_number
    }

    pub fn commit_may_have_started(&self) -> bool {
        self.commit_may_have_started
    }

    /// The local item, `None` for tombstones.
    pub fn node(&self) -> Option<NodeId> {
        match &self.state {
            EntityState::Live { node, .. } => Some(*node),
            EntityState::Tombstone => None,
        }
    }

    pub fn position(&self) -> Option<&PositionKey> {
        match &self.state {
            EntityState::Live { position, .. } => Some(position),
            EntityState::Tombstone => None,
        }
    }

    /// Last known payload, `None` for tombstones.
    pub fn payload(&self) -> Option<&NotePayload> {
        match &self.state {
            EntityState::Live { payload, .. } => Some(payload),
            EntityState::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.state, EntityState::Tombstone)
    }

    /// Whether local changes have not been acknowledged yet.
    pub fn is_unsynced(&self) -> bool {
        self.sequence_number > self.acked_sequence_number
    }

    fn is_permanent(&self) -> bool {
        is_reserved_identity(&self.identity)
    }

    fn to_metadata(&self) -> Option<EntityMetadata> {
        match &self.state {
            EntityState::Live {
                position, payload, ..
            } => Some(EntityMetadata {
                identity: self.identity,
                sync_id: self.sync_id.clone(),
                server_version: self.server_version,
                creation_time: self.creation_time,
                position: position.clone(),
                sequence_number: self.sequence_number,
                acked_sequence_number: self.acked_sequence_number,
                payload: payload.clone(),
            }),
            EntityState::Tombstone => None,
        }
    }

    fn to_tombstone_metadata(&self) -> TombstoneMetadata {
        TombstoneMetadata {
            sync_id: self.sync_id.clone(),
            identity: self.identity,
            server_version: self.server_version,
            sequence_number: self.sequence_number,
            acked_sequence_number: self.acked_sequence_number,
        }
    }
}

/// Maps local items to remote entities and keeps the tombstone log.
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    entities: HashMap<SyncId, TrackedEntity>,
    by_node: HashMap<NodeId, SyncId>,
    by_identity: HashMap<Uuid, SyncId>,
    by_client_tag: HashMap<String, SyncId>,
    /// Tombstones in commit order
    tombstones: Vec<SyncId>,
    progress_marker: String,
    notes_reuploaded: bool,
    ignored: IgnoredUpdates,
}

impl Tracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get an entity by sync id.
    pub fn get(&self, sync_id: &str) -> Option<&TrackedEntity> {
        self.entities.get(sync_id)
    }

    /// Get the entity tracking a local item.
    pub fn get_by_node(&self, node: NodeId) -> Option<&TrackedEntity> {
        self.by_node.get(&node).and_then(|id| self.entities.get(id))
    }

    /// Get an entity, live or tombstone, by identity.
    pub fn get_by_identity(&self, identity: &Uuid) -> Option<&TrackedEntity> {
        self.by_identity
            .get(identity)
            .and_then(|id| self.entities.get(id))
    }

    /// Get an entity, live or tombstone, by the client tag hash the server
    /// stores for it.
    pub fn get_by_client_tag_hash(&self, hash: &str) -> Option<&TrackedEntity> {
        self.by_client_tag
            .get(hash)
            .and_then(|id| self.entities.get(id))
    }

    /// Total number of entities, tombstones included.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of entities with a live local item.
    pub fn tracked_notes_count(&self) -> usize {
        self.by_node.len()
    }

    /// Number of tombstones whose deletion has not been acknowledged.
    pub fn tracked_uncommitted_tombstones_count(&self) -> usize {
        self.tombstones
            .iter()
            .filter_map(|id| self.entities.get(id))
            .filter(|e| e.is_unsynced())
            .count()
    }

    /// Whether anything needs to be committed.
    pub fn has_local_changes(&self) -> bool {
        self.entities.values().any(TrackedEntity::is_unsynced)
    }

    /// Entities needing commit: live items in parent-before-child order,
    /// followed by tombstones in deletion order.
    pub fn entities_with_local_changes(&self, tree: &NoteTree) -> Vec<&TrackedEntity> {
        let live = tree
            .iter()
            .filter_map(|node| self.get_by_node(node))
            .filter(|e| e.is_unsynced());
        let deleted = self
            .tombstones
            .iter()
            .filter_map(|id| self.entities.get(id))
            .filter(|e| e.is_unsynced());
        live.chain(deleted).collect()
    }

    /// Whether every item under a tracked permanent folder is tracked.
    pub fn check_all_nodes_tracked(&self, tree: &NoteTree) -> bool {
        self.first_untracked_node(tree).is_none()
    }

    fn first_untracked_node(&self, tree: &NoteTree) -> Option<NodeId> {
        PermanentFolder::ALL
            .into_iter()
            .filter_map(|folder| tree.permanent_node(folder))
            .filter(|&folder| self.by_node.contains_key(&folder))
            .flat_map(|folder| tree.iter_from(folder))
            .find(|node| !self.by_node.contains_key(node))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Start tracking `node`.
    pub fn add(&mut self, node: NodeId, metadata: EntityMetadata) -> Result<&TrackedEntity> {
        if self.entities.contains_key(&metadata.sync_id) {
            return Err(Error::AlreadyTracked(metadata.sync_id));
        }
        if self.by_node.contains_key(&node) {
            return Err(Error::AlreadyTracked(node.to_string()));
        }
        if self.by_identity.contains_key(&metadata.identity) {
            return Err(Error::AlreadyTracked(metadata.identity.to_string()));
        }

        let sync_id = metadata.sync_id.clone();
        self.by_node.insert(node, sync_id.clone());
        self.index_identity(metadata.identity, &sync_id);
        let entity = TrackedEntity {
            sync_id: metadata.sync_id,
            identity: metadata.identity,
            server_version: metadata.server_version,
            creation_time: metadata.creation_time,
            sequence_number: metadata.sequence_number,
            acked_sequence_number: metadata.acked_sequence_number,
            commit_may_have_started: false,
            state: EntityState::Live {
                node,
                position: metadata.position,
                payload: metadata.payload,
            },
        };
        Ok(&*self.entities.entry(sync_id).or_insert(entity))
    }

    /// Refresh a live entity from the server or from a local edit.
    pub fn update(
        &mut self,
        sync_id: &str,
        server_version: ServerVersion,
        new_position: PositionKey,
        new_payload: NotePayload,
    ) -> Result<()> {
        let entity = self.live_mut(sync_id)?;
        entity.server_version = server_version;
        if let EntityState::Live {
            position, payload, ..
        } = &mut entity.state
        {
            *position = new_position;
            *payload = new_payload;
        }
        Ok(())
    }

    /// Record that the local item of a live entity now has `identity`.
    pub fn update_identity(&mut self, sync_id: &str, identity: Uuid) -> Result<()> {
        if self
            .by_identity
            .get(&identity)
            .is_some_and(|owner| owner != sync_id)
        {
            return Err(Error::AlreadyTracked(identity.to_string()));
        }
        let entity = self.live_mut(sync_id)?;
        let old = std::mem::replace(&mut entity.identity, identity);
        if old != identity {
            self.unindex_identity(&old);
            self.index_identity(identity, sync_id);
        }
        Ok(())
    }

    pub fn update_server_version(&mut self, sync_id: &str, server_version: ServerVersion) -> Result<()> {
        self.entity_mut(sync_id)?.server_version = server_version;
        Ok(())
    }

    /// Remember that a commit request carrying this entity may have been
    /// sent.
    pub fn mark_commit_may_have_started(&mut self, sync_id: &str) -> Result<()> {
        self.entity_mut(sync_id)?.commit_may_have_started = true;
        Ok(())
    }

    /// Record that the entity's local change needs to be committed.
    pub fn increment_sequence_number(&mut self, sync_id: &str) -> Result<()> {
        self.entity_mut(sync_id)?.sequence_number += 1;
        Ok(())
    }

    /// Treat the current sequence number as acknowledged.
    pub fn ack_sequence_number(&mut self, sync_id: &str) -> Result<()> {
        let entity = self.entity_mut(sync_id)?;
        entity.acked_sequence_number = entity.sequence_number;
        Ok(())
    }

    /// Turn a live entity into a tombstone queued for commit.
    pub fn mark_deleted(&mut self, sync_id: &str) -> Result<()> {
        let entity = self.live_mut(sync_id)?;
        let node = entity.node();
        entity.state = EntityState::Tombstone;
        entity.sequence_number += 1;

        if let Some(node) = node {
            self.by_node.remove(&node);
        }
        self.tombstones.push(sync_id.to_string());
        Ok(())
    }

    /// Bring a tombstone back to life, attached to `node`.
    pub fn undelete_tombstone(
        &mut self,
        sync_id: &str,
        node: NodeId,
        position: PositionKey,
        payload: NotePayload,
    ) -> Result<()> {
        if self.by_node.contains_key(&node) {
            return Err(Error::AlreadyTracked(node.to_string()));
        }
        let entity = self.entity_mut(sync_id)?;
        if !entity.is_tombstone() {
            return Err(Error::AlreadyTracked(sync_id.to_string()));
        }
        entity.state = EntityState::Live {
            node,
            position,
            payload,
        };

        self.by_node.insert(node, sync_id.to_string());
        self.tombstones.retain(|id| id != sync_id);
        Ok(())
    }

    /// Stop tracking an entity entirely.
    pub fn remove(&mut self, sync_id: &str) -> Result<TrackedEntity> {
        let entity = self
            .entities
            .remove(sync_id)
            .ok_or_else(|| Error::EntityNotFound(sync_id.to_string()))?;
        if let Some(node) = entity.node() {
            self.by_node.remove(&node);
        }
        self.unindex_identity(&entity.identity);
        self.tombstones.retain(|id| id != sync_id);
        Ok(entity)
    }

    /// Apply the server's answer to a commit.
    ///
    /// Acknowledged tombstones are untracked. Live entities are rekeyed if
    /// the server assigned a new sync id.
    pub fn update_upon_commit_response(
        &mut self,
        sync_id: &str,
        new_sync_id: &str,
        server_version: ServerVersion,
        acked_sequence_number: SequenceNumber,
    ) -> Result<()> {
        let entity = self.entity_mut(sync_id)?;
        entity.acked_sequence_number = acked_sequence_number;
        entity.server_version = server_version;
        entity.commit_may_have_started = false;

        if entity.is_tombstone() && !entity.is_unsynced() {
            self.remove(sync_id)?;
            return Ok(());
        }
        self.update_sync_id_if_needed(sync_id, new_sync_id)
    }

    /// Rekey an entity under a server-assigned sync id.
    pub fn update_sync_id_if_needed(&mut self, sync_id: &str, new_sync_id: &str) -> Result<()> {
        if sync_id == new_sync_id {
            return Ok(());
        }
        if self.entities.contains_key(new_sync_id) {
            return Err(Error::AlreadyTracked(new_sync_id.to_string()));
        }
        let mut entity = self
            .entities
            .remove(sync_id)
            .ok_or_else(|| Error::EntityNotFound(sync_id.to_string()))?;

        entity.sync_id = new_sync_id.to_string();
        if let Some(node) = entity.node() {
            self.by_node.insert(node, entity.sync_id.clone());
        }
        self.index_identity(entity.identity, new_sync_id);
        for id in self.tombstones.iter_mut().filter(|id| id.as_str() == sync_id) {
            *id = entity.sync_id.clone();
        }
        self.entities.insert(entity.sync_id.clone(), entity);
        Ok(())
    }

    // =========================================================================
    // Re-upload and diagnostics
    // =========================================================================

    /// Schedule every synced, non-permanent entity for one bulk re-commit.
    ///
    /// Returns `true` if anything was scheduled. Runs at most once per
    /// tracker lifetime, persisted across restarts.
    pub fn reupload_notes_on_load_if_needed(&mut self, policy: ReuploadPolicy) -> bool {
        if policy == ReuploadPolicy::Disabled || self.notes_reuploaded {
            return false;
        }

        let mut scheduled = false;
        for entity in self.entities.values_mut() {
            if entity.is_tombstone() || entity.is_permanent() || entity.is_unsynced() {
                continue;
            }
            entity.sequence_number += 1;
            scheduled = true;
        }
        self.notes_reuploaded = true;
        scheduled
    }

    pub fn set_notes_reuploaded(&mut self) {
        self.notes_reuploaded = true;
    }

    pub fn notes_reuploaded(&self) -> bool {
        self.notes_reuploaded
    }

    pub fn progress_marker(&self) -> &str {
        &self.progress_marker
    }

    pub fn set_progress_marker(&mut self, marker: impl Into<String>) {
        self.progress_marker = marker.into();
    }

    /// Counters for remote updates that could not be placed, across every
    /// merge since tracking started.
    pub fn ignored_updates(&self) -> IgnoredUpdates {
        self.ignored
    }

    /// Add the updates one merge ignored to the running counters.
    pub fn record_ignored_updates(&mut self, ignored: IgnoredUpdates) {
        self.ignored.count += ignored.count;
        self.ignored.max_version = self.ignored.max_version.max(ignored.max_version);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Export the tracker state.
    pub fn build_metadata(&self) -> TrackerMetadata {
        let mut entities: Vec<EntityMetadata> = self
            .entities
            .values()
            .filter_map(TrackedEntity::to_metadata)
            .collect();
        entities.sort_by(|a, b| a.sync_id.cmp(&b.sync_id));

        let tombstones = self
            .tombstones
            .iter()
            .filter_map(|id| self.entities.get(id))
            .map(TrackedEntity::to_tombstone_metadata)
            .collect();

        TrackerMetadata {
            format_version: METADATA_FORMAT_VERSION,
            progress_marker: self.progress_marker.clone(),
            notes_reuploaded: self.notes_reuploaded,
            entities,
            tombstones,
            num_ignored_updates: self.ignored.count,
            max_ignored_version: self.ignored.max_version,
        }
    }

    /// Serialize the tracker state to JSON.
    pub fn save(&self) -> Result<String> {
        self.build_metadata().to_json()
    }

    /// Rebuild a tracker from persisted metadata.
    ///
    /// Fails with [`Error::InconsistentMetadata`] if the metadata does not
    /// describe `tree`. The caller must then discard the metadata and merge
    /// again from scratch.
    pub fn load(tree: &NoteTree, metadata: TrackerMetadata) -> Result<Self> {
        let mut tracker = Self {
            progress_marker: metadata.progress_marker,
            notes_reuploaded: metadata.notes_reuploaded,
            ignored: IgnoredUpdates {
                count: metadata.num_ignored_updates,
                max_version: metadata.max_ignored_version,
            },
            ..Self::default()
        };

        for entity in metadata.entities {
            let node = tree.find_by_identity(&entity.identity).ok_or_else(|| {
                inconsistent(format!(
                    "tracked item {} ({}) is missing from the tree",
                    entity.identity, entity.sync_id
                ))
            })?;
            tracker
                .add(node, entity)
                .map_err(|err| inconsistent(err.to_string()))?;
        }

        let mut seen = HashSet::new();
        for tombstone in metadata.tombstones {
            if tracker.entities.contains_key(&tombstone.sync_id)
                || tracker.by_identity.contains_key(&tombstone.identity)
                || !seen.insert(tombstone.sync_id.clone())
            {
                return Err(inconsistent(format!(
                    "tombstone {} duplicates another entity",
                    tombstone.sync_id
                )));
            }
            tracker.index_identity(tombstone.identity, &tombstone.sync_id);
            tracker.tombstones.push(tombstone.sync_id.clone());
            tracker.entities.insert(
                tombstone.sync_id.clone(),
                TrackedEntity {
                    sync_id: tombstone.sync_id,
                    identity: tombstone.identity,
                    server_version: tombstone.server_version,
                    creation_time: 0,
                    sequence_number: tombstone.sequence_number,
                    acked_sequence_number: tombstone.acked_sequence_number,
                    commit_may_have_started: false,
                    state: EntityState::Tombstone,
                },
            );
        }

        if let Some(node) = tracker.first_untracked_node(tree) {
            return Err(inconsistent(format!("local item {node} is not tracked")));
        }

        Ok(tracker)
    }

    /// Parse and load persisted JSON metadata.
    pub fn load_json(tree: &NoteTree, json: &str) -> Result<Self> {
        Self::load(tree, TrackerMetadata::from_json(json)?)
    }

    fn index_identity(&mut self, identity: Uuid, sync_id: &str) {
        self.by_identity.insert(identity, sync_id.to_string());
        self.by_client_tag
            .insert(client_tag_hash(&identity), sync_id.to_string());
    }

    fn unindex_identity(&mut self, identity: &Uuid) {
        self.by_identity.remove(identity);
        self.by_client_tag.remove(&client_tag_hash(identity));
    }

    fn entity_mut(&mut self, sync_id: &str) -> Result<&mut TrackedEntity> {
        self.entities
            .get_mut(sync_id)
            .ok_or_else(|| Error::EntityNotFound(sync_id.to_string()))
    }

    fn live_mut(&mut self, sync_id: &str) -> Result<&mut TrackedEntity> {
        let entity = self.entity_mut(sync_id)?;
        if entity.is_tombstone() {
            return Err(Error::EntityNotFound(sync_id.to_string()));
        }
        Ok(entity)
    }
}

fn inconsistent(reason: String) -> Error {
    tracing::error!(%reason, "refusing to load tracker metadata");
    Error::InconsistentMetadata(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    /// Tree with main > [folder A > note N] plus a tracker covering all of it.
    fn setup() -> (NoteTree, Tracker, NodeId, NodeId) {
        let mut tree = NoteTree::new(0);
        let main = tree.permanent_node(PermanentFolder::Main).unwrap();
        let a = tree.add(main, 0, id(1), NotePayload::folder("A"), 0).unwrap();
        let n = tree
            .add(a, 0, id(2), NotePayload::note("N", "body"), 0)
            .unwrap();

        let mut tracker = Tracker::new();
        for (node, sync) in [(main, "main"), (a, "sa"), (n, "sn")] {
            let item = tree.node(node).unwrap();
            tracker
                .add(
                    node,
                    EntityMetadata::new(
                        item.identity,
                        sync,
                        1,
                        0,
                        PositionKey::initial(sync.as_bytes()),
                        item.payload(),
                    ),
                )
                .unwrap();
        }
        (tree, tracker, a, n)
    }

    #[test]
    fn add_and_lookup() {
        let (_, tracker, a, _) = setup();
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.get_by_node(a).unwrap().sync_id(), "sa");
        assert_eq!(tracker.get_by_identity(&id(1)).unwrap().node(), Some(a));
        assert!(!tracker.has_local_changes());
    }

    #[test]
    fn add_rejects_duplicates() {
        let (mut tree, mut tracker, a, _) = setup();
        let payload = tree.node(a).unwrap().payload();
        let fresh = tree.add(a, 1, id(50), NotePayload::separator(), 0).unwrap();
        let dup_sync = EntityMetadata::new(id(50), "sa", 1, 0, PositionKey::initial(&[]), payload.clone());
        assert_eq!(
            tracker.add(fresh, dup_sync).unwrap_err(),
            Error::AlreadyTracked("sa".into())
        );
        let dup_node = EntityMetadata::new(id(50), "other", 1, 0, PositionKey::initial(&[]), payload);
        assert!(tracker.add(a, dup_node).is_err());
    }

    #[test]
    fn local_changes_are_parent_first() {
        let (tree, mut tracker, _, _) = setup();
        tracker.increment_sequence_number("sn").unwrap();
        tracker.increment_sequence_number("sa").unwrap();

        let ids: Vec<_> = tracker
            .entities_with_local_changes(&tree)
            .iter()
            .map(|e| e.sync_id().to_string())
            .collect();
        assert_eq!(ids, vec!["sa", "sn"]);

        tracker.ack_sequence_number("sa").unwrap();
        assert_eq!(tracker.entities_with_local_changes(&tree).len(), 1);
    }

    #[test]
    fn tombstone_lifecycle() {
        let (mut tree, mut tracker, a, n) = setup();
        tree.remove(n).unwrap();
        tracker.mark_deleted("sn").unwrap();

        assert!(tracker.get("sn").unwrap().is_tombstone());
        assert_eq!(tracker.tracked_notes_count(), 2);
        assert_eq!(tracker.tracked_uncommitted_tombstones_count(), 1);

        let pending = tracker.entities_with_local_changes(&tree);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sync_id(), "sn");

        tracker.mark_commit_may_have_started("sn").unwrap();
        tracker.update_upon_commit_response("sn", "sn", 2, 1).unwrap();
        assert!(tracker.get("sn").is_none());
        assert_eq!(tracker.tracked_uncommitted_tombstones_count(), 0);
        assert!(tracker.get_by_node(a).is_some());
    }

    #[test]
    fn mark_deleted_twice_fails() {
        let (_, mut tracker, _, _) = setup();
        tracker.mark_deleted("sn").unwrap();
        assert_eq!(
            tracker.mark_deleted("sn"),
            Err(Error::EntityNotFound("sn".into()))
        );
    }

    #[test]
    fn undelete_restores_entity() {
        let (tree, mut tracker, _, n) = setup();
        tracker.mark_deleted("sn").unwrap();
        let payload = tree.node(n).unwrap().payload();
        tracker
            .undelete_tombstone("sn", n, PositionKey::initial(b"z"), payload)
            .unwrap();

        let entity = tracker.get("sn").unwrap();
        assert_eq!(entity.node(), Some(n));
        assert_eq!(tracker.tracked_uncommitted_tombstones_count(), 0);
    }

    #[test]
    fn commit_response_rekeys() {
        let (_, mut tracker, a, _) = setup();
        tracker.increment_sequence_number("sa").unwrap();
        tracker
            .update_upon_commit_response("sa", "server-a", 7, 1)
            .unwrap();

        let entity = tracker.get_by_node(a).unwrap();
        assert_eq!(entity.sync_id(), "server-a");
        assert_eq!(entity.server_version(), 7);
        assert!(!entity.is_unsynced());
        assert!(tracker.get("sa").is_none());
        assert_eq!(tracker.get_by_identity(&id(1)).unwrap().sync_id(), "server-a");
    }

    #[test]
    fn rekey_onto_existing_id_fails() {
        let (_, mut tracker, _, _) = setup();
        assert_eq!(
            tracker.update_sync_id_if_needed("sa", "sn"),
            Err(Error::AlreadyTracked("sn".into()))
        );
    }

    #[test]
    fn reupload_runs_once() {
        let (_, mut tracker, _, _) = setup();
        assert!(!tracker.reupload_notes_on_load_if_needed(ReuploadPolicy::Disabled));
        assert!(tracker.reupload_notes_on_load_if_needed(ReuploadPolicy::Enabled));
        assert!(tracker.notes_reuploaded());

        // Permanent folders are never re-uploaded.
        assert!(!tracker.get("main").unwrap().is_unsynced());
        assert!(tracker.get("sa").unwrap().is_unsynced());

        assert!(!tracker.reupload_notes_on_load_if_needed(ReuploadPolicy::Enabled));
        assert_eq!(tracker.get("sa").unwrap().sequence_number(), 1);
    }

    #[test]
    fn check_all_nodes_tracked() {
        let (mut tree, tracker, a, _) = setup();
        assert!(tracker.check_all_nodes_tracked(&tree));
        tree.add(a, 1, id(3), NotePayload::separator(), 0).unwrap();
        assert!(!tracker.check_all_nodes_tracked(&tree));
    }

    #[test]
    fn save_load_roundtrip() {
        let (mut tree, mut tracker, _, n) = setup();
        tracker.set_progress_marker("marker-9");
        tracker.record_ignored_updates(IgnoredUpdates {
            count: 3,
            max_version: Some(12),
        });
        tracker.increment_sequence_number("sa").unwrap();
        tree.remove(n).unwrap();
        tracker.mark_deleted("sn").unwrap();

        let json = tracker.save().unwrap();
        let loaded = Tracker::load_json(&tree, &json).unwrap();
        assert_eq!(loaded.build_metadata(), tracker.build_metadata());
        assert_eq!(loaded.progress_marker(), "marker-9");
        assert_eq!(loaded.ignored_updates().count, 3);
        assert!(loaded.get("sn").unwrap().is_tombstone());
    }

    #[test]
    fn load_refuses_missing_node() {
        let (mut tree, tracker, _, n) = setup();
        let metadata = tracker.build_metadata();
        tree.remove(n).unwrap();
        let err = Tracker::load(&tree, metadata).unwrap_err();
        assert!(matches!(err, Error::InconsistentMetadata(_)));
    }

    #[test]
    fn load_refuses_untracked_node() {
        let (mut tree, tracker, a, _) = setup();
        let metadata = tracker.build_metadata();
        tree.add(a, 0, id(3), NotePayload::folder("new"), 0).unwrap();
        assert!(matches!(
            Tracker::load(&tree, metadata),
            Err(Error::InconsistentMetadata(_))
        ));
    }

    #[test]
    fn load_refuses_duplicate_tombstone() {
        let (tree, tracker, _, _) = setup();
        let mut metadata: TrackerMetadata = tracker.build_metadata();
        metadata.tombstones.push(TombstoneMetadata {
            sync_id: "sa".into(),
            identity: id(77),
            server_version: 1,
            sequence_number: 1,
            acked_sequence_number: 0,
        });
        assert!(matches!(
            Tracker::load(&tree, metadata),
            Err(Error::InconsistentMetadata(_))
        ));
    }

    #[test]
    fn ignored_counters_accumulate() {
        let (_, mut tracker, _, _) = setup();
        tracker.record_ignored_updates(IgnoredUpdates {
            count: 1,
            max_version: Some(42),
        });
        tracker.record_ignored_updates(IgnoredUpdates::default());
        assert_eq!(tracker.ignored_updates().count, 1);
        assert_eq!(tracker.ignored_updates().max_version, Some(42));

        tracker.record_ignored_updates(IgnoredUpdates {
            count: 2,
            max_version: Some(17),
        });
        assert_eq!(tracker.ignored_updates().count, 3);
        assert_eq!(tracker.ignored_updates().max_version, Some(42));
    }

    #[test]
    fn lookup_by_client_tag_hash() {
        let (mut tree, mut tracker, _, n) = setup();
        let hash = client_tag_hash(&id(2));
        assert_eq!(tracker.get_by_client_tag_hash(&hash).unwrap().sync_id(), "sn");

        tracker.update_sync_id_if_needed("sn", "server-n").unwrap();
        assert_eq!(
            tracker.get_by_client_tag_hash(&hash).unwrap().sync_id(),
            "server-n"
        );

        // Tombstones stay reachable until untracked.
        tree.remove(n).unwrap();
        tracker.mark_deleted("server-n").unwrap();
        assert!(tracker.get_by_client_tag_hash(&hash).unwrap().is_tombstone());
        tracker.remove("server-n").unwrap();
        assert!(tracker.get_by_client_tag_hash(&hash).is_none());
        assert!(tracker.get_by_client_tag_hash("not-a-hash").is_none());
    }

    #[test]
    fn update_identity_reindexes() {
        let (_, mut tracker, a, _) = setup();
        tracker.update_identity("sa", id(9)).unwrap();

        assert_eq!(tracker.get("sa").unwrap().identity(), id(9));
        assert_eq!(tracker.get_by_identity(&id(9)).unwrap().node(), Some(a));
        assert!(tracker.get_by_identity(&id(1)).is_none());
        assert!(tracker.get_by_client_tag_hash(&client_tag_hash(&id(1))).is_none());

        assert_eq!(
            tracker.update_identity("sa", id(2)),
            Err(Error::AlreadyTracked(id(2).to_string()))
        );
    }
}
