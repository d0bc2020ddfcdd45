//! Persisted tracker state.
//!
//! This is the bridge between the in-memory [`Tracker`](crate::Tracker) and
//! durable storage. Entities are emitted in sync id order so the same state
//! always serializes to the same bytes.

use crate::{
    error::Result, note::NotePayload, position::PositionKey, Error, SequenceNumber, ServerVersion,
    SyncId, Timestamp,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version of the metadata format for future compatibility.
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Sync bookkeeping for one live tracked item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMetadata {
    /// Identity of the local item
    pub identity: Uuid,
    pub sync_id: SyncId,
    pub server_version: ServerVersion,
    pub creation_time: Timestamp,
    pub position: PositionKey,
    /// Local change counter
    pub sequence_number: SequenceNumber,
    /// Last sequence number the server confirmed
    pub acked_sequence_number: SequenceNumber,
    /// Payload as last committed or received
    pub payload: NotePayload,
}

impl EntityMetadata {
    /// Metadata for an item with no pending local changes.
    pub fn new(
        identity: Uuid,
        sync_id: impl Into<SyncId>,
        server_version: ServerVersion,
        creation_time: Timestamp,
        position: PositionKey,
        payload: NotePayload,
    ) -> Self {
        Self {
            identity,
            sync_id: sync_id.into(),
            server_version,
            creation_time,
            position,
            sequence_number: 0,
            acked_sequence_number: 0,
            payload,
        }
    }
}

/// A pending deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TombstoneMetadata {
    pub sync_id: SyncId,
    pub identity: Uuid,
    pub server_version: ServerVersion,
    pub sequence_number: SequenceNumber,
    pub acked_sequence_number: SequenceNumber,
}

/// Complete tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerMetadata {
    /// Metadata format version
    pub format_version: u32,
    /// Opaque download progress, passed through unchanged
    #[serde(default)]
    pub progress_marker: String,
    /// Set once the one-time bulk re-upload has been scheduled
    #[serde(default)]
    pub notes_reuploaded: bool,
    /// Live entities, sorted by sync id
    #[serde(default)]
    pub entities: Vec<EntityMetadata>,
    /// Pending deletions in commit order
    #[serde(default)]
    pub tombstones: Vec<TombstoneMetadata>,
    /// Valid updates never reached from a permanent folder
    #[serde(default)]
    pub num_ignored_updates: i64,
    /// Highest server version among the ignored updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ignored_version: Option<ServerVersion>,
}

impl Default for TrackerMetadata {
    fn default() -> Self {
        Self {
            format_version: METADATA_FORMAT_VERSION,
            progress_marker: String::new(),
            notes_reuploaded: false,
            entities: Vec::new(),
            tombstones: Vec::new(),
            num_ignored_updates: 0,
            max_ignored_version: None,
        }
    }
}

impl TrackerMetadata {
    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMetadata(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidMetadata(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidMetadata(e.to_string()))?;

        if metadata.format_version > METADATA_FORMAT_VERSION {
            return Err(Error::InvalidMetadata(format!(
                "unsupported metadata format version: {} (max supported: {})",
                metadata.format_version, METADATA_FORMAT_VERSION
            )));
        }

        Ok(metadata)
    }

    /// Number of entities with unacknowledged changes, tombstones included.
    pub fn unsynced_count(&self) -> usize {
        let live = self
            .entities
            .iter()
            .filter(|e| e.sequence_number > e.acked_sequence_number)
            .count();
        let deleted = self
            .tombstones
            .iter()
            .filter(|t| t.sequence_number > t.acked_sequence_number)
            .count();
        live + deleted
    }
}
