//! Error types for the notes merge engine.

use crate::{tree::NodeId, SyncId};
use thiserror::Error;
use uuid::Uuid;

/// All possible errors from the merge engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Remote update validation
    #[error("invalid remote update {sync_id}: {reason}")]
    InvalidUpdate { sync_id: SyncId, reason: String },

    // Local tree errors
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("identity already in use: {0}")]
    DuplicateIdentity(Uuid),

    #[error("a {child} cannot be placed under a {parent}")]
    InvalidParent { parent: String, child: String },

    #[error("kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("cannot move {node} under its own descendant {new_parent}")]
    InvalidMove { node: NodeId, new_parent: NodeId },

    #[error("index {index} out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("operation not allowed on permanent node: {0}")]
    PermanentNode(NodeId),

    // Tracker errors
    #[error("entity not tracked: {0}")]
    EntityNotFound(SyncId),

    #[error("entity already tracked: {0}")]
    AlreadyTracked(String),

    // Persisted state errors
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("metadata inconsistent with local tree: {0}")]
    InconsistentMetadata(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
