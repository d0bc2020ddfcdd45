//! # Notesync Engine
//!
//! A merge engine that reconciles a local tree of notes with the remote
//! updates delivered by a sync service.
//!
//! This crate provides the core logic of the initial notes sync. It turns a
//! flat, unordered batch of remote updates into trees, pairs local items with
//! remote ones, reshapes the local tree to match the remote order, and keeps
//! the durable bookkeeping needed to commit local changes afterwards.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or clocks
//! - **Single pass**: A merge runs to completion on the thread owning the tree
//! - **Deterministic**: Same inputs always produce the same tree and metadata
//! - **Forgiving**: Bad remote input is dropped and counted, never fatal
//!
//! ## Core Concepts
//!
//! ### Local Tree
//!
//! [`NoteTree`] is an arena of folders, notes, separators and attachments
//! addressed by [`NodeId`]. Three permanent folders ([`PermanentFolder`])
//! always exist under an invisible root.
//!
//! ### Remote Forest
//!
//! [`build_remote_forest`] groups [`RemoteUpdate`]s by parent, drops
//! malformed or duplicate updates, and sorts siblings by [`PositionKey`].
//!
//! ### Matching
//!
//! [`IdentityMatches`] pairs items sharing an identity. Pairs with
//! conflicting kind or content are split by giving the local item a fresh
//! identity. During the merge, remaining items are matched by content.
//!
//! ### Tracking
//!
//! The [`Tracker`] pairs every synced local item with a remote sync id and
//! keeps sequence numbers and the tombstone log. It is persisted through
//! [`TrackerMetadata`].
//!
//! ## Quick Start
//!
//! ```rust
//! use notesync_engine::{
//!     build_remote_forest, merge, MergeConfig, NotePayload, NoteTree,
//!     PermanentFolder, PositionKey, RemoteUpdate, Tracker,
//! };
//! use uuid::Uuid;
//!
//! // 1. The local tree and an empty tracker
//! let mut tree = NoteTree::new(1706745600000);
//! let mut tracker = Tracker::new();
//! let config = MergeConfig::default();
//!
//! // 2. Remote updates for one sync cycle
//! let note = Uuid::new_v4();
//! let updates = vec![
//!     RemoteUpdate::permanent("s-main", "main_notes", 1),
//!     RemoteUpdate::new(
//!         "s-note",
//!         note,
//!         PermanentFolder::Main.identity(),
//!         PositionKey::initial(note.as_bytes()),
//!         NotePayload::note("Groceries", "milk, eggs"),
//!         3,
//!         1706745600000,
//!     ),
//! ];
//!
//! // 3. Merge
//! let forest = build_remote_forest(updates, &config);
//! let stats = merge(forest, &mut tree, &mut tracker, &config, 1706745600000).unwrap();
//! assert_eq!(stats.remote_created, 1);
//!
//! // 4. Persist the tracker
//! let json = tracker.save().unwrap();
//! let restored = Tracker::load_json(&tree, &json).unwrap();
//! assert_eq!(restored.len(), 2);
//! ```

pub mod config;
pub mod error;
pub mod forest;
pub mod matcher;
pub mod merge;
pub mod metadata;
pub mod note;
pub mod position;
pub mod tracker;
pub mod tree;
pub mod update;

// Re-export main types at crate root
pub use config::{ConfigError, MergeConfig, ReuploadPolicy, TitleCanonicalizer};
pub use error::{Error, Result};
pub use forest::{build_remote_forest, IgnoredUpdates, RemoteForest, RemoteNodeId, RemoteTreeNode};
pub use matcher::{ConsumedMatches, IdentityMatch, IdentityMatches};
pub use merge::{merge, MergeStats, UNCOMMITTED_VERSION};
pub use metadata::{EntityMetadata, TombstoneMetadata, TrackerMetadata, METADATA_FORMAT_VERSION};
pub use note::{legacy_canonicalized_title, NoteKind, NotePayload, PermanentFolder};
pub use position::PositionKey;
pub use tracker::{TrackedEntity, Tracker};
pub use tree::{NodeId, NoteNode, NoteTree};
pub use update::RemoteUpdate;

/// Type aliases for clarity
pub type SyncId = String;
pub type Timestamp = u64;
pub type ServerVersion = i64;
pub type SequenceNumber = i64;
