//! Merge configuration.

use crate::note::{legacy_canonicalized_title, PermanentFolder};
use crate::update::RemoteUpdate;
use std::env;

/// Maximum depth of a remote tree. Deeper descendants are treated as
/// unreachable.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 200;

/// Whether entities created by older clients get re-committed so the server
/// learns the fields those clients never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReuploadPolicy {
    #[default]
    Disabled,
    Enabled,
}

impl ReuploadPolicy {
    /// Whether the entity behind `update` needs to be committed again.
    ///
    /// Updates written by legacy clients only carry the canonicalized title.
    pub fn is_reupload_needed(self, update: &RemoteUpdate) -> bool {
        match self {
            ReuploadPolicy::Disabled => false,
            ReuploadPolicy::Enabled => update.full_title.is_none(),
        }
    }
}

/// Canonicalization applied to full titles before comparing them with the
/// titles legacy clients committed.
pub type TitleCanonicalizer = fn(&str) -> String;

/// Configuration for one merge pass.
#[derive(Clone)]
pub struct MergeConfig {
    /// Permanent folders this client knows how to merge. Remote trees for any
    /// other tag are ignored.
    pub permanent_folders: Vec<PermanentFolder>,
    /// Depth ceiling for remote trees
    pub max_tree_depth: usize,
    pub reupload: ReuploadPolicy,
    pub canonicalize_title: TitleCanonicalizer,
    /// Cache id of this client, mixed into the position keys of local-only
    /// items so that two clients never generate the same key.
    pub client_id: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            permanent_folders: PermanentFolder::ALL.to_vec(),
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            reupload: ReuploadPolicy::Disabled,
            canonicalize_title: legacy_canonicalized_title,
            client_id: String::new(),
        }
    }
}

impl std::fmt::Debug for MergeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeConfig")
            .field("permanent_folders", &self.permanent_folders)
            .field("max_tree_depth", &self.max_tree_depth)
            .field("reupload", &self.reupload)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl MergeConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    ///
    /// - `NOTESYNC_MAX_TREE_DEPTH`: positive integer
    /// - `NOTESYNC_REUPLOAD`: `true`/`false`/`1`/`0`
    /// - `NOTESYNC_CLIENT_ID`: any string
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = env::var("NOTESYNC_MAX_TREE_DEPTH") {
            config.max_tree_depth = match raw.trim().parse() {
                Ok(depth) if depth > 0 => depth,
                _ => return Err(ConfigError::InvalidMaxDepth(raw.clone())),
            };
        }

        if let Ok(raw) = env::var("NOTESYNC_REUPLOAD") {
            config.reupload = match raw.trim() {
                "1" | "true" => ReuploadPolicy::Enabled,
                "0" | "false" => ReuploadPolicy::Disabled,
                _ => return Err(ConfigError::InvalidReupload(raw.clone())),
            };
        }

        if let Ok(raw) = env::var("NOTESYNC_CLIENT_ID") {
            config.client_id = raw;
        }

        Ok(config)
    }

    /// Builder-style method to restrict the recognised permanent folders.
    pub fn with_permanent_folders(mut self, folders: impl IntoIterator<Item = PermanentFolder>) -> Self {
        self.permanent_folders = folders.into_iter().collect();
        self
    }

    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    pub fn with_reupload(mut self, reupload: ReuploadPolicy) -> Self {
        self.reupload = reupload;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_title_canonicalizer(mut self, canonicalize: TitleCanonicalizer) -> Self {
        self.canonicalize_title = canonicalize;
        self
    }

    /// The permanent folder for a server tag, if this client merges it.
    pub fn folder_for_tag(&self, tag: &str) -> Option<PermanentFolder> {
        PermanentFolder::from_tag(tag).filter(|folder| self.permanent_folders.contains(folder))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid NOTESYNC_MAX_TREE_DEPTH value: {0}")]
    InvalidMaxDepth(String),

    #[error("invalid NOTESYNC_REUPLOAD value: {0}")]
    InvalidReupload(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err.to_string())
    }
}
