//! Remote update records delivered by the sync service.
//!
//! Updates arrive as a flat, unordered list. Each one either describes a
//! permanent folder (identified by its server tag) or a regular item
//! (identified by its identity and placed under a parent identity).

use crate::{
    error::Result,
    note::{client_tag_hash, is_reserved_identity, parse_identity, NoteKind, NotePayload},
    position::PositionKey,
    Error, ServerVersion, SyncId, Timestamp,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single remote update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUpdate {
    /// Server-assigned id of the entity
    pub sync_id: SyncId,
    /// Identity of the item, as sent on the wire
    #[serde(default)]
    pub identity: Option<String>,
    /// Identity of the parent item, as sent on the wire
    #[serde(default)]
    pub parent_identity: Option<String>,
    /// Server-defined tag, only set for permanent folders
    #[serde(default)]
    pub permanent_tag: Option<String>,
    pub position: PositionKey,
    pub kind: NoteKind,
    /// Title as typed by the user. Absent on updates from legacy clients.
    #[serde(default)]
    pub full_title: Option<String>,
    /// Title after legacy canonicalization
    #[serde(default)]
    pub legacy_title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    pub server_version: ServerVersion,
    pub creation_time: Timestamp,
    #[serde(default)]
    pub is_deleted: bool,
    /// Hash the server keyed the entity by, if any
    #[serde(default)]
    pub client_tag_hash: Option<String>,
    /// Client-side id assigned by the originating client, if any
    #[serde(default)]
    pub originator_item_id: Option<String>,
}

impl RemoteUpdate {
    /// Create an update for a regular item.
    pub fn new(
        sync_id: impl Into<SyncId>,
        identity: Uuid,
        parent_identity: Uuid,
        position: PositionKey,
        payload: NotePayload,
        server_version: ServerVersion,
        creation_time: Timestamp,
    ) -> Self {
        Self {
            sync_id: sync_id.into(),
            identity: Some(identity.hyphenated().to_string()),
            parent_identity: Some(parent_identity.hyphenated().to_string()),
            permanent_tag: None,
            position,
            kind: payload.kind,
            legacy_title: crate::note::legacy_canonicalized_title(&payload.title),
            full_title: Some(payload.title),
            content: payload.content,
            url: payload.url,
            server_version,
            creation_time,
            is_deleted: false,
            client_tag_hash: Some(client_tag_hash(&identity)),
            originator_item_id: None,
        }
    }

    /// Create an update for a permanent folder.
    pub fn permanent(
        sync_id: impl Into<SyncId>,
        tag: impl Into<String>,
        server_version: ServerVersion,
    ) -> Self {
        Self {
            sync_id: sync_id.into(),
            identity: None,
            parent_identity: None,
            permanent_tag: Some(tag.into()),
            position: PositionKey::initial(&[]),
            kind: NoteKind::Folder,
            full_title: None,
            legacy_title: String::new(),
            content: String::new(),
            url: String::new(),
            server_version,
            creation_time: 0,
            is_deleted: false,
            client_tag_hash: None,
            originator_item_id: None,
        }
    }

    /// Create a deletion. Deletions only carry the identity.
    pub fn deletion(sync_id: impl Into<SyncId>, identity: Uuid, server_version: ServerVersion) -> Self {
        Self {
            sync_id: sync_id.into(),
            identity: Some(identity.hyphenated().to_string()),
            parent_identity: None,
            permanent_tag: None,
            position: PositionKey::from_bytes(Vec::new()),
            kind: NoteKind::Unsupported,
            full_title: None,
            legacy_title: String::new(),
            content: String::new(),
            url: String::new(),
            server_version,
            creation_time: 0,
            is_deleted: true,
            client_tag_hash: None,
            originator_item_id: None,
        }
    }

    /// Drop the full title, as a legacy client would have sent it.
    pub fn into_legacy(mut self) -> Self {
        self.full_title = None;
        self
    }

    /// Whether this update describes a permanent folder.
    pub fn is_permanent(&self) -> bool {
        self.permanent_tag.as_deref().is_some_and(|tag| !tag.is_empty())
    }

    /// Parsed identity, if well formed.
    pub fn parsed_identity(&self) -> Option<Uuid> {
        self.identity.as_deref().and_then(parse_identity)
    }

    /// Best available title: the full title, else the legacy one.
    pub fn title(&self) -> &str {
        self.full_title.as_deref().unwrap_or(&self.legacy_title)
    }

    /// Title in the form legacy clients compare against.
    pub fn canonical_title(&self, canonicalize: fn(&str) -> String) -> String {
        match &self.full_title {
            Some(full) => canonicalize(full),
            None => self.legacy_title.clone(),
        }
    }

    /// Content fields to apply to a local item.
    pub fn payload(&self) -> NotePayload {
        let (content, url) = if self.kind.is_content_bearing() {
            (self.content.clone(), self.url.clone())
        } else {
            (String::new(), String::new())
        };
        NotePayload {
            kind: self.kind,
            title: self.title().to_string(),
            content,
            url,
        }
    }

    /// Validate a regular (non-permanent, non-deleted) update.
    ///
    /// Returns the parsed identity and parent identity.
    pub fn validate(&self) -> Result<(Uuid, Uuid)> {
        let identity = self
            .parsed_identity()
            .ok_or_else(|| self.invalid("missing or malformed identity"))?;
        if is_reserved_identity(&identity) {
            return Err(self.invalid("identity reserved for a permanent folder"));
        }

        let parent = self
            .parent_identity
            .as_deref()
            .and_then(parse_identity)
            .ok_or_else(|| self.invalid("missing or malformed parent identity"))?;

        if !self.position.is_valid() {
            return Err(self.invalid("invalid position key"));
        }

        if matches!(self.kind, NoteKind::Folder | NoteKind::Separator)
            && (!self.url.is_empty() || !self.content.is_empty())
        {
            return Err(self.invalid(format!("{} carries content", self.kind)));
        }

        self.validate_envelope(&identity)?;

        Ok((identity, parent))
    }

    fn validate_envelope(&self, identity: &Uuid) -> Result<()> {
        if let Some(hash) = &self.client_tag_hash {
            if *hash != client_tag_hash(identity) {
                return Err(self.invalid("identity does not match client tag hash"));
            }
            return Ok(());
        }

        let originator = self
            .originator_item_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok());
        match originator {
            Some(original) if original != *identity => {
                Err(self.invalid("identity does not match originator item id"))
            }
            _ => Ok(()),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        Error::InvalidUpdate {
            sync_id: self.sync_id.clone(),
            reason: reason.into(),
        }
    }
}
