//! Note item kinds, payloads and the permanent folder set.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// Kind of a note item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Folder,
    Note,
    Separator,
    Attachment,
    /// A kind introduced by a newer client. Only ever seen on remote updates.
    #[serde(other)]
    Unsupported,
}

impl NoteKind {
    /// Whether items of this kind carry a content payload and URL.
    pub fn is_content_bearing(self) -> bool {
        matches!(self, NoteKind::Note | NoteKind::Attachment)
    }

    /// Whether remote items of this kind may have descendants.
    pub fn can_have_children(self) -> bool {
        matches!(self, NoteKind::Folder | NoteKind::Note)
    }

    /// Whether an item of kind `child` may be placed under this kind.
    pub fn accepts_child(self, child: NoteKind) -> bool {
        match self {
            NoteKind::Folder => matches!(
                child,
                NoteKind::Folder | NoteKind::Note | NoteKind::Separator
            ),
            NoteKind::Note => child == NoteKind::Attachment,
            _ => false,
        }
    }
}

impl std::fmt::Display for NoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoteKind::Folder => write!(f, "folder"),
            NoteKind::Note => write!(f, "note"),
            NoteKind::Separator => write!(f, "separator"),
            NoteKind::Attachment => write!(f, "attachment"),
            NoteKind::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// The content fields of a note item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    pub kind: NoteKind,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

impl NotePayload {
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            kind: NoteKind::Folder,
            title: title.into(),
            content: String::new(),
            url: String::new(),
        }
    }

    pub fn note(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: NoteKind::Note,
            title: title.into(),
            content: content.into(),
            url: String::new(),
        }
    }

    pub fn separator() -> Self {
        Self {
            kind: NoteKind::Separator,
            title: String::new(),
            content: String::new(),
            url: String::new(),
        }
    }

    pub fn attachment(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: NoteKind::Attachment,
            title: title.into(),
            content: content.into(),
            url: String::new(),
        }
    }

    /// Builder-style method to set the URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// One of the always-present top-level containers.
///
/// These are associated with the server by well-known tag, never by
/// identity matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermanentFolder {
    Main,
    Other,
    Trash,
}

/// Tag of the invisible server root. Updates carrying it are skipped.
pub const ROOT_TAG: &str = "notes";

/// Identity of the local root node.
pub const ROOT_IDENTITY: Uuid = Uuid::from_u128(0x00000000_0000_4000_a000_000000000001);

impl PermanentFolder {
    pub const ALL: [PermanentFolder; 3] = [
        PermanentFolder::Main,
        PermanentFolder::Other,
        PermanentFolder::Trash,
    ];

    /// Server-defined unique tag for this folder.
    pub fn tag(self) -> &'static str {
        match self {
            PermanentFolder::Main => "main_notes",
            PermanentFolder::Other => "other_notes",
            PermanentFolder::Trash => "trash_notes",
        }
    }

    /// Well-known identity shared by every client.
    pub fn identity(self) -> Uuid {
        match self {
            PermanentFolder::Main => Uuid::from_u128(0x00000000_0000_4000_a000_000000000002),
            PermanentFolder::Other => Uuid::from_u128(0x00000000_0000_4000_a000_000000000003),
            PermanentFolder::Trash => Uuid::from_u128(0x00000000_0000_4000_a000_000000000004),
        }
    }

    /// Default local title.
    pub fn title(self) -> &'static str {
        match self {
            PermanentFolder::Main => "Notes",
            PermanentFolder::Other => "Other Notes",
            PermanentFolder::Trash => "Trash",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|folder| folder.tag() == tag)
    }

    pub fn from_identity(identity: &Uuid) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|folder| folder.identity() == *identity)
    }
}

/// Whether `identity` belongs to the root or a permanent folder.
pub fn is_reserved_identity(identity: &Uuid) -> bool {
    *identity == ROOT_IDENTITY || PermanentFolder::from_identity(identity).is_some()
}

const CLIENT_TAG_PREFIX: &str = "notes:";

/// Client tag hash the server stores for an item with `identity`.
pub fn client_tag_hash(identity: &Uuid) -> String {
    let mut hasher = Sha1::new();
    hasher.update(CLIENT_TAG_PREFIX.as_bytes());
    hasher.update(identity.hyphenated().to_string().as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Hash of the creating client and the sync id an item was created under,
/// used as the suffix of the item's first position key.
pub fn syncable_hash(client_id: &str, sync_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_id.as_bytes());
    hasher.update(sync_id.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parse an identity in the only form accepted on the wire: lowercase,
/// hyphenated.
pub fn parse_identity(raw: &str) -> Option<Uuid> {
    let parsed = Uuid::parse_str(raw).ok()?;
    if parsed.hyphenated().to_string() != raw {
        return None;
    }
    Some(parsed)
}

const LEGACY_TITLE_LIMIT_BYTES: usize = 255;

/// Title canonicalization applied by legacy clients before commit.
///
/// Names that legacy servers reject after trimming trailing spaces (empty,
/// `.` and `..`) get a space appended, then the title is truncated to 255
/// bytes on a character boundary.
pub fn legacy_canonicalized_title(full_title: &str) -> String {
    let mut title = full_title.to_string();
    let trimmed = title.trim_end_matches(' ');
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        title.push(' ');
    }

    if title.len() > LEGACY_TITLE_LIMIT_BYTES {
        let mut end = LEGACY_TITLE_LIMIT_BYTES;
        while !title.is_char_boundary(end) {
            end -= 1;
        }
        title.truncate(end);
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_nesting_rules() {
        assert!(NoteKind::Folder.accepts_child(NoteKind::Folder));
        assert!(NoteKind::Folder.accepts_child(NoteKind::Separator));
        assert!(!NoteKind::Folder.accepts_child(NoteKind::Attachment));
        assert!(NoteKind::Note.accepts_child(NoteKind::Attachment));
        assert!(!NoteKind::Note.accepts_child(NoteKind::Note));
        assert!(!NoteKind::Separator.accepts_child(NoteKind::Note));
    }

    #[test]
    fn unknown_kind_deserializes_as_unsupported() {
        let kind: NoteKind = serde_json::from_str("\"hologram\"").unwrap();
        assert_eq!(kind, NoteKind::Unsupported);
        assert!(!kind.can_have_children());
    }

    #[test]
    fn permanent_folder_lookup() {
        for folder in PermanentFolder::ALL {
            assert_eq!(PermanentFolder::from_tag(folder.tag()), Some(folder));
            assert_eq!(
                PermanentFolder::from_identity(&folder.identity()),
                Some(folder)
            );
            assert!(is_reserved_identity(&folder.identity()));
        }
        assert_eq!(PermanentFolder::from_tag("future_notes"), None);
        assert!(is_reserved_identity(&ROOT_IDENTITY));
    }

    #[test]
    fn parse_identity_requires_lowercase() {
        let id = "3f2a1c9e-5b7d-4e2f-9a1b-0c8d7e6f5a4b";
        assert!(parse_identity(id).is_some());
        assert!(parse_identity(&id.to_uppercase()).is_none());
        assert!(parse_identity("3f2a1c9e5b7d4e2f9a1b0c8d7e6f5a4b").is_none());
        assert!(parse_identity("").is_none());
    }

    #[test]
    fn client_tag_hash_is_stable() {
        let id = Uuid::from_u128(42);
        assert_eq!(client_tag_hash(&id), client_tag_hash(&id));
        assert_ne!(client_tag_hash(&id), client_tag_hash(&Uuid::from_u128(43)));
    }

    #[test]
    fn syncable_hash_mixes_client_and_sync_id() {
        let hash = syncable_hash("client-1", "item-1");
        assert_eq!(hash.len(), 28);
        assert_eq!(hash, syncable_hash("client-1", "item-1"));
        assert_ne!(hash, syncable_hash("client-2", "item-1"));
        assert_ne!(hash, syncable_hash("client-1", "item-2"));
    }

    #[test]
    fn legacy_title_rules() {
        assert_eq!(legacy_canonicalized_title("Groceries"), "Groceries");
        assert_eq!(legacy_canonicalized_title(""), " ");
        assert_eq!(legacy_canonicalized_title("."), ". ");
        assert_eq!(legacy_canonicalized_title(".. "), "..  ");

        let long = "é".repeat(200);
        let canonical = legacy_canonicalized_title(&long);
        assert!(canonical.len() <= 255);
        assert!(long.starts_with(&canonical));
    }
}
