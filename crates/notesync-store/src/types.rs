//! Wire-level data model for the remote document database.
//!
//! Every document shares a JSON envelope and is distinguished by its `type`
//! field, so the model is a sum type ([`EntryDoc`]) rather than a set of
//! loosely-related structs. Paths and document ids are bijective under a
//! given obfuscation configuration but are distinct concepts; they get
//! separate newtypes so one can never be passed where the other is expected.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Salt constant bound into every passphrase-derived key.
pub const SALT_OF_PASSPHRASE: &str = "rHGMPtr6oWw7VSa3W3wpa8fT8U";

/// Id prefix for obfuscated metadata documents.
pub const PREFIX_OBFUSCATED: &str = "f:";

/// Id prefix for chunk leaf documents.
pub const PREFIX_CHUNK: &str = "h:";

/// Id prefix for chunk leaf documents carrying encrypted payloads.
pub const PREFIX_ENCRYPTED_CHUNK: &str = "h:+";

/// Database format version token.
pub const VER: u32 = 10;

/// Upper bound for a single leaf payload, in bytes (pre-base64 accounting).
pub const MAX_DOC_SIZE_BIN: usize = 102_400;

/// Target piece size where delimiter-aware splitting applies.
pub const MAX_DOC_SIZE: usize = 1_000;

/// Default lower bound for piece bytes.
pub const DEFAULT_MINIMUM_CHUNK_SIZE: usize = 20;

/// Well-known document ids that the store must never produce entries for.
pub const ID_VERSION_INFO: &str = "obsydian_livesync_version";
pub const ID_MILESTONE: &str = "_local/obsydian_livesync_milestone";
pub const ID_NODE_INFO: &str = "_local/obsydian_livesync_nodeinfo";
pub const ID_SYNC_INFO: &str = "syncinfo";

const RESERVED_IDS: [&str; 4] = [ID_VERSION_INFO, ID_MILESTONE, ID_NODE_INFO, ID_SYNC_INFO];

/// Opaque id of a remote document.
///
/// Two id families exist: `h:`-prefixed ids name chunk leaves, everything
/// else names metadata and system entries. Encrypted chunk payloads use the
/// `h:+` sub-prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id names a chunk leaf.
    pub fn is_chunk(&self) -> bool {
        self.0.starts_with(PREFIX_CHUNK)
    }

    /// Whether this id names a chunk leaf with an encrypted payload.
    pub fn is_encrypted_chunk(&self) -> bool {
        self.0.starts_with(PREFIX_ENCRYPTED_CHUNK)
    }

    /// Whether this id is one of the well-known system ids.
    pub fn is_reserved(&self) -> bool {
        RESERVED_IDS.contains(&self.0.as_str())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Logical path of a note file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilePath(String);

impl FilePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FilePath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FilePath {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Change-feed cursor token. Opaque and monotonic within a database.
///
/// CouchDB 1.x emits numeric sequences, 2.x+ emits strings; both decode into
/// the string form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Seq(String);

impl Seq {
    /// The cursor naming the beginning of the feed.
    pub fn zero() -> Self {
        Self("0".to_owned())
    }

    pub fn new(seq: impl Into<String>) -> Self {
        Self(seq.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Seq {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Seq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number sequence, got {other}"
            ))),
        }
    }
}

/// The two metadata entry flavors: `newnote` carries base64 chunk payloads,
/// `plain` carries plain text chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    NewNote,
    Plain,
}

impl NoteKind {
    pub fn as_type_str(self) -> &'static str {
        match self {
            NoteKind::NewNote => "newnote",
            NoteKind::Plain => "plain",
        }
    }
}

/// Metadata entry describing one file: path, timestamps, size and the ordered
/// list of chunk ids whose concatenated payloads reconstitute the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEntry {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub path: FilePath,
    #[serde(default)]
    pub children: Vec<DocumentId>,
    /// Creation time, unix milliseconds.
    pub ctime: i64,
    /// Modification time, unix milliseconds.
    pub mtime: i64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

/// Chunk leaf entry. The id is a pure function of the payload (and the
/// passphrase when one is configured), so leaves are write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub data: String,
    #[serde(rename = "isCorrupted", default, skip_serializing_if = "is_false")]
    pub is_corrupted: bool,
}

/// System entries (version, milestone, node info, sync info). The store only
/// ever touches these at identity level, so the body beyond the envelope is
/// kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEntry {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Tagged union over the `type` discriminant shared by all remote documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EntryDoc {
    #[serde(rename = "newnote")]
    NewNote(NoteEntry),
    #[serde(rename = "plain")]
    Plain(NoteEntry),
    #[serde(rename = "leaf")]
    Leaf(LeafEntry),
    #[serde(rename = "versioninfo")]
    VersionInfo(SystemEntry),
    #[serde(rename = "milestoneinfo")]
    Milestone(SystemEntry),
    #[serde(rename = "nodeinfo")]
    NodeInfo(SystemEntry),
    #[serde(rename = "syncinfo")]
    SyncInfo(SystemEntry),
}

impl EntryDoc {
    pub fn id(&self) -> &DocumentId {
        match self {
            EntryDoc::NewNote(n) | EntryDoc::Plain(n) => &n.id,
            EntryDoc::Leaf(l) => &l.id,
            EntryDoc::VersionInfo(s)
            | EntryDoc::Milestone(s)
            | EntryDoc::NodeInfo(s)
            | EntryDoc::SyncInfo(s) => &s.id,
        }
    }

    /// Interpret a raw document as an entry, if it carries a known `type`.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// The metadata entry and its kind, when this is a `newnote`/`plain` doc.
    pub fn into_note(self) -> Option<(NoteEntry, NoteKind)> {
        match self {
            EntryDoc::NewNote(n) => Some((n, NoteKind::NewNote)),
            EntryDoc::Plain(n) => Some((n, NoteKind::Plain)),
            _ => None,
        }
    }
}

/// Caller-supplied file facts attached to a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteInfo {
    /// Creation time, unix milliseconds.
    pub ctime: i64,
    /// Modification time, unix milliseconds.
    pub mtime: i64,
    pub size: u64,
}

/// A metadata entry resolved back into its logical form: decrypted path and,
/// unless fetched meta-only, the ordered chunk payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEntry {
    pub id: DocumentId,
    pub rev: Option<String>,
    pub path: FilePath,
    pub kind: NoteKind,
    pub children: Vec<DocumentId>,
    /// Ordered chunk payloads; empty for meta-only reads.
    pub data: Vec<String>,
    pub ctime: i64,
    pub mtime: i64,
    pub size: u64,
    pub deleted: bool,
}

impl LoadedEntry {
    /// The reassembled file content.
    pub fn joined(&self) -> String {
        self.data.concat()
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn note_entry_round_trips_through_wire_shape() {
        let doc = EntryDoc::NewNote(NoteEntry {
            id: DocumentId::new("a/b.md"),
            rev: Some("1-abc".to_owned()),
            path: FilePath::new("a/b.md"),
            children: vec![DocumentId::new("h:x"), DocumentId::new("h:y")],
            ctime: 1,
            mtime: 2,
            size: 13,
            deleted: false,
        });
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["type"], "newnote");
        assert_eq!(value["_id"], "a/b.md");
        assert_eq!(value["_rev"], "1-abc");
        // `deleted: false` stays off the wire
        assert!(value.get("deleted").is_none());

        let back: EntryDoc = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn leaf_uses_type_tag_and_omits_missing_rev() {
        let doc = EntryDoc::Leaf(LeafEntry {
            id: DocumentId::new("h:abc"),
            rev: None,
            data: "payload".to_owned(),
            is_corrupted: false,
        });
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"type": "leaf", "_id": "h:abc", "data": "payload"}));
    }

    #[test]
    fn unknown_type_is_not_an_entry() {
        assert!(EntryDoc::from_value(json!({"_id": "x", "type": "widget"})).is_none());
        assert!(EntryDoc::from_value(json!({"_id": "x"})).is_none());
    }

    #[test]
    fn chunk_id_families() {
        assert!(DocumentId::new("h:1a2b").is_chunk());
        assert!(!DocumentId::new("h:1a2b").is_encrypted_chunk());
        assert!(DocumentId::new("h:+1a2b").is_encrypted_chunk());
        assert!(!DocumentId::new("f:1a2b").is_chunk());
        assert!(DocumentId::new("syncinfo").is_reserved());
        assert!(DocumentId::new("_local/obsydian_livesync_milestone").is_reserved());
        assert!(!DocumentId::new("notes/syncinfo.md").is_reserved());
    }

    #[test]
    fn seq_decodes_strings_and_numbers() {
        let s: Seq = serde_json::from_value(json!("12-abc")).unwrap();
        assert_eq!(s.as_str(), "12-abc");
        let n: Seq = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(n.as_str(), "42");
        assert!(serde_json::from_value::<Seq>(json!(["no"])).is_err());
    }
}
