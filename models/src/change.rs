use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File metadata as exchanged between client and server. It is never stored
/// in this shape; both sides project it out of their own tables.
///
/// `modified` is a unix timestamp in seconds. `hash` is lowercase hex SHA-1
/// of the content; directories carry an empty hash and size 0. `rev` is the
/// revision id on the server, which doubles as the cursor position at which
/// the change became visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub size: i64,
    pub rev: i64,
    pub name: String,
    pub is_dir: bool,
    pub modified: i64,
    #[serde(default)]
    pub is_removed: bool,
    pub path: String,
    #[serde(default)]
    pub hash: String,
}

/// One delta entry: a single server path mapped to its metadata, or to
/// `None` when the path was removed as of this cursor.
pub type DeltaEntry = BTreeMap<String, Option<Metadata>>;

/// Response of the `/delta` endpoint.
///
/// `reset=true` means the entries are a full-state snapshot rather than an
/// incremental change list (the client supplied no cursor). The cursor is a
/// decimal string and opaque to the client beyond equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    pub reset: bool,
    pub entries: Vec<DeltaEntry>,
    pub cursor: String,
}

impl Delta {
    /// Iterate `(path, metadata-or-tombstone)` pairs across all entries.
    pub fn changes(&self) -> impl Iterator<Item = (&str, Option<&Metadata>)> {
        self.entries
            .iter()
            .flat_map(|e| e.iter().map(|(k, v)| (k.as_str(), v.as_ref())))
    }

    /// Build a single-path entry, the shape the server emits.
    pub fn entry(path: impl Into<String>, metadata: Option<Metadata>) -> DeltaEntry {
        let mut map = BTreeMap::new();
        map.insert(path.into(), metadata);
        map
    }
}
