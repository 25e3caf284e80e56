use std::path::PathBuf;

use uuid::Uuid;

use crate::change::Metadata;

/// Kind of a locally observed change, as the watcher reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Create,
    Modify,
    Delete,
}

/// A local filesystem change on its way to the server. In-memory only:
/// operations flow from the watcher to the worker over the operations
/// channel and die there.
///
/// `path` is the absolute local path; `attributes.path` carries the
/// server-normalized relative form.
#[derive(Debug, Clone)]
pub struct FileOperation {
    pub id: Uuid,
    pub path: PathBuf,
    pub op: OpType,
    pub attributes: Metadata,
}

impl FileOperation {
    pub fn new(op: OpType, path: PathBuf, attributes: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            op,
            attributes,
        }
    }
}
