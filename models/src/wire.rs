use serde::{Deserialize, Serialize};

/// Session token handed out by `/register` and `/login`; every authenticated
/// request echoes it in the `X-Cloudsyncer-Authtoken` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub authencity_token: String,
}

/// Response of `/longpoll_delta`: whether changes are waiting past the
/// polled cursor. `false` means the server timed out and the client should
/// renew the poll with the same cursor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LongpollResponse {
    pub changes: bool,
}

/// One row of the `/revisions` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionEntry {
    pub rev: i64,
    pub size: i64,
    pub path: String,
    pub name: String,
    pub modified: i64,
    pub is_dir: bool,
    pub current: bool,
}
