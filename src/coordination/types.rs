use serde::{Deserialize, Serialize};

/// How a node is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CreateMode {
    /// Node lives until explicitly deleted.
    Persistent,
    /// Like `Persistent`, but the service appends a unique, strictly increasing
    /// 10-digit suffix to the requested name.
    PersistentSequential,
}

impl CreateMode {
    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::PersistentSequential)
    }
}

/// Access control attached to a node at creation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Acl {
    /// Any session may read, write, delete and create children.
    #[default]
    Open,
    /// Reads only. Children cannot be created under it and it cannot be
    /// modified or deleted.
    ReadOnly,
}

impl Acl {
    pub fn allows_write(&self) -> bool {
        matches!(self, Acl::Open)
    }
}

/// Node metadata returned alongside reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stat {
    /// Number of `set_data` calls applied to this node.
    pub version: i32,
    /// Number of child additions/removals applied to this node.
    pub cversion: i32,
    pub num_children: usize,
    /// Creation time (ms since epoch).
    pub ctime: u64,
    /// Last modification time (ms since epoch).
    pub mtime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A child of the watched node was created or deleted.
    ChildrenChanged,
    /// The watched node itself was deleted.
    NodeDeleted,
    /// The owning session went away before anything changed.
    SessionClosed,
}

/// Notification delivered to a one-shot watch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

/// Faults reported by a coordination service session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    #[error("no node: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("version mismatch on {path}: expected {expected}, actual {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    #[error("not authorized to modify {0}")]
    NoAuth(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("session expired")]
    SessionExpired,

    #[error("connection lost: {0}")]
    ConnectionLoss(String),

    #[error("session closed")]
    SessionClosed,
}

impl CoordError {
    /// Session expiry and connection loss are retryable; everything else is a
    /// definite answer from the service.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::SessionExpired | CoordError::ConnectionLoss(_))
    }

    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordError::NoNode(_))
    }
}

pub type CoordResult<T> = std::result::Result<T, CoordError>;

/// Joins a parent path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Returns the parent of an absolute path, or `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Checks that a path is absolute, has no empty components and no trailing
/// slash (the root `/` excepted).
pub fn validate_path(path: &str) -> CoordResult<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(CoordError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
