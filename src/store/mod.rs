//! Thin contract over the coordination store
//!
//! The store is a hierarchical key space of nodes with one-shot watches and
//! session-scoped ephemeral nodes. The crate talks to it exclusively through
//! the [Ensemble] and [StoreSession] traits so the heavy client library (or
//! the in-memory backend in [memory]) stays swappable.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::errors::{ConnectError, StoreError};
use crate::settings::ClientSettings;

pub mod memory;

pub type StoreResult<T> = Result<T, StoreError>;

/// One-shot watch registration. The store fires it at most once; re-arming
/// is the caller's responsibility.
pub type WatchFired = oneshot::Receiver<WatchedEvent>;

/// Unconditional writes and deletes pass this instead of a real version.
pub const ANY_VERSION: i32 = -1;

/// Creation mode of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Permission bits for an [AclEntry]
pub mod perms {
    pub const READ: u32 = 1;
    pub const WRITE: u32 = 1 << 1;
    pub const CREATE: u32 = 1 << 2;
    pub const DELETE: u32 = 1 << 3;
    pub const ADMIN: u32 = 1 << 4;
    pub const ALL: u32 = READ | WRITE | CREATE | DELETE | ADMIN;
}

/// A single access-control entry. The crate passes these through to the
/// store; it does not evaluate them itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEntry {
    pub perms: u32,
    pub scheme: String,
    pub id: String,
}

impl AclEntry {
    /// World-readable-and-writable entry
    pub fn open() -> AclEntry {
        AclEntry {
            perms: perms::ALL,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }
    }

    /// Full permissions for a digest-authenticated user
    pub fn digest(id: impl Into<String>) -> AclEntry {
        AclEntry {
            perms: perms::ALL,
            scheme: "digest".to_string(),
            id: id.into(),
        }
    }
}

/// Subset of the store's per-node metadata used by this crate
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStat {
    pub version: i32,
    pub czxid: i64,
    pub mzxid: i64,
    /// Session id owning the node, `0` for persistent nodes
    pub ephemeral_owner: u64,
    pub num_children: u32,
    pub data_length: u32,
}

/// Identity of an established session. Holding on to it lets a client
/// re-attach to the same session across transient disconnects.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub id: u64,
    pub password: Vec<u8>,
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // password intentionally not printed
        f.debug_struct("SessionKey").field("id", &self.id).finish()
    }
}

/// Top-level session state transitions, delivered to every subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Expired,
    AuthFailed,
    Closed,
}

/// What a fired watch observed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Payload of a fired one-shot watch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub path: String,
}

/// A live session against the store.
///
/// Sessions are cheap to clone; all clones share the underlying connection.
/// Watch-arming variants return the read result together with a [WatchFired]
/// receiver; if the session dies before the watch fires the receiver
/// resolves with an error, which callers treat as "re-check now".
#[async_trait]
pub trait StoreSession: Clone + Send + Sync + 'static {
    /// Create a node. Returns the leaf name of the created node, which for
    /// sequential modes carries the assigned suffix.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[AclEntry],
        mode: CreateMode,
    ) -> StoreResult<String>;

    async fn exists(&self, path: &str) -> StoreResult<Option<NodeStat>>;

    async fn exists_watch(&self, path: &str) -> StoreResult<(Option<NodeStat>, WatchFired)>;

    async fn get_data(&self, path: &str) -> StoreResult<Vec<u8>>;

    async fn get_data_watch(&self, path: &str) -> StoreResult<(Vec<u8>, WatchFired)>;

    /// Write data; `version` of [ANY_VERSION] is unconditional.
    async fn set_data(&self, path: &str, data: &[u8], version: i32) -> StoreResult<NodeStat>;

    /// Child leaf names, sorted ascending.
    async fn get_children(&self, path: &str) -> StoreResult<Vec<String>>;

    async fn get_children_watch(&self, path: &str) -> StoreResult<(Vec<String>, WatchFired)>;

    /// Delete a node; `version` of [ANY_VERSION] is unconditional.
    async fn delete(&self, path: &str, version: i32) -> StoreResult<()>;

    async fn add_auth(&self, scheme: &str, token: &[u8]) -> StoreResult<()>;

    fn key(&self) -> SessionKey;

    /// Subscribe to this session's state transitions.
    fn events(&self) -> broadcast::Receiver<SessionEvent>;

    fn is_alive(&self) -> bool;

    /// Idempotent; ends the session, deleting its ephemeral nodes.
    async fn close(&self);
}

/// A cluster of store servers that sessions can be established against.
#[async_trait]
pub trait Ensemble: Clone + Send + Sync + 'static {
    type Session: StoreSession;

    /// Establish a session, re-attaching to `saved` when it is still live on
    /// the server side. Implementations must tear down any half-established
    /// connection before returning [ConnectError::Interrupted].
    async fn connect(
        &self,
        settings: &ClientSettings,
        saved: Option<SessionKey>,
    ) -> Result<Self::Session, ConnectError>;

    /// Human-readable server list, used in error messages.
    fn servers(&self) -> String;
}

/// Join a parent path and a leaf name.
pub(crate) fn join_path(parent: &str, leaf: &str) -> String {
    if parent == "/" {
        format!("/{leaf}")
    } else {
        format!("{parent}/{leaf}")
    }
}

/// Parent of a path, `None` for the root.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Leaf name of a path.
pub(crate) fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_helpers() {
        assert_eq!(join_path("/", "a"), "/a");
        assert_eq!(join_path("/a/b", "c"), "/a/b/c");
        assert_eq!(parent_path("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(leaf_name("/a/b/c"), "c");
    }

    #[test]
    fn create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(!CreateMode::Ephemeral.is_sequential());
    }

    #[test]
    fn session_key_debug_hides_password() {
        let key = SessionKey {
            id: 7,
            password: b"secret".to_vec(),
        };
        let printed = format!("{key:?}");
        assert!(!printed.contains("secret"));
    }
}
