//! Repository of all error types for this crate using [thiserror]

use thiserror::Error;

/// Error codes surfaced by the coordination store.
///
/// These mirror the store's own failure classes; the crate retries only
/// [StoreError::is_retryable] errors, everything else is surfaced to the
/// caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection to the store was lost")]
    ConnectionLoss,

    #[error("operation timed out")]
    OperationTimeout,

    #[error("session expired")]
    SessionExpired,

    #[error("session is closed")]
    SessionClosed,

    #[error("no node at {0}")]
    NoNode(String),

    #[error("node already exists at {0}")]
    NodeExists(String),

    #[error("version mismatch at {0}")]
    BadVersion(String),

    #[error("ephemeral nodes cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("node at {0} has children")]
    NotEmpty(String),

    #[error("authorization denied")]
    AuthFailed,

    #[error("operation interrupted")]
    Interrupted,
}

impl StoreError {
    /// True for the failure classes that a fresh attempt (possibly on a new
    /// session) can succeed at.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionLoss | StoreError::OperationTimeout | StoreError::SessionExpired
        )
    }
}

/// Errors establishing a store session through
/// [StoreClient](crate::client::StoreClient)
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("timed out waiting for a connection")]
    Timeout,

    #[error("interrupted while connecting")]
    Interrupted,

    #[error("cannot connect to {servers}")]
    Connection {
        servers: String,
        #[source]
        source: StoreError,
    },
}

/// Errors while encoding or decoding service instance records
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("json codec")]
    Json(#[from] serde_json::Error),

    #[error("binary codec")]
    Binary(#[from] bincode::Error),

    #[error("input too short to classify")]
    TooShort,
}

/// Errors joining a group
#[derive(Error, Debug)]
pub enum JoinError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("join of {path}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("serializing member payload")]
    Encode(#[from] CodecError),
}

/// Errors establishing a watch on a group or node
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("watch of {path}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Errors updating a member's payload
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("update of {path}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Errors cancelling a membership
#[derive(Error, Debug)]
pub enum CancelError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("cancel of {path}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("{} constituents failed to cancel", .0.len())]
    Composite(Vec<CancelError>),
}

/// Errors establishing a server set monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("loading member {path}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Errors offering leadership through a [Candidate](crate::election::Candidate)
#[derive(Error, Debug)]
pub enum ElectionError {
    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Errors joining a [Partitioner](crate::partition::Partitioner)
#[derive(Error, Debug)]
pub enum PartitionError {
    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}
