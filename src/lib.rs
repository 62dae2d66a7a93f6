//! Coordination primitives for distributed services, backed by a
//! ZooKeeper-style store
//!
//! The crate builds four things on one mechanism (ephemeral sequential
//! children of a persistent path, observed through one-shot watches):
//!
//! * [group] — membership with automatic re-join across session
//!   expirations
//! * [election] — leader election over a group with a pluggable judge
//! * [serverset] — service registration and discovery, including compound
//!   and static sets
//! * [partition] — deterministic integer key-space slicing across group
//!   members
//!
//! The store itself is consumed through the thin traits in [store]; the
//! in-memory backend [store::memory::MemoryStore] implements them with full
//! session and watch semantics.
//!
//! # Publishing and discovering a service
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use coterie::prelude::*;
//! use coterie::store::memory::MemoryStore;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     let client = StoreClient::new(store.clone(), ClientSettings::default());
//!
//!     // Publish this process.
//!     let publisher = ServerSet::new(client.clone(), "/services/web");
//!     let registration = publisher
//!         .join(Endpoint::new("10.0.0.7", 8080), BTreeMap::new(), None)
//!         .await?;
//!
//!     // Observe the live set.
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let observer = ServerSet::new(client.clone(), "/services/web");
//!     let _watch = observer.watch(ChannelMonitor(tx)).await?;
//!     let hosts = rx.recv().await.unwrap();
//!     assert_eq!(hosts.len(), 1);
//!
//!     registration.leave().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Electing a leader
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use coterie::prelude::*;
//! use coterie::store::memory::MemoryStore;
//!
//! struct Scheduler;
//!
//! #[async_trait]
//! impl Leader for Scheduler {
//!     async fn on_elected(&self, _abdicate: Abdicate) {
//!         // start doing leader-only work
//!     }
//!     async fn on_defeated(&self) {
//!         // stop doing leader-only work
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = StoreClient::new(MemoryStore::new(), ClientSettings::default());
//!     let candidate = Candidate::new(Group::new(client, "/services/scheduler"));
//!     let leadership = candidate.offer_leadership(Scheduler).await?;
//!     println!("leading: {}", leadership.is_leader());
//!     Ok(())
//! }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod backoff;
pub mod client;
pub mod election;
pub mod errors;
pub mod group;
pub mod partition;
pub mod serverset;
pub mod settings;
pub mod store;
pub mod views;
pub mod watch;

pub mod prelude {
    pub use super::client::StoreClient;
    pub use super::election::{Abdicate, Candidate, Leader, Leadership};
    pub use super::errors::{
        CancelError, ConnectError, ElectionError, JoinError, MonitorError, PartitionError,
        StoreError, UpdateError, WatchError,
    };
    pub use super::group::{Group, GroupChangeListener, GroupConfig, JoinOptions, Membership};
    pub use super::partition::{Partition, Partitioner};
    pub use super::serverset::codec::{Codec, Encoding};
    pub use super::serverset::compound::CompoundServerSet;
    pub use super::serverset::fixed::StaticServerSet;
    pub use super::serverset::singleton::SingletonService;
    pub use super::serverset::{
        ChannelMonitor, Endpoint, EndpointHandle, HostChangeMonitor, JoinedEndpoint, ServerSet,
        ServiceDirectory, ServiceInstance, Status,
    };
    pub use super::settings::{ClientSettings, ClientSettingsBuilder, Credentials};
    pub use super::store::{Ensemble, SessionEvent, StoreSession};
    pub use super::watch::WatchGuard;
}
