//! Service registration and discovery on top of [Group]
//!
//! A server set is a group whose member payloads are encoded service
//! instance records. Joining publishes this process's endpoints; watching
//! materializes the full live set and keeps it current across member churn
//! and session expirations.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{error, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::client::StoreClient;
use crate::errors::{CancelError, ConnectError, JoinError, MonitorError, StoreError};
use crate::group::{ChannelListener, Group, GroupConfig, JoinOptions, MemberId, Membership};
use crate::store::{Ensemble, StoreSession};
use crate::watch::WatchGuard;

pub mod codec;
pub mod compound;
pub mod fixed;
pub mod singleton;

use codec::{Codec, Encoding};

/// A host and port
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

/// Liveness of a service instance. Only [Status::Alive] instances are ever
/// published; the other states exist for decoding and for the deprecated
/// status-update path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Alive,
    Dead,
    Starting,
    Stopping,
}

/// One published service instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_endpoint: Endpoint,
    pub additional_endpoints: BTreeMap<String, Endpoint>,
    pub status: Status,
    pub shard: Option<u32>,
}

impl ServiceInstance {
    pub fn alive(service_endpoint: Endpoint) -> ServiceInstance {
        ServiceInstance {
            service_endpoint,
            additional_endpoints: BTreeMap::new(),
            status: Status::Alive,
            shard: None,
        }
    }

    pub fn with_additional(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.additional_endpoints.insert(name.into(), endpoint);
        self
    }

    pub fn with_shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);
        self
    }
}

/// Receives the full live instance set: once with the initial contents
/// (possibly empty), then again on every actual change.
#[async_trait]
pub trait HostChangeMonitor: Send + Sync + 'static {
    async fn on_change(&self, hosts: HashSet<ServiceInstance>);
}

/// Object-safe face of a server set, so store-backed, compound and static
/// sets compose.
#[async_trait]
pub trait ServiceDirectory: Send + Sync + 'static {
    async fn join(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<Box<dyn JoinedEndpoint>, JoinError>;

    async fn watch(&self, monitor: Arc<dyn HostChangeMonitor>) -> Result<WatchGuard, MonitorError>;
}

/// Handle to a published instance
#[async_trait]
pub trait JoinedEndpoint: Send + Sync {
    async fn leave(&self) -> Result<(), CancelError>;

    /// Deprecated status-update path: only a transition to [Status::Dead]
    /// acts, by leaving the set.
    async fn update(&self, status: Status) -> Result<(), CancelError>;
}

/// Store-backed server set
pub struct ServerSet<E: Ensemble> {
    group: Group<E>,
    codec: Codec,
}

impl<E: Ensemble> Clone for ServerSet<E> {
    fn clone(&self) -> Self {
        ServerSet {
            group: self.group.clone(),
            codec: self.codec,
        }
    }
}

impl<E: Ensemble> ServerSet<E> {
    /// Server set at `path` using the client's configured encoding and the
    /// default member prefix.
    pub fn new(client: StoreClient<E>, path: impl Into<String>) -> ServerSet<E> {
        let encoding = client.settings().encoding;
        ServerSet::with_config(client, path, GroupConfig::default(), encoding)
    }

    pub fn with_config(
        client: StoreClient<E>,
        path: impl Into<String>,
        config: GroupConfig,
        encoding: Encoding,
    ) -> ServerSet<E> {
        ServerSet {
            group: Group::with_config(client, path, config),
            codec: Codec::new(encoding),
        }
    }

    pub fn group(&self) -> &Group<E> {
        &self.group
    }

    /// Publish an alive instance. The returned handle keeps the
    /// registration current across session expirations until
    /// [leave](EndpointHandle::leave) is called.
    pub async fn join(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<EndpointHandle<E>, JoinError> {
        let instance = ServiceInstance {
            service_endpoint: endpoint,
            additional_endpoints: additional,
            status: Status::Alive,
            shard,
        };
        let payload = self.codec.encode(&instance)?;
        let bytes = Arc::new(StdMutex::new(payload));
        let supplier_bytes = Arc::clone(&bytes);
        let options = JoinOptions::default().data_supplier(Arc::new(move || {
            supplier_bytes
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .clone()
        }));
        let membership = self.group.join_with(options).await?;
        Ok(EndpointHandle {
            membership,
            instance,
        })
    }

    /// Watch the live instance set. Blocks until the initial set was
    /// delivered to `monitor`; follow-up deliveries happen on a library
    /// task and only when the set actually changed. A session expiration
    /// triggers one full rebuild, surfacing as at most one delivery.
    pub async fn watch<M: HostChangeMonitor>(&self, monitor: M) -> Result<WatchGuard, MonitorError> {
        self.watch_dyn(Arc::new(monitor)).await
    }

    async fn watch_dyn(
        &self,
        monitor: Arc<dyn HostChangeMonitor>,
    ) -> Result<WatchGuard, MonitorError> {
        let client = self.group.client().clone();
        let cache: Arc<DashMap<MemberId, ServiceInstance>> = Arc::new(DashMap::new());
        let rebuild = Arc::new(Notify::new());

        let handler_cache = Arc::clone(&cache);
        let handler_rebuild = Arc::clone(&rebuild);
        let handler_id = client.register_expiration_handler(move || {
            let cache = Arc::clone(&handler_cache);
            let rebuild = Arc::clone(&handler_rebuild);
            async move {
                cache.clear();
                rebuild.notify_one();
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let group_guard = match self.group.watch(ChannelListener(tx)).await {
            Ok(guard) => guard,
            Err(error) => {
                client.unregister_expiration_handler(handler_id);
                return Err(error.into());
            }
        };

        // The group listener delivered the initial snapshot synchronously,
        // so the channel already holds it.
        let initial_ids = rx.try_recv().unwrap_or_default();
        let initial = match self.load(&initial_ids, &cache).await {
            Ok(hosts) => hosts,
            Err(error) => {
                client.unregister_expiration_handler(handler_id);
                group_guard.cancel();
                return Err(error);
            }
        };
        monitor.on_change(initial.clone()).await;

        let token = CancellationToken::new();
        let set = self.clone();
        let task_token = token.clone();
        let task_client = client.clone();
        tokio::spawn(async move {
            let mut last = initial;
            loop {
                let ids = tokio::select! {
                    _ = task_token.cancelled() => break,
                    ids = rx.recv() => match ids {
                        Some(ids) => ids,
                        None => break,
                    },
                    _ = rebuild.notified() => match set.group.member_ids().await {
                        Ok(ids) => ids,
                        Err(error) => {
                            warn!(
                                "rebuild of {} not possible yet: {error}",
                                set.group.path()
                            );
                            continue;
                        }
                    },
                };
                match set.load(&ids, &cache).await {
                    Ok(hosts) => {
                        if hosts != last {
                            last = hosts.clone();
                            monitor.on_change(hosts).await;
                        }
                    }
                    Err(error) => {
                        error!("server set watch of {} failed: {error}", set.group.path());
                        task_client.unregister_expiration_handler(handler_id);
                        break;
                    }
                }
            }
        });

        Ok(WatchGuard::with_cleanup(token, move || {
            group_guard.cancel();
            client.unregister_expiration_handler(handler_id);
        }))
    }

    /// Materialize instances for `ids` through the record cache. Only
    /// missing entries are fetched; members deleted between the listing and
    /// the fetch are skipped.
    async fn load(
        &self,
        ids: &[MemberId],
        cache: &DashMap<MemberId, ServiceInstance>,
    ) -> Result<HashSet<ServiceInstance>, MonitorError> {
        let client = self.group.client();
        cache.retain(|id, _| ids.iter().any(|wanted| wanted == id));

        for id in ids {
            if cache.contains_key(id) {
                continue;
            }
            let path = self.group.member_path(id);
            let mut backoff = client.settings().backoff.start();
            loop {
                let session = match client.get().await {
                    Ok(session) => session,
                    Err(ConnectError::Connection { ref source, .. }) if source.is_retryable() => {
                        backoff.wait().await;
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                };
                match session.get_data(&path).await {
                    Ok(bytes) => {
                        match Codec::decode(&bytes) {
                            Ok(instance) => {
                                cache.insert(id.clone(), instance);
                            }
                            Err(error) => {
                                // Unknown payload shape; skip the member.
                                warn!("undecodable member {path}: {error}");
                                cache.remove(id);
                            }
                        }
                        break;
                    }
                    Err(StoreError::NoNode(_)) => {
                        cache.remove(id);
                        break;
                    }
                    Err(source) if client.should_retry(&source).await => {
                        warn!("retrying load of {path}: {source}");
                        backoff.wait().await;
                    }
                    Err(source) => return Err(MonitorError::Store { path, source }),
                }
            }
        }

        Ok(ids
            .iter()
            .filter_map(|id| cache.get(id).map(|entry| entry.value().clone()))
            .collect())
    }
}

#[async_trait]
impl<E: Ensemble> ServiceDirectory for ServerSet<E> {
    async fn join(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<Box<dyn JoinedEndpoint>, JoinError> {
        let handle = ServerSet::join(self, endpoint, additional, shard).await?;
        Ok(Box::new(handle))
    }

    async fn watch(&self, monitor: Arc<dyn HostChangeMonitor>) -> Result<WatchGuard, MonitorError> {
        self.watch_dyn(monitor).await
    }
}

/// Handle to this process's published instance
pub struct EndpointHandle<E: Ensemble> {
    membership: Membership<E>,
    instance: ServiceInstance,
}

impl<E: Ensemble> EndpointHandle<E> {
    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    pub fn member_id(&self) -> MemberId {
        self.membership.id()
    }

    pub fn membership(&self) -> &Membership<E> {
        &self.membership
    }

    /// Unpublish. Idempotent; no re-registration fires afterwards.
    pub async fn leave(&self) -> Result<(), CancelError> {
        self.membership.cancel().await
    }

    /// Deprecated status-update path kept for callers of the old API: a
    /// transition to [Status::Dead] leaves the set, anything else is
    /// ignored.
    pub async fn update(&self, status: Status) -> Result<(), CancelError> {
        if status == Status::Dead {
            self.leave().await
        } else {
            warn!("ignoring status update to {status:?}; only Dead acts");
            Ok(())
        }
    }
}

#[async_trait]
impl<E: Ensemble> JoinedEndpoint for EndpointHandle<E> {
    async fn leave(&self) -> Result<(), CancelError> {
        EndpointHandle::leave(self).await
    }

    async fn update(&self, status: Status) -> Result<(), CancelError> {
        EndpointHandle::update(self, status).await
    }
}

/// Test/monitoring helper: forwards instance sets into a channel.
pub struct ChannelMonitor(pub mpsc::UnboundedSender<HashSet<ServiceInstance>>);

#[async_trait]
impl HostChangeMonitor for ChannelMonitor {
    async fn on_change(&self, hosts: HashSet<ServiceInstance>) {
        let _ = self.0.send(hosts);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::ClientSettings;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn server_set(store: &MemoryStore) -> ServerSet<MemoryStore> {
        let client = StoreClient::new(store.clone(), ClientSettings::default());
        ServerSet::new(client, "/svc/web")
    }

    async fn recv(
        rx: &mut mpsc::UnboundedReceiver<HashSet<ServiceInstance>>,
    ) -> HashSet<ServiceInstance> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a delivery")
            .expect("monitor channel closed")
    }

    #[tokio::test]
    async fn initial_delivery_happens_even_when_empty() -> TestResult {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = server_set(&store).watch(ChannelMonitor(tx)).await?;

        assert!(recv(&mut rx).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn join_and_leave_flow_to_the_monitor() -> TestResult {
        let store = MemoryStore::new();
        let publisher = server_set(&store);
        let observer = server_set(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = observer.watch(ChannelMonitor(tx)).await?;
        assert!(recv(&mut rx).await.is_empty());

        let handle = publisher
            .join(
                Endpoint::new("foo", 1234),
                BTreeMap::from([("http-admin".to_string(), Endpoint::new("foo", 8080))]),
                Some(0),
            )
            .await?;

        let hosts = recv(&mut rx).await;
        assert_eq!(hosts.len(), 1);
        let instance = hosts.into_iter().next().unwrap();
        assert_eq!(instance.service_endpoint, Endpoint::new("foo", 1234));
        assert_eq!(
            instance.additional_endpoints.get("http-admin"),
            Some(&Endpoint::new("foo", 8080))
        );
        assert_eq!(instance.status, Status::Alive);
        assert_eq!(instance.shard, Some(0));

        handle.leave().await?;
        assert!(recv(&mut rx).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn update_to_dead_leaves_the_set() -> TestResult {
        let store = MemoryStore::new();
        let publisher = server_set(&store);
        let handle = publisher
            .join(Endpoint::new("foo", 9000), BTreeMap::new(), None)
            .await?;

        handle.update(Status::Stopping).await?;
        assert_eq!(publisher.group().member_ids().await?.len(), 1);

        handle.update(Status::Dead).await?;
        assert!(publisher.group().member_ids().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_set_is_not_redelivered() -> TestResult {
        let store = MemoryStore::new();
        let publisher = server_set(&store);
        let _handle = publisher
            .join(Endpoint::new("foo", 9000), BTreeMap::new(), None)
            .await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = server_set(&store);
        let _guard = observer.watch(ChannelMonitor(tx)).await?;
        assert_eq!(recv(&mut rx).await.len(), 1);

        // Churn that cancels itself out: a second member joins and leaves.
        let transient = publisher
            .join(Endpoint::new("bar", 9001), BTreeMap::new(), None)
            .await?;
        assert_eq!(recv(&mut rx).await.len(), 2);
        transient.leave().await?;
        assert_eq!(recv(&mut rx).await.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_watch_unregisters_its_expiration_handler() -> TestResult {
        let store = MemoryStore::new();
        let observer = server_set(&store);
        let client = observer.group().client().clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = observer.watch(ChannelMonitor(tx)).await?;
        let _ = recv(&mut rx).await;
        assert_eq!(client.expiration_handler_count(), 1);

        guard.cancel();
        assert_eq!(client.expiration_handler_count(), 0);
        Ok(())
    }
}
