//! Materialized view of a subtree
//!
//! Keys are the child names of one parent node, values their decoded
//! payloads. The view holds a child-list watch on the parent plus a data
//! watch per child, resynchronizing on every firing. Parent deletion
//! empties the view until the node is recreated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use log::{error, warn};
use tokio_util::sync::CancellationToken;

use crate::client::StoreClient;
use crate::errors::{ConnectError, StoreError, WatchError};
use crate::store::{join_path, Ensemble, StoreSession, WatchFired};
use crate::watch::WatchGuard;

use super::Decode;

/// Callbacks for entry-level changes. Run on the view's task; must not
/// block.
#[async_trait]
pub trait MapListener<V: Send + Sync + 'static>: Send + Sync + 'static {
    async fn node_changed(&self, name: String, value: V);
    async fn node_removed(&self, name: String);
}

/// Listener that ignores everything.
pub struct NoopMapListener;

#[async_trait]
impl<V: Send + Sync + 'static> MapListener<V> for NoopMapListener {
    async fn node_changed(&self, _name: String, _value: V) {}
    async fn node_removed(&self, _name: String) {}
}

/// Read-only live map of a subtree
pub struct MapView<V: Clone + Send + Sync + 'static> {
    entries: Arc<StdRwLock<HashMap<String, V>>>,
    _guard: WatchGuard,
}

impl<V: Clone + PartialEq + Send + Sync + 'static> MapView<V> {
    /// Mirror the children of `path`. Returns after the initial
    /// materialization (delivered entry by entry to `listener`).
    pub async fn new<E: Ensemble, L: MapListener<V>>(
        client: StoreClient<E>,
        path: impl Into<String>,
        decode: Decode<V>,
        listener: L,
    ) -> Result<MapView<V>, WatchError> {
        let driver = Driver {
            client,
            path: path.into(),
            decode,
            listener: Arc::new(listener),
            entries: Arc::new(StdRwLock::new(HashMap::new())),
        };
        let entries = Arc::clone(&driver.entries);

        let waiters = driver.sync().await?;

        let token = CancellationToken::new();
        let task_token = token.clone();
        tokio::spawn(async move {
            driver.run(task_token, waiters).await;
        });

        Ok(MapView {
            entries,
            _guard: WatchGuard::new(token),
        })
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> HashMap<String, V> {
        self.entries
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Driver<E: Ensemble, V: Clone + Send + Sync + 'static> {
    client: StoreClient<E>,
    path: String,
    decode: Decode<V>,
    listener: Arc<dyn MapListener<V>>,
    entries: Arc<StdRwLock<HashMap<String, V>>>,
}

impl<E: Ensemble, V: Clone + PartialEq + Send + Sync + 'static> Driver<E, V> {
    async fn run(&self, token: CancellationToken, mut waiters: Vec<WatchFired>) {
        loop {
            // Any firing (parent children, parent recreation, or one of the
            // child data watches) triggers a full resync, which also
            // re-arms everything.
            tokio::select! {
                _ = token.cancelled() => break,
                _ = futures::future::select_all(waiters) => {}
            }
            waiters = match self.sync().await {
                Ok(waiters) => waiters,
                Err(error) => {
                    error!("map view of {} failed: {error}", self.path);
                    break;
                }
            };
        }
    }

    /// Bring `entries` in line with the store and arm the next round of
    /// watches. Retryable failures are retried internally.
    async fn sync(&self) -> Result<Vec<WatchFired>, WatchError> {
        let mut backoff = self.client.settings().backoff.start();
        'attempt: loop {
            let session = match self.client.get().await {
                Ok(session) => session,
                Err(ConnectError::Connection { ref source, .. }) if source.is_retryable() => {
                    backoff.wait().await;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let (children, parent_fired) = match session.get_children_watch(&self.path).await {
                Ok(listing) => listing,
                Err(StoreError::NoNode(_)) => {
                    // Parent gone: empty the view and wait for recreation.
                    match session.exists_watch(&self.path).await {
                        Ok((None, fired)) => {
                            self.clear().await;
                            return Ok(vec![fired]);
                        }
                        Ok((Some(_), _)) => continue,
                        Err(source) if self.client.should_retry(&source).await => {
                            backoff.wait().await;
                            continue;
                        }
                        Err(source) => {
                            return Err(WatchError::Store {
                                path: self.path.clone(),
                                source,
                            })
                        }
                    }
                }
                Err(source) if self.client.should_retry(&source).await => {
                    warn!("retrying listing of {}: {source}", self.path);
                    backoff.wait().await;
                    continue;
                }
                Err(source) => {
                    return Err(WatchError::Store {
                        path: self.path.clone(),
                        source,
                    })
                }
            };

            let mut waiters = vec![parent_fired];
            let mut fresh: HashMap<String, V> = HashMap::new();
            for name in &children {
                let child_path = join_path(&self.path, name);
                match session.get_data_watch(&child_path).await {
                    Ok((bytes, fired)) => {
                        waiters.push(fired);
                        if let Some(value) = (*self.decode)(&bytes) {
                            fresh.insert(name.clone(), value);
                        }
                    }
                    // Deleted between listing and read; the parent watch
                    // already fired and the next sync picks it up.
                    Err(StoreError::NoNode(_)) => {}
                    Err(source) if self.client.should_retry(&source).await => {
                        backoff.wait().await;
                        continue 'attempt;
                    }
                    Err(source) => {
                        return Err(WatchError::Store {
                            path: child_path,
                            source,
                        })
                    }
                }
            }

            self.replace(fresh).await;
            return Ok(waiters);
        }
    }

    async fn clear(&self) {
        self.replace(HashMap::new()).await;
    }

    /// Swap in the fresh entries and report the per-entry differences.
    async fn replace(&self, fresh: HashMap<String, V>) {
        let (changed, removed) = {
            let mut entries = self
                .entries
                .write()
                .unwrap_or_else(|poison| poison.into_inner());
            let removed: Vec<String> = entries
                .keys()
                .filter(|name| !fresh.contains_key(*name))
                .cloned()
                .collect();
            let changed: Vec<(String, V)> = fresh
                .iter()
                .filter(|(name, value)| entries.get(*name) != Some(value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            *entries = fresh;
            (changed, removed)
        };
        for (name, value) in changed {
            self.listener.node_changed(name, value).await;
        }
        for name in removed {
            self.listener.node_removed(name).await;
        }
    }
}
