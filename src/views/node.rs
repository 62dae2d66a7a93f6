//! Mirror of a single data node
//!
//! Keeps the latest decoded payload of one node, re-armed across data
//! changes, deletions (the value reads as `None` until the node returns)
//! and session churn.

use std::sync::{Arc, RwLock as StdRwLock};

use log::{error, warn};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::client::StoreClient;
use crate::errors::{ConnectError, StoreError, WatchError};
use crate::store::{Ensemble, SessionEvent, StoreSession, WatchFired};
use crate::watch::WatchGuard;

use super::Decode;

enum Armed {
    Present(Vec<u8>, WatchFired),
    Absent(WatchFired),
}

/// Read-only supplier mirroring one node's payload
pub struct NodeView<T: Clone + Send + Sync + 'static> {
    current: Arc<StdRwLock<Option<T>>>,
    _guard: WatchGuard,
}

impl<T: Clone + Send + Sync + 'static> NodeView<T> {
    /// Subscribe to `path`. Returns after the initial read; the mirrored
    /// value then tracks the node in the background until the view is
    /// dropped.
    pub async fn new<E: Ensemble>(
        client: StoreClient<E>,
        path: impl Into<String>,
        decode: Decode<T>,
    ) -> Result<NodeView<T>, WatchError> {
        let path = path.into();
        let current: Arc<StdRwLock<Option<T>>> = Arc::new(StdRwLock::new(None));

        // One persistent session watcher re-arms us on reconnect instead of
        // accumulating per-request watchers.
        let reconnected = Arc::new(Notify::new());
        let nudge = Arc::clone(&reconnected);
        let watcher_id = client.register_session_watcher(move |event| {
            if event == SessionEvent::Connected {
                nudge.notify_one();
            }
        });

        let mut backoff = client.settings().backoff.start();
        let armed = match arm(&client, &path, &mut backoff).await {
            Ok(armed) => armed,
            Err(error) => {
                client.unregister_session_watcher(watcher_id);
                return Err(error);
            }
        };
        let mut fired = apply(&current, &decode, armed);

        let token = CancellationToken::new();
        let task_token = token.clone();
        let task_current = Arc::clone(&current);
        let task_client = client.clone();
        let task_path = path.clone();
        tokio::spawn(async move {
            let mut backoff = task_client.settings().backoff.start();
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = fired => {}
                    _ = reconnected.notified() => {}
                }
                match arm(&task_client, &task_path, &mut backoff).await {
                    Ok(armed) => {
                        fired = apply(&task_current, &decode, armed);
                    }
                    Err(error) => {
                        error!("node view of {task_path} failed: {error}");
                        break;
                    }
                }
            }
        });

        let cleanup_client = client.clone();
        Ok(NodeView {
            current,
            _guard: WatchGuard::with_cleanup(token, move || {
                cleanup_client.unregister_session_watcher(watcher_id);
            }),
        })
    }

    /// Latest decoded value; `None` while the node is absent or
    /// undecodable.
    pub fn get(&self) -> Option<T> {
        self.current
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

/// Store the decoded value (or `None` for an absent node) and hand back the
/// armed watch.
fn apply<T: Clone + Send + Sync + 'static>(
    current: &StdRwLock<Option<T>>,
    decode: &Decode<T>,
    armed: Armed,
) -> WatchFired {
    let mut slot = current.write().unwrap_or_else(|poison| poison.into_inner());
    match armed {
        Armed::Present(bytes, fired) => {
            *slot = (**decode)(&bytes);
            fired
        }
        Armed::Absent(fired) => {
            *slot = None;
            fired
        }
    }
}

/// Read the node and arm the next watch: a data watch while it exists, an
/// exists watch while it does not.
async fn arm<E: Ensemble>(
    client: &StoreClient<E>,
    path: &str,
    backoff: &mut Backoff,
) -> Result<Armed, WatchError> {
    loop {
        let session = match client.get().await {
            Ok(session) => session,
            Err(ConnectError::Connection { ref source, .. }) if source.is_retryable() => {
                backoff.wait().await;
                continue;
            }
            Err(error) => return Err(error.into()),
        };
        match session.get_data_watch(path).await {
            Ok((bytes, fired)) => return Ok(Armed::Present(bytes, fired)),
            Err(StoreError::NoNode(_)) => match session.exists_watch(path).await {
                Ok((None, fired)) => return Ok(Armed::Absent(fired)),
                // Created between the two calls; read again.
                Ok((Some(_), _)) => continue,
                Err(source) if client.should_retry(&source).await => {
                    backoff.wait().await;
                }
                Err(source) => {
                    return Err(WatchError::Store {
                        path: path.to_string(),
                        source,
                    })
                }
            },
            Err(source) if client.should_retry(&source).await => {
                warn!("retrying read of {path}: {source}");
                backoff.wait().await;
            }
            Err(source) => {
                return Err(WatchError::Store {
                    path: path.to_string(),
                    source,
                })
            }
        }
    }
}
