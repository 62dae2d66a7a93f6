//! Session-reusing wrapper over an [Ensemble]
//!
//! Hands out a healthy session on demand, re-attaches to the saved session
//! across transient disconnects, and fans session events out to registered
//! observers. On expiration it closes itself first (so the next `get` starts
//! a fresh session) and then runs every registered expiration handler, which
//! is where downstream components re-create ephemerals and re-arm watches.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::{broadcast, Mutex};

use crate::errors::{ConnectError, StoreError};
use crate::settings::ClientSettings;
use crate::store::{Ensemble, SessionEvent, SessionKey, StoreSession};

/// Runs after the client observed a session expiration; the registrant
/// re-establishes whatever the dead session owned.
pub type ExpirationHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Persistent observer of session events; survives reconnects. Must not
/// block: it runs on the client's event pump.
pub type SessionWatcher = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Token to unregister an [ExpirationHandler]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Token to unregister a [SessionWatcher]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatcherId(u64);

struct ClientInner<E: Ensemble> {
    ensemble: E,
    settings: ClientSettings,
    /// Guards connection creation only; never held across component calls.
    conn: Mutex<Option<E::Session>>,
    saved_key: StdMutex<Option<SessionKey>>,
    expiration_handlers: DashMap<u64, ExpirationHandler>,
    session_watchers: DashMap<u64, SessionWatcher>,
    next_id: AtomicU64,
}

/// Lazy-connecting, session-reusing store client. Cheap to clone; all
/// clones share the connection and the observer registries.
pub struct StoreClient<E: Ensemble> {
    inner: Arc<ClientInner<E>>,
}

impl<E: Ensemble> Clone for StoreClient<E> {
    fn clone(&self) -> Self {
        StoreClient {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Ensemble> StoreClient<E> {
    pub fn new(ensemble: E, settings: ClientSettings) -> StoreClient<E> {
        StoreClient {
            inner: Arc::new(ClientInner {
                ensemble,
                settings,
                conn: Mutex::new(None),
                saved_key: StdMutex::new(None),
                expiration_handlers: DashMap::new(),
                session_watchers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// True iff credentials with a non-empty scheme and token are configured.
    pub fn has_credentials(&self) -> bool {
        self.inner
            .settings
            .credentials
            .as_ref()
            .map(|credentials| !credentials.is_empty())
            .unwrap_or(false)
    }

    /// Identity of the session the client would try to re-attach to.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.inner
            .saved_key
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Return the current session, establishing one if needed. Blocks until
    /// the session is connected.
    pub async fn get(&self) -> Result<E::Session, ConnectError> {
        let mut guard = self.inner.conn.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_alive() {
                return Ok(session.clone());
            }
        }

        let saved = self.session_key();
        let session = self
            .inner
            .ensemble
            .connect(&self.inner.settings, saved)
            .await?;
        debug!(
            "connected to {} with session {}",
            self.inner.ensemble.servers(),
            session.key().id
        );
        *self
            .inner
            .saved_key
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(session.key());
        *guard = Some(session.clone());
        self.spawn_pump(&session);
        Ok(session)
    }

    /// [get](StoreClient::get) with a bound on the wait.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<E::Session, ConnectError> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout),
        }
    }

    /// Drop the connection and forget the saved session identity, so the
    /// next [get](StoreClient::get) starts fresh. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.inner.conn.lock().await;
        if let Some(session) = guard.take() {
            session.close().await;
        }
        self.inner
            .saved_key
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
    }

    /// Retry classification. A session expiration closes the client as a
    /// side effect, so the retry picks up a fresh session.
    pub async fn should_retry(&self, error: &StoreError) -> bool {
        if matches!(error, StoreError::SessionExpired) {
            self.close().await;
            return true;
        }
        error.is_retryable()
    }

    pub fn register_expiration_handler<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let handler: ExpirationHandler =
            Arc::new(move || Box::pin(handler()) as BoxFuture<'static, ()>);
        self.inner.expiration_handlers.insert(id, handler);
        HandlerId(id)
    }

    pub fn unregister_expiration_handler(&self, id: HandlerId) {
        self.inner.expiration_handlers.remove(&id.0);
    }

    pub fn expiration_handler_count(&self) -> usize {
        self.inner.expiration_handlers.len()
    }

    pub fn register_session_watcher<F>(&self, watcher: F) -> WatcherId
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.session_watchers.insert(id, Arc::new(watcher));
        WatcherId(id)
    }

    pub fn unregister_session_watcher(&self, id: WatcherId) {
        self.inner.session_watchers.remove(&id.0);
    }

    /// One pump per live session: forwards events to the registered
    /// watchers and drives the expiration protocol. The pump holds only a
    /// weak reference so an abandoned client shuts down cleanly.
    fn spawn_pump(&self, session: &E::Session) {
        let mut events = session.events();
        let weak: Weak<ClientInner<E>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("session event pump lagged by {missed} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                for entry in inner.session_watchers.iter() {
                    (*entry.value().as_ref())(event);
                }
                match event {
                    SessionEvent::Expired => {
                        let client = StoreClient {
                            inner: Arc::clone(&inner),
                        };
                        client.close().await;
                        let handlers: Vec<ExpirationHandler> = inner
                            .expiration_handlers
                            .iter()
                            .map(|entry| entry.value().clone())
                            .collect();
                        drop(inner);
                        debug!("running {} expiration handlers", handlers.len());
                        for handler in handlers {
                            (*handler)().await;
                        }
                        break;
                    }
                    SessionEvent::Closed => break,
                    _ => {}
                }
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn client(store: &MemoryStore) -> StoreClient<MemoryStore> {
        StoreClient::new(store.clone(), ClientSettings::default())
    }

    #[tokio::test]
    async fn credentials_require_scheme_and_token() {
        let store = MemoryStore::new();
        assert!(!client(&store).has_credentials());

        let mut settings = ClientSettings::default();
        settings.credentials = Some(crate::settings::Credentials::digest("svc", "pw"));
        assert!(StoreClient::new(store.clone(), settings).has_credentials());

        let mut settings = ClientSettings::default();
        settings.credentials = Some(crate::settings::Credentials {
            scheme: String::new(),
            token: Vec::new(),
        });
        assert!(!StoreClient::new(store, settings).has_credentials());
    }

    #[tokio::test]
    async fn get_reuses_live_session() -> TestResult {
        let store = MemoryStore::new();
        let client = client(&store);

        let first = client.get().await?;
        let second = client.get().await?;
        assert_eq!(first.key().id, second.key().id);
        assert_eq!(store.live_session_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reopen_changes_session() -> TestResult {
        let store = MemoryStore::new();
        let client = client(&store);

        let first = client.get().await?;
        client.close().await;
        client.close().await;
        assert!(client.session_key().is_none());

        let second = client.get().await?;
        assert_ne!(first.key().id, second.key().id);
        Ok(())
    }

    #[tokio::test]
    async fn expiration_runs_registered_handlers() -> TestResult {
        let store = MemoryStore::new();
        let client = client(&store);
        let session = client.get().await?;

        let runs = Arc::new(AtomicUsize::new(0));
        let seen = runs.clone();
        let id = client.register_expiration_handler(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(client.expiration_handler_count(), 1);

        store.expire_session(session.key().id);
        tokio::time::timeout(Duration::from_secs(1), async {
            while runs.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        // The expired session identity was discarded.
        assert!(client.session_key().is_none());

        client.unregister_expiration_handler(id);
        assert_eq!(client.expiration_handler_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn session_watchers_observe_events() -> TestResult {
        let store = MemoryStore::new();
        let client = client(&store);
        let session = client.get().await?;

        let expired = Arc::new(AtomicUsize::new(0));
        let seen = expired.clone();
        let id = client.register_session_watcher(move |event| {
            if event == SessionEvent::Expired {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.expire_session(session.key().id);
        tokio::time::timeout(Duration::from_secs(1), async {
            while expired.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        client.unregister_session_watcher(id);
        Ok(())
    }

    #[tokio::test]
    async fn retry_classification_closes_on_expired() -> TestResult {
        let store = MemoryStore::new();
        let client = client(&store);
        let first = client.get().await?;

        assert!(client.should_retry(&StoreError::ConnectionLoss).await);
        assert!(client.should_retry(&StoreError::OperationTimeout).await);
        assert!(!client.should_retry(&StoreError::AuthFailed).await);
        assert!(
            !client
                .should_retry(&StoreError::NoNode("/a".to_string()))
                .await
        );

        assert!(client.should_retry(&StoreError::SessionExpired).await);
        let second = client.get().await?;
        assert_ne!(first.key().id, second.key().id);
        Ok(())
    }

    /// Ensemble that hangs forever; used to exercise the connect timeout.
    #[derive(Clone)]
    struct StalledEnsemble;

    #[async_trait]
    impl Ensemble for StalledEnsemble {
        type Session = crate::store::memory::MemorySession;

        async fn connect(
            &self,
            _settings: &ClientSettings,
            _saved: Option<SessionKey>,
        ) -> Result<Self::Session, ConnectError> {
            futures::future::pending().await
        }

        fn servers(&self) -> String {
            "stalled:0".to_string()
        }
    }

    #[tokio::test]
    async fn get_timeout_surfaces_timeout() {
        let client = StoreClient::new(StalledEnsemble, ClientSettings::default());
        let err = client
            .get_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Timeout));
    }

    /// Ensemble that gets interrupted mid-handshake. Per the [Ensemble]
    /// contract it must close the nascent session before surfacing the
    /// interruption.
    #[derive(Clone)]
    struct InterruptedEnsemble {
        store: MemoryStore,
    }

    #[async_trait]
    impl Ensemble for InterruptedEnsemble {
        type Session = crate::store::memory::MemorySession;

        async fn connect(
            &self,
            settings: &ClientSettings,
            saved: Option<SessionKey>,
        ) -> Result<Self::Session, ConnectError> {
            let nascent = self.store.connect(settings, saved).await?;
            nascent.close().await;
            Err(ConnectError::Interrupted)
        }

        fn servers(&self) -> String {
            self.store.servers()
        }
    }

    #[tokio::test]
    async fn interrupted_connect_leaves_no_live_session() {
        let store = MemoryStore::new();
        let client = StoreClient::new(
            InterruptedEnsemble {
                store: store.clone(),
            },
            ClientSettings::default(),
        );
        let err = client.get().await.unwrap_err();
        assert!(matches!(err, ConnectError::Interrupted));
        assert_eq!(store.live_session_count(), 0);
    }
}
