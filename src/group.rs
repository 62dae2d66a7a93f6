//! Group membership on a persistent path with ephemeral sequential children
//!
//! A group is `(path, prefix)`: every direct child of `path` whose name is
//! the prefix followed by digits is a live member. Joining creates an
//! ephemeral sequential child; the library re-creates it after session
//! expirations (and after out-of-band deletions) until the membership is
//! cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::client::{HandlerId, StoreClient};
use crate::errors::{CancelError, ConnectError, JoinError, StoreError, UpdateError, WatchError};
use crate::store::{
    join_path, CreateMode, Ensemble, EventKind, StoreSession, WatchFired, ANY_VERSION,
};
use crate::watch::WatchGuard;

pub type MemberId = String;

/// Produces the payload for this member's node; re-read on every re-join and
/// on [Membership::update_data].
pub type DataSupplier = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Invoked when the membership is lost, before each re-join attempt.
pub type LossHandler = Arc<dyn Fn() + Send + Sync>;

pub const DEFAULT_MEMBER_PREFIX: &str = "member_";

/// Receives every change to the group's member set. The initial snapshot is
/// delivered synchronously from [Group::watch]; later snapshots arrive on a
/// library task, serialized, and only when the set actually changed.
#[async_trait]
pub trait GroupChangeListener: Send + Sync + 'static {
    async fn on_change(&self, members: Vec<MemberId>);
}

/// Forwards snapshots into a channel; the building block for components
/// that consume group changes on their own task.
pub(crate) struct ChannelListener(pub mpsc::UnboundedSender<Vec<MemberId>>);

#[async_trait]
impl GroupChangeListener for ChannelListener {
    async fn on_change(&self, members: Vec<MemberId>) {
        let _ = self.0.send(members);
    }
}

#[derive(Clone, Debug)]
pub struct GroupConfig {
    /// Member node name prefix; children not matching `prefix` + digits are
    /// ignored.
    pub prefix: String,
    pub backoff: BackoffPolicy,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            prefix: DEFAULT_MEMBER_PREFIX.to_string(),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Options for [Group::join_with]
#[derive(Clone, Default)]
pub struct JoinOptions {
    pub data_supplier: Option<DataSupplier>,
    pub on_lose_membership: Option<LossHandler>,
}

impl JoinOptions {
    pub fn data_supplier(mut self, supplier: DataSupplier) -> Self {
        self.data_supplier = Some(supplier);
        self
    }

    pub fn on_lose_membership(mut self, handler: LossHandler) -> Self {
        self.on_lose_membership = Some(handler);
        self
    }
}

/// A group of ephemeral sequential members under one persistent path
pub struct Group<E: Ensemble> {
    client: StoreClient<E>,
    path: String,
    config: GroupConfig,
}

impl<E: Ensemble> Clone for Group<E> {
    fn clone(&self) -> Self {
        Group {
            client: self.client.clone(),
            path: self.path.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: Ensemble> Group<E> {
    pub fn new(client: StoreClient<E>, path: impl Into<String>) -> Group<E> {
        Group::with_config(client, path, GroupConfig::default())
    }

    pub fn with_config(
        client: StoreClient<E>,
        path: impl Into<String>,
        config: GroupConfig,
    ) -> Group<E> {
        Group {
            client,
            path: path.into(),
            config,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn client(&self) -> &StoreClient<E> {
        &self.client
    }

    /// Full path of a member node.
    pub fn member_path(&self, member_id: &str) -> String {
        join_path(&self.path, member_id)
    }

    fn is_member_name(&self, name: &str) -> bool {
        name.strip_prefix(&self.config.prefix)
            .map(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    }

    fn filter_members(&self, children: Vec<String>) -> Vec<MemberId> {
        let mut members: Vec<MemberId> = children
            .into_iter()
            .filter(|name| self.is_member_name(name))
            .collect();
        members.sort();
        members
    }

    /// Snapshot of the current member ids, sorted ascending. A missing
    /// group path reads as an empty group.
    pub async fn member_ids(&self) -> Result<Vec<MemberId>, WatchError> {
        let session = self.client.get().await?;
        match session.get_children(&self.path).await {
            Ok(children) => Ok(self.filter_members(children)),
            Err(StoreError::NoNode(_)) => Ok(Vec::new()),
            Err(source) => Err(WatchError::Store {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Payload of a member node, or `None` when the member is gone.
    pub async fn member_data(&self, member_id: &str) -> Result<Option<Vec<u8>>, WatchError> {
        let session = self.client.get().await?;
        let path = self.member_path(member_id);
        match session.get_data(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(StoreError::NoNode(_)) => Ok(None),
            Err(source) => Err(WatchError::Store { path, source }),
        }
    }

    /// Create the persistent group path, parents included. Idempotent;
    /// connection-loss class failures are retried under backoff.
    pub(crate) async fn ensure_path(&self) -> Result<(), WatchError> {
        let mut backoff = self.config.backoff.start();
        let components: Vec<&str> = self.path.split('/').filter(|p| !p.is_empty()).collect();
        let acl = self.client.settings().acl.clone();

        let mut index = 0;
        while index < components.len() {
            let mut current = String::new();
            for component in &components[..=index] {
                current = join_path(if current.is_empty() { "/" } else { &current }, component);
            }
            let session = self.client.get().await?;
            match session
                .create(&current, b"", &acl, CreateMode::Persistent)
                .await
            {
                Ok(_) | Err(StoreError::NodeExists(_)) => {
                    index += 1;
                }
                Err(source) if self.client.should_retry(&source).await => {
                    warn!("retrying create of {current}: {source}");
                    backoff.wait().await;
                }
                Err(source) => {
                    return Err(WatchError::Store {
                        path: current,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Join with an empty payload and no loss handler.
    pub async fn join(&self) -> Result<Membership<E>, JoinError> {
        self.join_with(JoinOptions::default()).await
    }

    /// Join the group: ensure the path, create the ephemeral sequential
    /// member node, then keep the membership alive across expirations and
    /// out-of-band deletions until cancelled.
    pub async fn join_with(&self, options: JoinOptions) -> Result<Membership<E>, JoinError> {
        self.ensure_path().await.map_err(join_error)?;

        let supplier: DataSupplier = options
            .data_supplier
            .unwrap_or_else(|| Arc::new(|| Vec::new()));

        let inner = Arc::new(MembershipInner {
            client: self.client.clone(),
            group_path: self.path.clone(),
            prefix: self.config.prefix.clone(),
            backoff: self.config.backoff.clone(),
            supplier,
            on_loss: options.on_lose_membership,
            member_id: StdMutex::new(String::new()),
            cancelled: AtomicBool::new(false),
            token: CancellationToken::new(),
            rejoin_lock: Mutex::new(()),
            handler: StdMutex::new(None),
        });

        let member_id = inner.create_node().await?;
        *inner.lock_member_id() = member_id;

        let membership = Membership { inner };

        let handler_target = membership.clone();
        let handler_id = membership
            .inner
            .client
            .register_expiration_handler(move || {
                let target = handler_target.clone();
                async move {
                    target.inner.rejoin("session expired").await;
                }
            });
        *membership
            .inner
            .handler
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(handler_id);

        membership.spawn_self_watch();
        info!(
            "joined {} as {}",
            membership.inner.group_path,
            membership.id()
        );
        Ok(membership)
    }

    /// Watch the group. Blocks until the initial member list is retrieved
    /// and delivered; later snapshots are dispatched asynchronously and only
    /// on change.
    pub async fn watch<L: GroupChangeListener>(&self, listener: L) -> Result<WatchGuard, WatchError> {
        let listener = Arc::new(listener);
        let (initial, fired) = self.fetch_and_arm().await?;
        listener.on_change(initial.clone()).await;

        let token = CancellationToken::new();
        let guard = WatchGuard::new(token.clone());
        let group = self.clone();
        tokio::spawn(async move {
            group.watch_loop(token, listener, initial, fired).await;
        });
        Ok(guard)
    }

    /// Stream view of [watch](Group::watch).
    pub async fn stream(
        &self,
    ) -> Result<(WatchStream<Vec<MemberId>>, WatchGuard), WatchError> {
        let (tx, rx) = tokio::sync::watch::channel(Vec::new());
        struct StreamListener(tokio::sync::watch::Sender<Vec<MemberId>>);

        #[async_trait]
        impl GroupChangeListener for StreamListener {
            async fn on_change(&self, members: Vec<MemberId>) {
                let _ = self.0.send(members);
            }
        }

        let guard = self.watch(StreamListener(tx)).await?;
        Ok((WatchStream::new(rx), guard))
    }

    /// One attempt at reading the child list and arming the next watch.
    /// Creates the group path when missing.
    async fn fetch_and_arm(&self) -> Result<(Vec<MemberId>, WatchFired), WatchError> {
        let mut backoff = self.config.backoff.start();
        loop {
            let session = match self.client.get().await {
                Ok(session) => session,
                Err(ConnectError::Connection { ref source, .. }) if source.is_retryable() => {
                    backoff.wait().await;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            match session.get_children_watch(&self.path).await {
                Ok((children, fired)) => return Ok((self.filter_members(children), fired)),
                Err(StoreError::NoNode(_)) => {
                    self.ensure_path().await?;
                }
                Err(source) if self.client.should_retry(&source).await => {
                    warn!("retrying child listing of {}: {source}", self.path);
                    backoff.wait().await;
                }
                Err(source) => {
                    return Err(WatchError::Store {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }
    }

    async fn watch_loop(
        &self,
        token: CancellationToken,
        listener: Arc<dyn GroupChangeListener>,
        mut last: Vec<MemberId>,
        mut fired: WatchFired,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                // A fired watch means "something changed"; an error means
                // the session died under us. Both are answered by a fresh
                // fetch, which also re-arms.
                _ = fired => {}
            }
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = self.fetch_and_arm() => next,
            };
            match next {
                Ok((members, next_fired)) => {
                    fired = next_fired;
                    if members != last {
                        last = members.clone();
                        listener.on_change(members).await;
                    }
                }
                Err(error) => {
                    error!("watch of {} failed: {error}", self.path);
                    break;
                }
            }
        }
        debug!("watch of {} stopped", self.path);
    }
}

fn join_error(error: WatchError) -> JoinError {
    match error {
        WatchError::Connect(connect) => JoinError::Connect(connect),
        WatchError::Store { path, source } => JoinError::Store { path, source },
    }
}

struct MembershipInner<E: Ensemble> {
    client: StoreClient<E>,
    group_path: String,
    prefix: String,
    backoff: BackoffPolicy,
    supplier: DataSupplier,
    on_loss: Option<LossHandler>,
    member_id: StdMutex<MemberId>,
    cancelled: AtomicBool,
    token: CancellationToken,
    /// Serializes re-joins against each other and against cancellation.
    rejoin_lock: Mutex<()>,
    handler: StdMutex<Option<HandlerId>>,
}

impl<E: Ensemble> MembershipInner<E> {
    fn lock_member_id(&self) -> std::sync::MutexGuard<'_, MemberId> {
        self.member_id
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn member_path(&self) -> String {
        join_path(&self.group_path, &self.lock_member_id())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Create the ephemeral sequential node, retrying the retryable class.
    async fn create_node(&self) -> Result<MemberId, JoinError> {
        let mut backoff = self.backoff.start();
        let node_path = join_path(&self.group_path, &self.prefix);
        let acl = self.client.settings().acl.clone();
        loop {
            let session = match self.client.get().await {
                Ok(session) => session,
                Err(ConnectError::Connection { ref source, .. }) if source.is_retryable() => {
                    backoff.wait().await;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };
            let data = (*self.supplier)();
            match session
                .create(&node_path, &data, &acl, CreateMode::EphemeralSequential)
                .await
            {
                Ok(member_id) => return Ok(member_id),
                Err(source) if self.client.should_retry(&source).await => {
                    warn!("retrying join of {}: {source}", self.group_path);
                    backoff.wait().await;
                }
                Err(source) => {
                    return Err(JoinError::Store {
                        path: self.group_path.clone(),
                        source,
                    });
                }
            }
        }
    }

    /// Re-establish the member node unless it is still present or the
    /// membership was cancelled. Notifies the loss handler before
    /// attempting to re-join.
    async fn rejoin(&self, reason: &str) {
        if self.is_cancelled() {
            return;
        }
        let _serialized = self.rejoin_lock.lock().await;
        if self.is_cancelled() {
            return;
        }

        let path = self.member_path();
        let mut backoff = self.backoff.start();
        loop {
            if self.is_cancelled() {
                return;
            }
            let session = match self.client.get().await {
                Ok(session) => session,
                Err(error) => {
                    warn!("cannot reach store to re-join {path}: {error}");
                    backoff.wait().await;
                    continue;
                }
            };
            match session.exists(&path).await {
                Ok(Some(_)) => return,
                Ok(None) => break,
                Err(source) if self.client.should_retry(&source).await => {
                    backoff.wait().await;
                }
                Err(source) => {
                    error!("giving up re-join of {path}: {source}");
                    self.cancelled.store(true, Ordering::SeqCst);
                    return;
                }
            }
        }

        info!("membership {path} lost ({reason}), re-joining");
        if let Some(on_loss) = self.on_loss.as_ref() {
            on_loss();
        }
        match self.create_node().await {
            Ok(member_id) => {
                info!("re-joined {} as {member_id}", self.group_path);
                *self.lock_member_id() = member_id;
            }
            Err(error) => {
                // Fatal class during re-join: abandon the membership.
                error!("abandoning membership in {}: {error}", self.group_path);
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// Handle to a joined member. Clones share the same membership.
pub struct Membership<E: Ensemble> {
    inner: Arc<MembershipInner<E>>,
}

impl<E: Ensemble> Clone for Membership<E> {
    fn clone(&self) -> Self {
        Membership {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Ensemble> Membership<E> {
    /// Current member id; changes when a re-join produced a new node.
    pub fn id(&self) -> MemberId {
        self.inner.lock_member_id().clone()
    }

    /// Full path of the current member node.
    pub fn path(&self) -> String {
        self.inner.member_path()
    }

    pub fn group_path(&self) -> &str {
        &self.inner.group_path
    }

    /// Current payload as produced by the data supplier.
    pub fn data(&self) -> Vec<u8> {
        (*self.inner.supplier)()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Re-read the supplier and write the payload only when it differs from
    /// what the store holds.
    pub async fn update_data(&self) -> Result<(), UpdateError> {
        let path = self.inner.member_path();
        let data = (*self.inner.supplier)();
        let session = self.inner.client.get().await?;
        let current = session
            .get_data(&path)
            .await
            .map_err(|source| UpdateError::Store {
                path: path.clone(),
                source,
            })?;
        if current == data {
            return Ok(());
        }
        session
            .set_data(&path, &data, ANY_VERSION)
            .await
            .map_err(|source| UpdateError::Store { path, source })?;
        Ok(())
    }

    /// Leave the group. Idempotent; once it returns the member node is gone
    /// and no re-join will ever fire.
    pub async fn cancel(&self) -> Result<(), CancelError> {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Waits out any in-flight re-join so we delete the current node.
        let _serialized = self.inner.rejoin_lock.lock().await;
        self.inner.token.cancel();
        let handler = self
            .inner
            .handler
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(handler) = handler {
            self.inner.client.unregister_expiration_handler(handler);
        }

        let path = self.inner.member_path();
        let mut backoff = self.inner.backoff.start();
        loop {
            let session = self.inner.client.get().await?;
            match session.delete(&path, ANY_VERSION).await {
                Ok(()) | Err(StoreError::NoNode(_)) => {
                    info!("left {}", self.inner.group_path);
                    return Ok(());
                }
                Err(source) if self.inner.client.should_retry(&source).await => {
                    warn!("retrying cancel of {path}: {source}");
                    backoff.wait().await;
                }
                Err(source) => return Err(CancelError::Store { path, source }),
            }
        }
    }

    /// Watch our own node; covers out-of-band deletion and doubles as the
    /// safety net when an expiration event was missed.
    fn spawn_self_watch(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut backoff = inner.backoff.start();
            loop {
                if inner.is_cancelled() {
                    break;
                }
                let path = inner.member_path();
                let session = tokio::select! {
                    _ = inner.token.cancelled() => break,
                    session = inner.client.get() => match session {
                        Ok(session) => session,
                        Err(error) => {
                            warn!("self-watch of {path} cannot connect: {error}");
                            backoff.wait().await;
                            continue;
                        }
                    }
                };
                match session.exists_watch(&path).await {
                    Ok((Some(_), fired)) => {
                        backoff.reset();
                        let event = tokio::select! {
                            _ = inner.token.cancelled() => break,
                            event = fired => event,
                        };
                        match event {
                            Ok(event) if event.kind == EventKind::NodeDeleted => {
                                inner.rejoin("node deleted").await;
                            }
                            // Created/changed: nothing to do, loop re-arms.
                            Ok(_) => {}
                            // Session died before the watch fired.
                            Err(_) => {}
                        }
                    }
                    Ok((None, _fired)) => {
                        inner.rejoin("node missing").await;
                    }
                    Err(source) if inner.client.should_retry(&source).await => {
                        backoff.wait().await;
                    }
                    Err(source) => {
                        error!("self-watch of {path} failed: {source}");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::settings::ClientSettings;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn fixture() -> (MemoryStore, Group<MemoryStore>) {
        let store = MemoryStore::new();
        let client = StoreClient::new(store.clone(), ClientSettings::default());
        let group = Group::new(client, "/test/group");
        (store, group)
    }

    async fn wait_until(mut predicate: impl FnMut() -> bool) -> TestResult {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !predicate() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        Ok(())
    }

    #[tokio::test]
    async fn join_creates_prefixed_sequential_member() -> TestResult {
        let (_store, group) = fixture();
        let membership = group.join().await?;

        assert!(membership.id().starts_with(DEFAULT_MEMBER_PREFIX));
        assert_eq!(group.member_ids().await?, vec![membership.id()]);
        Ok(())
    }

    #[tokio::test]
    async fn non_member_children_are_ignored() -> TestResult {
        let (store, group) = fixture();
        let _membership = group.join().await?;

        let session = store.connect(&ClientSettings::default(), None).await?;
        session
            .create(
                "/test/group/lock-0001",
                b"",
                &[crate::store::AclEntry::open()],
                CreateMode::Persistent,
            )
            .await?;
        session
            .create(
                "/test/group/member_x",
                b"",
                &[crate::store::AclEntry::open()],
                CreateMode::Persistent,
            )
            .await?;

        let members = group.member_ids().await?;
        assert_eq!(members.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn member_ids_of_missing_path_is_empty() -> TestResult {
        let (_store, group) = fixture();
        assert!(group.member_ids().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn cancel_removes_node_and_is_idempotent() -> TestResult {
        let (_store, group) = fixture();
        let membership = group.join().await?;

        membership.cancel().await?;
        membership.cancel().await?;
        assert!(membership.is_cancelled());
        assert!(group.member_ids().await?.is_empty());

        // No re-join after cancellation.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(group.member_ids().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn update_data_skips_identical_payload() -> TestResult {
        let (store, group) = fixture();
        let payload = Arc::new(StdMutex::new(b"v1".to_vec()));
        let source = payload.clone();
        let options = JoinOptions::default()
            .data_supplier(Arc::new(move || source.lock().unwrap().clone()));
        let membership = group.join_with(options).await?;

        let session = store.connect(&ClientSettings::default(), None).await?;
        let stat = session.exists(&membership.path()).await?.unwrap();
        assert_eq!(stat.version, 0);

        // Same bytes: no write happens.
        membership.update_data().await?;
        let stat = session.exists(&membership.path()).await?.unwrap();
        assert_eq!(stat.version, 0);

        *payload.lock().unwrap() = b"v2".to_vec();
        membership.update_data().await?;
        let stat = session.exists(&membership.path()).await?.unwrap();
        assert_eq!(stat.version, 1);
        assert_eq!(session.get_data(&membership.path()).await?, b"v2".to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn out_of_band_deletion_triggers_rejoin() -> TestResult {
        let (store, group) = fixture();
        let membership = group.join().await?;
        let first_id = membership.id();

        let session = store.connect(&ClientSettings::default(), None).await?;
        session.delete(&membership.path(), ANY_VERSION).await?;

        wait_until(|| membership.id() != first_id).await?;
        let members = group.member_ids().await?;
        assert_eq!(members, vec![membership.id()]);
        Ok(())
    }

    #[tokio::test]
    async fn watch_delivers_initial_and_changes() -> TestResult {
        let (_store, group) = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = group.watch(ChannelListener(tx)).await?;

        // Initial snapshot is always delivered, even empty.
        let initial = rx.recv().await.unwrap();
        assert!(initial.is_empty());

        let membership = group.join().await?;
        let joined = rx.recv().await.unwrap();
        assert_eq!(joined, vec![membership.id()]);

        membership.cancel().await?;
        let left = rx.recv().await.unwrap();
        assert!(left.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_watch_stops_delivery() -> TestResult {
        let (_store, group) = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = group.watch(ChannelListener(tx)).await?;
        let _ = rx.recv().await.unwrap();

        guard.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _membership = group.join().await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn stream_yields_snapshots() -> TestResult {
        use tokio_stream::StreamExt;

        let (_store, group) = fixture();
        let (mut stream, _guard) = group.stream().await?;

        let initial = stream.next().await.unwrap();
        assert!(initial.is_empty());

        let membership = group.join().await?;
        let next = tokio::time::timeout(Duration::from_secs(2), stream.next()).await?;
        assert_eq!(next.unwrap(), vec![membership.id()]);
        Ok(())
    }
}
