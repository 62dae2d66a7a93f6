//! In-memory implementation of [Ensemble] and [StoreSession]
//!
//! Single-process stand-in for a real store cluster with full session,
//! ephemeral, sequential and one-shot watch semantics. It backs the test
//! suites and works as a local backend for single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::errors::{ConnectError, StoreError};
use crate::settings::ClientSettings;

use super::{
    join_path, leaf_name, parent_path, AclEntry, CreateMode, Ensemble, EventKind, NodeStat,
    SessionEvent, SessionKey, StoreResult, StoreSession, WatchFired, WatchedEvent, ANY_VERSION,
};

const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
struct NodeRecord {
    data: Vec<u8>,
    acl: Vec<AclEntry>,
    version: i32,
    czxid: i64,
    mzxid: i64,
    ephemeral_owner: u64,
    next_sequence: u64,
}

/// Watch senders are tagged with their owner session so they can be dropped
/// (waking the receiver with an error) when that session ends.
#[derive(Default)]
struct NodeWatches {
    data: Vec<(u64, oneshot::Sender<WatchedEvent>)>,
    exists: Vec<(u64, oneshot::Sender<WatchedEvent>)>,
    children: Vec<(u64, oneshot::Sender<WatchedEvent>)>,
}

struct SessionRecord {
    password: Vec<u8>,
    alive: bool,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, NodeRecord>,
    watches: HashMap<String, NodeWatches>,
    sessions: HashMap<u64, SessionRecord>,
}

struct Inner {
    state: Mutex<State>,
    next_session_id: AtomicU64,
    next_zxid: AtomicI64,
}

/// Shared in-memory store. Clones all point at the same tree.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        let mut state = State::default();
        state.nodes.insert(
            "/".to_string(),
            NodeRecord {
                data: Vec::new(),
                acl: vec![AclEntry::open()],
                version: 0,
                czxid: 0,
                mzxid: 0,
                ephemeral_owner: 0,
                next_sequence: 0,
            },
        );
        MemoryStore {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                next_session_id: AtomicU64::new(1),
                next_zxid: AtomicI64::new(1),
            }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn next_zxid(&self) -> i64 {
        self.inner.next_zxid.fetch_add(1, Ordering::SeqCst)
    }

    /// Force-expire a session, deleting its ephemeral nodes and notifying
    /// its subscribers. Test and operational hook.
    pub fn expire_session(&self, session_id: u64) {
        self.end_session(session_id, SessionEvent::Expired);
    }

    /// Number of sessions currently alive.
    pub fn live_session_count(&self) -> usize {
        self.lock().sessions.values().filter(|s| s.alive).count()
    }

    fn end_session(&self, session_id: u64, event: SessionEvent) {
        let mut state = self.lock();
        let events = match state.sessions.get_mut(&session_id) {
            Some(record) if record.alive => {
                record.alive = false;
                record.events.clone()
            }
            _ => return,
        };

        let ephemerals: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == session_id)
            .map(|(path, _)| path.clone())
            .collect();
        for path in ephemerals {
            state.nodes.remove(&path);
            state.fire_node(&path, EventKind::NodeDeleted);
            if let Some(parent) = parent_path(&path) {
                let parent = parent.to_string();
                state.fire_children(&parent);
            }
        }

        // Wake every watch the dead session still has pending.
        for watches in state.watches.values_mut() {
            watches.data.retain(|(owner, _)| *owner != session_id);
            watches.exists.retain(|(owner, _)| *owner != session_id);
            watches.children.retain(|(owner, _)| *owner != session_id);
        }

        let _ = events.send(event);
    }

    fn ensure_chain(&self, path: &str) {
        let mut state = self.lock();
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = join_path(if current.is_empty() { "/" } else { &current }, part);
            if !state.nodes.contains_key(&current) {
                let zxid = self.next_zxid();
                state.nodes.insert(
                    current.clone(),
                    NodeRecord {
                        data: Vec::new(),
                        acl: vec![AclEntry::open()],
                        version: 0,
                        czxid: zxid,
                        mzxid: zxid,
                        ephemeral_owner: 0,
                        next_sequence: 0,
                    },
                );
            }
        }
    }
}

impl State {
    fn stat_of(&self, path: &str) -> Option<NodeStat> {
        let node = self.nodes.get(path)?;
        Some(NodeStat {
            version: node.version,
            czxid: node.czxid,
            mzxid: node.mzxid,
            ephemeral_owner: node.ephemeral_owner,
            num_children: self.child_names(path).len() as u32,
            data_length: node.data.len() as u32,
        })
    }

    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| {
                let leaf = &path[prefix.len()..];
                !leaf.is_empty() && !leaf.contains('/')
            })
            .map(|(path, _)| path[prefix.len()..].to_string())
            .collect()
    }

    /// Fire (and consume) data + exists watches on a node.
    fn fire_node(&mut self, path: &str, kind: EventKind) {
        if let Some(watches) = self.watches.get_mut(path) {
            let event = WatchedEvent {
                kind,
                path: path.to_string(),
            };
            for (_, tx) in watches.data.drain(..) {
                let _ = tx.send(event.clone());
            }
            for (_, tx) in watches.exists.drain(..) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Fire (and consume) child-list watches on a node.
    fn fire_children(&mut self, path: &str) {
        if let Some(watches) = self.watches.get_mut(path) {
            let event = WatchedEvent {
                kind: EventKind::NodeChildrenChanged,
                path: path.to_string(),
            };
            for (_, tx) in watches.children.drain(..) {
                let _ = tx.send(event.clone());
            }
        }
    }
}

#[async_trait]
impl Ensemble for MemoryStore {
    type Session = MemorySession;

    async fn connect(
        &self,
        settings: &ClientSettings,
        saved: Option<SessionKey>,
    ) -> Result<MemorySession, ConnectError> {
        if let Some(chroot) = settings.chroot.as_deref() {
            self.ensure_chain(chroot);
        }

        if let Some(key) = saved {
            let state = self.lock();
            if let Some(record) = state.sessions.get(&key.id) {
                if record.alive && record.password == key.password {
                    let session = MemorySession {
                        store: self.clone(),
                        id: key.id,
                        password: key.password,
                        events: record.events.clone(),
                        chroot: settings.chroot.clone(),
                    };
                    let _ = record.events.send(SessionEvent::Connected);
                    return Ok(session);
                }
            }
            // Saved session is gone on the server side; fall through and
            // start a fresh one.
        }

        let id = self.inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let password: [u8; 16] = rand::random();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        {
            let mut state = self.lock();
            state.sessions.insert(
                id,
                SessionRecord {
                    password: password.to_vec(),
                    alive: true,
                    events: events.clone(),
                },
            );
        }
        let session = MemorySession {
            store: self.clone(),
            id,
            password: password.to_vec(),
            events,
            chroot: settings.chroot.clone(),
        };
        if let Some(credentials) = settings.credentials.as_ref() {
            session
                .add_auth(&credentials.scheme, &credentials.token)
                .await
                .map_err(|source| ConnectError::Connection {
                    servers: self.servers(),
                    source,
                })?;
        }
        Ok(session)
    }

    fn servers(&self) -> String {
        "memory:local".to_string()
    }
}

/// A session against a [MemoryStore]
#[derive(Clone, Debug)]
pub struct MemorySession {
    store: MemoryStore,
    id: u64,
    password: Vec<u8>,
    events: broadcast::Sender<SessionEvent>,
    chroot: Option<String>,
}

impl MemorySession {
    pub fn session_id(&self) -> u64 {
        self.id
    }

    fn resolve(&self, path: &str) -> String {
        match self.chroot.as_deref() {
            Some(chroot) if path == "/" => chroot.to_string(),
            Some(chroot) => format!("{chroot}{path}"),
            None => path.to_string(),
        }
    }

    fn check_alive(&self, state: &State) -> StoreResult<()> {
        match state.sessions.get(&self.id) {
            Some(record) if record.alive => Ok(()),
            _ => Err(StoreError::SessionExpired),
        }
    }

    fn register_watch(&self, state: &mut State, path: &str, slot: WatchSlot) -> WatchFired {
        let (tx, rx) = oneshot::channel();
        let watches = state.watches.entry(path.to_string()).or_default();
        let vec = match slot {
            WatchSlot::Data => &mut watches.data,
            WatchSlot::Exists => &mut watches.exists,
            WatchSlot::Children => &mut watches.children,
        };
        vec.push((self.id, tx));
        rx
    }
}

enum WatchSlot {
    Data,
    Exists,
    Children,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[AclEntry],
        mode: CreateMode,
    ) -> StoreResult<String> {
        let full = self.resolve(path);
        let mut state = self.store.lock();
        self.check_alive(&state)?;

        let parent = parent_path(&full)
            .ok_or_else(|| StoreError::NodeExists(full.clone()))?
            .to_string();
        let parent_node = state
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| StoreError::NoNode(parent.clone()))?;
        if parent_node.ephemeral_owner != 0 {
            return Err(StoreError::NoChildrenForEphemerals(parent));
        }

        let leaf = if mode.is_sequential() {
            let sequence = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{}{:010}", leaf_name(&full), sequence)
        } else {
            leaf_name(&full).to_string()
        };
        let final_path = join_path(&parent, &leaf);
        if state.nodes.contains_key(&final_path) {
            return Err(StoreError::NodeExists(final_path));
        }

        let zxid = self.store.next_zxid();
        state.nodes.insert(
            final_path.clone(),
            NodeRecord {
                data: data.to_vec(),
                acl: acl.to_vec(),
                version: 0,
                czxid: zxid,
                mzxid: zxid,
                ephemeral_owner: if mode.is_ephemeral() { self.id } else { 0 },
                next_sequence: 0,
            },
        );
        state.fire_node(&final_path, EventKind::NodeCreated);
        state.fire_children(&parent);
        Ok(leaf)
    }

    async fn exists(&self, path: &str) -> StoreResult<Option<NodeStat>> {
        let full = self.resolve(path);
        let state = self.store.lock();
        self.check_alive(&state)?;
        Ok(state.stat_of(&full))
    }

    async fn exists_watch(&self, path: &str) -> StoreResult<(Option<NodeStat>, WatchFired)> {
        let full = self.resolve(path);
        let mut state = self.store.lock();
        self.check_alive(&state)?;
        let stat = state.stat_of(&full);
        let fired = self.register_watch(&mut state, &full, WatchSlot::Exists);
        Ok((stat, fired))
    }

    async fn get_data(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full = self.resolve(path);
        let state = self.store.lock();
        self.check_alive(&state)?;
        state
            .nodes
            .get(&full)
            .map(|node| node.data.clone())
            .ok_or(StoreError::NoNode(full))
    }

    async fn get_data_watch(&self, path: &str) -> StoreResult<(Vec<u8>, WatchFired)> {
        let full = self.resolve(path);
        let mut state = self.store.lock();
        self.check_alive(&state)?;
        let data = state
            .nodes
            .get(&full)
            .map(|node| node.data.clone())
            .ok_or_else(|| StoreError::NoNode(full.clone()))?;
        let fired = self.register_watch(&mut state, &full, WatchSlot::Data);
        Ok((data, fired))
    }

    async fn set_data(&self, path: &str, data: &[u8], version: i32) -> StoreResult<NodeStat> {
        let full = self.resolve(path);
        let zxid = self.store.next_zxid();
        let mut state = self.store.lock();
        self.check_alive(&state)?;
        let node = state
            .nodes
            .get_mut(&full)
            .ok_or_else(|| StoreError::NoNode(full.clone()))?;
        if version != ANY_VERSION && version != node.version {
            return Err(StoreError::BadVersion(full));
        }
        node.data = data.to_vec();
        node.version += 1;
        node.mzxid = zxid;
        state.fire_node(&full, EventKind::NodeDataChanged);
        Ok(state.stat_of(&full).unwrap_or_default())
    }

    async fn get_children(&self, path: &str) -> StoreResult<Vec<String>> {
        let full = self.resolve(path);
        let state = self.store.lock();
        self.check_alive(&state)?;
        if !state.nodes.contains_key(&full) {
            return Err(StoreError::NoNode(full));
        }
        Ok(state.child_names(&full))
    }

    async fn get_children_watch(&self, path: &str) -> StoreResult<(Vec<String>, WatchFired)> {
        let full = self.resolve(path);
        let mut state = self.store.lock();
        self.check_alive(&state)?;
        if !state.nodes.contains_key(&full) {
            return Err(StoreError::NoNode(full));
        }
        let children = state.child_names(&full);
        let fired = self.register_watch(&mut state, &full, WatchSlot::Children);
        Ok((children, fired))
    }

    async fn delete(&self, path: &str, version: i32) -> StoreResult<()> {
        let full = self.resolve(path);
        let mut state = self.store.lock();
        self.check_alive(&state)?;
        let node = state
            .nodes
            .get(&full)
            .ok_or_else(|| StoreError::NoNode(full.clone()))?;
        if version != ANY_VERSION && version != node.version {
            return Err(StoreError::BadVersion(full));
        }
        if !state.child_names(&full).is_empty() {
            return Err(StoreError::NotEmpty(full));
        }
        state.nodes.remove(&full);
        state.fire_node(&full, EventKind::NodeDeleted);
        if let Some(parent) = parent_path(&full) {
            let parent = parent.to_string();
            state.fire_children(&parent);
        }
        Ok(())
    }

    async fn add_auth(&self, _scheme: &str, _token: &[u8]) -> StoreResult<()> {
        // Credentials are accepted and carried; enforcement is the real
        // store's business.
        Ok(())
    }

    fn key(&self) -> SessionKey {
        SessionKey {
            id: self.id,
            password: self.password.clone(),
        }
    }

    fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn is_alive(&self) -> bool {
        let state = self.store.lock();
        state
            .sessions
            .get(&self.id)
            .map(|record| record.alive)
            .unwrap_or(false)
    }

    async fn close(&self) {
        self.store.end_session(self.id, SessionEvent::Closed);
    }
}
