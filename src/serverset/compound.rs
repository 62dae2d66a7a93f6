//! Treat several server sets as one
//!
//! Joins fan out to every constituent in order; the watched view is the
//! union of the constituents' live sets.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use log::warn;

use crate::errors::{CancelError, JoinError, MonitorError};
use crate::watch::WatchGuard;

use super::{Endpoint, HostChangeMonitor, JoinedEndpoint, ServiceDirectory, ServiceInstance, Status};

/// Union of N server sets
pub struct CompoundServerSet {
    sets: Vec<Arc<dyn ServiceDirectory>>,
}

impl CompoundServerSet {
    pub fn new(sets: Vec<Arc<dyn ServiceDirectory>>) -> CompoundServerSet {
        CompoundServerSet { sets }
    }

    /// Join every constituent in order. The composite handle leaves and
    /// updates all of them, aggregating failures instead of
    /// short-circuiting.
    pub async fn join(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<CompoundEndpoint, JoinError> {
        let mut handles = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            handles.push(set.join(endpoint.clone(), additional.clone(), shard).await?);
        }
        Ok(CompoundEndpoint { handles })
    }

    /// Watch the union of all constituents. The outer monitor fires once
    /// with the initial union and then only on changes to the union.
    ///
    /// When a later constituent's watch fails, the already-installed inner
    /// watches stay running (matching the historical behavior of this
    /// protocol); retrying the whole call is safe, deliveries are
    /// deduplicated by the union comparison.
    pub async fn watch<M: HostChangeMonitor>(&self, monitor: M) -> Result<WatchGuard, MonitorError> {
        self.watch_dyn(Arc::new(monitor)).await
    }

    async fn watch_dyn(
        &self,
        monitor: Arc<dyn HostChangeMonitor>,
    ) -> Result<WatchGuard, MonitorError> {
        let caches: Arc<Vec<StdMutex<HashSet<ServiceInstance>>>> = Arc::new(
            (0..self.sets.len())
                .map(|_| StdMutex::new(HashSet::new()))
                .collect(),
        );
        let last_union: Arc<StdMutex<Option<HashSet<ServiceInstance>>>> =
            Arc::new(StdMutex::new(None));

        let mut guards = Vec::with_capacity(self.sets.len());
        for (index, set) in self.sets.iter().enumerate() {
            let inner = UnionMonitor {
                index,
                caches: Arc::clone(&caches),
                last_union: Arc::clone(&last_union),
                monitor: Arc::clone(&monitor),
            };
            match set.watch(Arc::new(inner)).await {
                Ok(guard) => guards.push(guard),
                Err(error) => {
                    warn!(
                        "constituent {index} failed to watch; {} inner watches stay installed",
                        guards.len()
                    );
                    for guard in guards {
                        guard.detach();
                    }
                    return Err(error);
                }
            }
        }
        Ok(WatchGuard::merge(guards))
    }
}

#[async_trait]
impl ServiceDirectory for CompoundServerSet {
    async fn join(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<Box<dyn JoinedEndpoint>, JoinError> {
        let handle = CompoundServerSet::join(self, endpoint, additional, shard).await?;
        Ok(Box::new(handle))
    }

    async fn watch(&self, monitor: Arc<dyn HostChangeMonitor>) -> Result<WatchGuard, MonitorError> {
        self.watch_dyn(monitor).await
    }
}

/// Per-constituent monitor: replaces that constituent's cached set and
/// dispatches the union when it changed.
struct UnionMonitor {
    index: usize,
    caches: Arc<Vec<StdMutex<HashSet<ServiceInstance>>>>,
    last_union: Arc<StdMutex<Option<HashSet<ServiceInstance>>>>,
    monitor: Arc<dyn HostChangeMonitor>,
}

#[async_trait]
impl HostChangeMonitor for UnionMonitor {
    async fn on_change(&self, hosts: HashSet<ServiceInstance>) {
        let union: HashSet<ServiceInstance> = {
            *self.caches[self.index]
                .lock()
                .unwrap_or_else(|poison| poison.into_inner()) = hosts;
            self.caches
                .iter()
                .flat_map(|cache| {
                    cache
                        .lock()
                        .unwrap_or_else(|poison| poison.into_inner())
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        let changed = {
            let mut last = self
                .last_union
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            if last.as_ref() != Some(&union) {
                *last = Some(union.clone());
                true
            } else {
                false
            }
        };
        if changed {
            self.monitor.on_change(union).await;
        }
    }
}

/// Composite handle over every constituent's registration
pub struct CompoundEndpoint {
    handles: Vec<Box<dyn JoinedEndpoint>>,
}

impl CompoundEndpoint {
    /// Leave every constituent; failures are collected, not
    /// short-circuited.
    pub async fn leave(&self) -> Result<(), CancelError> {
        let mut failures = Vec::new();
        for handle in &self.handles {
            if let Err(error) = handle.leave().await {
                failures.push(error);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CancelError::Composite(failures))
        }
    }

    /// Deprecated status-update fan-out; see
    /// [EndpointHandle::update](super::EndpointHandle::update).
    pub async fn update(&self, status: Status) -> Result<(), CancelError> {
        let mut failures = Vec::new();
        for handle in &self.handles {
            if let Err(error) = handle.update(status).await {
                failures.push(error);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CancelError::Composite(failures))
        }
    }
}

#[async_trait]
impl JoinedEndpoint for CompoundEndpoint {
    async fn leave(&self) -> Result<(), CancelError> {
        CompoundEndpoint::leave(self).await
    }

    async fn update(&self, status: Status) -> Result<(), CancelError> {
        CompoundEndpoint::update(self, status).await
    }
}
