//! A server set with a fixed membership
//!
//! Useful as a compound constituent for endpoints that are not registered
//! in the store (hardwired peers, external dependencies).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, warn};

use crate::errors::{CancelError, JoinError, MonitorError};
use crate::watch::WatchGuard;

use super::{
    Endpoint, HostChangeMonitor, JoinedEndpoint, ServiceDirectory, ServiceInstance, Status,
};

/// Immutable instance set
pub struct StaticServerSet {
    hosts: HashSet<ServiceInstance>,
}

impl StaticServerSet {
    pub fn new(hosts: HashSet<ServiceInstance>) -> StaticServerSet {
        StaticServerSet { hosts }
    }

    /// Alive instances from bare endpoints, no auxiliaries or shards.
    pub fn of_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> StaticServerSet {
        StaticServerSet {
            hosts: endpoints.into_iter().map(ServiceInstance::alive).collect(),
        }
    }

    pub fn hosts(&self) -> &HashSet<ServiceInstance> {
        &self.hosts
    }
}

#[async_trait]
impl ServiceDirectory for StaticServerSet {
    /// Accepted but inert: the set never changes. Joins whose instance is
    /// not already part of the fixed set are logged loudly.
    async fn join(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<Box<dyn JoinedEndpoint>, JoinError> {
        warn!("join on a static server set does not register anything");
        let instance = ServiceInstance {
            service_endpoint: endpoint,
            additional_endpoints: additional,
            status: Status::Alive,
            shard,
        };
        if !self.hosts.contains(&instance) {
            error!("joined instance {instance:?} is not part of the static set");
        }
        Ok(Box::new(StaticEndpoint))
    }

    /// Delivers the fixed set exactly once.
    async fn watch(&self, monitor: Arc<dyn HostChangeMonitor>) -> Result<WatchGuard, MonitorError> {
        monitor.on_change(self.hosts.clone()).await;
        Ok(WatchGuard::noop())
    }
}

struct StaticEndpoint;

#[async_trait]
impl JoinedEndpoint for StaticEndpoint {
    async fn leave(&self) -> Result<(), CancelError> {
        Ok(())
    }

    async fn update(&self, _status: Status) -> Result<(), CancelError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serverset::ChannelMonitor;
    use std::time::Duration;
    use tokio::sync::mpsc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn watch_delivers_the_fixed_set_once() -> TestResult {
        let set = StaticServerSet::of_endpoints([
            Endpoint::new("a", 80),
            Endpoint::new("b", 80),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = set.watch(Arc::new(ChannelMonitor(tx))).await?;

        let hosts = rx.recv().await.unwrap();
        assert_eq!(hosts.len(), 2);

        guard.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn join_is_inert() -> TestResult {
        let set = StaticServerSet::of_endpoints([Endpoint::new("a", 80)]);
        let handle = set
            .join(Endpoint::new("somewhere-else", 80), BTreeMap::new(), None)
            .await?;
        handle.leave().await?;
        assert_eq!(set.hosts().len(), 1);
        Ok(())
    }
}
