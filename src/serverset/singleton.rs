//! Singleton service: a server set published by exactly one leader
//!
//! Candidates elect among themselves under the `singleton_candidate_`
//! prefix of the service path; whoever wins publishes its endpoint as an
//! ordinary server set member, and unpublishes on defeat.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::client::StoreClient;
use crate::election::{Abdicate, Candidate, Leader, Leadership};
use crate::errors::ElectionError;
use crate::group::{Group, GroupConfig};
use crate::store::Ensemble;

use super::{Endpoint, EndpointHandle, ServerSet};

pub const SINGLETON_CANDIDATE_PREFIX: &str = "singleton_candidate_";

/// At-most-one publisher of a service endpoint
pub struct SingletonService<E: Ensemble> {
    server_set: ServerSet<E>,
    candidate: Candidate<E>,
}

impl<E: Ensemble> SingletonService<E> {
    /// Candidates and published members share `path`; they are told apart
    /// by their prefixes.
    pub fn new(client: StoreClient<E>, path: impl Into<String>) -> SingletonService<E> {
        let path = path.into();
        let server_set = ServerSet::new(client.clone(), path.clone());
        let election_group = Group::with_config(
            client,
            path,
            GroupConfig {
                prefix: SINGLETON_CANDIDATE_PREFIX.to_string(),
                ..GroupConfig::default()
            },
        );
        SingletonService {
            server_set,
            candidate: Candidate::new(election_group),
        }
    }

    /// The underlying server set; watch it to find the current leader's
    /// endpoint.
    pub fn server_set(&self) -> &ServerSet<E> {
        &self.server_set
    }

    /// Enter the election; the endpoint is published while (and only
    /// while) this candidate leads.
    pub async fn lead(
        &self,
        endpoint: Endpoint,
        additional: BTreeMap<String, Endpoint>,
        shard: Option<u32>,
    ) -> Result<Leadership<E>, ElectionError> {
        let publisher = PublishingLeader {
            set: self.server_set.clone(),
            endpoint,
            additional,
            shard,
            handle: Mutex::new(None),
        };
        self.candidate.offer_leadership(publisher).await
    }
}

struct PublishingLeader<E: Ensemble> {
    set: ServerSet<E>,
    endpoint: Endpoint,
    additional: BTreeMap<String, Endpoint>,
    shard: Option<u32>,
    handle: Mutex<Option<EndpointHandle<E>>>,
}

#[async_trait]
impl<E: Ensemble> Leader for PublishingLeader<E> {
    async fn on_elected(&self, _abdicate: Abdicate) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        match self
            .set
            .join(self.endpoint.clone(), self.additional.clone(), self.shard)
            .await
        {
            Ok(joined) => {
                info!("singleton leader published {:?}", self.endpoint);
                *handle = Some(joined);
            }
            Err(error) => error!("singleton leader cannot publish: {error}"),
        }
    }

    async fn on_defeated(&self) {
        if let Some(joined) = self.handle.lock().await.take() {
            if let Err(error) = joined.leave().await {
                warn!("defeated singleton leader could not unpublish: {error}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serverset::ChannelMonitor;
    use crate::settings::ClientSettings;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn singleton(store: &MemoryStore) -> SingletonService<MemoryStore> {
        let client = StoreClient::new(store.clone(), ClientSettings::default());
        SingletonService::new(client, "/svc/scheduler")
    }

    #[tokio::test]
    async fn leader_publishes_and_handoff_republishes() -> TestResult {
        let store = MemoryStore::new();

        let first = singleton(&store);
        let second = singleton(&store);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = first
            .server_set()
            .watch(ChannelMonitor(tx))
            .await?;
        let initial = rx.recv().await.unwrap();
        assert!(initial.is_empty());

        let first_lead = first
            .lead(Endpoint::new("host-a", 7000), BTreeMap::new(), None)
            .await?;
        let published = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await?
            .unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published.into_iter().next().unwrap().service_endpoint,
            Endpoint::new("host-a", 7000)
        );

        let _second_lead = second
            .lead(Endpoint::new("host-b", 7000), BTreeMap::new(), None)
            .await?;
        assert!(first_lead.is_leader());

        // Handoff: the set transitions to host-b (possibly through an empty
        // interim delivery).
        first_lead.abdicate().await?;
        let final_set = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let hosts = rx.recv().await.unwrap();
                if hosts.len() == 1
                    && hosts.iter().next().unwrap().service_endpoint
                        == Endpoint::new("host-b", 7000)
                {
                    break hosts;
                }
            }
        })
        .await?;
        assert_eq!(final_set.len(), 1);
        Ok(())
    }
}
