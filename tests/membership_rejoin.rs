//! Automatic re-join after session expiration

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coterie::group::{Group, GroupChangeListener, MemberId};
use coterie::prelude::*;
use coterie::store::memory::MemoryStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct SnapshotListener {
    snapshots: Arc<Mutex<Vec<Vec<MemberId>>>>,
}

#[async_trait]
impl GroupChangeListener for SnapshotListener {
    async fn on_change(&self, members: Vec<MemberId>) {
        self.snapshots.lock().unwrap().push(members);
    }
}

#[tokio::test]
async fn expiration_produces_a_new_member_id() -> TestResult {
    let store = MemoryStore::new();

    let joiner_client = StoreClient::new(store.clone(), ClientSettings::default());
    let joiner_group = Group::new(joiner_client.clone(), "/svc/workers");
    let membership = joiner_group.join().await?;
    let first_id = membership.id();

    let watcher_client = StoreClient::new(store.clone(), ClientSettings::default());
    let watcher_group = Group::new(watcher_client, "/svc/workers");
    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let _watch = watcher_group
        .watch(SnapshotListener {
            snapshots: snapshots.clone(),
        })
        .await?;

    let joiner_session = joiner_client.get().await?.key().id;
    store.expire_session(joiner_session);

    // The joiner comes back under a fresh id.
    tokio::time::timeout(Duration::from_secs(2), async {
        while membership.id() == first_id {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    let second_id = membership.id();
    assert_ne!(second_id, first_id);

    // The watcher converges on exactly the new member.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let last = snapshots.lock().unwrap().last().cloned();
            if last == Some(vec![second_id.clone()]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn loss_handler_fires_before_each_rejoin() -> TestResult {
    let store = MemoryStore::new();
    let client = StoreClient::new(store.clone(), ClientSettings::default());
    let group = Group::new(client.clone(), "/svc/workers");

    let losses = Arc::new(Mutex::new(0usize));
    let counted = losses.clone();
    let options = coterie::group::JoinOptions::default()
        .on_lose_membership(Arc::new(move || {
            *counted.lock().unwrap() += 1;
        }));
    let membership = group.join_with(options).await?;
    let first_id = membership.id();

    store.expire_session(client.get().await?.key().id);
    tokio::time::timeout(Duration::from_secs(2), async {
        while membership.id() == first_id {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    assert_eq!(*losses.lock().unwrap(), 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_membership_never_resurrects() -> TestResult {
    let store = MemoryStore::new();
    let client = StoreClient::new(store.clone(), ClientSettings::default());
    let group = Group::new(client.clone(), "/svc/workers");

    let membership = group.join().await?;
    membership.cancel().await?;
    assert!(group.member_ids().await?.is_empty());

    // Neither time nor session churn brings the node back.
    store.expire_session(client.get().await?.key().id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(group.member_ids().await?.is_empty());
    Ok(())
}
