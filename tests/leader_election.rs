//! Leader election handoff across abdication and session expiration

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use coterie::election::{Abdicate, Candidate, Leader, Leadership};
use coterie::group::Group;
use coterie::prelude::*;
use coterie::store::memory::MemoryStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct RecordingLeader {
    name: &'static str,
    events: mpsc::UnboundedSender<(&'static str, &'static str)>,
}

#[async_trait]
impl Leader for RecordingLeader {
    async fn on_elected(&self, _abdicate: Abdicate) {
        let _ = self.events.send((self.name, "elected"));
    }

    async fn on_defeated(&self) {
        let _ = self.events.send((self.name, "defeated"));
    }
}

struct Contender {
    client: StoreClient<MemoryStore>,
    leadership: Leadership<MemoryStore>,
}

async fn contend(
    store: &MemoryStore,
    name: &'static str,
    events: mpsc::UnboundedSender<(&'static str, &'static str)>,
) -> Result<Contender, ElectionError> {
    let client = StoreClient::new(store.clone(), ClientSettings::default());
    let candidate = Candidate::new(Group::new(client.clone(), "/svc/primary"));
    let leadership = candidate
        .offer_leadership(RecordingLeader { name, events })
        .await?;
    Ok(Contender { client, leadership })
}

async fn await_event(
    rx: &mut mpsc::UnboundedReceiver<(&'static str, &'static str)>,
    expected: (&'static str, &'static str),
) -> TestResult {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if rx.recv().await == Some(expected) {
                break;
            }
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn handoff_through_abdication_and_expiration() -> TestResult {
    let store = MemoryStore::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let c1 = contend(&store, "c1", tx.clone()).await?;
    await_event(&mut rx, ("c1", "elected")).await?;

    let c2 = contend(&store, "c2", tx.clone()).await?;
    let c3 = contend(&store, "c3", tx.clone()).await?;

    // The oldest candidate leads.
    assert!(c1.leadership.is_leader());
    assert!(!c2.leadership.is_leader());
    assert!(!c3.leadership.is_leader());

    // Abdication hands off to exactly one of the survivors.
    c1.leadership.abdicate().await?;
    await_event(&mut rx, ("c2", "elected")).await?;
    assert!(!c1.leadership.is_leader());
    assert!(c2.leadership.is_leader() != c3.leadership.is_leader());
    assert!(c2.leadership.is_leader());

    // Expiring the new leader's session promotes the remaining candidate.
    let leader_session = c2.client.get().await?.key().id;
    store.expire_session(leader_session);
    await_event(&mut rx, ("c3", "elected")).await?;
    assert!(c3.leadership.is_leader());
    Ok(())
}

#[tokio::test]
async fn same_judge_same_leader_everywhere() -> TestResult {
    let store = MemoryStore::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = contend(&store, "a", tx.clone()).await?;
    await_event(&mut rx, ("a", "elected")).await?;
    let second = contend(&store, "b", tx.clone()).await?;
    let third = contend(&store, "c", tx.clone()).await?;

    // Every candidate agrees on who leads.
    let leaders = [
        first.leadership.is_leader(),
        second.leadership.is_leader(),
        third.leadership.is_leader(),
    ];
    assert_eq!(leaders.iter().filter(|leading| **leading).count(), 1);
    Ok(())
}
