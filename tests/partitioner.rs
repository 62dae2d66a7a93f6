//! Partitioner convergence across members

use std::collections::HashSet;
use std::time::Duration;

use coterie::group::Group;
use coterie::partition::{Partition, Partitioner};
use coterie::prelude::*;
use coterie::store::memory::MemoryStore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn join(store: &MemoryStore) -> Result<Partition<MemoryStore>, PartitionError> {
    let client = StoreClient::new(store.clone(), ClientSettings::default());
    Partitioner::new(Group::new(client, "/svc/shards")).join().await
}

async fn converge(partitions: &[&Partition<MemoryStore>], size: usize) -> TestResult {
    tokio::time::timeout(Duration::from_secs(2), async {
        while partitions
            .iter()
            .any(|partition| partition.num_partitions() != size)
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn three_members_cover_the_key_space_exactly_once() -> TestResult {
    let store = MemoryStore::new();
    let p1 = join(&store).await?;
    let p2 = join(&store).await?;
    let p3 = join(&store).await?;
    let all = [&p1, &p2, &p3];
    converge(&all, 3).await?;

    let indexes: HashSet<usize> = all.iter().map(|partition| partition.index()).collect();
    assert_eq!(indexes, HashSet::from([0, 1, 2]));

    for key in 0..12u64 {
        let owners = all
            .iter()
            .filter(|partition| partition.is_member(key))
            .count();
        assert_eq!(owners, 1, "key {key} must have exactly one owner");
    }
    Ok(())
}

#[tokio::test]
async fn slices_rebalance_when_a_member_leaves() -> TestResult {
    let store = MemoryStore::new();
    let p1 = join(&store).await?;
    let p2 = join(&store).await?;
    let p3 = join(&store).await?;
    converge(&[&p1, &p2, &p3], 3).await?;

    p2.membership().cancel().await?;
    converge(&[&p1, &p3], 2).await?;

    for key in 0..12u64 {
        assert!(p1.is_member(key) != p3.is_member(key));
    }
    Ok(())
}
