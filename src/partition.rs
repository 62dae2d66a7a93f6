//! Deterministic key-space slicing over a [Group]
//!
//! Each joined partitioner owns the keys `k` with `k mod size == index`,
//! where `index` is this member's position in the ascending member-id list
//! and `size` is the member count. The pair is updated on every group
//! change; readers may briefly observe the previous pair while the group
//! converges.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::errors::PartitionError;
use crate::group::{Group, GroupChangeListener, MemberId, Membership};
use crate::store::Ensemble;
use crate::watch::WatchGuard;

struct ShardState {
    index: AtomicUsize,
    size: AtomicUsize,
}

struct ShardListener<E: Ensemble> {
    membership: Membership<E>,
    shard: Arc<ShardState>,
}

#[async_trait]
impl<E: Ensemble> GroupChangeListener for ShardListener<E> {
    async fn on_change(&self, members: Vec<MemberId>) {
        let my_id = self.membership.id();
        match members.iter().position(|member| *member == my_id) {
            Some(index) => {
                self.shard.index.store(index, Ordering::SeqCst);
                self.shard.size.store(members.len(), Ordering::SeqCst);
                debug!(
                    "partition of {}: index {index} of {}",
                    self.membership.group_path(),
                    members.len()
                );
            }
            // Mid-rejoin snapshot; keep the previous slice until our new
            // node shows up.
            None => debug!(
                "partition snapshot of {} without {my_id}",
                self.membership.group_path()
            ),
        }
    }
}

/// Joins members to a group and carves the integer key space across them
pub struct Partitioner<E: Ensemble> {
    group: Group<E>,
}

impl<E: Ensemble> Partitioner<E> {
    pub fn new(group: Group<E>) -> Partitioner<E> {
        Partitioner { group }
    }

    /// Join the group and start tracking this member's slice.
    pub async fn join(&self) -> Result<Partition<E>, PartitionError> {
        let membership = self.group.join().await?;
        let shard = Arc::new(ShardState {
            index: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        });
        let listener = ShardListener {
            membership: membership.clone(),
            shard: Arc::clone(&shard),
        };
        let guard = match self.group.watch(listener).await {
            Ok(guard) => guard,
            Err(error) => {
                let _ = membership.cancel().await;
                return Err(error.into());
            }
        };
        Ok(Partition {
            membership,
            shard,
            _guard: guard,
        })
    }
}

/// One member's slice of the key space
pub struct Partition<E: Ensemble> {
    membership: Membership<E>,
    shard: Arc<ShardState>,
    _guard: WatchGuard,
}

impl<E: Ensemble> Partition<E> {
    /// True iff this member owns `key`.
    pub fn is_member(&self, key: u64) -> bool {
        let size = self.shard.size.load(Ordering::SeqCst);
        if size == 0 {
            return false;
        }
        key % size as u64 == self.shard.index.load(Ordering::SeqCst) as u64
    }

    pub fn num_partitions(&self) -> usize {
        self.shard.size.load(Ordering::SeqCst)
    }

    pub fn index(&self) -> usize {
        self.shard.index.load(Ordering::SeqCst)
    }

    /// The membership backing this partition; cancel it to give the slice
    /// up.
    pub fn membership(&self) -> &Membership<E> {
        &self.membership
    }
}
