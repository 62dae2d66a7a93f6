//! Leader election over a [Group]
//!
//! Every candidate joins the group and watches it; a shared deterministic
//! judge maps the member-id set to the leader. With the default judge the
//! oldest ephemeral sequential node wins. All candidates wake on every
//! change (herd effect) — fine for the small candidate pools this is meant
//! for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{error, warn};
use tokio::sync::mpsc;

use crate::errors::{CancelError, ElectionError, WatchError};
use crate::group::{ChannelListener, Group, JoinOptions, MemberId, Membership};
use crate::store::Ensemble;
use crate::watch::WatchGuard;

/// Deterministic, total on non-empty id sets. Every candidate of one group
/// must use the same judge.
pub type Judge = Arc<dyn Fn(&[MemberId]) -> Option<MemberId> + Send + Sync>;

/// Lexicographic minimum: the oldest ephemeral sequential child.
pub fn lowest_id_judge() -> Judge {
    Arc::new(|members: &[MemberId]| members.iter().min().cloned())
}

/// Callbacks driven by the election. Both run on a library task and must
/// not block.
#[async_trait]
pub trait Leader: Send + Sync + 'static {
    /// This candidate became the leader. `abdicate` renounces leadership
    /// permanently.
    async fn on_elected(&self, abdicate: Abdicate);

    /// This candidate stopped being the leader (another candidate won, or
    /// the membership was lost).
    async fn on_defeated(&self);
}

type CancelFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CancelError>> + Send + Sync>;

/// Renounces leadership: cancels the candidate's membership and marks the
/// election terminally abdicated.
#[derive(Clone)]
pub struct Abdicate {
    elected: Arc<AtomicBool>,
    abdicated: Arc<AtomicBool>,
    cancel: CancelFn,
}

impl Abdicate {
    /// [Leadership::is_leader] reports false as soon as this returns; the
    /// `on_defeated` callback follows from the group change the
    /// cancellation causes.
    pub async fn abdicate(&self) -> Result<(), CancelError> {
        if self.abdicated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        (*self.cancel)().await
    }
}

/// Handle returned by [Candidate::offer_leadership]
pub struct Leadership<E: Ensemble> {
    membership: Membership<E>,
    elected: Arc<AtomicBool>,
    abdicated: Arc<AtomicBool>,
    _guard: WatchGuard,
}

impl<E: Ensemble> Leadership<E> {
    /// True while this candidate is the elected leader and has not
    /// abdicated.
    pub fn is_leader(&self) -> bool {
        self.elected.load(Ordering::SeqCst) && !self.abdicated.load(Ordering::SeqCst)
    }

    pub fn membership(&self) -> &Membership<E> {
        &self.membership
    }

    /// Renounce leadership; terminal.
    pub async fn abdicate(&self) -> Result<(), CancelError> {
        if self.abdicated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.membership.cancel().await
    }
}

/// A contender for leadership of one group
pub struct Candidate<E: Ensemble> {
    group: Group<E>,
    judge: Judge,
}

impl<E: Ensemble> Candidate<E> {
    pub fn new(group: Group<E>) -> Candidate<E> {
        Candidate {
            group,
            judge: lowest_id_judge(),
        }
    }

    pub fn with_judge(group: Group<E>, judge: Judge) -> Candidate<E> {
        Candidate { group, judge }
    }

    /// Payload of the current leader's node: `None` when there is no
    /// leader, an empty vec when the leader's node holds no data.
    pub async fn leader_data(&self) -> Result<Option<Vec<u8>>, WatchError> {
        let members = self.group.member_ids().await?;
        if members.is_empty() {
            return Ok(None);
        }
        match (*self.judge)(&members) {
            Some(leader) => self.group.member_data(&leader).await,
            None => Ok(None),
        }
    }

    /// Enter the election. Returns once this candidate is a group member
    /// and the watch is armed; elected/defeated transitions are delivered
    /// to `leader` as the member set evolves.
    pub async fn offer_leadership<L: Leader>(
        &self,
        leader: L,
    ) -> Result<Leadership<E>, ElectionError> {
        let leader = Arc::new(leader);
        let elected = Arc::new(AtomicBool::new(false));
        let abdicated = Arc::new(AtomicBool::new(false));

        // Losing the membership always means losing leadership; the re-join
        // that follows feeds a fresh snapshot through the judge.
        let loss_leader = Arc::clone(&leader);
        let loss_elected = Arc::clone(&elected);
        let options = JoinOptions::default().on_lose_membership(Arc::new(move || {
            if loss_elected.swap(false, Ordering::SeqCst) {
                let leader = Arc::clone(&loss_leader);
                tokio::spawn(async move {
                    leader.on_defeated().await;
                });
            }
        }));
        let membership = self.group.join_with(options).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let guard = match self.group.watch(ChannelListener(tx)).await {
            Ok(guard) => guard,
            Err(error) => {
                let _ = membership.cancel().await;
                return Err(error.into());
            }
        };

        let cancel_membership = membership.clone();
        let abdicate = Abdicate {
            elected: Arc::clone(&elected),
            abdicated: Arc::clone(&abdicated),
            cancel: Arc::new(move || {
                let membership = cancel_membership.clone();
                Box::pin(async move { membership.cancel().await })
            }),
        };

        let judge = Arc::clone(&self.judge);
        let task_membership = membership.clone();
        let task_elected = Arc::clone(&elected);
        let task_abdicated = Arc::clone(&abdicated);
        let group_path = self.group.path().to_string();
        tokio::spawn(async move {
            while let Some(members) = rx.recv().await {
                if members.is_empty() {
                    warn!("election group {group_path} reported no members");
                    continue;
                }
                let my_id = task_membership.id();
                let present = members.contains(&my_id);
                if !present && !task_membership.is_cancelled() {
                    // Should not happen while joined; a re-join will feed the
                    // next snapshot.
                    error!("member {my_id} missing from {group_path} while joined");
                    continue;
                }
                let is_elected = present
                    && !task_abdicated.load(Ordering::SeqCst)
                    && (*judge)(&members).as_deref() == Some(my_id.as_str());
                let was_elected = task_elected.swap(is_elected, Ordering::SeqCst);
                if is_elected && !was_elected {
                    leader.on_elected(abdicate.clone()).await;
                } else if !is_elected && was_elected {
                    leader.on_defeated().await;
                }
                if task_abdicated.load(Ordering::SeqCst) && !present {
                    break;
                }
            }
        });

        Ok(Leadership {
            membership,
            elected,
            abdicated,
            _guard: guard,
        })
    }
}
