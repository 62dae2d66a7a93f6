//! Truncated binary backoff for retryable store failures

use std::time::Duration;

use rand::Rng;

/// Backoff parameters: start at `initial`, double per failure, never exceed
/// `cap`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, cap: Duration) -> BackoffPolicy {
        BackoffPolicy { initial, cap }
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            next: self.initial,
        }
    }
}

/// Per-operation backoff state. No cross-task state; create one per retry
/// loop and [reset](Backoff::reset) it after a success.
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
}

impl Backoff {
    /// Sleep for the current delay (plus up to 25% jitter), then double it,
    /// truncated at the cap.
    pub async fn wait(&mut self) {
        let base = self.next;
        self.next = (self.next * 2).min(self.policy.cap);
        let jitter_cap = (base.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        tokio::time::sleep(base + Duration::from_millis(jitter)).await;
    }

    /// Next delay without sleeping; exposed for tests.
    pub fn peek(&self) -> Duration {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = self.policy.initial;
    }
}
