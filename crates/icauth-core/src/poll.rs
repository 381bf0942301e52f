//! Bounded fixed-interval polling.
//!
//! Every interactive step of the auth flow is an instance of this primitive:
//! re-run a locate closure until it yields a value or the attempt budget is
//! exhausted. Attempts are spaced by a fixed interval rather than backoff --
//! the provider's UI transitions are push-driven, so slower polling only
//! delays success, and each step carries its own empirically-tuned budget.

use std::future::Future;
use std::time::Duration;

/// Attempt ceiling and spacing for one polled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Maximum number of locate attempts.
    pub attempts: u32,
    /// Fixed delay inserted between attempts.
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on the total time this budget can spend sleeping.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

/// Re-invoke `locate` until it returns `Some`, up to the budget's attempt
/// ceiling, sleeping the fixed interval between attempts.
///
/// Returns `None` when every attempt came up empty. The final attempt is not
/// followed by a sleep. A zero-attempt budget never invokes `locate`.
pub async fn poll_until<T, F, Fut>(budget: PollBudget, mut locate: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..budget.attempts {
        if let Some(found) = locate().await {
            tracing::trace!(attempt, "poll target located");
            return Some(found);
        }
        if attempt + 1 < budget.attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_immediately_when_first_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let result = poll_until(PollBudget::new(5, Duration::from_secs(10)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Some(42) }
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_returns_none() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = poll_until(PollBudget::new(4, Duration::from_millis(500)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let calls = AtomicU32::new(0);
        let result = poll_until(PollBudget::new(10, Duration::from_millis(250)), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { (n == 3).then_some("found") }
        })
        .await;
        assert_eq!(result, Some("found"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempt_budget_never_invokes_locate() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = poll_until(PollBudget::new(0, Duration::from_secs(1)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Some(()) }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn max_wait_excludes_trailing_sleep() {
        let budget = PollBudget::new(4, Duration::from_secs(2));
        assert_eq!(budget.max_wait(), Duration::from_secs(6));
        assert_eq!(PollBudget::new(0, Duration::from_secs(2)).max_wait(), Duration::ZERO);
    }
}
