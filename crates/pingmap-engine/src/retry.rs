//! Compare-and-swap retry with exponential back-off and jitter.
//!
//! A conflicting conditional write is not an error: it means another writer
//! got to the cell first, so the whole read-modify-write is run again against
//! the fresh state. Each extra attempt must fit in the request's
//! [`OpBudget`]; the first one is paid for when the bucket is admitted.

use std::future::Future;
use std::time::Duration;

use pingmap_core::BucketId;

use crate::budget::OpBudget;
use crate::EngineError;

/// Storage calls one read-modify-write attempt costs: a `get` and a `put`.
pub(crate) const OPS_PER_ATTEMPT: usize = 2;

const MAX_DELAY_MS: u64 = 2_000;

/// Result of one read-modify-write attempt.
#[derive(Debug)]
pub(crate) enum Attempt<T> {
    Done(T),
    /// The conditional write lost the race.
    Conflict,
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped, then scaled by a random factor in `[0.75, 1.25)`.
pub(crate) fn backoff_delay(backoff_base_ms: u64, attempt: u32) -> Duration {
    let computed = backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(delay_ms)
}

/// Runs `operation` until it returns [`Attempt::Done`], retrying up to
/// `max_retries` times on [`Attempt::Conflict`].
///
/// Errors from `operation` are returned immediately.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    bucket: &BucketId,
    max_retries: u32,
    backoff_base_ms: u64,
    budget: &OpBudget,
    mut operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>, EngineError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Conflict => {
                if attempt >= max_retries {
                    return Err(EngineError::Conflict {
                        bucket: bucket.clone(),
                        attempts: attempt + 1,
                    });
                }
                budget.try_acquire(OPS_PER_ATTEMPT)?;
                attempt += 1;
                let delay = backoff_delay(backoff_base_ms, attempt);
                tracing::warn!(
                    bucket = %bucket,
                    attempt,
                    max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "cell write conflict, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn id() -> BucketId {
        BucketId::parse("dr5ru6j").unwrap()
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        for _ in 0..20 {
            let first = backoff_delay(100, 1).as_millis();
            assert!((75..125).contains(&first), "first retry delay {first}");
            let third = backoff_delay(100, 3).as_millis();
            assert!((300..500).contains(&third), "third retry delay {third}");
            let huge = backoff_delay(100, 30).as_millis();
            assert!(huge < 2_500, "capped delay {huge}");
        }
    }

    #[test]
    fn zero_base_means_no_wait() {
        assert_eq!(backoff_delay(0, 4), Duration::ZERO);
    }

    #[tokio::test]
    async fn done_on_first_attempt_costs_nothing_extra() {
        let budget = OpBudget::new(0);
        let result = retry_on_conflict(&id(), 3, 0, &budget, || async {
            Ok::<_, EngineError>(Attempt::Done(7))
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(budget.used(), 0);
    }

    #[tokio::test]
    async fn retries_conflicts_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let budget = OpBudget::new(10);
        let result = retry_on_conflict(&id(), 3, 0, &budget, || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, EngineError>(if n < 3 {
                    Attempt::Conflict
                } else {
                    Attempt::Done(n)
                })
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(budget.used(), 2 * OPS_PER_ATTEMPT);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let budget = OpBudget::new(100);
        let result = retry_on_conflict(&id(), 2, 0, &budget, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<Attempt<()>, EngineError>(Attempt::Conflict)
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(EngineError::Conflict { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_when_budget_cannot_cover_a_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let budget = OpBudget::new(1);
        let result = retry_on_conflict(&id(), 5, 0, &budget, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<Attempt<()>, EngineError>(Attempt::Conflict)
            }
        })
        .await;
        assert!(matches!(result, Err(EngineError::BudgetExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let budget = OpBudget::new(100);
        let result = retry_on_conflict(&id(), 5, 0, &budget, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<Attempt<()>, _>(EngineError::StorageUnavailable { failed: 1 })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
