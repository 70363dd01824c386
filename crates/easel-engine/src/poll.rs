use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use easel_contracts::GenerationError;

/// Bounded attempt loop with a fixed inter-attempt delay. The attempt
/// budget is the only cancellation mechanism: once exhausted the loop
/// terminates and reports a timeout, it never keeps running.
#[derive(Debug, Clone, Copy)]
pub struct PollPlan {
    pub attempts: usize,
    pub interval: Duration,
}

impl PollPlan {
    pub const fn new(attempts: usize, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Image generation completes within tens of seconds.
    pub const IMAGE_GENERATION: PollPlan = PollPlan::new(10, Duration::from_secs(5));

    /// Video and other heavy jobs take minutes.
    pub const VIDEO_GENERATION: PollPlan = PollPlan::new(10, Duration::from_secs(20));

    /// Local workflow servers are checked on a short cadence for longer.
    pub const LOCAL_WORKFLOW: PollPlan = PollPlan::new(150, Duration::from_secs(2));
}

/// Poll `check` until it yields a value, an attempt budget is exhausted,
/// or never: per-attempt errors are logged and absorbed so a transient
/// failure does not abort the loop.
pub async fn poll_until<T, F, Fut>(plan: PollPlan, mut check: F) -> Result<T, GenerationError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    for attempt in 0..plan.attempts {
        match check(attempt).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) => {
                warn!(attempt = attempt + 1, error = %err, "polling attempt failed");
            }
        }
        if attempt + 1 < plan.attempts {
            tokio::time::sleep(plan.interval).await;
        }
    }
    Err(GenerationError::Timeout {
        attempts: plan.attempts,
    })
}

/// Run independent polls concurrently. Each job's failure or timeout is
/// isolated in its own slot and never cancels sibling polls.
pub async fn poll_all<T, Fut>(polls: impl IntoIterator<Item = Fut>) -> Vec<Result<T, GenerationError>>
where
    Fut: Future<Output = Result<T, GenerationError>>,
{
    join_all(polls).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_plan(attempts: usize) -> PollPlan {
        PollPlan::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn returns_first_non_empty_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value = poll_until(fast_plan(10), move |_| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n >= 3 { Some("done") } else { None })
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_after_exactly_the_attempt_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = poll_until(fast_plan(4), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        })
        .await;
        assert!(matches!(result, Err(GenerationError::Timeout { attempts: 4 })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn attempt_errors_are_absorbed_until_the_budget_runs_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value = poll_until(fast_plan(5), move |_| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    anyhow::bail!("transient");
                }
                Ok(Some(n))
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn sibling_poll_failures_are_isolated() {
        use futures::future::FutureExt;

        // Boxed so the two otherwise-distinct future types share one Vec.
        let ok = poll_until(fast_plan(2), |_| async { Ok(Some(1u32)) }).boxed();
        let timeout = poll_until(fast_plan(2), |_| async { Ok(None::<u32>) }).boxed();
        let results = poll_all(vec![ok, timeout]).await;
        assert_eq!(results.len(), 2);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].is_err());
    }
}
