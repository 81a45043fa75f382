//! Retry with exponential backoff and a per-destination circuit breaker.

use super::PushError;
use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Consecutive failed operations before the breaker opens.
    pub circuit_breaker_threshold: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            circuit_breaker_threshold: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), with full jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(0.0..=capped.max(f64::EPSILON));
        Duration::from_secs_f64(jittered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Opens after N consecutive failed operations. While open, calls fail
/// immediately with [`PushError::CircuitOpen`]; after a cooldown one probe
/// call is let through and a success closes the breaker again.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// Gate an operation. `Err(CircuitOpen)` while open; transitions to
    /// half-open once the cooldown has elapsed.
    pub fn check(&mut self, now: Instant) -> Result<(), PushError> {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| now.duration_since(at))
                    .unwrap_or_default();
                if elapsed >= self.cooldown {
                    debug!("circuit breaker half-open, allowing probe");
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(PushError::CircuitOpen)
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            debug!("circuit breaker probe succeeded, closing");
        }
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if self.state == BreakerState::HalfOpen || self.consecutive_failures >= self.threshold {
            if self.state != BreakerState::Open {
                warn!(
                    "circuit breaker opened after {} consecutive failures",
                    self.consecutive_failures
                );
            }
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
        }
    }
}

/// Run `op` with the retry policy and breaker. Returns the final result
/// plus the number of retries consumed (0 when the first attempt wins).
///
/// Only transient errors are retried. A cancelled call (dropped future)
/// never reaches the bookkeeping below, so it does not count against the
/// breaker.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    breaker: &mut CircuitBreaker,
    what: &str,
    mut op: F,
) -> (Result<(), PushError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), PushError>>,
{
    if let Err(e) = breaker.check(Instant::now()) {
        return (Err(e), 0);
    }

    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(()) => {
                breaker.record_success();
                return (Ok(()), attempt);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                debug!(
                    "{what}: transient failure ({e}), retry {attempt}/{} in {:?}",
                    policy.max_retries, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!("{what}: push failed after {attempt} retries: {e}");
                breaker.record_failure(Instant::now());
                return (Err(e), attempt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(5),
            circuit_breaker_threshold: 2,
        }
    }

    fn transient() -> PushError {
        PushError::Transient {
            reason: "reset".into(),
            status: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let policy = fast_policy();
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (result, retries) = with_retry(&policy, &mut breaker, "seg", move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let policy = fast_policy();
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (result, retries) = with_retry(&policy, &mut breaker, "seg", move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PushError::Permanent {
                    reason: "401".into(),
                    status: Some(401),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(PushError::Permanent { .. })));
        assert_eq!(retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opens_and_recovers_via_probe() {
        let policy = RetryPolicy {
            max_retries: 0,
            circuit_breaker_threshold: 2,
            ..fast_policy()
        };
        let mut breaker = CircuitBreaker::new(2, Duration::from_millis(10));

        for _ in 0..2 {
            let (r, _) =
                with_retry(&policy, &mut breaker, "seg", || async { Err(transient()) }).await;
            assert!(r.is_err());
        }
        assert!(breaker.is_open());

        // open: immediate failure without consuming the operation
        let (r, retries) = with_retry(&policy, &mut breaker, "seg", || async { Ok(()) }).await;
        assert_eq!(r, Err(PushError::CircuitOpen));
        assert_eq!(retries, 0);

        // after cooldown the probe goes through and closes the breaker
        tokio::time::sleep(Duration::from_millis(15)).await;
        let (r, _) = with_retry(&policy, &mut breaker, "seg", || async { Ok(()) }).await;
        assert!(r.is_ok());
        assert!(!breaker.is_open());
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..fast_policy()
        };
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(5));
        let (_, _) = with_retry(&policy, &mut breaker, "seg", || async { Err(transient()) }).await;
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (r, _) = with_retry(&policy, &mut breaker, "seg", || async { Err(transient()) }).await;
        assert!(r.is_err());
        assert!(breaker.is_open());
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 10.0,
            max_delay: Duration::from_millis(300),
            circuit_breaker_threshold: 5,
        };
        for attempt in 1..8 {
            assert!(policy.delay_for(attempt) <= Duration::from_millis(300));
        }
    }
}
