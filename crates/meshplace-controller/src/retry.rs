//! Bounded retry of store writes that hit version conflicts.

use std::future::Future;
use std::time::Duration;

use meshplace_core::config::RetryConfig;
use rand::Rng;
use tracing::debug;

use crate::error::StoreResult;

/// Backoff policy: `steps` attempts, sleeping `duration * factor^n` plus up
/// to `jitter * delay` between them, optionally capped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub cap: Option<Duration>,
}

/// Profile used for conflict retries.
pub const DEFAULT_RETRY: Backoff = Backoff {
    steps: 5,
    duration: Duration::from_millis(10),
    factor: 1.0,
    jitter: 0.1,
    cap: None,
};

impl Default for Backoff {
    fn default() -> Self {
        DEFAULT_RETRY
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Self {
            steps: config.steps,
            duration: Duration::from_millis(config.duration_ms),
            factor: config.factor,
            jitter: config.jitter,
            cap: config.cap_ms.map(Duration::from_millis),
        }
    }
}

impl Backoff {
    /// Un-jittered delay before attempt `step + 1`.
    pub fn base_delay(&self, step: u32) -> Duration {
        let factor = if self.factor > 0.0 { self.factor } else { 1.0 };
        let millis = self.duration.as_millis() as f64 * factor.powi(step as i32);
        let delay = Duration::from_millis(millis.min(u64::MAX as f64) as u64);
        match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Delay with jitter applied.
    pub fn delay(&self, step: u32) -> Duration {
        let base = self.base_delay(step);
        if !self.jitter.is_finite() || self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(0.0..=self.jitter);
        let extra = Duration::try_from_secs_f64(base.as_secs_f64() * spread).unwrap_or(Duration::MAX);
        base.saturating_add(extra)
    }
}

/// Run `operation` until it succeeds, fails with something other than a
/// conflict, or `backoff.steps` attempts are used up. The last error is
/// returned on exhaustion.
pub async fn retry_on_conflict<F, Fut, T>(backoff: &Backoff, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() && attempt < steps => {
                let delay = backoff.delay(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after conflict");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::StoreError;

    fn conflict() -> StoreError {
        StoreError::Conflict {
            key: "default/shop".to_string(),
            reason: "stale".to_string(),
        }
    }

    fn fast() -> Backoff {
        Backoff {
            duration: Duration::from_millis(1),
            ..DEFAULT_RETRY
        }
    }

    #[test]
    fn base_delay_grows_by_factor_and_respects_cap() {
        let backoff = Backoff {
            steps: 5,
            duration: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.0,
            cap: Some(Duration::from_millis(50)),
        };
        assert_eq!(backoff.base_delay(0), Duration::from_millis(10));
        assert_eq!(backoff.base_delay(2), Duration::from_millis(40));
        assert_eq!(backoff.base_delay(3), Duration::from_millis(50));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
    }

    #[test]
    fn uncapped_growth_saturates() {
        let backoff = Backoff {
            steps: 200,
            duration: Duration::from_secs(1),
            factor: 10.0,
            jitter: 1.0,
            cap: None,
        };
        let delay = backoff.delay(150);
        assert!(delay >= backoff.base_delay(150));
        assert_eq!(backoff.base_delay(150), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let delay = DEFAULT_RETRY.delay(0);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(11));
        }
    }

    #[test]
    fn config_maps_onto_backoff() {
        let backoff = Backoff::from(&RetryConfig::default());
        assert_eq!(backoff, DEFAULT_RETRY);
    }

    #[tokio::test]
    async fn succeeds_after_transient_conflicts() {
        let calls = Cell::new(0);
        let result = retry_on_conflict(&fast(), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { if n < 3 { Err(conflict()) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_all_steps() {
        let calls = Cell::new(0);
        let result: StoreResult<()> = retry_on_conflict(&fast(), || {
            calls.set(calls.get() + 1);
            async { Err(conflict()) }
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: StoreResult<()> = retry_on_conflict(&fast(), || {
            calls.set(calls.get() + 1);
            async { Err(StoreError::Unavailable("down".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.get(), 1);
    }
}
