//! Bounded exponential backoff around ledger calls
//!
//! Only transient failures are retried. Authorization failures and
//! rejections surface on the first attempt.

use std::future::Future;
use std::time::Duration;

use shade_core::config::LedgerConfig;
use shade_core::{ShadeError, ShadeResult};
use tracing::{debug, warn};

use crate::ledger::LedgerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(config.base_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// No sleeping between attempts, for tests and local ledgers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> ShadeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(op, attempt, "ledger call recovered");
                }
                return Ok(v);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(op, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient ledger failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                warn!(op, attempts, error = %e, "ledger unavailable, retries exhausted");
                return Err(ShadeError::LedgerUnavailable {
                    attempts,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(4), Duration::from_millis(500));
        assert_eq!(p.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_from_config_counts_first_attempt() {
        let cfg = LedgerConfig {
            max_retries: 2,
            ..LedgerConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&cfg).max_attempts, 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), "scan", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::Transport("connection reset".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_ledger_unavailable() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&RetryPolicy::immediate(2), "scan", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LedgerError::Timeout(Duration::from_secs(1)))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ShadeError::LedgerUnavailable { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&RetryPolicy::immediate(5), "mark_read", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LedgerError::Unauthorized("not recipient".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ShadeError::Unauthorized(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
