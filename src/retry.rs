//! Reconnect backoff and timeout utilities.
//!
//! The helpers in this module are transport-agnostic. The session worker uses
//! [`ReconnectPolicy`] to space out reconnect attempts and [`with_timeout`] to
//! bound websocket handshakes.

use std::future::Future;
use std::time::Duration;

/// Policy controlling reconnect attempts and exponential backoff behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay used before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Computes the delay to apply before a reconnect attempt.
    ///
    /// `prior_attempts` is the number of attempts already made since the last
    /// successful welcome, so the first retry waits exactly `base_delay`.
    pub fn delay_for_attempt(&self, prior_attempts: u32) -> Duration {
        let mut delay = self.base_delay;
        for _ in 0..prior_attempts {
            if delay >= self.max_delay {
                break;
            }
            delay = delay.saturating_mul(2);
        }
        std::cmp::min(delay, self.max_delay)
    }

    /// Returns true once `attempts` has used up the retry budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}
