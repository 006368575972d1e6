//! Retry policy with bounded exponential backoff for transient failures.
//!
//! Delays double per attempt up to a ceiling, with jitter proportional to
//! the delay (up to a quarter of it) so simultaneous failures against one
//! provider don't retry in lockstep. Proportional jitter keeps the delay
//! sequence strictly non-decreasing below the ceiling. Servers that send
//! Retry-After get their mandated delay instead.

use std::time::{Duration, SystemTime};

use rand::Rng;
use tracing::{debug, instrument};

use super::error::FailureKind;

/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Decision on whether to retry a failed transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Configuration for retry behavior.
///
/// Delay formula: `min(base_delay * multiplier^(attempt-1), max_delay)` plus
/// jitter in `[0, delay/4]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    max_attempts: u32,
    /// Base delay for the first retry.
    base_delay: Duration,
    /// Maximum delay cap.
    max_delay: Duration,
    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom attempt cap, defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt cap.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether to retry after `attempt` just failed with `kind`.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::DoNotRetry {
                reason: format!("{kind} failure - retry would not help"),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Calculates the backoff delay for a just-failed attempt (1-indexed).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capped = Duration::from_millis(capped_ms as u64);

        capped + jitter_for(capped)
    }
}

/// Random jitter in `[0, delay/4]`.
///
/// Proportional rather than fixed so the jittered sequence stays
/// monotonic while delays grow: `2d` always exceeds `d + d/4`.
fn jitter_for(delay: Duration) -> Duration {
    let ceiling = (delay.as_millis() as u64) / 4;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=ceiling))
}

/// Parses a Retry-After header value into a delay.
///
/// Accepts both delta-seconds (`"120"`) and HTTP-date forms. Past dates
/// yield a zero delay. Returns `None` for unparseable values.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    Some(
        when.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
