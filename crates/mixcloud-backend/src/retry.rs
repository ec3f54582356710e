//! Retry policy: exponential backoff with jitter, server retry hints, and
//! cancellable sleeps.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{ApiError, OAuthError};

/// Longest wait a server retry hint may impose
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(300);

/// Upper bound of the jitter added on top of a server retry hint
pub const HINT_JITTER: Duration = Duration::from_millis(500);

/// Backoff and attempt limits for retrying requests
///
/// `attempt` is always 0-based: attempt 0 is the first retry delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of attempts allowed before giving up
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the computed delay (0.25 = ±25%)
    pub jitter: f64,
    /// Floor applied after jitter
    pub min_delay: Duration,
    /// Cap applied to server retry hints
    pub max_hint: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            min_delay: Duration::from_millis(100),
            max_hint: MAX_RETRY_HINT,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Deterministic exponential delay: `min(base * multiplier^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped.max(0.0))
        } else {
            self.max_delay
        }
    }

    /// Delay before the next attempt
    ///
    /// A positive server hint overrides the exponential computation entirely
    /// and is capped at `max_hint`; otherwise the backoff gets ±`jitter`
    /// applied and is floored at `min_delay`.
    pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut rng = rand::thread_rng();
        let spread = rng.gen_range(-1.0..=1.0);
        let unit = rng.gen_range(0.0..=1.0);
        self.next_delay_with(attempt, retry_after, spread, unit)
    }

    /// `next_delay` with explicit random factors, `spread` in [-1, 1] for
    /// backoff jitter and `unit` in [0, 1] for hint jitter
    pub(crate) fn next_delay_with(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        spread: f64,
        unit: f64,
    ) -> Duration {
        if let Some(hint) = retry_after.filter(|h| !h.is_zero()) {
            let jitter = HINT_JITTER.mul_f64(unit.clamp(0.0, 1.0));
            return (hint + jitter).min(self.max_hint);
        }

        let delay = self.backoff(attempt).as_secs_f64();
        let jittered = delay + delay * self.jitter * spread.clamp(-1.0, 1.0);
        Duration::from_secs_f64(jittered.max(0.0)).max(self.min_delay)
    }

    /// Whether a failed attempt should be retried
    ///
    /// Always false once `attempt >= max_attempts`; below the ceiling the
    /// error's own retryable flag decides.
    pub fn should_retry(&self, error: &OAuthError, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// `should_retry` for operation-level errors; passthrough errors are terminal
    pub fn should_retry_api(&self, error: &ApiError, attempt: u32) -> bool {
        error
            .as_oauth()
            .is_some_and(|e| self.should_retry(e, attempt))
    }
}

/// Parses a `Retry-After` value, either delay-seconds or an HTTP-date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = at.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO);
    Some(wait)
}

/// Resolves once the cancellation flag is set. Never resolves if the sender
/// is dropped without cancelling.
pub async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Returns true if the cancellation flag is currently set
pub fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Sleeps for `delay` unless cancellation fires first
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), OAuthError> {
    if is_cancelled(cancel) {
        return Err(OAuthError::cancelled());
    }

    tokio::select! {
        () = tokio::time::sleep(delay) => Ok(()),
        () = wait_for_cancel(cancel) => Err(OAuthError::cancelled()),
    }
}

/// A cancellation receiver that never fires
pub fn never_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Dropping the sender leaves the flag permanently false
    drop(tx);
    rx
}
