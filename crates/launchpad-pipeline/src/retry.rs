//! Retry classification and backoff for initialization steps.
//!
//! [`ErrorClassifier`] decides whether a failed step is worth another attempt
//! and how long to wait first. Attempt numbers passed to it count the failures
//! seen so far, so the first failure is attempt 1.

use std::time::Duration;

use chrono::{DateTime, Utc};
use launchpad_types::{ErrorKind, LaunchpadError};
use rand::Rng;

use crate::config::RetryConfig;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max, with symmetric jitter.
    Exponential {
        base: Duration,
        max: Duration,
        jitter: f64,
    },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Deterministic delay for a given attempt number (0-indexed), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max, .. } => {
                let millis = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// Delay with jitter applied. Never exceeds the cap.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Exponential { max, jitter, .. } if *jitter > 0.0 => {
                let delay = self.delay_for_attempt(attempt).as_millis() as f64;
                let factor = 1.0 + rand::thread_rng().gen_range(-*jitter..=*jitter);
                let millis = (delay * factor).max(0.0) as u64;
                Duration::from_millis(millis).min(*max)
            }
            _ => self.delay_for_attempt(attempt),
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(2_000),
            max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub kind: ErrorKind,
}

impl RetryDecision {
    fn give_up(kind: ErrorKind) -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            kind,
        }
    }
}

/// Pure retry policy: the same error, attempt, and clock always yield the
/// same decision, apart from jitter.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_attempts: u32,
    backoff: BackoffPolicy,
    rate_limit_fallback: Duration,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl ErrorClassifier {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts,
            backoff,
            rate_limit_fallback: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(config.base_delay_ms),
                max: Duration::from_millis(config.max_delay_ms),
                jitter: config.jitter,
            },
            rate_limit_fallback: Duration::from_millis(config.rate_limit_fallback_ms),
        }
    }

    pub fn with_rate_limit_fallback(mut self, fallback: Duration) -> Self {
        self.rate_limit_fallback = fallback;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn decide(&self, error: &LaunchpadError, attempt: u32) -> RetryDecision {
        self.decide_at(error, attempt, Utc::now())
    }

    /// Classify `error` after `attempt` failures, measuring rate-limit resets from `now`.
    pub fn decide_at(
        &self,
        error: &LaunchpadError,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let kind = error.kind();
        if attempt >= self.max_attempts || !kind.is_retryable() {
            return RetryDecision::give_up(kind);
        }

        let delay = if kind == ErrorKind::RateLimit {
            match error.rate_limit_reset() {
                // A reset already in the past means capacity is back.
                Some(reset) => (reset - now).to_std().unwrap_or(Duration::ZERO),
                None => self.rate_limit_fallback,
            }
        } else {
            self.backoff.jittered_delay(attempt.saturating_sub(1))
        };

        RetryDecision {
            should_retry: true,
            delay,
            kind,
        }
    }
}
