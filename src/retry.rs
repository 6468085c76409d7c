//! Bounded retries with exponential backoff and jitter.
//!
//! Scraping public portals is unreliable: navigations time out, selectors
//! appear late, CDNs throttle. Every network-touching adapter call is wrapped
//! by [`RetryPolicy::run`], which retries transient failures and gives up
//! immediately on terminal ones (see [`Classify`]).
//!
//! # Backoff Strategy
//!
//! Before attempt `n + 1` the policy sleeps for
//!
//! ```text
//! delay = base_delay * 1.5^(n-1) * jitter,   jitter uniform in [1.0, 1.5]
//! ```
//!
//! The jitter desynchronizes concurrent pipelines and keeps the request
//! pattern less regular towards the target sites.
//!
//! The policy holds no mutable state, so nested or parallel calls are safe.

use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, instrument, warn};

use crate::error::Classify;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: StdDuration = StdDuration::from_millis(2000);

const GROWTH: f64 = 1.5;
const MAX_JITTER: f64 = 1.5;

/// How a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The error was classified terminal; it was attempted once.
    #[error("{0}")]
    Terminal(E),
    /// Every attempt failed with a transient error; `last` is the final one.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Retry settings. Cheap to copy; carries no per-call state.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below 1.
    max_attempts: u32,
    /// Delay before the second attempt, before jitter.
    base_delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: StdDuration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Un-jittered delay scheduled after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> StdDuration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base_delay.mul_f64(GROWTH.powi(exponent))
    }

    fn jittered(&self, attempt: u32) -> StdDuration {
        let factor: f64 = rng().random_range(1.0..=MAX_JITTER);
        self.backoff(attempt).mul_f64(factor)
    }

    /// Run `operation` until it succeeds, fails terminally, or runs out of attempts.
    ///
    /// `label` only appears in logs.
    #[instrument(level = "debug", skip_all, fields(%label))]
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + fmt::Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let e = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
            let elapsed_ms_total = total_t0.elapsed().as_millis();

            if e.is_terminal() {
                warn!(attempt, elapsed_ms_attempt, error = %e, "{label} failed terminally; not retrying");
                return Err(RetryError::Terminal(e));
            }

            if attempt >= self.max_attempts {
                error!(
                    attempt,
                    max = self.max_attempts,
                    elapsed_ms_total,
                    error = %e,
                    "{label} exhausted retries"
                );
                return Err(RetryError::Exhausted { attempts: attempt, last: e });
            }

            let delay = self.jittered(attempt);
            warn!(
                attempt,
                max = self.max_attempts,
                elapsed_ms_attempt,
                elapsed_ms_total,
                ?delay,
                error = %e,
                "{label} attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }
}
