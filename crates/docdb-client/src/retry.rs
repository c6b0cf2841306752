use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{DocDbError, DocDbResult, ErrorKind};
use crate::headers;
use crate::types::Request;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryBackoffConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryBackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Ceiling on wall time spent across attempts and backoff sleeps.
    pub max_elapsed_ms: u64,
    pub backoff: RetryBackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            max_elapsed_ms: 30_000,
            backoff: RetryBackoffConfig::default(),
        }
    }
}

/// Bookkeeping for one logical operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryContext {
    /// Attempts made so far, including the one that just failed.
    pub attempt: u32,
    pub elapsed: Duration,
    pub last_error_kind: Option<ErrorKind>,
    pub last_retry_after: Option<Duration>,
    /// Spreads the jittered backoff of this operation.
    pub jitter_seed: u64,
}

impl RetryContext {
    fn new() -> Self {
        Self {
            attempt: 0,
            elapsed: Duration::ZERO,
            last_error_kind: None,
            last_retry_after: None,
            jitter_seed: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        clear_session_token: bool,
    },
    Fail,
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff the policy computes for the retry following `attempt`, before
    /// any server hint is taken into account.
    pub fn backoff_for_attempt(&self, attempt: u32, jitter_seed: u64) -> Duration {
        self.backoff.delay(attempt, jitter_seed)
    }

    pub fn decide(&self, context: &RetryContext, error: &DocDbError) -> RetryDecision {
        if !error.is_retryable() || context.attempt >= self.max_attempts {
            return RetryDecision::Fail;
        }
        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.backoff_for_attempt(context.attempt, context.jitter_seed));
        if context.elapsed + delay > Duration::from_millis(self.max_elapsed_ms) {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry {
            delay,
            clear_session_token: error.kind() == ErrorKind::StaleSession,
        }
    }
}

impl RetryBackoffConfig {
    /// Exponential delay for `attempt` (1-based), capped at `max_delay_ms`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let steps = attempt.saturating_sub(1);
        let scaled = self.initial_delay_ms as f64 * self.backoff_factor.powf(f64::from(steps));
        Duration::from_millis(scaled.min(self.max_delay_ms as f64) as u64)
    }

    /// `base_delay` scaled into `[0.5, 1.5)` when jitter is on.
    pub fn delay(&self, attempt: u32, jitter_seed: u64) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        base.mul_f64(0.5 + jitter_unit(jitter_seed, attempt))
    }
}

/// Uniform value in `[0, 1)` drawn from the seed and attempt number.
fn jitter_unit(jitter_seed: u64, attempt: u32) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&jitter_seed.to_le_bytes());
    hasher.update(&attempt.to_le_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    // Top 53 bits fill an f64 mantissa exactly.
    (u64::from_le_bytes(word) >> 11) as f64 / (1u64 << 53) as f64
}

/// Seed shared by every attempt of one operation.
fn jitter_seed_for(request: &Request) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[request.operation as u8]);
    hasher.update(request.path.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// Runs `attempt_fn` until it succeeds, fails terminally, or the policy gives up.
///
/// `attempt_fn` receives the request as it should be sent on that attempt; a
/// stale-session failure strips the session header before the next one.
/// Cancellation is observed before and during every attempt and during every
/// sleep. An attempt that outlives the remaining elapsed budget is abandoned
/// as a transient transport failure.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut request: Request,
    mut attempt_fn: F,
) -> DocDbResult<T>
where
    F: FnMut(Request) -> Fut,
    Fut: Future<Output = DocDbResult<T>>,
{
    let started = Instant::now();
    let mut context = RetryContext {
        jitter_seed: jitter_seed_for(&request),
        ..RetryContext::new()
    };

    loop {
        if cancel.is_cancelled() {
            return Err(DocDbError::Cancelled);
        }
        context.attempt += 1;

        // Each attempt may only use what is left of the elapsed budget.
        let remaining = Duration::from_millis(policy.max_elapsed_ms).saturating_sub(started.elapsed());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(DocDbError::Cancelled),
            outcome = tokio::time::timeout(remaining, attempt_fn(request.clone())) => outcome,
        };
        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => DocDbError::TransientTransport(format!(
                "attempt timed out after {} ms",
                remaining.as_millis()
            )),
        };

        context.elapsed = started.elapsed();
        context.last_error_kind = Some(error.kind());
        context.last_retry_after = error.retry_after();

        match policy.decide(&context, &error) {
            RetryDecision::Fail if !error.is_retryable() => return Err(error),
            RetryDecision::Fail => {
                tracing::warn!(
                    attempt = context.attempt,
                    path = %request.path,
                    error = %error,
                    "retries exhausted"
                );
                return Err(DocDbError::RetriesExhausted {
                    attempts: context.attempt,
                    last: Box::new(error),
                });
            }
            RetryDecision::Retry {
                delay,
                clear_session_token,
            } => {
                if clear_session_token {
                    request.headers.remove(headers::SESSION_TOKEN);
                }
                tracing::debug!(
                    attempt = context.attempt,
                    delay_ms = delay.as_millis() as u64,
                    path = %request.path,
                    error = %error,
                    "retrying request"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DocDbError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
