// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential-backoff retry with jitter, driven off a step's declared
//! [`crate::workflow::RetryConfig`].

use crate::context::CancellationToken;
use crate::error::OrchestratorError;
use crate::workflow::{BackoffStrategy, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// A resolved retry policy: initial delay, growth multiplier, and a cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self { max_attempts, initial_delay, multiplier, max_delay }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let multiplier = match config.backoff {
            BackoffStrategy::Exponential => 2.0,
            BackoffStrategy::Linear => 1.0,
            BackoffStrategy::Constant => 0.0,
        };
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// `baseDelay · 2^attempt` (or `attempt · baseDelay` for linear, or a
    /// flat `baseDelay` for constant), capped at `max_delay`, with up to
    /// 20% jitter applied on top.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_millis = self.initial_delay.as_millis() as f64;
        let raw = if self.multiplier == 0.0 {
            base_millis
        } else if (self.multiplier - 1.0).abs() < f64::EPSILON {
            base_millis * (attempt as f64 + 1.0)
        } else {
            base_millis * self.multiplier.powi(attempt as i32)
        };
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let jitter_fraction = rand::thread_rng().gen_range(0.0..0.2);
        let jittered = capped * (1.0 + jitter_fraction);
        Duration::from_millis(jittered.round() as u64)
    }
}

/// Drives `operation` through [`RetryPolicy`], redispatching on a
/// retryable [`OrchestratorError`] and sleeping between attempts. Checks
/// the cancellation signal before every retry sleep so a cancelled run
/// doesn't keep retrying in the background.
pub struct RetryExecutor {
    policy: RetryPolicy,
}

/// Outcome of a retried operation: the final result plus how many retries
/// (attempts beyond the first) were consumed.
pub struct RetryOutcome<T> {
    pub result: Result<T, OrchestratorError>,
    pub retry_count: u32,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn execute<F, Fut, T>(&self, cancellation: &CancellationToken, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancellation.is_cancelled() {
                return RetryOutcome { result: Err(OrchestratorError::Cancelled), retry_count: attempt };
            }
            let outcome = operation().await;
            match outcome {
                Ok(value) => return RetryOutcome { result: Ok(value), retry_count: attempt },
                Err(err) if err.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancellation.cancelled() => {
                            return RetryOutcome { result: Err(OrchestratorError::Cancelled), retry_count: attempt };
                        }
                    }
                    attempt += 1;
                }
                Err(err) => return RetryOutcome { result: Err(err), retry_count: attempt },
            }
        }
    }
}
