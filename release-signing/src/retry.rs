// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Retrying of fallible asynchronous operations. */

use {
    crate::error::Result,
    log::warn,
    rand::Rng,
    std::{future::Future, time::Duration},
};

/// Exponential backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Base delay, in seconds, before the second attempt.
    pub delay_factor: f64,
    /// Maximum random fraction added on top of each delay.
    pub randomization_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_factor: 2.0,
            randomization_factor: 0.5,
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// A policy retrying the given number of times without sleeping.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay_factor: 0.0,
            randomization_factor: 0.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the given (1-based) attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 2).min(32) as i32;
        let jitter = if self.randomization_factor > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.randomization_factor)
        } else {
            0.0
        };

        let seconds = self.delay_factor * 2f64.powi(exponent) * (1.0 + jitter);

        Duration::from_secs_f64(seconds.max(0.0)).min(self.max_delay)
    }

    /// Run an operation until it succeeds or attempts are exhausted.
    ///
    /// The error of the last attempt is returned.
    pub async fn retry<T, F, Fut>(&self, description: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts.max(1) => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(
                        "{} failed: {}; retrying in {:.1}s (attempt {}/{})",
                        description,
                        err,
                        delay.as_secs_f64(),
                        attempt,
                        self.attempts
                    );

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
