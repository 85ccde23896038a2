//! Retry with exponential backoff
//!
//! Wraps flaky remote calls (server connect, library listing). Sleeping
//! happens on the calling thread, so retried calls belong inside a task
//! submitted to the `TaskManager`.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use crate::config::{
    CRITICAL_RETRY_ATTEMPTS, CRITICAL_RETRY_DELAY, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
    RETRY_BACKOFF_FACTOR,
};
use crate::error::SubsetterError;

/// Error type returned by a retry callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type RetryableFn<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type OnRetryFn<E> = Box<dyn Fn(u32, u32, &E) -> Result<(), CallbackError> + Send + Sync>;

/// How often and how patiently to retry a call
pub struct RetryPolicy<E = SubsetterError> {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    retryable: RetryableFn<E>,
    on_retry: Option<OnRetryFn<E>>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_factor", &self.backoff_factor)
            .finish()
    }
}

impl RetryPolicy<SubsetterError> {
    /// Policy for ordinary remote calls; retries transient errors only
    pub fn standard() -> Self {
        Self::new(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY)
            .retry_if(SubsetterError::is_retryable)
    }

    /// Policy for calls the session cannot proceed without
    pub fn critical() -> Self {
        Self::new(CRITICAL_RETRY_ATTEMPTS, CRITICAL_RETRY_DELAY)
            .retry_if(SubsetterError::is_retryable)
    }
}

impl<E: Display> RetryPolicy<E> {
    /// Retry every error, `max_attempts` times in total
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor: RETRY_BACKOFF_FACTOR,
            retryable: Box::new(|_| true),
            on_retry: None,
        }
    }

    pub fn backoff(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Restrict retries to errors for which `predicate` holds
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Box::new(predicate);
        self
    }

    /// Called with (attempt, max_attempts, error) before each sleep
    pub fn on_retry(
        mut self,
        callback: impl Fn(u32, u32, &E) -> Result<(), CallbackError> + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. The last error is returned unmodified.
    pub fn run<T>(&self, operation: &str, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let mut attempt = 1;
        let mut delay = self.initial_delay;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !(self.retryable)(&e) => {
                    log::debug!("{operation} failed with non-retryable error: {e}");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    log::error!("{operation} failed after {} attempts: {e}", self.max_attempts);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!(
                        "{operation} failed (attempt {attempt}/{}). Retrying in {:.1}s... Error: {e}",
                        self.max_attempts,
                        delay.as_secs_f64()
                    );
                    if let Some(callback) = &self.on_retry {
                        match panic::catch_unwind(AssertUnwindSafe(|| callback(attempt, self.max_attempts, &e))) {
                            Ok(Ok(())) => {}
                            Ok(Err(callback_error)) => log::error!("Retry callback failed: {callback_error}"),
                            Err(_) => log::error!("Retry callback panicked"),
                        }
                    }
                    thread::sleep(delay);
                    delay = delay.mul_f64(self.backoff_factor.max(0.0));
                    attempt += 1;
                }
            }
        }
    }
}
