//! Fixed-backoff retry engine shared by every network fetch.
//!
//! One *round* tries each candidate endpoint once, in order. The first
//! structurally successful attempt wins. After a round where every endpoint
//! failed the caller's thread sleeps for the backoff, then the next round
//! starts. No sleep follows the final round.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::error::{AttemptError, FetchError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_rounds: u32,
    pub per_request_timeout: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_rounds: u32, per_request_timeout: Duration, backoff: Duration) -> Self {
        Self {
            max_rounds,
            per_request_timeout,
            backoff,
        }
    }
}

/// Blocks the calling thread. Abstracted so tests can count sleeps.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Cooperative cancellation shared between the fetcher and whoever wants
/// to abort it. Checked before every attempt and after every backoff.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Run `attempt` against `endpoints` under `policy`.
///
/// `attempt` receives the endpoint and the per-request timeout. On
/// exhaustion the error carries the number of attempts made and the last
/// attempt's failure.
pub fn fetch_with_retry<E, T, S, F>(
    label: &'static str,
    endpoints: &[E],
    policy: &RetryPolicy,
    sleeper: &mut S,
    cancel: &CancelFlag,
    mut attempt: F,
) -> Result<T, FetchError>
where
    E: Display,
    S: Sleeper + ?Sized,
    F: FnMut(&E, Duration) -> Result<T, AttemptError>,
{
    let mut attempts: u32 = 0;
    let mut last: Option<AttemptError> = None;

    if endpoints.is_empty() {
        warn!("{}: no endpoints configured", label);
        return Err(FetchError::RetryBudgetExhausted {
            label,
            attempts,
            last,
        });
    }

    for round in 0..policy.max_rounds {
        if round > 0 {
            info!(
                "{}: round {}/{} failed, backing off {:?}",
                label, round, policy.max_rounds, policy.backoff
            );
            sleeper.sleep(policy.backoff);
        }

        for endpoint in endpoints {
            if cancel.is_cancelled() {
                warn!("{}: cancelled after {} attempts", label, attempts);
                return Err(FetchError::Cancelled { label, attempts });
            }
            attempts += 1;
            match attempt(endpoint, policy.per_request_timeout) {
                Ok(value) => {
                    info!("{}: ok via {} (attempt {})", label, endpoint, attempts);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{}: {} failed (attempt {}): {}", label, endpoint, attempts, e);
                    last = Some(e);
                }
            }
        }
    }

    warn!("{}: giving up after {} attempts", label, attempts);
    Err(FetchError::RetryBudgetExhausted {
        label,
        attempts,
        last,
    })
}
