//! Exponential-backoff retry wrapper applied to remote calls.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{Instant, sleep};

use crate::error::DtError;
use crate::utils::expo_backoff;

/// Environment override for the maximum number of retry attempts.
pub const MAX_TRIES_ENV: &str = "DT_CLIENT_RETRY_MAX_TRIES";
/// Environment override for the maximum total retry duration, in seconds.
pub const MAX_TIME_ENV: &str = "DT_CLIENT_RETRY_MAX_TIME";

const DEFAULT_MAX_TRIES: u32 = 40;
const DEFAULT_MAX_TIME: Duration = Duration::from_secs(300);

/// Bounds and pacing for retried remote calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_tries: u32,
    pub max_time: Duration,
    /// First backoff interval; doubles per attempt under full jitter.
    pub base: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_tries: DEFAULT_MAX_TRIES,
            max_time: DEFAULT_MAX_TIME,
            base: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Build the policy from built-in defaults plus the two environment
    /// knobs, read once here. Unset or unparsable values fall back silently
    /// to the defaults.
    pub fn from_env() -> Self {
        let mut policy = RetryPolicy::default();
        if let Ok(v) = std::env::var(MAX_TRIES_ENV) {
            match v.parse::<u32>() {
                Ok(n) => policy.max_tries = n,
                Err(_) => warn!("Ignoring unparsable {MAX_TRIES_ENV}={v}"),
            }
        }
        if let Ok(v) = std::env::var(MAX_TIME_ENV) {
            match v.parse::<f64>() {
                Ok(s) if s > 0.0 => policy.max_time = Duration::from_secs_f64(s),
                _ => warn!("Ignoring unparsable {MAX_TIME_ENV}={v}"),
            }
        }
        policy
    }
}

/// Run `f` until it succeeds, a give-up classified error occurs, or the
/// policy bounds are exhausted.
///
/// Connection-level errors ignore the attempt cap (the worker may still be
/// starting); `max_time` is the only hard stop for them.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut f: F) -> Result<T, DtError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DtError>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match f().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        if err.give_up() {
            debug!("Giving up on {what} after {attempt} tries: {err}");
            return Err(err);
        }
        let out_of_tries = attempt >= policy.max_tries && !err.retry_forever();
        if out_of_tries || start.elapsed() >= policy.max_time {
            return Err(err);
        }

        let mut wait = expo_backoff(policy.base, attempt, policy.max_time, policy.jitter);
        let remaining = policy.max_time.saturating_sub(start.elapsed());
        if wait > remaining {
            wait = remaining;
        }
        info!(
            "Backing off {:.1} seconds after {attempt} tries of {what}: {err}",
            wait.as_secs_f64()
        );
        debug!("Backoff caused by: {err:?}");
        sleep(wait).await;
    }
}
