//! Bounded polling for externally observable state
//!
//! Both wait points of the harness (mempool membership and UTXO visibility)
//! go through [`wait_until`], so they share one timeout policy.

use crate::error::Error;
use std::time::{Duration, Instant};

/// Upper bound and re-check interval for a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_millis(250),
        }
    }
}

/// Re-run `check` until it yields a value or the policy's timeout elapses.
///
/// # Arguments
/// * `policy` - Timeout and interval
/// * `condition` - What is being waited for, used in logs and the timeout error
/// * `check` - Returns `Ok(Some(v))` when the condition holds, `Ok(None)` to keep waiting
///
/// Errors from `check` abort the wait immediately.
pub fn wait_until<T, F>(policy: &PollPolicy, condition: &str, mut check: F) -> Result<T, Error>
where
    F: FnMut() -> Result<Option<T>, Error>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Some(value) = check()? {
            log::debug!("{} after {} attempt(s)", condition, attempt);
            return Ok(value);
        }
        let waited = start.elapsed();
        if waited >= policy.timeout {
            return Err(Error::FundingTimeout {
                condition: condition.to_string(),
                waited,
            });
        }
        log::debug!("Waiting for {} (attempt {})", condition, attempt);
        std::thread::sleep(policy.interval.min(policy.timeout - waited));
    }
}
