// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Polling wait primitive.
//!
//! Every blocking wait in the sidecar (database readiness, worker
//! initialization, bootstrap markers) goes through [`wait_for`]. Whether a
//! timeout aborts the caller is a property of the call site, carried in
//! [`WaitPolicy::timeout_is_fatal`].

use crate::errors::WaitError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How to poll and what a timeout means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between probes
    pub interval: Duration,
    /// Overall deadline, measured from the first probe
    pub timeout: Duration,
    /// Return [`WaitError::TimedOut`] instead of [`WaitOutcome::TimedOut`]
    pub timeout_is_fatal: bool,
}

impl WaitPolicy {
    /// Policy whose timeout aborts the caller.
    #[must_use]
    pub fn fatal(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            timeout_is_fatal: true,
        }
    }

    /// Policy whose timeout is logged and the caller proceeds.
    #[must_use]
    pub fn lenient(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            timeout_is_fatal: false,
        }
    }
}

/// How a non-failing wait ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

/// Poll `probe` every `policy.interval` until it returns `true` or the deadline passes.
///
/// The probe runs once immediately. The last sleep is shortened so that the
/// final probe lands on the deadline rather than past it.
///
/// # Errors
///
/// [`WaitError::TimedOut`] when the deadline passes and the policy is fatal.
pub async fn wait_for<F, Fut>(
    what: &str,
    policy: &WaitPolicy,
    mut probe: F,
) -> Result<WaitOutcome, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if probe().await {
            debug!(what = what, attempt = attempt, "Wait condition satisfied");
            return Ok(WaitOutcome::Ready);
        }

        let now = Instant::now();
        if now >= deadline {
            let timeout_secs = policy.timeout.as_secs();
            if policy.timeout_is_fatal {
                return Err(WaitError::TimedOut {
                    what: what.to_string(),
                    timeout_secs,
                });
            }
            warn!(
                what = what,
                timeout_secs = timeout_secs,
                "Timed out waiting, proceeding anyway"
            );
            return Ok(WaitOutcome::TimedOut);
        }

        tokio::time::sleep(policy.interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
#[path = "wait_tests.rs"]
mod wait_tests;
