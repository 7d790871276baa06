// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Database readiness polling against the local Patroni REST API.

use crate::constants::{
    DEFAULT_PATRONI_URL, PATRONI_STATE_RUNNING, READINESS_POLL_INTERVAL_SECS,
    READINESS_TIMEOUT_SECS,
};
use crate::errors::WaitError;
use crate::wait::{wait_for, WaitOutcome, WaitPolicy};
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Per-request timeout for the status endpoint
const PATRONI_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Source of the database's reported state.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Current state string, e.g. `"running"` or `"starting"`.
    ///
    /// # Errors
    ///
    /// Any transport, status or decode failure. Callers treat these as transient.
    async fn state(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct PatroniStatus {
    state: String,
}

/// Client for `GET /patroni`.
#[derive(Clone, Debug)]
pub struct PatroniClient {
    http: reqwest::Client,
    url: String,
}

impl PatroniClient {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PATRONI_REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build Patroni HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// Client for the default local endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn local() -> Result<Self> {
        Self::new(DEFAULT_PATRONI_URL)
    }
}

#[async_trait]
impl HealthCheck for PatroniClient {
    async fn state(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            bail!("GET {} returned HTTP {status}", self.url);
        }

        let body: PatroniStatus = response
            .json()
            .await
            .with_context(|| format!("failed to decode response from {}", self.url))?;
        Ok(body.state)
    }
}

/// Readiness policy: poll every 2s, fail after 5 minutes.
#[must_use]
pub fn default_readiness_policy() -> WaitPolicy {
    WaitPolicy::fatal(
        Duration::from_secs(READINESS_POLL_INTERVAL_SECS),
        Duration::from_secs(READINESS_TIMEOUT_SECS),
    )
}

/// Block until the database reports `"running"`.
///
/// # Errors
///
/// [`WaitError::TimedOut`] if the policy is fatal and the deadline passes.
pub async fn wait_for_database<H>(health: &H, policy: &WaitPolicy) -> Result<(), WaitError>
where
    H: HealthCheck + ?Sized,
{
    info!(timeout = ?policy.timeout, "Waiting for database to report running");

    let outcome = wait_for("database to report running", policy, || async {
        match health.state().await {
            Ok(state) if state == PATRONI_STATE_RUNNING => true,
            Ok(state) => {
                debug!(state = %state, "Database not running yet");
                false
            }
            Err(e) => {
                debug!(error = %e, "Readiness probe failed");
                false
            }
        }
    })
    .await?;

    if outcome == WaitOutcome::Ready {
        info!("Database is running");
    }
    Ok(())
}

#[cfg(test)]
#[path = "readiness_tests.rs"]
mod readiness_tests;
