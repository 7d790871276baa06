// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! SQL execution against the local PostgreSQL instance.
//!
//! [`SqlRunner`] makes one attempt at one statement and classifies the
//! failure. [`SqlExecutor`] layers the retry policy and list semantics on top:
//!
//! - semantic errors (psql exit code 1) are returned immediately
//! - transient errors are retried up to `max_attempts` in total, `retry_interval` apart
//! - a list stops at the first failing statement

use crate::constants::{
    DEFAULT_PSQL_BIN, DEFAULT_PSQL_USER, PSQL_SQL_ERROR_EXIT_CODE, SQL_MAX_ATTEMPTS,
    SQL_RETRY_INTERVAL_SECS,
};
use crate::errors::SqlError;
use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One attempt at one statement.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    /// Execute `statement` once.
    ///
    /// # Errors
    ///
    /// [`SqlError::Semantic`] or [`SqlError::Transient`]; never `RetriesExhausted`.
    async fn run(&self, statement: &str) -> Result<(), SqlError>;
}

/// Runs statements through the `psql` client as the superuser.
#[derive(Clone, Debug)]
pub struct PsqlRunner {
    bin: String,
    user: String,
}

impl PsqlRunner {
    #[must_use]
    pub fn new(bin: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            user: user.into(),
        }
    }
}

impl Default for PsqlRunner {
    fn default() -> Self {
        Self::new(DEFAULT_PSQL_BIN, DEFAULT_PSQL_USER)
    }
}

#[async_trait]
impl SqlRunner for PsqlRunner {
    async fn run(&self, statement: &str) -> Result<(), SqlError> {
        let output = Command::new(&self.bin)
            .args(["-U", &self.user, "-c", statement])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SqlError::Transient {
                statement: statement.to_string(),
                message: format!("failed to spawn {}: {e}", self.bin),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(PSQL_SQL_ERROR_EXIT_CODE) => Err(SqlError::Semantic {
                statement: statement.to_string(),
                stderr,
            }),
            code => Err(SqlError::Transient {
                statement: statement.to_string(),
                message: format!("exit code {code:?}: {stderr}"),
            }),
        }
    }
}

/// Retry policy and list semantics over a [`SqlRunner`].
#[derive(Clone)]
pub struct SqlExecutor {
    runner: Arc<dyn SqlRunner>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl SqlExecutor {
    /// Executor with the default policy: 5 attempts, 5 seconds apart.
    #[must_use]
    pub fn new(runner: Arc<dyn SqlRunner>) -> Self {
        Self::with_policy(
            runner,
            SQL_MAX_ATTEMPTS,
            Duration::from_secs(SQL_RETRY_INTERVAL_SECS),
        )
    }

    #[must_use]
    pub fn with_policy(
        runner: Arc<dyn SqlRunner>,
        max_attempts: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            runner,
            max_attempts: max_attempts.max(1),
            retry_interval,
        }
    }

    /// Execute one statement with retries on transient failure.
    ///
    /// # Errors
    ///
    /// [`SqlError::Semantic`] on the first semantic failure, or
    /// [`SqlError::RetriesExhausted`] once every attempt failed transiently.
    pub async fn execute(&self, statement: &str) -> Result<(), SqlError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.runner.run(statement).await {
                Ok(()) => {
                    debug!(statement = statement, attempt = attempt, "SQL statement executed");
                    metrics::record_sql_statement("success");
                    return Ok(());
                }
                Err(SqlError::Transient { message, .. }) => {
                    warn!(
                        statement = statement,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %message,
                        "Transient SQL failure"
                    );
                    last_error = message;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_interval).await;
                    }
                }
                Err(e) => {
                    metrics::record_sql_statement("semantic_error");
                    return Err(e);
                }
            }
        }

        metrics::record_sql_statement("retries_exhausted");
        Err(SqlError::RetriesExhausted {
            statement: statement.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }

    /// Execute statements in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// The error of the first failing statement; later statements are not run.
    pub async fn execute_all<S: AsRef<str>>(&self, statements: &[S]) -> Result<(), SqlError> {
        for statement in statements {
            self.execute(statement.as_ref()).await?;
        }
        if !statements.is_empty() {
            info!(count = statements.len(), "Executed SQL statements");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "sql_tests.rs"]
mod sql_tests;
