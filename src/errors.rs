// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the sidecar core.
//!
//! The sidecar distinguishes three classes of failure:
//!
//! - **Fatal** - the process exits non-zero and the kubelet restarts it
//!   ([`BootstrapError`], [`ConfigError`], a fatal [`WaitError`])
//! - **Transient** - retried in place ([`SqlError::Transient`], [`StoreError::Conflict`])
//! - **Best-effort** - logged and skipped (user bootstrap SQL, [`DbOpsError`])

use thiserror::Error;

/// Errors returned by the SQL executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    /// The server rejected the statement (psql exit code 1). Never retried.
    #[error("SQL error executing '{statement}': {stderr}")]
    Semantic {
        /// Statement that failed
        statement: String,
        /// Captured client error output
        stderr: String,
    },

    /// Connection or client failure (any other non-zero exit, or spawn failure).
    #[error("transient failure executing '{statement}': {message}")]
    Transient {
        /// Statement that failed
        statement: String,
        /// Captured error output or spawn error
        message: String,
    },

    /// Every attempt failed transiently.
    #[error("failed to execute '{statement}' after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Statement that failed
        statement: String,
        /// Attempts made
        attempts: u32,
        /// Error output of the final attempt
        last_error: String,
    },
}

impl SqlError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, SqlError::Transient { .. })
    }
}

/// Errors returned by annotation stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// A concurrent writer updated the object between our read and write.
    #[error("conflicting update on {kind} {namespace}/{name}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// A conditional update kept losing races.
    #[error("gave up updating '{key}' on {kind} {namespace}/{name} after {attempts} attempts")]
    RetriesExhausted {
        kind: &'static str,
        namespace: String,
        name: String,
        key: String,
        attempts: u32,
    },

    /// Any other API server error.
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

/// Errors that abort the bootstrap state machine.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Labels match no known role.
    #[error("BGCluster '{cluster}' is part of a sharded cluster but role label is {role:?}")]
    UnresolvableRole {
        /// Cluster name
        cluster: String,
        /// Value of the role label, if any
        role: Option<String>,
    },

    /// A system bootstrap statement (Citus setup) failed.
    #[error("system bootstrap failed on '{cluster}': {source}")]
    SystemSql {
        cluster: String,
        #[source]
        source: SqlError,
    },

    /// The marker annotations could not be written.
    #[error("failed to persist bootstrap marker on '{cluster}': {source}")]
    Marker {
        cluster: String,
        #[source]
        source: StoreError,
    },

    /// The database never became ready.
    #[error(transparent)]
    Readiness(#[from] WaitError),
}

/// Errors raised by the operation dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbOpsError {
    /// Operation name is not one of restart, backup, benchmark, repack, vacuum.
    #[error("unknown dbops operation '{0}'")]
    UnknownOperation(String),

    /// `dbops-in-progress` is missing while a restart needs the `BGDbOps` name.
    #[error("no BGDbOps recorded as in progress on BGCluster '{0}'")]
    MissingInProgress(String),
}

/// Wait primitive failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// A fatal wait reached its deadline.
    #[error("timed out after {timeout_secs}s waiting for {what}")]
    TimedOut {
        /// Human-readable description of the awaited condition
        what: String,
        /// Deadline in seconds
        timeout_secs: u64,
    },
}

/// Configuration errors, always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// The pod does not carry the label naming its cluster.
    #[error("pod '{pod}' has no '{label}' label")]
    MissingClusterLabel { pod: String, label: &'static str },

    /// `spec.image.command` is empty.
    #[error("BGCluster '{0}' has no image command")]
    EmptyCommand(String),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
