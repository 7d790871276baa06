// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Bestgres controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Bestgres CRDs
pub const API_GROUP: &str = "bestgres.io";

/// API version for all Bestgres CRDs
pub const API_VERSION: &str = "v1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "bestgres.io/v1";

/// Kind name for `BGCluster` resource
pub const KIND_BG_CLUSTER: &str = "BGCluster";

/// Kind name for `BGShardedCluster` resource
pub const KIND_BG_SHARDED_CLUSTER: &str = "BGShardedCluster";

/// Kind name for `BGDbOps` resource
pub const KIND_BG_DB_OPS: &str = "BGDbOps";

/// Kind name for `BGShardedDbOps` resource
pub const KIND_BG_SHARDED_DB_OPS: &str = "BGShardedDbOps";

// ============================================================================
// PostgreSQL / Citus Constants
// ============================================================================

/// Port every Citus node listens on
pub const POSTGRES_PORT: u16 = 5432;

/// Superuser the sidecar connects as
pub const DEFAULT_PSQL_USER: &str = "postgres";

/// SQL client binary
pub const DEFAULT_PSQL_BIN: &str = "psql";

/// Exit code `psql` returns when the server rejected the statement
pub const PSQL_SQL_ERROR_EXIT_CODE: i32 = 1;

/// Statement enabling the Citus extension on every sharded node
pub const CREATE_CITUS_EXTENSION_SQL: &str = "CREATE EXTENSION IF NOT EXISTS citus;";

/// Suffix of the service a coordinator registers itself under
pub const COORDINATOR_HOST_SUFFIX: &str = "-coordinator";

// ============================================================================
// Patroni / Spilo Constants
// ============================================================================

/// Patroni REST endpoint reporting the local member state
pub const DEFAULT_PATRONI_URL: &str = "http://localhost:8008/patroni";

/// Patroni state that means the database accepts connections
pub const PATRONI_STATE_RUNNING: &str = "running";

/// Spilo bootstrap script patched before the database starts
pub const DEFAULT_SPILO_CONFIG_PATH: &str = "/scripts/configure_spilo.py";

/// File mode the patched Spilo script is written with
pub const SPILO_CONFIG_MODE: u32 = 0o755;

/// Command stopping the Patroni supervisor before a self-restart
pub const DEFAULT_SUPERVISOR_STOP_COMMAND: &str = "sv stop patroni";

// ============================================================================
// Timing Constants
// ============================================================================

/// Grace period after readiness before the first bootstrap statement
pub const BOOTSTRAP_GRACE_PERIOD_SECS: u64 = 5;

/// Interval between Patroni readiness probes
pub const READINESS_POLL_INTERVAL_SECS: u64 = 2;

/// Overall readiness deadline (5 minutes)
pub const READINESS_TIMEOUT_SECS: u64 = 300;

/// Interval between worker initialization checks on the coordinator
pub const WORKER_WAIT_INTERVAL_SECS: u64 = 5;

/// Per-worker initialization deadline (2 minutes)
pub const WORKER_WAIT_TIMEOUT_SECS: u64 = 120;

/// Attempts per SQL statement before giving up on transient failures
pub const SQL_MAX_ATTEMPTS: u32 = 5;

/// Spacing between SQL attempts
pub const SQL_RETRY_INTERVAL_SECS: u64 = 5;

/// Delay between reconciliation loop iterations
pub const RECONCILE_LOOP_INTERVAL_SECS: u64 = 2;

/// Delay after a failed `BGCluster` refresh inside the loop
pub const RECONCILE_ERROR_BACKOFF_SECS: u64 = 5;

/// Attempts for a conditional annotation write before giving up
pub const ANNOTATION_CAS_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration while a `BGDbOps` waits for its pods (10 seconds)
pub const DBOPS_REQUEUE_DURATION_SECS: u64 = 10;

/// Requeue duration for sharded cluster propagation (15 seconds)
pub const SHARDED_CLUSTER_REQUEUE_DURATION_SECS: u64 = 15;

// ============================================================================
// Init Container Constants
// ============================================================================

/// Where the init container drops the controller binary
pub const DEFAULT_INIT_DESTINATION: &str = "/app/controller";

/// File mode of the copied controller binary
pub const INIT_BINARY_MODE: u32 = 0o555;

/// UID/GID owning the copied binary (Spilo's postgres user)
pub const INIT_BINARY_OWNER: u32 = 999;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 2;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
