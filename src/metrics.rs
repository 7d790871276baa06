// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the Bestgres sidecar and operator.
//!
//! All metrics carry the namespace prefix `bestgres_io_` (prometheus-safe
//! version of "bestgres.io") and are served on `/metrics` by
//! [`run_metrics_server`].
//!
//! # Metrics Categories
//!
//! - **Sidecar** - bootstrap outcomes, dispatched operations, loop iterations, SQL statements
//! - **Operator** - reconciliations, requeues and errors per resource type
//!
//! # Example
//!
//! ```rust,no_run
//! use bestgres::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("BGDbOps", std::time::Duration::from_millis(120));
//! ```

use crate::constants::{METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH, METRICS_SERVER_PORT};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all Bestgres metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "bestgres_io";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register_counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let opts = Opts::new(format!("{METRICS_NAMESPACE}_{name}"), help);
    let counter = CounterVec::new(opts, labels).expect("valid counter definition");
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter registered once");
    counter
}

// ============================================================================
// Sidecar Metrics
// ============================================================================

/// Bootstrap runs by role and outcome (`success`, `skipped`, `error`)
pub static BOOTSTRAP_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "bootstrap_total",
        "Bootstrap runs by role and outcome",
        &["role", "outcome"],
    )
});

/// Operations dispatched by kind and outcome (`success`, `error`)
pub static DBOPS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "dbops_total",
        "Database operations dispatched by kind and outcome",
        &["op", "outcome"],
    )
});

/// Reconciliation loop iterations by result (`dispatched`, `idle`, `error`)
pub static LOOP_ITERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "loop_iterations_total",
        "Sidecar reconciliation loop iterations by result",
        &["result"],
    )
});

/// SQL statements by outcome (`success`, `semantic_error`, `retries_exhausted`)
pub static SQL_STATEMENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "sql_statements_total",
        "SQL statements executed against the local instance by outcome",
        &["outcome"],
    )
});

// ============================================================================
// Operator Metrics
// ============================================================================

/// Total number of reconciliations by resource type and status
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "reconciliations_total",
        "Total number of reconciliations by resource type and status",
        &["resource_type", "status"],
    )
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliation operations in seconds",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]);
    let histogram =
        HistogramVec::new(opts, &["resource_type"]).expect("valid histogram definition");
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("histogram registered once");
    histogram
});

/// Requeues by resource type and reason
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "requeues_total",
        "Total number of reconciliation requeues by resource type and reason",
        &["resource_type", "reason"],
    )
});

/// Errors by resource type and category
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter(
        "errors_total",
        "Total number of errors by resource type and error category",
        &["resource_type", "error_type"],
    )
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a bootstrap run
pub fn record_bootstrap(role: &str, outcome: &str) {
    BOOTSTRAP_TOTAL.with_label_values(&[role, outcome]).inc();
}

/// Record a dispatched operation
pub fn record_dbops(op: &str, outcome: &str) {
    DBOPS_TOTAL.with_label_values(&[op, outcome]).inc();
}

/// Record one reconciliation loop iteration
pub fn record_loop_iteration(result: &str) {
    LOOP_ITERATIONS_TOTAL.with_label_values(&[result]).inc();
}

/// Record the final outcome of one SQL statement
pub fn record_sql_statement(outcome: &str) {
    SQL_STATEMENTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a successful reconciliation
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled (e.g., `BGDbOps`)
/// * `duration` - Duration of the reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `reason` - Reason for requeue (e.g., `error`, `busy`)
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// Record an error
pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Router serving `/metrics` and `/healthz`.
pub fn router() -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(healthz))
}

/// Serve metrics until the process exits.
///
/// # Errors
///
/// Fails if the listener cannot bind or the server stops.
pub async fn run_metrics_server() -> std::io::Result<()> {
    let addr = format!("{METRICS_SERVER_BIND_ADDRESS}:{METRICS_SERVER_PORT}");
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "Metrics server listening");
    axum::serve(listener, router()).await
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
