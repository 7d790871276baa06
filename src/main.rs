// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use bestgres::{
    config::{Cli, ControllerConfig, Mode},
    constants::{
        ERROR_REQUEUE_DURATION_SECS, KIND_BG_DB_OPS, KIND_BG_SHARDED_CLUSTER,
        KIND_BG_SHARDED_DB_OPS, SHARDED_CLUSTER_REQUEUE_DURATION_SECS, TOKIO_WORKER_THREADS,
    },
    controller::run_controller,
    crd::{BGDbOps, BGShardedCluster, BGShardedDbOps},
    init::run_init,
    metrics,
    reconcilers::{
        bgshardeddbops::action_for, reconcile_bgdbops, reconcile_bgshardedcluster,
        reconcile_bgshardeddbops,
    },
};
use clap::Parser;
use futures::StreamExt;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("bestgres")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Respects RUST_LOG (default info) and RUST_LOG_FORMAT (json|text)
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    debug!(mode = ?cli.mode, "Logging initialized");

    let result = match cli.mode {
        Mode::Init => run_init(&cli.init_destination).await,
        Mode::Controller => run_sidecar(&cli).await,
        Mode::Operator => run_operator().await,
    };
    if let Err(e) = &result {
        error!(mode = ?cli.mode, error = ?e, "Fatal error");
    }
    result
}

async fn run_sidecar(cli: &Cli) -> Result<()> {
    let config = ControllerConfig::from_cli(cli)?;
    info!(pod = %config.pod_name, namespace = %config.namespace, "Starting Bestgres sidecar");

    tokio::spawn(async {
        if let Err(e) = metrics::run_metrics_server().await {
            error!(error = %e, "Metrics server stopped");
        }
    });

    run_controller(config).await
}

async fn run_operator() -> Result<()> {
    info!("Starting Bestgres operator");

    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    // Controllers should never exit - if one does, exit the process
    tokio::select! {
        result = run_bgshardedcluster_controller(client.clone()) => {
            error!("CRITICAL: BGShardedCluster controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("BGShardedCluster controller exited unexpectedly without error")
        }
        result = run_bgdbops_controller(client.clone()) => {
            error!("CRITICAL: BGDbOps controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("BGDbOps controller exited unexpectedly without error")
        }
        result = run_bgshardeddbops_controller(client.clone()) => {
            error!("CRITICAL: BGShardedDbOps controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("BGShardedDbOps controller exited unexpectedly without error")
        }
        result = metrics::run_metrics_server() => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
    }
}

/// Run the `BGShardedCluster` controller
async fn run_bgshardedcluster_controller(client: Client) -> Result<()> {
    info!("Starting BGShardedCluster controller");

    let api = Api::<BGShardedCluster>::all(client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_bgshardedcluster_wrapper, error_policy, Arc::new(client))
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `BGDbOps` controller
async fn run_bgdbops_controller(client: Client) -> Result<()> {
    info!("Starting BGDbOps controller");

    let api = Api::<BGDbOps>::all(client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_bgdbops_wrapper, error_policy, Arc::new(client))
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `BGShardedDbOps` controller
async fn run_bgshardeddbops_controller(client: Client) -> Result<()> {
    info!("Starting BGShardedDbOps controller");

    let api = Api::<BGShardedDbOps>::all(client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_bgshardeddbops_wrapper, error_policy, Arc::new(client))
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `BGShardedCluster`
async fn reconcile_bgshardedcluster_wrapper(
    sharded: Arc<BGShardedCluster>,
    ctx: Arc<Client>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_bgshardedcluster((*ctx).clone(), (*sharded).clone()).await {
        Ok(()) => {
            debug!("Successfully reconciled BGShardedCluster: {}", sharded.name_any());
            metrics::record_reconciliation_success(KIND_BG_SHARDED_CLUSTER, start.elapsed());
            // Worker markers change without touching the BGShardedCluster, so poll.
            Ok(Action::requeue(Duration::from_secs(
                SHARDED_CLUSTER_REQUEUE_DURATION_SECS,
            )))
        }
        Err(e) => {
            error!("Failed to reconcile BGShardedCluster: {:?}", e);
            metrics::record_reconciliation_error(KIND_BG_SHARDED_CLUSTER, start.elapsed());
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `BGDbOps`
async fn reconcile_bgdbops_wrapper(
    db_ops: Arc<BGDbOps>,
    ctx: Arc<Client>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_bgdbops((*ctx).clone(), (*db_ops).clone()).await {
        Ok(progress) => {
            debug!(name = %db_ops.name_any(), progress = ?progress, "Reconciled BGDbOps");
            metrics::record_reconciliation_success(KIND_BG_DB_OPS, start.elapsed());
            Ok(progress.action())
        }
        Err(e) => {
            error!("Failed to reconcile BGDbOps: {:?}", e);
            metrics::record_reconciliation_error(KIND_BG_DB_OPS, start.elapsed());
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `BGShardedDbOps`
async fn reconcile_bgshardeddbops_wrapper(
    sharded_db_ops: Arc<BGShardedDbOps>,
    ctx: Arc<Client>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    match reconcile_bgshardeddbops((*ctx).clone(), (*sharded_db_ops).clone()).await {
        Ok(status) => {
            debug!(
                name = %sharded_db_ops.name_any(),
                status = status,
                "Reconciled BGShardedDbOps"
            );
            metrics::record_reconciliation_success(KIND_BG_SHARDED_DB_OPS, start.elapsed());
            Ok(action_for(status))
        }
        Err(e) => {
            error!("Failed to reconcile BGShardedDbOps: {:?}", e);
            metrics::record_reconciliation_error(KIND_BG_SHARDED_DB_OPS, start.elapsed());
            Err(e.into())
        }
    }
}

/// Error policy for all controllers
fn error_policy<K: kube::Resource<DynamicType = ()>>(
    _resource: Arc<K>,
    err: &ReconcileError,
    _ctx: Arc<Client>,
) -> Action {
    let kind = K::kind(&());
    let error_type = if err.0.chain().any(|cause| cause.is::<kube::Error>()) {
        "api_error"
    } else {
        "reconcile_error"
    };
    metrics::record_error(&kind, error_type);
    metrics::record_reconciliation_requeue(&kind, "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
