// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Sidecar mode: start the database, bootstrap once, then poll for operations.
//!
//! The sidecar has no watch on the API server. [`ReconcileLoop`] re-reads the
//! owning `BGCluster` every couple of seconds and either hands an armed
//! operation to the [`Dispatcher`] or clears the pod's stale completion
//! marker so the next operation starts clean.

use crate::bootstrap::{classify, Bootstrapper};
use crate::config::ControllerConfig;
use crate::constants::{
    KIND_BG_CLUSTER, RECONCILE_ERROR_BACKOFF_SECS, RECONCILE_LOOP_INTERVAL_SECS,
};
use crate::crd::BGCluster;
use crate::dbops::{DispatchOutcome, Dispatcher};
use crate::errors::ConfigError;
use crate::labels::{
    ANNOTATION_TRUE, BGDBOPS_COMPLETED_ANNOTATION, BGDBOPS_PENDING_ANNOTATION, CLUSTER_NAME_LABEL,
};
use crate::lifecycle::KubePodLifecycle;
use crate::metrics;
use crate::readiness::{default_readiness_policy, wait_for_database, PatroniClient};
use crate::reconcilers::retry::retry_api_call;
use crate::spilo::{launch_database, patch_config_file};
use crate::sql::{PsqlRunner, SqlExecutor};
use crate::store::{delete_annotation, AnnotationStore, KubeAnnotationStore, ObjectRef};
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, error, info, warn};

/// What one loop iteration did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopIteration {
    /// An operation was pending and the dispatcher ran it.
    Dispatched(DispatchOutcome),
    /// An operation was pending but the dispatcher failed; retried next pass.
    DispatchFailed,
    /// Nothing pending; the pod's completion marker was cleared.
    Idle,
}

/// Polls the owning `BGCluster` and dispatches pending operations.
pub struct ReconcileLoop {
    store: Arc<dyn AnnotationStore>,
    dispatcher: Dispatcher,
    pod: ObjectRef,
    cluster: ObjectRef,
    interval: Duration,
    error_backoff: Duration,
}

impl ReconcileLoop {
    #[must_use]
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        dispatcher: Dispatcher,
        pod: ObjectRef,
        cluster: ObjectRef,
    ) -> Self {
        Self {
            store,
            dispatcher,
            pod,
            cluster,
            interval: Duration::from_secs(RECONCILE_LOOP_INTERVAL_SECS),
            error_backoff: Duration::from_secs(RECONCILE_ERROR_BACKOFF_SECS),
        }
    }

    /// One pass over the cluster's annotations.
    ///
    /// # Errors
    ///
    /// Only a failed `BGCluster` refresh. Dispatch and cleanup failures are
    /// logged and reported through the returned [`LoopIteration`].
    pub async fn reconcile_once(&self) -> Result<LoopIteration> {
        let annotations = self
            .store
            .annotations(&self.cluster)
            .await
            .with_context(|| format!("failed to refresh {}", self.cluster))?;

        let pending = annotations.get(BGDBOPS_PENDING_ANNOTATION).map(String::as_str);
        if pending == Some(ANNOTATION_TRUE) {
            return Ok(match self.dispatcher.dispatch(&annotations).await {
                Ok(outcome) => {
                    debug!(
                        cluster = %self.cluster.name,
                        outcome = ?outcome,
                        "Dispatched operation"
                    );
                    LoopIteration::Dispatched(outcome)
                }
                Err(e) => {
                    error!(
                        cluster = %self.cluster.name,
                        pod = %self.pod.name,
                        error = ?e,
                        "Operation failed"
                    );
                    metrics::record_error(KIND_BG_CLUSTER, "dispatch");
                    LoopIteration::DispatchFailed
                }
            });
        }

        if let Err(e) =
            delete_annotation(&*self.store, &self.pod, BGDBOPS_COMPLETED_ANNOTATION).await
        {
            warn!(pod = %self.pod.name, error = %e, "Failed to clear stale completion marker");
        }
        Ok(LoopIteration::Idle)
    }

    /// Run forever. Only process termination stops the loop.
    pub async fn run(&self) {
        info!(cluster = %self.cluster.name, pod = %self.pod.name, "Entering reconciliation loop");
        loop {
            let delay = match self.reconcile_once().await {
                Ok(iteration) => {
                    metrics::record_loop_iteration(match iteration {
                        LoopIteration::Dispatched(_) => "dispatched",
                        LoopIteration::DispatchFailed => "dispatch_error",
                        LoopIteration::Idle => "idle",
                    });
                    self.interval
                }
                Err(e) => {
                    error!(error = ?e, "Reconciliation pass failed");
                    metrics::record_loop_iteration("error");
                    metrics::record_error(KIND_BG_CLUSTER, "refresh");
                    self.error_backoff
                }
            };
            tokio::time::sleep(delay).await;
        }
    }
}

/// Sidecar entrypoint.
///
/// Returns only on a fatal error; the kubelet restarts the container and the
/// already-initialized cluster then skips bootstrap.
///
/// # Errors
///
/// Missing cluster label, unreadable `BGCluster`, unresolvable role, config
/// patch or launch failure, readiness timeout, or fatal bootstrap SQL.
pub async fn run_controller(config: ControllerConfig) -> Result<()> {
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), &config.namespace);
    let pod = retry_api_call(
        || pods.get(&config.pod_name),
        &format!("get Pod {}/{}", config.namespace, config.pod_name),
    )
    .await?;
    let cluster_name = pod
        .labels()
        .get(CLUSTER_NAME_LABEL)
        .cloned()
        .ok_or_else(|| ConfigError::MissingClusterLabel {
            pod: config.pod_name.clone(),
            label: CLUSTER_NAME_LABEL,
        })?;

    let clusters: Api<BGCluster> = Api::namespaced(client.clone(), &config.namespace);
    let cluster = retry_api_call(
        || clusters.get(&cluster_name),
        &format!("get BGCluster {}/{cluster_name}", config.namespace),
    )
    .await?;
    let labels = cluster.labels().clone();

    // Fail before touching the database if the labels are unusable.
    let role = classify(&cluster_name, &labels)?;
    info!(pod = %config.pod_name, cluster = %cluster_name, role = %role, "Starting sidecar");

    patch_config_file(&config.spilo_config, role.is_sharded()).await?;
    let child = launch_database(
        &cluster_name,
        &cluster.spec.image.command,
        &cluster.spec.image.working_dir,
    )?;
    tokio::spawn(reap_database(child));

    let patroni = PatroniClient::new(config.patroni_url.as_str())?;
    wait_for_database(&patroni, &default_readiness_policy()).await?;

    let pod_ref = ObjectRef::pod(&config.namespace, &config.pod_name);
    let cluster_ref = ObjectRef::bg_cluster(&config.namespace, &cluster_name);
    let store: Arc<dyn AnnotationStore> = Arc::new(KubeAnnotationStore::new(client.clone()));

    let sql = SqlExecutor::new(Arc::new(PsqlRunner::new(
        config.psql_bin.as_str(),
        config.psql_user.as_str(),
    )));
    Bootstrapper::new(store.clone(), sql, pod_ref.clone(), cluster_ref.clone())
        .run(&labels, &cluster.spec.bootstrap_sql)
        .await?;

    let lifecycle = Arc::new(KubePodLifecycle::new(
        client,
        &config.namespace,
        config.supervisor_stop.clone(),
    ));
    let dispatcher = Dispatcher::new(
        store.clone(),
        lifecycle,
        pod_ref.clone(),
        cluster_ref.clone(),
    );
    ReconcileLoop::new(store, dispatcher, pod_ref, cluster_ref)
        .run()
        .await;
    Ok(())
}

/// Wait on the database process so it is reaped and its exit is logged.
async fn reap_database(mut child: Child) {
    match child.wait().await {
        Ok(status) => warn!(status = %status, "Database process exited"),
        Err(e) => error!(error = %e, "Failed to wait on database process"),
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
