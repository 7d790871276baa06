// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! One-shot bootstrap of a PostgreSQL pod.
//!
//! The pod's role is derived from its `BGCluster` labels:
//!
//! | part-of label | role label      | role                 |
//! |---------------|-----------------|----------------------|
//! | absent        | (any)           | [`Role::Standalone`] |
//! | present       | `worker`        | [`Role::Worker`]     |
//! | present       | `coordinator`   | [`Role::Coordinator`]|
//! | present       | anything else   | fatal                |
//!
//! Each role runs a fixed SQL sequence exactly once per cluster. Completion
//! is persisted as `bgcluster.bestgres.io/initialized=true` on the
//! `BGCluster`, so a restarted sidecar skips straight to the reconciliation
//! loop. The marker moves `<unset> -> "false" -> "true"` and is never reset.

use crate::constants::{
    BOOTSTRAP_GRACE_PERIOD_SECS, COORDINATOR_HOST_SUFFIX, CREATE_CITUS_EXTENSION_SQL,
    POSTGRES_PORT, WORKER_WAIT_INTERVAL_SECS, WORKER_WAIT_TIMEOUT_SECS,
};
use crate::crd::DbOpKind;
use crate::errors::{BootstrapError, SqlError};
use crate::labels::{
    worker_initialized_annotation, ANNOTATION_FALSE, ANNOTATION_TRUE,
    BGCLUSTER_INITIALIZED_ANNOTATION, BGCLUSTER_PART_OF_LABEL, BGCLUSTER_ROLE_LABEL,
    BGDBOPS_COMPLETED_ANNOTATION, BGDBOPS_OP_ANNOTATION, BGDBOPS_PENDING_ANNOTATION,
    BGSHARDEDCLUSTER_WORKERS_ANNOTATION, ROLE_COORDINATOR, ROLE_WORKER,
};
use crate::metrics;
use crate::sql::SqlExecutor;
use crate::store::{
    annotation_is_true, get_annotation, set_annotation, set_annotation_if_absent, AnnotationStore,
    ObjectRef,
};
use crate::wait::{wait_for, WaitOutcome, WaitPolicy};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Role of a pod within its (possibly sharded) cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Standalone,
    Worker,
    Coordinator,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Standalone => "standalone",
            Role::Worker => "worker",
            Role::Coordinator => "coordinator",
        }
    }

    #[must_use]
    pub fn is_sharded(self) -> bool {
        !matches!(self, Role::Standalone)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the role from `BGCluster` labels.
///
/// # Errors
///
/// [`BootstrapError::UnresolvableRole`] when the cluster is part of a sharded
/// cluster but the role label is missing or unknown.
pub fn classify(cluster: &str, labels: &BTreeMap<String, String>) -> Result<Role, BootstrapError> {
    if !labels.contains_key(BGCLUSTER_PART_OF_LABEL) {
        return Ok(Role::Standalone);
    }
    match labels.get(BGCLUSTER_ROLE_LABEL).map(String::as_str) {
        Some(ROLE_WORKER) => Ok(Role::Worker),
        Some(ROLE_COORDINATOR) => Ok(Role::Coordinator),
        other => Err(BootstrapError::UnresolvableRole {
            cluster: cluster.to_string(),
            role: other.map(str::to_string),
        }),
    }
}

/// Progress of the bootstrap state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapState {
    Unclassified,
    Classified(Role),
    Initialized,
}

/// How [`Bootstrapper::run`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The cluster was already initialized; no SQL ran.
    AlreadyInitialized,
    /// This run executed the role's sequence and set the marker.
    Completed(Role),
}

/// Runs the role-specific bootstrap sequence for one pod.
pub struct Bootstrapper {
    store: Arc<dyn AnnotationStore>,
    sql: SqlExecutor,
    pod: ObjectRef,
    cluster: ObjectRef,
    grace_period: Duration,
    worker_wait: WaitPolicy,
    state: BootstrapState,
}

impl Bootstrapper {
    #[must_use]
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        sql: SqlExecutor,
        pod: ObjectRef,
        cluster: ObjectRef,
    ) -> Self {
        Self {
            store,
            sql,
            pod,
            cluster,
            grace_period: Duration::from_secs(BOOTSTRAP_GRACE_PERIOD_SECS),
            worker_wait: WaitPolicy::lenient(
                Duration::from_secs(WORKER_WAIT_INTERVAL_SECS),
                Duration::from_secs(WORKER_WAIT_TIMEOUT_SECS),
            ),
            state: BootstrapState::Unclassified,
        }
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn with_worker_wait(mut self, worker_wait: WaitPolicy) -> Self {
        self.worker_wait = worker_wait;
        self
    }

    #[must_use]
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Classify and, unless the cluster is already initialized, bootstrap.
    ///
    /// `labels` are the `BGCluster` labels and `user_sql` its `bootstrapSQL`.
    ///
    /// # Errors
    ///
    /// Unresolvable role, failing system SQL, or an unwritable marker. User
    /// SQL failures are logged and never returned.
    pub async fn run(
        &mut self,
        labels: &BTreeMap<String, String>,
        user_sql: &[String],
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let role = classify(&self.cluster.name, labels)?;
        self.state = BootstrapState::Classified(role);
        info!(cluster = %self.cluster.name, pod = %self.pod.name, role = %role, "Classified pod");

        let result = self.run_classified(role, user_sql).await;
        match &result {
            Ok(BootstrapOutcome::AlreadyInitialized) => {
                metrics::record_bootstrap(role.as_str(), "skipped");
            }
            Ok(BootstrapOutcome::Completed(_)) => {
                metrics::record_bootstrap(role.as_str(), "success");
            }
            Err(_) => metrics::record_bootstrap(role.as_str(), "error"),
        }
        result
    }

    async fn run_classified(
        &mut self,
        role: Role,
        user_sql: &[String],
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let annotations = self
            .store
            .annotations(&self.cluster)
            .await
            .map_err(|source| self.marker_error(source))?;

        let initialized = annotations
            .get(BGCLUSTER_INITIALIZED_ANNOTATION)
            .map(String::as_str);
        if initialized == Some(ANNOTATION_TRUE) {
            info!(cluster = %self.cluster.name, "Cluster already initialized, skipping bootstrap");
            self.complete_pending_restart(&annotations).await;
            self.state = BootstrapState::Initialized;
            return Ok(BootstrapOutcome::AlreadyInitialized);
        }

        set_annotation_if_absent(
            &*self.store,
            &self.cluster,
            BGCLUSTER_INITIALIZED_ANNOTATION,
            ANNOTATION_FALSE,
        )
        .await
        .map_err(|source| self.marker_error(source))?;

        // Patroni reports running slightly before PostgreSQL accepts connections.
        tokio::time::sleep(self.grace_period).await;

        info!(cluster = %self.cluster.name, role = %role, "Running bootstrap");
        match role {
            Role::Standalone => {}
            Role::Worker => self.bootstrap_worker().await?,
            Role::Coordinator => self.bootstrap_coordinator().await?,
        }

        if let Err(e) = self.sql.execute_all(user_sql).await {
            error!(cluster = %self.cluster.name, error = %e, "User bootstrap SQL failed");
        }

        set_annotation(
            &*self.store,
            &self.cluster,
            BGCLUSTER_INITIALIZED_ANNOTATION,
            ANNOTATION_TRUE,
        )
        .await
        .map_err(|source| self.marker_error(source))?;
        if let Err(e) = set_annotation(
            &*self.store,
            &self.pod,
            BGCLUSTER_INITIALIZED_ANNOTATION,
            ANNOTATION_TRUE,
        )
        .await
        {
            warn!(
                pod = %self.pod.name,
                error = %e,
                "Bootstrap complete but pod marker not updated"
            );
        }

        self.state = BootstrapState::Initialized;
        info!(cluster = %self.cluster.name, role = %role, "Bootstrap complete");
        Ok(BootstrapOutcome::Completed(role))
    }

    /// A pod coming back from a restart operation reports itself done.
    async fn complete_pending_restart(&self, annotations: &BTreeMap<String, String>) {
        let pending = annotations.get(BGDBOPS_PENDING_ANNOTATION).map(String::as_str)
            == Some(ANNOTATION_TRUE);
        let restart = annotations.get(BGDBOPS_OP_ANNOTATION).map(String::as_str)
            == Some(DbOpKind::Restart.as_str());
        if !(pending && restart) {
            return;
        }

        info!(pod = %self.pod.name, "Marking restart operation as complete");
        if let Err(e) = set_annotation(
            &*self.store,
            &self.pod,
            BGDBOPS_COMPLETED_ANNOTATION,
            ANNOTATION_TRUE,
        )
        .await
        {
            warn!(pod = %self.pod.name, error = %e, "Failed to mark restart complete");
        }
    }

    async fn bootstrap_worker(&self) -> Result<(), BootstrapError> {
        self.system_sql(&[CREATE_CITUS_EXTENSION_SQL.to_string()]).await
    }

    async fn bootstrap_coordinator(&self) -> Result<(), BootstrapError> {
        let coordinator_host = format!("{}{COORDINATOR_HOST_SUFFIX}", self.cluster.name);
        self.system_sql(&[
            CREATE_CITUS_EXTENSION_SQL.to_string(),
            format!("SELECT citus_set_coordinator_host('{coordinator_host}', {POSTGRES_PORT});"),
        ])
        .await?;

        for worker in self.worker_list().await {
            self.await_worker(&worker).await;

            let statement = format!("SELECT * FROM citus_add_node('{worker}', {POSTGRES_PORT});");
            match self.sql.execute(&statement).await {
                Ok(()) => {
                    info!(cluster = %self.cluster.name, worker = %worker, "Added worker node");
                }
                Err(source @ SqlError::Semantic { .. }) => {
                    return Err(BootstrapError::SystemSql {
                        cluster: self.cluster.name.clone(),
                        source,
                    });
                }
                Err(e) => {
                    error!(
                        cluster = %self.cluster.name,
                        worker = %worker,
                        error = %e,
                        "Failed to add worker node"
                    );
                }
            }
        }
        Ok(())
    }

    /// Worker names published by the sharded cluster propagator.
    ///
    /// Waits for the annotation to appear under the worker wait policy; a
    /// missing or undecodable list yields no workers.
    async fn worker_list(&self) -> Vec<String> {
        let store = &*self.store;
        let cluster = &self.cluster;
        let outcome = wait_for("worker list", &self.worker_wait, || async move {
            matches!(
                get_annotation(store, cluster, BGSHARDEDCLUSTER_WORKERS_ANNOTATION).await,
                Ok(Some(_))
            )
        })
        .await;
        if matches!(outcome, Ok(WaitOutcome::TimedOut)) {
            warn!(
                cluster = %self.cluster.name,
                "No worker list published, continuing without workers"
            );
            return Vec::new();
        }

        let raw = match get_annotation(store, cluster, BGSHARDEDCLUSTER_WORKERS_ANNOTATION).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!(cluster = %self.cluster.name, error = %e, "Failed to read worker list");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(workers) => {
                info!(cluster = %self.cluster.name, workers = ?workers, "Read worker list");
                workers
            }
            Err(e) => {
                error!(
                    cluster = %self.cluster.name,
                    raw = %raw,
                    error = %e,
                    "Failed to decode worker list"
                );
                Vec::new()
            }
        }
    }

    /// Block until `worker` reports initialized, or the worker wait times out.
    async fn await_worker(&self, worker: &str) {
        let key = worker_initialized_annotation(worker);
        let store = &*self.store;
        let cluster = &self.cluster;
        let key_ref = key.as_str();

        let outcome = wait_for(&key, &self.worker_wait, || async move {
            match annotation_is_true(store, cluster, key_ref).await {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(worker = key_ref, error = %e, "Failed to read worker marker");
                    false
                }
            }
        })
        .await;

        if !matches!(outcome, Ok(WaitOutcome::Ready)) {
            warn!(
                cluster = %self.cluster.name,
                worker = worker,
                "Worker not initialized in time, adding anyway"
            );
        }
    }

    async fn system_sql(&self, statements: &[String]) -> Result<(), BootstrapError> {
        self.sql
            .execute_all(statements)
            .await
            .map_err(|source| BootstrapError::SystemSql {
                cluster: self.cluster.name.clone(),
                source,
            })
    }

    fn marker_error(&self, source: crate::errors::StoreError) -> BootstrapError {
        BootstrapError::Marker {
            cluster: self.cluster.name.clone(),
            source,
        }
    }
}

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod bootstrap_tests;
