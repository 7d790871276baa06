// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operation dispatcher for pending `BGDbOps`.
//!
//! The cluster-level operator arms a `BGCluster` with
//! `bgdbops.bestgres.io/pending=true`, the operation name in
//! `bgdbops.bestgres.io/op` and the full `BGDbOpsSpec` as JSON in
//! `bgdbops.bestgres.io/spec`. Every sidecar of that cluster then runs the
//! operation for its own pod and reports back through
//! `bgdbops.bestgres.io/completed=true` on its Pod.
//!
//! ## Restart
//!
//! A restart is a two-phase, per-pod protocol:
//!
//! 1. The pod has not completed: stop the database and delete the pod. The
//!    StatefulSet recreates it, and the new sidecar marks the pod completed
//!    during bootstrap.
//! 2. The pod has completed: record `bgcluster.bestgres.io/<pod>=true` on the
//!    `BGDbOps` named by `bgdbops.bestgres.io/in-progress`. This happens on
//!    every pass while the operation stays pending.
//!
//! ## Other operations
//!
//! Backup, benchmark, repack and vacuum are placeholders: they log their
//! options and succeed.

use crate::crd::{
    BGDbOpsSpec, BackupOptions, BenchmarkOptions, DbOpKind, RepackOptions, RestartOptions,
    VacuumOptions,
};
use crate::errors::DbOpsError;
use crate::labels::{
    pod_completion_annotation, ANNOTATION_TRUE, BGDBOPS_COMPLETED_ANNOTATION,
    BGDBOPS_IN_PROGRESS_ANNOTATION, BGDBOPS_OP_ANNOTATION, BGDBOPS_SPEC_ANNOTATION,
};
use crate::lifecycle::PodLifecycle;
use crate::metrics;
use crate::store::{annotation_is_true, set_annotation, AnnotationStore, ObjectRef};
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A parsed operation with its typed options.
#[derive(Clone, Debug, PartialEq)]
pub enum DbOperation {
    Restart(RestartOptions),
    Backup(BackupOptions),
    Benchmark(BenchmarkOptions),
    Repack(RepackOptions),
    Vacuum(VacuumOptions),
}

impl DbOperation {
    /// Build an operation from the `op` and `spec` annotations.
    ///
    /// An undecodable spec is logged and default options are used.
    ///
    /// # Errors
    ///
    /// [`DbOpsError::UnknownOperation`] if `op` names no known operation.
    pub fn parse(op: &str, spec_json: Option<&str>) -> Result<Self, DbOpsError> {
        let kind: DbOpKind = op.parse()?;

        let spec = match spec_json {
            Some(raw) => serde_json::from_str::<BGDbOpsSpec>(raw).unwrap_or_else(|e| {
                warn!(op = op, error = %e, "Failed to decode dbops spec, using defaults");
                BGDbOpsSpec::default()
            }),
            None => BGDbOpsSpec::default(),
        };

        Ok(match kind {
            DbOpKind::Restart => DbOperation::Restart(spec.restart.unwrap_or_default()),
            DbOpKind::Backup => DbOperation::Backup(spec.backup.unwrap_or_default()),
            DbOpKind::Benchmark => DbOperation::Benchmark(spec.benchmark.unwrap_or_default()),
            DbOpKind::Repack => DbOperation::Repack(spec.repack.unwrap_or_default()),
            DbOpKind::Vacuum => DbOperation::Vacuum(spec.vacuum.unwrap_or_default()),
        })
    }

    /// Build the operation an armed cluster's annotations describe.
    ///
    /// # Errors
    ///
    /// [`DbOpsError::UnknownOperation`] for a missing or unknown `op`.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, DbOpsError> {
        let op = annotations
            .get(BGDBOPS_OP_ANNOTATION)
            .map_or("", String::as_str);
        Self::parse(
            op,
            annotations.get(BGDBOPS_SPEC_ANNOTATION).map(String::as_str),
        )
    }

    #[must_use]
    pub fn kind(&self) -> DbOpKind {
        match self {
            DbOperation::Restart(_) => DbOpKind::Restart,
            DbOperation::Backup(_) => DbOpKind::Backup,
            DbOperation::Benchmark(_) => DbOpKind::Benchmark,
            DbOperation::Repack(_) => DbOpKind::Repack,
            DbOperation::Vacuum(_) => DbOpKind::Vacuum,
        }
    }
}

/// What a dispatch did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The operation ran and the pod was marked completed.
    Completed(DbOpKind),
    /// The pod already completed this operation; nothing ran.
    AlreadyCompleted(DbOpKind),
    /// Restart phase 1: the pod asked to be terminated.
    SelfTerminating,
    /// Restart phase 2: per-pod completion was recorded on this `BGDbOps`.
    FanIn { db_ops: String },
}

/// Runs operations for one pod.
pub struct Dispatcher {
    store: Arc<dyn AnnotationStore>,
    lifecycle: Arc<dyn PodLifecycle>,
    pod: ObjectRef,
    cluster: ObjectRef,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        lifecycle: Arc<dyn PodLifecycle>,
        pod: ObjectRef,
        cluster: ObjectRef,
    ) -> Self {
        Self {
            store,
            lifecycle,
            pod,
            cluster,
        }
    }

    /// Parse and run the operation described by an armed cluster's annotations.
    ///
    /// # Errors
    ///
    /// Unknown operation, store failures, or a failed self-termination.
    pub async fn dispatch(
        &self,
        cluster_annotations: &BTreeMap<String, String>,
    ) -> Result<DispatchOutcome> {
        let operation = DbOperation::from_annotations(cluster_annotations)?;
        let kind = operation.kind();

        let result = self.handle(&operation, cluster_annotations).await;
        match &result {
            Ok(DispatchOutcome::AlreadyCompleted(_)) => {}
            Ok(_) => metrics::record_dbops(kind.as_str(), "success"),
            Err(_) => metrics::record_dbops(kind.as_str(), "error"),
        }
        result
    }

    /// Run `operation` for this pod.
    ///
    /// # Errors
    ///
    /// Store failures, a missing `in-progress` marker during restart fan-in,
    /// or a failed self-termination.
    pub async fn handle(
        &self,
        operation: &DbOperation,
        cluster_annotations: &BTreeMap<String, String>,
    ) -> Result<DispatchOutcome> {
        let completed = annotation_is_true(&*self.store, &self.pod, BGDBOPS_COMPLETED_ANNOTATION)
            .await
            .with_context(|| format!("failed to read completion marker of pod {}", self.pod.name))?;

        let kind = operation.kind();
        match operation {
            DbOperation::Restart(options) if !completed => {
                info!(pod = %self.pod.name, options = ?options, "Restarting pod");
                self.lifecycle
                    .request_self_termination(&self.pod.name)
                    .await?;
                return Ok(DispatchOutcome::SelfTerminating);
            }
            DbOperation::Restart(_) => return self.record_restart_fan_in(cluster_annotations).await,
            _ if completed => {
                debug!(pod = %self.pod.name, op = %kind, "Operation already completed on this pod");
                return Ok(DispatchOutcome::AlreadyCompleted(kind));
            }
            DbOperation::Backup(options) => {
                info!(pod = %self.pod.name, options = ?options, "Backup requested, nothing to do");
            }
            DbOperation::Benchmark(options) => {
                info!(
                    pod = %self.pod.name,
                    options = ?options,
                    "Benchmark requested, nothing to do"
                );
            }
            DbOperation::Repack(options) => {
                info!(pod = %self.pod.name, options = ?options, "Repack requested, nothing to do");
            }
            DbOperation::Vacuum(options) => {
                info!(pod = %self.pod.name, options = ?options, "Vacuum requested, nothing to do");
            }
        }

        set_annotation(&*self.store, &self.pod, BGDBOPS_COMPLETED_ANNOTATION, ANNOTATION_TRUE)
            .await
            .with_context(|| format!("failed to mark pod {} completed", self.pod.name))?;
        info!(pod = %self.pod.name, op = %kind, "Operation completed on pod");
        Ok(DispatchOutcome::Completed(kind))
    }

    async fn record_restart_fan_in(
        &self,
        cluster_annotations: &BTreeMap<String, String>,
    ) -> Result<DispatchOutcome> {
        let db_ops = cluster_annotations
            .get(BGDBOPS_IN_PROGRESS_ANNOTATION)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DbOpsError::MissingInProgress(self.cluster.name.clone()))?;

        let target = ObjectRef::bg_db_ops(&self.cluster.namespace, db_ops);
        set_annotation(
            &*self.store,
            &target,
            &pod_completion_annotation(&self.pod.name),
            ANNOTATION_TRUE,
        )
        .await
        .with_context(|| format!("failed to record restart completion on BGDbOps {db_ops}"))?;

        debug!(pod = %self.pod.name, db_ops = %db_ops, "Recorded restart completion");
        Ok(DispatchOutcome::FanIn {
            db_ops: db_ops.clone(),
        })
    }
}

#[cfg(test)]
#[path = "dbops_tests.rs"]
mod dbops_tests;
