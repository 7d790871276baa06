// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `BGDbOps` reconciliation: arm the target cluster, then wait for every pod.
//!
//! A `BGDbOps` moves through three observable steps:
//!
//! 1. **Arm** - write `in-progress`, `op`, `spec` and finally `pending=true`
//!    on the target `BGCluster`. `in-progress` is claimed with a conditional
//!    write, so only one `BGDbOps` drives a cluster at a time.
//! 2. **Wait** - each sidecar runs the operation and sets
//!    `bgdbops.bestgres.io/completed=true` on its Pod.
//! 3. **Finish** - once every pod labelled `cluster-name=<cluster>` reports
//!    completion, the cluster is disarmed and the `BGDbOps` is marked
//!    completed.

use crate::constants::{DBOPS_REQUEUE_DURATION_SECS, KIND_BG_DB_OPS};
use crate::crd::{BGDbOps, BGDbOpsSpec, BGDbOpsStatus, DbOpsPhase};
use crate::labels::{
    ANNOTATION_TRUE, BGDBOPS_COMPLETED_ANNOTATION, BGDBOPS_IN_PROGRESS_ANNOTATION,
    BGDBOPS_OP_ANNOTATION, BGDBOPS_PENDING_ANNOTATION, BGDBOPS_SPEC_ANNOTATION, CLUSTER_NAME_LABEL,
};
use crate::reconcilers::retry::retry_api_call;
use crate::store::{
    annotation_is_true, delete_annotation, get_annotation, set_annotation,
    set_annotation_if_absent, AnnotationStore, KubeAnnotationStore, ObjectRef,
};
use anyhow::{Context as _, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Where a `BGDbOps` stands after one reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DbOpsProgress {
    /// Marked completed earlier; nothing to do.
    AlreadyCompleted,
    /// This pass armed the cluster.
    Armed,
    /// Armed; `done` of `total` pods reported completion.
    Waiting { done: usize, total: usize },
    /// Another `BGDbOps` holds the cluster.
    Busy { holder: String },
    /// Every pod finished; the cluster was disarmed.
    Completed,
}

impl DbOpsProgress {
    /// Requeue policy for the controller.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            DbOpsProgress::AlreadyCompleted | DbOpsProgress::Completed => Action::await_change(),
            _ => Action::requeue(Duration::from_secs(DBOPS_REQUEUE_DURATION_SECS)),
        }
    }
}

/// Advance one `BGDbOps` by a single step.
///
/// `pods` are the names of the pods currently labelled with the target
/// cluster. Completion is only evaluated while the cluster is armed by this
/// `BGDbOps`, so markers left over from an earlier operation cannot finish it.
///
/// # Errors
///
/// Store failures, or a spec that cannot be encoded.
pub async fn advance<S>(
    store: &S,
    namespace: &str,
    name: &str,
    spec: &BGDbOpsSpec,
    pods: &[String],
) -> Result<DbOpsProgress>
where
    S: AnnotationStore + ?Sized,
{
    let db_ops = ObjectRef::bg_db_ops(namespace, name);
    if annotation_is_true(store, &db_ops, BGDBOPS_COMPLETED_ANNOTATION).await? {
        return Ok(DbOpsProgress::AlreadyCompleted);
    }

    let cluster = ObjectRef::bg_cluster(namespace, &spec.bg_cluster);
    let holder = get_annotation(store, &cluster, BGDBOPS_IN_PROGRESS_ANNOTATION).await?;
    match holder.as_deref() {
        Some(holder) if holder != name => {
            return Ok(DbOpsProgress::Busy {
                holder: holder.to_string(),
            });
        }
        Some(_) if annotation_is_true(store, &cluster, BGDBOPS_PENDING_ANNOTATION).await? => {
            let done = count_completed(store, namespace, pods).await?;
            if pods.is_empty() || done < pods.len() {
                return Ok(DbOpsProgress::Waiting {
                    done,
                    total: pods.len(),
                });
            }
            finish(store, &cluster, &db_ops).await?;
            return Ok(DbOpsProgress::Completed);
        }
        _ => {}
    }

    if !set_annotation_if_absent(store, &cluster, BGDBOPS_IN_PROGRESS_ANNOTATION, name).await? {
        let holder = get_annotation(store, &cluster, BGDBOPS_IN_PROGRESS_ANNOTATION)
            .await?
            .unwrap_or_default();
        if holder != name {
            return Ok(DbOpsProgress::Busy { holder });
        }
    }

    let spec_json = serde_json::to_string(spec).context("failed to encode BGDbOps spec")?;
    set_annotation(store, &cluster, BGDBOPS_OP_ANNOTATION, spec.op.as_str()).await?;
    set_annotation(store, &cluster, BGDBOPS_SPEC_ANNOTATION, &spec_json).await?;
    // Sidecars act on `pending`, so it goes last.
    set_annotation(store, &cluster, BGDBOPS_PENDING_ANNOTATION, ANNOTATION_TRUE).await?;

    info!(db_ops = %name, cluster = %spec.bg_cluster, op = %spec.op, "Armed BGCluster");
    Ok(DbOpsProgress::Armed)
}

async fn count_completed<S>(store: &S, namespace: &str, pods: &[String]) -> Result<usize>
where
    S: AnnotationStore + ?Sized,
{
    let mut done = 0;
    for pod in pods {
        let pod = ObjectRef::pod(namespace, pod);
        if annotation_is_true(store, &pod, BGDBOPS_COMPLETED_ANNOTATION).await? {
            done += 1;
        }
    }
    Ok(done)
}

async fn finish<S>(store: &S, cluster: &ObjectRef, db_ops: &ObjectRef) -> Result<()>
where
    S: AnnotationStore + ?Sized,
{
    for key in [
        BGDBOPS_PENDING_ANNOTATION,
        BGDBOPS_OP_ANNOTATION,
        BGDBOPS_SPEC_ANNOTATION,
        BGDBOPS_IN_PROGRESS_ANNOTATION,
    ] {
        delete_annotation(store, cluster, key).await?;
    }
    set_annotation(store, db_ops, BGDBOPS_COMPLETED_ANNOTATION, ANNOTATION_TRUE).await?;
    info!(db_ops = %db_ops.name, cluster = %cluster.name, "Operation completed on every pod");
    Ok(())
}

/// Status to write after `progress`, or `None` if `current` already reflects it.
///
/// A finished operation is patched to `Completed` until the status says so,
/// which also repairs a status patch lost after the `completed` marker was
/// written. Anything still running shows `Pending` once.
#[must_use]
pub fn desired_status(
    current: Option<&BGDbOpsStatus>,
    progress: &DbOpsProgress,
    now: &str,
) -> Option<BGDbOpsStatus> {
    match progress {
        DbOpsProgress::Completed | DbOpsProgress::AlreadyCompleted => {
            if current.is_some_and(|s| s.status == DbOpsPhase::Completed) {
                return None;
            }
            Some(BGDbOpsStatus {
                status: DbOpsPhase::Completed,
                retries: current.map_or(0, |s| s.retries),
                completion_time: Some(now.to_string()),
            })
        }
        DbOpsProgress::Armed | DbOpsProgress::Waiting { .. } | DbOpsProgress::Busy { .. } => {
            if current.is_some() {
                return None;
            }
            Some(BGDbOpsStatus::default())
        }
    }
}

/// Reconciles a `BGDbOps`.
///
/// # Errors
///
/// Pod listing, annotation or status update failures.
pub async fn reconcile_bgdbops(client: Client, db_ops: BGDbOps) -> Result<DbOpsProgress> {
    let namespace = db_ops.namespace().unwrap_or_default();
    let name = db_ops.name_any();
    debug!(namespace = %namespace, name = %name, "Reconciling BGDbOps");

    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let selector = format!("{CLUSTER_NAME_LABEL}={}", db_ops.spec.bg_cluster);
    let params = ListParams::default().labels(&selector);
    let pod_list = retry_api_call(
        || pods.list(&params),
        &format!("list Pods {namespace}/{selector}"),
    )
    .await?;
    let pod_names: Vec<String> = pod_list.items.iter().map(ResourceExt::name_any).collect();

    let store = KubeAnnotationStore::new(client.clone());
    let progress = advance(&store, &namespace, &name, &db_ops.spec, &pod_names).await?;

    match &progress {
        DbOpsProgress::Waiting { done, total } => {
            debug!(name = %name, done = done, total = total, "Waiting for pods");
        }
        DbOpsProgress::Busy { holder } => {
            info!(name = %name, holder = %holder, "BGCluster busy with another operation");
        }
        _ => {}
    }

    let now = Utc::now().to_rfc3339();
    if let Some(status) = desired_status(db_ops.status.as_ref(), &progress, &now) {
        let phase = status.status;
        let api: Api<BGDbOps> = Api::namespaced(client, &namespace);
        api.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await
        .with_context(|| {
            format!("failed to update {KIND_BG_DB_OPS} {namespace}/{name} status")
        })?;
        debug!(name = %name, phase = ?phase, "Updated BGDbOps status");
    }
    Ok(progress)
}

#[cfg(test)]
#[path = "bgdbops_tests.rs"]
mod bgdbops_tests;
