// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `BGShardedCluster` reconciliation: worker list propagation.
//!
//! The coordinator sidecar never looks at the `BGShardedCluster` itself. It
//! reads two derived annotations on its own `BGCluster`, and this reconciler
//! keeps them current:
//!
//! - `bgshardedcluster.bestgres.io/workers`: JSON array of worker names
//! - `bgshardedcluster.bestgres.io/<worker>-initialized`: a copy of each
//!   worker's `bgcluster.bestgres.io/initialized`
//!
//! Member clusters are named `<name>-coordinator` and `<name>-worker-<i>`.

use super::status_changed;
use crate::constants::{COORDINATOR_HOST_SUFFIX, KIND_BG_SHARDED_CLUSTER};
use crate::crd::{BGShardedCluster, BGShardedClusterStatus};
use crate::errors::StoreError;
use crate::labels::{
    worker_initialized_annotation, ANNOTATION_FALSE, ANNOTATION_TRUE,
    BGCLUSTER_INITIALIZED_ANNOTATION, BGSHARDEDCLUSTER_WORKERS_ANNOTATION,
};
use crate::store::{
    get_annotation, set_annotation, AnnotationStore, KubeAnnotationStore, ObjectRef,
};
use anyhow::{Context as _, Result};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

/// Status value once propagation ran
pub const SHARDED_CLUSTER_READY: &str = "Ready";

/// Names of the coordinator and worker `BGCluster`s of a sharded cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardedMembers {
    pub coordinator: String,
    pub workers: Vec<String>,
}

impl ShardedMembers {
    /// Member names for `name` with `shards` workers. Negative counts mean none.
    ///
    /// ```rust
    /// use bestgres::reconcilers::bgshardedcluster::ShardedMembers;
    ///
    /// let members = ShardedMembers::for_cluster("shop", 2);
    /// assert_eq!(members.coordinator, "shop-coordinator");
    /// assert_eq!(members.workers, vec!["shop-worker-0", "shop-worker-1"]);
    /// ```
    #[must_use]
    pub fn for_cluster(name: &str, shards: i32) -> Self {
        let shards = u32::try_from(shards).unwrap_or(0);
        Self {
            coordinator: format!("{name}{COORDINATOR_HOST_SUFFIX}"),
            workers: (0..shards).map(|i| format!("{name}-worker-{i}")).collect(),
        }
    }
}

/// Publish the worker list and mirror each worker's initialized marker onto the coordinator.
///
/// Returns the number of workers that currently report initialized. A
/// worker `BGCluster` that does not exist yet is mirrored as `"false"`.
///
/// # Errors
///
/// Fails if the coordinator `BGCluster` is missing or an annotation write
/// keeps losing races.
pub async fn propagate_workers<S>(
    store: &S,
    namespace: &str,
    members: &ShardedMembers,
) -> Result<usize>
where
    S: AnnotationStore + ?Sized,
{
    let coordinator = ObjectRef::bg_cluster(namespace, &members.coordinator);
    let workers_json = serde_json::to_string(&members.workers)?;
    set_annotation(store, &coordinator, BGSHARDEDCLUSTER_WORKERS_ANNOTATION, &workers_json)
        .await
        .with_context(|| format!("failed to publish worker list on {coordinator}"))?;

    let mut initialized = 0;
    for worker in &members.workers {
        let worker_ref = ObjectRef::bg_cluster(namespace, worker);
        let marker = get_annotation(store, &worker_ref, BGCLUSTER_INITIALIZED_ANNOTATION).await;
        let value = match marker {
            Ok(value) => value.unwrap_or_else(|| ANNOTATION_FALSE.to_string()),
            Err(StoreError::NotFound { .. }) => {
                debug!(worker = %worker, "Worker BGCluster does not exist yet");
                ANNOTATION_FALSE.to_string()
            }
            Err(e) => return Err(e).with_context(|| format!("failed to read {worker_ref}")),
        };
        if value == ANNOTATION_TRUE {
            initialized += 1;
        }

        set_annotation(store, &coordinator, &worker_initialized_annotation(worker), &value)
            .await
            .with_context(|| format!("failed to mirror {worker} onto {coordinator}"))?;
    }

    Ok(initialized)
}

/// Reconciles a `BGShardedCluster`.
///
/// # Errors
///
/// Propagation or status update failures; the controller retries.
pub async fn reconcile_bgshardedcluster(client: Client, sharded: BGShardedCluster) -> Result<()> {
    let namespace = sharded.namespace().unwrap_or_default();
    let name = sharded.name_any();
    let members = ShardedMembers::for_cluster(&name, sharded.spec.shards);

    info!(
        namespace = %namespace,
        name = %name,
        workers = members.workers.len(),
        "Reconciling BGShardedCluster"
    );

    let store = KubeAnnotationStore::new(client.clone());
    let initialized = propagate_workers(&store, &namespace, &members).await?;
    debug!(name = %name, initialized = initialized, "Propagated worker state");

    let desired = BGShardedClusterStatus {
        status: SHARDED_CLUSTER_READY.to_string(),
        coordinator_cluster: members.coordinator,
        worker_clusters: members.workers,
    };
    if !status_changed(&sharded.status, &Some(desired.clone())) {
        return Ok(());
    }

    let api: Api<BGShardedCluster> = Api::namespaced(client, &namespace);
    let patch = json!({ "status": desired });
    if let Err(e) = api
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        warn!(kind = KIND_BG_SHARDED_CLUSTER, name = %name, error = %e, "Failed to update status");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
#[path = "bgshardedcluster_tests.rs"]
mod bgshardedcluster_tests;
