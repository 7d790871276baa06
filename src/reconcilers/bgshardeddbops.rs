// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `BGShardedDbOps` reconciliation: one `BGDbOps` per member cluster.
//!
//! The fan-out creates `<sharded-db-ops>-<cluster>` for the coordinator and
//! every worker. Each child is then driven by the `BGDbOps` reconciler; this
//! one only reports `In Progress` until every child completed.

use super::bgshardedcluster::ShardedMembers;
use crate::constants::DBOPS_REQUEUE_DURATION_SECS;
use crate::crd::{BGDbOps, BGShardedCluster, BGShardedDbOps, BGShardedDbOpsStatus, DbOpsPhase};
use crate::reconcilers::retry::retry_api_call;
use anyhow::{Context as _, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Status while member operations run
pub const SHARDED_DB_OPS_IN_PROGRESS: &str = "In Progress";

/// Status once every member operation completed
pub const SHARDED_DB_OPS_COMPLETED: &str = "Completed";

/// Members of a sharded cluster as recorded in its status, or derived from
/// its spec before the propagator has run.
#[must_use]
pub fn members_of(sharded: &BGShardedCluster) -> ShardedMembers {
    match &sharded.status {
        Some(status) if !status.coordinator_cluster.is_empty() => ShardedMembers {
            coordinator: status.coordinator_cluster.clone(),
            workers: status.worker_clusters.clone(),
        },
        _ => ShardedMembers::for_cluster(&sharded.name_any(), sharded.spec.shards),
    }
}

/// The `BGDbOps` objects a `BGShardedDbOps` fans out to, coordinator first.
#[must_use]
pub fn member_db_ops(sharded_db_ops: &BGShardedDbOps, members: &ShardedMembers) -> Vec<BGDbOps> {
    let name = sharded_db_ops.name_any();
    std::iter::once(&members.coordinator)
        .chain(&members.workers)
        .map(|cluster| BGDbOps {
            metadata: ObjectMeta {
                name: Some(format!("{name}-{cluster}")),
                namespace: sharded_db_ops.namespace(),
                ..Default::default()
            },
            spec: sharded_db_ops.spec.bg_db_ops_cluster_spec.for_cluster(cluster),
            status: None,
        })
        .collect()
}

/// `Completed` when every child reports completed, `In Progress` otherwise.
#[must_use]
pub fn aggregate_status(children: &[Option<BGDbOps>]) -> &'static str {
    let all_completed = !children.is_empty()
        && children.iter().all(|child| {
            child
                .as_ref()
                .and_then(|c| c.status.as_ref())
                .is_some_and(|s| s.status == DbOpsPhase::Completed)
        });
    if all_completed {
        SHARDED_DB_OPS_COMPLETED
    } else {
        SHARDED_DB_OPS_IN_PROGRESS
    }
}

/// Requeue policy for a given status.
#[must_use]
pub fn action_for(status: &str) -> Action {
    if status == SHARDED_DB_OPS_COMPLETED {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(DBOPS_REQUEUE_DURATION_SECS))
    }
}

/// Reconciles a `BGShardedDbOps`. Returns the resulting status value.
///
/// # Errors
///
/// The target `BGShardedCluster` is missing, or a child could not be created.
pub async fn reconcile_bgshardeddbops(
    client: Client,
    sharded_db_ops: BGShardedDbOps,
) -> Result<&'static str> {
    let namespace = sharded_db_ops.namespace().unwrap_or_default();
    let name = sharded_db_ops.name_any();

    if sharded_db_ops
        .status
        .as_ref()
        .is_some_and(|s| s.status == SHARDED_DB_OPS_COMPLETED)
    {
        debug!(name = %name, "BGShardedDbOps already completed");
        return Ok(SHARDED_DB_OPS_COMPLETED);
    }

    let target = &sharded_db_ops.spec.bg_sharded_cluster;
    let clusters: Api<BGShardedCluster> = Api::namespaced(client.clone(), &namespace);
    let sharded = retry_api_call(
        || clusters.get(target),
        &format!("get BGShardedCluster {namespace}/{target}"),
    )
    .await?;

    let db_ops_api: Api<BGDbOps> = Api::namespaced(client.clone(), &namespace);
    let children = member_db_ops(&sharded_db_ops, &members_of(&sharded));
    for child in &children {
        let child_name = child.name_any();
        match db_ops_api.create(&PostParams::default(), child).await {
            Ok(_) => {
                info!(name = %child_name, cluster = %child.spec.bg_cluster, "Created BGDbOps");
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(name = %child_name, "BGDbOps already exists");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create BGDbOps {child_name}"));
            }
        }
    }

    let mut observed = Vec::with_capacity(children.len());
    for child in &children {
        observed.push(db_ops_api.get_opt(&child.name_any()).await?);
    }
    let status = aggregate_status(&observed);

    if sharded_db_ops.status.as_ref().map(|s| s.status.as_str()) != Some(status) {
        let api: Api<BGShardedDbOps> = Api::namespaced(client, &namespace);
        let desired = BGShardedDbOpsStatus {
            status: status.to_string(),
        };
        let patch = json!({ "status": desired });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to update BGShardedDbOps {namespace}/{name} status"))?;
    }
    Ok(status)
}

#[cfg(test)]
#[path = "bgshardeddbops_tests.rs"]
mod bgshardeddbops_tests;
