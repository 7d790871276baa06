// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label and annotation keys shared by the sidecar and the operator.
//!
//! Annotations are the only coordination channel between the cluster-level
//! operator and the per-pod sidecar, so every key used on either side is
//! defined here and nowhere else.

// ============================================================================
// Pod Labels
// ============================================================================

/// Label set by the `StatefulSet` template naming the owning `BGCluster`
pub const CLUSTER_NAME_LABEL: &str = "cluster-name";

// ============================================================================
// BGCluster Labels
// ============================================================================

/// Label linking a `BGCluster` to the `BGShardedCluster` it belongs to (presence only)
pub const BGCLUSTER_PART_OF_LABEL: &str = "bgcluster.bestgres.io/part-of";

/// Label carrying the Citus role of a sharded `BGCluster`
pub const BGCLUSTER_ROLE_LABEL: &str = "bgcluster.bestgres.io/role";

/// Role value for the Citus coordinator
pub const ROLE_COORDINATOR: &str = "coordinator";

/// Role value for Citus workers
pub const ROLE_WORKER: &str = "worker";

// ============================================================================
// BGCluster / Pod Annotations
// ============================================================================

/// Bootstrap marker, `<unset>` -> `"false"` -> `"true"`
pub const BGCLUSTER_INITIALIZED_ANNOTATION: &str = "bgcluster.bestgres.io/initialized";

/// Prefix of the per-pod fan-in key written on a `BGDbOps` (`bgcluster.bestgres.io/<pod>`)
pub const BGCLUSTER_ANNOTATION_PREFIX: &str = "bgcluster.bestgres.io/";

// ============================================================================
// BGShardedCluster Annotations (written on the coordinator BGCluster)
// ============================================================================

/// JSON array of worker `BGCluster` names
pub const BGSHARDEDCLUSTER_WORKERS_ANNOTATION: &str = "bgshardedcluster.bestgres.io/workers";

/// Prefix of the mirrored per-worker initialization keys
pub const BGSHARDEDCLUSTER_ANNOTATION_PREFIX: &str = "bgshardedcluster.bestgres.io/";

// ============================================================================
// BGDbOps Annotations
// ============================================================================

/// `"true"` while an operation is outstanding on a `BGCluster`
pub const BGDBOPS_PENDING_ANNOTATION: &str = "bgdbops.bestgres.io/pending";

/// `"true"` once a pod (or a whole `BGDbOps`) finished the operation
pub const BGDBOPS_COMPLETED_ANNOTATION: &str = "bgdbops.bestgres.io/completed";

/// Name of the `BGDbOps` currently driving the `BGCluster`
pub const BGDBOPS_IN_PROGRESS_ANNOTATION: &str = "bgdbops.bestgres.io/in-progress";

/// JSON-encoded `BGDbOpsSpec` of the in-progress operation
pub const BGDBOPS_SPEC_ANNOTATION: &str = "bgdbops.bestgres.io/spec";

/// Operation name of the in-progress operation
pub const BGDBOPS_OP_ANNOTATION: &str = "bgdbops.bestgres.io/op";

/// Annotation value meaning "yes"
pub const ANNOTATION_TRUE: &str = "true";

/// Annotation value meaning "no"
pub const ANNOTATION_FALSE: &str = "false";

/// Key the coordinator watches for a worker's bootstrap state.
///
/// ```rust
/// use bestgres::labels::worker_initialized_annotation;
///
/// assert_eq!(
///     worker_initialized_annotation("shop-worker-0"),
///     "bgshardedcluster.bestgres.io/shop-worker-0-initialized"
/// );
/// ```
#[must_use]
pub fn worker_initialized_annotation(worker: &str) -> String {
    format!("{BGSHARDEDCLUSTER_ANNOTATION_PREFIX}{worker}-initialized")
}

/// Key a pod writes on a `BGDbOps` once it finished a restart.
///
/// ```rust
/// use bestgres::labels::pod_completion_annotation;
///
/// assert_eq!(pod_completion_annotation("shop-0"), "bgcluster.bestgres.io/shop-0");
/// ```
#[must_use]
pub fn pod_completion_annotation(pod: &str) -> String {
    format!("{BGCLUSTER_ANNOTATION_PREFIX}{pod}")
}
