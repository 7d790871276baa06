// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Bestgres.
//!
//! # Resource Types
//!
//! ## Clusters
//!
//! - [`BGCluster`] - One Patroni-managed PostgreSQL cluster (standalone or Citus member)
//! - [`BGShardedCluster`] - A Citus deployment of one coordinator and N worker `BGCluster`s
//!
//! ## Operations
//!
//! - [`BGDbOps`] - A maintenance operation requested against one `BGCluster`
//! - [`BGShardedDbOps`] - The same operation fanned out across a sharded cluster
//!
//! # Example: Requesting a restart
//!
//! ```rust
//! use bestgres::crd::{BGDbOpsSpec, DbOpKind};
//!
//! let spec = BGDbOpsSpec {
//!     bg_cluster: "orders".to_string(),
//!     op: DbOpKind::Restart,
//!     max_retries: 1,
//!     ..Default::default()
//! };
//! assert_eq!(spec.op.to_string(), "restart");
//! ```

use crate::errors::DbOpsError;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn default_instances() -> i32 {
    1
}

fn default_working_dir() -> String {
    "/home/postgres".to_string()
}

fn default_command() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "/launch.sh".to_string(),
        "init".to_string(),
    ]
}

/// Container image settings for the Spilo container.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Spilo image tag.
    pub tag: String,

    /// Working directory the database launch command runs in.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Command starting the database supervisor.
    ///
    /// Set this if the image does not use the default Spilo launcher.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            tag: String::new(),
            working_dir: default_working_dir(),
            command: default_command(),
        }
    }
}

/// Persistent volume settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Size of the data volume (e.g. `10Gi`).
    pub persistent_volume_size: String,

    /// Storage class of the data volume.
    pub storage_class: String,
}

/// `BGCluster` is one PostgreSQL cluster managed by Patroni.
///
/// Standalone clusters are created directly by users. Sharded members are
/// created by a `BGShardedCluster` and carry the `part-of` and `role` labels.
///
/// # Example
///
/// ```yaml
/// apiVersion: bestgres.io/v1
/// kind: BGCluster
/// metadata:
///   name: orders
/// spec:
///   instances: 2
///   volumeSpec:
///     persistentVolumeSize: 10Gi
///     storageClass: standard
///   image:
///     tag: ghcr.io/zalando/spilo-16:3.3-p1
///   bootstrapSQL:
///     - CREATE DATABASE orders;
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "bestgres.io",
    version = "v1",
    kind = "BGCluster",
    namespaced,
    shortname = "bgclu",
    doc = "BGCluster represents a Patroni-managed PostgreSQL cluster, standalone or a Citus coordinator/worker."
)]
#[kube(status = "BGClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct BGClusterSpec {
    /// Number of PostgreSQL instances; more than one forms a Patroni HA cluster.
    #[serde(default = "default_instances")]
    #[schemars(range(min = 0))]
    pub instances: i32,

    /// Data volume settings.
    #[serde(default)]
    pub volume_spec: VolumeSpec,

    /// Spilo image settings.
    #[serde(default)]
    pub image: ImageSpec,

    /// Patroni log level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patroni_log_level: Option<String>,

    /// SQL statements run once, after the role-specific bootstrap.
    #[serde(default, rename = "bootstrapSQL")]
    pub bootstrap_sql: Vec<String>,
}

/// Observed state of a `BGCluster`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BGClusterStatus {
    /// Pod names belonging to the cluster.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// `BGShardedCluster` composes a Citus coordinator and `shards` workers.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bestgres.io",
    version = "v1",
    kind = "BGShardedCluster",
    namespaced,
    shortname = "bgsclu",
    doc = "BGShardedCluster composes one coordinator BGCluster and N worker BGClusters into a Citus deployment."
)]
#[kube(status = "BGShardedClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct BGShardedClusterSpec {
    /// Number of worker clusters.
    #[schemars(range(min = 0))]
    pub shards: i32,

    /// Coordinator cluster settings.
    pub coordinator: BGClusterSpec,

    /// Settings shared by every worker cluster.
    pub workers: BGClusterSpec,
}

/// Observed state of a `BGShardedCluster`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BGShardedClusterStatus {
    /// Overall state (`Ready` once propagation ran).
    #[serde(default)]
    pub status: String,

    /// Name of the coordinator `BGCluster`.
    #[serde(default)]
    pub coordinator_cluster: String,

    /// Names of the worker `BGCluster`s.
    #[serde(default)]
    pub worker_clusters: Vec<String>,
}

/// Database operation kinds understood by the sidecar.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbOpKind {
    /// Restart every pod of the cluster, one self-termination per pod.
    #[default]
    Restart,
    /// Take a backup.
    Backup,
    /// Run a benchmark.
    Benchmark,
    /// Repack bloated tables.
    Repack,
    /// Vacuum databases.
    Vacuum,
}

impl DbOpKind {
    /// Every operation kind, in declaration order.
    pub const ALL: [DbOpKind; 5] = [
        DbOpKind::Restart,
        DbOpKind::Backup,
        DbOpKind::Benchmark,
        DbOpKind::Repack,
        DbOpKind::Vacuum,
    ];

    /// Annotation value of this operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DbOpKind::Restart => "restart",
            DbOpKind::Backup => "backup",
            DbOpKind::Benchmark => "benchmark",
            DbOpKind::Repack => "repack",
            DbOpKind::Vacuum => "vacuum",
        }
    }
}

impl fmt::Display for DbOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbOpKind {
    type Err = DbOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DbOpKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DbOpsError::UnknownOperation(s.to_string()))
    }
}

/// Options for `restart`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartOptions {
    /// Only restart pods Patroni flags as `pending_restart`.
    #[serde(default)]
    pub only_pending_restart: bool,
}

/// Options for `backup`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    /// Backup destination URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Options for `benchmark`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkOptions {
    /// pgbench scale factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i32>,
    /// Concurrent clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<i32>,
    /// Run duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i32>,
}

/// Options for `repack`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepackOptions {
    /// Databases to repack; empty means all.
    #[serde(default)]
    pub databases: Vec<String>,
}

/// Options for `vacuum`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VacuumOptions {
    /// Run `VACUUM FULL`.
    #[serde(default)]
    pub full: bool,
    /// Also `ANALYZE`.
    #[serde(default)]
    pub analyze: bool,
    /// Databases to vacuum; empty means all.
    #[serde(default)]
    pub databases: Vec<String>,
}

/// `BGDbOps` requests one operation against one `BGCluster`.
///
/// # Example
///
/// ```yaml
/// apiVersion: bestgres.io/v1
/// kind: BGDbOps
/// metadata:
///   name: orders-restart
/// spec:
///   bgCluster: orders
///   op: restart
///   maxRetries: 1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "bestgres.io",
    version = "v1",
    kind = "BGDbOps",
    plural = "bgdbops",
    namespaced,
    shortname = "bgdbo",
    doc = "BGDbOps requests a maintenance operation (restart, backup, benchmark, repack, vacuum) on a BGCluster."
)]
#[kube(status = "BGDbOpsStatus")]
#[serde(rename_all = "camelCase")]
pub struct BGDbOpsSpec {
    /// Target `BGCluster` in the same namespace.
    #[serde(rename = "bgCluster")]
    pub bg_cluster: String,

    /// Operation to perform.
    pub op: DbOpKind,

    /// Retry budget for the whole operation.
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub max_retries: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repack: Option<RepackOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vacuum: Option<VacuumOptions>,
}

/// Lifecycle phase of a `BGDbOps`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum DbOpsPhase {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Observed state of a `BGDbOps`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BGDbOpsStatus {
    /// Current phase.
    #[serde(default)]
    pub status: DbOpsPhase,

    /// Failed attempts so far.
    #[serde(default)]
    pub retries: i32,

    /// RFC 3339 timestamp the operation completed at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

/// Operation template copied into every per-cluster `BGDbOps`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BGDbOpsClusterSpec {
    pub op: DbOpKind,

    #[serde(default)]
    pub max_retries: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repack: Option<RepackOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vacuum: Option<VacuumOptions>,
}

impl BGDbOpsClusterSpec {
    /// Per-cluster spec targeting `bg_cluster`.
    #[must_use]
    pub fn for_cluster(&self, bg_cluster: &str) -> BGDbOpsSpec {
        BGDbOpsSpec {
            bg_cluster: bg_cluster.to_string(),
            op: self.op,
            max_retries: self.max_retries,
            restart: self.restart.clone(),
            backup: self.backup.clone(),
            benchmark: self.benchmark.clone(),
            repack: self.repack.clone(),
            vacuum: self.vacuum.clone(),
        }
    }
}

/// `BGShardedDbOps` fans one operation out to every member of a `BGShardedCluster`.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bestgres.io",
    version = "v1",
    kind = "BGShardedDbOps",
    plural = "bgshardeddbops",
    namespaced,
    shortname = "bgsdbo",
    doc = "BGShardedDbOps fans a maintenance operation out to the coordinator and every worker of a BGShardedCluster."
)]
#[kube(status = "BGShardedDbOpsStatus")]
#[serde(rename_all = "camelCase")]
pub struct BGShardedDbOpsSpec {
    /// Target `BGShardedCluster` in the same namespace.
    #[serde(rename = "bgShardedCluster")]
    pub bg_sharded_cluster: String,

    /// Operation applied to every member cluster.
    #[serde(rename = "bgDbOpsClusterSpec")]
    pub bg_db_ops_cluster_spec: BGDbOpsClusterSpec,
}

/// Observed state of a `BGShardedDbOps`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BGShardedDbOpsStatus {
    /// `In Progress` once every member `BGDbOps` exists, `Completed` when all finished.
    #[serde(default)]
    pub status: String,
}
