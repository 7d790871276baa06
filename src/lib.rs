// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Bestgres - Patroni/Citus sidecar and coordination operator
//!
//! One binary, three modes selected by `MODE`:
//!
//! - **controller** - per-pod sidecar next to a Spilo container: patches the
//!   Spilo config, starts the database, bootstraps the pod's Citus role once
//!   per cluster, then polls its `BGCluster` for database operations
//! - **operator** - cluster-level controllers that publish worker state for
//!   Citus coordinators and drive `BGDbOps` to completion
//! - **init** - init container that installs the binary for the sidecar
//!
//! The sidecar and the operator never talk directly. Every handshake is an
//! annotation on a Pod, `BGCluster` or `BGDbOps`, written through the
//! conditional-update helpers in [`store`].
//!
//! ## Modules
//!
//! - [`bootstrap`] - role classification and the one-shot bootstrap state machine
//! - [`controller`] - sidecar entrypoint and the reconciliation loop
//! - [`dbops`] - per-pod operation dispatcher
//! - [`sql`] - psql-backed statement executor with transient retries
//! - [`readiness`] - Patroni readiness polling
//! - [`spilo`] - Spilo config patching and database launch
//! - [`store`] - annotation store with compare-and-swap semantics
//! - [`wait`] - polling wait primitive with per-call timeout policy
//! - [`reconcilers`] - operator-mode reconcilers
//! - [`crd`] - Custom Resource Definitions
//!
//! ## Example
//!
//! ```rust
//! use bestgres::bootstrap::{classify, Role};
//! use std::collections::BTreeMap;
//!
//! let mut labels = BTreeMap::new();
//! labels.insert("bgcluster.bestgres.io/part-of".to_string(), "shop".to_string());
//! labels.insert("bgcluster.bestgres.io/role".to_string(), "worker".to_string());
//!
//! assert_eq!(classify("shop-worker-0", &labels).unwrap(), Role::Worker);
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod dbops;
pub mod errors;
pub mod init;
pub mod labels;
pub mod lifecycle;
pub mod metrics;
pub mod readiness;
pub mod reconcilers;
pub mod spilo;
pub mod sql;
pub mod store;
pub mod wait;

#[cfg(test)]
pub(crate) mod test_support;
