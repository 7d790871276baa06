// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator-mode reconcilers.
//!
//! These are the cluster-level collaborators the per-pod sidecar depends on.
//! They write the annotations the sidecar polls and collect the per-pod
//! completion markers it reports back.
//!
//! # Available Reconcilers
//!
//! - [`reconcile_bgshardedcluster`] - Publishes the worker list and worker
//!   initialization state on the coordinator `BGCluster`
//! - [`reconcile_bgdbops`] - Arms a `BGCluster` with an operation and
//!   disarms it once every pod completed
//! - [`reconcile_bgshardeddbops`] - Fans an operation out as one `BGDbOps`
//!   per member cluster
//!
//! Kubernetes calls outside the annotation store go through
//! [`retry::retry_api_call`].

pub mod bgdbops;
pub mod bgshardedcluster;
pub mod bgshardeddbops;
pub mod retry;

pub use bgdbops::reconcile_bgdbops;
pub use bgshardedcluster::reconcile_bgshardedcluster;
pub use bgshardeddbops::reconcile_bgshardeddbops;

/// Check if a status value has actually changed compared to the current status.
///
/// Status updates trigger new reconciliations in kube-rs, so writing an
/// unchanged status on every pass would loop forever.
///
/// # Example
///
/// ```rust
/// use bestgres::reconcilers::status_changed;
///
/// assert!(status_changed(&None, &Some("Ready")));
/// assert!(!status_changed(&Some("Ready"), &Some("Ready")));
/// ```
#[must_use]
pub fn status_changed<T: PartialEq>(current_value: &Option<T>, new_value: &Option<T>) -> bool {
    current_value != new_value
}

#[cfg(test)]
mod mod_tests;
