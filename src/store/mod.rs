// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation store: the coordination bus between the operator and the sidecars.
//!
//! Pods, `BGCluster`s and `BGDbOps` carry string annotations that both sides
//! read and write. There are no locks and no queues; the only guard against
//! lost updates is the API server's `resourceVersion` check.
//!
//! Every write therefore goes through [`AnnotationStore::compare_and_swap`]:
//! the helpers in this module re-read the current value, attempt a
//! conditional update against exactly that value, and retry when a
//! concurrent writer got there first.
//!
//! # Example
//!
//! ```rust
//! use bestgres::store::{get_annotation, set_annotation, MemoryAnnotationStore, ObjectRef};
//!
//! # async fn example() -> Result<(), bestgres::errors::StoreError> {
//! let store = MemoryAnnotationStore::new();
//! let pod = ObjectRef::pod("db", "orders-0");
//! store.insert(&pod, []);
//!
//! set_annotation(&store, &pod, "bgdbops.bestgres.io/completed", "true").await?;
//! let value = get_annotation(&store, &pod, "bgdbops.bestgres.io/completed").await?;
//! assert_eq!(value.as_deref(), Some("true"));
//! # Ok(())
//! # }
//! ```

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeAnnotationStore;
pub use memory::MemoryAnnotationStore;

use crate::constants::ANNOTATION_CAS_MAX_ATTEMPTS;
use crate::errors::StoreError;
use crate::labels::ANNOTATION_TRUE;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Base delay between conditional-write attempts, multiplied by the attempt number
const CAS_RETRY_BASE_MILLIS: u64 = 50;

/// Kinds of objects that carry coordination annotations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Pod,
    BGCluster,
    BGDbOps,
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Pod => "Pod",
            ObjectKind::BGCluster => "BGCluster",
            ObjectKind::BGDbOps => "BGDbOps",
        }
    }
}

/// Address of one annotated object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    #[must_use]
    pub fn new(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn pod(namespace: &str, name: &str) -> Self {
        Self::new(ObjectKind::Pod, namespace, name)
    }

    #[must_use]
    pub fn bg_cluster(namespace: &str, name: &str) -> Self {
        Self::new(ObjectKind::BGCluster, namespace, name)
    }

    #[must_use]
    pub fn bg_db_ops(namespace: &str, name: &str) -> Self {
        Self::new(ObjectKind::BGDbOps, namespace, name)
    }

    pub(crate) fn not_found(&self) -> StoreError {
        StoreError::NotFound {
            kind: self.kind.as_str(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub(crate) fn conflict(&self) -> StoreError {
        StoreError::Conflict {
            kind: self.kind.as_str(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind.as_str(), self.namespace, self.name)
    }
}

/// Result of a conditional update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The value matched `expected` and was replaced.
    Swapped,
    /// The value did not match `expected`; nothing was written.
    Mismatch { actual: Option<String> },
}

/// Key/value annotations on shared objects with conditional updates.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Fetch the full annotation map of `obj`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the object does not exist, [`StoreError::Api`] otherwise.
    async fn annotations(&self, obj: &ObjectRef) -> Result<BTreeMap<String, String>, StoreError>;

    /// Replace `key` with `new` only if its current value is `expected`.
    ///
    /// `None` as `expected` means "absent"; `None` as `new` removes the key.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when another writer updated the object between
    /// the read and the write.
    async fn compare_and_swap(
        &self,
        obj: &ObjectRef,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<CasOutcome, StoreError>;
}

/// Read a single annotation.
///
/// # Errors
///
/// Propagates store errors.
pub async fn get_annotation<S>(
    store: &S,
    obj: &ObjectRef,
    key: &str,
) -> Result<Option<String>, StoreError>
where
    S: AnnotationStore + ?Sized,
{
    Ok(store.annotations(obj).await?.get(key).cloned())
}

/// Whether `key` on `obj` currently reads `"true"`.
///
/// # Errors
///
/// Propagates store errors.
pub async fn annotation_is_true<S>(
    store: &S,
    obj: &ObjectRef,
    key: &str,
) -> Result<bool, StoreError>
where
    S: AnnotationStore + ?Sized,
{
    Ok(get_annotation(store, obj, key).await?.as_deref() == Some(ANNOTATION_TRUE))
}

/// Set `key` to `value`, retrying on lost races.
///
/// # Errors
///
/// [`StoreError::RetriesExhausted`] if every attempt lost a race, or any
/// non-conflict store error.
pub async fn set_annotation<S>(
    store: &S,
    obj: &ObjectRef,
    key: &str,
    value: &str,
) -> Result<(), StoreError>
where
    S: AnnotationStore + ?Sized,
{
    write_annotation(store, obj, key, Some(value)).await
}

/// Remove `key`, retrying on lost races. Removing an absent key succeeds.
///
/// # Errors
///
/// Same as [`set_annotation`].
pub async fn delete_annotation<S>(store: &S, obj: &ObjectRef, key: &str) -> Result<(), StoreError>
where
    S: AnnotationStore + ?Sized,
{
    write_annotation(store, obj, key, None).await
}

/// Set `key` to `value` only if it is currently absent.
///
/// Returns `true` when this call wrote the value.
///
/// # Errors
///
/// Propagates store errors; a lost race is retried.
pub async fn set_annotation_if_absent<S>(
    store: &S,
    obj: &ObjectRef,
    key: &str,
    value: &str,
) -> Result<bool, StoreError>
where
    S: AnnotationStore + ?Sized,
{
    for attempt in 1..=ANNOTATION_CAS_MAX_ATTEMPTS {
        match store.compare_and_swap(obj, key, None, Some(value)).await {
            Ok(CasOutcome::Swapped) => return Ok(true),
            Ok(CasOutcome::Mismatch { .. }) => return Ok(false),
            Err(StoreError::Conflict { .. }) => {
                warn!(object = %obj, key = key, attempt = attempt, "Conflicting update, retrying");
                backoff(attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(exhausted(obj, key))
}

async fn write_annotation<S>(
    store: &S,
    obj: &ObjectRef,
    key: &str,
    new: Option<&str>,
) -> Result<(), StoreError>
where
    S: AnnotationStore + ?Sized,
{
    for attempt in 1..=ANNOTATION_CAS_MAX_ATTEMPTS {
        let current = get_annotation(store, obj, key).await?;
        if current.as_deref() == new {
            return Ok(());
        }

        match store
            .compare_and_swap(obj, key, current.as_deref(), new)
            .await
        {
            Ok(CasOutcome::Swapped) => {
                debug!(object = %obj, key = key, value = ?new, "Annotation updated");
                return Ok(());
            }
            Ok(CasOutcome::Mismatch { actual }) => {
                debug!(
                    object = %obj,
                    key = key,
                    expected = ?current,
                    actual = ?actual,
                    attempt = attempt,
                    "Annotation changed underneath us, re-reading"
                );
            }
            Err(StoreError::Conflict { .. }) => {
                warn!(object = %obj, key = key, attempt = attempt, "Conflicting update, retrying");
            }
            Err(e) => return Err(e),
        }
        backoff(attempt).await;
    }
    Err(exhausted(obj, key))
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(Duration::from_millis(CAS_RETRY_BASE_MILLIS * u64::from(attempt))).await;
}

fn exhausted(obj: &ObjectRef, key: &str) -> StoreError {
    StoreError::RetriesExhausted {
        kind: obj.kind.as_str(),
        namespace: obj.namespace.clone(),
        name: obj.name.clone(),
        key: key.to_string(),
        attempts: ANNOTATION_CAS_MAX_ATTEMPTS,
    }
}
