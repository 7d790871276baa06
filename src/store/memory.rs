// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process annotation store.
//!
//! Used by unit tests and by local dry runs. Each object carries a version
//! counter that plays the role of `resourceVersion`; conflicts can be injected
//! to exercise the retry paths.

use super::{AnnotationStore, CasOutcome, ObjectRef};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Entry {
    annotations: BTreeMap<String, String>,
    version: u64,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<ObjectRef, Entry>,
    pending_conflicts: u32,
    writes: Vec<(ObjectRef, String, Option<String>)>,
}

/// [`AnnotationStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    inner: Mutex<Inner>,
}

impl MemoryAnnotationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) an object with the given annotations.
    pub fn insert<'a>(
        &self,
        obj: &ObjectRef,
        annotations: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        let annotations = annotations
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.lock().objects.insert(
            obj.clone(),
            Entry {
                annotations,
                version: 0,
            },
        );
    }

    /// Write a value directly, bypassing the conditional path. Bumps the version.
    pub fn put(&self, obj: &ObjectRef, key: &str, value: &str) {
        let mut inner = self.lock();
        let entry = inner.objects.entry(obj.clone()).or_default();
        entry.annotations.insert(key.to_string(), value.to_string());
        entry.version += 1;
    }

    /// Current annotations of `obj`, empty if it does not exist.
    #[must_use]
    pub fn snapshot(&self, obj: &ObjectRef) -> BTreeMap<String, String> {
        self.lock()
            .objects
            .get(obj)
            .map(|e| e.annotations.clone())
            .unwrap_or_default()
    }

    /// Current value of a single annotation.
    #[must_use]
    pub fn value(&self, obj: &ObjectRef, key: &str) -> Option<String> {
        self.snapshot(obj).get(key).cloned()
    }

    /// Make the next `n` conditional updates fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, n: u32) {
        self.lock().pending_conflicts = n;
    }

    /// Number of successful conditional writes of `key` on `obj`.
    #[must_use]
    pub fn write_count(&self, obj: &ObjectRef, key: &str) -> usize {
        self.lock()
            .writes
            .iter()
            .filter(|(o, k, _)| o == obj && k == key)
            .count()
    }

    /// Version counter of `obj`; `None` if it does not exist.
    #[must_use]
    pub fn version(&self, obj: &ObjectRef) -> Option<u64> {
        self.lock().objects.get(obj).map(|e| e.version)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge every other assertion.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl AnnotationStore for MemoryAnnotationStore {
    async fn annotations(&self, obj: &ObjectRef) -> Result<BTreeMap<String, String>, StoreError> {
        self.lock()
            .objects
            .get(obj)
            .map(|e| e.annotations.clone())
            .ok_or_else(|| obj.not_found())
    }

    async fn compare_and_swap(
        &self,
        obj: &ObjectRef,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.lock();

        if !inner.objects.contains_key(obj) {
            return Err(obj.not_found());
        }
        if inner.pending_conflicts > 0 {
            inner.pending_conflicts -= 1;
            return Err(obj.conflict());
        }

        let Some(entry) = inner.objects.get_mut(obj) else {
            return Err(obj.not_found());
        };
        let actual = entry.annotations.get(key).cloned();
        if actual.as_deref() != expected {
            return Ok(CasOutcome::Mismatch { actual });
        }

        match new {
            Some(value) => {
                entry.annotations.insert(key.to_string(), value.to_string());
            }
            None => {
                entry.annotations.remove(key);
            }
        }
        entry.version += 1;
        inner
            .writes
            .push((obj.clone(), key.to_string(), new.map(str::to_string)));

        Ok(CasOutcome::Swapped)
    }
}
