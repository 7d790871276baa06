// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation store backed by the Kubernetes API server.
//!
//! A conditional update is a `GET` followed by a `PUT` of the same object.
//! The `PUT` carries the `resourceVersion` from the `GET`, so the API server
//! rejects it with HTTP 409 if anyone else wrote the object in between.

use super::{AnnotationStore, CasOutcome, ObjectKind, ObjectRef};
use crate::crd::{BGCluster, BGDbOps};
use crate::errors::StoreError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::PostParams;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// [`AnnotationStore`] over Pods, `BGCluster`s and `BGDbOps`.
#[derive(Clone)]
pub struct KubeAnnotationStore {
    client: Client,
}

impl KubeAnnotationStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnnotationStore for KubeAnnotationStore {
    async fn annotations(&self, obj: &ObjectRef) -> Result<BTreeMap<String, String>, StoreError> {
        match obj.kind {
            ObjectKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &obj.namespace);
                Ok(fetch(&api, obj).await?.annotations().clone())
            }
            ObjectKind::BGCluster => {
                let api: Api<BGCluster> = Api::namespaced(self.client.clone(), &obj.namespace);
                Ok(fetch(&api, obj).await?.annotations().clone())
            }
            ObjectKind::BGDbOps => {
                let api: Api<BGDbOps> = Api::namespaced(self.client.clone(), &obj.namespace);
                Ok(fetch(&api, obj).await?.annotations().clone())
            }
        }
    }

    async fn compare_and_swap(
        &self,
        obj: &ObjectRef,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> Result<CasOutcome, StoreError> {
        match obj.kind {
            ObjectKind::Pod => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &obj.namespace);
                swap(&api, obj, key, expected, new).await
            }
            ObjectKind::BGCluster => {
                let api: Api<BGCluster> = Api::namespaced(self.client.clone(), &obj.namespace);
                swap(&api, obj, key, expected, new).await
            }
            ObjectKind::BGDbOps => {
                let api: Api<BGDbOps> = Api::namespaced(self.client.clone(), &obj.namespace);
                swap(&api, obj, key, expected, new).await
            }
        }
    }
}

async fn fetch<K>(api: &Api<K>, obj: &ObjectRef) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.get(&obj.name).await {
        Ok(resource) => Ok(resource),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(obj.not_found()),
        Err(e) => Err(StoreError::Api(e)),
    }
}

async fn swap<K>(
    api: &Api<K>,
    obj: &ObjectRef,
    key: &str,
    expected: Option<&str>,
    new: Option<&str>,
) -> Result<CasOutcome, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let mut resource = fetch(api, obj).await?;

    let actual = resource.annotations().get(key).cloned();
    if actual.as_deref() != expected {
        return Ok(CasOutcome::Mismatch { actual });
    }

    match new {
        Some(value) => {
            resource
                .annotations_mut()
                .insert(key.to_string(), value.to_string());
        }
        None => {
            resource.annotations_mut().remove(key);
        }
    }

    // The fetched resourceVersion rides along, so a concurrent write yields 409.
    match api.replace(&obj.name, &PostParams::default(), &resource).await {
        Ok(_) => {
            debug!(object = %obj, key = key, "Conditional annotation update applied");
            Ok(CasOutcome::Swapped)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(obj.conflict()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(obj.not_found()),
        Err(e) => Err(StoreError::Api(e)),
    }
}
