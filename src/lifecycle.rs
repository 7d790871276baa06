// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Self-termination of the sidecar's own pod.
//!
//! A restart is carried out by stopping the database supervisor and deleting
//! the pod; the StatefulSet controller recreates it and the fresh sidecar
//! reports completion.

use crate::reconcilers::retry::retry_api_call;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::{Api, Client};
use tokio::process::Command;
use tracing::{info, warn};

/// Capability to end this pod so that its supervisor recreates it.
#[async_trait]
pub trait PodLifecycle: Send + Sync {
    /// Stop the database and delete `pod`.
    ///
    /// # Errors
    ///
    /// Fails if the pod could not be deleted.
    async fn request_self_termination(&self, pod: &str) -> Result<()>;
}

/// [`PodLifecycle`] that runs a local stop command and deletes the pod through the API server.
pub struct KubePodLifecycle {
    client: Client,
    namespace: String,
    stop_command: Vec<String>,
}

impl KubePodLifecycle {
    #[must_use]
    pub fn new(client: Client, namespace: &str, stop_command: Vec<String>) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            stop_command,
        }
    }

    async fn stop_supervisor(&self) {
        let Some((program, args)) = self.stop_command.split_first() else {
            return;
        };

        match Command::new(program).args(args).output().await {
            Ok(output) if output.status.success() => {
                info!(command = ?self.stop_command, "Stopped database supervisor");
            }
            Ok(output) => {
                warn!(
                    command = ?self.stop_command,
                    code = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Supervisor stop command failed, deleting pod anyway"
                );
            }
            Err(e) => {
                warn!(
                    command = ?self.stop_command,
                    error = %e,
                    "Could not run supervisor stop command, deleting pod anyway"
                );
            }
        }
    }
}

#[async_trait]
impl PodLifecycle for KubePodLifecycle {
    async fn request_self_termination(&self, pod: &str) -> Result<()> {
        self.stop_supervisor().await;

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let result = retry_api_call(
            || async { api.delete(pod, &DeleteParams::default()).await },
            &format!("delete Pod {}/{pod}", self.namespace),
        )
        .await;

        match result {
            Ok(_) => {
                info!(pod = pod, namespace = %self.namespace, "Deleted own pod for restart");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete pod {pod}")),
        }
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<kube::Error>(), Some(kube::Error::Api(ae)) if ae.code == 404)
}
