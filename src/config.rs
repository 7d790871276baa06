// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command line and environment configuration.
//!
//! Every setting can be given as a flag or through the environment variable
//! named next to it; the Kubernetes manifests use the environment.

use crate::constants::{
    DEFAULT_INIT_DESTINATION, DEFAULT_PATRONI_URL, DEFAULT_PSQL_BIN, DEFAULT_PSQL_USER,
    DEFAULT_SPILO_CONFIG_PATH, DEFAULT_SUPERVISOR_STOP_COMMAND,
};
use crate::errors::ConfigError;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Process role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Per-pod sidecar: bootstrap, then poll for operations
    Controller,
    /// Cluster-level coordination controllers
    Operator,
    /// Init container: install this binary for the sidecar
    Init,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "bestgres", version, about, rename_all = "kebab-case")]
pub struct Cli {
    /// Process role
    #[arg(long, env = "MODE", value_enum)]
    pub mode: Mode,

    /// Name of the pod the sidecar runs in
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Namespace of the pod the sidecar runs in
    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: Option<String>,

    /// Patroni status endpoint polled for readiness
    #[arg(long, env = "BESTGRES_PATRONI_URL", default_value = DEFAULT_PATRONI_URL)]
    pub patroni_url: String,

    /// Spilo configuration script patched before launch
    #[arg(long, env = "BESTGRES_SPILO_CONFIG", default_value = DEFAULT_SPILO_CONFIG_PATH)]
    pub spilo_config: PathBuf,

    /// SQL client binary
    #[arg(long, env = "BESTGRES_PSQL_BIN", default_value = DEFAULT_PSQL_BIN)]
    pub psql_bin: String,

    /// Database superuser
    #[arg(long, env = "BESTGRES_PSQL_USER", default_value = DEFAULT_PSQL_USER)]
    pub psql_user: String,

    /// Command that stops the database supervisor, split on whitespace
    #[arg(long, env = "BESTGRES_SUPERVISOR_STOP", default_value = DEFAULT_SUPERVISOR_STOP_COMMAND)]
    pub supervisor_stop: String,

    /// Where init mode installs the binary
    #[arg(long, env = "BESTGRES_INIT_DESTINATION", default_value = DEFAULT_INIT_DESTINATION)]
    pub init_destination: PathBuf,
}

/// Settings of the sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub pod_name: String,
    pub namespace: String,
    pub patroni_url: String,
    pub spilo_config: PathBuf,
    pub psql_bin: String,
    pub psql_user: String,
    pub supervisor_stop: Vec<String>,
}

impl ControllerConfig {
    /// # Errors
    ///
    /// [`ConfigError::MissingEnv`] when the pod name or namespace is missing or empty.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        Ok(Self {
            pod_name: required(cli.pod_name.as_deref(), "POD_NAME")?,
            namespace: required(cli.pod_namespace.as_deref(), "POD_NAMESPACE")?,
            patroni_url: cli.patroni_url.clone(),
            spilo_config: cli.spilo_config.clone(),
            psql_bin: cli.psql_bin.clone(),
            psql_user: cli.psql_user.clone(),
            supervisor_stop: cli
                .supervisor_stop
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }
}

fn required(value: Option<&str>, name: &'static str) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::MissingEnv(name)),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
