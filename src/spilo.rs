// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Spilo configuration patching and database process launch.
//!
//! Both run once at sidecar start, before readiness polling.

use crate::constants::SPILO_CONFIG_MODE;
use crate::errors::ConfigError;
use anyhow::{Context as _, Result};
use regex::Regex;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::LazyLock;
use tokio::process::{Child, Command};
use tracing::{debug, info};

static PRELOAD_LIBRARIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)shared_preload_libraries:\s*.bg_mon").expect("valid static regex")
});

static HBA_LOCALHOST_V4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)- host\s+all\s+all\s+127\.0\.0\.1/32\s+md5[ \t]*$")
        .expect("valid static regex")
});

static HBA_LOCALHOST_V6: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)- host\s+all\s+all\s+::1/128\s+md5[ \t]*$").expect("valid static regex")
});

const PRELOAD_WITH_CITUS: &str = "shared_preload_libraries: 'citus,bg_mon";

const HBA_V4_TRUST: &str =
    "- host  all  all  10.0.0.0/8  trust\n    - host  all  all  127.0.0.1/32  trust";

const HBA_V6_TRUST: &str = "- host  all  all  ::1/128  trust";

/// Apply the sidecar's substitutions to Spilo config text.
///
/// Sharded clusters get `citus` preloaded ahead of `bg_mon`. Every cluster
/// gets `trust` authentication for localhost and the pod network instead of
/// `md5`. Returns the input unchanged if nothing matches.
#[must_use]
pub fn patch_config_text(text: &str, sharded: bool) -> String {
    let mut patched = text.to_string();
    if sharded {
        patched = PRELOAD_LIBRARIES
            .replace_all(&patched, PRELOAD_WITH_CITUS)
            .into_owned();
    }
    patched = HBA_LOCALHOST_V4
        .replace_all(&patched, HBA_V4_TRUST)
        .into_owned();
    HBA_LOCALHOST_V6
        .replace_all(&patched, HBA_V6_TRUST)
        .into_owned()
}

/// Patch the Spilo config file in place.
///
/// Returns `true` if the file was rewritten. An unchanged file is left alone.
///
/// # Errors
///
/// Fails if the file cannot be read, written or chmod-ed.
pub async fn patch_config_file(path: &Path, sharded: bool) -> Result<bool> {
    let original = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read Spilo config {}", path.display()))?;

    let patched = patch_config_text(&original, sharded);
    if patched == original {
        debug!(path = %path.display(), "Spilo config already patched");
        return Ok(false);
    }

    tokio::fs::write(path, patched)
        .await
        .with_context(|| format!("failed to write Spilo config {}", path.display()))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(SPILO_CONFIG_MODE))
        .await
        .with_context(|| format!("failed to chmod Spilo config {}", path.display()))?;

    info!(path = %path.display(), sharded = sharded, "Patched Spilo config");
    Ok(true)
}

/// Start the database entrypoint as its own process group leader.
///
/// The child is detached from the sidecar's process group so signals aimed
/// at the sidecar do not reach PostgreSQL.
///
/// # Errors
///
/// [`ConfigError::EmptyCommand`] if `command` is empty, or a spawn failure.
pub fn launch_database(cluster: &str, command: &[String], working_dir: &str) -> Result<Child> {
    let Some((program, args)) = command.split_first() else {
        return Err(ConfigError::EmptyCommand(cluster.to_string()).into());
    };

    let child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .process_group(0)
        .spawn()
        .with_context(|| format!("failed to start database process '{program}'"))?;

    info!(
        cluster = cluster,
        program = %program,
        working_dir = working_dir,
        pid = ?child.id(),
        "Started database process"
    );
    Ok(child)
}

#[cfg(test)]
#[path = "spilo_tests.rs"]
mod spilo_tests;
