// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Init-container mode: install this binary where the Spilo container runs it.

use crate::constants::{INIT_BINARY_MODE, INIT_BINARY_OWNER};
use anyhow::{Context as _, Result};
use std::os::unix::fs::{chown, PermissionsExt};
use std::path::Path;
use tracing::info;

/// Copy `source` to `destination`, make it read+execute only and hand it to `uid:gid`.
///
/// # Errors
///
/// Fails if the copy, chmod or chown fails.
pub async fn install_binary(source: &Path, destination: &Path, uid: u32, gid: u32) -> Result<()> {
    let bytes = tokio::fs::copy(source, destination)
        .await
        .with_context(|| {
            format!(
                "failed to copy {} to {}",
                source.display(),
                destination.display()
            )
        })?;

    tokio::fs::set_permissions(destination, std::fs::Permissions::from_mode(INIT_BINARY_MODE))
        .await
        .with_context(|| format!("failed to chmod {}", destination.display()))?;

    chown(destination, Some(uid), Some(gid))
        .with_context(|| format!("failed to chown {} to {uid}:{gid}", destination.display()))?;

    info!(
        source = %source.display(),
        destination = %destination.display(),
        bytes = bytes,
        uid = uid,
        gid = gid,
        "Installed controller binary"
    );
    Ok(())
}

/// Install the running executable at `destination`.
///
/// # Errors
///
/// Fails if the executable path cannot be resolved or the install fails.
pub async fn run_init(destination: &Path) -> Result<()> {
    let source = std::env::current_exe().context("failed to resolve current executable")?;
    install_binary(&source, destination, INIT_BINARY_OWNER, INIT_BINARY_OWNER).await
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod init_tests;
