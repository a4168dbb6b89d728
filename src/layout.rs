//! Target directory assembly.
//!
//! [`ensure_layout`] guarantees the fixed directory set the assembled bundle
//! relies on; every creation is idempotent, so re-running against a partially
//! built target is safe. Static resource copies are full-tree replacements,
//! never incremental merges.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::PackError;

/// Directories guaranteed to exist after assembly, relative to the target
/// root.
pub const TARGET_DIRS: [&str; 6] = [
    "runtimes",
    "log",
    "database",
    "data/files",
    "data/tmp",
    ".local",
];

/// Static resource trees copied from the buildpack into the target root.
const STATIC_TREES: [&str; 2] = ["etc", "lib"];

/// Create the fixed target layout. Pre-existing directories are fine.
pub fn ensure_layout(build_dir: &Path) -> Result<(), PackError> {
    for dir in TARGET_DIRS {
        let path = build_dir.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))
            .map_err(PackError::AssemblyFailed)?;
    }
    debug!(root = %build_dir.display(), "target layout ensured");
    Ok(())
}

/// Copy the buildpack's static configuration and helper-library trees into
/// the target. Each destination tree is replaced wholesale.
pub fn copy_static_resources(buildpack_dir: &Path, build_dir: &Path) -> Result<(), PackError> {
    for tree in STATIC_TREES {
        let src = buildpack_dir.join(tree);
        if !src.is_dir() {
            warn!(path = %src.display(), "buildpack resource tree missing, skipping");
            continue;
        }
        replace_tree(&src, &build_dir.join(tree)).map_err(PackError::AssemblyFailed)?;
    }
    Ok(())
}

/// Copy the buildpack's monitoring-agent tree into the target. Only called
/// when a license key is configured.
pub fn copy_apm_tree(buildpack_dir: &Path, build_dir: &Path) -> Result<(), PackError> {
    let src = buildpack_dir.join("apm");
    if !src.is_dir() {
        warn!(path = %src.display(), "buildpack has no apm tree, skipping");
        return Ok(());
    }
    replace_tree(&src, &build_dir.join("apm")).map_err(PackError::AssemblyFailed)
}

fn replace_tree(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_dir_all(dst).with_context(|| format!("failed to clear {}", dst.display()))?;
    }
    copy_recursive(src, dst)
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;

    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }
    Ok(())
}
