//! Runtime version parsing and the two-tier version resolver.
//!
//! Resolution order is fixed: the declarative `model/metadata.json` first,
//! then a single record read from the project database. There is no third
//! fallback and no search; anything else is [`PackError::VersionUnavailable`].

use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::error::PackError;

/// Versions from here on support `--write-errors` on the compiler command
/// line.
pub const WRITE_ERRORS_SINCE: RuntimeVersion = RuntimeVersion {
    major: 6,
    minor: 4,
    patch: 0,
};

/// Semantic version of the target application runtime.
///
/// Governs which compiler, development kit and runtime archives a build
/// needs, and gates version-dependent compiler flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RuntimeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// JDK major release required by this runtime version.
    pub fn jdk_major(&self) -> &'static str {
        if *self >= RuntimeVersion::new(7, 23, 0) {
            "11"
        } else {
            "8"
        }
    }

    /// Version of the managed execution runtime the compiler runs under.
    pub fn execution_runtime_version(&self) -> &'static str {
        if *self >= RuntimeVersion::new(7, 0, 0) {
            "5.20.1"
        } else {
            "4.6.2"
        }
    }
}

impl FromStr for RuntimeVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() < 3 {
            anyhow::bail!("version '{}' does not have major.minor.patch form", s);
        }

        // Some project databases record a fourth, build-number segment;
        // only the first three are significant.
        let parse = |part: &str, name: &str| {
            part.parse::<u32>()
                .with_context(|| format!("non-numeric {} segment in version '{}'", name, s))
        };

        Ok(Self {
            major: parse(parts[0], "major")?,
            minor: parse(parts[1], "minor")?,
            patch: parse(parts[2], "patch")?,
        })
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Resolve the runtime version a project requires.
///
/// Tier one: `model/metadata.json`, key `RuntimeVersion`. Tier two: the
/// project database's metadata record. Both absent, or either present but
/// unparseable, is fatal.
pub fn resolve_version(source_root: &Path) -> Result<RuntimeVersion, PackError> {
    let metadata = source_root.join("model").join("metadata.json");
    if metadata.exists() {
        debug!(path = %metadata.display(), "resolving runtime version from metadata");
        return version_from_metadata(&metadata)
            .map_err(|e| PackError::VersionUnavailable(format!("{:#}", e)));
    }

    if let Some(project_file) = find_project_file(source_root) {
        debug!(path = %project_file.display(), "resolving runtime version from project database");
        return version_from_project_db(&project_file)
            .map_err(|e| PackError::VersionUnavailable(format!("{:#}", e)));
    }

    Err(PackError::VersionUnavailable(format!(
        "no model/metadata.json and no project file under {}",
        source_root.display()
    )))
}

/// Locate the top-level project file (`*.mpr`), if any.
///
/// Presence of a project file is also what marks an invocation as a source
/// push rather than a pre-built package.
pub fn find_project_file(source_root: &Path) -> Option<PathBuf> {
    let entries = source_root.read_dir().ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "mpr") {
            return Some(path);
        }
    }
    None
}

fn version_from_metadata(path: &Path) -> anyhow::Result<RuntimeVersion> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let declared = doc
        .get("RuntimeVersion")
        .and_then(|v| v.as_str())
        .with_context(|| format!("{} has no RuntimeVersion key", path.display()))?;

    declared
        .parse()
        .with_context(|| format!("invalid RuntimeVersion in {}", path.display()))
}

fn version_from_project_db(path: &Path) -> anyhow::Result<RuntimeVersion> {
    let conn = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )
    .with_context(|| format!("failed to open project database {}", path.display()))?;

    let recorded: String = conn
        .query_row(
            "SELECT _ProductVersion FROM _MetaData LIMIT 1",
            [],
            |row| row.get(0),
        )
        .with_context(|| format!("no version record in {}", path.display()))?;

    recorded
        .parse()
        .with_context(|| format!("invalid version '{}' in {}", recorded, path.display()))
}
