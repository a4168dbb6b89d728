//! Build context construction from the environment.
//!
//! All environment-derived configuration is read exactly once, at pipeline
//! start, into an immutable [`BuildContext`]. No other component reads the
//! ambient environment; everything downstream receives a `&BuildContext`.
//!
//! # Environment Variables
//!
//! ## Required (enforced by preflight, not here)
//! - `DATABASE_URL`: database connection descriptor for the assembled app
//! - `ADMIN_PASSWORD`: administrative credential for the assembled app
//!
//! ## Optional
//! - `BUILDPACK_DIR`: root of the buildpack's static resources - default: "."
//! - `BLOBSTORE_URL`: artifact blobstore root - default: the public blobstore
//! - `FORCED_RUNTIME_URL`: override URL for the application runtime archive
//! - `FORCED_COMPILER_URL`: override URL for the model compiler archive
//!   (also relaxes the compiler's own version-compatibility check)
//! - `FORCE_WRITE_BUILD_ERRORS`: truthy flag forcing structured error output
//!   regardless of the resolved runtime version
//! - `BASE_IMAGE_JDK_ROOT`: path to a JDK pre-baked into the base image
//! - `BASE_IMAGE_RUNTIME_CACHE`: path to a runtime cache pre-baked into the
//!   base image
//! - `APM_LICENSE_KEY`: enables the optional performance-monitoring agent
//! - `BUILD_STATUS_CALLBACK_URL`: endpoint receiving the failure payload

use std::path::PathBuf;

const DEFAULT_BLOBSTORE_URL: &str = "https://blobstore.packstage.io";

/// Immutable per-invocation build configuration.
///
/// Constructed once via [`BuildContext::from_env`] (or
/// [`BuildContext::from_lookup`] with an injected lookup in tests) and passed
/// by reference to every pipeline component.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Target directory the bundle is assembled into.
    pub build_dir: PathBuf,

    /// Shared artifact cache root, durable across invocations.
    pub cache_dir: PathBuf,

    /// Root of the buildpack's static resource trees (`etc/`, `lib/`, `apm/`).
    pub buildpack_dir: PathBuf,

    /// Database connection descriptor. Mandatory; validated by preflight.
    pub database_url: Option<String>,

    /// Administrative credential. Mandatory; validated by preflight.
    pub admin_password: Option<String>,

    /// Override URL for the application runtime archive.
    pub forced_runtime_url: Option<String>,

    /// Override URL for the model compiler archive.
    pub forced_compiler_url: Option<String>,

    /// Force the structured-error flag onto the compiler command line.
    pub force_write_build_errors: bool,

    /// JDK pre-baked into the base image, if any.
    pub baked_jdk_root: Option<PathBuf>,

    /// Runtime cache pre-baked into the base image, if any.
    pub baked_runtime_cache: Option<PathBuf>,

    /// License key enabling the monitoring-agent stages.
    pub apm_license_key: Option<String>,

    /// Endpoint for the build-failure status payload.
    pub callback_url: Option<String>,

    /// Blobstore root for computed artifact URLs.
    pub blobstore_url: String,
}

impl BuildContext {
    /// Build a context from the process environment.
    pub fn from_env(build_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self::from_lookup(build_dir, cache_dir, |key| std::env::var(key).ok())
    }

    /// Build a context from an injectable variable lookup.
    ///
    /// Tests pass a closure over a map instead of touching the process
    /// environment.
    pub fn from_lookup<F>(build_dir: PathBuf, cache_dir: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            build_dir,
            cache_dir,
            buildpack_dir: lookup("BUILDPACK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            database_url: non_empty(lookup("DATABASE_URL")),
            admin_password: non_empty(lookup("ADMIN_PASSWORD")),
            forced_runtime_url: non_empty(lookup("FORCED_RUNTIME_URL")),
            forced_compiler_url: non_empty(lookup("FORCED_COMPILER_URL")),
            force_write_build_errors: lookup("FORCE_WRITE_BUILD_ERRORS")
                .as_deref()
                .map(is_truthy)
                .unwrap_or(false),
            baked_jdk_root: non_empty(lookup("BASE_IMAGE_JDK_ROOT")).map(PathBuf::from),
            baked_runtime_cache: non_empty(lookup("BASE_IMAGE_RUNTIME_CACHE")).map(PathBuf::from),
            apm_license_key: non_empty(lookup("APM_LICENSE_KEY")),
            callback_url: non_empty(lookup("BUILD_STATUS_CALLBACK_URL")),
            blobstore_url: non_empty(lookup("BLOBSTORE_URL"))
                .unwrap_or_else(|| DEFAULT_BLOBSTORE_URL.to_string()),
        }
    }

    /// The local-tools subtree inside the target directory.
    ///
    /// Toolchain artifacts are linked here; the post-compile sweep preserves
    /// this subtree and nothing else.
    pub fn local_root(&self) -> PathBuf {
        self.build_dir.join(".local")
    }

    /// Scratch area inside the target directory (error file, forced-URL
    /// downloads).
    pub fn tmp_root(&self) -> PathBuf {
        self.build_dir.join("data").join("tmp")
    }

    /// Path the compiler is asked to write structured errors to.
    pub fn build_errors_file(&self) -> PathBuf {
        self.tmp_root().join("builderrors.json")
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.apm_license_key.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
