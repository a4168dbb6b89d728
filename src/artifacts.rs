//! Artifact acquisition: blobstore URLs, the shared on-disk cache and the
//! fetcher seam.
//!
//! The cache holds *unpacked* artifact trees keyed by `{component}-{version}`.
//! Presence is trusted: a non-empty cache entry is never re-downloaded and
//! never checksummed. Downloads land in a `.partial` sibling first and are
//! renamed into place only after a successful unpack, so an interrupted fetch
//! can never produce a poisoned cache key.

use anyhow::{Context, Result};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BuildContext;
use crate::error::PackError;

/// Pinned web-server front-end release shipped with this buildpack.
pub const WEBSERVER_VERSION: &str = "1.27.4";

/// Pinned monitoring-agent release shipped with this buildpack.
pub const APM_AGENT_VERSION: &str = "8.10.0";

/// Logical identity of a downloadable binary dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Managed execution runtime the model compiler runs under.
    Runtime,
    /// Development kit, needed at compile time and at run time.
    Jdk,
    /// The model compiler toolchain.
    Compiler,
    /// The managed application runtime the assembled bundle ships with.
    AppRuntime,
    /// Web-serving front end.
    WebServer,
    /// Optional performance-monitoring agent.
    ApmAgent,
}

impl Component {
    /// Stable identifier used for cache keys and blobstore paths.
    pub fn key(&self) -> &'static str {
        match self {
            Component::Runtime => "runtime",
            Component::Jdk => "jdk",
            Component::Compiler => "compiler",
            Component::AppRuntime => "app-runtime",
            Component::WebServer => "webserver",
            Component::ApmAgent => "apm-agent",
        }
    }

    fn forced_url<'a>(&self, ctx: &'a BuildContext) -> Option<&'a str> {
        match self {
            Component::Compiler => ctx.forced_compiler_url.as_deref(),
            Component::AppRuntime => ctx.forced_runtime_url.as_deref(),
            _ => None,
        }
    }
}

/// Synchronous download-and-unpack contract.
///
/// The store only depends on this: given a URL and an existing destination
/// directory, populate the destination or fail. Tests substitute a recording
/// fake; production uses [`HttpFetcher`].
pub trait Fetcher: Send + Sync {
    fn fetch_and_unpack(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Blocking HTTP fetcher for gzipped tar archives.
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch_and_unpack(&self, url: &str, dest: &Path) -> Result<()> {
        let response = reqwest::blocking::get(url)
            .with_context(|| format!("failed to download {} (check network connectivity)", url))?;

        if !response.status().is_success() {
            anyhow::bail!("download failed with HTTP {} from {}", response.status(), url);
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read response body from {}", url))?;

        if bytes.is_empty() {
            anyhow::bail!("downloaded archive from {} is empty (HTTP 200 but 0 bytes)", url);
        }

        unpack_tar_gz(&bytes, dest).with_context(|| format!("failed to unpack archive from {}", url))
    }
}

/// Decompress and unpack a gzipped tar archive into `dest`.
pub fn unpack_tar_gz(data: &[u8], dest: &Path) -> Result<()> {
    if data.is_empty() {
        anyhow::bail!("cannot unpack an empty archive");
    }

    let mut decoder = flate2::read::MultiGzDecoder::new(data);
    let mut tar_data = Vec::new();
    decoder
        .read_to_end(&mut tar_data)
        .context("failed to decompress archive (invalid gzip format)")?;

    let mut archive = tar::Archive::new(&tar_data[..]);
    archive
        .unpack(dest)
        .with_context(|| format!("failed to unpack tar into {}", dest.display()))?;

    Ok(())
}

/// Replace `link` with a symlink pointing at `target`.
pub fn link_into(link: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // symlink_metadata so a dangling link still gets replaced
    if let Ok(meta) = fs::symlink_metadata(link) {
        if meta.is_dir() {
            fs::remove_dir_all(link)
                .with_context(|| format!("failed to remove {}", link.display()))?;
        } else {
            fs::remove_file(link)
                .with_context(|| format!("failed to remove {}", link.display()))?;
        }
    }

    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to link {} -> {}", link.display(), target.display()))
}

/// Path-keyed store for acquired artifact trees.
pub struct ArtifactStore<'a> {
    ctx: &'a BuildContext,
    fetcher: Arc<dyn Fetcher>,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(ctx: &'a BuildContext, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { ctx, fetcher }
    }

    /// Ensure an artifact tree is on disk and return its location.
    ///
    /// Decision order, first match wins:
    /// 1. base-image short-circuit (pre-baked JDK, pre-baked runtime cache) -
    ///    the returned path points into the base image, nothing is fetched;
    /// 2. warm cache entry - returned as-is;
    /// 3. forced override URL - fetched into a throwaway cache under the
    ///    build's tmp area, never the shared volume;
    /// 4. computed blobstore URL - fetched into the shared cache.
    pub fn ensure(&self, component: Component, version: &str) -> Result<PathBuf, PackError> {
        if let Some(baked) = self.baked_path(component, version) {
            info!(
                component = component.key(),
                path = %baked.display(),
                "artifact pre-baked into base image, skipping acquisition"
            );
            return Ok(baked);
        }

        let entry_name = format!("{}-{}", component.key(), version);
        let (cache_root, url) = match component.forced_url(self.ctx) {
            Some(forced) => {
                debug!(component = component.key(), url = forced, "forced override URL active");
                (self.ctx.tmp_root().join("forced"), forced.to_string())
            }
            None => (self.ctx.cache_dir.clone(), self.blobstore_url(component, version)),
        };

        let entry = cache_root.join(&entry_name);
        if dir_non_empty(&entry) {
            debug!(component = component.key(), path = %entry.display(), "artifact cache hit");
            return Ok(entry);
        }

        info!(component = component.key(), version, url = %url, "fetching artifact");
        self.fetch_into(component, &url, &cache_root, &entry)?;
        Ok(entry)
    }

    /// Like [`ensure`](Self::ensure), additionally exposing the artifact
    /// under the target's local-tools subtree.
    ///
    /// A base-image path is returned untouched (no link); anything else is
    /// symlinked as `.local/{name}` and the link path is returned, so
    /// downstream consumers always hold the path they should reference.
    pub fn ensure_local(
        &self,
        component: Component,
        version: &str,
        name: &str,
    ) -> Result<PathBuf, PackError> {
        let tree = self.ensure(component, version)?;
        if self.baked_path(component, version).is_some() {
            return Ok(tree);
        }

        let link = self.ctx.local_root().join(name);
        link_into(&link, &tree).map_err(|source| PackError::ArtifactUnavailable {
            component: component.key().to_string(),
            source,
        })?;
        Ok(link)
    }

    fn baked_path(&self, component: Component, version: &str) -> Option<PathBuf> {
        match component {
            Component::Jdk => self.ctx.baked_jdk_root.clone().filter(|p| dir_non_empty(p)),
            Component::AppRuntime => self
                .ctx
                .baked_runtime_cache
                .as_ref()
                .map(|root| root.join(format!("{}-{}", component.key(), version)))
                .filter(|p| dir_non_empty(p)),
            _ => None,
        }
    }

    fn blobstore_url(&self, component: Component, version: &str) -> String {
        format!(
            "{}/{}/{}-{}.tar.gz",
            self.ctx.blobstore_url.trim_end_matches('/'),
            component.key(),
            component.key(),
            version
        )
    }

    fn fetch_into(
        &self,
        component: Component,
        url: &str,
        cache_root: &Path,
        entry: &Path,
    ) -> Result<(), PackError> {
        let fail = |source: anyhow::Error| PackError::ArtifactUnavailable {
            component: component.key().to_string(),
            source,
        };

        let partial = cache_root.join(format!(
            "{}.partial",
            entry.file_name().and_then(|n| n.to_str()).unwrap_or("entry")
        ));
        if partial.exists() {
            fs::remove_dir_all(&partial)
                .with_context(|| format!("failed to clear stale {}", partial.display()))
                .map_err(fail)?;
        }
        fs::create_dir_all(&partial)
            .with_context(|| format!("failed to create {}", partial.display()))
            .map_err(fail)?;

        if let Err(e) = self.fetcher.fetch_and_unpack(url, &partial) {
            let _ = fs::remove_dir_all(&partial);
            return Err(fail(e));
        }

        fs::rename(&partial, entry)
            .with_context(|| format!("failed to move {} into place", partial.display()))
            .map_err(fail)
    }
}

fn dir_non_empty(path: &Path) -> bool {
    path.read_dir()
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
