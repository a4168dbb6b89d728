//! End-to-end pipeline sequencing.
//!
//! Stages run strictly in order, each to completion, on a single thread:
//!
//! ```text
//! Preflight -> {SourceBuild | SkipBuild} -> Assemble -> Acquire -> Finalize
//! ```
//!
//! Preflight always completes before any filesystem mutation; the external
//! builder always completes (success or failure) before assembly. No stage
//! retries; every error is terminal for the run. The one piece of failure
//! handling attached to propagation is the status report on `CompileFailed`.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::artifacts::{ArtifactStore, Component, Fetcher, HttpFetcher, APM_AGENT_VERSION, WEBSERVER_VERSION};
use crate::compiler::{release_compile_tools, ModelCompiler, ProcessExecutor, SystemExecutor};
use crate::config::BuildContext;
use crate::error::PackError;
use crate::layout;
use crate::preflight;
use crate::report::{report_build_failure, HttpSink, StatusSink};
use crate::version::{find_project_file, resolve_version};

/// Owns the build context and the external-collaborator seams for one
/// pipeline invocation.
pub struct Pipeline {
    ctx: BuildContext,
    fetcher: Arc<dyn Fetcher>,
    executor: Arc<dyn ProcessExecutor>,
    sink: Arc<dyn StatusSink>,
}

impl Pipeline {
    /// Pipeline wired with the production collaborators.
    pub fn new(ctx: BuildContext) -> Self {
        Self::with_services(
            ctx,
            Arc::new(HttpFetcher),
            Arc::new(SystemExecutor),
            Arc::new(HttpSink),
        )
    }

    /// Pipeline with injected collaborators, used by tests.
    pub fn with_services(
        ctx: BuildContext,
        fetcher: Arc<dyn Fetcher>,
        executor: Arc<dyn ProcessExecutor>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            ctx,
            fetcher,
            executor,
            sink,
        }
    }

    /// Run the pipeline to a terminal state.
    pub fn run(&self) -> Result<(), PackError> {
        let start = Instant::now();
        info!(
            build_dir = %self.ctx.build_dir.display(),
            cache_dir = %self.ctx.cache_dir.display(),
            "starting build pipeline"
        );

        info!("stage: preflight");
        preflight::check(&self.ctx)?;

        let version = resolve_version(&self.ctx.build_dir)?;
        info!(version = %version, "resolved runtime version");

        let store = ArtifactStore::new(&self.ctx, self.fetcher.clone());

        if let Some(project_file) = find_project_file(&self.ctx.build_dir) {
            info!("stage: source build");
            let compiler = ModelCompiler::new(&self.ctx, &store, self.executor.clone());
            match compiler.build(&version, &project_file) {
                Ok(()) => release_compile_tools(&self.ctx),
                Err(err @ PackError::CompileFailed { .. }) => {
                    report_build_failure(&self.ctx, &self.ctx.build_errors_file(), self.sink.as_ref());
                    return Err(err);
                }
                Err(other) => return Err(other),
            }
        } else {
            info!("stage: skip build (pre-built package input)");
        }

        info!("stage: assemble");
        layout::ensure_layout(&self.ctx.build_dir)?;
        layout::copy_static_resources(&self.ctx.buildpack_dir, &self.ctx.build_dir)?;
        if self.ctx.monitoring_enabled() {
            layout::copy_apm_tree(&self.ctx.buildpack_dir, &self.ctx.build_dir)?;
        }

        info!("stage: acquire");
        let jdk = store.ensure_local(Component::Jdk, version.jdk_major(), "jdk")?;
        debug!(path = %jdk.display(), "application JDK in place");

        if self.ctx.monitoring_enabled() {
            store.ensure_local(Component::ApmAgent, APM_AGENT_VERSION, "apm-agent")?;
        }

        let runtime_tree = store.ensure(Component::AppRuntime, &version.to_string())?;
        let runtime_link = self.ctx.build_dir.join("runtimes").join(version.to_string());
        crate::artifacts::link_into(&runtime_link, &runtime_tree).map_err(|source| {
            PackError::ArtifactUnavailable {
                component: Component::AppRuntime.key().to_string(),
                source,
            }
        })?;

        store.ensure_local(Component::WebServer, WEBSERVER_VERSION, "webserver")?;

        info!(elapsed = ?start.elapsed(), "build pipeline completed");
        Ok(())
    }
}
