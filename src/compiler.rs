//! External model-compiler invocation.
//!
//! The compiler is an opaque subprocess with a defined argument contract: we
//! acquire its toolchain, build the argument vector, run it to completion and
//! interpret the exit code plus the optional structured-error file. Process
//! execution sits behind [`ProcessExecutor`] so the whole module is testable
//! with a capturing fake.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::artifacts::{unpack_tar_gz, ArtifactStore, Component};
use crate::config::BuildContext;
use crate::error::{BuildError, PackError};
use crate::version::{RuntimeVersion, WRITE_ERRORS_SINCE};

/// Narrow process-execution seam: program, arguments, environment additions
/// and working directory in; exit code out.
pub trait ProcessExecutor: Send + Sync {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<i32>;
}

/// Executor backed by `std::process::Command`, waited on to completion.
pub struct SystemExecutor;

impl ProcessExecutor for SystemExecutor {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        env: &[(String, String)],
        cwd: &Path,
    ) -> Result<i32> {
        let status = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .status()
            .with_context(|| format!("failed to spawn {}", program.display()))?;

        // terminated by signal reports as -1
        Ok(status.code().unwrap_or(-1))
    }
}

pub struct ModelCompiler<'a> {
    ctx: &'a BuildContext,
    store: &'a ArtifactStore<'a>,
    executor: Arc<dyn ProcessExecutor>,
}

impl<'a> ModelCompiler<'a> {
    pub fn new(
        ctx: &'a BuildContext,
        store: &'a ArtifactStore<'a>,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Self {
        Self {
            ctx,
            store,
            executor,
        }
    }

    /// Compile the source project and replace the target's contents with the
    /// resulting package.
    ///
    /// On a non-zero exit this returns [`PackError::CompileFailed`] carrying
    /// the compiler's structured problems (or one synthetic generic problem).
    /// The target directory is only touched on the success path.
    pub fn build(&self, version: &RuntimeVersion, project_file: &Path) -> Result<(), PackError> {
        let runtime_root =
            self.store
                .ensure_local(Component::Runtime, version.execution_runtime_version(), "runtime")?;
        let compiler_root =
            self.store
                .ensure_local(Component::Compiler, &version.to_string(), "compiler")?;
        let jdk_root = self
            .store
            .ensure_local(Component::Jdk, version.jdk_major(), "jdk")?;

        let error_file = self.ctx.build_errors_file();
        clear_stale(&error_file).map_err(PackError::AssemblyFailed)?;

        let package = self.ctx.cache_dir.join("tmp").join("model-package.tar.gz");
        clear_stale(&package).map_err(PackError::AssemblyFailed)?;

        let args = compiler_args(
            self.ctx,
            version,
            &compiler_root,
            &jdk_root,
            &package,
            &error_file,
            project_file,
        );
        let env = vec![(
            "LD_LIBRARY_PATH".to_string(),
            runtime_root.join("lib").display().to_string(),
        )];

        info!(version = %version, project = %project_file.display(), "running model compiler");
        debug!(?args, "compiler argument vector");

        let exit = self
            .executor
            .run(&runtime_root.join("bin/host"), &args, &env, &self.ctx.build_dir)
            .map_err(PackError::AssemblyFailed)?;

        if exit != 0 {
            warn!(exit, "model compiler failed");
            return Err(PackError::CompileFailed {
                errors: read_build_errors(&error_file),
            });
        }

        info!("model compiler succeeded, installing package into target");
        install_package(&self.ctx.build_dir, &package).map_err(PackError::AssemblyFailed)?;
        Ok(())
    }
}

/// Build the compiler's argument vector.
///
/// The structured-error flag is version-gated: present iff the resolved
/// version is at least [`WRITE_ERRORS_SINCE`] or the force flag is set. A
/// forced compiler URL additionally relaxes the compiler's own
/// version-compatibility check.
fn compiler_args(
    ctx: &BuildContext,
    version: &RuntimeVersion,
    compiler_root: &Path,
    jdk_root: &Path,
    package: &Path,
    error_file: &Path,
    project_file: &Path,
) -> Vec<String> {
    let mut args = vec![
        compiler_root.join("bin/modelc").display().to_string(),
        "--target=package".to_string(),
        format!("--output={}", package.display()),
        format!("--java-home={}", jdk_root.display()),
        format!("--java-exe={}", jdk_root.join("bin/java").display()),
    ];

    if *version >= WRITE_ERRORS_SINCE || ctx.force_write_build_errors {
        args.push(format!("--write-errors={}", error_file.display()));
    }
    if ctx.forced_compiler_url.is_some() {
        args.push("--loose-version-check".to_string());
    }

    args.push(project_file.display().to_string());
    args
}

/// Parse the structured-error file, falling back to a single generic error
/// when the file is absent, unreadable or empty.
fn read_build_errors(error_file: &Path) -> Vec<BuildError> {
    let parsed = fs::read_to_string(error_file)
        .ok()
        .and_then(|raw| serde_json::from_str::<Vec<BuildError>>(&raw).ok())
        .filter(|errors| !errors.is_empty());

    match parsed {
        Some(errors) => errors,
        None => {
            debug!(path = %error_file.display(), "no structured error file, synthesizing generic error");
            vec![BuildError::generic()]
        }
    }
}

/// Name of the scratch directory the package is unpacked into before the
/// sweep. Lives inside the target so the final move never crosses a
/// filesystem boundary.
const PACKAGE_STAGING: &str = ".package-staging";

/// Replace the target's contents with the package contents, sparing only the
/// local-tools subtree.
///
/// The package is fully unpacked into a staging directory first; a truncated
/// or corrupt package therefore aborts with the target's prior contents
/// intact. Only after a successful unpack does the sweep run: an explicit
/// pass over the target's immediate children with a deny-list, never a
/// recursive wipe of the root, so the `.local` exclusion is enforced
/// structurally.
fn install_package(build_dir: &Path, package: &Path) -> Result<()> {
    let data = fs::read(package)
        .with_context(|| format!("compiler produced no package at {}", package.display()))?;

    let staging = build_dir.join(PACKAGE_STAGING);
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("failed to clear stale {}", staging.display()))?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;

    if let Err(e) = unpack_tar_gz(&data, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e.context("compiler package is not a valid archive, target left untouched"));
    }

    for entry in fs::read_dir(build_dir)
        .with_context(|| format!("failed to read {}", build_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".local" || name == PACKAGE_STAGING {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }

    for entry in fs::read_dir(&staging)
        .with_context(|| format!("failed to read {}", staging.display()))?
    {
        let entry = entry?;
        let target = build_dir.join(entry.file_name());
        fs::rename(entry.path(), &target)
            .with_context(|| format!("failed to move package entry into {}", target.display()))?;
    }
    fs::remove_dir_all(&staging)
        .with_context(|| format!("failed to remove {}", staging.display()))?;

    fs::remove_file(package).ok();
    Ok(())
}

/// Drop the compile-only toolchain links from the local-tools subtree.
///
/// The development kit and the compiler are not needed at run time; the
/// shared cache entries they point at stay untouched.
pub fn release_compile_tools(ctx: &BuildContext) {
    for name in ["jdk", "compiler"] {
        let link = ctx.local_root().join(name);
        if fs::symlink_metadata(&link).is_ok() {
            if let Err(e) = fs::remove_file(&link) {
                warn!(path = %link.display(), error = %e, "failed to release compile tool link");
            }
        }
    }
}

fn clear_stale(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove stale {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Fetcher;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct MarkerFetcher;

    impl Fetcher for MarkerFetcher {
        fn fetch_and_unpack(&self, url: &str, dest: &Path) -> Result<()> {
            fs::write(dest.join("marker"), url)?;
            Ok(())
        }
    }

    #[derive(Debug, Clone)]
    struct Call {
        program: PathBuf,
        args: Vec<String>,
        env: Vec<(String, String)>,
        cwd: PathBuf,
    }

    /// Returns a fixed exit code and writes configured files, standing in for
    /// the compiler's side effects.
    struct FakeExecutor {
        exit: i32,
        outputs: Vec<(PathBuf, Vec<u8>)>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeExecutor {
        fn new(exit: i32) -> Self {
            Self {
                exit,
                outputs: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_output(mut self, path: PathBuf, data: Vec<u8>) -> Self {
            self.outputs.push((path, data));
            self
        }

        fn single_call(&self) -> Call {
            let calls = self.calls.lock().unwrap();
            assert_eq!(calls.len(), 1, "expected exactly one compiler invocation");
            calls[0].clone()
        }
    }

    impl ProcessExecutor for FakeExecutor {
        fn run(
            &self,
            program: &Path,
            args: &[String],
            env: &[(String, String)],
            cwd: &Path,
        ) -> Result<i32> {
            for (path, data) in &self.outputs {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, data)?;
            }
            self.calls.lock().unwrap().push(Call {
                program: program.to_path_buf(),
                args: args.to_vec(),
                env: env.to_vec(),
                cwd: cwd.to_path_buf(),
            });
            Ok(self.exit)
        }
    }

    struct Fixture {
        build: TempDir,
        cache: TempDir,
        ctx: BuildContext,
        project_file: PathBuf,
    }

    fn fixture(vars: &[(&str, &str)]) -> Fixture {
        let build = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let project_file = build.path().join("App.mpr");
        fs::write(&project_file, b"sqlite project db").unwrap();

        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let ctx = BuildContext::from_lookup(
            build.path().to_path_buf(),
            cache.path().to_path_buf(),
            |key| map.get(key).cloned(),
        );

        Fixture {
            build,
            cache,
            ctx,
            project_file,
        }
    }

    fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            for (name, data) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, *name, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut gz, &tar_bytes).unwrap();
        gz.finish().unwrap()
    }

    fn run_build(
        fx: &Fixture,
        version: &str,
        executor: Arc<FakeExecutor>,
    ) -> Result<(), PackError> {
        let store = ArtifactStore::new(&fx.ctx, Arc::new(MarkerFetcher));
        let compiler = ModelCompiler::new(&fx.ctx, &store, executor);
        compiler.build(&version.parse().unwrap(), &fx.project_file)
    }

    #[test]
    fn argument_vector_for_a_modern_version() {
        let fx = fixture(&[]);
        let package = tar_gz(&[("model/model.dat", b"compiled")]);
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            package,
        ));

        run_build(&fx, "7.23.1", executor.clone()).unwrap();

        let call = executor.single_call();
        assert_eq!(call.program, fx.build.path().join(".local/runtime/bin/host"));
        assert_eq!(call.cwd, fx.build.path());
        assert_eq!(
            call.args[0],
            fx.build.path().join(".local/compiler/bin/modelc").display().to_string()
        );
        assert_eq!(call.args[1], "--target=package");
        assert!(call.args.iter().any(|a| a.starts_with("--output=")));
        assert!(call.args.iter().any(|a| a.starts_with("--java-home=")));
        assert!(call.args.iter().any(|a| a.starts_with("--write-errors=")));
        assert!(!call.args.contains(&"--loose-version-check".to_string()));
        assert_eq!(call.args.last().unwrap(), &fx.project_file.display().to_string());

        let (key, value) = &call.env[0];
        assert_eq!(key, "LD_LIBRARY_PATH");
        assert!(value.ends_with(".local/runtime/lib"));
    }

    #[test]
    fn write_errors_flag_is_version_gated() {
        let fx = fixture(&[]);
        let package = tar_gz(&[("model/model.dat", b"x")]);
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            package,
        ));

        run_build(&fx, "6.3.9", executor.clone()).unwrap();

        let call = executor.single_call();
        assert!(!call.args.iter().any(|a| a.starts_with("--write-errors=")));
    }

    #[test]
    fn write_errors_flag_can_be_forced_below_threshold() {
        let fx = fixture(&[("FORCE_WRITE_BUILD_ERRORS", "true")]);
        let package = tar_gz(&[("model/model.dat", b"x")]);
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            package,
        ));

        run_build(&fx, "6.3.9", executor.clone()).unwrap();

        let call = executor.single_call();
        assert!(call.args.iter().any(|a| a.starts_with("--write-errors=")));
    }

    #[test]
    fn forced_compiler_url_relaxes_the_version_check() {
        let fx = fixture(&[("FORCED_COMPILER_URL", "https://internal/compiler.tar.gz")]);
        let package = tar_gz(&[("model/model.dat", b"x")]);
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            package,
        ));

        run_build(&fx, "7.23.1", executor.clone()).unwrap();

        let call = executor.single_call();
        assert!(call.args.contains(&"--loose-version-check".to_string()));
    }

    #[test]
    fn failure_surfaces_the_structured_error_file() {
        let fx = fixture(&[]);
        let error_json = br#"[
            {"severity": "Error", "message": "broken entity", "location": "Shop/Order"},
            {"severity": "Error", "message": "missing attribute"}
        ]"#;
        let executor = Arc::new(
            FakeExecutor::new(1).with_output(fx.ctx.build_errors_file(), error_json.to_vec()),
        );

        let err = run_build(&fx, "7.23.1", executor).unwrap_err();

        match err {
            PackError::CompileFailed { errors } => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].location.as_deref(), Some("Shop/Order"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // failure path never touches the target contents
        assert!(fx.project_file.exists());
    }

    #[test]
    fn failure_without_error_file_synthesizes_one_generic_error() {
        let fx = fixture(&[]);
        let executor = Arc::new(FakeExecutor::new(1));

        let err = run_build(&fx, "7.23.1", executor).unwrap_err();

        match err {
            PackError::CompileFailed { errors } => {
                assert_eq!(errors, vec![BuildError::generic()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn success_replaces_target_contents_except_local_tools() {
        let fx = fixture(&[]);
        fs::write(fx.build.path().join("stale.txt"), b"old").unwrap();
        fs::create_dir_all(fx.build.path().join("theme")).unwrap();
        fs::write(fx.build.path().join("theme/index.html"), b"old").unwrap();

        let package = tar_gz(&[("model/model.dat", b"compiled"), ("web/index.html", b"new")]);
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            package,
        ));

        run_build(&fx, "7.23.1", executor).unwrap();

        assert!(!fx.build.path().join("stale.txt").exists());
        assert!(!fx.build.path().join("theme").exists());
        assert!(!fx.project_file.exists());
        assert!(fx.build.path().join("model/model.dat").exists());
        assert!(fx.build.path().join("web/index.html").exists());
        // toolchain links acquired earlier in the run survive the sweep
        assert!(fs::symlink_metadata(fx.build.path().join(".local/compiler")).is_ok());
    }

    #[test]
    fn corrupt_package_on_success_exit_leaves_target_untouched() {
        let fx = fixture(&[]);
        fs::write(fx.build.path().join("index.html"), b"prior contents").unwrap();

        // exit 0 but the package is not a valid archive
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            b"not a gzip package".to_vec(),
        ));

        let err = run_build(&fx, "7.23.1", executor).unwrap_err();

        assert!(matches!(err, PackError::AssemblyFailed(_)));
        // prior target contents must survive the failed install
        assert!(fx.project_file.exists());
        assert_eq!(
            fs::read(fx.build.path().join("index.html")).unwrap(),
            b"prior contents"
        );
        assert!(!fx.build.path().join(PACKAGE_STAGING).exists());
    }

    #[test]
    fn successful_install_leaves_no_staging_directory() {
        let fx = fixture(&[]);
        let package = tar_gz(&[("model/model.dat", b"compiled")]);
        let executor = Arc::new(FakeExecutor::new(0).with_output(
            fx.cache.path().join("tmp/model-package.tar.gz"),
            package,
        ));

        run_build(&fx, "7.23.1", executor).unwrap();

        assert!(!fx.build.path().join(PACKAGE_STAGING).exists());
        assert!(fx.build.path().join("model/model.dat").exists());
    }

    #[test]
    fn missing_package_on_success_exit_is_an_assembly_failure() {
        let fx = fixture(&[]);
        let executor = Arc::new(FakeExecutor::new(0));

        let err = run_build(&fx, "7.23.1", executor).unwrap_err();
        assert!(matches!(err, PackError::AssemblyFailed(_)));
    }

    #[test]
    fn release_drops_links_but_not_cache_entries() {
        let fx = fixture(&[]);
        let store = ArtifactStore::new(&fx.ctx, Arc::new(MarkerFetcher));
        store.ensure_local(Component::Jdk, "11", "jdk").unwrap();
        store.ensure_local(Component::Compiler, "7.23.1", "compiler").unwrap();

        release_compile_tools(&fx.ctx);

        assert!(fs::symlink_metadata(fx.ctx.local_root().join("jdk")).is_err());
        assert!(fs::symlink_metadata(fx.ctx.local_root().join("compiler")).is_err());
        assert!(fx.cache.path().join("jdk-11").join("marker").exists());
        assert!(fx.cache.path().join("compiler-7.23.1").join("marker").exists());
    }
}
