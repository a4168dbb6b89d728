//! packstage - staged build pipeline for deployable runtime bundles
//!
//! This library turns a pushed application project into a deployable runtime
//! bundle: it resolves the runtime version the project requires, acquires and
//! caches the toolchain artifacts that version needs, compiles the model via
//! an external compiler process, assembles the fixed target directory layout
//! and reports structured build failures to an external status endpoint.
//!
//! # Core Concepts
//!
//! - **Build context**: all environment-derived configuration, read once at
//!   startup into an immutable record that every component borrows
//! - **Artifact**: any downloadable, cacheable binary dependency (execution
//!   runtime, JDK, model compiler, application runtime, web front end,
//!   monitoring agent), cached unpacked under a shared volume
//! - **Source push**: an invocation whose input is raw project source that
//!   needs compiling, detected by the presence of a project file; pre-built
//!   packages skip the compile stage entirely
//!
//! # Project Structure
//!
//! - [`config`]: environment-derived [`BuildContext`](config::BuildContext)
//! - [`version`]: runtime version type and the two-tier version resolver
//! - [`artifacts`]: blobstore URLs, the on-disk cache and the fetcher seam
//! - [`preflight`]: mandatory-configuration gate
//! - [`compiler`]: external model-compiler invocation
//! - [`layout`]: target directory assembly
//! - [`report`]: build-failure status submission
//! - [`pipeline`]: the stage sequencer tying it all together

pub mod artifacts;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod preflight;
pub mod report;
pub mod version;

pub use config::BuildContext;
pub use error::{BuildError, PackError};
pub use pipeline::Pipeline;
pub use version::RuntimeVersion;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
