//! Error taxonomy for the build pipeline.
//!
//! Every variant is fatal to the current invocation; nothing is retried.
//! `CompileFailed` is the one variant with attached side-effect handling:
//! the pipeline gives [`crate::report`] a chance to submit the structured
//! payload before the error propagates to the top.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One structured problem reported by the model compiler.
///
/// Matches the schema of the compiler's `--write-errors` output file: a JSON
/// array of these records, ordered as the compiler produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BuildError {
    /// The synthetic single error used when the compiler failed without
    /// writing a structured error file.
    pub fn generic() -> Self {
        Self {
            severity: "Error".to_string(),
            message: "the application model could not be compiled; the compiler reported no details"
                .to_string(),
            location: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PackError {
    #[error("missing required configuration: {}", missing.join(", "))]
    ConfigurationMissing { missing: Vec<String> },

    #[error("unable to determine the runtime version: {0}")]
    VersionUnavailable(String),

    #[error("artifact '{component}' is unavailable: {source}")]
    ArtifactUnavailable {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("model compilation failed with {} problem(s)", errors.len())]
    CompileFailed { errors: Vec<BuildError> },

    #[error("target assembly failed: {0}")]
    AssemblyFailed(#[source] anyhow::Error),
}
