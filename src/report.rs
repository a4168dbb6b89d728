//! Build-failure status reporting.
//!
//! Runs only after a `CompileFailed`, as a side effect of failure
//! propagation. A missing callback URL degrades to a warning and a failed
//! submission degrades to a warning; reporting can never turn a build
//! failure into a different failure.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::config::BuildContext;
use crate::error::BuildError;

/// Outbound submission seam. Production uses [`HttpSink`]; tests record the
/// calls.
pub trait StatusSink: Send + Sync {
    fn put(&self, url: &str, payload: &str) -> Result<()>;
}

/// Blocking PUT of the JSON payload to the callback endpoint.
pub struct HttpSink;

impl StatusSink for HttpSink {
    fn put(&self, url: &str, payload: &str) -> Result<()> {
        let response = reqwest::blocking::Client::new()
            .put(url)
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .send()
            .with_context(|| format!("failed to submit build status to {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "build status submission rejected with HTTP {} by {}",
                response.status(),
                url
            );
        }
        Ok(())
    }
}

/// Submit the structured-error payload to the configured callback endpoint.
///
/// The payload is the error file's contents verbatim when the file exists;
/// otherwise a single synthesized generic error.
pub fn report_build_failure(ctx: &BuildContext, error_file: &Path, sink: &dyn StatusSink) {
    let Some(url) = ctx.callback_url.as_deref() else {
        warn!("no build-status callback URL configured, not reporting the failure");
        return;
    };

    let payload = match std::fs::read_to_string(error_file) {
        Ok(contents) => contents,
        Err(_) => serde_json::to_string(&vec![BuildError::generic()])
            .unwrap_or_else(|_| "[]".to_string()),
    };

    info!(url, "submitting build failure status");
    match sink.put(url, &payload) {
        Ok(()) => info!("build failure status submitted"),
        Err(e) => warn!(error = %e, "build failure status submission failed"),
    }
}
