//! Mandatory-configuration gate.
//!
//! Runs before any filesystem mutation or subprocess invocation. Each missing
//! value logs its own warning; the aggregate result is fatal if anything
//! mandatory is absent, so a half-configured build never consumes build time
//! or leaves stale state behind.

use tracing::{debug, warn};

use crate::config::BuildContext;
use crate::error::PackError;

pub fn check(ctx: &BuildContext) -> Result<(), PackError> {
    let mut missing = Vec::new();

    if ctx.database_url.is_none() {
        warn!("DATABASE_URL is not set; the assembled application cannot reach a database");
        missing.push("DATABASE_URL".to_string());
    }
    if ctx.admin_password.is_none() {
        warn!("ADMIN_PASSWORD is not set; the assembled application has no administrative credential");
        missing.push("ADMIN_PASSWORD".to_string());
    }

    if missing.is_empty() {
        debug!("preflight checks passed");
        Ok(())
    } else {
        Err(PackError::ConfigurationMissing { missing })
    }
}
