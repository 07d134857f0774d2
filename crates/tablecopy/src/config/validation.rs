//! Configuration validation.

use std::collections::HashSet;

use super::RegistryFile;
use crate::error::{CopyError, Result};

/// Validate a loaded registry file.
pub fn validate(file: &RegistryFile) -> Result<()> {
    if file.connections.is_empty() {
        return Err(CopyError::Config(
            "at least one connection must be configured".into(),
        ));
    }

    let mut seen = HashSet::new();
    for (idx, conn) in file.connections.iter().enumerate() {
        if conn.name.trim().is_empty() {
            return Err(CopyError::Config(format!(
                "connections[{}].name is required",
                idx
            )));
        }
        if !seen.insert(conn.name.as_str()) {
            return Err(CopyError::Config(format!(
                "duplicate connection name '{}'",
                conn.name
            )));
        }
        if conn.url.trim().is_empty() {
            return Err(CopyError::Config(format!(
                "connections[{}].url is required (connection '{}')",
                idx, conn.name
            )));
        }
    }

    validate_batch_size(file.transfer.batch_size)?;
    if let Some(0) = file.transfer.max_concurrency {
        return Err(CopyError::Config(
            "transfer.maxConcurrency must be at least 1".into(),
        ));
    }

    Ok(())
}

/// A batch size, when given, must be at least 1.
pub fn validate_batch_size(batch_size: Option<usize>) -> Result<()> {
    if let Some(0) = batch_size {
        return Err(CopyError::Config("batch size must be at least 1".into()));
    }
    Ok(())
}
