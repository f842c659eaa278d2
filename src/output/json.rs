//! JSON report writer

use crate::proxy::models::CheckResult;
use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::Path;

/// Write the results as a pretty-printed JSON array
pub fn write(results: &[CheckResult], path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write JSON results to {}", path.display()))?;
    Ok(())
}
