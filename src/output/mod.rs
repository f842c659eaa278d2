//! Result persistence
//!
//! Final reports in JSON, CSV or SQLite (plus a plain-text list of working
//! proxies alongside), and the timestamped JSON checkpoints the aggregator
//! writes during and at the end of a run.

pub mod csv;
pub mod json;
pub mod sqlite;
pub mod text;

use crate::proxy::models::{CheckResult, CheckStatus};
use crate::proxy::results::{CheckpointStage, ResultSink};
use crate::Result;
use anyhow::Context;
use chrono::Local;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Report format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Sqlite,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Timestamp fragment shared by all output filenames
fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Write the final report in the chosen format, plus the plain-text list of
/// working proxies. `fast_only` restricts the report to FAST results.
pub fn save_results(
    results: &[CheckResult],
    format: OutputFormat,
    fast_only: bool,
    dir: &Path,
) -> Result<()> {
    if results.is_empty() {
        warn!("No results available to save");
        return Ok(());
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let (filtered, prefix): (Vec<CheckResult>, &str) = if fast_only {
        (
            results
                .iter()
                .filter(|r| r.status == CheckStatus::Fast)
                .cloned()
                .collect(),
            "fast_proxies",
        )
    } else {
        (results.to_vec(), "proxy_results")
    };

    let ts = timestamp();
    match format {
        OutputFormat::Json => {
            let path = dir.join(format!("{}_{}.json", prefix, ts));
            json::write(&filtered, &path)?;
            info!("Results saved as JSON: {}", path.display());
        }
        OutputFormat::Csv => {
            let path = dir.join(format!("{}_{}.csv", prefix, ts));
            csv::write(&filtered, &path)?;
            info!("Results saved as CSV: {}", path.display());
        }
        OutputFormat::Sqlite => {
            let path = dir.join(format!("{}_{}.db", prefix, ts));
            sqlite::write(&filtered, &path)?;
            info!("Results saved as SQLite database: {}", path.display());
        }
    }

    let working: Vec<&str> = filtered
        .iter()
        .filter(|r| r.is_working())
        .map(|r| r.proxy.as_str())
        .collect();
    if !working.is_empty() {
        let path = dir.join(format!("{}_{}.txt", prefix, ts));
        text::write(&working, &path)?;
        info!("Working proxies saved as TXT: {}", path.display());
    }

    Ok(())
}

/// Default checkpoint sink: timestamped JSON snapshots in the save directory
pub struct CheckpointWriter {
    dir: PathBuf,
}

impl CheckpointWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ResultSink for CheckpointWriter {
    fn write(&self, results: &[CheckResult], stage: CheckpointStage) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create output directory {}", self.dir.display())
        })?;

        let status = match stage {
            CheckpointStage::InProgress => "partial",
            CheckpointStage::Final => "final",
        };
        let path = self
            .dir
            .join(format!("proxy_results_{}_{}.json", timestamp(), status));
        json::write(results, &path)?;

        match stage {
            CheckpointStage::InProgress => {
                debug!("Autosaved {} results to {}", results.len(), path.display())
            }
            CheckpointStage::Final => info!("Final results saved to {}", path.display()),
        }
        Ok(())
    }
}
