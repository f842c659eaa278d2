//! Layered run configuration
//!
//! Settings merge in priority order: built-in defaults, then the
//! system-wide file, then the user file, then CLI flags (applied by the
//! binary). Missing or malformed files are skipped, never fatal.

use crate::output::OutputFormat;
use crate::proxy::scheduler::SchedulerKind;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// System-wide configuration file
pub const SYSTEM_CONFIG_PATH: &str = "/etc/proxysift.toml";

/// Per-user configuration file, in the home directory
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".proxysift.toml"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralSettings,
    pub output: OutputSettings,
    pub proxy_sources: SourceSettings,
    pub advanced: AdvancedSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Transport timeout in seconds
    pub timeout_secs: u64,
    /// Concurrency cap for probes
    pub concurrent: usize,
    /// FAST/SLOW threshold in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_filter: Option<f64>,
    /// URL probes are tested against
    pub test_url: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            concurrent: 10,
            response_time_filter: Some(1000.0),
            test_url: "https://www.google.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub format: OutputFormat,
    /// Restrict the final report to FAST results
    pub fast_only: bool,
    pub save_directory: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            fast_only: false,
            save_directory: "results".to_string(),
        }
    }
}

/// Proxy-list URLs downloaded in automatic mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourceSettings {
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub debug: bool,
    /// Endpoint echoing the request's source IP and headers
    pub anonymity_check_url: String,
    pub scheduler: SchedulerKind,
    /// Checkpoint every N completed probes; 0 disables autosave
    pub autosave_interval: usize,
    /// Proxies per scheduling chunk
    pub chunk_size: usize,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            debug: false,
            anonymity_check_url: "https://httpbin.org/get".to_string(),
            scheduler: SchedulerKind::Task,
            autosave_interval: 5,
            chunk_size: 1000,
        }
    }
}

/// Partial configuration as read from one file; only present keys override
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigOverlay {
    general: GeneralOverlay,
    output: OutputOverlay,
    proxy_sources: SourceOverlay,
    advanced: AdvancedOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneralOverlay {
    timeout_secs: Option<u64>,
    concurrent: Option<usize>,
    response_time_filter: Option<f64>,
    test_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OutputOverlay {
    format: Option<OutputFormat>,
    fast_only: Option<bool>,
    save_directory: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceOverlay {
    urls: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AdvancedOverlay {
    debug: Option<bool>,
    anonymity_check_url: Option<String>,
    scheduler: Option<SchedulerKind>,
    autosave_interval: Option<usize>,
    chunk_size: Option<usize>,
}

impl ConfigOverlay {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.general.timeout_secs {
            config.general.timeout_secs = v;
        }
        if let Some(v) = self.general.concurrent {
            config.general.concurrent = v;
        }
        if let Some(v) = self.general.response_time_filter {
            config.general.response_time_filter = Some(v);
        }
        if let Some(v) = self.general.test_url {
            config.general.test_url = v;
        }
        if let Some(v) = self.output.format {
            config.output.format = v;
        }
        if let Some(v) = self.output.fast_only {
            config.output.fast_only = v;
        }
        if let Some(v) = self.output.save_directory {
            config.output.save_directory = v;
        }
        if let Some(v) = self.proxy_sources.urls {
            config.proxy_sources.urls = v;
        }
        if let Some(v) = self.advanced.debug {
            config.advanced.debug = v;
        }
        if let Some(v) = self.advanced.anonymity_check_url {
            config.advanced.anonymity_check_url = v;
        }
        if let Some(v) = self.advanced.scheduler {
            config.advanced.scheduler = v;
        }
        if let Some(v) = self.advanced.autosave_interval {
            config.advanced.autosave_interval = v;
        }
        if let Some(v) = self.advanced.chunk_size {
            config.advanced.chunk_size = v;
        }
    }
}

impl Config {
    /// Load the merged configuration from the standard file locations
    pub fn load() -> Self {
        let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(user) = user_config_path() {
            paths.push(user);
        }
        Self::load_from(&paths)
    }

    /// Load defaults, then overlay each existing file in order
    pub fn load_from(paths: &[PathBuf]) -> Self {
        let mut config = Config::default();
        for path in paths {
            if !path.is_file() {
                continue;
            }
            debug!("Loading config from {}", path.display());
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Could not read config {}: {}", path.display(), e);
                    continue;
                }
            };
            match toml::from_str::<ConfigOverlay>(&content) {
                Ok(overlay) => overlay.apply(&mut config),
                Err(e) => warn!("Ignoring malformed config {}: {}", path.display(), e),
            }
        }
        config
    }

    /// Write the default configuration file for `--config` bootstrap
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(&Config::default()).context("Failed to serialize defaults")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.general.timeout_secs, 5);
        assert_eq!(config.general.concurrent, 10);
        assert_eq!(config.general.response_time_filter, Some(1000.0));
        assert_eq!(config.general.test_url, "https://www.google.com");
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(!config.output.fast_only);
        assert_eq!(config.output.save_directory, "results");
        assert!(config.proxy_sources.urls.is_empty());
        assert_eq!(config.advanced.anonymity_check_url, "https://httpbin.org/get");
        assert_eq!(config.advanced.scheduler, SchedulerKind::Task);
        assert_eq!(config.advanced.autosave_interval, 5);
        assert_eq!(config.advanced.chunk_size, 1000);
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let config = Config::load_from(&[PathBuf::from("/no/such/proxysift.toml")]);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_user_file_overrides_system_file() {
        let mut system = tempfile::NamedTempFile::new().unwrap();
        writeln!(system, "[general]\ntimeout_secs = 9\nconcurrent = 50").unwrap();
        let mut user = tempfile::NamedTempFile::new().unwrap();
        writeln!(user, "[general]\nconcurrent = 99\n\n[output]\nformat = \"csv\"").unwrap();

        let config = Config::load_from(&[
            system.path().to_path_buf(),
            user.path().to_path_buf(),
        ]);

        // System value survives where the user file is silent
        assert_eq!(config.general.timeout_secs, 9);
        // User value wins where both speak
        assert_eq!(config.general.concurrent, 99);
        assert_eq!(config.output.format, OutputFormat::Csv);
        // Untouched keys keep their defaults
        assert_eq!(config.general.test_url, "https://www.google.com");
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "this is not toml [").unwrap();

        let config = Config::load_from(&[bad.path().to_path_buf()]);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_scheduler_and_sources_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[proxy_sources]\nurls = [\"https://example.com/list.txt\"]\n\n[advanced]\nscheduler = \"thread\"\nchunk_size = 250"
        )
        .unwrap();

        let config = Config::load_from(&[file.path().to_path_buf()]);
        assert_eq!(config.proxy_sources.urls, vec!["https://example.com/list.txt"]);
        assert_eq!(config.advanced.scheduler, SchedulerKind::Thread);
        assert_eq!(config.advanced.chunk_size, 250);
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxysift.toml");

        Config::write_default(&path).unwrap();
        let config = Config::load_from(&[path]);
        assert_eq!(config, Config::default());
    }
}
