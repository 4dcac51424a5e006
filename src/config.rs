//! Configuration for layerfix
//!
//! Read from `layerfix.toml` in the working directory, falling back to
//! `<config dir>/layerfix/config.toml`. Command-line flags override both.

use crate::passes::{PassCatalog, PassId};
use crate::pipeline::PipelineOptions;
use crate::rollback::DEFAULT_SNAPSHOT_CAP;
use crate::conflict::DEFAULT_COMPLEXITY_DELTA_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const PROJECT_CONFIG_FILE: &str = "layerfix.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pass ids to run; all built-in passes when absent
    pub enabled_passes: Option<Vec<u8>>,
    pub prefer_structural: bool,
    pub parse_timeout_ms: u64,
    /// Whole-run deadline per file
    pub run_timeout_ms: Option<u64>,
    pub snapshot_cap: usize,
    /// Complexity increase above which a pass output is flagged
    pub complexity_delta_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled_passes: None,
            prefer_structural: true,
            parse_timeout_ms: 2_000,
            run_timeout_ms: None,
            snapshot_cap: DEFAULT_SNAPSHOT_CAP,
            complexity_delta_threshold: DEFAULT_COMPLEXITY_DELTA_THRESHOLD,
        }
    }
}

impl Config {
    /// Get the user-level config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("layerfix").join("config.toml"))
    }

    /// Files consulted for `dir`, highest priority first
    pub fn candidate_paths(dir: &Path) -> Vec<PathBuf> {
        let mut paths = vec![dir.join(PROJECT_CONFIG_FILE)];
        paths.extend(Self::user_config_path());
        paths
    }

    /// Load config for the current directory, or return default
    pub fn load() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::load_for(&dir),
            Err(err) => {
                warn!(error = %err, "cannot read working directory; using default config");
                Self::default()
            }
        }
    }

    /// First config file found for `dir`, or default
    pub fn load_for(dir: &Path) -> Self {
        Self::candidate_paths(dir)
            .iter()
            .find(|path| path.is_file())
            .map(|path| Self::load_from(path))
            .unwrap_or_default()
    }

    /// Load one file. A file that does not parse is kept as `.bak` and the
    /// defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config unreadable; using defaults");
                return Self::default();
            }
        };
        match toml::from_str::<Config>(&content) {
            Ok(config) => {
                debug!(path = %path.display(), "config loaded");
                config
            }
            Err(err) => {
                let backup = preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Configured pass ids, or the whole catalog.
    pub fn enabled(&self, catalog: &PassCatalog) -> Vec<PassId> {
        match &self.enabled_passes {
            Some(ids) => ids.iter().copied().map(PassId).collect(),
            None => catalog.ids(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            prefer_structural: self.prefer_structural,
            parse_timeout: Duration::from_millis(self.parse_timeout_ms.max(1)),
            run_timeout: self.run_timeout_ms.map(Duration::from_millis),
            snapshot_cap: self.snapshot_cap,
            complexity_threshold: self.complexity_delta_threshold,
            ..PipelineOptions::default()
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) -> PathBuf {
    let backup = path.with_extension("toml.bak");
    if fs::rename(path, &backup).is_err() {
        let _ = fs::write(&backup, content);
    }
    backup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.enabled_passes.is_none());
        assert_eq!(config.snapshot_cap, 10);
        assert_eq!(config.complexity_delta_threshold, 10);
        assert_eq!(config.enabled(&PassCatalog::builtin()).len(), 7);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_CONFIG_FILE);
        fs::write(&path, "enabled_passes = [5, 7]\nrun_timeout_ms = 500\n").unwrap();

        let config = Config::load_for(dir.path());
        assert_eq!(config.enabled_passes, Some(vec![5, 7]));
        assert!(config.prefer_structural);
        let options = config.pipeline_options();
        assert_eq!(options.run_timeout, Some(Duration::from_millis(500)));
        assert_eq!(options.snapshot_cap, 10);
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROJECT_CONFIG_FILE);
        fs::write(&path, "snapshot_cap = \"many\"\n").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        let backup = dir.path().join("layerfix.toml.bak");
        assert_eq!(fs::read_to_string(backup).unwrap(), "snapshot_cap = \"many\"\n");
        assert!(!path.exists());
    }
}
