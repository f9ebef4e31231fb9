//! Harness configuration
//!
//! Iteration counts, baseline location, capacity thresholds and load-tool
//! locations. Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::benchmark::BenchmarkOptions;
use super::capacity::CapacityThresholds;
use super::error::{HarnessError, Result};
use super::load::{ArtilleryCli, AutocannonCli};
use super::regression::DEFAULT_REGRESSION_THRESHOLD;

pub const CONFIG_ENV_VAR: &str = "PERF_HARNESS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "perf_harness.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub benchmark: BenchmarkOptions,

    #[serde(default)]
    pub baseline: BaselineConfig,

    #[serde(default)]
    pub capacity: CapacityThresholds,

    #[serde(default)]
    pub http: HttpToolConfig,

    #[serde(default)]
    pub virtual_user: VirtualUserToolConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

impl HarnessConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| HarnessError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `PERF_HARNESS_CONFIG` or the default path, falling back to
    /// defaults
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default harness config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| HarnessError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    #[serde(default = "default_baseline_dir")]
    pub directory: PathBuf,

    /// p95 multiplier above which a benchmark counts as regressed
    #[serde(default = "default_regression_threshold")]
    pub regression_threshold: f64,
}

fn default_baseline_dir() -> PathBuf {
    PathBuf::from("performance-baselines")
}
fn default_regression_threshold() -> f64 {
    DEFAULT_REGRESSION_THRESHOLD
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            directory: default_baseline_dir(),
            regression_threshold: default_regression_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpToolConfig {
    #[serde(default = "default_autocannon")]
    pub program: PathBuf,

    /// Grace period on top of the run duration before the tool is killed
    #[serde(default = "default_timeout_slack_secs")]
    pub timeout_slack_secs: u64,
}

fn default_autocannon() -> PathBuf {
    PathBuf::from("autocannon")
}
fn default_timeout_slack_secs() -> u64 {
    30
}

impl Default for HttpToolConfig {
    fn default() -> Self {
        Self {
            program: default_autocannon(),
            timeout_slack_secs: default_timeout_slack_secs(),
        }
    }
}

impl HttpToolConfig {
    pub fn generator(&self) -> AutocannonCli {
        AutocannonCli {
            program: self.program.clone(),
            timeout_slack: Duration::from_secs(self.timeout_slack_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualUserToolConfig {
    #[serde(default = "default_artillery")]
    pub program: PathBuf,

    #[serde(default = "default_vu_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_artillery() -> PathBuf {
    PathBuf::from("artillery")
}
fn default_vu_timeout_secs() -> u64 {
    900
}

impl Default for VirtualUserToolConfig {
    fn default() -> Self {
        Self {
            program: default_artillery(),
            timeout_secs: default_vu_timeout_secs(),
        }
    }
}

impl VirtualUserToolConfig {
    pub fn runner(&self) -> ArtilleryCli {
        ArtilleryCli {
            program: self.program.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Allocator release hint cadence for leak tracking (0 disables)
    #[serde(default = "default_cleanup_every")]
    pub cleanup_every: usize,
}

fn default_cleanup_every() -> usize {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cleanup_every: default_cleanup_every(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.benchmark.iterations, 10);
        assert_eq!(config.benchmark.warmup_iterations, 5);
        assert_eq!(config.baseline.regression_threshold, 1.2);
        assert_eq!(config.virtual_user.timeout_secs, 900);
        assert_eq!(config.memory.cleanup_every, 10);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = HarnessConfig::default();
        config.capacity.database_pool_size = Some(20);
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: HarnessConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: HarnessConfig = toml::from_str(
            r#"
            [baseline]
            regression_threshold = 1.5

            [capacity]
            error_rate_ceiling = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(parsed.baseline.regression_threshold, 1.5);
        assert_eq!(parsed.baseline.directory, PathBuf::from("performance-baselines"));
        assert_eq!(parsed.capacity.error_rate_ceiling, 2.0);
        assert_eq!(parsed.capacity.low_capacity_users, 100);
        assert_eq!(parsed.http.program, PathBuf::from("autocannon"));
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf_harness.toml");
        let mut config = HarnessConfig::default();
        config.http.timeout_slack_secs = 5;
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.http.generator().timeout_slack, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[baseline\nregression_threshold = ").unwrap();
        assert!(matches!(HarnessConfig::load(&path), Err(HarnessError::Config(_))));
    }
}
