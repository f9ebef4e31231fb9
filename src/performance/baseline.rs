//! Baseline Store
//!
//! One JSON file per benchmark category at `{dir}/{category}.baseline.json`.
//! Files are written whole on every save, never merged. There is no
//! locking: concurrent saves to one category are last-writer-wins, which
//! suits a single CI job or developer regenerating baselines at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::error::{HarnessError, Result};
use super::regression::{detect_regression, RegressionResult};
use super::stats::BenchmarkResult;

/// Format version written into new baseline files
pub const BASELINE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineEnvironment {
    #[serde(alias = "nodeVersion")]
    pub runtime_version: String,
    pub platform: String,
    pub cpu_cores: usize,
}

impl BaselineEnvironment {
    pub fn current() -> Self {
        Self {
            runtime_version: option_env!("HARNESS_RUSTC_VERSION")
                .unwrap_or("unknown")
                .to_string(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            cpu_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub unit: String,
    pub samples: usize,
}

impl From<&BenchmarkResult> for BaselineEntry {
    fn from(result: &BenchmarkResult) -> Self {
        Self {
            p50: result.p50,
            p95: result.p95,
            p99: result.p99,
            unit: "ms".to_string(),
            samples: result.iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineData {
    pub version: String,
    pub generated: DateTime<Utc>,
    pub environment: BaselineEnvironment,
    pub benchmarks: BTreeMap<String, BaselineEntry>,
}

impl BaselineData {
    pub fn from_results(results: &[BenchmarkResult]) -> Self {
        Self {
            version: BASELINE_VERSION.to_string(),
            generated: Utc::now(),
            environment: BaselineEnvironment::current(),
            benchmarks: results
                .iter()
                .map(|r| (r.name.clone(), BaselineEntry::from(r)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `category`. Categories are bare names, never paths.
    pub fn path_for(&self, category: &str) -> Result<PathBuf> {
        let valid = !category.is_empty()
            && category != "."
            && category != ".."
            && !category.contains(['/', '\\']);
        if !valid {
            return Err(HarnessError::Config(format!(
                "invalid baseline category '{}'",
                category
            )));
        }
        Ok(self.dir.join(format!("{}.baseline.json", category)))
    }

    /// Strict load: `Ok(None)` when no baseline exists yet, an error when the
    /// file exists but cannot be parsed.
    pub fn try_load(&self, category: &str) -> Result<Option<BaselineData>> {
        let path = self.path_for(category)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(category, path = %path.display(), "no baseline yet");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let data = serde_json::from_str(&raw)
            .map_err(|source| HarnessError::BaselineParse { path, source })?;
        Ok(Some(data))
    }

    /// Lenient load used by test runs: a corrupt file is logged and treated
    /// as missing.
    pub fn load(&self, category: &str) -> Option<BaselineData> {
        match self.try_load(category) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(category, error = %e, "ignoring unreadable baseline");
                None
            }
        }
    }

    /// Overwrite the category's baseline with `results` and current
    /// environment metadata.
    pub fn save(&self, category: &str, results: &[BenchmarkResult]) -> Result<BaselineData> {
        let path = self.path_for(category)?;
        // serde_json writes non-finite floats as null, which would make the file unreadable
        for r in results {
            if let Some(&value) = [r.p50, r.p95, r.p99].iter().find(|v| !v.is_finite()) {
                return Err(HarnessError::InvalidSample {
                    name: r.name.clone(),
                    index: None,
                    value,
                });
            }
        }
        let data = BaselineData::from_results(results);
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| HarnessError::Config(format!("cannot encode baseline: {}", e)))?;

        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, json)?;
        tracing::info!(
            category,
            path = %path.display(),
            benchmarks = data.benchmarks.len(),
            "baseline saved"
        );
        Ok(data)
    }

    /// Batch comparison. Benchmarks missing from the baseline are skipped
    /// with a warning instead of failing the batch; a missing baseline
    /// yields no comparisons.
    pub fn compare(
        &self,
        category: &str,
        results: &[BenchmarkResult],
        threshold: f64,
    ) -> Vec<RegressionResult> {
        let Some(baseline) = self.load(category) else {
            tracing::warn!(category, "no baseline found; run save-baseline first");
            return Vec::new();
        };

        let mut comparisons = Vec::with_capacity(results.len());
        for result in results {
            match detect_regression(&result.name, result, &baseline, threshold) {
                Ok(comparison) => comparisons.push(comparison),
                Err(HarnessError::BenchmarkNotFound { name }) => {
                    tracing::warn!(category, benchmark = %name, "benchmark not in baseline; skipping");
                }
                Err(e) => {
                    tracing::warn!(category, benchmark = %result.name, error = %e, "comparison failed; skipping");
                }
            }
        }
        comparisons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::stats::compute_stats;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;

    fn results() -> Vec<BenchmarkResult> {
        vec![
            compute_stats("GET /api/health", &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap(),
            compute_stats("POST /api/session", &[10.0, 12.0, 30.0]).unwrap(),
            compute_stats("GET /api/topics", &[7.5; 40]).unwrap(),
        ]
    }

    #[test]
    fn test_missing_baseline_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        assert!(store.try_load("nonexistent-category").unwrap().is_none());
        assert!(store.load("nonexistent-category").is_none());
    }

    #[test]
    fn test_save_then_load_preserves_p95() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path().join("nested"));
        let results = results();
        store.save("api-routes", &results).unwrap();

        let loaded = store.load("api-routes").unwrap();
        assert_eq!(loaded.version, BASELINE_VERSION);
        for r in &results {
            assert_eq!(loaded.benchmarks[&r.name].p95, r.p95);
            assert_eq!(loaded.benchmarks[&r.name].samples, r.iterations);
        }
        assert!(dir.path().join("nested/api-routes.baseline.json").exists());
    }

    #[test]
    fn test_save_overwrites_instead_of_merging() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        store.save("db", &results()).unwrap();
        store
            .save("db", &[compute_stats("only", &[1.0]).unwrap()])
            .unwrap();

        let loaded = store.load("db").unwrap();
        assert_eq!(loaded.benchmarks.len(), 1);
        assert!(loaded.benchmarks.contains_key("only"));
    }

    #[test]
    fn test_malformed_file_is_distinct_from_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        std::fs::write(dir.path().join("broken.baseline.json"), "{ not json").unwrap();

        assert!(matches!(
            store.try_load("broken"),
            Err(HarnessError::BaselineParse { .. })
        ));
        assert!(store.load("broken").is_none());
    }

    #[test]
    fn test_reads_legacy_node_version_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        std::fs::write(
            dir.path().join("legacy.baseline.json"),
            r#"{
                "version": "1.0.0",
                "generated": "2025-01-15T10:00:00Z",
                "environment": {"nodeVersion": "v20.11.0", "platform": "linux", "cpuCores": 8},
                "benchmarks": {"q": {"p50": 1.0, "p95": 2.0, "p99": 3.0, "unit": "ms", "samples": 10}}
            }"#,
        )
        .unwrap();
        let loaded = store.load("legacy").unwrap();
        assert_eq!(loaded.environment.runtime_version, "v20.11.0");
        assert_eq!(loaded.environment.cpu_cores, 8);
    }

    #[test]
    fn test_file_format_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        store.save("fmt", &results()).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("fmt.baseline.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for key in ["version", "generated", "environment", "benchmarks"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value["environment"].get("runtimeVersion").is_some());
        assert!(value["environment"].get("cpuCores").is_some());
    }

    #[test]
    fn test_save_refuses_non_finite_percentiles() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let mut poisoned = compute_stats("q", &[1.0, 2.0, 3.0]).unwrap();
        poisoned.p95 = f64::NAN;

        let err = store.save("nan", &[poisoned]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidSample { ref name, .. } if name == "q"));
        assert!(!dir.path().join("nan.baseline.json").exists());
    }

    #[test]
    fn test_category_must_be_a_bare_name() {
        let store = BaselineStore::new("/tmp");
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("api-routes").is_ok());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_batch_compare_skips_unknown_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        let mut saved = results();
        saved.pop();
        store.save("api-routes", &saved).unwrap();

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let compared = tracing::subscriber::with_default(subscriber, || {
            store.compare("api-routes", &results(), 1.2)
        });

        assert_eq!(compared.len(), 2);
        assert!(compared.iter().all(|r| !r.is_regression));
        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("GET /api/topics"));
    }

    #[test]
    fn test_batch_compare_without_baseline_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = BaselineStore::new(dir.path());
        assert!(store.compare("first-run", &results(), 1.2).is_empty());
    }
}
