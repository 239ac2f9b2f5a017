use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::SelectorPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub termgraph: TermgraphConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub reinference: ReinferenceConfig,
}

/// Termgraph-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TermgraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Inference tuning. The decay constant is deliberately configuration, not
/// a hardcoded value, pending empirical tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_decay")]
    pub decay: f64,
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    /// Candidates below this confidence never reach the review queue.
    #[serde(default)]
    pub min_confidence: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            decay: default_decay(),
            default_max_depth: default_max_depth(),
            min_confidence: 0.0,
        }
    }
}

/// Backend selection policy (see the store's selector module).
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: i64,
    #[serde(default = "default_p95_ratio")]
    pub p95_ratio: f64,
    #[serde(default = "default_benchmark_samples")]
    pub benchmark_samples: usize,
    #[serde(default = "default_benchmark_depth")]
    pub benchmark_depth: usize,
    /// Graph-index sync errors tolerated before reads fall back to the
    /// relational backend.
    #[serde(default = "default_sync_error_budget")]
    pub sync_error_budget: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            edge_threshold: default_edge_threshold(),
            p95_ratio: default_p95_ratio(),
            benchmark_samples: default_benchmark_samples(),
            benchmark_depth: default_benchmark_depth(),
            sync_error_budget: default_sync_error_budget(),
        }
    }
}

impl BackendConfig {
    pub fn selector_policy(&self) -> SelectorPolicy {
        SelectorPolicy {
            edge_threshold: self.edge_threshold,
            p95_ratio: self.p95_ratio,
            benchmark_samples: self.benchmark_samples,
            benchmark_depth: self.benchmark_depth,
        }
    }
}

/// Bulk re-inference configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReinferenceConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ReinferenceConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_decay() -> f64 {
    0.9
}

fn default_max_depth() -> usize {
    3
}

fn default_edge_threshold() -> i64 {
    5000
}

fn default_p95_ratio() -> f64 {
    0.5
}

fn default_benchmark_samples() -> usize {
    50
}

fn default_benchmark_depth() -> usize {
    3
}

fn default_sync_error_budget() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    100
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in TERMGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config_path = std::env::var("TERMGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.inference.decay) {
            anyhow::bail!("inference.decay must be between 0.0 and 1.0");
        }

        if !(0.0..=1.0).contains(&self.inference.min_confidence) {
            anyhow::bail!("inference.min_confidence must be between 0.0 and 1.0");
        }

        if self.inference.default_max_depth == 0 {
            anyhow::bail!("inference.default_max_depth must be greater than 0");
        }

        if self.backend.p95_ratio <= 0.0 || self.backend.p95_ratio >= 1.0 {
            anyhow::bail!("backend.p95_ratio must be strictly between 0.0 and 1.0");
        }

        if self.backend.benchmark_samples == 0 {
            anyhow::bail!("backend.benchmark_samples must be greater than 0");
        }

        if self.reinference.chunk_size == 0 {
            anyhow::bail!("reinference.chunk_size must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.termgraph.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const TEST_CONFIG: &str = r#"
[termgraph]
db_path = "./test.db"
log_level = "debug"

[inference]
decay = 0.85
default_max_depth = 4
min_confidence = 0.3

[backend]
edge_threshold = 2000
p95_ratio = 0.4

[reinference]
chunk_size = 25
"#;

    fn with_config_file(content: &str, f: impl FnOnce(Result<Config>)) {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, content).unwrap();

        let original = std::env::var("TERMGRAPH_CONFIG").ok();
        std::env::set_var("TERMGRAPH_CONFIG", config_path.to_str().unwrap());
        f(Config::load());
        std::env::remove_var("TERMGRAPH_CONFIG");
        if let Some(val) = original {
            std::env::set_var("TERMGRAPH_CONFIG", val);
        }
    }

    #[test]
    fn test_config_load_success() {
        with_config_file(TEST_CONFIG, |config| {
            let config = config.expect("config should load");
            assert_eq!(config.termgraph.log_level, "debug");
            assert!((config.inference.decay - 0.85).abs() < f64::EPSILON);
            assert_eq!(config.inference.default_max_depth, 4);
            assert_eq!(config.backend.edge_threshold, 2000);
            assert_eq!(config.reinference.chunk_size, 25);
            // Unspecified fields take defaults
            assert_eq!(config.backend.benchmark_samples, 50);
            assert_eq!(config.backend.sync_error_budget, 3);
        });
    }

    #[test]
    fn test_config_defaults_for_optional_sections() {
        with_config_file("[termgraph]\ndb_path = \"./graph.db\"\n", |config| {
            let config = config.expect("minimal config should load");
            assert_eq!(config.termgraph.log_level, "info");
            assert!((config.inference.decay - 0.9).abs() < f64::EPSILON);
            assert_eq!(config.backend.edge_threshold, 5000);
            assert_eq!(config.reinference.chunk_size, 100);
        });
    }

    #[test]
    fn test_config_rejects_bad_decay() {
        let bad = TEST_CONFIG.replace("decay = 0.85", "decay = 1.5");
        with_config_file(&bad, |config| {
            let err = config.unwrap_err();
            assert!(err.to_string().contains("inference.decay"));
        });
    }

    #[test]
    fn test_config_rejects_bad_ratio() {
        let bad = TEST_CONFIG.replace("p95_ratio = 0.4", "p95_ratio = 1.0");
        with_config_file(&bad, |config| {
            assert!(config.is_err());
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("TERMGRAPH_CONFIG").ok();
        std::env::set_var("TERMGRAPH_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("TERMGRAPH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("TERMGRAPH_CONFIG", v);
        }
    }

    #[test]
    fn test_selector_policy_conversion() {
        let backend = BackendConfig::default();
        let policy = backend.selector_policy();
        assert_eq!(policy.edge_threshold, 5000);
        assert!((policy.p95_ratio - 0.5).abs() < f64::EPSILON);
    }
}
