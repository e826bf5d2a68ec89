use anyhow::{Context, Result};
use avs_aggregator::AggregatorConfig;
use avs_challenges::ChallengeConfig;
use avs_ledger::SubmissionConfig;
use avs_tasks::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub submission: SubmissionConfig,
    pub aggregator: AggregatorConfig,
    pub challenges: ChallengeConfig,
    pub tasks: TasksConfig,
    pub logging: LoggingConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub quorum_number: u8,
    pub quorum_threshold_percentage: u8,
    /// Blocks between dispatch and the response deadline.
    pub response_window_blocks: u64,
    /// Directory for durable task records. In-memory when unset.
    pub store_dir: Option<PathBuf>,
    pub controller: ControllerConfig,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            quorum_number: 0,
            quorum_threshold_percentage: 67,
            response_window_blocks: 5,
            store_dir: None,
            controller: ControllerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
    pub file_output: Option<PathBuf>,
    pub show_boot_banner: bool,
    /// Extra `EnvFilter` directives, module to level.
    pub module_filters: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_output: None,
            show_boot_banner: true,
            module_filters: BTreeMap::new(),
        }
    }
}

/// Parameters of the local in-memory round run by `avs-node simulate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub operators: usize,
    /// Key-generation threshold for the dealt share set.
    pub key_threshold: usize,
    pub stake_per_operator: u64,
    pub tasks: usize,
    /// Tasks whose operators sign a wrong answer.
    pub faulty_tasks: usize,
    pub challenge_window_blocks: u64,
    /// Receipt polls before a broadcast is included.
    pub inclusion_delay: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            operators: 4,
            key_threshold: 3,
            stake_per_operator: 100,
            tasks: 3,
            faulty_tasks: 1,
            challenge_window_blocks: 10,
            inclusion_delay: 1,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        // Env overrides are applied by the caller.
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("AVS_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(threshold) = env::var("AVS_QUORUM_THRESHOLD") {
            if let Ok(val) = threshold.parse::<u8>() {
                if (1..=100).contains(&val) {
                    self.tasks.quorum_threshold_percentage = val;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.tasks.quorum_threshold_percentage, 67);
        assert_eq!(config.submission.max_attempts, 5);
        assert_eq!(config.logging.format, "pretty");
        assert!(config.aggregator.fallback_threshold_percentage.is_none());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("avs.toml");

        let mut config = NodeConfig::default();
        config.tasks.store_dir = Some(PathBuf::from("/var/lib/avs/tasks"));
        config.aggregator.fallback_threshold_percentage = Some(51);
        config.simulation.tasks = 7;
        config
            .logging
            .module_filters
            .insert("avs_ledger".to_string(), "debug".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.tasks.store_dir, config.tasks.store_dir);
        assert_eq!(loaded.aggregator.fallback_threshold_percentage, Some(51));
        assert_eq!(loaded.simulation.tasks, 7);
        assert_eq!(loaded.logging.module_filters.get("avs_ledger").unwrap(), "debug");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [submission]
            max_attempts = 9

            [tasks]
            response_window_blocks = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.submission.max_attempts, 9);
        assert_eq!(config.submission.price_bump_percent, 15);
        assert_eq!(config.tasks.response_window_blocks, 12);
        assert_eq!(config.tasks.quorum_threshold_percentage, 67);
        assert_eq!(config.simulation.operators, 4);
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("AVS_LOG_LEVEL", "debug");
        env::set_var("AVS_QUORUM_THRESHOLD", "75");

        let mut config = NodeConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.tasks.quorum_threshold_percentage, 75);

        env::set_var("AVS_QUORUM_THRESHOLD", "250");
        let mut config = NodeConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.tasks.quorum_threshold_percentage, 67);

        env::remove_var("AVS_LOG_LEVEL");
        env::remove_var("AVS_QUORUM_THRESHOLD");
    }
}
