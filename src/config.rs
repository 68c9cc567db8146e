//! Engine configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional YAML file, then `BENCH_FORGE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// How to reach one agent under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEndpoint {
    pub key: String,
    pub endpoint: String,
    /// Whether the agent is judged from traces instead of its response.
    #[serde(default)]
    pub trace_mode: bool,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_timeout_secs() -> u64 {
    300
}

impl AgentEndpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration for the evaluation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Storage
    /// `sqlite://` URL or path of the document database, or `memory`.
    pub database_url: String,
    /// Retries after a version conflict in a targeted update.
    pub max_conflict_retries: u32,

    // Trace polling
    /// Wait between two trace fetch attempts.
    pub poll_interval: Duration,
    /// Attempts before a report is marked as having no traces.
    pub max_trace_attempts: u32,
    /// Upper bound on concurrently polling reports.
    pub max_concurrent_pollers: usize,
    /// Base URL of the observability backend.
    pub trace_endpoint: Option<String>,

    // Judge
    pub judge_model: Option<String>,
    pub llm_api_base: Option<String>,
    pub llm_api_key: Option<String>,

    // Runs
    /// Capacity of each run's progress channel.
    pub progress_buffer: usize,
    pub agents: Vec<AgentEndpoint>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://bench-forge.db".to_string(),
            max_conflict_retries: 10,

            poll_interval: Duration::from_secs(30),
            max_trace_attempts: 20,
            max_concurrent_pollers: 16,
            trace_endpoint: None,

            judge_model: None,
            llm_api_base: None,
            llm_api_key: None,

            progress_buffer: 64,
            agents: Vec::new(),
        }
    }
}

/// On-disk shape of the YAML configuration file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    database_url: Option<String>,
    max_conflict_retries: Option<u32>,
    poll_interval_secs: Option<u64>,
    max_trace_attempts: Option<u32>,
    max_concurrent_pollers: Option<usize>,
    trace_endpoint: Option<String>,
    judge_model: Option<String>,
    llm_api_base: Option<String>,
    progress_buffer: Option<usize>,
    #[serde(default)]
    agents: Vec<AgentEndpoint>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BENCH_FORGE_DATABASE_URL`: Document database (default: sqlite://bench-forge.db)
    /// - `BENCH_FORGE_POLL_INTERVAL_SECS`: Trace poll interval (default: 30)
    /// - `BENCH_FORGE_MAX_TRACE_ATTEMPTS`: Trace fetch attempts (default: 20)
    /// - `BENCH_FORGE_MAX_CONCURRENT_POLLERS`: Concurrent pollers (default: 16)
    /// - `BENCH_FORGE_MAX_CONFLICT_RETRIES`: Update conflict retries (default: 10)
    /// - `BENCH_FORGE_PROGRESS_BUFFER`: Progress channel capacity (default: 64)
    /// - `BENCH_FORGE_TRACE_ENDPOINT`: Observability backend base URL
    /// - `BENCH_FORGE_JUDGE_MODEL`: Model used by the LLM judge
    /// - `LITELLM_API_BASE` / `LITELLM_API_KEY`: LLM endpoint for the judge
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML configuration file on top of the defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = serde_yaml::from_str(raw)?;
        let mut config = Self::default();

        if let Some(url) = file.database_url {
            config.database_url = url;
        }
        if let Some(retries) = file.max_conflict_retries {
            config.max_conflict_retries = retries;
        }
        if let Some(secs) = file.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = file.max_trace_attempts {
            config.max_trace_attempts = attempts;
        }
        if let Some(pollers) = file.max_concurrent_pollers {
            config.max_concurrent_pollers = pollers;
        }
        if let Some(buffer) = file.progress_buffer {
            config.progress_buffer = buffer;
        }
        config.trace_endpoint = file.trace_endpoint;
        config.judge_model = file.judge_model;
        config.llm_api_base = file.llm_api_base;
        config.agents = file.agents;

        Ok(config)
    }

    /// Applies `BENCH_FORGE_*` overrides read through `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("BENCH_FORGE_DATABASE_URL") {
            self.database_url = val;
        }

        if let Some(val) = lookup("BENCH_FORGE_POLL_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "BENCH_FORGE_POLL_INTERVAL_SECS")?;
            self.poll_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("BENCH_FORGE_MAX_TRACE_ATTEMPTS") {
            self.max_trace_attempts = parse_env_value(&val, "BENCH_FORGE_MAX_TRACE_ATTEMPTS")?;
        }

        if let Some(val) = lookup("BENCH_FORGE_MAX_CONCURRENT_POLLERS") {
            self.max_concurrent_pollers =
                parse_env_value(&val, "BENCH_FORGE_MAX_CONCURRENT_POLLERS")?;
        }

        if let Some(val) = lookup("BENCH_FORGE_MAX_CONFLICT_RETRIES") {
            self.max_conflict_retries = parse_env_value(&val, "BENCH_FORGE_MAX_CONFLICT_RETRIES")?;
        }

        if let Some(val) = lookup("BENCH_FORGE_PROGRESS_BUFFER") {
            self.progress_buffer = parse_env_value(&val, "BENCH_FORGE_PROGRESS_BUFFER")?;
        }

        if let Some(val) = lookup("BENCH_FORGE_TRACE_ENDPOINT") {
            self.trace_endpoint = Some(val);
        }

        if let Some(val) = lookup("BENCH_FORGE_JUDGE_MODEL") {
            self.judge_model = Some(val);
        }

        if let Some(val) = lookup("LITELLM_API_BASE") {
            self.llm_api_base = Some(val);
        }

        if let Some(val) = lookup("LITELLM_API_KEY") {
            self.llm_api_key = Some(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.max_trace_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_trace_attempts must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_pollers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_pollers must be greater than 0".to_string(),
            ));
        }

        if self.progress_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "progress_buffer must be greater than 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.key.is_empty() || agent.endpoint.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "agents need both a key and an endpoint".to_string(),
                ));
            }
            if !seen.insert(agent.key.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "agent '{}' is declared more than once",
                    agent.key
                )));
            }
        }

        Ok(())
    }

    pub fn agent(&self, key: &str) -> Option<&AgentEndpoint> {
        self.agents.iter().find(|a| a.key == key)
    }

    /// Builder method to set database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the trace poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the trace fetch attempt cap.
    pub fn with_max_trace_attempts(mut self, attempts: u32) -> Self {
        self.max_trace_attempts = attempts;
        self
    }

    pub fn with_max_concurrent_pollers(mut self, pollers: usize) -> Self {
        self.max_concurrent_pollers = pollers;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn with_progress_buffer(mut self, buffer: usize) -> Self {
        self.progress_buffer = buffer;
        self
    }

    pub fn with_trace_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.trace_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_agent(mut self, agent: AgentEndpoint) -> Self {
        self.agents.push(agent);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.database_url, "sqlite://bench-forge.db");
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.max_trace_attempts, 20);
        assert_eq!(config.max_concurrent_pollers, 16);
        assert_eq!(config.max_conflict_retries, 10);
        assert_eq!(config.progress_buffer, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_max_trace_attempts(3)
            .with_max_concurrent_pollers(2)
            .with_trace_endpoint("http://traces.local");

        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.max_trace_attempts, 3);
        assert_eq!(config.max_concurrent_pollers, 2);
        assert_eq!(config.trace_endpoint.as_deref(), Some("http://traces.local"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BENCH_FORGE_POLL_INTERVAL_SECS", "5"),
            ("BENCH_FORGE_MAX_TRACE_ATTEMPTS", "7"),
            ("BENCH_FORGE_JUDGE_MODEL", "gpt-4o-mini"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_trace_attempts, 7);
        assert_eq!(config.judge_model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_env_invalid_value() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|k| (k == "BENCH_FORGE_MAX_TRACE_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("BENCH_FORGE_MAX_TRACE_ATTEMPTS"));
    }

    #[test]
    fn test_yaml_config() {
        let raw = r#"
databaseUrl: sqlite://evals.db
pollIntervalSecs: 10
traceEndpoint: http://phoenix:6006
agents:
  - key: support-bot
    endpoint: http://localhost:8080/invoke
    traceMode: true
  - key: faq-bot
    endpoint: http://localhost:8081/invoke
    timeoutSecs: 30
"#;
        let config = EngineConfig::from_yaml_str(raw).expect("parse");
        assert_eq!(config.database_url, "sqlite://evals.db");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.max_trace_attempts, 20);
        assert_eq!(config.agents.len(), 2);

        let bot = config.agent("support-bot").expect("agent");
        assert!(bot.trace_mode);
        assert_eq!(bot.timeout(), Duration::from_secs(300));
        assert_eq!(config.agent("faq-bot").map(|a| a.timeout_secs), Some(30));
    }

    #[test]
    fn test_yaml_rejects_unknown_keys() {
        assert!(EngineConfig::from_yaml_str("pollIntervalMinutes: 3\n").is_err());
    }

    #[test]
    fn test_validation_failures() {
        let err = EngineConfig::default()
            .with_max_trace_attempts(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_trace_attempts"));

        let agent = AgentEndpoint {
            key: "a".to_string(),
            endpoint: "http://x".to_string(),
            trace_mode: false,
            timeout_secs: 1,
        };
        let err = EngineConfig::default()
            .with_agent(agent.clone())
            .with_agent(agent)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
