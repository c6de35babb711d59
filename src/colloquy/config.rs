//! Configuration for colloquy.
//!
//! Two independent pieces live here:
//!
//! * [`ExperimentConfig`]: what a conversation looks like (model, turn count, agents). It is
//!   sent on the wire as camelCase JSON with every relay request and can be loaded from a YAML
//!   file for headless runs. Both `numTurns` and `num_turns` spellings are accepted.
//! * [`RelayConfig`]: how the relay server runs (bind address, provider, token cap). It is read
//!   from `COLLOQUY_*` environment variables.
//!
//! # Example
//!
//! ```rust
//! use colloquy::config::ExperimentConfig;
//!
//! let yaml = r#"
//! model_name: claude-haiku-4-5
//! num_turns: 3
//! agents:
//!   - name: Alice
//!     system_prompt: You are Alice.
//!   - name: Bob
//!     system_prompt: You are Bob.
//! "#;
//! let config = ExperimentConfig::from_yaml_str(yaml).unwrap();
//! assert_eq!(config.agents.len(), 2);
//! assert_eq!(config.num_samples, 1);
//! ```

use crate::clients::Provider;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on configured agents.
pub const MAX_AGENTS: usize = 10;
/// Upper bound on `num_turns`.
pub const MAX_TURNS: usize = 100;
/// First message of every conversation.
pub const SEED_MESSAGE: &str = "Hello! I'm looking forward to our conversation.";
/// Token cap for every upstream completion.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Where `colloquy serve` listens unless told otherwise.
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("at least one agent is required")]
    NoAgents,
    #[error("at most 10 agents are supported, got {0}")]
    TooManyAgents(usize),
    #[error("agent {0} has an empty name")]
    EmptyAgentName(usize),
    #[error("agent {0} has an empty system prompt")]
    EmptySystemPrompt(usize),
    #[error("num_turns must be between 1 and 100, got {0}")]
    InvalidTurnCount(usize),
    #[error("num_samples must be at least 1")]
    InvalidSampleCount,
    #[error("model name must not be empty")]
    EmptyModelName,
    #[error("unknown provider '{0}' (expected 'anthropic' or 'openai')")]
    UnknownProvider(String),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A named persona with a fixed system prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    #[serde(alias = "system_prompt")]
    pub system_prompt: String,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

fn default_num_samples() -> usize {
    1
}

/// Experiment configuration. Immutable once a run starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    /// Number of full passes over the agent list.
    #[serde(alias = "num_turns")]
    pub num_turns: usize,
    /// How many independent conversations the batch runner performs. The relay ignores it.
    #[serde(default = "default_num_samples", alias = "num_samples")]
    pub num_samples: usize,
    /// Model identifier understood by the upstream provider.
    #[serde(alias = "model_name")]
    pub model_name: String,
    /// Speaking order.
    pub agents: Vec<AgentConfig>,
}

impl ExperimentConfig {
    pub fn new(model_name: impl Into<String>, num_turns: usize, agents: Vec<AgentConfig>) -> Self {
        Self {
            num_turns,
            num_samples: 1,
            model_name: model_name.into(),
            agents,
        }
    }

    pub fn with_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Check every invariant the orchestrator and relay rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        if self.agents.len() > MAX_AGENTS {
            return Err(ConfigError::TooManyAgents(self.agents.len()));
        }
        for (index, agent) in self.agents.iter().enumerate() {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::EmptyAgentName(index));
            }
            if agent.system_prompt.trim().is_empty() {
                return Err(ConfigError::EmptySystemPrompt(index));
            }
        }
        if self.num_turns == 0 || self.num_turns > MAX_TURNS {
            return Err(ConfigError::InvalidTurnCount(self.num_turns));
        }
        if self.num_samples == 0 {
            return Err(ConfigError::InvalidSampleCount);
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::EmptyModelName);
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: ExperimentConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

/// Settings for the relay server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    pub provider: Provider,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Empty when the environment variable is unset; the upstream call then fails.
    pub api_key: String,
    pub max_tokens: u32,
    /// Forward only the most recent N user/assistant pairs upstream. `None` forwards all.
    pub max_history_pairs: Option<usize>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            provider: Provider::default(),
            base_url: None,
            api_key: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_history_pairs: None,
        }
    }
}

impl RelayConfig {
    /// Build from the process environment:
    ///
    /// | Variable                      | Default            |
    /// |-------------------------------|--------------------|
    /// | `COLLOQUY_ADDR`               | `127.0.0.1:3000`   |
    /// | `COLLOQUY_PROVIDER`           | `anthropic`        |
    /// | `COLLOQUY_BASE_URL`           | provider default   |
    /// | `COLLOQUY_MAX_TOKENS`         | `1024`             |
    /// | `COLLOQUY_MAX_HISTORY_PAIRS`  | unbounded          |
    /// | `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` | empty     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RelayConfig::from_env`] but reading from an arbitrary lookup, which keeps
    /// tests away from the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RelayConfig::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = non_empty("COLLOQUY_ADDR") {
            config.addr = value.trim().parse::<SocketAddr>().map_err(|_| ConfigError::InvalidValue {
                key: "COLLOQUY_ADDR",
                value,
            })?;
        }
        if let Some(value) = non_empty("COLLOQUY_PROVIDER") {
            config.provider = value.parse()?;
        }
        config.base_url = non_empty("COLLOQUY_BASE_URL");
        if let Some(value) = non_empty("COLLOQUY_MAX_TOKENS") {
            config.max_tokens = value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "COLLOQUY_MAX_TOKENS",
                    value,
                })?;
        }
        if let Some(value) = non_empty("COLLOQUY_MAX_HISTORY_PAIRS") {
            let pairs = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "COLLOQUY_MAX_HISTORY_PAIRS",
                    value,
                })?;
            config.max_history_pairs = Some(pairs);
        }
        config.api_key = lookup(config.provider.api_key_var()).unwrap_or_default();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn two_agents() -> Vec<AgentConfig> {
        vec![
            AgentConfig::new("X", "You are X."),
            AgentConfig::new("Y", "You are Y."),
        ]
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = r#"{
            "numTurns": 2,
            "numSamples": 1,
            "modelName": "claude-haiku-4-5",
            "agents": [{"name": "X", "systemPrompt": "You are X."}]
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.num_turns, 2);
        assert_eq!(config.agents[0].system_prompt, "You are X.");

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["modelName"], "claude-haiku-4-5");
        assert_eq!(value["agents"][0]["systemPrompt"], "You are X.");
    }

    #[test]
    fn test_validation_rules() {
        assert!(ExperimentConfig::new("m", 2, two_agents()).validate().is_ok());
        assert!(matches!(
            ExperimentConfig::new("m", 2, vec![]).validate(),
            Err(ConfigError::NoAgents)
        ));
        let eleven = (0..11).map(|i| AgentConfig::new(format!("A{}", i), "p")).collect();
        assert!(matches!(
            ExperimentConfig::new("m", 2, eleven).validate(),
            Err(ConfigError::TooManyAgents(11))
        ));
        assert!(matches!(
            ExperimentConfig::new("m", 0, two_agents()).validate(),
            Err(ConfigError::InvalidTurnCount(0))
        ));
        assert!(matches!(
            ExperimentConfig::new("m", MAX_TURNS + 1, two_agents()).validate(),
            Err(ConfigError::InvalidTurnCount(_))
        ));
        assert!(matches!(
            ExperimentConfig::new("m", 1, vec![AgentConfig::new(" ", "p")]).validate(),
            Err(ConfigError::EmptyAgentName(0))
        ));
        assert!(matches!(
            ExperimentConfig::new("m", 1, vec![AgentConfig::new("a", "")]).validate(),
            Err(ConfigError::EmptySystemPrompt(0))
        ));
        assert!(matches!(
            ExperimentConfig::new("", 1, two_agents()).validate(),
            Err(ConfigError::EmptyModelName)
        ));
        assert!(matches!(
            ExperimentConfig::new("m", 1, two_agents()).with_samples(0).validate(),
            Err(ConfigError::InvalidSampleCount)
        ));
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.yaml");
        std::fs::write(
            &path,
            "model_name: gpt-4.1-nano\nnum_turns: 4\nnum_samples: 3\nagents:\n  - name: A\n    system_prompt: Be A.\n",
        )
        .unwrap();
        let config = ExperimentConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.num_turns, 4);
        assert_eq!(config.num_samples, 3);
        assert_eq!(config.model_name, "gpt-4.1-nano");

        let missing = ExperimentConfig::from_yaml_file(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_yaml_validation_is_applied() {
        let yaml = "model_name: m\nnum_turns: 1\nagents: []\n";
        assert!(matches!(
            ExperimentConfig::from_yaml_str(yaml),
            Err(ConfigError::NoAgents)
        ));
    }

    #[test]
    fn test_relay_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("COLLOQUY_ADDR", "0.0.0.0:8080"),
            ("COLLOQUY_PROVIDER", "openai"),
            ("COLLOQUY_MAX_TOKENS", "512"),
            ("COLLOQUY_MAX_HISTORY_PAIRS", "6"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "ignored"),
        ]
        .into_iter()
        .collect();
        let config = RelayConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.max_history_pairs, Some(6));
        assert_eq!(config.api_key, "sk-test");
    }

    #[test]
    fn test_relay_config_defaults_and_errors() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.addr.to_string(), DEFAULT_ADDR);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(config.api_key.is_empty());

        let bad = RelayConfig::from_lookup(|k| (k == "COLLOQUY_MAX_TOKENS").then(|| "0".to_string()));
        assert!(matches!(bad, Err(ConfigError::InvalidValue { .. })));
    }
}
