//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.bugsmith.toml` files.

use crate::cli::{Args, RollupArgs};
use crate::llm::{ModelSettings, ProtocolMarkers, ProviderKind};
use crate::llm::relay::{DEFAULT_BEGIN_MARKER, DEFAULT_END_MARKER};
use crate::tracker::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".bugsmith.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Upstream model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Stream relay settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Status rollup settings.
    #[serde(default)]
    pub rollup: RollupConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Upstream model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Wire format of the endpoint.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Endpoint base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Overall deadline for one generation, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Bearer token for OpenAI-compatible endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_base_url(),
            name: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            api_key: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llava:latest".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout() -> u64 {
    300
}

/// Stream relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Marker that opens the structured payload.
    #[serde(default = "default_begin_marker")]
    pub begin_marker: String,

    /// Marker that closes the structured payload.
    #[serde(default = "default_end_marker")]
    pub end_marker: String,

    /// Events buffered between the relay and the consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            begin_marker: default_begin_marker(),
            end_marker: default_end_marker(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_begin_marker() -> String {
    DEFAULT_BEGIN_MARKER.to_string()
}

fn default_end_marker() -> String {
    DEFAULT_END_MARKER.to_string()
}

fn default_channel_capacity() -> usize {
    64
}

/// Status rollup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Issue tracker base URL. Required for `rollup`.
    #[serde(default)]
    pub tracker_url: String,

    /// Maximum lookups in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// How long a looked-up status stays fresh.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Attempts per lookup, including the first.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Per-request timeout for lookups, in seconds.
    #[serde(default = "default_lookup_timeout")]
    pub timeout_seconds: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            tracker_url: String::new(),
            concurrency: default_concurrency(),
            cache_ttl_seconds: default_cache_ttl(),
            retries: default_retries(),
            timeout_seconds: default_lookup_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_retries() -> usize {
    3
}

fn default_lookup_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.bugsmith.toml` from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with global CLI arguments.
    ///
    /// Only values given explicitly on the command line override the file.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(provider) = args.provider {
            self.model.provider = provider;
        }
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref base_url) = args.base_url {
            self.model.base_url = base_url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Merge `rollup` sub-command arguments.
    pub fn merge_with_rollup_args(&mut self, args: &RollupArgs) {
        if let Some(concurrency) = args.concurrency {
            self.rollup.concurrency = concurrency;
        }
        if let Some(ref tracker_url) = args.tracker_url {
            self.rollup.tracker_url = tracker_url.clone();
        }
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            provider: self.model.provider,
            base_url: self.model.base_url.clone(),
            model_name: self.model.name.clone(),
            temperature: self.model.temperature,
            timeout_seconds: self.model.timeout_seconds,
            api_key: self.model.api_key.clone(),
        }
    }

    pub fn markers(&self) -> Result<ProtocolMarkers> {
        ProtocolMarkers::new(&self.relay.begin_marker, &self.relay.end_marker)
            .context("Invalid [relay] markers")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.rollup.retries.max(1),
            ..RetryPolicy::default()
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Command, RollupFormat};
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.provider, ProviderKind::Ollama);
        assert_eq!(config.model.base_url, "http://localhost:11434");
        assert_eq!(config.relay.begin_marker, "<<BEGIN_JSON>>");
        assert_eq!(config.rollup.concurrency, 5);
        assert_eq!(config.rollup.cache_ttl_seconds, 300);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
verbose = true

[model]
provider = "openai"
base_url = "https://llm.internal"
name = "gpt-4o-mini"
api_key = "sk-test"

[relay]
begin_marker = "<<JSON>>"
end_marker = "<</JSON>>"

[rollup]
tracker_url = "https://tracker.example.com"
concurrency = 8
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.general.verbose);
        assert_eq!(config.model.provider, ProviderKind::OpenAi);
        assert_eq!(config.model.name, "gpt-4o-mini");
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.timeout_seconds, 300);
        assert_eq!(config.relay.channel_capacity, 64);
        assert_eq!(config.markers().unwrap().end(), "<</JSON>>");
        assert_eq!(config.rollup.concurrency, 8);
        assert_eq!(config.rollup.retries, 3);
    }

    #[test]
    fn test_invalid_markers_rejected() {
        let mut config = Config::default();
        config.relay.end_marker = String::new();
        assert!(config.markers().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        writeln!(file, "[model]\nname = \"llama3.2-vision\"").unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.model.name, "llama3.2-vision");

        let empty = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(empty.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[model\nname = ").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = Config::default();
        config.model.name = "from-file".to_string();
        config.model.timeout_seconds = 42;

        let args = Args::parse_from([
            "bugsmith",
            "--model",
            "from-cli",
            "--provider",
            "openai",
            "rollup",
            "--concurrency",
            "2",
            "--tracker-url",
            "https://t.example",
            "QA-1",
        ]);
        config.merge_with_args(&args);
        assert_eq!(config.model.name, "from-cli");
        assert_eq!(config.model.provider, ProviderKind::OpenAi);
        assert_eq!(config.model.timeout_seconds, 42);

        let Some(Command::Rollup(ref rollup)) = args.command else {
            panic!("expected rollup");
        };
        assert_eq!(rollup.format, RollupFormat::Table);
        config.merge_with_rollup_args(rollup);
        assert_eq!(config.rollup.concurrency, 2);
        assert_eq!(config.rollup.tracker_url, "https://t.example");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[relay]"));
        assert!(toml_str.contains("[rollup]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.relay.end_marker, "<<END_JSON>>");
    }
}
