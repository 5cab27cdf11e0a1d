//! recoder configuration stored in `recoder.toml`.

use crate::error::{self, Error, Result};
use crate::provider::{ProviderConfig, DEFAULT_LOCAL_BASE_URL, DEFAULT_LOCAL_MODEL};
use crate::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "recoder.toml";

/// Top-level configuration (TOML). Missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoderConfig {
    pub model: ModelConfig,
    pub sandbox: SandboxSection,
    pub run: RunConfig,
}

/// Model backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible endpoint, e.g. a local vLLM server
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    /// Environment variable holding the API key; wins over `api_key` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub temperature: f32,
    /// Cap on generated tokens per call; the server decides when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOCAL_BASE_URL.into(),
            model: DEFAULT_LOCAL_MODEL.into(),
            api_key: "EMPTY".into(),
            api_key_env: None,
            temperature: 0.0,
            max_tokens: None,
            timeout_secs: 300,
        }
    }
}

/// Execution sandbox limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxSection {
    pub interpreter: String,
    pub timeout_secs: u64,
    /// Address-space limit; 0 disables it
    pub memory_limit_mb: u64,
    /// CPU-time limit; 0 disables it
    pub cpu_limit_secs: u64,
    pub output_limit_bytes: usize,
    pub allow_network: bool,
    pub allow_filesystem: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        let defaults = SandboxConfig::default();
        Self {
            interpreter: defaults.interpreter,
            timeout_secs: defaults.timeout.as_secs(),
            memory_limit_mb: defaults.memory_limit_mb.unwrap_or(0),
            cpu_limit_secs: defaults.cpu_limit_secs.unwrap_or(0),
            output_limit_bytes: defaults.output_limit_bytes,
            allow_network: defaults.allow_network,
            allow_filesystem: defaults.allow_filesystem,
        }
    }
}

/// Generation loop defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Attempt budget for a run
    pub max_attempts: u32,
    /// Truncate `message` events beyond this many characters
    pub message_limit: usize,
    /// Emit `message` events
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            message_limit: 500,
            verbose: true,
        }
    }
}

impl RecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.base_url.trim().is_empty() {
            return Err(error::config_invalid("model.base_url", "must not be empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(error::config_invalid("model.model", "must not be empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(error::config_invalid("model.timeout_secs", "must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(error::config_invalid("model.temperature", "must be within 0.0..=2.0"));
        }
        if self.model.max_tokens == Some(0) {
            return Err(error::config_invalid("model.max_tokens", "must be > 0 when set"));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(error::config_invalid("sandbox.interpreter", "must not be empty"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(error::config_invalid("sandbox.timeout_secs", "must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(error::config_invalid("sandbox.output_limit_bytes", "must be > 0"));
        }
        if self.run.max_attempts == 0 {
            return Err(error::config_invalid("run.max_attempts", "must be > 0"));
        }
        if self.run.message_limit == 0 {
            return Err(error::config_invalid("run.message_limit", "must be > 0"));
        }
        Ok(())
    }

    /// Apply `RECODER_*` overrides and resolve `api_key_env` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the environment
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("RECODER_BASE_URL") {
            self.model.base_url = url;
        }
        if let Some(model) = lookup("RECODER_MODEL") {
            self.model.model = model;
        }
        if let Some(var) = &self.model.api_key_env {
            match lookup(var) {
                Some(key) => self.model.api_key = key,
                None => debug!(var = %var, "api_key_env is not set, keeping api_key"),
            }
        }
        if let Some(key) = lookup("RECODER_API_KEY") {
            self.model.api_key = key;
        }
    }

    /// Provider settings for the configured endpoint
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::local(&self.model.base_url, &self.model.model)
            .with_api_key(&self.model.api_key)
            .with_timeout(Duration::from_secs(self.model.timeout_secs))
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        let s = &self.sandbox;
        SandboxConfig {
            output_limit_bytes: s.output_limit_bytes,
            ..SandboxConfig::default()
        }
        .with_interpreter(&s.interpreter)
        .with_timeout(Duration::from_secs(s.timeout_secs))
        .with_memory_limit_mb((s.memory_limit_mb > 0).then_some(s.memory_limit_mb))
        .with_cpu_limit_secs((s.cpu_limit_secs > 0).then_some(s.cpu_limit_secs))
        .with_network(s.allow_network)
        .with_filesystem(s.allow_filesystem)
    }

    /// Copy safe to print: the API key is masked
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if !cfg.model.api_key.is_empty() && cfg.model.api_key != "EMPTY" {
            cfg.model.api_key = "********".into();
        }
        cfg
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| error::serialization_error(format!("serialize config toml: {}", e)))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RecoderConfig::default()`. Environment
/// overrides are not applied here; see [`RecoderConfig::apply_env`].
pub fn load_config(path: &Path) -> Result<RecoderConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = RecoderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).map_err(|e| {
        Error::from(e)
            .with_operation("config::load")
            .with_context("path", path.display().to_string())
    })?;
    let cfg: RecoderConfig = toml::from_str(&contents).map_err(|e| {
        Error::parse_failed(format!("parse {}: {}", path.display(), e)).with_operation("config::load")
    })?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::HashMap;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RecoderConfig::default());
        assert_eq!(cfg.run.max_attempts, 3);
        assert_eq!(cfg.model.base_url, "http://localhost:5005/v1");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("recoder.toml");
        fs::write(&path, "[run]\nmax_attempts = 5\n\n[sandbox]\nallow_network = true\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.run.max_attempts, 5);
        assert!(cfg.run.verbose);
        assert!(cfg.sandbox.allow_network);
        assert_eq!(cfg.sandbox.timeout_secs, 30);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("recoder.toml");
        fs::write(&path, "[run]\nmax_attempts = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert!(err.context().iter().any(|(k, v)| *k == "field" && v == "run.max_attempts"));
    }

    #[test]
    fn max_tokens_is_optional_but_positive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("recoder.toml");
        fs::write(&path, "[model]\nmax_tokens = 2048\n").expect("write");
        assert_eq!(load_config(&path).expect("load").model.max_tokens, Some(2048));

        fs::write(&path, "[model]\nmax_tokens = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert_eq!(err.context_value("field"), Some("model.max_tokens"));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("recoder.toml");
        fs::write(&path, "[run\nmax_attempts = ").expect("write");
        assert_eq!(load_config(&path).unwrap_err().kind(), ErrorKind::ParseFailed);
    }

    #[test]
    fn env_overrides_apply_in_order() {
        let env: HashMap<&str, &str> = [
            ("RECODER_MODEL", "qwen"),
            ("MY_KEY", "from-key-env"),
        ]
        .into_iter()
        .collect();
        let mut cfg = RecoderConfig::default();
        cfg.model.api_key_env = Some("MY_KEY".into());
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.model.model, "qwen");
        assert_eq!(cfg.model.api_key, "from-key-env");
        assert_eq!(cfg.model.base_url, DEFAULT_LOCAL_BASE_URL);

        cfg.apply_env_with(|k| (k == "RECODER_API_KEY").then(|| "explicit".to_string()));
        assert_eq!(cfg.model.api_key, "explicit");
    }

    #[test]
    fn zero_limits_disable_rlimits() {
        let mut cfg = RecoderConfig::default();
        cfg.sandbox.memory_limit_mb = 0;
        let sandbox = cfg.sandbox_config();
        assert_eq!(sandbox.memory_limit_mb, None);
        assert_eq!(sandbox.cpu_limit_secs, Some(30));
        assert_eq!(sandbox.timeout, Duration::from_secs(30));
    }

    #[test]
    fn provider_config_follows_model_section() {
        let mut cfg = RecoderConfig::default();
        cfg.model.model = "qwen".into();
        cfg.model.timeout_secs = 12;
        let provider = cfg.provider_config();
        assert_eq!(provider.base_url, DEFAULT_LOCAL_BASE_URL);
        assert_eq!(provider.model, "qwen");
        assert_eq!(provider.api_key.as_deref(), Some("EMPTY"));
        assert_eq!(provider.timeout, Duration::from_secs(12));
    }

    #[test]
    fn redacted_masks_real_keys() {
        let mut cfg = RecoderConfig::default();
        assert_eq!(cfg.redacted().model.api_key, "EMPTY");
        cfg.model.api_key = "sk-secret".into();
        let printed = cfg.redacted().to_toml().expect("toml");
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("[sandbox]"));
    }
}
