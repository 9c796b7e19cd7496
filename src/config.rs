use serde::Serialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::insight::InsightLimits;
use crate::llm::{Provider, ProviderConfig};
use crate::pipeline::PipelineSettings;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://wellness-insight.db?mode=rwc";

/// ---------------------------------------------------------------------------
/// Error Types
/// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum ConfigError {
  #[error("Invalid value for {var}: {reason}")]
  Invalid { var: String, reason: String },

  #[error("Missing value for {0}")]
  Missing(String),
}

fn invalid(var: &str, reason: impl std::fmt::Display) -> ConfigError {
  ConfigError::Invalid {
    var: var.to_string(),
    reason: reason.to_string(),
  }
}

/// ---------------------------------------------------------------------------
/// Environment Readers
/// ---------------------------------------------------------------------------

/// Set and non-blank value of a variable
fn var(name: &str) -> Option<String> {
  env::var(name)
    .ok()
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  match var(name) {
    Some(raw) => raw.parse::<T>().map_err(|e| invalid(name, e)),
    None => Ok(default),
  }
}

fn bool_var(name: &str, default: bool) -> Result<bool, ConfigError> {
  match var(name).map(|v| v.to_lowercase()).as_deref() {
    None => Ok(default),
    Some("1" | "true" | "yes" | "on") => Ok(true),
    Some("0" | "false" | "no" | "off") => Ok(false),
    Some(other) => Err(invalid(name, format!("expected a boolean, got {}", other))),
  }
}

fn secs_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
  parse_var(name, default).map(Duration::from_secs)
}

/// ---------------------------------------------------------------------------
/// Application Config
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub database_url: String,
  /// None when the narrative stage is disabled or no API key is set
  pub llm: Option<ProviderConfig>,
  pub insight_limits: InsightLimits,
  pub pipeline: PipelineSettings,
}

impl AppConfig {
  /// Load `.env` if present, then read the process environment
  pub fn from_env() -> Result<Self, ConfigError> {
    dotenvy::dotenv().ok();

    let database_url = match env::var("DATABASE_URL") {
      Ok(url) if url.trim().is_empty() => return Err(ConfigError::Missing("DATABASE_URL".to_string())),
      Ok(url) => url.trim().to_string(),
      Err(_) => DEFAULT_DATABASE_URL.to_string(),
    };

    let mut pipeline = PipelineSettings {
      cache_ttl: secs_var("CACHE_TTL_SECS", 900)?,
      insight_timeout: secs_var("INSIGHT_STAGE_TIMEOUT_SECS", 120)?,
      storage_timeout: secs_var("STORAGE_TIMEOUT_SECS", 10)?,
      ..PipelineSettings::default()
    };
    let min_samples: usize = parse_var("BURNOUT_MIN_SAMPLES", pipeline.scoring.burnout.min_samples)?;
    if min_samples == 0 {
      return Err(invalid("BURNOUT_MIN_SAMPLES", "must be at least 1"));
    }
    pipeline.scoring.burnout.min_samples = min_samples;

    let defaults = InsightLimits::default();
    let first_max_tokens: u32 = parse_var("LLM_MAX_TOKENS", defaults.first_max_tokens)?;
    let insight_limits = InsightLimits {
      first_max_tokens,
      continuation_max_tokens: parse_var("LLM_CONTINUATION_MAX_TOKENS", defaults.continuation_max_tokens)?,
      repair_max_tokens: first_max_tokens,
      single_pass: bool_var("LLM_SINGLE_PASS", defaults.single_pass)?,
    };

    Ok(Self {
      database_url,
      llm: Self::llm_from_env()?,
      insight_limits,
      pipeline,
    })
  }

  fn llm_from_env() -> Result<Option<ProviderConfig>, ConfigError> {
    let provider: Provider = match var("LLM_PROVIDER") {
      Some(raw) => raw.parse().map_err(|e: String| invalid("LLM_PROVIDER", e))?,
      None => Provider::DeepSeek,
    };
    let timeout = secs_var("LLM_TIMEOUT_SECS", 60)?;

    if bool_var("DISABLE_LLM", false)? {
      return Ok(None);
    }
    let Some(api_key) = var("LLM_API_KEY") else {
      return Ok(None);
    };

    let mut config = ProviderConfig::new(provider, api_key).with_timeout(timeout);
    if let Some(model) = var("LLM_MODEL") {
      config = config.with_model(model);
    }
    if let Some(endpoint) = var("LLM_ENDPOINT") {
      url::Url::parse(&endpoint).map_err(|e| invalid("LLM_ENDPOINT", e))?;
      config = config.with_endpoint(endpoint);
    }
    Ok(Some(config))
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  const VARS: [&str; 14] = [
    "DATABASE_URL",
    "LLM_PROVIDER",
    "LLM_API_KEY",
    "LLM_MODEL",
    "LLM_ENDPOINT",
    "LLM_MAX_TOKENS",
    "LLM_CONTINUATION_MAX_TOKENS",
    "LLM_TIMEOUT_SECS",
    "LLM_SINGLE_PASS",
    "DISABLE_LLM",
    "CACHE_TTL_SECS",
    "INSIGHT_STAGE_TIMEOUT_SECS",
    "STORAGE_TIMEOUT_SECS",
    "BURNOUT_MIN_SAMPLES",
  ];

  /// Run with only the given variables set among the ones config reads
  fn with_env<R>(set: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
    let vars: Vec<(&str, Option<&str>)> = VARS
      .iter()
      .map(|name| {
        let value = set.iter().find(|(k, _)| k == name).map(|(_, v)| *v);
        (*name, value)
      })
      .collect();
    temp_env::with_vars(vars, f)
  }

  #[test]
  #[serial]
  fn test_defaults() {
    let config = with_env(&[], AppConfig::from_env).unwrap();

    assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
    assert!(config.llm.is_none());
    assert_eq!(config.insight_limits, InsightLimits::default());
    assert_eq!(config.pipeline.cache_ttl, Duration::from_secs(900));
    assert_eq!(config.pipeline.insight_timeout, Duration::from_secs(120));
    assert_eq!(config.pipeline.storage_timeout, Duration::from_secs(10));
    assert_eq!(config.pipeline.scoring.burnout.min_samples, 5);
  }

  #[test]
  #[serial]
  fn test_provider_defaults_with_key() {
    let config = with_env(&[("LLM_API_KEY", "sk-test")], AppConfig::from_env).unwrap();

    let llm = config.llm.unwrap();
    assert_eq!(llm.provider, Provider::DeepSeek);
    assert_eq!(llm.endpoint, Provider::DeepSeek.default_endpoint());
    assert_eq!(llm.model, "deepseek-chat");
    assert_eq!(llm.timeout, Duration::from_secs(60));
  }

  #[test]
  #[serial]
  fn test_overrides() {
    let config = with_env(
      &[
        ("DATABASE_URL", "sqlite::memory:"),
        ("LLM_PROVIDER", "HuggingFace"),
        ("LLM_API_KEY", "hf-test"),
        ("LLM_MODEL", "some/model"),
        ("LLM_ENDPOINT", "http://localhost:9000/v1/chat/completions"),
        ("LLM_MAX_TOKENS", "1500"),
        ("LLM_CONTINUATION_MAX_TOKENS", "600"),
        ("LLM_SINGLE_PASS", "yes"),
        ("CACHE_TTL_SECS", "30"),
        ("BURNOUT_MIN_SAMPLES", "7"),
      ],
      AppConfig::from_env,
    )
    .unwrap();

    assert_eq!(config.database_url, "sqlite::memory:");
    let llm = config.llm.unwrap();
    assert_eq!(llm.provider, Provider::HuggingFace);
    assert_eq!(llm.model, "some/model");
    assert_eq!(llm.endpoint, "http://localhost:9000/v1/chat/completions");
    assert_eq!(config.insight_limits.first_max_tokens, 1500);
    assert_eq!(config.insight_limits.repair_max_tokens, 1500);
    assert_eq!(config.insight_limits.continuation_max_tokens, 600);
    assert!(config.insight_limits.single_pass);
    assert_eq!(config.pipeline.cache_ttl, Duration::from_secs(30));
    assert_eq!(config.pipeline.scoring.burnout.min_samples, 7);
  }

  #[test]
  #[serial]
  fn test_disable_llm_wins_over_key() {
    let config = with_env(
      &[("LLM_API_KEY", "sk-test"), ("DISABLE_LLM", "true")],
      AppConfig::from_env,
    )
    .unwrap();
    assert!(config.llm.is_none());
  }

  #[test]
  #[serial]
  fn test_invalid_values() {
    let err = with_env(&[("CACHE_TTL_SECS", "soon")], AppConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "CACHE_TTL_SECS"));

    let err = with_env(&[("LLM_PROVIDER", "openai")], AppConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "LLM_PROVIDER"));

    let err = with_env(
      &[("LLM_API_KEY", "k"), ("LLM_ENDPOINT", "not a url")],
      AppConfig::from_env,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "LLM_ENDPOINT"));

    let err = with_env(&[("LLM_SINGLE_PASS", "maybe")], AppConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "LLM_SINGLE_PASS"));

    let err = with_env(&[("BURNOUT_MIN_SAMPLES", "0")], AppConfig::from_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "BURNOUT_MIN_SAMPLES"));
  }

  #[test]
  #[serial]
  fn test_blank_database_url_is_missing() {
    let err = with_env(&[("DATABASE_URL", "  ")], AppConfig::from_env).unwrap_err();
    assert_eq!(err, ConfigError::Missing("DATABASE_URL".to_string()));
  }
}
