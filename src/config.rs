use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::coalesce::DEFAULT_RESPONSE_TTL_MS;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub stores: StoresConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every endpoint path is joined against.
  pub url: String,
  /// Per-request timeout applied by the HTTP transport.
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// How long the shared coalescer may serve a repeated request from its
  /// response cache.
  #[serde(default = "default_response_ttl_ms")]
  pub response_ttl_ms: u64,
}

fn default_timeout_ms() -> u64 {
  10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoresConfig {
  #[serde(default = "StoreTuning::notifications")]
  pub notifications: StoreTuning,
  #[serde(default = "StoreTuning::consumer_summary")]
  pub consumer_summary: StoreTuning,
}

impl Default for StoresConfig {
  fn default() -> Self {
    Self {
      notifications: StoreTuning::notifications(),
      consumer_summary: StoreTuning::consumer_summary(),
    }
  }
}

fn default_response_ttl_ms() -> u64 {
  DEFAULT_RESPONSE_TTL_MS
}

/// Freshness knobs for one store.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StoreTuning {
  /// Entries older than this are refetched when their tenant is activated.
  pub stale_after_ms: u64,
  /// Minimum spacing between fetch attempts for one tenant. Zero disables
  /// throttling. Forced refreshes bypass this but still count as attempts.
  #[serde(default)]
  pub min_refresh_interval_ms: u64,
  /// Periodic refresh of the active tenant, if set.
  #[serde(default)]
  pub background_refresh_interval_ms: Option<u64>,
}

impl StoreTuning {
  /// Tuning for the notification feed: stale after two minutes, attempts
  /// at most every fifteen seconds, refreshed in the background.
  pub fn notifications() -> Self {
    Self {
      stale_after_ms: 120_000,
      min_refresh_interval_ms: 15_000,
      background_refresh_interval_ms: Some(120_000),
    }
  }

  /// Tuning for the consumer summary: changes rarely, no background churn.
  pub fn consumer_summary() -> Self {
    Self {
      stale_after_ms: 300_000,
      min_refresh_interval_ms: 0,
      background_refresh_interval_ms: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ubill.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ubill/config.yaml
  /// 4. ~/.config/ubill/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/ubill/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("ubill.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ubill").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_fills_store_defaults() {
    let yaml = "api:\n  url: https://api.ubill.example\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.api.url, "https://api.ubill.example");
    assert_eq!(config.api.timeout_ms, 10_000);
    assert_eq!(config.api.response_ttl_ms, DEFAULT_RESPONSE_TTL_MS);
    assert_eq!(config.stores.notifications.stale_after_ms, 120_000);
    assert_eq!(config.stores.notifications.min_refresh_interval_ms, 15_000);
    assert_eq!(
      config.stores.notifications.background_refresh_interval_ms,
      Some(120_000)
    );
    assert_eq!(config.stores.consumer_summary.stale_after_ms, 300_000);
    assert_eq!(config.stores.consumer_summary.min_refresh_interval_ms, 0);
  }

  #[test]
  fn test_store_overrides_parse() {
    let yaml = "\
api:
  url: https://api.ubill.example
  timeout_ms: 5000
stores:
  notifications:
    stale_after_ms: 60000
    min_refresh_interval_ms: 5000
    background_refresh_interval_ms: 30000
";
    let config: Config = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(config.api.timeout_ms, 5_000);
    assert_eq!(config.stores.notifications.stale_after_ms, 60_000);
    assert_eq!(config.stores.notifications.min_refresh_interval_ms, 5_000);
    assert_eq!(
      config.stores.notifications.background_refresh_interval_ms,
      Some(30_000)
    );
    // untouched block keeps its preset
    assert_eq!(config.stores.consumer_summary.stale_after_ms, 300_000);
  }
}
