//! Engine configuration.
//!
//! Loaded from a TOML file named by `--config` or `MODBUILD_CONFIG`. Every
//! section and field has a default, so an empty file (or no file at all) is
//! a valid configuration. A few fields can be overridden through
//! `MODBUILD_*` environment variables.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::CONFIG_ENV;
use crate::state::RebuildStrategy;
use crate::util::retry::{Backoff, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value '{value}' for {var}")]
  InvalidEnv { var: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub scheduler: SchedulerConfig,
  pub builder: BuilderConfig,
  pub resolver: ResolverConfig,
  pub reuse: ReuseConfig,
  pub poller: PollerConfig,
  pub gating: GatingConfig,
  pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Maximum component builds in flight across every module.
  pub num_concurrent_builds: usize,
  /// Event workers in the service runtime.
  pub workers: usize,
  pub polling_interval_secs: u64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      num_concurrent_builds: 20,
      workers: 4,
      polling_interval_secs: 600,
    }
  }
}

impl SchedulerConfig {
  pub fn polling_interval(&self) -> Duration {
    Duration::from_secs(self.polling_interval_secs)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
  /// Name of the backend in the builder registry.
  pub backend: String,
  pub retry_timeout_secs: u64,
  pub retry_interval_secs: u64,
  /// Double the retry interval after each attempt, up to this many seconds.
  pub retry_max_interval_secs: Option<u64>,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      backend: "mock".to_string(),
      retry_timeout_secs: 60,
      retry_interval_secs: 5,
      retry_max_interval_secs: None,
    }
  }
}

impl BuilderConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    let backoff = match self.retry_max_interval_secs {
      Some(max) => Backoff::Exponential {
        max: Duration::from_secs(max),
      },
      None => Backoff::Fixed,
    };
    RetryPolicy {
      timeout: Duration::from_secs(self.retry_timeout_secs),
      interval: Duration::from_secs(self.retry_interval_secs),
      backoff,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
  /// `db` or `catalog`.
  pub backend: String,
  pub catalog_path: Option<PathBuf>,
}

impl Default for ResolverConfig {
  fn default() -> Self {
    Self {
      backend: "db".to_string(),
      catalog_path: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReuseConfig {
  pub default_strategy: RebuildStrategy,
  /// Allow reuse from builds made against a compatible base module stream.
  pub compatible_base_modules: bool,
  /// Modules treated as base modules when computing contexts.
  pub base_module_names: Vec<String>,
}

impl Default for ReuseConfig {
  fn default() -> Self {
    Self {
      default_strategy: RebuildStrategy::default(),
      compatible_base_modules: false,
      base_module_names: vec!["platform".to_string()],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
  /// Re-check a regeneration request after this long.
  pub regen_timeout_secs: u64,
  /// Re-drive modules sitting in `init` or `wait` for this long.
  pub stuck_timeout_secs: u64,
  /// Retire backend targets of finished modules after this long.
  pub target_retire_age_secs: u64,
  /// Move failed modules to `garbage` after this long; never when unset.
  pub garbage_age_secs: Option<u64>,
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      regen_timeout_secs: 1800,
      stuck_timeout_secs: 600,
      target_retire_age_secs: 24 * 60 * 60,
      garbage_age_secs: Some(30 * 24 * 60 * 60),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingConfig {
  /// Hold modules in `done` until a satisfied gating decision arrives.
  pub enabled: bool,
  pub decision_context: String,
}

impl Default for GatingConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      decision_context: "module_build_gate".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Persist build records to this JSON file; in memory only when unset.
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load from `path`, or from `$MODBUILD_CONFIG`, or fall back to defaults;
  /// then apply environment overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let mut config = match path.map(Path::to_path_buf).or(from_env) {
      Some(path) => Self::from_file(&path)?,
      None => Self::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
    if let Some(value) = env_var("MODBUILD_NUM_CONCURRENT_BUILDS") {
      self.scheduler.num_concurrent_builds = value.parse().map_err(|_| ConfigError::InvalidEnv {
        var: "MODBUILD_NUM_CONCURRENT_BUILDS",
        value,
      })?;
    }
    if let Some(value) = env_var("MODBUILD_BUILDER_BACKEND") {
      self.builder.backend = value;
    }
    if let Some(value) = env_var("MODBUILD_RESOLVER_BACKEND") {
      self.resolver.backend = value;
    }
    if let Some(value) = env_var("MODBUILD_STORE_PATH") {
      self.store.path = Some(PathBuf::from(value));
    }
    Ok(())
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.is_empty())
}
