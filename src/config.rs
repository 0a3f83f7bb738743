//! Layered configuration.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults (`AteConfig::default()`)
//! 2. A TOML file (`config/ate.toml` unless a path is given)
//! 3. Environment variables prefixed with `ATE_`, nested with `__`
//!
//! ```text
//! ATE_RETRY__MAX_ATTEMPTS=5              -> retry.max_attempts
//! ATE_RETRY__BASE_DELAY=50ms             -> retry.base_delay
//! ATE_DISCOVERY__WORKER_POOL_SIZE=8      -> discovery.worker_pool_size
//! ATE_SIMULATION__DEFAULT_RNG_SEED=42    -> simulation.default_rng_seed
//! ATE_LOGGING__LEVEL=debug               -> logging.level
//! ```
//!
//! Durations are humantime strings (`"10ms"`, `"2s"`). The loaded value is
//! validated before it is returned.

use crate::error::ConfigError;
use ate_core::RetryPolicy;
use ate_hardware::{CapabilityProfile, DiscoveryOptions, ProfileDefinition};
use ate_sim::SimulationConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Config file read when no explicit path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/ate.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ATE_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored.
    Pretty,
    /// Single-line.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// The `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn or error. `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Emit span open/close events.
    pub span_events: bool,
    /// Include source file and line.
    pub file_and_line: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            span_events: false,
            file_and_line: false,
        }
    }
}

/// The `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum probes in flight.
    pub worker_pool_size: usize,
    /// Identity query.
    pub probe_command: String,
    /// Wire addresses to scan in addition to every simulated endpoint.
    pub addresses: Vec<String>,
    /// Also scan every configured simulated endpoint.
    pub include_simulated: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let options = DiscoveryOptions::default();
        Self {
            worker_pool_size: options.worker_pool_size,
            probe_command: options.probe_command,
            addresses: Vec::new(),
            include_simulated: true,
        }
    }
}

impl DiscoveryConfig {
    /// Scan options.
    pub fn options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            worker_pool_size: self.worker_pool_size,
            probe_command: self.probe_command.clone(),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AteConfig {
    /// `[logging]`
    pub logging: LoggingConfig,
    /// `[retry]`, the default policy for every session.
    pub retry: RetryPolicy,
    /// `[discovery]`
    pub discovery: DiscoveryConfig,
    /// `[simulation]`
    pub simulation: SimulationConfig,
    /// `[[profiles]]`, checked before the built-in profiles.
    pub profiles: Vec<ProfileDefinition>,
    /// Seed for retry jitter. Drawn from the OS when absent.
    pub jitter_seed: Option<u64>,
}

impl AteConfig {
    /// Load from `path` (or [`DEFAULT_CONFIG_PATH`]) plus the environment.
    ///
    /// An explicit path must exist; a missing default file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub(crate) fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let file: PathBuf = match path {
            Some(p) if !p.exists() => {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };

        let config: AteConfig = Self::figment(&file, prefix).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The merged provider stack, before extraction.
    pub fn figment(file: &Path, env_prefix: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AteConfig::default()));
        if file.exists() {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Parse a TOML string on top of the defaults. No environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: AteConfig = Figment::from(Serialized::defaults(AteConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every constraint across sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level '{}' must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        self.retry
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("retry: {}", e.0)))?;

        self.discovery
            .options()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("discovery: {}", e)))?;
        if let Some(blank) = self.discovery.addresses.iter().position(|a| a.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "discovery.addresses[{}] is empty",
                blank
            )));
        }

        self.simulation.validate()?;

        let mut ids = HashSet::new();
        for def in &self.profiles {
            CapabilityProfile::from_definition(def)?;
            if !ids.insert(def.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate profile id '{}'",
                    def.id
                )));
            }
        }

        Ok(())
    }
}
