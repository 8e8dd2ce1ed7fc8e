//! Registry Configuration
//!
//! TigerStyle: defaults come from constants; every override is explicit.
//!
//! Precedence, lowest first: defaults, JSON file, environment, CLI flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    COMPARTMENTS_COUNT_MAX, ENGINES_COUNT_MAX, ENV_CONCURRENCY, ENV_HANDLE_POLICY, ENV_SEED,
};
use crate::slot::HandlePolicy;

/// How concurrent callers share one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Lookup and mutation are separate steps; callers interleave between them.
    #[default]
    Racy,
    /// One operation in flight at a time.
    Serialized,
}

impl ConcurrencyMode {
    /// Get string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Racy => "racy",
            Self::Serialized => "serialized",
        }
    }
}

impl std::str::FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "racy" => Ok(Self::Racy),
            "serialized" => Ok(Self::Serialized),
            other => Err(format!("unknown concurrency mode: {other}")),
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Engine slot count
    pub engine_slots: usize,
    /// Compartment slot count
    pub compartment_slots: usize,
    /// How compartment engine handles are resolved
    pub handle_policy: HandlePolicy,
    /// How concurrent callers are admitted
    pub concurrency: ConcurrencyMode,
    /// Identifier seed; chosen from entropy and logged when absent
    pub seed: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            engine_slots: ENGINES_COUNT_MAX,
            compartment_slots: COMPARTMENTS_COUNT_MAX,
            handle_policy: HandlePolicy::default(),
            concurrency: ConcurrencyMode::default(),
            seed: None,
        }
    }
}

impl RegistryConfig {
    /// Default configuration with a fixed seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Set the handle policy.
    #[must_use]
    pub fn handle_policy(mut self, policy: HandlePolicy) -> Self {
        self.handle_policy = policy;
        self
    }

    /// Set the concurrency mode.
    #[must_use]
    pub fn concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    /// Set both slot counts.
    #[must_use]
    pub fn capacities(mut self, engines: usize, compartments: usize) -> Self {
        self.engine_slots = engines;
        self.compartment_slots = compartments;
        self
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STEAM_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `STEAM_*` overrides from `lookup`.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SEED) {
            let seed = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_SEED,
                value: raw.clone(),
            })?;
            self.seed = Some(seed);
        }
        if let Some(raw) = lookup(ENV_HANDLE_POLICY) {
            self.handle_policy = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_HANDLE_POLICY,
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            self.concurrency = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_CONCURRENCY,
                value: raw.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check slot counts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_slots == 0 || self.engine_slots > ENGINES_COUNT_MAX {
            return Err(ConfigError::InvalidCapacity {
                field: "engine_slots",
                value: self.engine_slots,
                max: ENGINES_COUNT_MAX,
            });
        }
        if self.compartment_slots == 0 || self.compartment_slots > COMPARTMENTS_COUNT_MAX {
            return Err(ConfigError::InvalidCapacity {
                field: "compartment_slots",
                value: self.compartment_slots,
                max: COMPARTMENTS_COUNT_MAX,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for this schema
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// Environment override could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },

    /// Slot count outside the supported range
    #[error("{field} must be in 1..={max}, got {value}")]
    InvalidCapacity {
        /// Config field
        field: &'static str,
        /// Value given
        value: usize,
        /// Largest accepted value
        max: usize,
    },
}
