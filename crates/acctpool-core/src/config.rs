//! Pool configuration parsing and validation.
//!
//! The TOML surface is deliberately small: the allocation settling delay
//! and the identity of the control slot inside each account. Everything
//! else in this crate is behavior, not policy, and stays out of config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on the configurable settling delay. A delay above this is
/// almost certainly a units mistake (seconds pasted into a milliseconds
/// field), so parsing rejects it outright.
pub const MAX_SETTLE_DELAY_MS: u64 = 300_000;

/// Maximum length of the control slot name imposed by the backing store.
pub const MAX_SLOT_NAME_LEN: usize = 64;

/// Top-level pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PoolConfig {
    /// Allocation behavior.
    #[serde(default)]
    pub allocator: AllocatorConfig,

    /// Location of the control slot inside each account.
    #[serde(default)]
    pub control: ControlSlotConfig,
}

impl PoolConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, carries unknown keys in a
    /// known section, or fails [`PoolConfig::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks the invariants the types alone cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allocator.settle_delay_ms > MAX_SETTLE_DELAY_MS {
            return Err(ConfigError::Validation(format!(
                "allocator.settle_delay_ms is {} ms, maximum is {MAX_SETTLE_DELAY_MS} ms",
                self.allocator.settle_delay_ms
            )));
        }
        if !is_valid_slot_name(&self.control.role_name) {
            return Err(ConfigError::Validation(format!(
                "control.role_name {:?} must be 1..={MAX_SLOT_NAME_LEN} characters from [A-Za-z0-9+=,.@_-]",
                self.control.role_name
            )));
        }
        if !self.control.role_path.starts_with('/') || !self.control.role_path.ends_with('/') {
            return Err(ConfigError::Validation(format!(
                "control.role_path {:?} must start and end with '/'",
                self.control.role_path
            )));
        }
        Ok(())
    }
}

/// Allocation behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AllocatorConfig {
    /// How long a freshly written ownership claim must sit in the store
    /// before it is re-read and trusted, in milliseconds. Covers the
    /// propagation lag of the backing API's read path.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl AllocatorConfig {
    /// The settling delay as a [`Duration`].
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Location of the control slot inside each account.
///
/// Production stores the record in the description of a designated IAM
/// role; these fields name that role. The in-memory store ignores them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ControlSlotConfig {
    /// Name of the designated role.
    #[serde(default = "default_role_name")]
    pub role_name: String,

    /// Path prefix the role lives under. Must start and end with `/`.
    #[serde(default = "default_role_path")]
    pub role_path: String,
}

impl Default for ControlSlotConfig {
    fn default() -> Self {
        Self {
            role_name: default_role_name(),
            role_path: default_role_path(),
        }
    }
}

const fn default_settle_delay_ms() -> u64 {
    10_000
}

fn default_role_name() -> String {
    "acctpool-control".to_string()
}

fn default_role_path() -> String {
    "/".to_string()
}

fn is_valid_slot_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SLOT_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'=' | b',' | b'.' | b'@' | b'_' | b'-'))
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
