//! Configuration for CaskDB
//!
//! Centralized configuration with sensible defaults. The effective config of a
//! store is persisted as `config.json` the first time the store is opened with
//! write access; later opens start from that file and apply only the options
//! the caller explicitly set on a [`ConfigBuilder`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};
use crate::paths;

/// Default maximum key size in bytes
pub const DEFAULT_MAX_KEY_SIZE: u32 = 64;

/// Default maximum value size in bytes
pub const DEFAULT_MAX_VALUE_SIZE: u64 = 1 << 16;

/// Default maximum segment size before rotation (1 MiB)
pub const DEFAULT_MAX_DATAFILE_SIZE: u64 = 1 << 20;

/// Default permission bits for created directories
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Default permission bits for created files
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Store configuration, immutable once the store is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Size Limits (0 = unbounded for keys and values)
    // -------------------------------------------------------------------------
    /// Maximum key length in bytes
    pub max_key_size: u32,

    /// Maximum value length in bytes
    pub max_value_size: u64,

    /// Rotate the active segment when a write would push it past this size
    pub max_datafile_size: u64,

    // -------------------------------------------------------------------------
    // Durability / Open Behaviour
    // -------------------------------------------------------------------------
    /// fsync the active segment after every committed entry
    pub sync_writes: bool,

    /// Fall back to a read-only open when another process holds the lock
    pub open_readonly: bool,

    /// Repair structurally corrupt segments when opening
    pub auto_recovery: bool,

    // -------------------------------------------------------------------------
    // Filesystem Permissions (unix)
    // -------------------------------------------------------------------------
    /// Permission bits for directories created by the store
    pub dir_mode: u32,

    /// Permission bits for files created by the store
    pub file_mode: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            max_datafile_size: DEFAULT_MAX_DATAFILE_SIZE,
            sync_writes: false,
            open_readonly: false,
            auto_recovery: true,
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the invariants every usable config must hold
    pub fn validate(&self) -> Result<()> {
        if self.max_datafile_size == 0 {
            return Err(CaskError::Config(
                "max_datafile_size must be greater than zero".to_string(),
            ));
        }
        if self.dir_mode > 0o7777 {
            return Err(CaskError::Config(format!(
                "dir_mode {:o} is not a permission mask",
                self.dir_mode
            )));
        }
        if self.file_mode > 0o7777 {
            return Err(CaskError::Config(format!(
                "file_mode {:o} is not a permission mask",
                self.file_mode
            )));
        }
        Ok(())
    }

    /// Load a persisted `config.json`
    ///
    /// Any read or parse failure is reported as `BadConfig`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| CaskError::BadConfig(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_slice(&data)
            .map_err(|e| CaskError::BadConfig(format!("{}: {}", path.display(), e)))?;
        config
            .validate()
            .map_err(|e| CaskError::BadConfig(e.to_string()))?;
        Ok(config)
    }

    /// Persist this config as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| CaskError::Serialization(e.to_string()))?;
        paths::write_file_atomic(path, &data, self.file_mode)
    }
}

/// Builder for Config
///
/// Every setter records an override. `build()` applies the overrides to the
/// defaults; `apply()` applies them on top of a config loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    max_key_size: Option<u32>,
    max_value_size: Option<u64>,
    max_datafile_size: Option<u64>,
    sync_writes: Option<bool>,
    open_readonly: Option<bool>,
    auto_recovery: Option<bool>,
    dir_mode: Option<u32>,
    file_mode: Option<u32>,
}

impl ConfigBuilder {
    /// Set the maximum key size (0 = unbounded)
    pub fn max_key_size(mut self, size: u32) -> Self {
        self.max_key_size = Some(size);
        self
    }

    /// Set the maximum value size (0 = unbounded)
    pub fn max_value_size(mut self, size: u64) -> Self {
        self.max_value_size = Some(size);
        self
    }

    /// Set the maximum segment size before rotation
    pub fn max_datafile_size(mut self, size: u64) -> Self {
        self.max_datafile_size = Some(size);
        self
    }

    /// fsync after every committed entry
    pub fn sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = Some(enabled);
        self
    }

    /// Open read-only when the store is locked by another process
    pub fn open_readonly(mut self, enabled: bool) -> Self {
        self.open_readonly = Some(enabled);
        self
    }

    /// Run the structural repair pass at open
    pub fn auto_recovery(mut self, enabled: bool) -> Self {
        self.auto_recovery = Some(enabled);
        self
    }

    /// Set the permission bits for created directories
    pub fn dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = Some(mode);
        self
    }

    /// Set the permission bits for created files
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    /// Apply every recorded override on top of `base` and validate the result
    pub fn apply(&self, mut base: Config) -> Result<Config> {
        if let Some(v) = self.max_key_size {
            base.max_key_size = v;
        }
        if let Some(v) = self.max_value_size {
            base.max_value_size = v;
        }
        if let Some(v) = self.max_datafile_size {
            base.max_datafile_size = v;
        }
        if let Some(v) = self.sync_writes {
            base.sync_writes = v;
        }
        if let Some(v) = self.open_readonly {
            base.open_readonly = v;
        }
        if let Some(v) = self.auto_recovery {
            base.auto_recovery = v;
        }
        if let Some(v) = self.dir_mode {
            base.dir_mode = v;
        }
        if let Some(v) = self.file_mode {
            base.file_mode = v;
        }
        base.validate()?;
        Ok(base)
    }

    /// Build a validated config from the defaults plus overrides
    pub fn build(self) -> Result<Config> {
        self.apply(Config::default())
    }
}

impl From<Config> for ConfigBuilder {
    /// Every field of `config` becomes an override.
    fn from(config: Config) -> Self {
        Self {
            max_key_size: Some(config.max_key_size),
            max_value_size: Some(config.max_value_size),
            max_datafile_size: Some(config.max_datafile_size),
            sync_writes: Some(config.sync_writes),
            open_readonly: Some(config.open_readonly),
            auto_recovery: Some(config.auto_recovery),
            dir_mode: Some(config.dir_mode),
            file_mode: Some(config.file_mode),
        }
    }
}
