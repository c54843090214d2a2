//! TOML-based configuration for marksync.
//!
//! Every section carries serde defaults, so a file naming only
//! `[sync] owner` and a `[source] path` is a complete configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::{DeleteResolution, ResolutionStrategy};
use crate::errors::ConfigError;
use crate::ledger::{OwnerId, RetentionPolicy};
use crate::plan::Plan;
use crate::source::SourceType;
use crate::sync_engine::{EngineOptions, DEFAULT_MAX_WRITE_ATTEMPTS};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Per-device sync behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Account whose bookmarks and version history this device syncs.
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default)]
    pub device_name: Option<String>,

    /// Strategy for content and move conflicts.
    #[serde(default)]
    pub default_strategy: ResolutionStrategy,

    /// What to do when one side deleted a node the other side modified.
    #[serde(default)]
    pub delete_resolution: DeleteResolution,

    /// Pipeline runs before giving up on a remote that keeps changing.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

fn default_max_write_attempts() -> u32 {
    DEFAULT_MAX_WRITE_ATTEMPTS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            device_id: None,
            device_name: None,
            default_strategy: ResolutionStrategy::default(),
            delete_resolution: DeleteResolution::default(),
            max_write_attempts: default_max_write_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Version history storage and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,

    #[serde(default)]
    pub plan: Plan,

    /// Overrides the plan's retained-version limit.
    #[serde(default)]
    pub max_versions: Option<usize>,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marksync")
        .join("ledger.db")
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            plan: Plan::default(),
            max_versions: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Where the shared snapshot lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceType,

    /// Snapshot file for `local_file` sources.
    #[serde(default)]
    pub path: PathBuf,

    /// Display name recorded in version metadata.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_source_kind() -> SourceType {
    SourceType::LocalFile
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            path: PathBuf::new(),
            name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file. Does not validate.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Reject unusable values and clamp a zero `max_versions` override.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.sync.owner.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.owner".into(),
                detail: "owner must not be empty".into(),
            });
        }
        if self.sync.max_write_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.max_write_attempts".into(),
                detail: "at least one write attempt is required".into(),
            });
        }
        if self.source.kind == SourceType::LocalFile && self.source.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source.path".into(),
                detail: "a local_file source needs a path".into(),
            });
        }
        if self.ledger.max_versions == Some(0) {
            warn!("ledger.max_versions = 0 would prune every version; keeping the latest only");
            self.ledger.max_versions = Some(1);
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. for `marksync init`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn owner(&self) -> OwnerId {
        OwnerId::new(self.sync.owner.trim())
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            plan: self.ledger.plan,
            max_versions_override: self.ledger.max_versions,
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            device_id: self.sync.device_id.clone(),
            device_name: self.sync.device_name.clone(),
            max_write_attempts: self.sync.max_write_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[sync]
owner = "alice"
device_id = "laptop-01"
device_name = "Work laptop"
default_strategy = "merged"
delete_resolution = "delete"
max_write_attempts = 5

[ledger]
database = "/tmp/marksync/ledger.db"
plan = "pro"
max_versions = 10

[source]
kind = "local_file"
path = "/mnt/shared/bookmarks.json"
name = "shared drive"

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.sync.owner, "alice");
        assert_eq!(config.sync.default_strategy, ResolutionStrategy::Merged);
        assert_eq!(config.sync.delete_resolution, DeleteResolution::Delete);
        assert_eq!(config.ledger.plan, Plan::Pro);
        assert_eq!(config.retention().limit(), 10);
        assert_eq!(config.engine_options().max_write_attempts, 5);
        assert_eq!(config.source.name.as_deref(), Some("shared drive"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marksync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/marksync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[sync]
owner = "bob"
[source]
path = "bookmarks.json"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.sync.default_strategy, ResolutionStrategy::Newest);
        assert_eq!(config.sync.delete_resolution, DeleteResolution::Keep);
        assert_eq!(config.sync.max_write_attempts, 3);
        assert_eq!(config.ledger.plan, Plan::Free);
        assert_eq!(config.retention().limit(), 5);
        assert_eq!(config.source.kind, SourceType::LocalFile);
        assert_eq!(config.logging.level, "info");
        assert!(config.ledger.database.ends_with("marksync/ledger.db"));
    }

    #[test]
    fn test_validate_rejects_empty_owner() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.sync.owner = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync.owner"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.sync.max_write_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync.max_write_attempts"
        ));
    }

    #[test]
    fn test_zero_max_versions_is_clamped() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.ledger.max_versions = Some(0);
        config.validate().unwrap();
        assert_eq!(config.retention().limit(), 1);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        let rendered = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.sync.device_id.as_deref(), Some("laptop-01"));
        assert_eq!(parsed.ledger.max_versions, Some(10));
    }
}
