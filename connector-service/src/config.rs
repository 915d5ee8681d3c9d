//! Configuration loading for the connector.
//!
//! Configuration is loaded from a TOML file (default: `connector.toml`),
//! then overridden by environment variables, then validated. Missing
//! sections and fields fall back to defaults, so a file only needs the
//! credentials and Allisa types.

use connector_core::{
    parse_time_zone, FieldMapping, MapperConfig, RetryPolicy, DEFAULT_FIELD_MAPPING,
    DEFAULT_TAG_UPSERT_PATH,
};
use connector_types::{InstanceId, InvalidInstanceId};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "connector.toml";

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Connector instance settings.
    #[serde(default)]
    pub connector: ConnectorConfig,
    /// WiseTime (source) settings.
    #[serde(default)]
    pub wisetime: WiseTimeConfig,
    /// Allisa (target) settings.
    #[serde(default)]
    pub allisa: AllisaConfig,
    /// Mapping settings.
    #[serde(default)]
    pub mapping: MappingConfig,
    /// Sync cycle settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Case tag sync settings.
    #[serde(default)]
    pub tag_sync: TagSyncConfig,
    /// State store settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Health and metrics endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Connector instance settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Identity of this deployment; keys all persisted state.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

/// WiseTime settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WiseTimeConfig {
    /// API base URL.
    #[serde(default = "default_wisetime_base_url")]
    pub base_url: String,
    /// API token (required).
    #[serde(default)]
    pub api_token: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Allisa settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AllisaConfig {
    /// Allisa base URL (required).
    #[serde(default)]
    pub base_url: String,
    /// API key (required).
    #[serde(default)]
    pub api_key: String,
    /// Case list type (required).
    ///
    /// Both the case paging of tag sync and the case lookup for a tag search
    /// within this type. Lookups never search `post_type`, so this must be
    /// the type that holds the cases time is posted against.
    #[serde(default)]
    pub case_type: String,
    /// Post type for time entries (required).
    #[serde(default)]
    pub post_type: String,
    /// Form field mapping, `key:name,...`.
    #[serde(default = "default_post_field_mapping")]
    pub post_field_mapping: String,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Mapping settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    /// Path of connector tags (default: `/Allisa/`).
    #[serde(default = "default_tag_upsert_path")]
    pub tag_upsert_path: String,
    /// Zone for Allisa start times: a name such as `Europe/Berlin` or an
    /// offset such as `+08:00` (default: UTC).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Append row descriptions to the narrative (default: false).
    #[serde(default)]
    pub add_summary_to_narrative: bool,
}

/// Sync cycle settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between cycles (default: 60).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Postings per batch (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Delivery attempts per record per cycle (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds (default: 500).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound of retry delays in milliseconds (default: 30000).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Records delivered concurrently (default: 4).
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,
    /// Upper bound of a cycle in seconds (default: 300).
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,
    /// Cycles a record may end retryable before it is dead-lettered (default: 5).
    #[serde(default = "default_escalate_after_cycles")]
    pub escalate_after_cycles: u32,
}

/// Case tag sync settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TagSyncConfig {
    /// Enable the tag sync job (default: true).
    #[serde(default = "default_tag_sync_enabled")]
    pub enabled: bool,
    /// Seconds between new-case syncs (default: 300).
    #[serde(default = "default_tag_sync_interval_secs")]
    pub interval_secs: u64,
    /// Seconds between refreshes of already synced cases (default: 3600, 0 disables).
    #[serde(default = "default_tag_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Cases per page and per upsert (default: 500).
    #[serde(default = "default_tag_upsert_batch_size")]
    pub batch_size: u64,
}

/// State store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite database.
    #[default]
    Sqlite,
    /// JSON file.
    File,
}

/// State store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend (default: sqlite).
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database or state file path (default: `connector.db`).
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// Health and metrics endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve `/health` and `/metrics` (default: true).
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    /// Bind address (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

// Default value functions
fn default_instance_id() -> String {
    "default".to_string()
}

fn default_wisetime_base_url() -> String {
    "https://wisetime.com/connect/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_post_field_mapping() -> String {
    DEFAULT_FIELD_MAPPING.to_string()
}

fn default_tag_upsert_path() -> String {
    DEFAULT_TAG_UPSERT_PATH.to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_dispatch_concurrency() -> usize {
    4
}

fn default_cycle_deadline_secs() -> u64 {
    300 // 5 minutes
}

fn default_escalate_after_cycles() -> u32 {
    5
}

fn default_tag_sync_interval_secs() -> u64 {
    300
}

fn default_tag_refresh_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_tag_upsert_batch_size() -> u64 {
    500
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("connector.db")
}

fn default_tag_sync_enabled() -> bool {
    true
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
        }
    }
}

impl Default for WiseTimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_wisetime_base_url(),
            api_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AllisaConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            case_type: String::new(),
            post_type: String::new(),
            post_field_mapping: default_post_field_mapping(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            tag_upsert_path: default_tag_upsert_path(),
            timezone: default_timezone(),
            add_summary_to_narrative: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            dispatch_concurrency: default_dispatch_concurrency(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
            escalate_after_cycles: default_escalate_after_cycles(),
        }
    }
}

impl Default for TagSyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_tag_sync_enabled(),
            interval_secs: default_tag_sync_interval_secs(),
            refresh_interval_secs: default_tag_refresh_interval_secs(),
            batch_size: default_tag_upsert_batch_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_storage_path(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_http_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the file (if present), apply process environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override settings from environment variables.
    ///
    /// `lookup` returns the value of a variable, if set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key) {
                *target = value;
            }
        };
        set("CONNECTOR_INSTANCE_ID", &mut self.connector.instance_id);
        set("WISETIME_BASE_URL", &mut self.wisetime.base_url);
        set("WISETIME_API_TOKEN", &mut self.wisetime.api_token);
        set("ALLISA_BASE_URL", &mut self.allisa.base_url);
        set("ALLISA_API_KEY", &mut self.allisa.api_key);
        set("ALLISA_CASE_TYPE", &mut self.allisa.case_type);
        set("ALLISA_POST_TYPE", &mut self.allisa.post_type);
        set(
            "ALLISA_POST_FIELD_MAPPING",
            &mut self.allisa.post_field_mapping,
        );
        set("TAG_UPSERT_PATH", &mut self.mapping.tag_upsert_path);
        set("TIMEZONE", &mut self.mapping.timezone);

        if let Some(value) = lookup("ADD_SUMMARY_TO_NARRATIVE") {
            self.mapping.add_summary_to_narrative =
                parse_bool(&value).ok_or_else(|| ConfigError::Env {
                    key: "ADD_SUMMARY_TO_NARRATIVE".into(),
                    reason: format!("expected true or false, got {value:?}"),
                })?;
        }
        if let Some(value) = lookup("TAG_UPSERT_BATCH_SIZE") {
            self.tag_sync.batch_size = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "TAG_UPSERT_BATCH_SIZE".into(),
                reason: format!("expected a positive integer, got {value:?}"),
            })?;
        }
        Ok(())
    }

    /// Fail fast on missing or inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.instance_id()?;

        let required = [
            ("wisetime.base_url", &self.wisetime.base_url),
            ("wisetime.api_token", &self.wisetime.api_token),
            ("allisa.base_url", &self.allisa.base_url),
            ("allisa.api_key", &self.allisa.api_key),
            ("allisa.case_type", &self.allisa.case_type),
            ("allisa.post_type", &self.allisa.post_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "is required"));
            }
        }

        self.field_mapping()?;
        self.mapper_config()?;

        let positive = [
            ("sync.poll_interval_secs", self.sync.poll_interval_secs),
            ("sync.batch_size", self.sync.batch_size as u64),
            ("sync.max_attempts", u64::from(self.sync.max_attempts)),
            (
                "sync.dispatch_concurrency",
                self.sync.dispatch_concurrency as u64,
            ),
            ("sync.cycle_deadline_secs", self.sync.cycle_deadline_secs),
            (
                "sync.escalate_after_cycles",
                u64::from(self.sync.escalate_after_cycles),
            ),
            ("tag_sync.batch_size", self.tag_sync.batch_size),
            ("tag_sync.interval_secs", self.tag_sync.interval_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// The validated instance id.
    pub fn instance_id(&self) -> Result<InstanceId, ConfigError> {
        InstanceId::new(self.connector.instance_id.clone()).map_err(|e: InvalidInstanceId| {
            ConfigError::invalid("connector.instance_id", e.to_string())
        })
    }

    /// The parsed post field mapping.
    pub fn field_mapping(&self) -> Result<FieldMapping, ConfigError> {
        self.allisa
            .post_field_mapping
            .parse()
            .map_err(|e: connector_core::MappingConfigError| {
                ConfigError::invalid("allisa.post_field_mapping", e.to_string())
            })
    }

    /// Mapper settings.
    pub fn mapper_config(&self) -> Result<MapperConfig, ConfigError> {
        let time_zone = parse_time_zone(&self.mapping.timezone)
            .map_err(|e| ConfigError::invalid("mapping.timezone", e.to_string()))?;
        Ok(MapperConfig {
            tag_upsert_path: self.mapping.tag_upsert_path.clone(),
            time_zone,
            add_summary_to_narrative: self.mapping.add_summary_to_narrative,
        })
    }

    /// Retry policy for dispatch.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_attempts,
            base_delay: Duration::from_millis(self.sync.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.sync.retry_max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    /// Time between cycles.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }

    /// Upper bound of a cycle.
    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.sync.cycle_deadline_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// An environment override could not be parsed.
    #[error("invalid environment variable {key}: {reason}")]
    Env {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A setting is missing or invalid.
    #[error("invalid configuration {field}: {reason}")]
    Invalid {
        /// Dotted setting name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
