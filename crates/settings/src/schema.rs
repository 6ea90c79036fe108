//! Settings schema and loader
//!
//! Every section has defaults, so an empty environment yields a usable
//! configuration.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use common::error::{Error, Result};
use common::types::RetryPolicy;

/// Default settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "di-copy";

/// Environment prefix for settings overrides
pub const ENV_PREFIX: &str = "DI_COPY";

/// Copy orchestration settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CopySettings {
    /// Worker pool size
    pub max_concurrency: usize,
    /// Delay between status polls in milliseconds
    pub poll_interval_ms: u64,
    /// Per-pair deadline in seconds
    pub deadline_secs: u64,
    /// Consecutive transient poll failures tolerated
    pub poll_retries: u32,
}

impl CopySettings {
    /// Delay between status polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-pair deadline
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval_ms: 2_000,
            deadline_secs: 600,
            poll_retries: 3,
        }
    }
}

/// Inventory listing settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    /// Retries for transient listing failures
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,
}

impl InventorySettings {
    /// Retry policy for inventory queries
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Document Intelligence REST api-version
    pub api_version: String,
    /// Key Vault REST api-version
    pub secret_store_api_version: String,
}

impl HttpSettings {
    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whole-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            api_version: "2024-11-30".to_string(),
            secret_store_api_version: "7.4".to_string(),
        }
    }
}

/// Secret store identity settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Entra ID authority host used by the environment credential
    pub authority_host: String,
    /// Instance metadata endpoint used by the managed identity credential
    pub imds_endpoint: String,
    /// Timeout for the `az` CLI in seconds
    pub cli_timeout_secs: u64,
    /// Timeout for a managed identity token request in seconds
    pub imds_timeout_secs: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            authority_host: "https://login.microsoftonline.com".to_string(),
            imds_endpoint: "http://169.254.169.254/metadata/identity/oauth2/token".to_string(),
            cli_timeout_secs: 30,
            imds_timeout_secs: 3,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Directory for a daily rolling log file
    pub directory: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

/// All runtime settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Copy orchestration
    pub copy: CopySettings,
    /// Inventory listing
    pub inventory: InventorySettings,
    /// HTTP clients
    pub http: HttpSettings,
    /// Secret store identity
    pub identity: IdentitySettings,
    /// Logging
    pub logging: LoggingSettings,
}

impl AppSettings {
    /// Loads settings from `path` (or `di-copy.toml` if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);

        Self::from_config(Config::builder().add_source(file).add_source(environment))
    }

    /// Builds settings from an arbitrary source stack
    pub fn from_config(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let settings: AppSettings = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;

        settings.validate()?;
        debug!("Loaded settings: {:?}", settings);

        Ok(settings)
    }

    /// Checks invariants between knobs
    pub fn validate(&self) -> Result<()> {
        if self.copy.max_concurrency == 0 {
            return Err(Error::Config("copy.max_concurrency must be at least 1".to_string()));
        }

        if self.copy.poll_interval_ms == 0 {
            return Err(Error::Config("copy.poll_interval_ms must be positive".to_string()));
        }

        if self.copy.deadline() <= self.copy.poll_interval() {
            return Err(Error::Config(
                "copy.deadline_secs must exceed the poll interval".to_string(),
            ));
        }

        if self.http.api_version.is_empty() {
            return Err(Error::Config("http.api_version must not be empty".to_string()));
        }

        Ok(())
    }
}
