use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable prefix for overrides, e.g. `RAINCHECK__ALERTS__RAIN_THRESHOLD_PCT=70`.
const ENV_PREFIX: &str = "RAINCHECK";
const ENV_SEPARATOR: &str = "__";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Remote endpoints and HTTP timeouts
    pub api: ApiConfig,

    /// City search behaviour
    pub search: SearchConfig,

    /// Background rain alerts
    pub alerts: AlertsConfig,

    /// Local database
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub forecast_base_url: String,
    pub geocoding_base_url: String,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; covers read and write.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            forecast_base_url: "https://api.open-meteo.com".to_string(),
            geocoding_base_url: "https://geocoding-api.open-meteo.com".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 20,
            user_agent: format!("Raincheck/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Language of the lookup inserted first into the merge
    pub primary_language: String,
    /// Language whose non-blank names win on coordinate collisions
    pub secondary_language: String,
    /// BCP-47 tag used to sort merged results
    pub collation_locale: String,
    /// Result count requested per lookup
    pub max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            primary_language: "en".to_string(),
            secondary_language: "sv".to_string(),
            collation_locale: "sv-SE".to_string(),
            max_results: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Minimum next-hour rain probability that triggers a notification
    pub rain_threshold_pct: u8,
    /// Global anti-spam window between two notifications
    pub cooldown_minutes: u32,
    /// Interval of the periodic check
    pub check_interval_minutes: u32,
    /// Tolerance window the periodic check may drift within
    pub flex_minutes: u32,
    pub backoff_initial_minutes: u32,
    pub backoff_max_minutes: u32,
    /// Language tag of notification text
    pub notification_language: String,
    /// Optional webhook receiving notifications as `{"text": ...}`; empty disables it
    pub webhook_url: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rain_threshold_pct: 60,
            cooldown_minutes: 120,
            check_interval_minutes: 180,
            flex_minutes: 30,
            backoff_initial_minutes: 30,
            backoff_max_minutes: 300,
            notification_language: "sv".to_string(),
            webhook_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file name, relative to `config_dir` unless absolute
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "raincheck.db".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("raincheck");

        Self {
            config_dir,
            api: ApiConfig::default(),
            search: SearchConfig::default(),
            alerts: AlertsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path` and apply `RAINCHECK__*` environment overrides.
    ///
    /// A missing file is created with defaults first.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::default().save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
        }

        let config: Config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read config file")?
            .try_deserialize()
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it.
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.api.forecast_base_url, "api.forecast_base_url", &mut result);
        self.validate_url(&self.api.geocoding_base_url, "api.geocoding_base_url", &mut result);

        if self.api.connect_timeout_secs == 0 {
            result.add_error("api.connect_timeout_secs", "Timeout must be greater than 0");
        }
        if self.api.request_timeout_secs == 0 {
            result.add_error("api.request_timeout_secs", "Timeout must be greater than 0");
        }

        if self.search.primary_language.trim().is_empty() {
            result.add_error("search.primary_language", "Language tag cannot be empty");
        }
        if self.search.secondary_language.trim().is_empty() {
            result.add_error("search.secondary_language", "Language tag cannot be empty");
        }
        if self.search.primary_language == self.search.secondary_language {
            result.add_warning(
                "search.secondary_language",
                "Both lookups use the same language; merging adds nothing",
            );
        }
        if self.search.max_results == 0 {
            result.add_error("search.max_results", "At least one result must be requested");
        }

        if self.alerts.rain_threshold_pct > 100 {
            result.add_error(
                "alerts.rain_threshold_pct",
                format!(
                    "Threshold must be a percentage (0-100), got {}",
                    self.alerts.rain_threshold_pct
                ),
            );
        }
        if self.alerts.cooldown_minutes == 0 {
            result.add_warning(
                "alerts.cooldown_minutes",
                "Cooldown disabled (0 minutes); every run may notify",
            );
        }
        if self.alerts.check_interval_minutes == 0 {
            result.add_error(
                "alerts.check_interval_minutes",
                "Check interval must be greater than 0",
            );
        }
        if self.alerts.backoff_initial_minutes > self.alerts.backoff_max_minutes {
            result.add_warning(
                "alerts.backoff_initial_minutes",
                "Initial backoff exceeds the maximum; the maximum will be used",
            );
        }

        if !self.alerts.webhook_url.is_empty() {
            self.validate_url(&self.alerts.webhook_url, "alerts.webhook_url", &mut result);
        }

        if self.storage.database_file.trim().is_empty() {
            result.add_error("storage.database_file", "Database file name cannot be empty");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Absolute path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        let file = Path::new(&self.storage.database_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.config_dir.join(file)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("raincheck");

        Ok(config_dir.join("config.toml"))
    }
}
