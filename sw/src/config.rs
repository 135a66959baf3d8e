//! Shipwright configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ship::ShipMode;

/// Main shipwright configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote execute service
    pub api: ApiConfig,

    /// Local admission control for execute calls
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for throttled calls
    pub retry: RetryConfig,

    /// Default ship behavior
    pub ship: ShipConfig,

    /// Session storage
    pub session: SessionConfig,

    /// Background job registry
    pub jobs: JobsConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this before commands that talk to the execute service to fail
    /// fast with a clear message.
    pub fn validate(&self) -> Result<()> {
        if self.parse_mode().is_none() {
            return Err(eyre::eyre!(
                "Unknown ship mode '{}'. Use 'single-session' or 'per-task'.",
                self.ship.mode
            ));
        }
        if self.rate_limit.refill_interval_ms == 0 {
            return Err(eyre::eyre!("rate-limit refill-interval-ms must be at least 1"));
        }
        if std::env::var(&self.api.token_env).is_err() {
            return Err(eyre::eyre!(
                "API token not found. Set the {} environment variable.",
                self.api.token_env
            ));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./shipwright.yml
        let local_config = PathBuf::from("shipwright.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/shipwright/shipwright.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("shipwright").join("shipwright.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load config from {}: {}",
                            user_config.display(),
                            e
                        );
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Limiter settings in the engine's terms
    pub fn limiter_config(&self) -> crate::limiter::RateLimitConfig {
        crate::limiter::RateLimitConfig {
            max_tokens: self.rate_limit.max_tokens,
            refill_rate: self.rate_limit.refill_rate,
            refill_interval: Duration::from_millis(self.rate_limit.refill_interval_ms),
        }
    }

    /// Retry policy in the engine's terms
    pub fn retry_config(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    /// Configured default ship mode; unknown values fall back to single-session
    pub fn ship_mode(&self) -> ShipMode {
        self.parse_mode().unwrap_or_default()
    }

    fn parse_mode(&self) -> Option<ShipMode> {
        match self.ship.mode.as_str() {
            "single-session" => Some(ShipMode::SingleSession),
            "per-task" => Some(ShipMode::PerTask),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    /// Read the API token from the configured environment variable
    pub fn token(&self) -> Result<String> {
        std::env::var(&self.api.token_env).map_err(|_| {
            eyre::eyre!(
                "API token not found. Set the {} environment variable.",
                self.api.token_env
            )
        })
    }

    pub fn registry_path(&self) -> PathBuf {
        self.jobs
            .registry_path
            .clone()
            .unwrap_or_else(sessionstore::default_registry_path)
    }

    pub fn retention_ms(&self) -> i64 {
        self.jobs.retention_days * 24 * 60 * 60 * 1000
    }

    pub fn session_dir(&self) -> PathBuf {
        PathBuf::from(&self.session.dir)
    }
}

/// Remote execute service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Service base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the bearer token
    #[serde(rename = "token-env")]
    pub token_env: String,

    /// Execute request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token_env: "SHIPWRIGHT_API_TOKEN".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Token bucket settings for execute admission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity
    #[serde(rename = "max-tokens")]
    pub max_tokens: f64,

    /// Tokens added per refill interval
    #[serde(rename = "refill-rate")]
    pub refill_rate: f64,

    /// Refill interval in milliseconds
    #[serde(rename = "refill-interval-ms")]
    pub refill_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_rate: 1.0,
            refill_interval_ms: 60_000,
        }
    }
}

/// Retry policy for throttled execute calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

/// Default ship behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipConfig {
    /// "single-session" or "per-task"
    pub mode: String,

    /// Continue past failed tasks by default
    pub auto: bool,
}

impl Default for ShipConfig {
    fn default() -> Self {
        Self {
            mode: "single-session".to_string(),
            auto: false,
        }
    }
}

/// Session storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding session.json and plan.json
    pub dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: ".shipwright".to_string(),
        }
    }
}

/// Background job registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Registry file path; platform data dir when unset
    #[serde(rename = "registry-path")]
    pub registry_path: Option<PathBuf>,

    /// Age at which prune removes terminal entries
    #[serde(rename = "retention-days")]
    pub retention_days: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            registry_path: None,
            retention_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "http://localhost:8080");
        assert_eq!(config.api.token_env, "SHIPWRIGHT_API_TOKEN");
        assert_eq!(config.rate_limit.max_tokens, 10.0);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.ship_mode(), ShipMode::SingleSession);
        assert_eq!(config.session.dir, ".shipwright");
        assert_eq!(config.jobs.retention_days, 7);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
api:
  base-url: https://agents.example.com
  token-env: MY_TOKEN
  timeout-ms: 10000

rate-limit:
  max-tokens: 4
  refill-rate: 2
  refill-interval-ms: 30000

retry:
  max-retries: 5
  base-delay-ms: 500
  max-delay-ms: 8000

ship:
  mode: per-task
  auto: true
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.api.base_url, "https://agents.example.com");
        assert_eq!(config.api.token_env, "MY_TOKEN");
        assert_eq!(config.rate_limit.max_tokens, 4.0);
        assert_eq!(config.rate_limit.refill_interval_ms, 30_000);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.ship_mode(), ShipMode::PerTask);
        assert!(config.ship.auto);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
api:
  base-url: https://svc.example.com
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.api.base_url, "https://svc.example.com");

        // Defaults for unspecified
        assert_eq!(config.api.token_env, "SHIPWRIGHT_API_TOKEN");
        assert_eq!(config.rate_limit.refill_interval_ms, 60_000);
        assert_eq!(config.retry.base_delay_ms, 1_000);
    }

    #[test]
    fn test_validate_rejects_unknown_mode() {
        let mut config = Config::default();
        config.ship.mode = "parallel".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ship mode"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.rate_limit.refill_interval_ms = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_validate_checks_token_env() {
        let mut config = Config::default();
        config.api.token_env = "SW_CONFIG_TEST_TOKEN".to_string();

        assert!(config.validate().is_err());

        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("SW_CONFIG_TEST_TOKEN", "tok");
        }
        assert!(config.validate().is_ok());
        assert_eq!(config.token().unwrap(), "tok");
        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::remove_var("SW_CONFIG_TEST_TOKEN");
        }
    }

    #[test]
    fn test_token_missing_env_errors() {
        let mut config = Config::default();
        config.api.token_env = "SW_CONFIG_TOKEN_NEVER_SET".to_string();

        let err = config.token().unwrap_err();
        assert!(err.to_string().contains("SW_CONFIG_TOKEN_NEVER_SET"));
    }

    #[test]
    fn test_duration_conversions() {
        let config = Config::default();

        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.limiter_config().refill_interval, Duration::from_secs(60));
        assert_eq!(config.retry_config().base_delay, Duration::from_secs(1));
        assert_eq!(config.retention_ms(), 7 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shipwright.yml");
        fs::write(&path, "api:\n  base-url: https://svc.example.com\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.api.base_url, "https://svc.example.com");
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let path = PathBuf::from("/definitely/not/here/shipwright.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
