use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::browser::ChromiumConfig;
use crate::constants::DEFAULT_OUTPUT_DIR;
use crate::harvest::{BackoffPolicy, HarvestConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Session
    pub access_token: Option<String>,

    // Browser
    /// `HEADLESS_MODE`; unrecognised values are rejected rather than read as `false`.
    pub headless: bool,
    pub chrome_path: Option<String>,
    pub page_timeout: Duration,

    // Output
    pub output_dir: PathBuf,

    // Harvest loop
    pub exponential_backoff: bool,
    pub timeout_ceiling: u32,
    pub response_wait: Duration,
    pub settle_delay: Duration,
    pub throttle_every: usize,
    pub throttle_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Session
            access_token: optional_env("DEV_ACCESS_TOKEN"),

            // Browser
            headless: parse_env_bool("HEADLESS_MODE", true)?,
            chrome_path: optional_env("CHROME_PATH"),
            page_timeout: Duration::from_secs(parse_env_u64("PAGE_TIMEOUT_SECS", 60)?),

            // Output
            output_dir: PathBuf::from(env_or_default("OUTPUT_DIR", DEFAULT_OUTPUT_DIR)),

            // Harvest loop
            exponential_backoff: parse_env_bool("ENABLE_EXPONENTIAL_BACKOFF", false)?,
            timeout_ceiling: parse_env_u32("TIMEOUT_CEILING", 20)?,
            response_wait: Duration::from_millis(parse_env_u64("RESPONSE_WAIT_MS", 1500)?),
            settle_delay: Duration::from_millis(parse_env_u64("SETTLE_DELAY_MS", 750)?),
            throttle_every: parse_env_usize("THROTTLE_EVERY", 20)?,
            throttle_delay: Duration::from_secs(parse_env_u64("THROTTLE_DELAY_SECS", 3)?),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ceiling == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TIMEOUT_CEILING".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.response_wait.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "RESPONSE_WAIT_MS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.throttle_every == 0 {
            return Err(ConfigError::InvalidValue {
                name: "THROTTLE_EVERY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the auth token: an explicit value wins over `DEV_ACCESS_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither is set.
    pub fn resolve_token(&self, explicit: Option<&str>) -> Result<String, ConfigError> {
        explicit
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .or_else(|| self.access_token.clone())
            .ok_or_else(|| {
                ConfigError::Missing("auth token (--token or DEV_ACCESS_TOKEN)".to_string())
            })
    }

    /// Loop settings handed to the harvest controller.
    #[must_use]
    pub fn harvest_config(&self) -> HarvestConfig {
        HarvestConfig {
            timeout_ceiling: self.timeout_ceiling,
            response_wait: self.response_wait,
            settle_delay: self.settle_delay,
            throttle_every: self.throttle_every,
            throttle_delay: self.throttle_delay,
            backoff: BackoffPolicy::from_flag(self.exponential_backoff),
            ..HarvestConfig::default()
        }
    }

    /// Browser launch settings for the given auth token.
    #[must_use]
    pub fn chromium_config(&self, auth_token: String) -> ChromiumConfig {
        ChromiumConfig {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            page_timeout: self.page_timeout,
            auth_token,
            ..ChromiumConfig::default()
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::BackoffMode;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DEV_ACCESS_TOKEN",
        "HEADLESS_MODE",
        "CHROME_PATH",
        "PAGE_TIMEOUT_SECS",
        "OUTPUT_DIR",
        "ENABLE_EXPONENTIAL_BACKOFF",
        "TIMEOUT_CEILING",
        "RESPONSE_WAIT_MS",
        "SETTLE_DELAY_MS",
        "THROTTLE_EVERY",
        "THROTTLE_DELAY_SECS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();
        config.validate().unwrap();
        assert!(config.headless);
        assert!(!config.exponential_backoff);
        assert_eq!(config.timeout_ceiling, 20);
        assert_eq!(config.response_wait, Duration::from_millis(1500));
        assert_eq!(config.throttle_every, 20);
        assert_eq!(config.output_dir, PathBuf::from("./tweets-data"));
        assert!(config.access_token.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("HEADLESS_MODE", "false");
        std::env::set_var("ENABLE_EXPONENTIAL_BACKOFF", "TRUE");
        std::env::set_var("TIMEOUT_CEILING", "10");
        std::env::set_var("DEV_ACCESS_TOKEN", "tok");
        let config = Config::from_env().unwrap();
        clear_env();

        assert!(!config.headless);
        let harvest = config.harvest_config();
        assert_eq!(harvest.timeout_ceiling, 10);
        assert_eq!(harvest.backoff.mode, BackoffMode::Exponential);
        assert_eq!(config.resolve_token(None).unwrap(), "tok");
        assert_eq!(config.resolve_token(Some("cli")).unwrap(), "cli");
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        clear_env();
        std::env::set_var("HEADLESS_MODE", "maybe");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ParseBool { .. })
        ));
        clear_env();

        std::env::set_var("TIMEOUT_CEILING", "0");
        let config = Config::from_env().unwrap();
        clear_env();
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_headless_accepts_common_spellings() {
        for (value, expected) in [("TRUE", true), ("1", true), ("off", false), ("False", false)] {
            clear_env();
            std::env::set_var("HEADLESS_MODE", value);
            let config = Config::from_env().unwrap();
            assert_eq!(config.headless, expected, "HEADLESS_MODE={value}");
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_token() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert!(matches!(
            config.resolve_token(Some("")),
            Err(ConfigError::Missing(_))
        ));
    }
}
