//! Service configuration loaded from the environment.
//!
//! | Variable                      | Default                         |
//! |-------------------------------|---------------------------------|
//! | `SOILWATCH_PORT`              | `3000`                          |
//! | `SOILWATCH_DATABASE_URL`      | `sqlite:soilwatch.db?mode=rwc`  |
//! | `SOILWATCH_STALE_AFTER_SECS`  | `60`                            |
//! | `SOILWATCH_HISTORY_LIMIT`     | `20`                            |
//! | `SOILWATCH_SEND_TIMEOUT_SECS` | `10`                            |
//! | `SOILWATCH_RECIPIENT_ROLE`    | unset (every user)              |
//! | `SOILWATCH_FEED_URL`          | unset (push-only via `/feed`)   |
//! | `SOILWATCH_FEED_AUTH`         | unset                           |
//! | `SOILWATCH_FEED_POLL_SECS`    | `5`                             |
//!
//! Email and SMS settings are read by [`EmailConfig`] and [`SmsConfig`].
//! Classification thresholds are not configured here; they live in the
//! settings store and can change at runtime.

use std::str::FromStr;
use std::time::Duration;

use crate::aggregation::DEFAULT_STALE_AFTER;
use crate::dispatch::DEFAULT_SEND_TIMEOUT;
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::notify::{EmailConfig, SmsConfig};
use crate::recipients::RecipientPolicy;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:soilwatch.db?mode=rwc";

/// Default interval between feed polls.
const DEFAULT_POLL_SECS: u64 = 5;

/// Error type for invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("invalid value {value:?} for {var}")]
    Invalid { var: String, value: String },

    /// A variable parsed but is out of range.
    #[error("{var} must be greater than zero")]
    Zero { var: String },
}

/// Settings for the optional feed poller.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Root URL of the realtime database.
    pub url: String,
    /// Auth token appended to requests.
    pub auth: Option<String>,
    /// Time between polls.
    pub poll_interval: Duration,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub stale_after: Duration,
    pub history_limit: usize,
    pub send_timeout: Duration,
    pub recipient_policy: RecipientPolicy,
    pub feed: Option<FeedConfig>,
    pub email: Option<EmailConfig>,
    pub sms: Option<SmsConfig>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let stale_after_secs = parse_var(&lookup, "SOILWATCH_STALE_AFTER_SECS", DEFAULT_STALE_AFTER.as_secs())?;
        let history_limit = parse_var(&lookup, "SOILWATCH_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;
        let send_timeout_secs = parse_var(
            &lookup,
            "SOILWATCH_SEND_TIMEOUT_SECS",
            DEFAULT_SEND_TIMEOUT.as_secs(),
        )?;

        non_zero("SOILWATCH_HISTORY_LIMIT", history_limit as u64)?;
        non_zero("SOILWATCH_SEND_TIMEOUT_SECS", send_timeout_secs)?;

        let recipient_policy = match lookup("SOILWATCH_RECIPIENT_ROLE") {
            Some(role) if !role.trim().is_empty() => RecipientPolicy::Role(role.trim().to_string()),
            _ => RecipientPolicy::AllUsers,
        };

        let feed = match lookup("SOILWATCH_FEED_URL") {
            Some(url) => {
                let poll_secs = parse_var(&lookup, "SOILWATCH_FEED_POLL_SECS", DEFAULT_POLL_SECS)?;
                non_zero("SOILWATCH_FEED_POLL_SECS", poll_secs)?;
                Some(FeedConfig {
                    url,
                    auth: lookup("SOILWATCH_FEED_AUTH"),
                    poll_interval: Duration::from_secs(poll_secs),
                })
            }
            None => None,
        };

        Ok(Self {
            port: parse_var(&lookup, "SOILWATCH_PORT", DEFAULT_PORT)?,
            database_url: lookup("SOILWATCH_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            stale_after: Duration::from_secs(stale_after_secs),
            history_limit,
            send_timeout: Duration::from_secs(send_timeout_secs),
            recipient_policy,
            feed,
            email: EmailConfig::from_lookup(&lookup)?,
            sms: SmsConfig::from_lookup(&lookup),
        })
    }
}

/// Parse `var` through `lookup`, using `default` when it is unset.
pub(crate) fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
    }
}

fn non_zero(var: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero {
            var: var.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.database_url, DEFAULT_DB_PATH);
        assert_eq!(config.stale_after, Duration::from_secs(60));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert_eq!(config.recipient_policy, RecipientPolicy::AllUsers);
        assert!(config.feed.is_none());
        assert!(config.email.is_none());
        assert!(config.sms.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SOILWATCH_PORT", "8080"),
            ("SOILWATCH_STALE_AFTER_SECS", "120"),
            ("SOILWATCH_RECIPIENT_ROLE", "user"),
            ("SOILWATCH_FEED_URL", "https://db.example.com"),
            ("SOILWATCH_FEED_POLL_SECS", "2"),
            ("SMS_API_KEY", "secret"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.stale_after, Duration::from_secs(120));
        assert_eq!(
            config.recipient_policy,
            RecipientPolicy::Role("user".to_string())
        );
        let feed = config.feed.unwrap();
        assert_eq!(feed.poll_interval, Duration::from_secs(2));
        assert!(feed.auth.is_none());
        assert_eq!(config.sms.unwrap().api_key, "secret");
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = load(&[("SOILWATCH_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("SOILWATCH_PORT"));
    }

    #[test]
    fn test_invalid_smtp_port_is_an_error() {
        let err = load(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "not-a-port"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("SMTP_PORT"));

        let config = load(&[("SMTP_HOST", "smtp.example.com"), ("SMTP_PORT", "2525")]).unwrap();
        assert_eq!(config.email.unwrap().smtp_port, 2525);
    }

    #[test]
    fn test_zero_history_limit_rejected() {
        let err = load(&[("SOILWATCH_HISTORY_LIMIT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Zero { .. }));
    }
}
