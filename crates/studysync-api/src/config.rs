use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use studysync_core::SyncPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub jwt_owner_claim: String,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub sync_rate_limit_per_window: u32,
    pub enqueue_rate_limit_per_window: u32,
    pub sync_max_retries: u32,
    pub replay_timeout: Duration,
    pub stale_syncing_after: Duration,
    pub halt_on_failure: bool,
    pub default_retention_days: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("jwt_owner_claim", &self.jwt_owner_claim)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "sync_rate_limit_per_window",
                &self.sync_rate_limit_per_window,
            )
            .field(
                "enqueue_rate_limit_per_window",
                &self.enqueue_rate_limit_per_window,
            )
            .field("sync_max_retries", &self.sync_max_retries)
            .field("replay_timeout", &self.replay_timeout)
            .field("stale_syncing_after", &self.stale_syncing_after)
            .field("halt_on_failure", &self.halt_on_failure)
            .field("default_retention_days", &self.default_retention_days)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "STUDYSYNC_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = PathBuf::from(value_or_default(
            &lookup,
            "STUDYSYNC_DB_PATH",
            "data/studysync.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "STUDYSYNC_JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "STUDYSYNC_JWT_SECRET must be at least 32 characters".to_string(),
            ));
        }
        let jwt_issuer = optional_trimmed(&lookup, "STUDYSYNC_JWT_ISSUER");
        let jwt_audience = optional_trimmed(&lookup, "STUDYSYNC_JWT_AUDIENCE");
        let jwt_owner_claim = value_or_default(&lookup, "STUDYSYNC_JWT_OWNER_CLAIM", "sub");
        if matches!(jwt_owner_claim.as_str(), "exp" | "iat" | "nbf" | "aud" | "iss") {
            return Err(ConfigError::Invalid(format!(
                "STUDYSYNC_JWT_OWNER_CLAIM cannot be the registered claim `{jwt_owner_claim}`"
            )));
        }

        let auth_clock_skew_secs: u64 = bounded(&lookup, "AUTH_CLOCK_SKEW_SECS", 60, 0..=300)?;
        let rate_limit_window_secs: u64 = bounded(&lookup, "RATE_LIMIT_WINDOW_SECS", 60, 10..=3_600)?;
        let sync_rate_limit_per_window: u32 =
            bounded(&lookup, "SYNC_RATE_LIMIT_PER_WINDOW", 30, 1..=1_000)?;
        let enqueue_rate_limit_per_window: u32 =
            bounded(&lookup, "ENQUEUE_RATE_LIMIT_PER_WINDOW", 600, 1..=10_000)?;

        let sync_max_retries: u32 = bounded(&lookup, "SYNC_MAX_RETRIES", 3, 1..=20)?;
        let replay_timeout_secs: u64 = bounded(&lookup, "SYNC_REPLAY_TIMEOUT_SECS", 10, 1..=300)?;
        let stale_syncing_secs: u64 =
            bounded(&lookup, "SYNC_STALE_SYNCING_SECS", 300, 30..=86_400)?;
        let default_retention_days: u32 = bounded(&lookup, "SYNC_RETENTION_DAYS", 7, 0..=3_650)?;

        let halt_on_failure = match value_or_default(&lookup, "SYNC_HALT_ON_FAILURE", "false")
            .to_ascii_lowercase()
            .as_str()
        {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(ConfigError::Invalid(
                    "SYNC_HALT_ON_FAILURE must be true or false".to_string(),
                ))
            }
        };

        Ok(Self {
            bind_addr,
            db_path,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_owner_claim,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            sync_rate_limit_per_window,
            enqueue_rate_limit_per_window,
            sync_max_retries,
            replay_timeout: Duration::from_secs(replay_timeout_secs),
            stale_syncing_after: Duration::from_secs(stale_syncing_secs),
            halt_on_failure,
            default_retention_days,
        })
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            max_retries: self.sync_max_retries,
            replay_timeout: self.replay_timeout,
            stale_syncing_after: self.stale_syncing_after,
            halt_on_failure: self.halt_on_failure,
        }
    }
}

/// Parse an integer variable, falling back to `default`, and require it to lie in `range`.
fn bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display + Copy,
{
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
