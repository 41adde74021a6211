//! Process-wide tenancy settings, read from env. Binaries call `dotenvy::dotenv()` first.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for env var {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Settings for the tenancy core. `directory_url` points at the central
/// database holding the tenant directory; `credential_secret` keys the
/// credential cipher and must match the secret used at provisioning time.
#[derive(Clone, Debug)]
pub struct TenancyConfig {
    pub directory_url: String,
    pub credential_secret: String,
    /// Apex domain tenants hang off (e.g. `clubdeck.app` for `club1.clubdeck.app`).
    pub base_domain: String,
    /// Schema holding the directory table. Must be a valid PostgreSQL identifier.
    pub directory_schema: String,
    /// TTL for routing cache entries.
    pub cache_ttl: Duration,
    /// Deadline covering directory lookup plus pool acquisition per request.
    pub resolve_deadline: Duration,
}

impl TenancyConfig {
    pub fn new(directory_url: impl Into<String>, credential_secret: impl Into<String>) -> Self {
        TenancyConfig {
            directory_url: directory_url.into(),
            credential_secret: credential_secret.into(),
            base_domain: "clubdeck.app".into(),
            directory_schema: "clubdeck".into(),
            cache_ttl: Duration::from_secs(3600),
            resolve_deadline: Duration::from_secs(10),
        }
    }

    /// Load from env: `CLUBDECK_DIRECTORY_URL` and `CLUBDECK_CREDENTIAL_SECRET`
    /// are required; `CLUBDECK_BASE_DOMAIN`, `CLUBDECK_DIRECTORY_SCHEMA`,
    /// `CLUBDECK_CACHE_TTL_SECS` (default 3600) and
    /// `CLUBDECK_RESOLVE_DEADLINE_MS` (default 10000) are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let directory_url = std::env::var("CLUBDECK_DIRECTORY_URL")
            .map_err(|_| ConfigError::MissingEnv("CLUBDECK_DIRECTORY_URL"))?;
        let credential_secret = std::env::var("CLUBDECK_CREDENTIAL_SECRET")
            .map_err(|_| ConfigError::MissingEnv("CLUBDECK_CREDENTIAL_SECRET"))?;

        let mut config = TenancyConfig::new(directory_url, credential_secret);
        if let Ok(domain) = std::env::var("CLUBDECK_BASE_DOMAIN") {
            config.base_domain = domain;
        }
        if let Ok(schema) = std::env::var("CLUBDECK_DIRECTORY_SCHEMA") {
            config.directory_schema = schema;
        }
        config.cache_ttl = duration_env("CLUBDECK_CACHE_TTL_SECS", config.cache_ttl, Duration::from_secs)?;
        config.resolve_deadline =
            duration_env("CLUBDECK_RESOLVE_DEADLINE_MS", config.resolve_deadline, Duration::from_millis)?;
        Ok(config)
    }
}

fn duration_env(
    name: &'static str,
    default: Duration,
    make: fn(u64) -> Duration,
) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(make)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
        Err(_) => Ok(default),
    }
}
