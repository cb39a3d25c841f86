//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, CounterArgs, FlushArgs, FlushGroupArgs, GlobalOverrides, KeyArgs, SetArgs,
    TargetArgs,
};

use crate::cache::KEY_DELIMITER;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "site-alerts";
const ENV_PREFIX: &str = "SITE_ALERTS";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_CACHE_PREFIX: &str = "site_alerts";
const DEFAULT_CACHE_VERSION: &str = "v1";
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_OBJECT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Postgres URL for the durable store. `None` selects the in-memory store.
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub prefix: String,
    pub version: String,
    pub default_ttl: Duration,
    pub object_cache: bool,
    pub object_cache_capacity: NonZeroUsize,
    pub event_queue_limit: NonZeroUsize,
    pub consume_batch_limit: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(prefix) = overrides.cache_prefix.as_ref() {
            self.cache.prefix = Some(prefix.clone());
        }
        if let Some(version) = overrides.cache_version.as_ref() {
            self.cache.version = Some(version.clone());
        }
        if let Some(ttl) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(ttl);
        }
        if let Some(enabled) = overrides.cache_object_cache {
            self.cache.object_cache = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let prefix = key_segment(
        cache.prefix.as_deref().unwrap_or(DEFAULT_CACHE_PREFIX),
        "cache.prefix",
    )?;
    let version = key_segment(
        cache.version.as_deref().unwrap_or(DEFAULT_CACHE_VERSION),
        "cache.version",
    )?;

    Ok(CacheSettings {
        prefix,
        version,
        default_ttl: Duration::from_secs(
            cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        ),
        object_cache: cache.object_cache.unwrap_or(true),
        object_cache_capacity: non_zero_usize(
            cache
                .object_cache_capacity
                .unwrap_or(DEFAULT_OBJECT_CACHE_CAPACITY),
            "cache.object_cache_capacity",
        )?,
        event_queue_limit: non_zero_usize(
            cache.event_queue_limit.unwrap_or(DEFAULT_EVENT_QUEUE_LIMIT),
            "cache.event_queue_limit",
        )?,
        consume_batch_limit: non_zero_usize(
            cache
                .consume_batch_limit
                .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT),
            "cache.consume_batch_limit",
        )?,
    })
}

/// Prefix and version become key segments, so they must be non-empty and
/// free of the delimiter.
fn key_segment(value: &str, key: &'static str) -> Result<String, LoadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    if trimmed.contains(KEY_DELIMITER) {
        return Err(LoadError::invalid(
            key,
            format!("must not contain `{KEY_DELIMITER}`"),
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    prefix: Option<String>,
    version: Option<String>,
    default_ttl_seconds: Option<u64>,
    object_cache: Option<bool>,
    object_cache_capacity: Option<usize>,
    event_queue_limit: Option<usize>,
    consume_batch_limit: Option<usize>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
