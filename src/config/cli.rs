use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::cache::{CacheGroup, DEFAULT_TENANT_ID};

/// Command-line arguments for the site-alerts binary.
#[derive(Debug, Parser)]
#[command(name = "site-alerts", version, about = "Site Alerts cache administration")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SITE_ALERTS_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print a cached value as JSON.
    Get(KeyArgs),
    /// Store a value; VALUE is parsed as JSON and stored as a string otherwise.
    Set(SetArgs),
    /// Increment a counter.
    #[command(name = "incr")]
    Increment(CounterArgs),
    /// Decrement a counter.
    #[command(name = "decr")]
    Decrement(CounterArgs),
    /// Delete a key from every tier.
    Delete(KeyArgs),
    /// Drop every entry of one tenant, across versions.
    Flush(FlushArgs),
    /// Drop one group (cache, stats, query, fragment) of one tenant.
    #[command(name = "flush-group")]
    FlushGroup(FlushGroupArgs),
    /// Print cache usage statistics.
    Stats,
    /// Apply database migrations for the Postgres store.
    Migrate,
    /// Delete expired rows from the Postgres store.
    #[command(name = "purge-expired")]
    PurgeExpired,
}

/// Tenant and group an operation runs against.
#[derive(Debug, Args, Clone)]
pub struct TargetArgs {
    /// Tenant (site) id keys are scoped to.
    #[arg(long, default_value_t = DEFAULT_TENANT_ID)]
    pub tenant: u64,

    /// Group the key belongs to.
    #[arg(long, value_parser = parse_group, default_value = "cache")]
    pub group: CacheGroup,
}

impl Default for TargetArgs {
    fn default() -> Self {
        Self {
            tenant: DEFAULT_TENANT_ID,
            group: CacheGroup::Default,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Logical key, without prefix, version or tenant.
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Debug, Args, Clone)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(value_name = "KEY")]
    pub key: String,

    #[arg(value_name = "VALUE")]
    pub value: String,

    /// Time to live; 0 keeps the entry until deleted.
    #[arg(long = "ttl-seconds", value_name = "SECONDS")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct CounterArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(value_name = "KEY")]
    pub key: String,

    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub by: i64,

    #[arg(long = "ttl-seconds", value_name = "SECONDS")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct FlushArgs {
    /// Tenant (site) whose entries are dropped.
    #[arg(long, default_value_t = DEFAULT_TENANT_ID)]
    pub tenant: u64,
}

#[derive(Debug, Args, Clone)]
pub struct FlushGroupArgs {
    #[arg(long, default_value_t = DEFAULT_TENANT_ID)]
    pub tenant: u64,

    #[arg(value_name = "GROUP", value_parser = parse_group)]
    pub group: CacheGroup,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL; without one the store is in-memory.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT", global = true)]
    pub database_max_connections: Option<u32>,

    /// Override the key prefix.
    #[arg(long = "cache-prefix", value_name = "PREFIX", global = true)]
    pub cache_prefix: Option<String>,

    /// Override the cache format version.
    #[arg(long = "cache-version", value_name = "VERSION", global = true)]
    pub cache_version: Option<String>,

    /// Override the default TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS", global = true)]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Enable the in-process object cache.
    #[arg(
        long = "cache-object-cache",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_object_cache: Option<bool>,
}

fn parse_group(value: &str) -> Result<CacheGroup, String> {
    CacheGroup::from_suffix(value)
        .ok_or_else(|| format!("unknown group `{value}` (expected cache, stats, query or fragment)"))
}
