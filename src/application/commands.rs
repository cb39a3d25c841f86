//! Cache administration commands.
//!
//! Each command runs against a fresh manager for the requested tenant and
//! reports its outcome as JSON for the CLI to print.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::info;

use crate::cache::{CacheService, RequestContext};
use crate::config::{Command, TargetArgs};

use super::error::AppError;

/// Run a cache command. Database-only commands are rejected here.
pub async fn execute(service: &CacheService, command: &Command) -> Result<Value, AppError> {
    match command {
        Command::Get(args) => {
            let cache = manager(service, &args.target);
            let value: Option<Value> = cache.get(&args.key, Some(args.target.group)).await;
            Ok(value.unwrap_or(Value::Null))
        }
        Command::Set(args) => {
            let cache = manager(service, &args.target);
            let stored = cache
                .set(
                    &args.key,
                    &parse_value(&args.value),
                    args.ttl_seconds.map(Duration::from_secs),
                    Some(args.target.group),
                )
                .await?;
            Ok(json!({ "stored": stored }))
        }
        Command::Increment(args) | Command::Decrement(args) => {
            let cache = manager(service, &args.target);
            let ttl = args.ttl_seconds.map(Duration::from_secs);
            let group = Some(args.target.group);
            let value = if matches!(command, Command::Increment(_)) {
                cache.increment(&args.key, args.by, ttl, group).await
            } else {
                cache.decrement(&args.key, args.by, ttl, group).await
            };
            Ok(json!({ "value": value }))
        }
        Command::Delete(args) => {
            let cache = manager(service, &args.target);
            let deleted = cache.delete(&args.key, Some(args.target.group)).await;
            Ok(json!({ "deleted": deleted }))
        }
        Command::Flush(args) => {
            let flushed = service
                .manager(RequestContext::for_tenant(args.tenant))
                .flush()
                .await;
            Ok(json!({ "flushed": flushed, "tenant": args.tenant }))
        }
        Command::FlushGroup(args) => {
            let flushed = service
                .manager(RequestContext::for_tenant(args.tenant))
                .flush_group(args.group)
                .await;
            Ok(json!({ "flushed": flushed, "tenant": args.tenant, "group": args.group }))
        }
        Command::Stats => {
            let stats = service.stats();
            info!(hits = stats.hits, misses = stats.misses, "Cache stats requested");
            Ok(json!({
                "prefix": service.config().prefix,
                "version": service.config().version,
                "object_cache": stats.object_cache,
                "hits": stats.hits,
                "misses": stats.misses,
                "writes": stats.writes,
            }))
        }
        Command::Migrate | Command::PurgeExpired => Err(AppError::validation(
            "this command needs a configured database",
        )),
    }
}

/// CLI values are JSON when they parse as JSON and plain strings otherwise.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn manager(service: &CacheService, target: &TargetArgs) -> crate::cache::CacheManager {
    service.manager(RequestContext::for_tenant(target.tenant))
}
