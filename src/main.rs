use std::{process, sync::Arc};

use site_alerts::{
    application::{self, error::AppError},
    cache::{CacheConfig, CacheService, EventQueue, LruObjectCache, MemoryDurableStore},
    config,
    infra::{db::PostgresDurableStore, error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args.command.unwrap_or(config::Command::Stats);

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let output = match command {
        config::Command::Migrate => run_migrate(&settings).await?,
        config::Command::PurgeExpired => run_purge_expired(&settings).await?,
        command => {
            let service = build_service(&settings).await?;
            application::execute(&service, &command).await?
        }
    };

    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn build_service(settings: &config::Settings) -> Result<CacheService, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let capacity = cache_config.object_cache_capacity_non_zero();
    let queue = Arc::new(EventQueue::new_with_limit(
        cache_config.event_queue_limit_non_zero(),
    ));
    let object_cache = cache_config.enable_object_cache;

    let mut service = match settings.database.url.as_deref() {
        Some(url) => {
            let store = connect_store(url, &settings.database).await?;
            info!(
                target = "site_alerts::bootstrap",
                "Using Postgres durable store"
            );
            CacheService::new(cache_config, Arc::new(store))
        }
        None => {
            info!(
                target = "site_alerts::bootstrap",
                "No database configured; using in-memory durable store"
            );
            CacheService::new(cache_config, Arc::new(MemoryDurableStore::new()))
        }
    };

    if object_cache {
        service = service.with_object_cache(Arc::new(LruObjectCache::new(capacity)));
    }

    Ok(service.with_events(queue))
}

async fn connect_store(
    url: &str,
    database: &config::DatabaseSettings,
) -> Result<PostgresDurableStore, AppError> {
    let pool = PostgresDurableStore::connect(url, database.max_connections.get())
        .await
        .map_err(InfraError::from)?;
    let store = PostgresDurableStore::new(pool);
    store.health_check().await.map_err(InfraError::from)?;
    Ok(store)
}

fn require_database_url(settings: &config::Settings) -> Result<&str, AppError> {
    settings.database.url.as_deref().ok_or_else(|| {
        AppError::from(InfraError::configuration(
            "database.url must be set for this command",
        ))
    })
}

async fn run_migrate(settings: &config::Settings) -> Result<serde_json::Value, AppError> {
    let url = require_database_url(settings)?;
    let store = connect_store(url, &settings.database).await?;
    PostgresDurableStore::run_migrations(store.pool())
        .await
        .map_err(InfraError::from)?;
    info!(target = "site_alerts::migrate", "Migrations applied");
    Ok(serde_json::json!({ "migrated": true }))
}

async fn run_purge_expired(settings: &config::Settings) -> Result<serde_json::Value, AppError> {
    let url = require_database_url(settings)?;
    let store = connect_store(url, &settings.database).await?;
    let removed = store
        .purge_expired()
        .await
        .map_err(|err| InfraError::database(err.to_string()))?;
    info!(
        target = "site_alerts::purge",
        removed, "Purged expired cache rows"
    );
    Ok(serde_json::json!({ "removed": removed }))
}
