use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Fails if a subscriber is already installed.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "site_alerts_cache_hit_total",
            Unit::Count,
            "Total number of cache hits, labelled by the tier that answered."
        );
        describe_counter!(
            "site_alerts_cache_miss_total",
            Unit::Count,
            "Total number of lookups no tier could answer."
        );
        describe_counter!(
            "site_alerts_cache_write_total",
            Unit::Count,
            "Total number of writes accepted by the durable store."
        );
        describe_counter!(
            "site_alerts_cache_object_evict_total",
            Unit::Count,
            "Total number of object cache evictions due to capacity."
        );
        describe_gauge!(
            "site_alerts_cache_event_queue_len",
            Unit::Count,
            "Current number of pending cache events in the queue."
        );
        describe_counter!(
            "site_alerts_cache_event_dropped_total",
            Unit::Count,
            "Total number of cache events dropped due to queue overflow."
        );
        describe_histogram!(
            "site_alerts_cache_consume_ms",
            Unit::Milliseconds,
            "Cache event consumption latency in milliseconds."
        );
    });
}
