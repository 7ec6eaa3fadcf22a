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
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "kiosk_cache_memory_hit_total",
            Unit::Count,
            "Total number of reads served by the memory tier."
        );
        describe_counter!(
            "kiosk_cache_durable_hit_total",
            Unit::Count,
            "Total number of reads served by the durable store."
        );
        describe_counter!(
            "kiosk_cache_miss_total",
            Unit::Count,
            "Total number of cache misses, including expired and corrupt entries."
        );
        describe_counter!(
            "kiosk_cache_memory_evict_total",
            Unit::Count,
            "Total number of memory-tier evictions due to capacity."
        );
        describe_counter!(
            "kiosk_cache_expired_total",
            Unit::Count,
            "Total number of entries deleted on read after their TTL."
        );
        describe_counter!(
            "kiosk_cache_corrupt_total",
            Unit::Count,
            "Total number of undecodable entries removed."
        );
        describe_counter!(
            "kiosk_cache_write_failed_total",
            Unit::Count,
            "Total number of writes the durable store rejected."
        );
        describe_gauge!(
            "kiosk_cache_refresh_queue_len",
            Unit::Count,
            "Current number of pending background refreshes."
        );
        describe_histogram!(
            "kiosk_cache_optimization_ms",
            Unit::Milliseconds,
            "Memory optimization sweep latency in milliseconds."
        );
    });
}
