use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
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
            "brusio_cache_full_warm_total",
            Unit::Count,
            "Total number of completed full cache warms."
        );
        describe_counter!(
            "brusio_cache_topup_total",
            Unit::Count,
            "Total number of completed incremental top-ups."
        );
        describe_counter!(
            "brusio_cache_warm_skipped_total",
            Unit::Count,
            "Total number of warm triggers dropped because one was in flight."
        );
        describe_counter!(
            "brusio_cache_malformed_entry_total",
            Unit::Count,
            "Total number of cache entries skipped because their payload failed to deserialize."
        );
        describe_counter!(
            "brusio_outbox_dead_letter_total",
            Unit::Count,
            "Total number of durable read-flag updates dead-lettered after exhausting retries."
        );
        describe_gauge!(
            "brusio_outbox_depth",
            Unit::Count,
            "Current number of durable updates queued in the write-back outbox."
        );
    });
}
