use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "veduta_artifacts_generated_total",
            Unit::Count,
            "Total number of artifacts rendered by the pipeline."
        );
        describe_counter!(
            "veduta_store_hit_total",
            Unit::Count,
            "Total number of artifact-store reads that found a file."
        );
        describe_counter!(
            "veduta_store_miss_total",
            Unit::Count,
            "Total number of artifact-store reads that missed."
        );
        describe_counter!(
            "veduta_store_evict_total",
            Unit::Count,
            "Total number of artifacts removed by eviction timers."
        );
        describe_counter!(
            "veduta_regeneration_total",
            Unit::Count,
            "Total number of regeneration passes triggered by store misses."
        );
    });
}
