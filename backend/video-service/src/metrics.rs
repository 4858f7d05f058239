//! Prometheus metrics for the aggregation scheduler, the presigned URL cache,
//! and the `/metrics` endpoint

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};
use std::time::Duration;

/// Keys whose delta reached the durable store, per namespace
static KEYS_FLUSHED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "video_aggregation_keys_flushed_total",
        "Cache keys flushed to the durable store",
        &["namespace"]
    )
    .expect("failed to register video_aggregation_keys_flushed_total")
});

/// Keys left in the cache because they could not be parsed
static KEYS_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "video_aggregation_keys_skipped_total",
        "Cache keys skipped during aggregation",
        &["namespace"]
    )
    .expect("failed to register video_aggregation_keys_skipped_total")
});

static BATCH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "video_aggregation_batch_failures_total",
        "Aggregation batches rolled back",
        &["namespace"]
    )
    .expect("failed to register video_aggregation_batch_failures_total")
});

static CYCLE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "video_aggregation_cycle_duration_seconds",
        "Duration of one full aggregation cycle",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register video_aggregation_cycle_duration_seconds")
});

/// Presigned URL lookups by outcome: hit, miss, error
static PRESIGNED_URL_LOOKUPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "presigned_url_cache_total",
        "Presigned URL lookups by outcome",
        &["result"]
    )
    .expect("failed to register presigned_url_cache_total")
});

pub fn record_keys_flushed(namespace: &str, count: usize) {
    KEYS_FLUSHED_TOTAL
        .with_label_values(&[namespace])
        .inc_by(count as u64);
}

pub fn record_keys_skipped(namespace: &str, count: usize) {
    KEYS_SKIPPED_TOTAL
        .with_label_values(&[namespace])
        .inc_by(count as u64);
}

pub fn record_batch_failure(namespace: &str) {
    BATCH_FAILURES_TOTAL.with_label_values(&[namespace]).inc();
}

pub fn record_cycle_duration(duration: Duration) {
    CYCLE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_presigned_lookup(result: &str) {
    PRESIGNED_URL_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presigned_lookups_exported_from_default_registry() {
        let before = PRESIGNED_URL_LOOKUPS_TOTAL.with_label_values(&["hit"]).get();
        record_presigned_lookup("hit");
        assert!(PRESIGNED_URL_LOOKUPS_TOTAL.with_label_values(&["hit"]).get() > before);

        let exported = prometheus::gather()
            .iter()
            .any(|family| family.get_name() == "presigned_url_cache_total");
        assert!(exported);
    }
}
