//! Cache metrics for observability

use prometheus::{CounterVec, Opts, Registry};
use std::sync::OnceLock;
use tracing::warn;

use crate::keys::PRESIGNED_URL_PREFIX;

const PRESIGNED_URL_LABEL: &str = "presigned_url";

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    increments: CounterVec,
    errors: CounterVec,
}

impl CacheMetricsInner {
    fn new() -> Self {
        let inner = Self {
            hits: CounterVec::new(
                Opts::new("counter_cache_hits_total", "Total cache hits"),
                &["namespace"],
            )
            .expect("valid metric definition"),
            misses: CounterVec::new(
                Opts::new("counter_cache_misses_total", "Total cache misses"),
                &["namespace"],
            )
            .expect("valid metric definition"),
            increments: CounterVec::new(
                Opts::new(
                    "counter_cache_increments_total",
                    "Total atomic counter increments",
                ),
                &["namespace"],
            )
            .expect("valid metric definition"),
            errors: CounterVec::new(
                Opts::new("counter_cache_errors_total", "Total cache errors"),
                &["namespace", "op"],
            )
            .expect("valid metric definition"),
        };

        if let Err(e) = inner.register(prometheus::default_registry()) {
            warn!("Failed to register counter cache metrics: {}", e);
        }

        inner
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.increments.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

/// Label a key by its leading segment pair, e.g. `video:views`. Presigned URL
/// keys all share one label so bucket names stay out of the label set.
fn extract_namespace(key: &str) -> &str {
    if key.starts_with(PRESIGNED_URL_PREFIX) {
        return PRESIGNED_URL_LABEL;
    }

    let mut end = 0;
    for (seen, (idx, _)) in key.match_indices(':').enumerate() {
        end = idx;
        if seen == 1 {
            break;
        }
    }
    if end == 0 {
        "unknown"
    } else {
        &key[..end]
    }
}

/// Cache metrics wrapper
#[derive(Clone, Default)]
pub struct CacheMetrics;

impl CacheMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_hit(&self, key: &str) {
        get_metrics()
            .hits
            .with_label_values(&[extract_namespace(key)])
            .inc();
    }

    pub fn record_miss(&self, key: &str) {
        get_metrics()
            .misses
            .with_label_values(&[extract_namespace(key)])
            .inc();
    }

    pub fn record_increment(&self, key: &str) {
        get_metrics()
            .increments
            .with_label_values(&[extract_namespace(key)])
            .inc();
    }

    pub fn record_error(&self, key: &str, op: &str) {
        get_metrics()
            .errors
            .with_label_values(&[extract_namespace(key), op])
            .inc();
    }
}
