//! Aggregation scheduler
//!
//! Periodically moves pending deltas from the cache into the durable store.
//! Every cycle sweeps the four counter namespaces in order; each pass follows
//! the same template:
//!
//! 1. SCAN the namespace prefix
//! 2. MGET every matched key in one round trip
//! 3. split the parsed keys into batches of `batch_size`
//! 4. one durable transaction per batch; only after it commits are the batch's
//!    delta keys deleted (like-state flags get their TTL refreshed instead)
//!
//! A batch that fails rolls back as a whole and leaves its keys in the cache
//! for the next cycle. Keys that cannot be parsed are skipped and left alone.
//! Flushing is at-least-once: if the delete after a commit fails, those deltas
//! are applied again on the next cycle.

use counter_cache::{ttl, CounterKey, CounterNamespace, KeyValueCache};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AggregationSettings;
use crate::metrics;
use crate::repository::{CounterStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationConfig {
    pub interval: Duration,
    /// Keys per durable transaction
    pub batch_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&AggregationSettings> for AggregationConfig {
    fn from(settings: &AggregationSettings) -> Self {
        Self {
            interval: settings.interval(),
            batch_size: settings.batch_size,
        }
    }
}

/// Outcome of one namespace pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub namespace: String,
    /// Keys returned by the scan
    pub scanned: usize,
    /// Keys whose value reached the durable store
    pub flushed: usize,
    /// Keys left in the cache because the key or its value did not parse
    pub skipped: usize,
    /// Batches rolled back
    pub failed_batches: usize,
    /// The scan or bulk read failed, so nothing in this namespace was touched
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub passes: Vec<PassReport>,
    pub duration_ms: u64,
}

impl CycleReport {
    pub fn pass(&self, namespace: CounterNamespace) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.namespace == namespace.as_str())
    }

    pub fn flushed(&self) -> usize {
        self.passes.iter().map(|p| p.flushed).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.passes.iter().map(|p| p.failed_batches).sum()
    }
}

/// Durable write recovered from one cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingWrite {
    Views { video_id: i64, delta: i64 },
    Likes { video_id: i64, delta: i64 },
    CategoryScore { user_id: i64, category_id: i64, delta: i64 },
    LikeState { user_id: i64, video_id: i64, liked: bool },
}

#[derive(Debug, Clone)]
struct PendingEntry {
    key: String,
    write: PendingWrite,
}

/// Why a scanned key was left in the cache
#[derive(Debug)]
enum SkipReason {
    Key(String),
    Value(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Key(msg) => write!(f, "unparseable key: {}", msg),
            SkipReason::Value(msg) => write!(f, "unparseable value: {}", msg),
        }
    }
}

/// Turn a scanned key and its value into a durable write.
/// `Ok(None)` means the key vanished between SCAN and MGET.
fn parse_entry(
    namespace: CounterNamespace,
    key: &str,
    value: Option<&str>,
) -> Result<Option<PendingWrite>, SkipReason> {
    let counter = CounterKey::parse(key).map_err(|e| SkipReason::Key(e.to_string()))?;
    if counter.namespace() != namespace {
        return Err(SkipReason::Key(format!(
            "{} does not belong to {}",
            key, namespace
        )));
    }

    let raw = match value {
        None => return Ok(None),
        Some(raw) => raw.trim(),
    };
    if raw.is_empty() {
        return Err(SkipReason::Value("empty".to_string()));
    }

    let delta = || {
        raw.parse::<i64>()
            .map_err(|_| SkipReason::Value(format!("{:?} is not an integer", raw)))
    };

    let write = match counter {
        CounterKey::VideoViews { video_id } => PendingWrite::Views {
            video_id,
            delta: delta()?,
        },
        CounterKey::VideoLikes { video_id } => PendingWrite::Likes {
            video_id,
            delta: delta()?,
        },
        CounterKey::UserCategoryLikes {
            user_id,
            category_id,
        } => PendingWrite::CategoryScore {
            user_id,
            category_id,
            delta: delta()?,
        },
        CounterKey::UserVideoLike { user_id, video_id } => {
            let liked = match raw {
                "1" => true,
                "0" => false,
                other => {
                    return Err(SkipReason::Value(format!(
                        "{:?} is not a like flag",
                        other
                    )))
                }
            };
            PendingWrite::LikeState {
                user_id,
                video_id,
                liked,
            }
        }
    };

    Ok(Some(write))
}

pub struct AggregationScheduler {
    cache: Arc<dyn KeyValueCache>,
    store: Arc<dyn CounterStore>,
    config: AggregationConfig,
    /// Serializes timer-driven and manual cycles
    cycle_lock: Mutex<()>,
}

impl AggregationScheduler {
    pub fn new(
        cache: Arc<dyn KeyValueCache>,
        store: Arc<dyn CounterStore>,
        config: AggregationConfig,
    ) -> Self {
        let config = AggregationConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };

        Self {
            cache,
            store,
            config,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> AggregationConfig {
        self.config
    }

    /// Run one full cycle now. Waits for any cycle already in progress.
    pub async fn run_cycle(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;

        let cycle_id = Uuid::new_v4();
        let start = Instant::now();
        debug!(cycle_id = %cycle_id, "Starting aggregation cycle");

        let mut passes = Vec::with_capacity(CounterNamespace::ALL.len());
        for namespace in CounterNamespace::ALL {
            passes.push(self.run_pass(cycle_id, namespace).await);
        }

        let elapsed = start.elapsed();
        metrics::record_cycle_duration(elapsed);

        let report = CycleReport {
            cycle_id,
            passes,
            duration_ms: elapsed.as_millis() as u64,
        };

        info!(
            cycle_id = %cycle_id,
            flushed = report.flushed(),
            failed_batches = report.failed_batches(),
            elapsed_ms = report.duration_ms,
            "Aggregation cycle completed"
        );

        report
    }

    async fn run_pass(&self, cycle_id: Uuid, namespace: CounterNamespace) -> PassReport {
        let mut report = PassReport {
            namespace: namespace.as_str().to_string(),
            ..PassReport::default()
        };

        let keys = match self.cache.scan_prefix(namespace.prefix()).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(cycle_id = %cycle_id, namespace = %namespace, error = %e, "Scan failed");
                report.aborted = true;
                return report;
            }
        };
        report.scanned = keys.len();
        if keys.is_empty() {
            return report;
        }

        let values = match self.cache.mget(&keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                error!(
                    cycle_id = %cycle_id,
                    namespace = %namespace,
                    expected = keys.len(),
                    got = values.len(),
                    "Bulk read returned misaligned values"
                );
                report.aborted = true;
                return report;
            }
            Err(e) => {
                error!(
                    cycle_id = %cycle_id,
                    namespace = %namespace,
                    error = %e,
                    "Bulk read failed"
                );
                report.aborted = true;
                return report;
            }
        };

        let mut pending = Vec::with_capacity(keys.len());
        for (key, value) in keys.into_iter().zip(values) {
            match parse_entry(namespace, &key, value.as_deref()) {
                Ok(Some(write)) => pending.push(PendingEntry { key, write }),
                Ok(None) => {}
                Err(reason) => {
                    warn!(cycle_id = %cycle_id, key = %key, reason = %reason, "Skipping key");
                    report.skipped += 1;
                }
            }
        }
        if report.skipped > 0 {
            metrics::record_keys_skipped(namespace.as_str(), report.skipped);
        }

        for (index, batch) in pending.chunks(self.config.batch_size).enumerate() {
            match self.flush_batch(batch).await {
                Ok(()) => {
                    self.settle_batch(cycle_id, namespace, batch).await;
                    report.flushed += batch.len();
                    metrics::record_keys_flushed(namespace.as_str(), batch.len());
                    debug!(
                        cycle_id = %cycle_id,
                        namespace = %namespace,
                        batch = index,
                        keys = batch.len(),
                        "Batch flushed"
                    );
                }
                Err(e) => {
                    error!(
                        cycle_id = %cycle_id,
                        namespace = %namespace,
                        batch = index,
                        keys = batch.len(),
                        error = %e,
                        "Batch rolled back, keys retried next cycle"
                    );
                    report.failed_batches += 1;
                    metrics::record_batch_failure(namespace.as_str());
                }
            }
        }

        info!(
            cycle_id = %cycle_id,
            namespace = %namespace,
            scanned = report.scanned,
            flushed = report.flushed,
            skipped = report.skipped,
            failed_batches = report.failed_batches,
            "Aggregation pass completed"
        );

        report
    }

    /// Apply one batch inside a single transaction. Any error drops the
    /// transaction, which rolls it back.
    async fn flush_batch(&self, batch: &[PendingEntry]) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;

        for entry in batch {
            match entry.write {
                // Zero deltas need no write; the key is still cleared below
                PendingWrite::Views { delta: 0, .. }
                | PendingWrite::Likes { delta: 0, .. }
                | PendingWrite::CategoryScore { delta: 0, .. } => {}
                PendingWrite::Views { video_id, delta } => {
                    tx.increment_video_views(video_id, delta).await?;
                }
                PendingWrite::Likes { video_id, delta } => {
                    tx.increment_video_likes(video_id, delta).await?;
                }
                PendingWrite::CategoryScore {
                    user_id,
                    category_id,
                    delta,
                } => {
                    tx.upsert_user_category_like(user_id, category_id, delta)
                        .await?;
                }
                PendingWrite::LikeState {
                    user_id,
                    video_id,
                    liked,
                } => {
                    tx.upsert_user_video_like(user_id, video_id, liked).await?;
                }
            }
        }

        tx.commit().await
    }

    /// Post-commit cache cleanup: delete delta keys, refresh like flags.
    async fn settle_batch(
        &self,
        cycle_id: Uuid,
        namespace: CounterNamespace,
        batch: &[PendingEntry],
    ) {
        if namespace.is_delta() {
            let keys: Vec<String> = batch.iter().map(|entry| entry.key.clone()).collect();
            if let Err(e) = self.cache.delete(&keys).await {
                error!(
                    cycle_id = %cycle_id,
                    namespace = %namespace,
                    keys = keys.len(),
                    error = %e,
                    "Flushed keys could not be deleted and will be applied again"
                );
            }
            return;
        }

        // The flag may have been toggled since the bulk read; refreshing the TTL
        // keeps whatever value is current.
        for entry in batch {
            if let Err(e) = self.cache.expire(&entry.key, ttl::LIKE_STATE).await {
                warn!(
                    cycle_id = %cycle_id,
                    key = %entry.key,
                    error = %e,
                    "Failed to refresh like state TTL"
                );
            }
        }
    }

    /// Spawn the timer loop. The first cycle runs one interval after start.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                interval_secs = period.as_secs(),
                batch_size = self.config.batch_size,
                "Starting aggregation scheduler"
            );

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }

            info!("Aggregation scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running scheduler loop. Dropping it also ends the loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for it to exit. A cycle already in progress
    /// finishes first; no new cycle starts afterwards.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Aggregation scheduler task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_entries() {
        assert_eq!(
            parse_entry(CounterNamespace::VideoViews, "video:views:42", Some("3")).unwrap(),
            Some(PendingWrite::Views {
                video_id: 42,
                delta: 3
            })
        );
        assert_eq!(
            parse_entry(
                CounterNamespace::UserCategoryLikes,
                "user:category:likes:7:9",
                Some("-1")
            )
            .unwrap(),
            Some(PendingWrite::CategoryScore {
                user_id: 7,
                category_id: 9,
                delta: -1
            })
        );
    }

    #[test]
    fn test_parse_like_flag() {
        assert_eq!(
            parse_entry(CounterNamespace::UserVideoLike, "user:like:7:42", Some("0")).unwrap(),
            Some(PendingWrite::LikeState {
                user_id: 7,
                video_id: 42,
                liked: false
            })
        );
        let bad_flag = parse_entry(CounterNamespace::UserVideoLike, "user:like:7:42", Some("yes"));
        assert!(bad_flag.is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            parse_entry(CounterNamespace::VideoViews, "video:views:42:extra", Some("1")),
            Err(SkipReason::Key(_))
        ));
        assert!(matches!(
            parse_entry(CounterNamespace::VideoViews, "video:views:abc", Some("1")),
            Err(SkipReason::Key(_))
        ));
        assert!(matches!(
            parse_entry(CounterNamespace::VideoViews, "video:views:1", Some("")),
            Err(SkipReason::Value(_))
        ));
        assert!(matches!(
            parse_entry(CounterNamespace::VideoLikes, "video:views:1", Some("1")),
            Err(SkipReason::Key(_))
        ));
        assert_eq!(
            parse_entry(CounterNamespace::VideoViews, "video:views:1", None).unwrap(),
            None
        );
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let scheduler = AggregationScheduler::new(
            Arc::new(counter_cache::InMemoryCache::new()),
            Arc::new(crate::repository::InMemoryCounterStore::new()),
            AggregationConfig {
                interval: Duration::from_secs(1),
                batch_size: 0,
            },
        );
        assert_eq!(scheduler.config().batch_size, 1);
    }
}
