//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Primary events stored (monotonic)
    events_accepted: AtomicU64,
    /// Events since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Ingest latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    events_rejected: AtomicU64,
    heartbeats: AtomicU64,
    synthesized: AtomicU64,
    /// Synthesized events refused by the depth guard or the store
    synth_dropped: AtomicU64,
    store_failures: AtomicU64,
    enrichment_queued: AtomicU64,
    /// Enrichment jobs dropped due to queue full (monotonic)
    enrichment_dropped: AtomicU64,
    enrichment_completed: AtomicU64,
    enrichment_failed: AtomicU64,
    /// Enrichment queue delay histogram (time from enqueue to worker pickup)
    enrichment_delay_buckets: [AtomicU64; NUM_BUCKETS],
    enrichment_delay_sum_us: AtomicU64,
    enrichment_delay_max_us: AtomicU64,
    rule_failures: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_dropped: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_accepted: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            events_rejected: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            synthesized: AtomicU64::new(0),
            synth_dropped: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            enrichment_queued: AtomicU64::new(0),
            enrichment_dropped: AtomicU64::new(0),
            enrichment_completed: AtomicU64::new(0),
            enrichment_failed: AtomicU64::new(0),
            enrichment_delay_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            enrichment_delay_sum_us: AtomicU64::new(0),
            enrichment_delay_max_us: AtomicU64::new(0),
            rule_failures: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a stored primary event and its ingest latency (lock-free)
    #[inline]
    pub fn record_event_accepted(&self, latency_us: u64) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_synthesized(&self) {
        self.synthesized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_synth_dropped(&self) {
        self.synth_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enrichment_queued(&self) {
        self.enrichment_queued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enrichment_dropped(&self) {
        self.enrichment_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enrichment_completed(&self) {
        self.enrichment_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enrichment_failed(&self) {
        self.enrichment_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time an enrichment job waited in the queue (lock-free)
    #[inline]
    pub fn record_enrichment_delay(&self, delay_us: u64) {
        self.enrichment_delay_sum_us.fetch_add(delay_us, Ordering::Relaxed);
        update_atomic_max(&self.enrichment_delay_max_us, delay_us);
        self.enrichment_delay_buckets[bucket_index(delay_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rule_failure(&self) {
        self.rule_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_accepted(&self) -> u64 {
        self.events_accepted.load(Ordering::Relaxed)
    }

    pub fn events_rejected(&self) -> u64 {
        self.events_rejected.load(Ordering::Relaxed)
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    pub fn synthesized(&self) -> u64 {
        self.synthesized.load(Ordering::Relaxed)
    }

    pub fn synth_dropped(&self) -> u64 {
        self.synth_dropped.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    pub fn enrichment_queued(&self) -> u64 {
        self.enrichment_queued.load(Ordering::Relaxed)
    }

    pub fn enrichment_dropped(&self) -> u64 {
        self.enrichment_dropped.load(Ordering::Relaxed)
    }

    pub fn enrichment_completed(&self) -> u64 {
        self.enrichment_completed.load(Ordering::Relaxed)
    }

    pub fn enrichment_failed(&self) -> u64 {
        self.enrichment_failed.load(Ordering::Relaxed)
    }

    pub fn rule_failures(&self) -> u64 {
        self.rule_failures.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    /// Generate a metrics summary and reset periodic counters
    pub fn report(&self, tracked_assets: usize) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let delay_buckets = swap_buckets(&self.enrichment_delay_buckets);
        let delay_sum = self.enrichment_delay_sum_us.swap(0, Ordering::Relaxed);
        let delay_max = self.enrichment_delay_max_us.swap(0, Ordering::Relaxed);
        let delay_count: u64 = delay_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            events_accepted: self.events_accepted(),
            events_per_sec,
            avg_latency_us: if events_count > 0 { latency_sum / events_count } else { 0 },
            max_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            events_rejected: self.events_rejected(),
            heartbeats: self.heartbeats(),
            synthesized: self.synthesized(),
            synth_dropped: self.synth_dropped(),
            store_failures: self.store_failures(),
            enrichment_queued: self.enrichment_queued(),
            enrichment_dropped: self.enrichment_dropped(),
            enrichment_completed: self.enrichment_completed(),
            enrichment_failed: self.enrichment_failed(),
            enrichment_delay_avg_us: if delay_count > 0 { delay_sum / delay_count } else { 0 },
            enrichment_delay_max_us: delay_max,
            enrichment_delay_p99_us: percentile_from_buckets(&delay_buckets, 0.99),
            rule_failures: self.rule_failures(),
            notifications_sent: self.notifications_sent(),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            tracked_assets,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of metrics for a reporting period
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub events_accepted: u64,
    pub events_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    /// Raw histogram bucket counts for this period
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub events_rejected: u64,
    pub heartbeats: u64,
    pub synthesized: u64,
    pub synth_dropped: u64,
    pub store_failures: u64,
    pub enrichment_queued: u64,
    pub enrichment_dropped: u64,
    pub enrichment_completed: u64,
    pub enrichment_failed: u64,
    pub enrichment_delay_avg_us: u64,
    pub enrichment_delay_max_us: u64,
    pub enrichment_delay_p99_us: u64,
    pub rule_failures: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub tracked_assets: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            accepted = %self.events_accepted,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            p99_us = %self.lat_p99_us,
            rejected = %self.events_rejected,
            heartbeats = %self.heartbeats,
            synthesized = %self.synthesized,
            synth_dropped = %self.synth_dropped,
            store_failures = %self.store_failures,
            assets = %self.tracked_assets,
            "metrics"
        );
        info!(
            queued = %self.enrichment_queued,
            dropped = %self.enrichment_dropped,
            completed = %self.enrichment_completed,
            failed = %self.enrichment_failed,
            delay_avg_us = %self.enrichment_delay_avg_us,
            delay_p99_us = %self.enrichment_delay_p99_us,
            rule_failures = %self.rule_failures,
            notifications = %self.notifications_sent,
            notifications_dropped = %self.notifications_dropped,
            "enrichment_metrics"
        );
    }
}
