//! Operation counters for the cache facades.
//!
//! Every facade owns a [`CacheMetrics`]. Counters are plain atomics and can
//! be rendered in Prometheus text exposition format.
//!
//! # Example
//!
//! ```rust,ignore
//! let snapshot = cache.metrics().snapshot();
//! println!("hit rate: {:.2}%", snapshot.hit_rate() * 100.0);
//! ```

mod counters;

pub use counters::{Counter, LabeledCounter};

/// Counters recorded by a facade.
#[derive(Debug)]
pub struct CacheMetrics {
    /// Total single-key reads.
    pub get_total: Counter,
    /// Reads that found a value.
    pub get_hits: Counter,
    /// Reads that found nothing.
    pub get_misses: Counter,
    /// Writes issued.
    pub set_total: Counter,
    /// Writes skipped because the timeout was negative.
    pub set_skipped: Counter,
    /// Delete requests.
    pub delete_total: Counter,
    /// Loader invocations in `get_or_set`.
    pub loader_invocations: Counter,
    /// `get_or_set` calls that found the stampede lock held.
    pub stampede_lock_hits: Counter,
    /// Increments served by the non-atomic read-modify-write fallback.
    pub incr_fallbacks: Counter,
    /// Backend round trips per shard endpoint.
    pub shard_round_trips: LabeledCounter<1>,
    /// Keys carried by multi-key calls, per shard endpoint.
    pub shard_batch_keys: LabeledCounter<1>,
}

impl CacheMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self {
            get_total: Counter::new("cache_get_total", "Total GET requests"),
            get_hits: Counter::new("cache_get_hits", "GET cache hits"),
            get_misses: Counter::new("cache_get_misses", "GET cache misses"),
            set_total: Counter::new("cache_set_total", "Total SET requests"),
            set_skipped: Counter::new(
                "cache_set_skipped_total",
                "SET requests skipped for a negative timeout",
            ),
            delete_total: Counter::new("cache_delete_total", "Total DELETE requests"),
            loader_invocations: Counter::new(
                "cache_loader_invocations_total",
                "Loader invocations in get_or_set",
            ),
            stampede_lock_hits: Counter::new(
                "cache_stampede_lock_hits_total",
                "get_or_set calls that found the lock held",
            ),
            incr_fallbacks: Counter::new(
                "cache_incr_fallback_total",
                "Increments served by read-modify-write",
            ),
            shard_round_trips: LabeledCounter::new(
                "cache_shard_round_trips_total",
                "Backend round trips per shard",
                ["shard"],
            ),
            shard_batch_keys: LabeledCounter::new(
                "cache_shard_batch_keys_total",
                "Keys sent to each shard by multi-key operations",
                ["shard"],
            ),
        }
    }

    /// Record a single-key read.
    pub fn record_get(&self, hit: bool) {
        self.get_total.inc();
        if hit {
            self.get_hits.inc();
        } else {
            self.get_misses.inc();
        }
    }

    /// Record a write, or a write skipped for a negative timeout.
    pub fn record_set(&self, written: bool) {
        if written {
            self.set_total.inc();
        } else {
            self.set_skipped.inc();
        }
    }

    /// Record a round trip to `shard`.
    pub fn record_round_trip(&self, shard: &str) {
        self.shard_round_trips.inc([shard]);
    }

    /// Record `keys` keys sent to `shard` in one multi-key call.
    pub fn record_batch(&self, shard: &str, keys: usize) {
        self.shard_batch_keys.inc_by([shard], keys as u64);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            get_total: self.get_total.get(),
            get_hits: self.get_hits.get(),
            get_misses: self.get_misses.get(),
            set_total: self.set_total.get(),
            set_skipped: self.set_skipped.get(),
            delete_total: self.delete_total.get(),
            loader_invocations: self.loader_invocations.get(),
            stampede_lock_hits: self.stampede_lock_hits.get(),
            incr_fallbacks: self.incr_fallbacks.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        macro_rules! add_counter {
            ($metric:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
                    $metric.name(),
                    $metric.help(),
                    $metric.name(),
                    $metric.name(),
                    $metric.get()
                ));
            };
        }

        add_counter!(self.get_total);
        add_counter!(self.get_hits);
        add_counter!(self.get_misses);
        add_counter!(self.set_total);
        add_counter!(self.set_skipped);
        add_counter!(self.delete_total);
        add_counter!(self.loader_invocations);
        add_counter!(self.stampede_lock_hits);
        add_counter!(self.incr_fallbacks);

        for family in [&self.shard_round_trips, &self.shard_batch_keys] {
            let name = family.name();
            output.push_str(&format!(
                "# HELP {} {}\n# TYPE {} counter\n",
                name,
                family.help(),
                name
            ));
            let mut shards = family.get_all();
            shards.sort();
            for ([shard], value) in shards {
                output.push_str(&format!("{}{{shard=\"{}\"}} {}\n", name, shard, value));
            }
        }

        output
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of cache metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub get_total: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub set_total: u64,
    pub set_skipped: u64,
    pub delete_total: u64,
    pub loader_invocations: u64,
    pub stampede_lock_hits: u64,
    pub incr_fallbacks: u64,
}

impl MetricsSnapshot {
    /// Calculate the cache hit rate.
    pub fn hit_rate(&self) -> f64 {
        if self.get_total == 0 {
            0.0
        } else {
            self.get_hits as f64 / self.get_total as f64
        }
    }
}
