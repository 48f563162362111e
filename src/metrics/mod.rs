use prometheus::{Counter, CounterVec, GaugeVec, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Prometheus metrics for the datastore
#[derive(Clone)]
pub struct StoreMetrics {
    // Counters
    pub chunks_appended: CounterVec,
    pub blocks_written: CounterVec,
    pub cache_flushes: CounterVec,
    pub merges_total: Counter,
    pub fingerprints_written: Counter,
    pub fingerprint_bytes: Counter,

    // Gauges
    pub pending_cache_bytes: GaugeVec,

    // Histograms
    pub merge_latency: Histogram,

    // Registry
    registry: Arc<Registry>,
}

impl StoreMetrics {
    /// Create a new StoreMetrics instance
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let chunks_appended = CounterVec::new(
            Opts::new(
                "fingerdb_chunks_appended_total",
                "Chunks appended to posting lists",
            ),
            &["collection"],
        )?;
        registry.register(Box::new(chunks_appended.clone()))?;

        let blocks_written = CounterVec::new(
            Opts::new(
                "fingerdb_blocks_written_total",
                "Whole blocks written to the backing store",
            ),
            &["collection"],
        )?;
        registry.register(Box::new(blocks_written.clone()))?;

        let cache_flushes = CounterVec::new(
            Opts::new("fingerdb_cache_flushes_total", "Block cache flushes"),
            &["collection"],
        )?;
        registry.register(Box::new(cache_flushes.clone()))?;

        let merges_total = Counter::with_opts(Opts::new(
            "fingerdb_merges_total",
            "Delta index merges completed",
        ))?;
        registry.register(Box::new(merges_total.clone()))?;

        let fingerprints_written = Counter::with_opts(Opts::new(
            "fingerdb_fingerprints_written_total",
            "Fingerprints written",
        ))?;
        registry.register(Box::new(fingerprints_written.clone()))?;

        let fingerprint_bytes = Counter::with_opts(Opts::new(
            "fingerdb_fingerprint_bytes_total",
            "Fingerprint bytes written",
        ))?;
        registry.register(Box::new(fingerprint_bytes.clone()))?;

        let pending_cache_bytes = GaugeVec::new(
            Opts::new(
                "fingerdb_pending_cache_bytes",
                "Bytes buffered in the block cache",
            ),
            &["collection"],
        )?;
        registry.register(Box::new(pending_cache_bytes.clone()))?;

        let merge_latency = Histogram::with_opts(
            HistogramOpts::new("fingerdb_merge_latency_seconds", "Delta merge duration")
                .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        )?;
        registry.register(Box::new(merge_latency.clone()))?;

        Ok(Self {
            chunks_appended,
            blocks_written,
            cache_flushes,
            merges_total,
            fingerprints_written,
            fingerprint_bytes,
            pending_cache_bytes,
            merge_latency,
            registry: Arc::new(registry),
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn record_append(&self, collection: &str, pending_bytes: usize) {
        self.chunks_appended.with_label_values(&[collection]).inc();
        self.set_pending(collection, pending_bytes);
    }

    pub fn record_block_write(&self, collection: &str) {
        self.blocks_written.with_label_values(&[collection]).inc();
    }

    pub fn record_flush(&self, collection: &str) {
        self.cache_flushes.with_label_values(&[collection]).inc();
        self.set_pending(collection, 0);
    }

    pub fn set_pending(&self, collection: &str, bytes: usize) {
        self.pending_cache_bytes
            .with_label_values(&[collection])
            .set(bytes as f64);
    }

    pub fn record_merge(&self, duration_secs: f64) {
        self.merges_total.inc();
        self.merge_latency.observe(duration_secs);
    }

    pub fn record_fingerprint(&self, size: usize) {
        self.fingerprints_written.inc();
        self.fingerprint_bytes.inc_by(size as f64);
    }
}
