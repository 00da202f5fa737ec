use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept per series; older samples are evicted first
const MAX_LATENCY_SAMPLES: usize = 1024;

type LatencyWindow = RwLock<VecDeque<u64>>;

fn push_sample(window: &LatencyWindow, duration: Duration) {
    let mut samples = window.write();
    if samples.len() == MAX_LATENCY_SAMPLES {
        samples.pop_front();
    }
    samples.push_back(duration.as_millis() as u64);
}

/// Process-wide pipeline metrics.
///
/// Tracks captures, region outcomes, translation calls, cache behavior and
/// stage latencies. Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Capture Metrics
    captures_processed: AtomicUsize,
    captures_failed: AtomicUsize,
    regions_detected: AtomicUsize,
    entries_produced: AtomicUsize,
    regions_dropped: DashMap<String, AtomicUsize>,

    // Translation Metrics
    translation_calls_total: AtomicUsize,
    translation_calls_failed: AtomicUsize,
    translation_latency_ms: LatencyWindow,

    // Cache Metrics
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,

    // Stage Metrics
    detection_duration_ms: LatencyWindow,
    recognition_duration_ms: LatencyWindow,
    capture_duration_ms: LatencyWindow,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                captures_processed: AtomicUsize::new(0),
                captures_failed: AtomicUsize::new(0),
                regions_detected: AtomicUsize::new(0),
                entries_produced: AtomicUsize::new(0),
                regions_dropped: DashMap::new(),
                translation_calls_total: AtomicUsize::new(0),
                translation_calls_failed: AtomicUsize::new(0),
                translation_latency_ms: RwLock::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                detection_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
                recognition_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
                capture_duration_ms: RwLock::new(VecDeque::with_capacity(MAX_LATENCY_SAMPLES)),
                endpoint_counters: DashMap::new(),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Capture Metrics
    pub fn record_capture(&self, regions: usize, entries: usize, duration: Duration) {
        self.inner.captures_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.regions_detected.fetch_add(regions, Ordering::Relaxed);
        self.inner.entries_produced.fetch_add(entries, Ordering::Relaxed);
        push_sample(&self.inner.capture_duration_ms, duration);
    }

    pub fn record_capture_failed(&self) {
        self.inner.captures_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_region_dropped(&self, reason: &str) {
        self.inner
            .regions_dropped
            .entry(reason.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Translation Metrics
    pub fn record_translation(&self, success: bool, duration: Duration) {
        self.inner.translation_calls_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.translation_calls_failed.fetch_add(1, Ordering::Relaxed);
        }
        push_sample(&self.inner.translation_latency_ms, duration);
    }

    // Cache Metrics
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // Stage Metrics
    pub fn record_detection_duration(&self, duration: Duration) {
        push_sample(&self.inner.detection_duration_ms, duration);
    }

    pub fn record_recognition_duration(&self, duration: Duration) {
        push_sample(&self.inner.recognition_duration_ms, duration);
    }

    // Endpoint Metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self.inner.translation_latency_ms.read();
        let translation_latency_avg_ms = avg(&latency);
        let translation_latency_p50_ms = percentile(&latency, 0.5);
        let translation_latency_p95_ms = percentile(&latency, 0.95);
        drop(latency);

        let detection_avg_ms = avg(&self.inner.detection_duration_ms.read());
        let recognition_avg_ms = avg(&self.inner.recognition_duration_ms.read());
        let capture_avg_ms = avg(&self.inner.capture_duration_ms.read());

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        let regions_dropped: BTreeMap<String, usize> = self
            .inner
            .regions_dropped
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        let endpoint_requests: BTreeMap<String, usize> = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            captures_processed: self.inner.captures_processed.load(Ordering::Relaxed),
            captures_failed: self.inner.captures_failed.load(Ordering::Relaxed),
            regions_detected: self.inner.regions_detected.load(Ordering::Relaxed),
            entries_produced: self.inner.entries_produced.load(Ordering::Relaxed),
            regions_dropped,
            translation_calls_total: self.inner.translation_calls_total.load(Ordering::Relaxed),
            translation_calls_failed: self.inner.translation_calls_failed.load(Ordering::Relaxed),
            translation_latency_avg_ms,
            translation_latency_p50_ms,
            translation_latency_p95_ms,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            detection_avg_ms,
            recognition_avg_ms,
            capture_avg_ms,
            endpoint_requests,
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP captures_processed_total Captures that completed detection
# TYPE captures_processed_total counter
captures_processed_total {}

# HELP captures_failed_total Captures whose detection failed
# TYPE captures_failed_total counter
captures_failed_total {}

# HELP regions_detected_total Regions returned by the detector
# TYPE regions_detected_total counter
regions_detected_total {}

# HELP entries_produced_total Translated entries returned to callers
# TYPE entries_produced_total counter
entries_produced_total {}

# HELP translation_calls_total Translation gateway calls
# TYPE translation_calls_total counter
translation_calls_total {}

# HELP translation_calls_failed_total Failed translation gateway calls
# TYPE translation_calls_failed_total counter
translation_calls_failed_total {}

# HELP translation_latency_avg_ms Average translation latency in milliseconds
# TYPE translation_latency_avg_ms gauge
translation_latency_avg_ms {}

# HELP cache_hit_rate Translation cache hit rate (0.0 to 1.0)
# TYPE cache_hit_rate gauge
cache_hit_rate {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms{{stage="detection"}} {}
stage_avg_duration_ms{{stage="recognition"}} {}
stage_avg_duration_ms{{stage="capture"}} {}

# HELP circuit_breaker_trips_total Total circuit breaker trips
# TYPE circuit_breaker_trips_total counter
circuit_breaker_trips_total {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {}
"#,
            snapshot.captures_processed,
            snapshot.captures_failed,
            snapshot.regions_detected,
            snapshot.entries_produced,
            snapshot.translation_calls_total,
            snapshot.translation_calls_failed,
            snapshot.translation_latency_avg_ms,
            snapshot.cache_hit_rate,
            snapshot.detection_avg_ms,
            snapshot.recognition_avg_ms,
            snapshot.capture_avg_ms,
            snapshot.circuit_breaker_trips,
            snapshot.uptime_seconds,
        );

        if !snapshot.regions_dropped.is_empty() {
            out.push_str("\n# HELP regions_dropped_total Regions dropped before producing an entry\n");
            out.push_str("# TYPE regions_dropped_total counter\n");
            for (reason, count) in &snapshot.regions_dropped {
                out.push_str(&format!("regions_dropped_total{{reason=\"{}\"}} {}\n", reason, count));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub captures_processed: usize,
    pub captures_failed: usize,
    pub regions_detected: usize,
    pub entries_produced: usize,
    pub regions_dropped: BTreeMap<String, usize>,
    pub translation_calls_total: usize,
    pub translation_calls_failed: usize,
    pub translation_latency_avg_ms: u64,
    pub translation_latency_p50_ms: u64,
    pub translation_latency_p95_ms: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub detection_avg_ms: u64,
    pub recognition_avg_ms: u64,
    pub capture_avg_ms: u64,
    pub endpoint_requests: BTreeMap<String, usize>,
    pub circuit_breaker_trips: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &VecDeque<u64>, p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = values.iter().copied().collect();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &VecDeque<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_capture(3, 2, Duration::from_millis(120));
        metrics.record_region_dropped("translation");
        metrics.record_translation(true, Duration::from_millis(40));
        metrics.record_translation(false, Duration::from_millis(60));
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_endpoint_request("/process");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.captures_processed, 1);
        assert_eq!(snapshot.regions_detected, 3);
        assert_eq!(snapshot.entries_produced, 2);
        assert_eq!(snapshot.regions_dropped.get("translation"), Some(&1));
        assert_eq!(snapshot.translation_calls_total, 2);
        assert_eq!(snapshot.translation_calls_failed, 1);
        assert_eq!(snapshot.translation_latency_avg_ms, 50);
        assert_eq!(snapshot.cache_hit_rate, 0.5);
        assert_eq!(snapshot.endpoint_requests.get("/process"), Some(&1));
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_capture(4, 4, Duration::from_millis(10));
        metrics.record_region_dropped("empty_text");

        let prometheus = metrics.to_prometheus();
        assert!(prometheus.contains("regions_detected_total 4"));
        assert!(prometheus.contains("regions_dropped_total{reason=\"empty_text\"} 1"));
    }

    #[test]
    fn latency_samples_keep_only_the_newest_window() {
        let metrics = Metrics::new();
        for _ in 0..MAX_LATENCY_SAMPLES {
            metrics.record_translation(true, Duration::from_millis(1000));
        }
        for _ in 0..MAX_LATENCY_SAMPLES + 10 {
            metrics.record_translation(true, Duration::from_millis(10));
            metrics.record_capture(1, 1, Duration::from_millis(5));
        }

        assert_eq!(metrics.inner.translation_latency_ms.read().len(), MAX_LATENCY_SAMPLES);
        assert_eq!(metrics.inner.capture_duration_ms.read().len(), MAX_LATENCY_SAMPLES);

        // The slow samples have all been evicted; counters still see every call
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.translation_latency_avg_ms, 10);
        assert_eq!(snapshot.translation_latency_p95_ms, 10);
        assert_eq!(snapshot.translation_calls_total, 2 * MAX_LATENCY_SAMPLES + 10);
    }
}
