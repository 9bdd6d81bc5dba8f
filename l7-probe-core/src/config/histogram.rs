use serde::{Deserialize, Serialize};

/// Per-link latency histogram bucket configuration (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Upper bound (exclusive) of each bucket, in nanoseconds, ascending.
    /// A final implicit bucket catches everything above the last bound.
    pub bucket_bounds_ns: Vec<u64>,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        // 100us, 1ms, 10ms, 100ms, 1s, 10s.
        Self {
            bucket_bounds_ns: vec![
                100_000,
                1_000_000,
                10_000_000,
                100_000_000,
                1_000_000_000,
                10_000_000_000,
            ],
        }
    }
}

impl HistogramConfig {
    /// Index of the bucket `latency_ns` falls into (last index = overflow
    /// bucket).
    pub fn bucket_for(&self, latency_ns: u64) -> usize {
        self.bucket_bounds_ns
            .iter()
            .position(|&bound| latency_ns < bound)
            .unwrap_or(self.bucket_bounds_ns.len())
    }

    /// Bucket bounds converted to seconds, the unit `match_latency_seconds`
    /// is recorded in — what actually gets handed to the histogram
    /// instrument as its explicit bucket boundaries.
    pub fn bucket_bounds_seconds(&self) -> Vec<f64> {
        self.bucket_bounds_ns.iter().map(|&ns| ns as f64 / 1_000_000_000.0).collect()
    }
}
