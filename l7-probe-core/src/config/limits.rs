use serde::{Deserialize, Serialize};

/// Per-stream and tracker-table bounds from the spec's §5.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerLimits {
    /// Hard cap on a stream's raw buffer; oldest bytes dropped on overflow.
    pub raw_buffer_cap_bytes: usize,
    /// Offset past which consumed bytes are physically dropped and the
    /// buffer's base offset rebased.
    pub raw_buffer_compaction_threshold: usize,
    /// Hard cap on a stream's pending-frame queue; oldest frames dropped.
    pub frame_queue_cap: usize,
    /// Buffer growth cap while a tracker's protocol is still unknown
    /// (§4.5: "cap unknown-tracker buffer growth tightly").
    pub unknown_tracker_buffer_cap_bytes: usize,
    /// Max number of trackers held at once; LRU-evicted by last-event time.
    pub max_trackers: usize,
    /// Idle trackers with no events for this long are destroyed.
    pub idle_timeout_ns: u64,
    /// Consecutive INVALID-not-rescued-by-find_boundary results before a
    /// stream is reset.
    pub stuck_threshold: u32,
    /// Max bytes of input a single `parse_one` call may examine.
    pub max_parse_window_bytes: usize,
}

impl Default for TrackerLimits {
    fn default() -> Self {
        Self {
            raw_buffer_cap_bytes: 1024 * 1024,
            raw_buffer_compaction_threshold: 4096,
            frame_queue_cap: 1024,
            unknown_tracker_buffer_cap_bytes: 16 * 1024,
            max_trackers: 100_000,
            idle_timeout_ns: 5 * 60 * 1_000_000_000,
            stuck_threshold: 5,
            max_parse_window_bytes: 8192,
        }
    }
}

/// Matcher tunables from §4.6 and §5.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Unmatched frames older than this are evicted as orphans.
    pub orphan_timeout_ns: u64,
    /// Bounded output queue of matched records; overflow drops the oldest.
    pub output_queue_cap: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { orphan_timeout_ns: 30 * 1_000_000_000, output_queue_cap: 4096 }
    }
}
