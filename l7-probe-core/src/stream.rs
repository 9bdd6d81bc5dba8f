//! Component C4: a `DataStream` drives one direction's [`RawBuffer`] through
//! its protocol [`FrameExtractor`], turning accumulated bytes into a queue
//! of [`Frame`]s with resynchronisation on parse failure and a stuck-counter
//! reset when resynchronisation itself keeps failing.

use std::collections::VecDeque;

use l7_probe_common::Direction;

use crate::buffer::RawBuffer;
use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::Frame;
use crate::telemetry::Metrics;

/// A single direction's byte stream plus its protocol extractor.
pub struct DataStream {
    direction: Direction,
    buffer: RawBuffer,
    extractor: Box<dyn FrameExtractor + Send>,
    queue: VecDeque<Frame>,
    queue_cap: usize,
    stuck_count: u32,
    stuck_threshold: u32,
    max_parse_window_bytes: usize,
    resyncs: u64,
    resets: u64,
}

impl DataStream {
    pub fn new(
        direction: Direction,
        extractor: Box<dyn FrameExtractor + Send>,
        buffer_cap: usize,
        compaction_threshold: usize,
        queue_cap: usize,
        stuck_threshold: u32,
        max_parse_window_bytes: usize,
    ) -> Self {
        Self {
            direction,
            buffer: RawBuffer::new(buffer_cap, compaction_threshold),
            extractor,
            queue: VecDeque::new(),
            queue_cap,
            stuck_count: 0,
            stuck_threshold,
            max_parse_window_bytes,
            resyncs: 0,
            resets: 0,
        }
    }

    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    /// Append newly arrived bytes and drive the extractor to completion:
    /// every frame that can be fully parsed from the buffered bytes right
    /// now is pushed onto the internal frame queue.
    pub fn append(&mut self, chunk: &[u8], timestamp_ns: u64, metrics: &Metrics) {
        let dropped = self.buffer.append(chunk);
        if dropped > 0 {
            metrics.buffer_bytes_dropped_total.add(dropped as u64, &[]);
        }
        self.drain(timestamp_ns, metrics);
    }

    fn drain(&mut self, timestamp_ns: u64, metrics: &Metrics) {
        loop {
            let window = self.buffer.peek(self.max_parse_window_bytes);
            if window.is_empty() {
                return;
            }
            let offset = self.buffer.absolute_offset_at_cursor();
            match self.extractor.parse_one(self.direction, window, timestamp_ns, offset) {
                ParseOutcome::Success { frame, consumed } => {
                    self.stuck_count = 0;
                    self.buffer.consume(consumed);
                    metrics.frames_classified_total.add(1, &[]);
                    if self.queue.len() >= self.queue_cap {
                        self.queue.pop_front();
                        metrics.frame_queue_dropped_total.add(1, &[]);
                    }
                    self.queue.push_back(frame);
                }
                ParseOutcome::NeedsMore => return,
                ParseOutcome::Invalid => {
                    metrics.frames_invalid_total.add(1, &[]);
                    match self.extractor.find_boundary(self.direction, &window[1..]) {
                        Some(skip) => {
                            self.buffer.consume(skip + 1);
                            self.resyncs += 1;
                            metrics.stream_resyncs_total.add(1, &[]);
                            self.stuck_count += 1;
                        }
                        None => {
                            self.stuck_count += 1;
                        }
                    }
                    if self.stuck_count >= self.stuck_threshold {
                        self.buffer.reset();
                        self.resets += 1;
                        self.stuck_count = 0;
                        metrics.stream_resets_total.add(1, &[]);
                        return;
                    }
                }
            }
        }
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// The next frame this stream would hand back from [`Self::pop_frame`],
    /// without removing it — lets a caller interleave two streams'
    /// frames by arrival timestamp.
    pub fn peek_frame(&self) -> Option<&Frame> {
        self.queue.front()
    }

    pub fn has_frames(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn desynced(&self) -> bool {
        self.buffer.desynced()
    }

    /// Advance the raw buffer's logical offset by `n` bytes that were never
    /// observed — a truncated data event (§9). See [`RawBuffer::skip_gap`].
    pub fn skip_gap(&mut self, n: usize) {
        self.buffer.skip_gap(n);
    }
}
