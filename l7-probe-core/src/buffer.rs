//! The append-only raw byte window each direction of a connection is
//! accumulated into (component C2 of the spec).

use bytes::{Buf, BytesMut};

/// An append-only byte window with a logical read cursor.
///
/// `data` holds every byte from the last compaction point to the tail;
/// `cursor` is the logical read position within `data`. Consumed bytes are
/// not dropped immediately — only once the consumed region passes
/// `compaction_threshold` do we physically `advance` the buffer and rebase
/// `base_offset`, so that a caller holding a `peek`'d slice from moments ago
/// isn't invalidated by every single `consume`.
pub struct RawBuffer {
    data: BytesMut,
    cursor: usize,
    base_offset: u64,
    cap: usize,
    compaction_threshold: usize,
    desynced: bool,
}

impl RawBuffer {
    pub fn new(cap: usize, compaction_threshold: usize) -> Self {
        Self {
            data: BytesMut::new(),
            cursor: 0,
            base_offset: 0,
            cap,
            compaction_threshold,
            desynced: false,
        }
    }

    /// Append `chunk` to the tail. Returns the number of oldest bytes
    /// dropped to keep total retained bytes within `cap`; a non-zero return
    /// is one `ResourceExhausted` event (§7).
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        self.data.extend_from_slice(chunk);
        self.compact();
        self.enforce_cap()
    }

    /// A slice of up to `n` bytes starting at the cursor, without advancing.
    pub fn peek(&self, n: usize) -> &[u8] {
        let avail = self.data.len() - self.cursor;
        let take = n.min(avail);
        &self.data[self.cursor..self.cursor + take]
    }

    /// Advance the cursor by `n` bytes (clamped to what's available).
    pub fn consume(&mut self, n: usize) {
        let avail = self.data.len() - self.cursor;
        self.cursor += n.min(avail);
        self.compact();
    }

    /// Bytes available from the cursor to the tail.
    pub fn len(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute offset (monotonically non-decreasing) of the byte at the
    /// cursor.
    pub fn absolute_offset_at_cursor(&self) -> u64 {
        self.base_offset + self.cursor as u64
    }

    pub fn desynced(&self) -> bool {
        self.desynced
    }

    /// Discard all buffered bytes, keeping the absolute offset monotonic.
    pub fn reset(&mut self) {
        self.base_offset += self.data.len() as u64;
        self.data.clear();
        self.cursor = 0;
        self.desynced = false;
    }

    /// Advance the logical offset by `n` bytes that were never observed
    /// (a truncated data event: `submitted_byte_length < actual_byte_length`,
    /// §9). No buffered data moves — there is none to move — but every byte
    /// position downstream of here is now off by `n` relative to what the
    /// peer actually sent, so the stream is marked desynced the same way an
    /// overflow-drop would.
    pub fn skip_gap(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.base_offset += n as u64;
        self.desynced = true;
    }

    fn compact(&mut self) {
        if self.cursor >= self.compaction_threshold {
            self.data.advance(self.cursor);
            self.base_offset += self.cursor as u64;
            self.cursor = 0;
        }
    }

    fn enforce_cap(&mut self) -> usize {
        let mut dropped = 0;
        if self.data.len() > self.cap {
            let excess = self.data.len() - self.cap;
            self.data.advance(excess);
            self.base_offset += excess as u64;
            self.cursor = self.cursor.saturating_sub(excess);
            self.desynced = true;
            dropped = excess;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_offset_is_monotonic_across_append_and_consume() {
        let mut buf = RawBuffer::new(1024, 16);
        let mut last = buf.absolute_offset_at_cursor();
        for i in 0..200u8 {
            buf.append(&[i; 3]);
            buf.consume(2);
            let now = buf.absolute_offset_at_cursor();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn peek_does_not_advance() {
        let mut buf = RawBuffer::new(1024, 16);
        buf.append(b"hello world");
        assert_eq!(buf.peek(5), b"hello");
        assert_eq!(buf.peek(5), b"hello");
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn overflow_drops_oldest_bytes_and_marks_desynced() {
        let mut buf = RawBuffer::new(1_048_576, 4096);
        let chunk = vec![0xAB; 1_572_864]; // 1.5 MiB
        let dropped = buf.append(&chunk);
        assert_eq!(dropped, 524_288); // exactly 0.5 MiB discarded
        assert!(buf.desynced());
        assert_eq!(buf.len(), 1_048_576);
    }

    #[test]
    fn byte_order_preserved_within_one_direction() {
        let mut buf = RawBuffer::new(1024, 4);
        buf.append(b"abc");
        buf.append(b"def");
        assert_eq!(buf.peek(6), b"abcdef");
    }

    #[test]
    fn skip_gap_advances_offset_without_touching_data() {
        let mut buf = RawBuffer::new(1024, 16);
        buf.append(b"abc");
        let before = buf.absolute_offset_at_cursor();
        buf.skip_gap(100);
        assert_eq!(buf.absolute_offset_at_cursor(), before + 100);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.peek(3), b"abc");
        assert!(buf.desynced());
    }

    proptest::proptest! {
        /// §4.2's "absolute offset is monotonically non-decreasing" invariant,
        /// driven with arbitrary append/consume interleavings instead of the
        /// fixed pattern above.
        #[test]
        fn cursor_offset_never_goes_backward(
            ops in proptest::collection::vec(
                (proptest::bool::ANY, 0usize..24, proptest::collection::vec(proptest::num::u8::ANY, 0..24)),
                0..64,
            ),
        ) {
            let mut buf = RawBuffer::new(4096, 32);
            let mut last = buf.absolute_offset_at_cursor();
            for (do_consume, consume_n, chunk) in ops {
                if do_consume {
                    buf.consume(consume_n);
                } else {
                    buf.append(&chunk);
                }
                let now = buf.absolute_offset_at_cursor();
                proptest::prop_assert!(now >= last);
                last = now;
            }
        }

        /// Retained bytes never exceed `cap` regardless of append sizes.
        #[test]
        fn append_never_exceeds_cap(chunks in proptest::collection::vec(
            proptest::collection::vec(proptest::num::u8::ANY, 0..500),
            0..10,
        )) {
            let mut buf = RawBuffer::new(1024, 64);
            for chunk in chunks {
                buf.append(&chunk);
                proptest::prop_assert!(buf.len() <= 1024);
            }
        }
    }
}
