//! MySQL client/server protocol inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_mysql_type`,
//! which carries a small `prev_count`/`prev_buf` scratch on the connection
//! (`sock_conn->info`) so a packet header delivered as its own bare 4-byte
//! data event — with the command byte arriving in the very next event —
//! can still be classified as one signature instead of two too-short
//! fragments. §9 design note: we keep that optimization but move the
//! scratch onto [`crate::tracker::Tracker`] (a Rust connection-level
//! struct) instead of the stream, since the inferrer runs once per
//! unknown-protocol event, before any stream (and its reassembling raw
//! buffer) exists.
//!
//! Note this is distinct from ordinary short-read reassembly, which the
//! raw buffer already handles once a stream exists: this carry only matters
//! at the pre-classification stage, where two consecutive *whole* events —
//! one of them exactly 4 bytes long — would otherwise each fail `infer` on
//! their own.

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

const HEADER_LEN: usize = 4;

/// Tracker-level scratch holding a bare 4-byte MySQL header seen in an
/// unknown-protocol event, in case the very next event is the command byte
/// (and rest of the payload) that completes its signature.
#[derive(Clone, Copy, Debug, Default)]
pub struct Carry {
    header: Option<[u8; HEADER_LEN]>,
}

impl Carry {
    /// Record this event as a pending header if it is exactly a plausible
    /// bare 4-byte MySQL header with no payload bytes yet; otherwise clear
    /// any previously pending header (it was not followed up in time).
    pub fn observe(&mut self, buf: &[u8]) {
        if buf.len() == HEADER_LEN {
            let header: [u8; HEADER_LEN] = buf.try_into().unwrap();
            if header_plausible(&header).is_some() {
                self.header = Some(header);
                return;
            }
        }
        self.header = None;
    }

    /// If a header is pending, splice it in front of `buf` (the next
    /// event's bytes) and hand back the combined signature candidate,
    /// clearing the carry either way — it is consumed on the very next
    /// event regardless of whether that event completes the signature.
    ///
    /// Only splices when `buf`'s length matches the carried header's own
    /// declared payload length: the header's 3-byte length field describes
    /// exactly how many bytes complete the packet, so an unrelated event
    /// that happens to follow a bare header — the real continuation having
    /// been dropped, delayed, or never sent — does not get spliced into a
    /// false-positive candidate.
    pub fn try_combine(&mut self, buf: &[u8]) -> Option<Vec<u8>> {
        let header = self.header.take()?;
        let (payload_len, _) = decode_header(&header);
        if buf.len() as u32 != payload_len {
            return None;
        }
        let mut combined = Vec::with_capacity(HEADER_LEN + buf.len());
        combined.extend_from_slice(&header);
        combined.extend_from_slice(buf);
        Some(combined)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MysqlFrame {
    pub sequence_id: u8,
    pub payload_len: u32,
    pub command: Option<u8>,
}

/// Command bytes the spec's signature recognises as request-only:
/// `COM_QUERY`, `COM_CONNECT`, `COM_STMT_PREPARE`, `COM_STMT_EXECUTE`,
/// `COM_STMT_CLOSE`. Matches `__get_mysql_type`'s explicit command check
/// exactly (the source's own TODO flags a broader 0x00-0x1f range as
/// "too many false positives").
fn is_client_command(byte: u8) -> bool {
    matches!(byte, 0x03 | 0x0b | 0x16 | 0x17 | 0x19)
}

fn decode_header(header: &[u8; HEADER_LEN]) -> (u32, u8) {
    let payload_len = u32::from_le_bytes([header[0], header[1], header[2], 0]);
    (payload_len, header[3])
}

/// C1 classification, per `__get_mysql_type`: 3-byte length + 1-byte
/// sequence-id header, sequence id must be 0, length in `(0, 16 MiB]`, and
/// the 5th byte (the command code) one of the request-only set above.
/// MySQL has no self-describing response tag, so the inferrer only ever
/// returns `Request`; a stream's response side is classified once the
/// tracker already knows the protocol.
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if buf.len() < HEADER_LEN + 1 {
        return None;
    }
    let header: [u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().ok()?;
    let (payload_len, sequence_id) = decode_header(&header);
    if payload_len == 0 || payload_len > 16 * 1024 * 1024 {
        return None;
    }
    if sequence_id != 0 {
        return None;
    }
    if is_client_command(buf[HEADER_LEN]) {
        Some(MessageKind::Request)
    } else {
        None
    }
}

/// Plausibility check on just the 4-byte header, used for framing once the
/// tracker already knows the stream is MySQL — broader than [`infer`],
/// which only ever signatures a request. A response packet has no
/// recognisable command byte, so the extractor accepts any in-range header
/// and falls back to `Response` when the request signature doesn't match.
fn header_plausible(header: &[u8; HEADER_LEN]) -> Option<(u32, u8)> {
    let (payload_len, sequence_id) = decode_header(header);
    if payload_len == 0 || payload_len > 16 * 1024 * 1024 {
        return None;
    }
    Some((payload_len, sequence_id))
}

#[derive(Default)]
pub struct Extractor;

impl FrameExtractor for Extractor {
    fn find_boundary(&self, _direction: Direction, buf: &[u8]) -> Option<usize> {
        if buf.len() >= HEADER_LEN {
            let header: [u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
            if header_plausible(&header).is_some() {
                return Some(0);
            }
        }
        None
    }

    fn parse_one(
        &mut self,
        direction: Direction,
        buf: &[u8],
        timestamp_ns: u64,
        offset: u64,
    ) -> ParseOutcome {
        if buf.len() < HEADER_LEN {
            return ParseOutcome::NeedsMore;
        }
        let header: [u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
        let (payload_len, sequence_id) = match header_plausible(&header) {
            Some(v) => v,
            None => return ParseOutcome::Invalid,
        };
        let total_len = HEADER_LEN + payload_len as usize;
        if buf.len() < total_len {
            return ParseOutcome::NeedsMore;
        }
        let kind = match infer(buf, direction) {
            Some(k) => k,
            None if sequence_id == 0 => MessageKind::Response,
            None => MessageKind::Unknown,
        };
        let command = if kind == MessageKind::Request && total_len > HEADER_LEN {
            Some(buf[HEADER_LEN])
        } else {
            None
        };
        let frame = Frame {
            kind,
            timestamp_ns,
            offset,
            consumed: total_len,
            payload: ProtoFrame::Mysql(MysqlFrame {
                sequence_id,
                payload_len,
                command,
            }),
        };
        ParseOutcome::Success {
            frame,
            consumed: total_len,
        }
    }
}
