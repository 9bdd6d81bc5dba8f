//! PostgreSQL wire protocol inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_pgsql_type`:
//! a regular (post-startup) message is a 1-byte tag followed by a 4-byte
//! big-endian length (the length field includes itself but not the tag).
//! The source matches request tags `Q` (simple query), `P` (parse), `B`
//! (bind); we additionally recognise the common response tags so replies on
//! the same stream are framed correctly by the extractor, which — like
//! HTTP's — must classify both directions even though C1 only signatures
//! requests.

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

const REQUEST_TAGS: &[u8] = b"QPBEDCSXHF";
const RESPONSE_TAGS: &[u8] = b"RTCZDKNSEAGVv12n3sW";

#[derive(Clone, Debug, Default)]
pub struct PgsqlFrame {
    pub tag: u8,
    pub body_len: u32,
}

fn header_plausible(buf: &[u8], tags: &[u8]) -> bool {
    buf.len() >= 5 && tags.contains(&buf[0])
}

/// C1 classification: `Q\0`, `P\0`, or `B\0` (tag byte plus the length
/// field's leading zero byte) marks a simple query, parse, or bind
/// request, per `__get_pgsql_type`.
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if buf.len() < 5 {
        return None;
    }
    if matches!(buf[0], b'Q' | b'P' | b'B') && buf[1] == 0 {
        Some(MessageKind::Request)
    } else {
        None
    }
}

#[derive(Default)]
pub struct Extractor;

impl FrameExtractor for Extractor {
    fn find_boundary(&self, _direction: Direction, buf: &[u8]) -> Option<usize> {
        for i in 0..buf.len() {
            let w = &buf[i..];
            if header_plausible(w, REQUEST_TAGS) || header_plausible(w, RESPONSE_TAGS) {
                return Some(i);
            }
        }
        None
    }

    fn parse_one(
        &mut self,
        _direction: Direction,
        buf: &[u8],
        timestamp_ns: u64,
        offset: u64,
    ) -> ParseOutcome {
        if buf.len() < 5 {
            return ParseOutcome::NeedsMore;
        }
        let tag = buf[0];
        let kind = if REQUEST_TAGS.contains(&tag) {
            MessageKind::Request
        } else if RESPONSE_TAGS.contains(&tag) {
            MessageKind::Response
        } else {
            return ParseOutcome::Invalid;
        };
        let len_field = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if len_field < 4 {
            return ParseOutcome::Invalid;
        }
        let total_len = 1 + len_field as usize;
        if buf.len() < total_len {
            return ParseOutcome::NeedsMore;
        }
        let frame = Frame {
            kind,
            timestamp_ns,
            offset,
            consumed: total_len,
            payload: ProtoFrame::Pgsql(PgsqlFrame {
                tag,
                body_len: len_field - 4,
            }),
        };
        ParseOutcome::Success {
            frame,
            consumed: total_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_query_is_request() {
        let mut buf = vec![b'Q'];
        buf.extend_from_slice(&12u32.to_be_bytes());
        buf.extend_from_slice(b"select 1");
        assert_eq!(infer(&buf, Direction::Egress), Some(MessageKind::Request));
        let mut ext = Extractor;
        match ext.parse_one(Direction::Egress, &buf, 0, 0) {
            ParseOutcome::Success { consumed, .. } => assert_eq!(consumed, buf.len()),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn command_complete_is_response() {
        let mut buf = vec![b'C'];
        buf.extend_from_slice(&12u32.to_be_bytes());
        buf.extend_from_slice(b"SELECT 1");
        let mut ext = Extractor;
        match ext.parse_one(Direction::Ingress, &buf, 0, 0) {
            ParseOutcome::Success { frame, .. } => assert_eq!(frame.kind, MessageKind::Response),
            _ => panic!("expected success"),
        }
    }
}
