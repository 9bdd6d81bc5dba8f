//! Cassandra CQL native protocol inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_cql_type`
//! (`__CQL_MINSIZE = 9`): byte 0's high bit (`0x80`) marks a response frame,
//! clear marks a request; the low nibble is the protocol version. Byte 4 is
//! the opcode.

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

const CQL_MINSIZE: usize = 9;

const OPCODE_ERROR: u8 = 0x00;
const OPCODE_STARTUP: u8 = 0x01;
const OPCODE_READY: u8 = 0x02;
const OPCODE_AUTHENTICATE: u8 = 0x03;
const OPCODE_OPTIONS: u8 = 0x05;
const OPCODE_SUPPORTED: u8 = 0x06;
const OPCODE_QUERY: u8 = 0x07;
const OPCODE_RESULT: u8 = 0x08;
const OPCODE_PREPARE: u8 = 0x09;
const OPCODE_EXECUTE: u8 = 0x0a;
const OPCODE_REGISTER: u8 = 0x0b;
const OPCODE_EVENT: u8 = 0x0c;
const OPCODE_BATCH: u8 = 0x0d;
const OPCODE_AUTH_CHALLENGE: u8 = 0x0e;
const OPCODE_AUTH_RESPONSE: u8 = 0x0f;
const OPCODE_AUTH_SUCCESS: u8 = 0x10;

#[derive(Clone, Debug, Default)]
pub struct CqlFrame {
    pub version: u8,
    pub opcode: u8,
    pub stream_id: i16,
    pub body_len: u32,
}

/// Request-only opcodes: STARTUP, OPTIONS, QUERY, PREPARE, EXECUTE,
/// REGISTER, BATCH, AUTH_RESPONSE.
fn is_request_opcode(op: u8) -> bool {
    matches!(
        op,
        OPCODE_STARTUP
            | OPCODE_OPTIONS
            | OPCODE_QUERY
            | OPCODE_PREPARE
            | OPCODE_EXECUTE
            | OPCODE_REGISTER
            | OPCODE_BATCH
            | OPCODE_AUTH_RESPONSE
    )
}

/// Response-only opcodes: ERROR, READY, AUTHENTICATE, SUPPORTED, RESULT,
/// EVENT, AUTH_CHALLENGE, AUTH_SUCCESS.
fn is_response_opcode(op: u8) -> bool {
    matches!(
        op,
        OPCODE_ERROR
            | OPCODE_READY
            | OPCODE_AUTHENTICATE
            | OPCODE_SUPPORTED
            | OPCODE_RESULT
            | OPCODE_EVENT
            | OPCODE_AUTH_CHALLENGE
            | OPCODE_AUTH_SUCCESS
    )
}

fn header_version_ok(buf: &[u8]) -> bool {
    if buf.len() < CQL_MINSIZE {
        return false;
    }
    let version = buf[0] & 0x7f;
    // flags (byte 1) high nibble must be zero.
    (version == 3 || version == 4 || version == 5) && buf[1] & 0xf0 == 0
}

/// C1 classification, per spec §4.1: version + flags shape check, then the
/// direction bit (byte 0 MSB) must agree with the opcode's request/response
/// set — not just be *a* known opcode (the source's `__get_cql_type` keys
/// classification on the direction bit alone; the spec tightens this to
/// reject a direction bit that disagrees with the opcode).
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if !header_version_ok(buf) {
        return None;
    }
    let is_response_bit = buf[0] & 0x80 != 0;
    let opcode = buf[4];
    if is_response_bit && is_response_opcode(opcode) {
        Some(MessageKind::Response)
    } else if !is_response_bit && is_request_opcode(opcode) {
        Some(MessageKind::Request)
    } else {
        None
    }
}

#[derive(Default)]
pub struct Extractor;

impl FrameExtractor for Extractor {
    fn find_boundary(&self, direction: Direction, buf: &[u8]) -> Option<usize> {
        if infer(buf, direction).is_some() {
            Some(0)
        } else {
            None
        }
    }

    fn parse_one(
        &mut self,
        _direction: Direction,
        buf: &[u8],
        timestamp_ns: u64,
        offset: u64,
    ) -> ParseOutcome {
        if buf.len() < CQL_MINSIZE {
            return ParseOutcome::NeedsMore;
        }
        let kind = match infer(buf, Direction::Egress) {
            Some(k) => k,
            None => return ParseOutcome::Invalid,
        };
        let body_len = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
        let total_len = CQL_MINSIZE + body_len as usize;
        if buf.len() < total_len {
            return ParseOutcome::NeedsMore;
        }
        let frame = Frame {
            kind,
            timestamp_ns,
            offset,
            consumed: total_len,
            payload: ProtoFrame::Cql(CqlFrame {
                version: buf[0] & 0x7f,
                opcode: buf[4],
                stream_id: i16::from_be_bytes([buf[2], buf[3]]),
                body_len,
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

    fn header(version_bit: u8, opcode: u8, body_len: u32) -> Vec<u8> {
        let mut v = vec![version_bit | 0x04, 0x00, 0x00, 0x01, opcode];
        v.extend_from_slice(&body_len.to_be_bytes());
        v
    }

    #[test]
    fn request_bit_clear() {
        let buf = header(0x00, OPCODE_QUERY, 0);
        assert_eq!(infer(&buf, Direction::Egress), Some(MessageKind::Request));
    }

    #[test]
    fn response_bit_set() {
        let buf = header(0x80, OPCODE_RESULT, 0);
        assert_eq!(infer(&buf, Direction::Ingress), Some(MessageKind::Response));
    }

    #[test]
    fn direction_bit_disagreeing_with_opcode_is_rejected() {
        // QUERY is a request-only opcode; tagging it with the response bit
        // set must not classify, even though QUERY is otherwise valid.
        let buf = header(0x80, OPCODE_QUERY, 0);
        assert_eq!(infer(&buf, Direction::Ingress), None);
    }

    #[test]
    fn nonzero_flags_nibble_is_rejected() {
        let mut buf = header(0x00, OPCODE_QUERY, 0);
        buf[1] = 0x10;
        assert_eq!(infer(&buf, Direction::Egress), None);
    }

    #[test]
    fn waits_for_body() {
        let mut buf = header(0x00, OPCODE_QUERY, 10);
        buf.truncate(CQL_MINSIZE); // no body bytes appended
        let mut ext = Extractor;
        assert!(matches!(
            ext.parse_one(Direction::Egress, &buf, 0, 0),
            ParseOutcome::NeedsMore
        ));
    }
}
