//! Redis (RESP) inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_redis_type`
//! (`__REDIS_MIN_SIZE = 6`, leading type-byte match). RESP has five framing
//! types: simple string `+`, error `-`, integer `:`, bulk string `$`, array
//! `*`. Clients issue commands as arrays of bulk strings (`*`); servers reply
//! with any of the five. We classify by the leading byte plus the presence
//! of a following inline command name for arrays, since a bare `*` prefix is
//! ambiguous between a request and a multi-bulk reply.

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

const REDIS_MIN_SIZE: usize = 6;

#[derive(Clone, Debug, Default)]
pub struct RedisFrame {
    pub type_byte: u8,
    pub element_count: Option<i64>,
}

fn find_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_int_line(buf: &[u8]) -> Option<(i64, usize)> {
    let line_end = find_line(buf)?;
    let s = std::str::from_utf8(&buf[1..line_end]).ok()?;
    let n = s.parse::<i64>().ok()?;
    Some((n, line_end + 2))
}

/// C1 classification: RESP request and reply share the same five framing
/// types, so the inferrer can't tell them apart from the leading byte
/// alone — it only checks the signature (leading type byte, trailing
/// `\r\n`) and tags every match `Request` as a conservative default, per
/// spec §4.1.
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if buf.len() < REDIS_MIN_SIZE {
        return None;
    }
    if !matches!(buf[0], b'+' | b'-' | b':' | b'$' | b'*') {
        return None;
    }
    if &buf[buf.len() - 2..] != b"\r\n" {
        return None;
    }
    Some(MessageKind::Request)
}

#[derive(Default)]
pub struct Extractor;

/// Parse one RESP value starting at `buf[0]`. Returns the number of bytes
/// consumed, or `None` if more data is needed.
fn parse_value(buf: &[u8]) -> Result<Option<usize>, ()> {
    if buf.is_empty() {
        return Ok(None);
    }
    match buf[0] {
        b'+' | b'-' | b':' => match find_line(buf) {
            Some(end) => Ok(Some(end + 2)),
            None => Ok(None),
        },
        b'$' => {
            let (len, header_len) = match parse_int_line(buf) {
                Some(v) => v,
                None => return Ok(None),
            };
            if len < 0 {
                // Null bulk string, no payload.
                return Ok(Some(header_len));
            }
            let total = header_len + len as usize + 2;
            if buf.len() < total {
                Ok(None)
            } else {
                Ok(Some(total))
            }
        }
        b'*' => {
            let (count, header_len) = match parse_int_line(buf) {
                Some(v) => v,
                None => return Ok(None),
            };
            if count < 0 {
                return Ok(Some(header_len));
            }
            let mut pos = header_len;
            for _ in 0..count {
                match parse_value(&buf[pos..])? {
                    Some(n) => pos += n,
                    None => return Ok(None),
                }
            }
            Ok(Some(pos))
        }
        _ => Err(()),
    }
}

impl FrameExtractor for Extractor {
    fn find_boundary(&self, _direction: Direction, buf: &[u8]) -> Option<usize> {
        buf.iter()
            .position(|&b| matches!(b, b'*' | b'+' | b'-' | b':' | b'$'))
    }

    fn parse_one(
        &mut self,
        _direction: Direction,
        buf: &[u8],
        timestamp_ns: u64,
        offset: u64,
    ) -> ParseOutcome {
        // `infer`'s conservative "always Request" tag is only meaningful at
        // first classification (§4.1); once the stream is known to be
        // Redis, the extractor tags each frame's real side by its leading
        // type byte (arrays are client commands, the other four are
        // replies) so the matcher and output records carry useful kinds.
        let kind = match buf.first() {
            Some(b'*') => MessageKind::Request,
            Some(b'+') | Some(b'-') | Some(b':') | Some(b'$') => MessageKind::Response,
            _ => return ParseOutcome::Invalid,
        };
        let element_count = if buf.first() == Some(&b'*') {
            parse_int_line(buf).map(|(n, _)| n)
        } else {
            None
        };
        match parse_value(buf) {
            Ok(Some(consumed)) => {
                let frame = Frame {
                    kind,
                    timestamp_ns,
                    offset,
                    consumed,
                    payload: ProtoFrame::Redis(RedisFrame {
                        type_byte: buf[0],
                        element_count,
                    }),
                };
                ParseOutcome::Success { frame, consumed }
            }
            Ok(None) => ParseOutcome::NeedsMore,
            Err(()) => ParseOutcome::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_infers_as_conservative_request_tag() {
        let buf = b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n";
        assert_eq!(infer(buf, Direction::Egress), Some(MessageKind::Request));
        let mut ext = Extractor;
        match ext.parse_one(Direction::Egress, buf, 0, 0) {
            ParseOutcome::Success { consumed, frame } => {
                assert_eq!(consumed, buf.len());
                assert_eq!(frame.kind, MessageKind::Request);
            }
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn simple_string_also_infers_as_conservative_request_tag() {
        // §4.1: RESP request/reply share framing, so C1 tags every match
        // Request regardless of the leading type byte.
        assert_eq!(infer(b"+OK\r\n", Direction::Ingress), Some(MessageKind::Request));
        let buf = b"+OK\r\n";
        let mut ext = Extractor;
        match ext.parse_one(Direction::Ingress, buf, 0, 0) {
            ParseOutcome::Success { consumed, frame } => {
                assert_eq!(consumed, buf.len());
                assert_eq!(frame.kind, MessageKind::Response);
            }
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn without_trailing_crlf_does_not_infer() {
        assert_eq!(infer(b"+OK\r\nxx", Direction::Ingress), None);
    }

    #[test]
    fn truncated_bulk_needs_more() {
        let buf = b"$5\r\nhel";
        let mut ext = Extractor;
        assert!(matches!(
            ext.parse_one(Direction::Egress, buf, 0, 0),
            ParseOutcome::NeedsMore
        ));
    }
}
