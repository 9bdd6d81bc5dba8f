//! NATS inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_nats_type`.
//! NATS is a CRLF-delimited text protocol; client operations are `CONNECT`,
//! `PUB`, `SUB`, `UNSUB`, `PING`, `PONG`; server operations are `INFO`,
//! `MSG`, `HMSG`, `+OK`, `-ERR`, `PING`, `PONG`.
//!
//! §9 REDESIGN FLAG: the source's `__NATS_HMSG` check tests `buf[2]` twice
//! (`H`, `M`) instead of `buf[2]` and `buf[3]` (`M`, `S`), so it can never
//! actually match `HMSG`. We check `buf[1]`, `buf[2]`, `buf[3]` against
//! `H`, `M`, `S` respectively, which is what the source evidently intended.

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

#[derive(Clone, Debug, Default)]
pub struct NatsFrame {
    pub op: Op,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Op {
    #[default]
    Unknown,
    Connect,
    Pub,
    Hpub,
    Sub,
    Unsub,
    Ping,
    Pong,
    Info,
    Msg,
    Hmsg,
    Ok,
    Err,
}

fn classify_op(buf: &[u8]) -> Option<(Op, MessageKind)> {
    let starts = |s: &[u8]| buf.len() >= s.len() && buf[..s.len()].eq_ignore_ascii_case(s);

    if buf.len() >= 4 && buf[0].to_ascii_uppercase() == b'H' {
        if buf[1..4].eq_ignore_ascii_case(b"MSG") {
            return Some((Op::Hmsg, MessageKind::Response));
        }
        if buf[1..4].eq_ignore_ascii_case(b"PUB") {
            return Some((Op::Hpub, MessageKind::Request));
        }
    }
    if starts(b"CONNECT") {
        return Some((Op::Connect, MessageKind::Request));
    }
    if starts(b"PUB") {
        return Some((Op::Pub, MessageKind::Request));
    }
    if starts(b"UNSUB") {
        return Some((Op::Unsub, MessageKind::Request));
    }
    if starts(b"SUB") {
        return Some((Op::Sub, MessageKind::Request));
    }
    if starts(b"INFO") {
        return Some((Op::Info, MessageKind::Response));
    }
    if starts(b"MSG") {
        return Some((Op::Msg, MessageKind::Response));
    }
    if starts(b"PING") {
        return Some((Op::Ping, MessageKind::Request));
    }
    if starts(b"PONG") {
        return Some((Op::Pong, MessageKind::Response));
    }
    if starts(b"+OK") {
        return Some((Op::Ok, MessageKind::Response));
    }
    if starts(b"-ERR") {
        return Some((Op::Err, MessageKind::Response));
    }
    None
}

/// C1 classification, per `__get_nats_type` (with the `HMSG` check
/// corrected, see module docs): ≥ 3 bytes, the buffer ends with `\r\n`, and
/// the leading token matches a known op.
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if buf.len() < 3 || &buf[buf.len() - 2..] != b"\r\n" {
        return None;
    }
    classify_op(buf).map(|(_, kind)| kind)
}

#[derive(Default)]
pub struct Extractor;

impl FrameExtractor for Extractor {
    fn find_boundary(&self, _direction: Direction, buf: &[u8]) -> Option<usize> {
        for i in 0..buf.len() {
            if classify_op(&buf[i..]).is_some() {
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
        let (op, kind) = match classify_op(buf) {
            Some(v) => v,
            None => return ParseOutcome::Invalid,
        };
        let line_end = match buf.windows(2).position(|w| w == b"\r\n") {
            Some(p) => p + 2,
            None => return ParseOutcome::NeedsMore,
        };
        // PUB/HPUB/MSG/HMSG carry a payload after the control line, whose
        // length is the last whitespace-separated field on that line.
        let carries_payload = matches!(op, Op::Pub | Op::Hpub | Op::Msg | Op::Hmsg);
        let total_len = if carries_payload {
            let control_line = &buf[..line_end - 2];
            let len_field = control_line
                .rsplit(|&b| b == b' ')
                .next()
                .and_then(|s| std::str::from_utf8(s).ok())
                .and_then(|s| s.trim().parse::<usize>().ok());
            match len_field {
                Some(payload_len) => line_end + payload_len + 2,
                None => return ParseOutcome::Invalid,
            }
        } else {
            line_end
        };
        if buf.len() < total_len {
            return ParseOutcome::NeedsMore;
        }
        let frame = Frame {
            kind,
            timestamp_ns,
            offset,
            consumed: total_len,
            payload: ProtoFrame::Nats(NatsFrame { op }),
        };
        ParseOutcome::Success {
            frame,
            consumed: total_len,
        }
    }
}
