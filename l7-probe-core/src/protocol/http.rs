//! HTTP/1.1 inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_http_type`
//! (request-line prefix match, `__HTTP_MIN_SIZE = 16`) and on the teacher's
//! incremental parsing style in `fingerprinting/extractor.rs` /
//! `tcp/http_peek.rs` (peek-without-consume, explicit boundary search).

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

const HTTP_MIN_SIZE: usize = 16;

/// Methods the extractor's `find_boundary`/framing recognise — broader than
/// the inferrer's signature (below) so pipelined requests using methods C1
/// never signatures (PATCH, OPTIONS, ...) still frame correctly once the
/// stream is already known to be HTTP.
const REQUEST_METHODS: &[&[u8]] = &[
    b"GET ", b"HEAD ", b"POST ", b"PUT ", b"DELETE ", b"OPTIONS ", b"PATCH ", b"CONNECT ",
    b"TRACE ",
];

/// C1's exact signature set, per spec §4.1: `GET `, `HEAD`, `POST`, `PUT `,
/// `DELETE` only.
const INFER_METHODS: &[&[u8]] = &[b"GET ", b"HEAD", b"POST", b"PUT ", b"DELETE"];

const RESPONSE_PREFIX: &[u8] = b"HTTP/";

#[derive(Clone, Debug, Default)]
pub struct HttpFrame {
    pub method: Option<String>,
    pub target: Option<String>,
    pub status: Option<u16>,
    pub body_len: u64,
}

fn message_kind_at(buf: &[u8]) -> Option<MessageKind> {
    if buf.len() >= RESPONSE_PREFIX.len() && buf.starts_with(RESPONSE_PREFIX) {
        return Some(MessageKind::Response);
    }
    for m in REQUEST_METHODS {
        if buf.len() >= m.len() && buf.starts_with(m) {
            return Some(MessageKind::Request);
        }
    }
    None
}

/// C1 classification: does `buf` look like the start of an HTTP/1.1
/// message? Only requests are recognised at this stage (responses are
/// classified once the tracker already knows the protocol, via the
/// extractor), matching the source's `__get_http_type`.
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if buf.len() < HTTP_MIN_SIZE {
        return None;
    }
    for m in INFER_METHODS {
        if buf.starts_with(m) {
            return Some(MessageKind::Request);
        }
    }
    None
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn header_value<'a>(headers: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let lower_name = name.as_bytes();
    let mut start = 0usize;
    while start < headers.len() {
        let line_end = headers[start..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|p| start + p)
            .unwrap_or(headers.len());
        let line = &headers[start..line_end];
        if let Some(colon) = line.iter().position(|&b| b == b':') {
            let key = &line[..colon];
            if key.len() == lower_name.len()
                && key
                    .iter()
                    .zip(lower_name.iter())
                    .all(|(a, b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
            {
                let mut value = &line[colon + 1..];
                while value.first() == Some(&b' ') {
                    value = &value[1..];
                }
                return Some(value);
            }
        }
        start = line_end + 2;
    }
    None
}

#[derive(Default)]
pub struct Extractor;

impl FrameExtractor for Extractor {
    fn find_boundary(&self, _direction: Direction, buf: &[u8]) -> Option<usize> {
        for i in 0..buf.len() {
            if message_kind_at(&buf[i..]).is_some() {
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
        let kind = match message_kind_at(buf) {
            Some(k) => k,
            None => return ParseOutcome::Invalid,
        };
        let header_end = match find_header_end(buf) {
            Some(end) => end,
            None => return ParseOutcome::NeedsMore,
        };
        let first_line_end = match buf[..header_end].windows(2).position(|w| w == b"\r\n") {
            Some(p) => p,
            None => return ParseOutcome::Invalid,
        };
        let first_line = std::str::from_utf8(&buf[..first_line_end]).unwrap_or("");
        let headers = &buf[first_line_end + 2..header_end];

        let body_len = if let Some(v) = header_value(headers, "content-length") {
            std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(0)
        } else if header_value(headers, "transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case(b"chunked"))
            .unwrap_or(false)
        {
            match find_chunked_end(&buf[header_end..]) {
                Some(n) => n as u64,
                None => return ParseOutcome::NeedsMore,
            }
        } else {
            0
        };

        let total_len = header_end + body_len as usize;
        if buf.len() < total_len {
            return ParseOutcome::NeedsMore;
        }

        let mut method = None;
        let mut target = None;
        let mut status = None;
        match kind {
            MessageKind::Request => {
                let mut parts = first_line.splitn(3, ' ');
                method = parts.next().map(str::to_string);
                target = parts.next().map(str::to_string);
            }
            MessageKind::Response => {
                let mut parts = first_line.splitn(3, ' ');
                let _version = parts.next();
                status = parts.next().and_then(|s| s.parse::<u16>().ok());
            }
            MessageKind::Unknown => return ParseOutcome::Invalid,
        }

        let frame = Frame {
            kind,
            timestamp_ns,
            offset,
            consumed: total_len,
            payload: ProtoFrame::Http(HttpFrame {
                method,
                target,
                status,
                body_len,
            }),
        };
        ParseOutcome::Success {
            frame,
            consumed: total_len,
        }
    }
}

/// Sum of a chunked-encoding body's chunk sizes plus their framing, up to and
/// including the terminating zero-size chunk. Returns `None` if the
/// sequence is not fully buffered yet.
fn find_chunked_end(body: &[u8]) -> Option<usize> {
    let mut pos = 0usize;
    loop {
        let line_end = body[pos..].windows(2).position(|w| w == b"\r\n")? + pos;
        let size_str = std::str::from_utf8(&body[pos..line_end]).ok()?;
        let size_str = size_str.split(';').next().unwrap_or(size_str);
        let size = usize::from_str_radix(size_str.trim(), 16).ok()?;
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size + 2; // chunk data + trailing CRLF
        if body.len() < chunk_end {
            return None;
        }
        if size == 0 {
            return Some(chunk_end);
        }
        pos = chunk_end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_get_request() {
        let buf = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(infer(buf, Direction::Egress), Some(MessageKind::Request));
    }

    #[test]
    fn too_short_is_unknown() {
        assert_eq!(infer(b"GET / H", Direction::Egress), None);
    }

    #[test]
    fn parses_request_with_content_length() {
        let buf = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let mut ext = Extractor;
        match ext.parse_one(Direction::Egress, buf, 0, 0) {
            ParseOutcome::Success { consumed, .. } => assert_eq!(consumed, buf.len()),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn response_needs_more_until_body_arrives() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhello";
        let mut ext = Extractor;
        assert!(matches!(
            ext.parse_one(Direction::Ingress, buf, 0, 0),
            ParseOutcome::NeedsMore
        ));
    }
}
