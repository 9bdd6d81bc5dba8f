//! MongoDB wire protocol inference and frame extraction.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s `__get_mongo_type`
//! (`__MONGO_MINSIZE = 16`, the standard header: `messageLength`,
//! `requestID`, `responseTo`, `opCode`): `request_id >= 0`, `opcode` one of
//! `{2001..2007, 2012, 2013}` (update/insert/reserved/query/get_more/
//! delete/kill_cursors/compressed/msg — legacy `OP_REPLY = 1` is notably
//! *not* in this set), and `response_to == 0` selects request vs response
//! uniformly across that whole opcode set.
//!
//! Open Question (§9, accepted as-is): the source does not cross-validate
//! opcode against `response_to` when `response_to != 0` and `opcode ==
//! OP_REPLY` — moot here since `OP_REPLY` isn't in the matched opcode set
//! at all, so this simplification has no effect on our signature.

use l7_probe_common::Direction;

use crate::extract::{FrameExtractor, ParseOutcome};
use crate::frame::{Frame, MessageKind, ProtoFrame};

const MONGO_MINSIZE: usize = 16;

const OP_REPLY: i32 = 1;
const OP_UPDATE: i32 = 2001;
const OP_INSERT: i32 = 2002;
const OP_QUERY: i32 = 2004;
const OP_GET_MORE: i32 = 2005;
const OP_DELETE: i32 = 2006;
const OP_KILL_CURSORS: i32 = 2007;
const OP_COMPRESSED: i32 = 2012;
const OP_MSG: i32 = 2013;

#[derive(Clone, Debug, Default)]
pub struct MongoFrame {
    pub op_code: i32,
    pub request_id: i32,
    pub response_to: i32,
}

const OP_RESERVED: i32 = 2003;

/// The opcode set `__get_mongo_type` switches on: note legacy `OP_REPLY`
/// (1) is deliberately absent.
fn is_matched_opcode(op_code: i32) -> bool {
    matches!(
        op_code,
        OP_UPDATE | OP_INSERT | OP_RESERVED | OP_QUERY | OP_GET_MORE | OP_DELETE
            | OP_KILL_CURSORS | OP_COMPRESSED | OP_MSG
    )
}

/// C1 classification, per `__get_mongo_type`: `request_id >= 0`, opcode in
/// the matched set, then `response_to == 0` selects request vs response.
pub fn infer(buf: &[u8], _direction: Direction) -> Option<MessageKind> {
    if buf.len() < MONGO_MINSIZE {
        return None;
    }
    let request_id = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if request_id < 0 {
        return None;
    }
    let response_to = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let op_code = i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
    if !is_matched_opcode(op_code) {
        return None;
    }
    Some(if response_to == 0 {
        MessageKind::Request
    } else {
        MessageKind::Response
    })
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
        direction: Direction,
        buf: &[u8],
        timestamp_ns: u64,
        offset: u64,
    ) -> ParseOutcome {
        if buf.len() < MONGO_MINSIZE {
            return ParseOutcome::NeedsMore;
        }
        let kind = match infer(buf, direction) {
            Some(k) => k,
            None => return ParseOutcome::Invalid,
        };
        let message_length = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if message_length < MONGO_MINSIZE {
            return ParseOutcome::Invalid;
        }
        if buf.len() < message_length {
            return ParseOutcome::NeedsMore;
        }
        let request_id = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let response_to = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let op_code = i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let frame = Frame {
            kind,
            timestamp_ns,
            offset,
            consumed: message_length,
            payload: ProtoFrame::Mongo(MongoFrame {
                op_code,
                request_id,
                response_to,
            }),
        };
        ParseOutcome::Success {
            frame,
            consumed: message_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(op_code: i32, request_id: i32, response_to: i32, message_length: i32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&message_length.to_le_bytes());
        v.extend_from_slice(&request_id.to_le_bytes());
        v.extend_from_slice(&response_to.to_le_bytes());
        v.extend_from_slice(&op_code.to_le_bytes());
        v
    }

    #[test]
    fn op_query_is_request() {
        let buf = header(OP_QUERY, 1, 0, MONGO_MINSIZE as i32);
        assert_eq!(infer(&buf, Direction::Egress), Some(MessageKind::Request));
    }

    #[test]
    fn legacy_op_reply_is_not_in_the_matched_opcode_set() {
        let buf = header(OP_REPLY, 7, 0, MONGO_MINSIZE as i32);
        assert_eq!(infer(&buf, Direction::Ingress), None);
    }

    #[test]
    fn negative_request_id_rejected() {
        let buf = header(OP_QUERY, -1, 0, MONGO_MINSIZE as i32);
        assert_eq!(infer(&buf, Direction::Egress), None);
    }

    #[test]
    fn op_msg_disambiguated_by_response_to() {
        let req = header(OP_MSG, 5, 0, MONGO_MINSIZE as i32);
        let resp = header(OP_MSG, 9, 5, MONGO_MINSIZE as i32);
        assert_eq!(infer(&req, Direction::Egress), Some(MessageKind::Request));
        assert_eq!(infer(&resp, Direction::Ingress), Some(MessageKind::Response));
    }
}
