//! Component C6: pairs request and response [`Frame`]s produced by a
//! stream's extractor into [`crate::record::Record`]s, per the matching
//! strategy spec §4.6 assigns each protocol:
//!
//! - strict FIFO for every protocol with no self-describing correlation id
//!   (HTTP, PostgreSQL, Redis, NATS, Cassandra CQL, MySQL, CRPC)
//! - keyed matching for DNS (`txid`) and MongoDB (`request_id`/`response_to`)
//! - a declarative (channel_id, class_id, method_id) pairing for AMQP,
//!   grounded on `original_source/l7probe/protocol/amqp/matcher/amqp_matcher.c`
//!
//! Unmatched frames are retained until [`Matcher::reap_orphans`] evicts them
//! past the configured orphan timeout (§4.6/§5), at which point the caller
//! emits them as solitary [`crate::record::Record::orphan`] records.

use std::collections::VecDeque;

use ahash::AHashMap;
use l7_probe_common::ProtoType;

use crate::frame::{Frame, MatchKey, MessageKind};
use crate::protocol::amqp::{self, AmqpFrameType};

/// Result of feeding one newly-parsed frame into the matcher.
pub enum MatchOutcome {
    /// Paired with an already-pending counterpart.
    Matched { request: Frame, response: Frame },
    /// Stored, awaiting its counterpart (or the orphan timeout).
    Pending,
    /// Not subject to matching at all (AMQP content/body/heartbeat frames,
    /// and fire-and-forget methods like Basic.Publish/Deliver) — the caller
    /// emits it immediately as its own orphan-shaped record.
    PassThrough(Frame),
}

/// (channel_id, class_id, method_id) — the correlation key AMQP method
/// frames are paired on.
type AmqpKey = (u16, u16, u16);

enum Strategy {
    Fifo {
        pending_requests: VecDeque<Frame>,
        pending_responses: VecDeque<Frame>,
    },
    Keyed {
        pending_requests: AHashMap<MatchKey, Frame>,
        pending_responses: AHashMap<MatchKey, Frame>,
    },
    Amqp {
        pending_requests: AHashMap<AmqpKey, Frame>,
        pending_responses: AHashMap<AmqpKey, Frame>,
    },
}

fn strategy_for(proto: ProtoType) -> Strategy {
    match proto {
        ProtoType::Dns | ProtoType::Mongo => Strategy::Keyed {
            pending_requests: AHashMap::new(),
            pending_responses: AHashMap::new(),
        },
        ProtoType::Amqp => Strategy::Amqp {
            pending_requests: AHashMap::new(),
            pending_responses: AHashMap::new(),
        },
        _ => Strategy::Fifo {
            pending_requests: VecDeque::new(),
            pending_responses: VecDeque::new(),
        },
    }
}

/// Extract the `(channel_id, class_id, method_id)` key of a Method frame,
/// or `None` for any other AMQP frame type (Header/Body/Heartbeat/
/// ProtocolHeader never participate in matching).
fn amqp_method_key(frame: &Frame) -> Option<AmqpKey> {
    match &frame.payload {
        crate::frame::ProtoFrame::Amqp(a) if a.frame_type == AmqpFrameType::Method => {
            Some((a.channel_id, a.class_id?, a.method_id?))
        }
        _ => None,
    }
}

/// One protocol's per-tracker matching state.
pub struct Matcher {
    orphan_timeout_ns: u64,
    strategy: Strategy,
}

impl Matcher {
    pub fn new(proto: ProtoType, orphan_timeout_ns: u64) -> Self {
        Self {
            orphan_timeout_ns,
            strategy: strategy_for(proto),
        }
    }

    /// Feed a newly-parsed frame in arrival order.
    pub fn push_frame(&mut self, frame: Frame) -> MatchOutcome {
        match &mut self.strategy {
            Strategy::Fifo { pending_requests, pending_responses } => match frame.kind {
                MessageKind::Request => match pending_responses.pop_front() {
                    Some(response) => MatchOutcome::Matched { request: frame, response },
                    None => {
                        pending_requests.push_back(frame);
                        MatchOutcome::Pending
                    }
                },
                MessageKind::Response => match pending_requests.pop_front() {
                    Some(request) => MatchOutcome::Matched { request, response: frame },
                    None => {
                        pending_responses.push_back(frame);
                        MatchOutcome::Pending
                    }
                },
                MessageKind::Unknown => MatchOutcome::PassThrough(frame),
            },
            Strategy::Keyed { pending_requests, pending_responses } => match frame.kind {
                MessageKind::Request => {
                    let key = match frame.request_key() {
                        Some(k) => k,
                        None => return MatchOutcome::PassThrough(frame),
                    };
                    match pending_responses.remove(&key) {
                        Some(response) => MatchOutcome::Matched { request: frame, response },
                        None => {
                            pending_requests.insert(key, frame);
                            MatchOutcome::Pending
                        }
                    }
                }
                MessageKind::Response => {
                    let key = match frame.response_key() {
                        Some(k) => k,
                        None => return MatchOutcome::PassThrough(frame),
                    };
                    match pending_requests.remove(&key) {
                        Some(request) => MatchOutcome::Matched { request, response: frame },
                        None => {
                            pending_responses.insert(key, frame);
                            MatchOutcome::Pending
                        }
                    }
                }
                MessageKind::Unknown => MatchOutcome::PassThrough(frame),
            },
            Strategy::Amqp { pending_requests, pending_responses } => {
                let key = match amqp_method_key(&frame) {
                    Some(k) => k,
                    None => return MatchOutcome::PassThrough(frame),
                };
                let (channel_id, class_id, method_id) = key;
                if let Some(reply_method) = amqp::reply_method_for(class_id, method_id) {
                    let reply_key = (channel_id, class_id, reply_method);
                    match pending_responses.remove(&reply_key) {
                        Some(response) => MatchOutcome::Matched { request: frame, response },
                        None => {
                            pending_requests.insert(reply_key, frame);
                            MatchOutcome::Pending
                        }
                    }
                } else if amqp::is_reply_method(class_id, method_id) {
                    match pending_requests.remove(&key) {
                        Some(request) => MatchOutcome::Matched { request, response: frame },
                        None => {
                            pending_responses.insert(key, frame);
                            MatchOutcome::Pending
                        }
                    }
                } else {
                    // Basic.Publish/Deliver and any other unpaired method.
                    MatchOutcome::PassThrough(frame)
                }
            }
        }
    }

    /// Evict every pending frame whose arrival timestamp is more than
    /// `orphan_timeout_ns` behind `now_ns`, oldest first.
    pub fn reap_orphans(&mut self, now_ns: u64) -> Vec<Frame> {
        let cutoff = self.orphan_timeout_ns;
        let is_stale = |f: &Frame| now_ns.saturating_sub(f.timestamp_ns) > cutoff;
        let mut reaped = Vec::new();
        match &mut self.strategy {
            Strategy::Fifo { pending_requests, pending_responses } => {
                while pending_requests.front().is_some_and(is_stale) {
                    reaped.push(pending_requests.pop_front().unwrap());
                }
                while pending_responses.front().is_some_and(is_stale) {
                    reaped.push(pending_responses.pop_front().unwrap());
                }
            }
            Strategy::Keyed { pending_requests, pending_responses } => {
                let stale_keys: Vec<_> = pending_requests
                    .iter()
                    .filter(|(_, f)| is_stale(f))
                    .map(|(k, _)| *k)
                    .collect();
                for k in stale_keys {
                    reaped.push(pending_requests.remove(&k).unwrap());
                }
                let stale_keys: Vec<_> = pending_responses
                    .iter()
                    .filter(|(_, f)| is_stale(f))
                    .map(|(k, _)| *k)
                    .collect();
                for k in stale_keys {
                    reaped.push(pending_responses.remove(&k).unwrap());
                }
            }
            Strategy::Amqp { pending_requests, pending_responses } => {
                let stale_keys: Vec<_> = pending_requests
                    .iter()
                    .filter(|(_, f)| is_stale(f))
                    .map(|(k, _)| *k)
                    .collect();
                for k in stale_keys {
                    reaped.push(pending_requests.remove(&k).unwrap());
                }
                let stale_keys: Vec<_> = pending_responses
                    .iter()
                    .filter(|(_, f)| is_stale(f))
                    .map(|(k, _)| *k)
                    .collect();
                for k in stale_keys {
                    reaped.push(pending_responses.remove(&k).unwrap());
                }
            }
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ProtoFrame;
    use crate::protocol::dns::DnsFrame;
    use crate::protocol::redis::RedisFrame;

    fn redis_frame(kind: MessageKind, ts: u64) -> Frame {
        Frame {
            kind,
            timestamp_ns: ts,
            offset: 0,
            consumed: 1,
            payload: ProtoFrame::Redis(RedisFrame { type_byte: b'+', element_count: None }),
        }
    }

    fn dns_frame(kind: MessageKind, txid: u16, ts: u64) -> Frame {
        Frame {
            kind,
            timestamp_ns: ts,
            offset: 0,
            consumed: 12,
            payload: ProtoFrame::Dns(DnsFrame { txid, question_count: 1, answer_count: 0 }),
        }
    }

    #[test]
    fn fifo_matches_request_then_response_in_order() {
        let mut m = Matcher::new(ProtoType::Redis, 1_000_000_000);
        assert!(matches!(m.push_frame(redis_frame(MessageKind::Request, 0)), MatchOutcome::Pending));
        match m.push_frame(redis_frame(MessageKind::Response, 100)) {
            MatchOutcome::Matched { .. } => {}
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn keyed_matches_by_txid_regardless_of_order() {
        let mut m = Matcher::new(ProtoType::Dns, 1_000_000_000);
        assert!(matches!(m.push_frame(dns_frame(MessageKind::Response, 7, 0)), MatchOutcome::Pending));
        match m.push_frame(dns_frame(MessageKind::Request, 7, 50)) {
            MatchOutcome::Matched { .. } => {}
            _ => panic!("expected match"),
        }
    }

    #[test]
    fn keyed_does_not_match_mismatched_txid() {
        let mut m = Matcher::new(ProtoType::Dns, 1_000_000_000);
        assert!(matches!(m.push_frame(dns_frame(MessageKind::Request, 1, 0)), MatchOutcome::Pending));
        assert!(matches!(m.push_frame(dns_frame(MessageKind::Response, 2, 50)), MatchOutcome::Pending));
    }

    #[test]
    fn amqp_matches_open_with_open_ok_on_same_channel() {
        let mut m = Matcher::new(ProtoType::Amqp, 1_000_000_000);
        let open = Frame {
            kind: MessageKind::Request,
            timestamp_ns: 0,
            offset: 0,
            consumed: 1,
            payload: ProtoFrame::Amqp(crate::protocol::amqp::AmqpFrame {
                frame_type: AmqpFrameType::Method,
                channel_id: 1,
                payload_size: 4,
                class_id: Some(20),
                method_id: Some(10),
                ..Default::default()
            }),
        };
        let open_ok = Frame {
            kind: MessageKind::Response,
            timestamp_ns: 10,
            offset: 0,
            consumed: 1,
            payload: ProtoFrame::Amqp(crate::protocol::amqp::AmqpFrame {
                frame_type: AmqpFrameType::Method,
                channel_id: 1,
                payload_size: 4,
                class_id: Some(20),
                method_id: Some(11),
                ..Default::default()
            }),
        };
        assert!(matches!(m.push_frame(open), MatchOutcome::Pending));
        assert!(matches!(m.push_frame(open_ok), MatchOutcome::Matched { .. }));
    }

    #[test]
    fn amqp_basic_publish_is_pass_through() {
        let mut m = Matcher::new(ProtoType::Amqp, 1_000_000_000);
        let publish = Frame {
            kind: MessageKind::Unknown,
            timestamp_ns: 0,
            offset: 0,
            consumed: 1,
            payload: ProtoFrame::Amqp(crate::protocol::amqp::AmqpFrame {
                frame_type: AmqpFrameType::Method,
                channel_id: 1,
                payload_size: 4,
                class_id: Some(60),
                method_id: Some(40),
                ..Default::default()
            }),
        };
        assert!(matches!(m.push_frame(publish), MatchOutcome::PassThrough(_)));
    }

    #[test]
    fn reap_orphans_evicts_only_past_timeout() {
        let mut m = Matcher::new(ProtoType::Redis, 100);
        assert!(matches!(m.push_frame(redis_frame(MessageKind::Request, 0)), MatchOutcome::Pending));
        assert!(m.reap_orphans(50).is_empty());
        let reaped = m.reap_orphans(201);
        assert_eq!(reaped.len(), 1);
    }
}
