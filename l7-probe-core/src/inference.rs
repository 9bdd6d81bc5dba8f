//! Component C1: stateless protocol classification of a stream's leading
//! bytes, in the fixed priority order spec.md documents:
//! HTTP, PostgreSQL, DNS, Redis, CRPC, NATS, Cassandra CQL, MongoDB, MySQL,
//! AMQP. Matches `original_source/l7probe/include/l7.h`'s
//! `get_l7_protocol()` dispatcher order, with DNS kept in (but disabled by
//! default via [`crate::config::ProtocolMask`] rather than compiled out).

use l7_probe_common::ProtoType;

use crate::config::ProtocolMask;
use crate::frame::MessageKind;
use crate::protocol::{amqp, cql, crpc, dns, http, mongo, mysql, nats, pgsql, redis};

/// Result of a classification attempt: which protocol, and whether the
/// matched bytes look like a request or a response (best-effort; many
/// protocols only signature requests at this stage).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub proto: ProtoType,
    pub kind: MessageKind,
}

/// Try every enabled protocol's `infer` in spec-fixed priority order and
/// return the first match. `mysql_carry` is the tracker-level MySQL header
/// scratch (§9); it is only consulted/updated when MySQL is enabled and
/// every earlier protocol in the priority order has failed to match.
pub fn classify(
    buf: &[u8],
    direction: l7_probe_common::Direction,
    mask: ProtocolMask,
) -> Option<Classification> {
    macro_rules! try_proto {
        ($proto:expr, $infer:expr) => {
            if mask.is_enabled($proto) {
                if let Some(kind) = $infer {
                    return Some(Classification { proto: $proto, kind });
                }
            }
        };
    }

    try_proto!(ProtoType::Http, http::infer(buf, direction));
    try_proto!(ProtoType::Pgsql, pgsql::infer(buf, direction));
    try_proto!(ProtoType::Dns, dns::infer(buf, direction));
    try_proto!(ProtoType::Redis, redis::infer(buf, direction));
    try_proto!(ProtoType::Crpc, crpc::infer(buf, direction));
    try_proto!(ProtoType::Nats, nats::infer(buf, direction));
    try_proto!(ProtoType::Cql, cql::infer(buf, direction));
    try_proto!(ProtoType::Mongo, mongo::infer(buf, direction));
    try_proto!(ProtoType::Mysql, mysql::infer(buf, direction));
    try_proto!(ProtoType::Amqp, amqp::infer(buf, direction));

    None
}

/// As [`classify`], but additionally consults and updates the tracker's
/// MySQL header carry (§9): when a plain `classify` fails, and MySQL is
/// enabled, try splicing a previously-seen bare 4-byte header onto `buf`
/// before giving up, then record `buf` itself as a new candidate header for
/// the next call. Every unknown-protocol event on a connection must flow
/// through this entry point rather than `classify` directly, or the carry
/// goes stale.
pub fn classify_for_tracker(
    buf: &[u8],
    direction: l7_probe_common::Direction,
    mask: ProtocolMask,
    mysql_carry: &mut mysql::Carry,
) -> Option<Classification> {
    if let Some(c) = classify(buf, direction, mask) {
        return Some(c);
    }
    if mask.is_enabled(ProtoType::Mysql) {
        if let Some(combined) = mysql_carry.try_combine(buf) {
            if let Some(kind) = mysql::infer(&combined, direction) {
                return Some(Classification { proto: ProtoType::Mysql, kind });
            }
        }
        mysql_carry.observe(buf);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use l7_probe_common::Direction;

    #[test]
    fn http_wins_over_later_protocols_when_both_could_match() {
        let buf = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
        let c = classify(buf, Direction::Egress, ProtocolMask::default()).unwrap();
        assert_eq!(c.proto, ProtoType::Http);
    }

    #[test]
    fn dns_disabled_by_default_falls_through_to_unknown() {
        let mut buf = [0u8; 12];
        buf[0] = 0x12;
        buf[1] = 0x34;
        buf[3] = 0x01; // non-zero so the MySQL fallback check doesn't fire
        assert!(classify(&buf, Direction::Egress, ProtocolMask::default()).is_none());
    }

    #[test]
    fn dns_matches_once_enabled() {
        let mut buf = [0u8; 12];
        buf[0] = 0x12;
        buf[1] = 0x34;
        buf[3] = 0x01;
        assert!(classify(&buf, Direction::Egress, ProtocolMask::ALL).is_some());
    }

    #[test]
    fn unrecognised_bytes_classify_as_none() {
        let buf = b"not a known protocol prefix at all";
        assert!(classify(buf, Direction::Egress, ProtocolMask::ALL).is_none());
    }

    #[test]
    fn mysql_carry_reassembles_across_two_events() {
        let mut carry = mysql::Carry::default();
        let header_only = [0x02u8, 0x00, 0x00, 0x00]; // payload_len=2, seq=0
        assert!(classify_for_tracker(&header_only, Direction::Egress, ProtocolMask::ALL, &mut carry)
            .is_none());
        let rest = [0x03u8, b'x'];
        let c = classify_for_tracker(&rest, Direction::Egress, ProtocolMask::ALL, &mut carry)
            .expect("carry should complete the signature");
        assert_eq!(c.proto, ProtoType::Mysql);
    }

    proptest::proptest! {
        /// §6's enabled-protocol bitmask invariant: whatever byte prefix
        /// arrives, `classify` never returns a protocol the mask excludes.
        #[test]
        fn classify_never_returns_a_masked_out_protocol(
            buf in proptest::collection::vec(proptest::num::u8::ANY, 0..64),
            mask_bits in proptest::num::u16::ANY,
        ) {
            let mask = ProtocolMask(mask_bits);
            if let Some(c) = classify(&buf, Direction::Egress, mask) {
                proptest::prop_assert!(mask.is_enabled(c.proto));
            }
        }
    }
}
