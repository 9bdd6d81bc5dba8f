//! Typed frame produced by a protocol [`crate::extract`] extractor.

use l7_probe_common::ProtoType;

use crate::protocol::amqp::AmqpFrame;
use crate::protocol::cql::CqlFrame;
use crate::protocol::crpc::CrpcFrame;
use crate::protocol::dns::DnsFrame;
use crate::protocol::http::HttpFrame;
use crate::protocol::mongo::MongoFrame;
use crate::protocol::mysql::MysqlFrame;
use crate::protocol::nats::NatsFrame;
use crate::protocol::pgsql::PgsqlFrame;
use crate::protocol::redis::RedisFrame;

/// Message kind: every frame is a request, a response, or (transiently,
/// before the extractor assigns a side) unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Unknown,
    Request,
    Response,
}

/// Protocol-specific payload carried by a [`Frame`].
#[derive(Clone, Debug)]
pub enum ProtoFrame {
    Http(HttpFrame),
    Pgsql(PgsqlFrame),
    Redis(RedisFrame),
    Dns(DnsFrame),
    Nats(NatsFrame),
    Cql(CqlFrame),
    Mongo(MongoFrame),
    Mysql(MysqlFrame),
    Crpc(CrpcFrame),
    Amqp(AmqpFrame),
}

impl ProtoFrame {
    pub fn proto_type(&self) -> ProtoType {
        match self {
            ProtoFrame::Http(_) => ProtoType::Http,
            ProtoFrame::Pgsql(_) => ProtoType::Pgsql,
            ProtoFrame::Redis(_) => ProtoType::Redis,
            ProtoFrame::Dns(_) => ProtoType::Dns,
            ProtoFrame::Nats(_) => ProtoType::Nats,
            ProtoFrame::Cql(_) => ProtoType::Cql,
            ProtoFrame::Mongo(_) => ProtoType::Mongo,
            ProtoFrame::Mysql(_) => ProtoType::Mysql,
            ProtoFrame::Crpc(_) => ProtoType::Crpc,
            ProtoFrame::Amqp(_) => ProtoType::Amqp,
        }
    }
}

/// One protocol-level message unit: an HTTP message, a MySQL packet, an AMQP
/// frame, and so on, produced in arrival order by a frame extractor.
#[derive(Clone, Debug)]
pub struct Frame {
    pub kind: MessageKind,
    /// Arrival timestamp in nanoseconds, taken from the data event that
    /// carried the frame's first byte.
    pub timestamp_ns: u64,
    /// Absolute offset (in the owning stream's raw buffer) of the frame's
    /// first byte.
    pub offset: u64,
    /// Number of bytes `parse_one` consumed from the buffer to produce this
    /// frame — always equal to the frame's encoded length (§8 invariant).
    pub consumed: usize,
    pub payload: ProtoFrame,
}

impl Frame {
    pub fn proto_type(&self) -> ProtoType {
        self.payload.proto_type()
    }

    /// Key a request frame is matched on for keyed protocols (DNS, MongoDB).
    /// `None` for protocols matched by strict FIFO order.
    pub fn request_key(&self) -> Option<MatchKey> {
        match &self.payload {
            ProtoFrame::Dns(d) => Some(MatchKey::U16(d.txid)),
            ProtoFrame::Mongo(m) => Some(MatchKey::I32(m.request_id)),
            _ => None,
        }
    }

    /// Key a response frame exposes to be looked up by a request's
    /// [`Frame::request_key`].
    pub fn response_key(&self) -> Option<MatchKey> {
        match &self.payload {
            ProtoFrame::Dns(d) => Some(MatchKey::U16(d.txid)),
            ProtoFrame::Mongo(m) => Some(MatchKey::I32(m.response_to)),
            _ => None,
        }
    }
}

/// A protocol-specific correlation key used by the matcher's keyed mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchKey {
    U16(u16),
    I32(i32),
}
