//! Per-protocol inference and frame extraction (components C1 and C3).
//!
//! Each submodule owns three things for one protocol: the `infer` function
//! used by the top-level dispatcher in [`crate::inference`], the protocol's
//! `Frame` payload type referenced from [`crate::frame::ProtoFrame`], and an
//! `Extractor` implementing [`crate::extract::FrameExtractor`].

pub mod amqp;
pub mod cql;
pub mod crpc;
pub mod dns;
pub mod http;
pub mod mongo;
pub mod mysql;
pub mod nats;
pub mod pgsql;
pub mod redis;

use l7_probe_common::ProtoType;

use crate::extract::FrameExtractor;

/// The set of behaviours a tracker needs once a stream has been classified:
/// a fresh extractor instance for each direction. Selected once per tracker
/// (§9 design note) rather than re-dispatched on every event.
pub fn new_extractor(proto: ProtoType) -> Option<Box<dyn FrameExtractor + Send>> {
    Some(match proto {
        ProtoType::Http => Box::new(http::Extractor),
        ProtoType::Pgsql => Box::new(pgsql::Extractor),
        ProtoType::Redis => Box::new(redis::Extractor),
        ProtoType::Dns => Box::new(dns::Extractor),
        ProtoType::Nats => Box::new(nats::Extractor),
        ProtoType::Cql => Box::new(cql::Extractor),
        ProtoType::Mongo => Box::new(mongo::Extractor),
        ProtoType::Mysql => Box::new(mysql::Extractor::default()),
        ProtoType::Crpc => Box::new(crpc::Extractor),
        ProtoType::Amqp => Box::new(amqp::Extractor),
        ProtoType::Unknown | ProtoType::Kafka => return None,
    })
}
