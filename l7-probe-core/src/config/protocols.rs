use l7_probe_common::{enable_bits, ProtoType};
use serde::{Deserialize, Serialize};

/// Bitmask selecting which protocol inferences to attempt, matching the
/// spec's §6 bit values exactly (`HTTP=0x0001` ... `AMQP=0x0400`,
/// `ALL=0xFFFF`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolMask(pub u16);

impl ProtocolMask {
    pub const ALL: ProtocolMask = ProtocolMask(enable_bits::ALL);
    pub const NONE: ProtocolMask = ProtocolMask(0);

    pub fn is_enabled(&self, proto: ProtoType) -> bool {
        let bit = match proto {
            ProtoType::Http => enable_bits::HTTP,
            ProtoType::Dns => enable_bits::DNS,
            ProtoType::Redis => enable_bits::REDIS,
            ProtoType::Mysql => enable_bits::MYSQL,
            ProtoType::Pgsql => enable_bits::PGSQL,
            ProtoType::Kafka => enable_bits::KAFKA,
            ProtoType::Mongo => enable_bits::MONGO,
            ProtoType::Cql => enable_bits::CQL,
            ProtoType::Nats => enable_bits::NATS,
            ProtoType::Crpc => enable_bits::CRPC,
            ProtoType::Amqp => enable_bits::AMQP,
            ProtoType::Unknown => return false,
        };
        self.0 & bit != 0
    }
}

impl Default for ProtocolMask {
    /// DNS is disabled by default, matching the spec's §4.1 priority list
    /// ("DNS disabled by default").
    fn default() -> Self {
        ProtocolMask(enable_bits::ALL & !enable_bits::DNS)
    }
}
