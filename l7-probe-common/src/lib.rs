//! Wire types shared between the kernel-side tap and the userspace engine.
//!
//! This crate is `no_std` so it can be compiled for both targets:
//! - the BPF kernel program that taps socket syscalls and TLS entry points
//!   (out of scope for this repo — see the spec's §1)
//! - the host target, where `l7-probe-core` consumes these events
//!
//! Enable the `aya-pod` feature on the host side to get `aya::Pod` impls for
//! reading these structs out of BPF ring/perf buffers.
#![no_std]

/// (process id, file descriptor) — stable for the lifetime of the descriptor
/// in that process. Two distinct connections may reuse this tuple over time;
/// trackers are destroyed on close and recreated on open.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub pid: i32,
    pub fd: i32,
}

/// Direction of a single payload chunk relative to the traced process.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Egress = 0,
    Ingress = 1,
}

/// L4 role, independent of the L7 role derived from classification.
/// `Unknown` is reserved for datagram sockets.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum L4Role {
    Unknown = 0,
    Client = 1,
    Server = 2,
}

/// L7 role, derived once per tracker from the first successful
/// classification and then held fixed for the tracker's lifetime.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum L7Role {
    Unknown = 0,
    Client = 1,
    Server = 2,
}

/// Application protocols the engine can classify.
///
/// `Kafka` carries a reserved enable bit (see [`enable_bits`]) but, matching
/// the original source this spec was distilled from, has no inference
/// signature implemented — the enumerated-but-unimplemented slot is
/// deliberate, not an oversight.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtoType {
    Unknown = 0,
    Http = 1,
    Mysql = 2,
    Pgsql = 3,
    Dns = 4,
    Redis = 5,
    Nats = 6,
    Cql = 7,
    Mongo = 8,
    Kafka = 9,
    Crpc = 10,
    Amqp = 11,
}

/// Protocol-enable bitmask values, matching the spec's §6 configuration
/// surface exactly.
pub mod enable_bits {
    pub const HTTP: u16 = 0x0001;
    pub const DNS: u16 = 0x0002;
    pub const REDIS: u16 = 0x0004;
    pub const MYSQL: u16 = 0x0008;
    pub const PGSQL: u16 = 0x0010;
    pub const KAFKA: u16 = 0x0020;
    pub const MONGO: u16 = 0x0040;
    pub const CQL: u16 = 0x0080;
    pub const NATS: u16 = 0x0100;
    pub const CRPC: u16 = 0x0200;
    pub const AMQP: u16 = 0x0400;
    pub const ALL: u16 = 0xFFFF;
}

/// Address family of an endpoint.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddrFamily {
    Ipv4 = 0,
    Ipv6 = 1,
}

/// IPv4 or IPv6 endpoint address. `ip` holds 4 bytes for `Ipv4` (the
/// remaining bytes are zero) or the full 16 bytes for `Ipv6`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnAddr {
    pub family: AddrFamily,
    pub port: u16,
    pub ip: [u8; 16],
}

impl Default for ConnAddr {
    fn default() -> Self {
        Self { family: AddrFamily::Ipv4, port: 0, ip: [0u8; 16] }
    }
}

/// Kind of a control event.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Open = 0,
    Close = 1,
}

/// `{ connection-id, timestamp-ns, kind, ... }` from the spec's §6.
///
/// Both the OPEN-only and CLOSE-only fields are always present (the source
/// this is modeled on, `conn_ctl_s`, carries both unconditionally); only the
/// fields matching `kind` are meaningful.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ControlEvent {
    pub conn_id: ConnId,
    pub timestamp_ns: u64,
    pub kind: ControlKind,
    pub client_addr: ConnAddr,
    pub server_addr: ConnAddr,
    pub l4_role: L4Role,
    pub is_ssl: bool,
    pub write_total: u64,
    pub read_total: u64,
}

/// `{ connection-id, timestamp-ns, write-total, read-total }` from §6.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct StatsEvent {
    pub conn_id: ConnId,
    pub timestamp_ns: u64,
    pub write_total: u64,
    pub read_total: u64,
}

/// Maximum payload a single data event may carry (matches the source's
/// `CONN_DATA_MAX_SIZE`, i.e. 8 KiB minus one byte).
pub const DATA_EVENT_MAX_SIZE: usize = 8 * 1024 - 1;

/// Fixed-size header of a data event; the variable-length payload travels
/// alongside it (see `l7_probe_core::event::DataEvent`, which pairs this
/// header with an owned byte buffer — `no_std` has no allocator here).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DataEventHeader {
    pub conn_id: ConnId,
    pub timestamp_ns: u64,
    pub protocol_hint: ProtoType,
    pub l7_role_hint: L7Role,
    pub direction: Direction,
    pub is_ssl: bool,
    pub absolute_offset: u64,
    pub actual_byte_length: u32,
    pub submitted_byte_length: u32,
    pub index: u32,
}

#[cfg(feature = "aya-pod")]
mod pod_impls {
    use super::*;

    /// SAFETY: all four structs are `#[repr(C)]`, `Copy`, and fully
    /// initialized with no implicit padding relied upon for correctness.
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for ConnId {}
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for ConnAddr {}
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for ControlEvent {}
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for StatsEvent {}
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for DataEventHeader {}
}
