//! The emitted output unit (§6): a matched request/response pair, or a
//! solitary frame for protocols/flows where no counterpart ever arrives.

use l7_probe_common::{ConnAddr, ConnId, L7Role, ProtoType};

use crate::frame::{Frame, MessageKind};

/// A completed observation: either a matched request/response pair or a
/// single unmatched frame emitted after the matcher gives up waiting for
/// its counterpart (still useful: it carries the frame's own fields even
/// without a measured latency).
#[derive(Clone, Debug)]
pub struct Record {
    pub conn_id: ConnId,
    pub client_addr: ConnAddr,
    pub server_addr: ConnAddr,
    pub proto: ProtoType,
    pub l7_role: L7Role,
    pub request: Option<Frame>,
    pub response: Option<Frame>,
    /// Response timestamp minus request timestamp, in nanoseconds. `None`
    /// when either side is missing.
    pub latency_ns: Option<u64>,
}

impl Record {
    pub fn from_pair(
        conn_id: ConnId,
        client_addr: ConnAddr,
        server_addr: ConnAddr,
        proto: ProtoType,
        l7_role: L7Role,
        request: Frame,
        response: Frame,
    ) -> Self {
        let latency_ns = response.timestamp_ns.checked_sub(request.timestamp_ns);
        Self {
            conn_id,
            client_addr,
            server_addr,
            proto,
            l7_role,
            request: Some(request),
            response: Some(response),
            latency_ns,
        }
    }

    pub fn orphan(
        conn_id: ConnId,
        client_addr: ConnAddr,
        server_addr: ConnAddr,
        proto: ProtoType,
        l7_role: L7Role,
        frame: Frame,
    ) -> Self {
        let (request, response) = match frame.kind {
            MessageKind::Request => (Some(frame), None),
            _ => (None, Some(frame)),
        };
        Self {
            conn_id,
            client_addr,
            server_addr,
            proto,
            l7_role,
            request,
            response,
            latency_ns: None,
        }
    }
}
