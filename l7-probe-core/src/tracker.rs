//! Component C5: per-connection state. A `Tracker` owns the classification
//! scratch for an as-yet-unknown protocol, and — once classified — the
//! pair of [`DataStream`]s (one per direction) and the [`Matcher`] that
//! turns their frames into [`Record`]s.
//!
//! Grounded on `original_source/l7probe/include/l7.h`'s per-connection
//! `sock_conn_info_s` (the struct the kernel-tap source keys all of this
//! scratch off of: protocol, role, and the MySQL header carry) and on the
//! teacher's `proxy/connection/manager.rs` for the general shape of
//! connection-lifecycle state living in one struct.

use l7_probe_common::{ConnAddr, ConnId, DataEventHeader, Direction, L7Role, ProtoType};

use crate::config::{MatcherConfig, ProtocolMask, TrackerLimits};
use crate::event::DataEvent;
use crate::frame::Frame;
use crate::inference::classify_for_tracker;
use crate::matcher::{MatchOutcome, Matcher};
use crate::protocol::{self, mysql};
use crate::record::Record;
use crate::stream::DataStream;
use crate::telemetry::Metrics;

/// Derive the fixed L7 role from the direction and kind of the frame that
/// first got this connection classified (§4.3 invariant: "set once,
/// held fixed for the tracker's lifetime"): `(direction == egress) XOR
/// (kind == response)` selects client, else server.
fn derive_l7_role(direction: Direction, kind: crate::frame::MessageKind) -> L7Role {
    let is_egress = direction == Direction::Egress;
    let is_response = kind == crate::frame::MessageKind::Response;
    if is_egress ^ is_response {
        L7Role::Client
    } else {
        L7Role::Server
    }
}

struct TrackerStreams {
    egress: DataStream,
    ingress: DataStream,
}

impl TrackerStreams {
    fn new(proto: ProtoType, limits: &TrackerLimits) -> Self {
        let new_stream = |direction| {
            DataStream::new(
                direction,
                protocol::new_extractor(proto).expect("classified proto always has an extractor"),
                limits.raw_buffer_cap_bytes,
                limits.raw_buffer_compaction_threshold,
                limits.frame_queue_cap,
                limits.stuck_threshold,
                limits.max_parse_window_bytes,
            )
        };
        Self { egress: new_stream(Direction::Egress), ingress: new_stream(Direction::Ingress) }
    }

    fn stream_mut(&mut self, direction: Direction) -> &mut DataStream {
        match direction {
            Direction::Egress => &mut self.egress,
            Direction::Ingress => &mut self.ingress,
        }
    }

    /// Pop every queued frame from both directions, interleaved by arrival
    /// timestamp so the matcher sees them in the order they actually
    /// happened rather than grouped by direction.
    fn drain_all(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        loop {
            let e_ts = self.egress.peek_frame().map(|f| f.timestamp_ns);
            let i_ts = self.ingress.peek_frame().map(|f| f.timestamp_ns);
            match (e_ts, i_ts) {
                (None, None) => break,
                (Some(_), None) => out.push(self.egress.pop_frame().unwrap()),
                (None, Some(_)) => out.push(self.ingress.pop_frame().unwrap()),
                (Some(e), Some(i)) => {
                    if e <= i {
                        out.push(self.egress.pop_frame().unwrap());
                    } else {
                        out.push(self.ingress.pop_frame().unwrap());
                    }
                }
            }
        }
        out
    }
}

/// Per-connection classification and matching state (component C5).
pub struct Tracker {
    pub conn_id: ConnId,
    pub client_addr: ConnAddr,
    pub server_addr: ConnAddr,
    proto: ProtoType,
    l7_role: L7Role,
    /// Accumulated bytes per direction while `proto` is still `Unknown`,
    /// capped at `limits.unknown_tracker_buffer_cap_bytes` (§4.5).
    unknown_egress: Vec<u8>,
    unknown_ingress: Vec<u8>,
    mysql_carry: mysql::Carry,
    streams: Option<TrackerStreams>,
    matcher: Option<Matcher>,
    limits: TrackerLimits,
    matcher_config: MatcherConfig,
    last_event_ns: u64,
}

impl Tracker {
    pub fn new(
        conn_id: ConnId,
        client_addr: ConnAddr,
        server_addr: ConnAddr,
        opened_at_ns: u64,
        limits: TrackerLimits,
        matcher_config: MatcherConfig,
    ) -> Self {
        Self {
            conn_id,
            client_addr,
            server_addr,
            proto: ProtoType::Unknown,
            l7_role: L7Role::Unknown,
            unknown_egress: Vec::new(),
            unknown_ingress: Vec::new(),
            mysql_carry: mysql::Carry::default(),
            streams: None,
            matcher: None,
            limits,
            matcher_config,
            last_event_ns: opened_at_ns,
        }
    }

    pub fn proto(&self) -> ProtoType {
        self.proto
    }

    pub fn l7_role(&self) -> L7Role {
        self.l7_role
    }

    pub fn last_event_ns(&self) -> u64 {
        self.last_event_ns
    }

    /// Bump the last-seen timestamp without feeding any bytes through
    /// classification — used for stats events, which keep a connection
    /// alive for LRU/idle purposes without carrying payload.
    pub fn touch(&mut self, now_ns: u64) {
        self.last_event_ns = self.last_event_ns.max(now_ns);
    }

    fn unknown_buf_mut(&mut self, direction: Direction) -> &mut Vec<u8> {
        match direction {
            Direction::Egress => &mut self.unknown_egress,
            Direction::Ingress => &mut self.unknown_ingress,
        }
    }

    /// Append to the unknown-protocol scratch, silently dropping bytes past
    /// the configured cap rather than growing unbounded while a connection
    /// never resolves to a known protocol (§4.5).
    fn grow_unknown(&mut self, direction: Direction, chunk: &[u8]) {
        let cap = self.limits.unknown_tracker_buffer_cap_bytes;
        let buf = self.unknown_buf_mut(direction);
        if buf.len() >= cap {
            return;
        }
        let take = chunk.len().min(cap - buf.len());
        buf.extend_from_slice(&chunk[..take]);
    }

    /// Handle one data event, returning every [`Record`] it produced
    /// (zero, one, or more — a single event can complete several frames
    /// already sitting in the buffer).
    pub fn on_data(&mut self, event: &DataEvent, mask: ProtocolMask, metrics: &Metrics) -> Vec<Record> {
        let header: &DataEventHeader = &event.header;
        self.last_event_ns = header.timestamp_ns;

        if self.proto == ProtoType::Unknown {
            self.grow_unknown(header.direction, &event.payload);
            let buf = self.unknown_buf_mut(header.direction).clone();
            match classify_for_tracker(&buf, header.direction, mask, &mut self.mysql_carry) {
                Some(classification) => {
                    self.proto = classification.proto;
                    self.l7_role = derive_l7_role(header.direction, classification.kind);

                    let mut streams = TrackerStreams::new(self.proto, &self.limits);
                    // Replay whatever was accumulated on both directions
                    // before classification landed, in direction order —
                    // the bytes that triggered classification are already
                    // included in `unknown_egress`/`unknown_ingress`.
                    let egress_backlog = std::mem::take(&mut self.unknown_egress);
                    let ingress_backlog = std::mem::take(&mut self.unknown_ingress);
                    if !egress_backlog.is_empty() {
                        streams.egress.append(&egress_backlog, header.timestamp_ns, metrics);
                    }
                    if !ingress_backlog.is_empty() {
                        streams.ingress.append(&ingress_backlog, header.timestamp_ns, metrics);
                    }
                    self.matcher = Some(Matcher::new(self.proto, self.matcher_config.orphan_timeout_ns));
                    let frames = streams.drain_all();
                    self.streams = Some(streams);
                    return self.match_frames(frames, metrics);
                }
                None => {
                    metrics.frames_unknown_total.add(1, &[]);
                    return Vec::new();
                }
            }
        }

        let streams = self.streams.as_mut().expect("proto known implies streams exist");
        let stream = streams.stream_mut(header.direction);
        stream.append(&event.payload, header.timestamp_ns, metrics);
        let gap = event.gap_len();
        if gap > 0 {
            stream.skip_gap(gap);
        }
        let frames = streams.drain_all();
        self.match_frames(frames, metrics)
    }

    fn match_frames(&mut self, frames: Vec<Frame>, metrics: &Metrics) -> Vec<Record> {
        let matcher = match self.matcher.as_mut() {
            Some(m) => m,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        for frame in frames {
            match matcher.push_frame(frame) {
                MatchOutcome::Matched { request, response } => {
                    let latency_ns = response.timestamp_ns.checked_sub(request.timestamp_ns);
                    if let Some(ns) = latency_ns {
                        metrics.match_latency_seconds.record(ns as f64 / 1e9, &[]);
                    }
                    metrics.records_emitted_total.add(1, &[]);
                    out.push(Record::from_pair(
                        self.conn_id,
                        self.client_addr,
                        self.server_addr,
                        self.proto,
                        self.l7_role,
                        request,
                        response,
                    ));
                }
                MatchOutcome::Pending => {}
                MatchOutcome::PassThrough(frame) => {
                    metrics.records_emitted_total.add(1, &[]);
                    out.push(Record::orphan(
                        self.conn_id,
                        self.client_addr,
                        self.server_addr,
                        self.proto,
                        self.l7_role,
                        frame,
                    ));
                }
            }
        }
        out
    }

    /// Evict frames the matcher has been holding past the orphan timeout
    /// (§4.6), turning each into its own unmatched [`Record`].
    pub fn reap_orphans(&mut self, now_ns: u64, metrics: &Metrics) -> Vec<Record> {
        let (conn_id, client_addr, server_addr, proto, l7_role) =
            (self.conn_id, self.client_addr, self.server_addr, self.proto, self.l7_role);
        let matcher = match self.matcher.as_mut() {
            Some(m) => m,
            None => return Vec::new(),
        };
        matcher
            .reap_orphans(now_ns)
            .into_iter()
            .map(|frame| {
                match frame.kind {
                    crate::frame::MessageKind::Request => {
                        metrics.orphan_requests_total.add(1, &[])
                    }
                    _ => metrics.orphan_responses_total.add(1, &[]),
                }
                Record::orphan(conn_id, client_addr, server_addr, proto, l7_role, frame)
            })
            .collect()
    }

    /// Has this connection seen no events for longer than `idle_timeout_ns`?
    pub fn is_idle(&self, now_ns: u64, idle_timeout_ns: u64) -> bool {
        now_ns.saturating_sub(self.last_event_ns) > idle_timeout_ns
    }

    pub fn streams_desynced(&self) -> bool {
        self.streams
            .as_ref()
            .is_some_and(|s| s.egress.desynced() || s.ingress.desynced())
    }
}
