//! Component C5's outer half: the tracker table an embedder drives with
//! control/stats/data events (§6's "Input event channels"), plus the
//! bounded output-record queue and the idle/LRU eviction policy §5
//! describes.
//!
//! Grounded on the teacher's `proxy/connection/manager.rs` for the shape of
//! a thing that owns a bounded collection of live connections, rejects or
//! evicts past a configured cap, and counts every admission/eviction via
//! `telemetry::Metrics` rather than logging alone.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use l7_probe_common::{ConnId, ControlEvent, ControlKind, StatsEvent};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::DataEvent;
use crate::record::Record;
use crate::telemetry::Metrics;
use crate::tracker::Tracker;

/// Owns every live [`Tracker`] for one worker (§5: "single-threaded
/// cooperative per worker ... multiple workers, each owning a disjoint set
/// of trackers keyed by connection-identity hash, are permitted" — sharding
/// across `Engine` instances is the embedder's job, not this struct's) plus
/// the bounded record queue shared with the sink.
pub struct Engine {
    config: EngineConfig,
    metrics: Arc<Metrics>,
    trackers: AHashMap<ConnId, Tracker>,
    output: VecDeque<Record>,
    shutdown: bool,
}

impl Engine {
    pub fn new(config: EngineConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            trackers: AHashMap::new(),
            output: VecDeque::new(),
            shutdown: false,
        }
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Classified protocol of a live tracker, or `None` if the identity
    /// isn't currently tracked or hasn't classified yet. Read-only
    /// introspection for an embedder's own reporting (§6's output records
    /// already carry `proto` for matched pairs; this covers the gap before
    /// any pair has completed).
    pub fn protocol_of(&self, conn_id: ConnId) -> Option<l7_probe_common::ProtoType> {
        self.trackers.get(&conn_id).map(|t| t.proto())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Insert a freshly built tracker, evicting the least-recently-active
    /// one first if the table is already at `limits.max_trackers` (§5:
    /// "total trackers <= 100_000; LRU eviction by last-event timestamp").
    fn admit(&mut self, conn_id: ConnId, make: impl FnOnce() -> Tracker) -> Result<()> {
        if self.trackers.len() >= self.config.limits.max_trackers {
            let lru = self
                .trackers
                .iter()
                .min_by_key(|(_, t)| t.last_event_ns())
                .map(|(id, _)| *id);
            match lru {
                Some(id) => {
                    self.trackers.remove(&id);
                    self.metrics.trackers_evicted_total.add(1, &[]);
                    self.metrics.trackers_active.add(-1, &[]);
                    debug!(?id, "evicted least-recently-active tracker to admit a new connection");
                }
                // Only reachable if max_trackers == 0, which
                // config::load_from_path's validation already rejects; an
                // embedder building EngineConfig by hand can still hit it.
                None => {
                    return Err(EngineError::TrackerTableFull {
                        current: self.trackers.len(),
                        cap: self.config.limits.max_trackers,
                    });
                }
            }
        }
        self.trackers.insert(conn_id, make());
        self.metrics.trackers_created_total.add(1, &[]);
        self.metrics.trackers_active.add(1, &[]);
        Ok(())
    }

    /// Route a control event: `OPEN` creates (or replaces) a tracker,
    /// `CLOSE` drains its streams one last time and destroys it (§4.5).
    pub fn on_control(&mut self, ev: &ControlEvent) {
        match ev.kind {
            ControlKind::Open => {
                if self.trackers.remove(&ev.conn_id).is_some() {
                    // Identity reused before the prior connection's CLOSE
                    // arrived (§3: "trackers are destroyed on close and
                    // recreated on open") — the stale tracker's state is
                    // simply discarded, same as the kernel-tap source does
                    // when an OPEN lands on a still-occupied slot.
                    self.metrics.trackers_active.add(-1, &[]);
                }
                let limits = self.config.limits;
                let matcher_config = self.config.matcher;
                let conn_id = ev.conn_id;
                let client_addr = ev.client_addr;
                let server_addr = ev.server_addr;
                let opened_at = ev.timestamp_ns;
                if let Err(e) = self.admit(conn_id, || {
                    Tracker::new(conn_id, client_addr, server_addr, opened_at, limits, matcher_config)
                }) {
                    warn!(error = %e, ?conn_id, "failed to admit tracker on OPEN");
                    return;
                }
                info!(?conn_id, is_ssl = ev.is_ssl, "tracker opened");
            }
            ControlKind::Close => {
                let records = self.close_tracker(ev.conn_id, ev.timestamp_ns);
                self.enqueue(records);
            }
        }
    }

    fn close_tracker(&mut self, conn_id: ConnId, now_ns: u64) -> Vec<Record> {
        match self.trackers.remove(&conn_id) {
            Some(mut tracker) => {
                let records = tracker.reap_orphans(now_ns, &self.metrics);
                self.metrics.trackers_destroyed_total.add(1, &[]);
                self.metrics.trackers_active.add(-1, &[]);
                info!(?conn_id, "tracker closed");
                records
            }
            None => Vec::new(),
        }
    }

    /// A stats event carries no payload but keeps a connection alive for
    /// idle-eviction purposes (§4.5).
    pub fn on_stats(&mut self, ev: &StatsEvent) {
        if let Some(tracker) = self.trackers.get_mut(&ev.conn_id) {
            tracker.touch(ev.timestamp_ns);
        }
    }

    /// Route one data event to its tracker, implicitly creating one if no
    /// `OPEN` was observed first (§4.5: "created on first event for a new
    /// identity or on an explicit OPEN control event"). Matched/orphaned
    /// records are appended to the bounded output queue.
    pub fn on_data(&mut self, ev: &DataEvent) {
        let conn_id = ev.header.conn_id;
        if !self.trackers.contains_key(&conn_id) {
            let limits = self.config.limits;
            let matcher_config = self.config.matcher;
            let opened_at = ev.header.timestamp_ns;
            if let Err(e) = self.admit(conn_id, || {
                Tracker::new(conn_id, Default::default(), Default::default(), opened_at, limits, matcher_config)
            }) {
                warn!(error = %e, ?conn_id, "dropping data event: tracker table full");
                return;
            }
        }
        let records = {
            let tracker = self.trackers.get_mut(&conn_id).expect("just admitted above");
            tracker.on_data(ev, self.config.protocols, &self.metrics)
        };
        debug!(?conn_id, n = records.len(), "data event produced records");
        self.enqueue(records);
    }

    /// Sweep every tracker for frames orphaned past `T_orphan` and for
    /// connections idle past `idle_timeout_ns` (§4.5, §4.6). An embedder
    /// calls this once per reporting interval, not per event.
    pub fn tick(&mut self, now_ns: u64) {
        let idle_timeout = self.config.limits.idle_timeout_ns;
        let idle: Vec<ConnId> = self
            .trackers
            .iter()
            .filter(|(_, t)| t.is_idle(now_ns, idle_timeout))
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::new();
        for conn_id in idle {
            out.extend(self.close_tracker(conn_id, now_ns));
        }
        for tracker in self.trackers.values_mut() {
            out.extend(tracker.reap_orphans(now_ns, &self.metrics));
        }
        self.enqueue(out);
    }

    /// Append freshly produced records to the bounded output queue,
    /// dropping the oldest entries on overflow and counting each drop
    /// (§4.6: "Records are appended to a bounded output queue; overflow
    /// drops the oldest and increments a counter").
    fn enqueue(&mut self, records: Vec<Record>) {
        let cap = self.config.matcher.output_queue_cap;
        for record in records {
            if self.output.len() >= cap {
                self.output.pop_front();
                self.metrics.records_dropped_total.add(1, &[]);
            }
            self.output.push_back(record);
        }
    }

    /// Drain every record currently sitting in the output queue — the step
    /// an embedder's sink loop calls to hand records to its (opaque, §6)
    /// callback.
    pub fn drain_records(&mut self) -> Vec<Record> {
        self.output.drain(..).collect()
    }

    /// Request a graceful shutdown (§5's cancellation model): every
    /// tracker's in-flight frames are drained with one last orphan sweep,
    /// then the table itself is destroyed. Already-queued records remain
    /// available through [`Self::drain_records`].
    pub fn shutdown(&mut self, now_ns: u64) {
        self.shutdown = true;
        let mut out = Vec::new();
        for (_, mut tracker) in self.trackers.drain() {
            out.extend(tracker.reap_orphans(now_ns, &self.metrics));
            self.metrics.trackers_destroyed_total.add(1, &[]);
            self.metrics.trackers_active.add(-1, &[]);
        }
        info!(n = out.len(), "engine shutdown: tracker table drained");
        self.enqueue(out);
    }
}
