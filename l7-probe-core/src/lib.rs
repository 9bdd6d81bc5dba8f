//! Protocol classification and request/response reconstruction engine for
//! the L7 probe.
//!
//! This crate is the "core" the spec scopes itself to: a stateless
//! protocol inferrer (C1), an append-only raw byte buffer (C2), one frame
//! extractor per protocol (C3), a per-direction data stream (C4), a
//! per-connection tracker (C5), and a request/response matcher (C6) —
//! plus the tracker table ([`engine::Engine`]) an embedder drives with
//! the kernel tap's control/stats/data events. Everything upstream of
//! "decoded events arrive here" (the eBPF programs, the ring transport,
//! TLS attach/detach) and downstream of "records are produced" (output
//! serialization, the process filter, the CLI, bootstrap) is out of
//! scope and lives in other crates.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod extract;
pub mod frame;
pub mod inference;
pub mod matcher;
pub mod protocol;
pub mod record;
pub mod stream;
pub mod telemetry;
pub mod tracker;

pub use config::{load_from_path, EngineConfig, HistogramConfig, MatcherConfig, ProtocolMask, TrackerLimits};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use event::DataEvent;
pub use frame::{Frame, MessageKind};
pub use record::Record;
pub use tracker::Tracker;
