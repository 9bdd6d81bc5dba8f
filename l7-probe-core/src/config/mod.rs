mod histogram;
mod limits;
mod loader;
mod protocols;
mod root;

pub use histogram::HistogramConfig;
pub use limits::{MatcherConfig, TrackerLimits};
pub use loader::load_from_path;
pub use protocols::ProtocolMask;
pub use root::EngineConfig;
