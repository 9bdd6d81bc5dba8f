use serde::{Deserialize, Serialize};

use super::{HistogramConfig, MatcherConfig, ProtocolMask, TrackerLimits};

/// Aggregate engine configuration, loadable from TOML via
/// [`super::load_from_path`].
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub protocols: ProtocolMask,
    pub limits: TrackerLimits,
    pub matcher: MatcherConfig,
    pub histogram: HistogramConfig,
}
