use std::fs;
use std::path::Path;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<EngineConfig> {
    let txt = fs::read_to_string(p)
        .map_err(|e| EngineError::Config(format!("failed to read config file: {e}")))?;
    let cfg: EngineConfig = toml::from_str(&txt)
        .map_err(|e| EngineError::Config(format!("failed to parse config: {e}")))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &EngineConfig) -> Result<()> {
    if cfg.limits.max_trackers == 0 {
        return Err(EngineError::Config("limits.max_trackers must be > 0".into()));
    }
    if cfg.limits.frame_queue_cap == 0 {
        return Err(EngineError::Config("limits.frame_queue_cap must be > 0".into()));
    }
    if cfg.limits.raw_buffer_cap_bytes == 0 {
        return Err(EngineError::Config("limits.raw_buffer_cap_bytes must be > 0".into()));
    }
    if cfg.histogram.bucket_bounds_ns.windows(2).any(|w| w[0] >= w[1]) {
        return Err(EngineError::Config(
            "histogram.bucket_bounds_ns must be strictly ascending".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_from_empty_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "").unwrap();
        let cfg = load_from_path(file.path()).unwrap();
        assert_eq!(cfg.limits.max_trackers, 100_000);
    }

    #[test]
    fn rejects_non_ascending_histogram_buckets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[histogram]\nbucket_bounds_ns = [100, 50]").unwrap();
        assert!(load_from_path(file.path()).is_err());
    }

    #[test]
    fn rejects_zero_max_trackers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_trackers = 0").unwrap();
        assert!(load_from_path(file.path()).is_err());
    }
}
