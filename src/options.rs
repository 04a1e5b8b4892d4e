//! Mux/demux configuration.
//!
//! Options are a plain serde struct so callers can keep them in a JSON
//! file next to their other settings; every field has a default.

use serde::{Deserialize, Serialize};

use crate::error::{GavfError, Result};

/// Default spacing of sync headers for streams without P-frames: 0.5 s.
pub const DEFAULT_SYNC_DISTANCE: i64 = 500_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Minimum time between sync headers in microseconds.  Only used when
    /// no stream has P-frames; otherwise keyframes decide.
    pub sync_distance:     i64,
    /// Write (and expect) a GAVFSIDX chunk.
    pub sync_index:        bool,
    /// Write a GAVFPIDX chunk.
    pub packet_index:      bool,
    /// Interleave streams by PTS.  When off, packets go out in arrival order.
    pub interleave:        bool,
    /// Shift presented PTS so the earliest stream starts at zero.
    pub pts_normalization: bool,
    pub dump_headers:      bool,
    pub dump_indices:      bool,
    pub dump_packets:      bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sync_distance:     DEFAULT_SYNC_DISTANCE,
            sync_index:        true,
            packet_index:      false,
            interleave:        true,
            pts_normalization: true,
            dump_headers:      false,
            dump_indices:      false,
            dump_packets:      false,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.sync_distance < 0 {
            return Err(GavfError::InvalidOptions(format!(
                "sync_distance must not be negative, got {}",
                self.sync_distance
            )));
        }
        Ok(())
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let opts: Options = serde_json::from_str(s)?;
        opts.validate()?;
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let opts = Options::from_json(r#"{ "packet_index": true }"#).unwrap();
        assert!(opts.packet_index);
        assert!(opts.sync_index);
        assert_eq!(opts.sync_distance, DEFAULT_SYNC_DISTANCE);
    }

    #[test]
    fn negative_sync_distance_is_rejected() {
        let opts = Options { sync_distance: -1, ..Default::default() };
        assert!(matches!(opts.validate(), Err(GavfError::InvalidOptions(_))));
        assert!(Options::from_json(r#"{ "sync_distance": -5 }"#).is_err());
    }
}
