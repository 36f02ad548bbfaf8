//! Effective-size computation
//!
//! Every entry carries a raw size (bytes on disk, or the number given on an
//! arbitrary-value line) and an effective size used for all partitioning
//! decisions. The transform is applied once, when the entry is created.

use crate::error::ConfigError;

/// Preload / overload / rounding knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTransform {
    /// Bytes added once to every partition's baseline
    pub preload: u64,
    /// Bytes added to every entry
    pub overload: u64,
    /// Entry sizes are rounded up to a multiple of this value
    pub round: u64,
}

impl Default for SizeTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SizeTransform {
    /// No preload, no overload, no rounding
    pub const IDENTITY: SizeTransform = SizeTransform {
        preload: 0,
        overload: 0,
        round: 1,
    };

    /// Build a transform, rejecting a rounding multiple of zero
    pub fn new(preload: u64, overload: u64, round: u64) -> Result<Self, ConfigError> {
        if round == 0 {
            return Err(ConfigError::InvalidSize(
                "rounding multiple must be at least 1".into(),
            ));
        }
        Ok(Self {
            preload,
            overload,
            round,
        })
    }

    /// `round_up(raw + overload, round)`, saturating at `u64::MAX`
    pub fn effective(&self, raw: u64) -> u64 {
        let size = raw.saturating_add(self.overload);
        if self.round <= 1 {
            return size;
        }
        match size % self.round {
            0 => size,
            rem => size.saturating_add(self.round - rem),
        }
    }

    /// Starting `total_size` of a freshly opened partition
    pub fn partition_baseline(&self) -> u64 {
        self.preload
    }
}
