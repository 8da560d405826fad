//! File size to buffer tier mapping.
//!
//! The exact thresholds are tuned constants. What matters is that the mapping
//! is a pure function of the file size and lands on a small fixed set of
//! capacities, because buffer pools are keyed by those capacities.

use serde::{Deserialize, Serialize};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Ring capacity and preload margin for one size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferTier {
    /// Ring buffer capacity in bytes
    pub capacity: usize,
    /// Bytes fetched behind a seek target
    pub preload_margin: u64,
}

impl BufferTier {
    /// Create a tier. The margin is kept strictly below the capacity so a
    /// freshly reset ring can always hold the seek target itself.
    pub fn new(capacity: usize, preload_margin: u64) -> Self {
        Self {
            capacity,
            preload_margin: preload_margin.min((capacity as u64).saturating_sub(1)),
        }
    }
}

/// One step of the tier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRule {
    /// Largest file size (inclusive) that falls into this tier
    pub max_file_size: u64,
    /// Ring capacity for the tier
    pub capacity: usize,
}

impl TierRule {
    /// Create a rule
    pub fn new(max_file_size: u64, capacity: usize) -> Self {
        Self {
            max_file_size,
            capacity,
        }
    }
}

/// Maps file sizes to [`BufferTier`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSizePolicy {
    /// Tier rules, ascending by `max_file_size`
    tiers: Vec<TierRule>,
    /// Capacity for files larger than every rule
    pub fallback_capacity: usize,
    /// Preload margin is `capacity / margin_divisor` ...
    pub margin_divisor: u64,
    /// ... capped at this many bytes
    pub max_preload_margin: u64,
}

impl Default for BufferSizePolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierRule::new(16 * MIB, MIB as usize),
                TierRule::new(256 * MIB, 4 * MIB as usize),
                TierRule::new(4 * GIB, 16 * MIB as usize),
            ],
            fallback_capacity: 32 * MIB as usize,
            margin_divisor: 16,
            max_preload_margin: MIB,
        }
    }
}

impl BufferSizePolicy {
    /// Replace the tier table. Rules are sorted by file size.
    pub fn with_tiers(mut self, tiers: impl IntoIterator<Item = TierRule>) -> Self {
        let mut tiers: Vec<TierRule> = tiers.into_iter().collect();
        tiers.sort_by_key(|t| t.max_file_size);
        self.tiers = tiers;
        self
    }

    /// Set the capacity used above the last rule
    pub fn with_fallback_capacity(mut self, capacity: usize) -> Self {
        self.fallback_capacity = capacity;
        self
    }

    /// Set the margin cap
    pub fn with_max_preload_margin(mut self, margin: u64) -> Self {
        self.max_preload_margin = margin;
        self
    }

    /// The tier rules in ascending order.
    pub fn tiers(&self) -> &[TierRule] {
        &self.tiers
    }

    /// Pick the tier for a file of `file_size` bytes.
    pub fn tier_for(&self, file_size: u64) -> BufferTier {
        let capacity = self
            .tiers
            .iter()
            .filter(|t| file_size <= t.max_file_size)
            .min_by_key(|t| t.max_file_size)
            .map_or(self.fallback_capacity, |t| t.capacity);

        BufferTier::new(capacity, self.margin_for(capacity))
    }

    fn margin_for(&self, capacity: usize) -> u64 {
        let divisor = self.margin_divisor.max(1);
        (capacity as u64 / divisor).min(self.max_preload_margin)
    }

    /// Every capacity this policy can produce, smallest first.
    pub fn capacities(&self) -> Vec<usize> {
        let mut caps: Vec<usize> = self.tiers.iter().map(|t| t.capacity).collect();
        caps.push(self.fallback_capacity);
        caps.sort_unstable();
        caps.dedup();
        caps
    }
}
