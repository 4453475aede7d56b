//! Tracker statistics.

use crate::util::size::format_bytes;

/// Aggregated tracker statistics.
#[derive(Debug, Clone, Default)]
pub struct TrackerStats {
    /// Number of tracked allocations currently live.
    pub live_count: usize,

    /// Sum of live payload sizes in bytes.
    pub live_bytes: usize,

    /// High water mark of `live_bytes`.
    pub peak_live_bytes: usize,

    /// Total tracked allocations performed.
    pub total_allocations: u64,

    /// Total tracked frees performed.
    pub total_frees: u64,

    /// Largest payload size ever tracked.
    pub max_observed_size: usize,

    /// Largest call-site line ever tracked.
    pub max_observed_line: u32,
}

impl TrackerStats {
    /// Create empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocations still outstanding according to the running counters.
    pub fn outstanding(&self) -> u64 {
        self.total_allocations.saturating_sub(self.total_frees)
    }
}

impl std::fmt::Display for TrackerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tracker Statistics:")?;
        writeln!(f, "  Live:        {} ({})", self.live_count, format_bytes(self.live_bytes))?;
        writeln!(f, "  Peak:        {}", format_bytes(self.peak_live_bytes))?;
        writeln!(f, "  Allocations: {}", self.total_allocations)?;
        writeln!(f, "  Frees:       {}", self.total_frees)?;
        writeln!(f, "  Outstanding: {}", self.outstanding())?;
        Ok(())
    }
}
