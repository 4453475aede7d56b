//! Tracker configuration.

/// Configuration for the leak tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Flank every tracked payload with zero-initialized guard regions and
    /// scan them on free (default: off).
    pub corruption_check: bool,

    /// Byte width of each guard region when corruption checking is on.
    /// Normalized up to a 16-byte multiple at tracker construction.
    pub guard_region_size: usize,

    /// Fill released payloads with a known pattern so use-after-free reads
    /// are recognizable (default: off).
    pub poison_on_free: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            corruption_check: false,
            guard_region_size: 256,
            poison_on_free: false,
        }
    }
}

impl TrackerConfig {
    /// Everything on: guard regions and freed-memory poisoning. The
    /// configuration an engine debug build wants.
    pub fn paranoid() -> Self {
        Self {
            corruption_check: true,
            guard_region_size: 256,
            poison_on_free: true,
        }
    }

    /// Builder pattern: enable or disable corruption checking.
    pub fn with_corruption_check(mut self, enable: bool) -> Self {
        self.corruption_check = enable;
        self
    }

    /// Builder pattern: set the guard region width.
    pub fn with_guard_region_size(mut self, size: usize) -> Self {
        self.guard_region_size = size;
        self
    }

    /// Builder pattern: enable or disable freed-memory poisoning.
    pub fn with_poison_on_free(mut self, enable: bool) -> Self {
        self.poison_on_free = enable;
        self
    }
}
