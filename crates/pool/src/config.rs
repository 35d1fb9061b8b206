//! Job pool configuration

use crate::error::{PoolError, PoolResult};

/// Configuration for [`JobManager`](crate::JobManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Enable per-node hit/steal/miss counters
    pub track_stats: bool,

    /// Scan other threads' pools before falling back to the heap
    pub steal: bool,

    /// Use exponential backoff for CAS retries
    pub use_backoff: bool,

    /// Fill pattern byte for slots handed out to callers (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for slots returned to a pool (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            steal: true,
            use_backoff: true,
            alloc_pattern: if cfg!(debug_assertions) {
                Some(0xBB)
            } else {
                None
            },
            dealloc_pattern: if cfg!(debug_assertions) {
                Some(0xDD)
            } else {
                None
            },
        }
    }
}

impl PoolConfig {
    /// Production configuration - stealing on, no diagnostics
    #[must_use]
    pub fn production() -> Self {
        Self {
            track_stats: false,
            steal: true,
            use_backoff: true,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - counters and fill patterns
    #[must_use]
    pub fn debug() -> Self {
        Self {
            track_stats: true,
            steal: true,
            use_backoff: false,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
        }
    }

    /// Performance configuration - minimal overhead
    #[must_use]
    pub fn performance() -> Self {
        Self {
            track_stats: false,
            steal: true,
            use_backoff: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Builder-style toggle for work stealing
    #[must_use]
    pub fn with_steal(mut self, steal: bool) -> Self {
        self.steal = steal;
        self
    }

    /// Builder-style toggle for statistics
    #[must_use]
    pub fn with_stats(mut self, track_stats: bool) -> Self {
        self.track_stats = track_stats;
        self
    }

    /// Check the configuration for values that would make diagnostics useless
    pub fn validate(&self) -> PoolResult<()> {
        if let (Some(alloc), Some(dealloc)) = (self.alloc_pattern, self.dealloc_pattern)
            && alloc == dealloc
        {
            return Err(PoolError::invalid_config(format!(
                "alloc and dealloc fill patterns must differ (both are {alloc:#04x})"
            )));
        }
        Ok(())
    }
}
