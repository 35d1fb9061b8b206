//! Small helpers shared by the pool and its consumers

/// Backoff utility for spin loops
///
/// Used by every CAS retry loop in this crate and by the reference
/// executors while they wait for work.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
    max: u32,
}

impl Backoff {
    /// Create new backoff with default parameters
    #[inline]
    pub fn new() -> Self {
        Self {
            current: 1,
            max: 64,
        }
    }

    /// Create backoff with custom maximum
    #[inline]
    pub fn with_max(max: u32) -> Self {
        Self {
            current: 1,
            max: max.max(1),
        }
    }

    /// Spin for the current step and double it, up to the maximum
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.current {
            core::hint::spin_loop();
        }
        if self.current < self.max {
            self.current *= 2;
        }
    }

    /// Reset backoff
    #[inline]
    pub fn reset(&mut self) {
        self.current = 1;
    }

    /// Spin while the step is short, yield the thread once it saturates
    #[inline]
    pub fn spin_or_yield(&mut self) {
        if self.current < self.max {
            self.spin();
        } else {
            std::thread::yield_now();
        }
    }

    /// Whether the next step would yield instead of spinning
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.current >= self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Round `value` up to a multiple of `align` (a power of two)
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
