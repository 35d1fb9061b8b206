//! Error types for tessera-pool
//!
//! Only configuration and lifecycle problems are recoverable. Allocation
//! exhaustion aborts through [`std::alloc::handle_alloc_error`], and contract
//! violations (size-class mismatch, double release) panic at the call site.

use thiserror::Error;

/// Pool configuration and lifecycle errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid alignment: {alignment} (slots are aligned to {max})")]
    InvalidAlignment { alignment: usize, max: usize },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },
}

impl PoolError {
    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "POOL:CONFIG:INVALID",
            Self::InvalidAlignment { .. } => "POOL:ALLOC:ALIGN",
            Self::InvalidState { .. } => "POOL:SYSTEM:STATE",
        }
    }

    /// Create invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create invalid alignment error
    pub fn invalid_alignment(alignment: usize, max: usize) -> Self {
        Self::InvalidAlignment { alignment, max }
    }

    /// Create invalid state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;
