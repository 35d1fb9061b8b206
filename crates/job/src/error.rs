//! Error types for tessera-job
//!
//! Spawning itself never fails: fan-out overflow and a second continuation
//! are programming errors and panic. Only limits and executor settings are
//! validated up front.

use thiserror::Error;

/// Job configuration errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid spawn limits: {reason}")]
    InvalidLimits { reason: String },

    #[error("Invalid executor configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl JobError {
    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLimits { .. } => "JOB:SPAWN:LIMITS",
            Self::InvalidConfig { .. } => "JOB:EXECUTOR:CONFIG",
        }
    }

    /// Create invalid limits error
    pub fn invalid_limits(reason: impl Into<String>) -> Self {
        Self::InvalidLimits {
            reason: reason.into(),
        }
    }

    /// Create invalid executor configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type for job configuration
pub type JobResult<T> = Result<T, JobError>;
