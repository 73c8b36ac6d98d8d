//! Error types for gati-slam.

use thiserror::Error;

/// Errors surfaced to the caller.
///
/// Only programming preconditions are hard errors. Per-sweep conditions
/// (under-dense sweeps, too few matches, a tripped divergence guard) are not
/// errors: they are reported through [`SweepSummary`](crate::SweepSummary)
/// with the pose left unchanged.
#[derive(Error, Debug)]
pub enum SlamError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },
}

impl SlamError {
    /// Shorthand for an invalid-parameter error.
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SlamError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SlamError>;
