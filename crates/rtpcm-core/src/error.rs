use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by control and consumer operations.
///
/// Under-runs never show up here; they are counted and exposed through
/// [`Diagnostics`](crate::tracker::Diagnostics).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("allocation failed: {0}")]
    AllocationFailure(#[from] AllocationError),
    #[error("a session is already active on {device}")]
    ExclusivityViolation { device: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("copy fault: needed {needed} bytes, caller provided {available}")]
    CopyFault { needed: usize, available: usize },
    #[error("completion signal destroyed")]
    SignalDestroyed,
    #[error("hardware layer failure: {0}")]
    Hardware(#[from] HardwareError),
}

impl SessionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SessionError::InvalidRequest(message.into())
    }

    /// Whether the consumer loop should exit instead of reporting a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SessionError::SignalDestroyed)
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::InvalidRequest(err.to_string())
    }
}

/// Failures while building the buffer or the descriptor tables.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("requested region of {bytes} bytes overflows the address space")]
    Overflow { bytes: usize },
    #[error("zero-sized period buffer requested")]
    Empty,
    #[error("allocator refused {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("region of {provided} bytes is smaller than the {required} bytes required")]
    RegionTooSmall { required: usize, provided: usize },
    #[error("{direction} table of {channels} channels exceeds the descriptor limit")]
    TooManyChannels {
        direction: &'static str,
        channels: usize,
    },
    #[error("{channels} channels do not fit a frame of {frame_width} words")]
    FrameTooNarrow { channels: usize, frame_width: usize },
}

/// Failures reported by a [`HardwareLayer`](crate::hardware::HardwareLayer).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("producer already registered")]
    AlreadyRegistered,
    #[error("hardware unavailable: {0}")]
    Unavailable(String),
}
