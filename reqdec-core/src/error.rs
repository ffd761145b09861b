//! Error types for the decode pipeline and the device channel.

use crate::device::QueueKind;
use thiserror::Error;

/// Errors reported by a [`DecodeDevice`](crate::device::DecodeDevice) implementation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out waiting for {0:?} queue")]
    Timeout(QueueKind),
    #[error("Slot {index} out of range for {queue:?} queue ({count} slots)")]
    InvalidSlot {
        queue: QueueKind,
        index: usize,
        count: usize,
    },
    #[error("Nothing queued on {0:?} queue")]
    Idle(QueueKind),
    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

impl DeviceError {
    /// Capture `errno` for a failed libc call.
    pub fn last_os_error(op: &'static str) -> Self {
        Self::Io {
            op,
            source: std::io::Error::last_os_error(),
        }
    }
}

/// Errors returned by the decode context.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Invalid buffer id {0}")]
    InvalidBuffer(u32),
    #[error("Invalid surface {0}")]
    InvalidSurface(u32),
    #[error("Invalid {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u32 },
    #[error("Unsupported buffer type {0}")]
    UnsupportedBufferKind(i32),
    #[error("Unsupported profile {0}")]
    UnsupportedProfile(i32),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),
    #[error("No picture is being assembled")]
    NoRenderTarget,
    #[error("Job submission failed: {0}")]
    SubmissionFailed(#[source] DeviceError),
    #[error("Failed to apply frame header to job: {0}")]
    ControlApplyFailed(#[source] DeviceError),
    #[error("Failed to queue {queue:?} buffer: {source}")]
    EnqueueFailed {
        queue: QueueKind,
        #[source]
        source: DeviceError,
    },
    #[error("Device reported a decode error for surface {0}")]
    DecodeFailed(u32),
    #[error("Timed out waiting for surface {0}")]
    Timeout(u32),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub type Result<T> = std::result::Result<T, DriverError>;
