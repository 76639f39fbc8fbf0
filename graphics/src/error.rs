//! Errors raised by the graphics device and its resources.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphicsError {
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("access of {len} bytes at offset {offset} exceeds resource size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    /// Resources may only be created on the thread that owns the device.
    #[error("{0} must be created on the device's owning thread")]
    WrongThread(String),
    #[error("internal error: {0}")]
    Internal(String),
}
