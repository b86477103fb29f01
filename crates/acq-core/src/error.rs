//! Error types for the acquisition adapter.
//!
//! Two layers:
//!
//! - [`DeviceError`]: a failure reported by the camera device API, carrying
//!   the device-level status code alongside a human-readable message.
//! - [`CameraError`]: the error type surfaced by control-path methods of the
//!   adapter (`prepare`, `start_acq`, setters, ...). Completion-callback
//!   errors are never raised through this type; they are recorded as state
//!   and observed through status queries.

use crate::device::DeviceStatus;
use thiserror::Error;

/// Convenience alias for results using the adapter error type.
pub type CamResult<T> = std::result::Result<T, CameraError>;

/// Which part of the device API a [`DeviceError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Attribute get/set or range query.
    Attribute,
    /// Command execution (acquisition start/stop, software trigger).
    Command,
    /// Capture lifecycle (begin/end/clear-queue).
    Capture,
    /// Frame enqueue.
    Queue,
    /// Connection-level failure.
    Connection,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceErrorKind::Attribute => "attribute",
            DeviceErrorKind::Command => "command",
            DeviceErrorKind::Capture => "capture",
            DeviceErrorKind::Queue => "queue",
            DeviceErrorKind::Connection => "connection",
        };
        write!(f, "{label}")
    }
}

/// A failure reported by the device API.
///
/// The device uses one status code space both for synchronous call failures
/// and for asynchronous frame-completion statuses, so the same
/// [`DeviceStatus`] appears in both places.
#[derive(Error, Debug, Clone)]
#[error("device {kind} error ({status:?}): {message}")]
pub struct DeviceError {
    /// API area the failure came from.
    pub kind: DeviceErrorKind,
    /// Device-level status code.
    pub status: DeviceStatus,
    /// Context (attribute name, command, ...).
    pub message: String,
}

impl DeviceError {
    /// Build a device error.
    pub fn new(kind: DeviceErrorKind, status: DeviceStatus, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Attribute get/set failure for a named attribute.
    pub fn attribute(name: &str, detail: impl Into<String>) -> Self {
        Self::new(
            DeviceErrorKind::Attribute,
            DeviceStatus::BadParameter,
            format!("{name}: {}", detail.into()),
        )
    }
}

/// Primary error type for adapter control paths.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device API rejected or failed a call.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The requested mode or operation is not supported by this adapter.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A numeric or enumerated setting was out of range or malformed.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A component was used before it was wired or prepared.
    ///
    /// Typically `start()` without `prepare()`, or a pipeline that was never
    /// bound to its sync controller.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The camera connection was lost or never established.
    #[error("camera not connected")]
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_display_names_the_area() {
        let err = DeviceError::attribute("FrameRate", "value out of range");
        assert!(err.to_string().contains("attribute"));
        assert!(err.to_string().contains("FrameRate"));
    }

    #[test]
    fn camera_error_wraps_device_error() {
        let err: CameraError =
            DeviceError::new(DeviceErrorKind::Command, DeviceStatus::Timeout, "AcquisitionStart")
                .into();
        assert!(err.to_string().contains("AcquisitionStart"));
    }
}
