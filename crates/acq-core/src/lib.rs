//! Core types and capability traits for the GigE acquisition adapter.
//!
//! This crate defines the boundary between the acquisition pipeline and its
//! two external collaborators:
//!
//! - [`device::DeviceHandle`]: an opaque connection to a camera exposing
//!   attribute get/set, command execution, and asynchronous frame enqueue.
//! - [`buffer::BufferManager`]: the owner of pixel-buffer memory, mapping
//!   logical frame indices to buffers and publishing frame-ready events.
//!
//! Driver crates depend only on this crate, never on each other, so the
//! capability traits here must stay free of driver-specific types.

pub mod buffer;
pub mod data;
pub mod device;
pub mod error;
pub mod status;

pub use buffer::{BufferManager, FrameBuffer, FrameReadyInfo, SoftBufferManager};
pub use data::{Bin, Frame, FrameDim, ImageType, Roi, VideoMode};
pub use device::{
    CompletionHandler, DeviceCommand, DeviceHandle, DeviceStatus, FrameCompletion, FrameRequest,
};
pub use error::{CamResult, CameraError, DeviceError, DeviceErrorKind};
pub use status::{AcqState, DetState, Status, TrigMode, ValidRanges};
