//! Device handle capability: the opaque camera connection.
//!
//! The driver never links a vendor SDK directly; it consumes a
//! [`DeviceHandle`] covering the four API areas the adapter needs:
//! attribute access, command execution, the capture session lifecycle, and
//! asynchronous frame enqueue. Completions are delivered by invoking the
//! handler carried in each [`FrameRequest`], on whatever thread the device
//! implementation owns.
//!
//! # Contract
//!
//! - `queue_frame` must not block on frame arrival; it registers the request
//!   and returns.
//! - Every queued request is eventually completed exactly once, including
//!   with [`DeviceStatus::Cancelled`] when `capture_queue_clear` runs.
//! - The completion handler may be invoked concurrently with control calls;
//!   implementations must not hold internal locks across the handler call.

use std::sync::Arc;

use crate::buffer::FrameBuffer;
use crate::error::DeviceError;

/// Well-known device attribute names.
///
/// GigE Vision cameras expose these through the vendor attribute API; the
/// driver only ever refers to them through these constants.
pub mod attr {
    /// Acquisition frame rate in Hz (float).
    pub const FRAME_RATE: &str = "FrameRate";
    /// Exposure time in microseconds (uint32).
    pub const EXPOSURE_VALUE: &str = "ExposureValue";
    /// Exposure mode enumeration (`Manual`, `Auto`, ...).
    pub const EXPOSURE_MODE: &str = "ExposureMode";
    /// Frame-start trigger source (`FixedRate`, `Software`, `SyncIn1`, ...).
    pub const FRAME_START_TRIGGER_MODE: &str = "FrameStartTriggerMode";
    /// Edge selection for hardware triggers (`EdgeRising`, ...).
    pub const FRAME_START_TRIGGER_EVENT: &str = "FrameStartTriggerEvent";
    /// Acquisition mode (`Continuous`, ...).
    pub const ACQUISITION_MODE: &str = "AcquisitionMode";
    /// Pixel format enumeration (`Mono8`, `Mono16`, `Bayer16`, ...).
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    /// Sensor type string (`Mono` or a Bayer pattern name).
    pub const SENSOR_TYPE: &str = "SensorType";
    /// Sensor width in pixels (uint32).
    pub const SENSOR_WIDTH: &str = "SensorWidth";
    /// Sensor height in pixels (uint32).
    pub const SENSOR_HEIGHT: &str = "SensorHeight";
    /// Camera display name.
    pub const CAMERA_NAME: &str = "CameraName";
    /// Unique device id (uint32).
    pub const UNIQUE_ID: &str = "UniqueId";
    /// Firmware major version (uint32).
    pub const FIRMWARE_VER_MAJOR: &str = "FirmwareVerMajor";
    /// Firmware minor version (uint32).
    pub const FIRMWARE_VER_MINOR: &str = "FirmwareVerMinor";
    /// Raw gain value (uint32, device-specific range).
    pub const GAIN_VALUE: &str = "GainValue";
    /// Horizontal binning factor (uint32).
    pub const BINNING_X: &str = "BinningX";
    /// Vertical binning factor (uint32).
    pub const BINNING_Y: &str = "BinningY";
    /// ROI origin X (uint32).
    pub const REGION_X: &str = "RegionX";
    /// ROI origin Y (uint32).
    pub const REGION_Y: &str = "RegionY";
    /// ROI width (uint32).
    pub const WIDTH: &str = "Width";
    /// ROI height (uint32).
    pub const HEIGHT: &str = "Height";
    /// Streaming packet size in bytes (uint32).
    pub const PACKET_SIZE: &str = "PacketSize";
}

/// Commands executable on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Begin the acquisition sequence.
    AcquisitionStart,
    /// End the acquisition sequence.
    AcquisitionStop,
    /// Fire one software trigger pulse.
    SoftwareTrigger,
}

impl DeviceCommand {
    /// The device-side command name.
    pub fn name(self) -> &'static str {
        match self {
            DeviceCommand::AcquisitionStart => "AcquisitionStart",
            DeviceCommand::AcquisitionStop => "AcquisitionStop",
            DeviceCommand::SoftwareTrigger => "FrameStartTriggerSoftware",
        }
    }
}

/// Status code shared by synchronous calls and frame completions.
///
/// The device API uses one code space for both, so the sticky error cell in
/// the pipeline stores the [`code`](DeviceStatus::code) of whichever
/// completion failed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Frame delivered / call succeeded.
    Success,
    /// The frame was started but data was lost in transit; the same
    /// descriptor may be re-queued unchanged.
    DataMissing,
    /// The request was flushed by a queue clear; never an error.
    Cancelled,
    /// The device did not respond in time.
    Timeout,
    /// A parameter was rejected.
    BadParameter,
    /// A call was made out of sequence (e.g. queueing without a capture
    /// session).
    BadSequence,
    /// The device ran out of internal resources.
    OutOfResources,
    /// The device was disconnected.
    Unplugged,
    /// Any other device-specific code.
    Internal(u16),
}

impl DeviceStatus {
    /// Stable numeric code, suitable for an atomic error cell.
    ///
    /// Zero is reserved for "no error recorded"; `Success` deliberately maps
    /// to a non-zero code so a successful completion can never be mistaken
    /// for the empty cell.
    pub fn code(self) -> u32 {
        match self {
            DeviceStatus::Success => 1,
            DeviceStatus::DataMissing => 2,
            DeviceStatus::Cancelled => 3,
            DeviceStatus::Timeout => 4,
            DeviceStatus::BadParameter => 5,
            DeviceStatus::BadSequence => 6,
            DeviceStatus::OutOfResources => 7,
            DeviceStatus::Unplugged => 8,
            DeviceStatus::Internal(n) => 0x100 + u32::from(n),
        }
    }

    /// Inverse of [`code`](Self::code). Unknown codes decode as `Internal`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => DeviceStatus::Success,
            2 => DeviceStatus::DataMissing,
            3 => DeviceStatus::Cancelled,
            4 => DeviceStatus::Timeout,
            5 => DeviceStatus::BadParameter,
            6 => DeviceStatus::BadSequence,
            7 => DeviceStatus::OutOfResources,
            8 => DeviceStatus::Unplugged,
            n if n >= 0x100 => DeviceStatus::Internal((n - 0x100) as u16),
            n => DeviceStatus::Internal(n as u16),
        }
    }

    /// Whether a completion with this status latches the pipeline into a
    /// fault. `DataMissing` is retryable and `Cancelled` is absorbed; every
    /// other non-success status is fatal to the sequence.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            DeviceStatus::Success | DeviceStatus::DataMissing | DeviceStatus::Cancelled
        )
    }
}

/// Result of one queued frame request.
#[derive(Debug, Clone, Copy)]
pub struct FrameCompletion {
    /// The descriptor slot the request was queued on (0 or 1).
    pub slot: usize,
    /// How the request finished.
    pub status: DeviceStatus,
}

/// Handler invoked by the device when a queued frame completes.
///
/// Context travels through captured closure state (typically a `Weak` to the
/// pipeline), never through raw pointers.
pub type CompletionHandler = Arc<dyn Fn(FrameCompletion) + Send + Sync>;

/// A frame enqueue request.
pub struct FrameRequest {
    /// Descriptor slot id (0 or 1).
    pub slot: usize,
    /// Destination pixel buffer, borrowed from the buffer manager.
    pub buffer: FrameBuffer,
    /// Expected payload size in bytes; the device must not write past it.
    pub capacity: usize,
    /// Invoked exactly once when the request completes.
    pub on_done: CompletionHandler,
}

impl std::fmt::Debug for FrameRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRequest")
            .field("slot", &self.slot)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Opaque camera connection.
pub trait DeviceHandle: Send + Sync {
    /// Read a `u32` attribute.
    fn get_attr_u32(&self, name: &str) -> Result<u32, DeviceError>;
    /// Write a `u32` attribute.
    fn set_attr_u32(&self, name: &str, value: u32) -> Result<(), DeviceError>;
    /// Query the valid range of a `u32` attribute.
    fn attr_range_u32(&self, name: &str) -> Result<(u32, u32), DeviceError>;

    /// Read an `f64` attribute.
    fn get_attr_f64(&self, name: &str) -> Result<f64, DeviceError>;
    /// Write an `f64` attribute.
    fn set_attr_f64(&self, name: &str, value: f64) -> Result<(), DeviceError>;
    /// Query the valid range of an `f64` attribute.
    fn attr_range_f64(&self, name: &str) -> Result<(f64, f64), DeviceError>;

    /// Read an enumerated attribute as its string value.
    fn get_attr_enum(&self, name: &str) -> Result<String, DeviceError>;
    /// Write an enumerated attribute by string value.
    fn set_attr_enum(&self, name: &str, value: &str) -> Result<(), DeviceError>;

    /// Read a string attribute.
    fn get_attr_string(&self, name: &str) -> Result<String, DeviceError>;

    /// Execute a device command.
    fn run_command(&self, command: DeviceCommand) -> Result<(), DeviceError>;

    /// Open the capture session (stream channel up, queue usable).
    fn capture_start(&self) -> Result<(), DeviceError>;
    /// Close the capture session.
    fn capture_end(&self) -> Result<(), DeviceError>;
    /// Flush the frame queue; every outstanding request completes with
    /// [`DeviceStatus::Cancelled`] before this returns.
    fn capture_queue_clear(&self) -> Result<(), DeviceError>;

    /// Enqueue a frame request. Non-blocking.
    fn queue_frame(&self, request: FrameRequest) -> Result<(), DeviceError>;
}
