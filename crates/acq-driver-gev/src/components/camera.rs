//! Camera connection, identity, and geometry.
//!
//! Everything static about the device lives here: identity read once at
//! connect, master-mode base configuration (binning and region reset,
//! pixel format from sensor type, continuous acquisition, packet size),
//! and the geometry accessors the rest of the driver derives buffer sizes
//! from.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use acq_core::device::attr;
use acq_core::{Bin, CamResult, CameraError, DeviceHandle, FrameDim, ImageType, Roi, VideoMode};

use crate::config::CameraConfig;

struct CamState {
    video_mode: VideoMode,
}

/// The connected camera.
pub struct GevCamera {
    device: Arc<dyn DeviceHandle>,
    master: bool,
    packet_size: u32,
    name: String,
    unique_id: u32,
    firmware: String,
    sensor_width: u32,
    sensor_height: u32,
    monochrome: bool,
    gain_range: (u32, u32),
    state: Mutex<CamState>,
}

impl GevCamera {
    /// Connect: read identity, and under master access reset geometry and
    /// select the pixel format from the sensor type. Mono sensors get
    /// 16-bit mono; a color sensor gets 16-bit Bayer unless mono output is
    /// forced, which drops it to 8-bit mono.
    pub fn new(device: Arc<dyn DeviceHandle>, config: &CameraConfig) -> CamResult<Self> {
        let name = device.get_attr_string(attr::CAMERA_NAME)?;
        let unique_id = device.get_attr_u32(attr::UNIQUE_ID)?;
        let fw_major = device.get_attr_u32(attr::FIRMWARE_VER_MAJOR)?;
        let fw_minor = device.get_attr_u32(attr::FIRMWARE_VER_MINOR)?;
        let sensor_type = device.get_attr_enum(attr::SENSOR_TYPE)?;
        let sensor_width = device.get_attr_u32(attr::SENSOR_WIDTH)?;
        let sensor_height = device.get_attr_u32(attr::SENSOR_HEIGHT)?;
        let sensor_mono = sensor_type == "Mono";
        let monochrome = sensor_mono || config.mono_forced;

        let video_mode;
        if config.master {
            device.set_attr_u32(attr::BINNING_X, 1)?;
            device.set_attr_u32(attr::BINNING_Y, 1)?;
            device.set_attr_u32(attr::REGION_X, 0)?;
            device.set_attr_u32(attr::REGION_Y, 0)?;
            device.set_attr_u32(attr::WIDTH, sensor_width)?;
            device.set_attr_u32(attr::HEIGHT, sensor_height)?;
            video_mode = if sensor_mono {
                VideoMode::Y16
            } else if config.mono_forced {
                VideoMode::Y8
            } else {
                VideoMode::BayerRg16
            };
            device.set_attr_enum(attr::PIXEL_FORMAT, video_mode.pixel_format())?;
            device.set_attr_enum(attr::ACQUISITION_MODE, "Continuous")?;
            device.set_attr_u32(attr::PACKET_SIZE, config.packet_size)?;
        } else {
            let format = device.get_attr_enum(attr::PIXEL_FORMAT)?;
            video_mode = VideoMode::from_pixel_format(&format)
                .ok_or_else(|| CameraError::NotSupported(format!("pixel format {format}")))?;
        }
        let gain_range = device.attr_range_u32(attr::GAIN_VALUE)?;

        let firmware = format!("{fw_major}.{fw_minor}");
        info!(
            %name,
            unique_id,
            %firmware,
            sensor_width,
            sensor_height,
            monochrome,
            master = config.master,
            "camera connected"
        );
        Ok(Self {
            device,
            master: config.master,
            packet_size: config.packet_size,
            name,
            unique_id,
            firmware,
            sensor_width,
            sensor_height,
            monochrome,
            gain_range,
            state: Mutex::new(CamState { video_mode }),
        })
    }

    /// Camera display name.
    pub fn camera_name(&self) -> &str {
        &self.name
    }

    /// Unique device id.
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Firmware version as `major.minor`.
    pub fn firmware_version(&self) -> &str {
        &self.firmware
    }

    /// Detector family name.
    pub fn detector_type(&self) -> &'static str {
        "GigEVision"
    }

    /// Detector model (the camera name).
    pub fn detector_model(&self) -> &str {
        &self.name
    }

    /// Whether the stream is monochrome (native or forced).
    pub fn is_monochrome(&self) -> bool {
        self.monochrome
    }

    /// Whether this connection may reconfigure the camera.
    pub fn is_master(&self) -> bool {
        self.master
    }

    /// Full sensor size in pixels.
    pub fn sensor_size(&self) -> (u32, u32) {
        (self.sensor_width, self.sensor_height)
    }

    /// Gain normalized over the device range, 0.0 to 1.0.
    pub fn gain(&self) -> CamResult<f64> {
        let raw = self.device.get_attr_u32(attr::GAIN_VALUE)?;
        let (lo, hi) = self.gain_range;
        if hi == lo {
            return Ok(0.0);
        }
        Ok(f64::from(raw.saturating_sub(lo)) / f64::from(hi - lo))
    }

    /// Set the gain from a normalized 0.0 to 1.0 value.
    pub fn set_gain(&self, gain: f64) -> CamResult<()> {
        if !(0.0..=1.0).contains(&gain) {
            return Err(CameraError::InvalidValue(format!("gain {gain}")));
        }
        let (lo, hi) = self.gain_range;
        let raw = lo + (gain * f64::from(hi - lo)).round() as u32;
        self.device.set_attr_u32(attr::GAIN_VALUE, raw)?;
        Ok(())
    }

    /// Clamp a binning request to what the device allows.
    pub fn check_bin(&self, bin: Bin) -> CamResult<Bin> {
        let (_, max_x) = self.device.attr_range_u32(attr::BINNING_X)?;
        let (_, max_y) = self.device.attr_range_u32(attr::BINNING_Y)?;
        Ok(Bin {
            x: bin.x.clamp(1, max_x),
            y: bin.y.clamp(1, max_y),
        })
    }

    /// Apply binning.
    pub fn set_bin(&self, bin: Bin) -> CamResult<()> {
        let bin = self.check_bin(bin)?;
        self.device.set_attr_u32(attr::BINNING_X, bin.x)?;
        self.device.set_attr_u32(attr::BINNING_Y, bin.y)?;
        Ok(())
    }

    /// Current binning.
    pub fn bin(&self) -> CamResult<Bin> {
        Ok(Bin {
            x: self.device.get_attr_u32(attr::BINNING_X)?,
            y: self.device.get_attr_u32(attr::BINNING_Y)?,
        })
    }

    /// Clamp a region request to the sensor.
    pub fn check_roi(&self, roi: Roi) -> CamResult<Roi> {
        let x = roi.x.min(self.sensor_width.saturating_sub(1));
        let y = roi.y.min(self.sensor_height.saturating_sub(1));
        Ok(Roi {
            x,
            y,
            width: roi.width.min(self.sensor_width - x),
            height: roi.height.min(self.sensor_height - y),
        })
    }

    /// Apply a region of interest. An inactive (zero-area) region resets
    /// to the full sensor.
    pub fn set_roi(&self, roi: Roi) -> CamResult<()> {
        let roi = if roi.is_active() {
            self.check_roi(roi)?
        } else {
            Roi::full(self.sensor_width, self.sensor_height)
        };
        self.device.set_attr_u32(attr::REGION_X, roi.x)?;
        self.device.set_attr_u32(attr::REGION_Y, roi.y)?;
        self.device.set_attr_u32(attr::WIDTH, roi.width)?;
        self.device.set_attr_u32(attr::HEIGHT, roi.height)?;
        Ok(())
    }

    /// Current region of interest.
    pub fn roi(&self) -> CamResult<Roi> {
        Ok(Roi {
            x: self.device.get_attr_u32(attr::REGION_X)?,
            y: self.device.get_attr_u32(attr::REGION_Y)?,
            width: self.device.get_attr_u32(attr::WIDTH)?,
            height: self.device.get_attr_u32(attr::HEIGHT)?,
        })
    }

    /// Current video mode.
    pub fn video_mode(&self) -> VideoMode {
        self.state.lock().video_mode
    }

    /// Video modes this camera can produce.
    pub fn supported_video_modes(&self) -> Vec<VideoMode> {
        if self.monochrome {
            vec![VideoMode::Y8, VideoMode::Y16]
        } else {
            vec![VideoMode::BayerRg8, VideoMode::BayerRg16]
        }
    }

    /// Switch the video mode. Changing depth changes the frame byte size;
    /// callers refresh buffer geometry afterwards.
    pub fn set_video_mode(&self, mode: VideoMode) -> CamResult<()> {
        if mode.is_mono() != self.monochrome {
            return Err(CameraError::NotSupported(format!("video mode {mode:?}")));
        }
        self.device
            .set_attr_enum(attr::PIXEL_FORMAT, mode.pixel_format())?;
        self.state.lock().video_mode = mode;
        Ok(())
    }

    /// Stored depth of the current video mode.
    pub fn image_type(&self) -> ImageType {
        self.video_mode().image_type()
    }

    /// Current frame geometry: the active region at the current depth.
    pub fn frame_dim(&self) -> CamResult<FrameDim> {
        let width = self.device.get_attr_u32(attr::WIDTH)?;
        let height = self.device.get_attr_u32(attr::HEIGHT)?;
        Ok(FrameDim::new(
            width,
            height,
            self.video_mode().bytes_per_pixel(),
        ))
    }

    /// Re-apply the streaming packet size (used after a reset).
    pub fn adjust_packet_size(&self) -> CamResult<()> {
        self.device
            .set_attr_u32(attr::PACKET_SIZE, self.packet_size)?;
        Ok(())
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn camera() -> (Arc<MockDevice>, GevCamera) {
        let device = Arc::new(MockDevice::new());
        let cam = GevCamera::new(device.clone(), &CameraConfig::default()).unwrap();
        (device, cam)
    }

    #[test]
    fn master_connect_resets_geometry() {
        let (device, cam) = camera();
        assert_eq!(device.get_attr_u32(attr::BINNING_X).unwrap(), 1);
        let (w, h) = cam.sensor_size();
        assert_eq!(cam.roi().unwrap(), Roi::full(w, h));
    }

    #[test]
    fn mono_sensor_streams_sixteen_bit() {
        let (device, cam) = camera();
        assert!(cam.is_monochrome());
        assert_eq!(cam.video_mode(), VideoMode::Y16);
        assert_eq!(device.get_attr_enum(attr::PIXEL_FORMAT).unwrap(), "Mono16");
    }

    #[test]
    fn inactive_roi_resets_to_full_sensor() {
        let (_device, cam) = camera();
        cam.set_roi(Roi::new(100, 100, 320, 240)).unwrap();
        assert_eq!(cam.roi().unwrap(), Roi::new(100, 100, 320, 240));
        cam.set_roi(Roi::default()).unwrap();
        let (w, h) = cam.sensor_size();
        assert_eq!(cam.roi().unwrap(), Roi::full(w, h));
    }

    #[test]
    fn gain_is_normalized_over_the_device_range() {
        let (device, cam) = camera();
        cam.set_gain(1.0).unwrap();
        let (_, hi) = device.attr_range_u32(attr::GAIN_VALUE).unwrap();
        assert_eq!(device.get_attr_u32(attr::GAIN_VALUE).unwrap(), hi);
        assert!((cam.gain().unwrap() - 1.0).abs() < 1e-9);
        assert!(cam.set_gain(1.5).is_err());
    }

    #[test]
    fn wrong_color_space_video_mode_is_rejected() {
        let (_device, cam) = camera();
        assert!(cam.set_video_mode(VideoMode::BayerRg16).is_err());
        cam.set_video_mode(VideoMode::Y8).unwrap();
        assert_eq!(cam.frame_dim().unwrap().bytes_per_pixel, 1);
    }
}
