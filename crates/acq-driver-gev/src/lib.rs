//! GigE Vision camera acquisition driver.
//!
//! The camera delivers frames asynchronously, one callback per completed
//! descriptor, on its own stream thread. This crate adapts that into the
//! pollable model an acquisition framework expects: prepare a sequence,
//! start it, poll status and the frame counter, stop it.
//!
//! [`GevInterface`] is the entry point. At construction it picks the frame
//! backend once: monochrome cameras fill a buffer manager through the
//! double-buffered [`components::pipeline::FramePipeline`]; color cameras
//! stream continuously through [`components::video::VideoPipeline`]. The
//! choice never changes afterwards.
//!
//! ```no_run
//! use std::sync::Arc;
//! use acq_core::DeviceHandle;
//! use acq_driver_gev::{CameraConfig, GevInterface};
//!
//! # fn open(_: &str) -> Arc<dyn DeviceHandle> { unimplemented!() }
//! # fn main() -> acq_core::CamResult<()> {
//! let config = CameraConfig::default();
//! let device = open(&config.address);
//! let interface = GevInterface::new(device, config)?;
//! interface.sync().set_nb_frames(10)?;
//! interface.prepare_acq()?;
//! interface.start_acq()?;
//! # Ok(())
//! # }
//! ```

pub mod components;
pub mod config;
#[cfg(feature = "mock")]
pub mod mock;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use acq_core::{
    Bin, BufferManager, CamResult, CameraError, DeviceHandle, Frame, FrameReadyInfo, Roi,
    SoftBufferManager, Status, VideoMode,
};

use components::camera::GevCamera;
use components::pipeline::FramePipeline;
use components::sync::SyncController;
use components::video::VideoPipeline;

pub use components::{AcqBackend, SequenceControl};
pub use config::CameraConfig;

/// The acquisition interface for one camera.
pub struct GevInterface {
    camera: GevCamera,
    buffers: Arc<SoftBufferManager>,
    backend: AcqBackend,
    sync: SyncController,
}

impl GevInterface {
    /// Connect the adapter stack over an opened device.
    pub fn new(device: Arc<dyn DeviceHandle>, config: CameraConfig) -> CamResult<Self> {
        let camera = GevCamera::new(Arc::clone(&device), &config)?;
        let buffers = Arc::new(SoftBufferManager::new(config.nb_buffers));
        let backend = if camera.is_monochrome() {
            AcqBackend::Buffered(FramePipeline::new(
                Arc::clone(&device),
                Arc::clone(&buffers) as Arc<dyn BufferManager>,
            ))
        } else {
            AcqBackend::Live(VideoPipeline::new(Arc::clone(&device)))
        };
        let sync = SyncController::new(device, backend.clone(), config.master)?;
        backend.bind_control(sync.control_handle());
        let interface = Self {
            camera,
            buffers,
            backend,
            sync,
        };
        interface.refresh_geometry()?;
        interface.sync.update_valid_ranges(true)?;
        Ok(interface)
    }

    /// The sequence/timing controller.
    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    /// The camera connection (identity, geometry, gain, video mode).
    pub fn camera(&self) -> &GevCamera {
        &self.camera
    }

    /// The buffer manager of the buffered backend.
    pub fn buffer_manager(&self) -> &Arc<SoftBufferManager> {
        &self.buffers
    }

    /// Arm a new sequence: refresh the frame geometry into the buffers and
    /// reset the backend (counter sentinel, fault cell).
    pub fn prepare_acq(&self) -> CamResult<()> {
        self.refresh_geometry()?;
        self.backend.prepare()
    }

    /// Start the sequence (see [`SyncController::start_acq`]).
    pub fn start_acq(&self) -> CamResult<()> {
        self.sync.start_acq()
    }

    /// Stop the sequence and flush outstanding frame requests.
    pub fn stop_acq(&self) -> CamResult<()> {
        self.sync.stop_acq(true)
    }

    /// Status snapshot for polling.
    pub fn status(&self) -> Status {
        self.sync.status()
    }

    /// Frames acquired in the current sequence.
    pub fn nb_acquired_frames(&self) -> i64 {
        self.backend.nb_acquired_frames()
    }

    /// Stop everything and re-apply the link configuration.
    pub fn reset(&self) -> CamResult<()> {
        self.stop_acq()?;
        self.camera.adjust_packet_size()?;
        self.sync.update_valid_ranges(true)
    }

    /// Apply a region of interest; geometry-dependent buffers and timing
    /// ranges follow.
    pub fn set_roi(&self, roi: Roi) -> CamResult<()> {
        self.camera.set_roi(roi)?;
        self.refresh_geometry()?;
        self.sync.update_valid_ranges(false)
    }

    /// Apply binning; geometry-dependent buffers and timing ranges follow.
    pub fn set_bin(&self, bin: Bin) -> CamResult<()> {
        self.camera.set_bin(bin)?;
        self.refresh_geometry()?;
        self.sync.update_valid_ranges(false)
    }

    /// Switch the video mode; the frame byte size may change with it.
    pub fn set_video_mode(&self, mode: VideoMode) -> CamResult<()> {
        self.camera.set_video_mode(mode)?;
        self.refresh_geometry()
    }

    /// Subscribe to frame-ready events of the buffered backend.
    pub fn frame_events(&self) -> broadcast::Receiver<FrameReadyInfo> {
        self.buffers.subscribe()
    }

    /// Subscribe to the live frame stream.
    pub fn video_frames(&self) -> CamResult<broadcast::Receiver<Frame>> {
        match &self.backend {
            AcqBackend::Live(video) => Ok(video.subscribe()),
            AcqBackend::Buffered(_) => Err(CameraError::NotSupported(
                "video stream on a buffered pipeline".into(),
            )),
        }
    }

    /// Switch live video on or off. Live runs the sequence unbounded until
    /// switched off.
    pub fn set_live(&self, live: bool) -> CamResult<()> {
        let video = match &self.backend {
            AcqBackend::Live(video) => video,
            AcqBackend::Buffered(_) => {
                return Err(CameraError::NotSupported(
                    "live video on a buffered pipeline".into(),
                ));
            }
        };
        if live {
            self.sync.set_nb_frames(0)?;
            video.set_live(true);
            self.prepare_acq()?;
            self.start_acq()
        } else {
            video.set_live(false);
            self.sync.stop_acq(true)
        }
    }

    fn refresh_geometry(&self) -> CamResult<()> {
        let dim = self.camera.frame_dim()?;
        self.buffers.set_frame_dim(dim);
        if let AcqBackend::Live(video) = &self.backend {
            video.set_frame_dim(dim);
        }
        debug!(
            width = dim.width,
            height = dim.height,
            bytes_per_pixel = dim.bytes_per_pixel,
            "frame geometry refreshed"
        );
        Ok(())
    }
}
