//! Driver components.
//!
//! The adapter is split the same way the hardware is: [`camera`] owns the
//! connection and static configuration, [`pipeline`] and [`video`] own the
//! two frame-delivery backends, and [`sync`] owns sequence timing and the
//! start/stop lifecycle. The backends never call the sync controller
//! directly; they see it only through [`SequenceControl`].

use std::sync::Weak;

use acq_core::{CamResult, DeviceStatus};

pub mod camera;
pub mod pipeline;
pub mod sync;
pub mod video;

/// The slice of the sync controller a frame backend is allowed to see.
///
/// Backends hold this as a `Weak` reference; the controller owns the
/// backend, not the other way around.
pub trait SequenceControl: Send + Sync {
    /// Number of frames requested for the running sequence; 0 means
    /// unbounded.
    fn requested_frames(&self) -> i64;

    /// Ask the controller to end the sequence. Called from the device
    /// completion thread, so it must never raise; failures are logged.
    fn request_stop(&self);
}

/// The frame-delivery backend selected once at construction.
///
/// Monochrome scientific use gets the buffered double-buffer pipeline;
/// color cameras stream through the live video pipeline. The choice never
/// changes over the lifetime of an interface.
#[derive(Clone)]
pub enum AcqBackend {
    /// Double-buffered delivery into a buffer manager.
    Buffered(pipeline::FramePipeline),
    /// Continuous delivery onto a broadcast channel.
    Live(video::VideoPipeline),
}

impl AcqBackend {
    /// Wire the backend to its sequence controller.
    pub fn bind_control(&self, control: Weak<dyn SequenceControl>) {
        match self {
            AcqBackend::Buffered(p) => p.bind_control(control),
            AcqBackend::Live(p) => p.bind_control(control),
        }
    }

    /// Reset per-sequence state; see the backend `prepare` methods.
    pub fn prepare(&self) -> CamResult<()> {
        match self {
            AcqBackend::Buffered(p) => p.prepare(),
            AcqBackend::Live(p) => p.prepare(),
        }
    }

    /// Queue the initial descriptors for a new sequence.
    pub fn start(&self) -> CamResult<()> {
        match self {
            AcqBackend::Buffered(p) => p.start(),
            AcqBackend::Live(p) => p.start(),
        }
    }

    /// Frames acquired so far in the current sequence.
    pub fn nb_acquired_frames(&self) -> i64 {
        match self {
            AcqBackend::Buffered(p) => p.nb_acquired_frames(),
            AcqBackend::Live(p) => p.nb_acquired_frames(),
        }
    }

    /// The first fatal completion status of the sequence, if any.
    pub fn fault(&self) -> Option<DeviceStatus> {
        match self {
            AcqBackend::Buffered(p) => p.fault(),
            AcqBackend::Live(p) => p.fault(),
        }
    }

    /// Whether a frame is currently exposing / in transit. The live
    /// backend is always exposing while it runs.
    pub fn exposing(&self) -> bool {
        match self {
            AcqBackend::Buffered(p) => p.is_exposing(),
            AcqBackend::Live(_) => true,
        }
    }

    /// Note a trigger pulse; relevant to the buffered backend only.
    pub fn mark_exposing(&self) {
        if let AcqBackend::Buffered(p) = self {
            p.mark_exposing();
        }
    }
}
