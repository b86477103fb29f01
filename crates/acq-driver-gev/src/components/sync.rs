//! Sequence timing and lifecycle control.
//!
//! The camera has no independent latency setting; it runs at a frame rate.
//! The controller keeps exposure and latency as the authoritative pair and
//! derives `frame_rate = 1 / (exposure + latency)`, clamped to the device
//! range, on every change. Exposure and latency also share the longest
//! acquisition period, so every timing or geometry change re-derives the
//! valid ranges and pushes them to registered observers when they move.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use acq_core::device::attr;
use acq_core::{
    AcqState, CamResult, CameraError, DetState, DeviceCommand, DeviceHandle, Status, TrigMode,
    ValidRanges,
};

use super::{AcqBackend, SequenceControl};

/// Callback fired when the valid exposure/latency ranges change.
pub type RangesObserver = Box<dyn Fn(ValidRanges) + Send + Sync>;

struct SyncState {
    trig_mode: TrigMode,
    exposure: Duration,
    latency: Duration,
    ranges: ValidRanges,
    started: bool,
}

pub(crate) struct SyncShared {
    device: Arc<dyn DeviceHandle>,
    backend: AcqBackend,
    master: bool,
    /// Requested sequence length; 0 means unbounded. Atomic so the frame
    /// backends can read it from the completion path without locking.
    nb_frames: AtomicI64,
    state: Mutex<SyncState>,
    observers: Mutex<Vec<RangesObserver>>,
}

/// Owner of trigger mode, timing, and the start/stop lifecycle.
///
/// Cheap to clone; clones share one controller.
#[derive(Clone)]
pub struct SyncController {
    shared: Arc<SyncShared>,
}

impl SyncController {
    /// Build the controller: read the device timing ranges, derive the
    /// initial latency from the fastest achievable rate, and (under master
    /// access) run the camera at that rate.
    pub fn new(
        device: Arc<dyn DeviceHandle>,
        backend: AcqBackend,
        master: bool,
    ) -> CamResult<Self> {
        let exposure = Duration::from_micros(u64::from(
            device.get_attr_u32(attr::EXPOSURE_VALUE)?,
        ));
        // Two passes: the latency bound needs the exposure, the exposure
        // bound needs the latency we only pick on the first pass.
        let bootstrap = derive_ranges(device.as_ref(), exposure, Duration::ZERO)?;
        let latency = bootstrap.min_lat_time;
        let ranges = derive_ranges(device.as_ref(), exposure, latency)?;
        if master {
            let (_, max_rate) = device.attr_range_f64(attr::FRAME_RATE)?;
            device.set_attr_f64(attr::FRAME_RATE, max_rate)?;
        }
        debug!(?ranges, ?exposure, ?latency, "sync controller initialized");
        Ok(Self {
            shared: Arc::new(SyncShared {
                device,
                backend,
                master,
                nb_frames: AtomicI64::new(1),
                state: Mutex::new(SyncState {
                    trig_mode: TrigMode::IntTrig,
                    exposure,
                    latency,
                    ranges,
                    started: false,
                }),
                observers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Handle for wiring the frame backends; see
    /// [`AcqBackend::bind_control`].
    pub fn control_handle(&self) -> Weak<dyn SequenceControl> {
        Arc::downgrade(&self.shared) as Weak<dyn SequenceControl>
    }

    /// Whether this adapter supports a trigger mode.
    pub fn check_trig_mode(&self, mode: TrigMode) -> bool {
        matches!(
            mode,
            TrigMode::IntTrig | TrigMode::IntTrigMult | TrigMode::ExtTrigMult
        )
    }

    /// Select the trigger mode and push the matching trigger source to the
    /// device.
    pub fn set_trig_mode(&self, mode: TrigMode) -> CamResult<()> {
        let device = self.shared.device.as_ref();
        match mode {
            TrigMode::IntTrig => {
                device.set_attr_enum(attr::FRAME_START_TRIGGER_MODE, "FixedRate")?;
            }
            TrigMode::IntTrigMult => {
                device.set_attr_enum(attr::FRAME_START_TRIGGER_MODE, "Software")?;
            }
            TrigMode::ExtTrigMult => {
                device.set_attr_enum(attr::FRAME_START_TRIGGER_MODE, "SyncIn1")?;
                device.set_attr_enum(attr::FRAME_START_TRIGGER_EVENT, "EdgeRising")?;
            }
            other => {
                return Err(CameraError::NotSupported(format!(
                    "trigger mode {other:?}"
                )));
            }
        }
        self.shared.state.lock().trig_mode = mode;
        Ok(())
    }

    /// Current trigger mode.
    pub fn trig_mode(&self) -> TrigMode {
        self.shared.state.lock().trig_mode
    }

    /// Set the exposure time and re-derive the frame rate.
    pub fn set_exp_time(&self, exposure: Duration) -> CamResult<()> {
        {
            let st = self.shared.state.lock();
            if exposure < st.ranges.min_exp_time || exposure > st.ranges.max_exp_time {
                return Err(CameraError::InvalidValue(format!(
                    "exposure {exposure:?} outside {:?}..{:?}",
                    st.ranges.min_exp_time, st.ranges.max_exp_time
                )));
            }
        }
        let micros = u32::try_from(exposure.as_micros())
            .map_err(|_| CameraError::InvalidValue(format!("exposure {exposure:?} too long")))?;
        self.shared
            .device
            .set_attr_enum(attr::EXPOSURE_MODE, "Manual")?;
        self.shared
            .device
            .set_attr_u32(attr::EXPOSURE_VALUE, micros)?;
        {
            let mut st = self.shared.state.lock();
            st.exposure = exposure;
            self.shared.push_frame_rate(&st)?;
        }
        // A longer exposure leaves less of the acquisition period for
        // latency; refresh the bounds and tell the observers.
        self.shared.refresh_ranges(false)
    }

    /// Current exposure time.
    pub fn exp_time(&self) -> Duration {
        self.shared.state.lock().exposure
    }

    /// Set the latency (inter-frame gap) and re-derive the frame rate.
    pub fn set_lat_time(&self, latency: Duration) -> CamResult<()> {
        {
            let st = self.shared.state.lock();
            if latency > st.ranges.max_lat_time {
                return Err(CameraError::InvalidValue(format!(
                    "latency {latency:?} above {:?}",
                    st.ranges.max_lat_time
                )));
            }
        }
        {
            let mut st = self.shared.state.lock();
            st.latency = latency;
            self.shared.push_frame_rate(&st)?;
        }
        self.shared.refresh_ranges(false)
    }

    /// Current latency.
    pub fn lat_time(&self) -> Duration {
        self.shared.state.lock().latency
    }

    /// Cached valid exposure/latency ranges.
    pub fn valid_ranges(&self) -> ValidRanges {
        self.shared.state.lock().ranges
    }

    /// Re-derive the valid ranges from the device. Observers fire when the
    /// ranges moved, or unconditionally with `force_init`.
    pub fn update_valid_ranges(&self, force_init: bool) -> CamResult<()> {
        self.shared.refresh_ranges(force_init)
    }

    /// Register an observer for range changes.
    pub fn connect_ranges_observer(&self, observer: RangesObserver) {
        self.shared.observers.lock().push(observer);
    }

    /// Set the sequence length; 0 means unbounded.
    pub fn set_nb_frames(&self, nb_frames: i64) -> CamResult<()> {
        if nb_frames < 0 {
            return Err(CameraError::InvalidValue(format!(
                "frame count {nb_frames}"
            )));
        }
        self.shared.nb_frames.store(nb_frames, Ordering::SeqCst);
        Ok(())
    }

    /// Requested sequence length.
    pub fn nb_frames(&self) -> i64 {
        self.shared.nb_frames.load(Ordering::SeqCst)
    }

    /// Start the sequence. The first call opens the capture session, arms
    /// the frame backend, and (under master access) starts the camera; in
    /// software-multi mode every call, first included, fires exactly one
    /// trigger pulse.
    pub fn start_acq(&self) -> CamResult<()> {
        self.shared.start()
    }

    /// Stop the sequence. Idempotent: device commands run only if a
    /// sequence is actually started. With `clear_queue`, outstanding frame
    /// requests are flushed (they complete as cancelled).
    pub fn stop_acq(&self, clear_queue: bool) -> CamResult<()> {
        self.shared.stop(clear_queue)
    }

    /// Status snapshot for polling.
    ///
    /// In software-multi mode the exposing flag tracks the gap between
    /// trigger pulses, so the reported detector state is inverted there.
    pub fn status(&self) -> Status {
        if self.shared.backend.fault().is_some() {
            return Status::FAULT;
        }
        let st = self.shared.state.lock();
        if !st.started {
            return Status::READY;
        }
        let det = match &self.shared.backend {
            AcqBackend::Live(_) => DetState::Exposure,
            AcqBackend::Buffered(_) => {
                let exposing = self.shared.backend.exposing();
                let exposed = if st.trig_mode == TrigMode::IntTrigMult {
                    !exposing
                } else {
                    exposing
                };
                if exposed {
                    DetState::Exposure
                } else {
                    DetState::Idle
                }
            }
        };
        Status {
            acq: AcqState::Running,
            det,
        }
    }
}

impl SyncShared {
    fn start(&self) -> CamResult<()> {
        let mut st = self.state.lock();
        if !st.started {
            self.device.capture_start()?;
            self.backend.start()?;
            if self.master {
                self.device.run_command(DeviceCommand::AcquisitionStart)?;
            }
            st.started = true;
            info!(nb_frames = self.nb_frames.load(Ordering::SeqCst), "acquisition started");
        }
        if st.trig_mode == TrigMode::IntTrigMult {
            self.backend.mark_exposing();
            self.device.run_command(DeviceCommand::SoftwareTrigger)?;
        }
        Ok(())
    }

    fn stop(&self, clear_queue: bool) -> CamResult<()> {
        let mut st = self.state.lock();
        if !st.started {
            return Ok(());
        }
        // Unlike the start command, the stop is not master-gated: a monitor
        // connection still has to end its own exposure sequence.
        self.device.run_command(DeviceCommand::AcquisitionStop)?;
        self.device.capture_end()?;
        if clear_queue {
            // Flushes complete as Cancelled on this thread; the backends
            // absorb those without touching us, so holding the state lock
            // here is fine.
            self.device.capture_queue_clear()?;
        }
        st.started = false;
        info!(clear_queue, "acquisition stopped");
        Ok(())
    }

    /// Re-derive the valid ranges from the device bounds and the current
    /// exposure/latency pair; fire observers when they moved (or always,
    /// with `force_init`).
    fn refresh_ranges(&self, force_init: bool) -> CamResult<()> {
        let (exposure, latency) = {
            let st = self.state.lock();
            (st.exposure, st.latency)
        };
        let ranges = derive_ranges(self.device.as_ref(), exposure, latency)?;
        let changed = {
            let mut st = self.state.lock();
            let changed = ranges != st.ranges;
            st.ranges = ranges;
            changed
        };
        if changed || force_init {
            debug!(?ranges, "valid timing ranges updated");
            for observer in self.observers.lock().iter() {
                observer(ranges);
            }
        }
        Ok(())
    }

    /// Derive and push `1 / (exposure + latency)`, clamped to the device
    /// frame-rate range.
    fn push_frame_rate(&self, st: &SyncState) -> CamResult<()> {
        let (min_rate, max_rate) = self.device.attr_range_f64(attr::FRAME_RATE)?;
        let period = (st.exposure + st.latency).as_secs_f64();
        let rate = if period > 0.0 { 1.0 / period } else { max_rate };
        let rate = rate.clamp(min_rate, max_rate);
        self.device.set_attr_f64(attr::FRAME_RATE, rate)?;
        debug!(rate, "frame rate derived from exposure and latency");
        Ok(())
    }
}

impl SequenceControl for SyncShared {
    fn requested_frames(&self) -> i64 {
        self.nb_frames.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        // Completion-path call; never raises.
        if let Err(err) = self.stop(false) {
            warn!(error = %err, "auto-stop at sequence end failed");
        }
    }
}

/// Derive the exposure/latency bounds from the device limits and the
/// longest achievable acquisition period (`1 / min_rate`). Exposure and
/// latency share that period, so the upper bound of each depends on the
/// current value of the other.
///
/// `1 / max_rate - min_exposure` can go negative when the sensor allows
/// exposures longer than the fastest frame period; the derived bounds are
/// clamped to zero.
fn derive_ranges(
    device: &dyn DeviceHandle,
    exposure: Duration,
    latency: Duration,
) -> CamResult<ValidRanges> {
    let (min_exp_us, max_exp_us) = device.attr_range_u32(attr::EXPOSURE_VALUE)?;
    let (min_rate, max_rate) = device.attr_range_f64(attr::FRAME_RATE)?;
    let min_exp = Duration::from_micros(u64::from(min_exp_us));
    let device_max_exp = Duration::from_micros(u64::from(max_exp_us));
    let min_period = 1.0 / max_rate;
    let max_period = 1.0 / min_rate;
    let min_lat = (min_period - min_exp.as_secs_f64()).max(0.0);
    let max_lat = (max_period - exposure.as_secs_f64()).max(0.0);
    let max_exp = device_max_exp
        .as_secs_f64()
        .min(max_period - latency.as_secs_f64())
        .max(0.0);
    Ok(ValidRanges {
        min_exp_time: min_exp,
        max_exp_time: Duration::from_secs_f64(max_exp),
        min_lat_time: Duration::from_secs_f64(min_lat),
        max_lat_time: Duration::from_secs_f64(max_lat),
    })
}
