//! Double-buffered frame pipeline.
//!
//! The device wants descriptors queued ahead of time and reports each one
//! back on its own thread; the framework above wants to poll a frame
//! counter. This pipeline bridges the two with exactly two descriptor
//! slots: slot 0 carries even frame indices, slot 1 odd ones, and at most
//! two requests are outstanding at any moment.
//!
//! Completion handling never blocks and never returns an error. Transient
//! data loss re-queues the same descriptor unchanged; a queue flush is
//! absorbed silently; any other failure latches the first fatal status
//! until the next `prepare`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use acq_core::{
    BufferManager, CamResult, CameraError, CompletionHandler, DeviceHandle, DeviceStatus,
    FrameCompletion, FrameReadyInfo, FrameRequest,
};

use super::SequenceControl;

const NO_FAULT: u32 = 0;

struct PipelineState {
    /// Index of the last successfully acquired frame; -1 before the first.
    acq_frame_nb: i64,
    /// Next frame index not yet handed to the device.
    next_queue_idx: i64,
    /// Frame index currently assigned to each descriptor slot.
    slot_frame: [i64; 2],
    /// Payload size fixed at prepare time.
    frame_size: usize,
    exposing: bool,
}

struct PipelineShared {
    device: Arc<dyn DeviceHandle>,
    buffers: Arc<dyn BufferManager>,
    control: Mutex<Weak<dyn SequenceControl>>,
    state: Mutex<PipelineState>,
    /// First fatal completion status code; [`NO_FAULT`] when clean.
    fault: AtomicU32,
}

/// Pollable adapter over the device's asynchronous frame delivery.
///
/// Cheap to clone; clones share one pipeline.
#[derive(Clone)]
pub struct FramePipeline {
    shared: Arc<PipelineShared>,
}

impl FramePipeline {
    /// Build a pipeline over a device and a buffer manager. Call
    /// [`bind_control`](Self::bind_control) before starting a sequence.
    pub fn new(device: Arc<dyn DeviceHandle>, buffers: Arc<dyn BufferManager>) -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                device,
                buffers,
                control: Mutex::new(Weak::<NoControl>::new() as Weak<dyn SequenceControl>),
                state: Mutex::new(PipelineState {
                    acq_frame_nb: -1,
                    next_queue_idx: 0,
                    slot_frame: [-1, -1],
                    frame_size: 0,
                    exposing: false,
                }),
                fault: AtomicU32::new(NO_FAULT),
            }),
        }
    }

    /// Wire the sequence controller the pipeline reports to.
    pub fn bind_control(&self, control: Weak<dyn SequenceControl>) {
        *self.shared.control.lock() = control;
    }

    /// Reset per-sequence state: counter back to the -1 sentinel, both
    /// descriptor slots unassigned, fault cell cleared.
    pub fn prepare(&self) -> CamResult<()> {
        let size = self.shared.buffers.frame_dim().mem_size();
        if size == 0 {
            return Err(CameraError::Configuration(
                "frame dimension not set before prepare".into(),
            ));
        }
        {
            let mut st = self.shared.state.lock();
            st.acq_frame_nb = -1;
            st.next_queue_idx = 0;
            st.slot_frame = [-1, -1];
            st.frame_size = size;
            st.exposing = false;
        }
        self.shared.fault.store(NO_FAULT, Ordering::SeqCst);
        debug!(bytes = size, "frame pipeline prepared");
        Ok(())
    }

    /// Queue the initial descriptors: frame 0 always, frame 1 as well when
    /// the sequence wants more than one frame (or is unbounded), keeping
    /// the device fed two requests deep.
    pub fn start(&self) -> CamResult<()> {
        let nb_frames = self.shared.requested().ok_or_else(|| {
            CameraError::Configuration("pipeline not bound to a sequence controller".into())
        })?;
        let mut requests = Vec::with_capacity(2);
        {
            let mut st = self.shared.state.lock();
            if st.frame_size == 0 {
                return Err(CameraError::Configuration("start without prepare".into()));
            }
            if st.next_queue_idx != 0 {
                return Err(CameraError::Configuration("sequence already started".into()));
            }
            st.exposing = true;
            let initial = if nb_frames == 0 || nb_frames > 1 { 2 } else { 1 };
            for _ in 0..initial {
                let idx = st.next_queue_idx;
                let slot = (idx % 2) as usize;
                st.slot_frame[slot] = idx;
                st.next_queue_idx += 1;
                requests.push(PipelineShared::build_request(&self.shared, idx, slot, st.frame_size));
            }
        }
        // Outside the state lock: queueing may fail, and the completion
        // handler may start firing on the device thread right away.
        for request in requests {
            if let Err(err) = self.shared.device.queue_frame(request) {
                // A failed hand-off leaves no exposure in progress.
                self.shared.state.lock().exposing = false;
                return Err(err.into());
            }
        }
        trace!(nb_frames, "frame pipeline started");
        Ok(())
    }

    /// Number of frames acquired in the current sequence.
    pub fn nb_acquired_frames(&self) -> i64 {
        self.shared.state.lock().acq_frame_nb + 1
    }

    /// The first fatal completion status, if one latched.
    pub fn fault(&self) -> Option<DeviceStatus> {
        match self.shared.fault.load(Ordering::SeqCst) {
            NO_FAULT => None,
            code => Some(DeviceStatus::from_code(code)),
        }
    }

    /// Whether a frame is exposing / in transit.
    pub fn is_exposing(&self) -> bool {
        self.shared.state.lock().exposing
    }

    /// Note a trigger pulse (software-multi mode fires one per frame).
    pub fn mark_exposing(&self) {
        self.shared.state.lock().exposing = true;
    }
}

impl PipelineShared {
    fn requested(&self) -> Option<i64> {
        let control = self.control.lock().upgrade();
        control.map(|c| c.requested_frames())
    }

    fn build_request(
        shared: &Arc<Self>,
        frame_idx: i64,
        slot: usize,
        capacity: usize,
    ) -> FrameRequest {
        let weak = Arc::downgrade(shared);
        let on_done: CompletionHandler = Arc::new(move |completion: FrameCompletion| {
            if let Some(shared) = weak.upgrade() {
                Self::on_completion(&shared, completion);
            }
        });
        FrameRequest {
            slot,
            buffer: shared.buffers.frame_buffer(frame_idx),
            capacity,
            on_done,
        }
    }

    /// Runs on the device completion thread. Must not block and must not
    /// hold the state lock across device or buffer-manager calls.
    fn on_completion(shared: &Arc<Self>, completion: FrameCompletion) {
        let slot = completion.slot % 2;
        match completion.status {
            DeviceStatus::Cancelled => {
                // Queue flush during stop; nothing to record.
                trace!(slot, "frame request cancelled");
                return;
            }
            DeviceStatus::DataMissing => {
                let (frame_idx, capacity) = {
                    let st = shared.state.lock();
                    (st.slot_frame[slot], st.frame_size)
                };
                warn!(slot, frame_idx, "frame data missing, re-queueing descriptor");
                let request = Self::build_request(shared, frame_idx, slot, capacity);
                if let Err(err) = shared.device.queue_frame(request) {
                    shared.record_fault(err.status, "re-queue after data loss failed");
                }
                return;
            }
            status if status.is_fatal() => {
                shared.state.lock().exposing = false;
                shared.record_fault(status, "frame completion failed");
                return;
            }
            _ => {}
        }

        let mut next_request = None;
        let (counter, done) = {
            let mut st = shared.state.lock();
            st.acq_frame_nb += 1;
            st.exposing = false;
            let counter = st.acq_frame_nb;
            // Controller gone means nobody can extend the sequence; end it.
            let nb_frames = shared.requested().unwrap_or(counter + 1);
            if nb_frames == 0 || st.next_queue_idx < nb_frames {
                let idx = st.next_queue_idx;
                let next_slot = (idx % 2) as usize;
                st.slot_frame[next_slot] = idx;
                st.next_queue_idx += 1;
                next_request = Some(Self::build_request(shared, idx, next_slot, st.frame_size));
            }
            (counter, nb_frames != 0 && counter >= nb_frames - 1)
        };
        trace!(frame = counter, slot, "frame complete");
        if let Some(request) = next_request {
            if let Err(err) = shared.device.queue_frame(request) {
                shared.record_fault(err.status, "re-queue of next frame failed");
            }
        }
        shared.buffers.frame_ready(FrameReadyInfo {
            acq_frame_idx: counter,
        });
        if done {
            // Upgrade first: the control mutex must not be held across the
            // stop, which takes the controller's own lock.
            let control = shared.control.lock().upgrade();
            if let Some(control) = control {
                control.request_stop();
            }
        }
    }

    fn record_fault(&self, status: DeviceStatus, context: &str) {
        if self
            .fault
            .compare_exchange(NO_FAULT, status.code(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            error!(?status, context, "acquisition fault latched");
        } else {
            debug!(?status, context, "fault after first; keeping original");
        }
    }
}

/// Placeholder target for the unbound `Weak` in a freshly built pipeline.
struct NoControl;

impl SequenceControl for NoControl {
    fn requested_frames(&self) -> i64 {
        0
    }
    fn request_stop(&self) {}
}
