//! Live video backend.
//!
//! Color cameras stream continuously instead of filling a buffer manager:
//! both descriptors stay queued, each completed descriptor is published as
//! a [`Frame`] on a broadcast channel and immediately re-queued while the
//! stream should keep going. The same completion classification applies as
//! in the buffered pipeline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

use acq_core::{
    CamResult, CameraError, CompletionHandler, DeviceHandle, DeviceStatus, Frame, FrameBuffer,
    FrameCompletion, FrameDim, FrameRequest,
};

use super::SequenceControl;

const NO_FAULT: u32 = 0;

struct VideoState {
    acq_frame_nb: i64,
    dim: FrameDim,
    /// The backend owns its two descriptor buffers; published frames are
    /// copied out so consumers never alias them.
    buffers: [FrameBuffer; 2],
    live: bool,
}

struct VideoShared {
    device: Arc<dyn DeviceHandle>,
    frame_tx: broadcast::Sender<Frame>,
    control: Mutex<Weak<dyn SequenceControl>>,
    state: Mutex<VideoState>,
    fault: AtomicU32,
}

/// Continuous-streaming counterpart of the buffered frame pipeline.
///
/// Cheap to clone; clones share one backend.
#[derive(Clone)]
pub struct VideoPipeline {
    shared: Arc<VideoShared>,
}

impl VideoPipeline {
    /// Build a live backend over a device.
    pub fn new(device: Arc<dyn DeviceHandle>) -> Self {
        let (frame_tx, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(VideoShared {
                device,
                frame_tx,
                control: Mutex::new(Weak::<Inert>::new() as Weak<dyn SequenceControl>),
                state: Mutex::new(VideoState {
                    acq_frame_nb: -1,
                    dim: FrameDim::default(),
                    buffers: [
                        Arc::new(Mutex::new(Vec::new())),
                        Arc::new(Mutex::new(Vec::new())),
                    ],
                    live: false,
                }),
                fault: AtomicU32::new(NO_FAULT),
            }),
        }
    }

    /// Wire the sequence controller.
    pub fn bind_control(&self, control: Weak<dyn SequenceControl>) {
        *self.shared.control.lock() = control;
    }

    /// Resize the descriptor buffers for the current geometry.
    pub fn set_frame_dim(&self, dim: FrameDim) {
        let st = &mut *self.shared.state.lock();
        for buffer in &st.buffers {
            let mut data = buffer.lock();
            data.clear();
            data.resize(dim.mem_size(), 0);
        }
        st.dim = dim;
        debug!(width = dim.width, height = dim.height, "video buffers resized");
    }

    /// Mark the stream as free-running (ignores the frame count) or
    /// bounded.
    pub fn set_live(&self, live: bool) {
        self.shared.state.lock().live = live;
    }

    /// Reset the counter and the fault cell for a new stream.
    pub fn prepare(&self) -> CamResult<()> {
        {
            let mut st = self.shared.state.lock();
            if st.dim.mem_size() == 0 {
                return Err(CameraError::Configuration(
                    "frame dimension not set before prepare".into(),
                ));
            }
            st.acq_frame_nb = -1;
        }
        self.shared.fault.store(NO_FAULT, Ordering::SeqCst);
        Ok(())
    }

    /// Queue both descriptors.
    pub fn start(&self) -> CamResult<()> {
        let requests = {
            let st = self.shared.state.lock();
            if st.dim.mem_size() == 0 {
                return Err(CameraError::Configuration("start without prepare".into()));
            }
            let capacity = st.dim.mem_size();
            [0usize, 1].map(|slot| {
                VideoShared::build_request(&self.shared, slot, &st.buffers[slot], capacity)
            })
        };
        for request in requests {
            self.shared.device.queue_frame(request)?;
        }
        trace!("video pipeline started");
        Ok(())
    }

    /// Subscribe to the published frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.shared.frame_tx.subscribe()
    }

    /// Frames delivered in the current stream.
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
}

impl VideoShared {
    fn requested(&self) -> Option<i64> {
        let control = self.control.lock().upgrade();
        control.map(|c| c.requested_frames())
    }

    fn build_request(
        shared: &Arc<Self>,
        slot: usize,
        buffer: &FrameBuffer,
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
            buffer: Arc::clone(buffer),
            capacity,
            on_done,
        }
    }

    fn on_completion(shared: &Arc<Self>, completion: FrameCompletion) {
        let slot = completion.slot % 2;
        match completion.status {
            DeviceStatus::Cancelled => {
                trace!(slot, "video request cancelled");
                return;
            }
            DeviceStatus::DataMissing => {
                warn!(slot, "video frame data missing, re-queueing descriptor");
                let request = {
                    let st = shared.state.lock();
                    Self::build_request(shared, slot, &st.buffers[slot], st.dim.mem_size())
                };
                if let Err(err) = shared.device.queue_frame(request) {
                    shared.record_fault(err.status, "re-queue after data loss failed");
                }
                return;
            }
            status if status.is_fatal() => {
                shared.record_fault(status, "video completion failed");
                return;
            }
            _ => {}
        }

        let mut requeue = None;
        let (frame, done) = {
            let mut st = shared.state.lock();
            st.acq_frame_nb += 1;
            let counter = st.acq_frame_nb;
            let nb_frames = shared.requested().unwrap_or(counter + 1);
            let frame = Frame {
                width: st.dim.width,
                height: st.dim.height,
                bit_depth: st.dim.bytes_per_pixel * 8,
                frame_idx: counter,
                data: st.buffers[slot].lock().clone(),
            };
            // The other descriptor already covers frame `counter + 1`; this
            // one goes back for `counter + 2` when the stream continues.
            if st.live || nb_frames == 0 || counter < nb_frames - 2 {
                requeue = Some(Self::build_request(
                    shared,
                    slot,
                    &st.buffers[slot],
                    st.dim.mem_size(),
                ));
            }
            let done = !st.live && nb_frames != 0 && counter >= nb_frames - 1;
            (frame, done)
        };
        trace!(frame = frame.frame_idx, slot, "video frame complete");
        if let Some(request) = requeue {
            if let Err(err) = shared.device.queue_frame(request) {
                shared.record_fault(err.status, "re-queue of next frame failed");
            }
        }
        // A stream with no subscribers keeps running; consumers end it
        // through the live switch, not by dropping their receiver.
        let _ = shared.frame_tx.send(frame);
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
            error!(?status, context, "video fault latched");
        } else {
            debug!(?status, context, "fault after first; keeping original");
        }
    }
}

/// Placeholder target for the unbound `Weak` in a freshly built backend.
struct Inert;

impl SequenceControl for Inert {
    fn requested_frames(&self) -> i64 {
        0
    }
    fn request_stop(&self) {}
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn backend() -> (Arc<MockDevice>, VideoPipeline) {
        let device = Arc::new(MockDevice::new());
        device.capture_start().unwrap();
        let video = VideoPipeline::new(device.clone());
        video.set_frame_dim(FrameDim::new(4, 4, 2));
        video.prepare().unwrap();
        (device, video)
    }

    #[test]
    fn start_queues_both_descriptors() {
        let (device, video) = backend();
        video.start().unwrap();
        assert_eq!(device.queued_slots(), vec![0, 1]);
    }

    #[test]
    fn live_stream_publishes_and_requeues() {
        let (device, video) = backend();
        video.set_live(true);
        let mut rx = video.subscribe();
        video.start().unwrap();
        for expected in 0..4 {
            device.complete_next(DeviceStatus::Success).unwrap();
            let frame = rx.try_recv().ok();
            assert_eq!(frame.map(|f| f.frame_idx), Some(expected));
        }
        // Still two in flight: every completion was re-queued.
        assert_eq!(device.queued_len(), 2);
    }

    #[test]
    fn stream_without_subscribers_keeps_running() {
        let (device, video) = backend();
        video.set_live(true);
        video.start().unwrap();
        for _ in 0..3 {
            device.complete_next(DeviceStatus::Success).unwrap();
        }
        // Nobody is listening, but the descriptors stay in rotation.
        assert_eq!(device.queued_len(), 2);
        assert_eq!(video.nb_acquired_frames(), 3);
        assert_eq!(video.fault(), None);
    }

    #[test]
    fn fatal_completion_latches_without_publishing() {
        let (device, video) = backend();
        video.set_live(true);
        let mut rx = video.subscribe();
        video.start().unwrap();
        device.complete_next(DeviceStatus::Unplugged).unwrap();
        assert_eq!(video.fault(), Some(DeviceStatus::Unplugged));
        assert!(rx.try_recv().is_err());
    }
}
