//! Buffer manager capability and the in-memory implementation.
//!
//! The pipeline never owns pixel memory. It borrows buffers from a
//! [`BufferManager`] keyed by logical frame index, and reports finished
//! frames back through [`BufferManager::frame_ready`]. Ordering of
//! `frame_ready` calls follows completion order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::data::FrameDim;

/// A pixel buffer slot shared between the buffer owner and the device.
///
/// The device fills the buffer while a frame request is outstanding; holders
/// must not read it until the matching `frame_ready` arrives.
pub type FrameBuffer = Arc<Mutex<Vec<u8>>>;

/// Notification that a logical frame has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReadyInfo {
    /// Zero-based acquisition frame index.
    pub acq_frame_idx: i64,
}

/// Owner of frame memory and sink for frame-ready events.
pub trait BufferManager: Send + Sync {
    /// Current per-frame geometry.
    fn frame_dim(&self) -> FrameDim;

    /// Map a logical frame index to its buffer slot.
    fn frame_buffer(&self, frame_idx: i64) -> FrameBuffer;

    /// Publish a delivered frame. Must be cheap and non-blocking; the
    /// pipeline calls this from the device completion thread.
    fn frame_ready(&self, info: FrameReadyInfo);
}

struct SoftBufferState {
    dim: FrameDim,
    buffers: Vec<FrameBuffer>,
}

/// Fixed ring of pre-allocated buffers with broadcast frame-ready fan-out.
///
/// Logical frame index `n` maps to slot `n % nb_buffers`; with double
/// buffering only two frames are ever in flight, so any ring of two or more
/// slots is safe.
pub struct SoftBufferManager {
    state: Mutex<SoftBufferState>,
    ready_tx: broadcast::Sender<FrameReadyInfo>,
}

impl SoftBufferManager {
    /// Create a manager with `nb_buffers` slots, initially zero-sized.
    /// Call [`set_frame_dim`](Self::set_frame_dim) before acquiring.
    pub fn new(nb_buffers: usize) -> Self {
        let nb_buffers = nb_buffers.max(2);
        let buffers = (0..nb_buffers)
            .map(|_| Arc::new(Mutex::new(Vec::new())))
            .collect();
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(SoftBufferState {
                dim: FrameDim::default(),
                buffers,
            }),
            ready_tx,
        }
    }

    /// Resize every slot for the given frame geometry.
    pub fn set_frame_dim(&self, dim: FrameDim) {
        let mut state = self.state.lock();
        let size = dim.mem_size();
        for buffer in &state.buffers {
            let mut data = buffer.lock();
            data.clear();
            data.resize(size, 0);
        }
        state.dim = dim;
        debug!(
            width = dim.width,
            height = dim.height,
            bytes = size,
            "frame buffers reallocated"
        );
    }

    /// Number of ring slots.
    pub fn nb_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Subscribe to frame-ready events.
    pub fn subscribe(&self) -> broadcast::Receiver<FrameReadyInfo> {
        self.ready_tx.subscribe()
    }
}

impl BufferManager for SoftBufferManager {
    fn frame_dim(&self) -> FrameDim {
        self.state.lock().dim
    }

    fn frame_buffer(&self, frame_idx: i64) -> FrameBuffer {
        let state = self.state.lock();
        let nb = state.buffers.len() as i64;
        let slot = frame_idx.rem_euclid(nb) as usize;
        Arc::clone(&state.buffers[slot])
    }

    fn frame_ready(&self, info: FrameReadyInfo) {
        // No subscribers is fine; the event is droppable.
        let _ = self.ready_tx.send(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_wraps_around_the_ring() {
        let mgr = SoftBufferManager::new(2);
        assert!(Arc::ptr_eq(&mgr.frame_buffer(0), &mgr.frame_buffer(2)));
        assert!(Arc::ptr_eq(&mgr.frame_buffer(1), &mgr.frame_buffer(3)));
        assert!(!Arc::ptr_eq(&mgr.frame_buffer(0), &mgr.frame_buffer(1)));
    }

    #[test]
    fn set_frame_dim_resizes_all_slots() {
        let mgr = SoftBufferManager::new(4);
        let dim = FrameDim::new(16, 8, 2);
        mgr.set_frame_dim(dim);
        assert_eq!(mgr.frame_dim(), dim);
        for idx in 0..4 {
            assert_eq!(mgr.frame_buffer(idx).lock().len(), 16 * 8 * 2);
        }
    }

    #[test]
    fn frame_ready_reaches_subscribers() {
        let mgr = SoftBufferManager::new(2);
        let mut rx = mgr.subscribe();
        mgr.frame_ready(FrameReadyInfo { acq_frame_idx: 5 });
        assert_eq!(rx.try_recv().ok().map(|i| i.acq_frame_idx), Some(5));
    }

    #[test]
    fn frame_ready_without_subscribers_is_silent() {
        let mgr = SoftBufferManager::new(2);
        mgr.frame_ready(FrameReadyInfo { acq_frame_idx: 0 });
    }
}
