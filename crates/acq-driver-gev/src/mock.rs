//! Simulated camera device for tests and offline development.
//!
//! The mock keeps an attribute store seeded with values typical of a small
//! monochrome GigE camera, records every command and capture call, and
//! holds queued frame requests in a FIFO. Tests drive frame delivery by
//! calling [`MockDevice::complete_next`] with the status they want, which
//! invokes the completion handler on the caller's thread the way the real
//! device invokes it on its stream thread.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use acq_core::device::attr;
use acq_core::{
    DeviceCommand, DeviceError, DeviceErrorKind, DeviceHandle, DeviceStatus, FrameCompletion,
    FrameRequest,
};

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    U32(u32),
    F64(f64),
    Enum(String),
    Str(String),
}

struct MockState {
    attrs: HashMap<&'static str, AttrValue>,
    ranges_u32: HashMap<&'static str, (u32, u32)>,
    ranges_f64: HashMap<&'static str, (f64, f64)>,
    commands: Vec<DeviceCommand>,
    queue: VecDeque<FrameRequest>,
    capture_started: bool,
    capture_starts: usize,
    capture_ends: usize,
    queue_clears: usize,
    fill_byte: u8,
}

/// Scriptable in-memory [`DeviceHandle`].
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A mock resembling a 1360x1024 monochrome camera.
    pub fn new() -> Self {
        let mut attrs: HashMap<&'static str, AttrValue> = HashMap::new();
        attrs.insert(attr::CAMERA_NAME, AttrValue::Str("GC1350M".into()));
        attrs.insert(attr::UNIQUE_ID, AttrValue::U32(6005));
        attrs.insert(attr::FIRMWARE_VER_MAJOR, AttrValue::U32(1));
        attrs.insert(attr::FIRMWARE_VER_MINOR, AttrValue::U32(54));
        attrs.insert(attr::SENSOR_TYPE, AttrValue::Enum("Mono".into()));
        attrs.insert(attr::SENSOR_WIDTH, AttrValue::U32(1360));
        attrs.insert(attr::SENSOR_HEIGHT, AttrValue::U32(1024));
        attrs.insert(attr::PIXEL_FORMAT, AttrValue::Enum("Mono16".into()));
        attrs.insert(attr::ACQUISITION_MODE, AttrValue::Enum("Continuous".into()));
        attrs.insert(attr::EXPOSURE_MODE, AttrValue::Enum("Manual".into()));
        attrs.insert(attr::EXPOSURE_VALUE, AttrValue::U32(10_000));
        attrs.insert(attr::FRAME_RATE, AttrValue::F64(53.0));
        attrs.insert(
            attr::FRAME_START_TRIGGER_MODE,
            AttrValue::Enum("FixedRate".into()),
        );
        attrs.insert(
            attr::FRAME_START_TRIGGER_EVENT,
            AttrValue::Enum("EdgeRising".into()),
        );
        attrs.insert(attr::GAIN_VALUE, AttrValue::U32(0));
        attrs.insert(attr::BINNING_X, AttrValue::U32(1));
        attrs.insert(attr::BINNING_Y, AttrValue::U32(1));
        attrs.insert(attr::REGION_X, AttrValue::U32(0));
        attrs.insert(attr::REGION_Y, AttrValue::U32(0));
        attrs.insert(attr::WIDTH, AttrValue::U32(1360));
        attrs.insert(attr::HEIGHT, AttrValue::U32(1024));
        attrs.insert(attr::PACKET_SIZE, AttrValue::U32(8228));

        let mut ranges_u32 = HashMap::new();
        ranges_u32.insert(attr::EXPOSURE_VALUE, (10, 60_000_000));
        ranges_u32.insert(attr::GAIN_VALUE, (0, 28));
        ranges_u32.insert(attr::BINNING_X, (1, 8));
        ranges_u32.insert(attr::BINNING_Y, (1, 8));
        let mut ranges_f64 = HashMap::new();
        ranges_f64.insert(attr::FRAME_RATE, (1.0, 53.0));

        Self {
            state: Mutex::new(MockState {
                attrs,
                ranges_u32,
                ranges_f64,
                commands: Vec::new(),
                queue: VecDeque::new(),
                capture_started: false,
                capture_starts: 0,
                capture_ends: 0,
                queue_clears: 0,
                fill_byte: 0,
            }),
        }
    }

    /// Complete the oldest queued request with `status`, invoking its
    /// handler on this thread. On success the buffer is filled with a
    /// rolling test pattern first. Returns the slot of the completed
    /// request, or `None` when the queue is empty.
    pub fn complete_next(&self, status: DeviceStatus) -> Option<usize> {
        let request = {
            let mut st = self.state.lock();
            let request = st.queue.pop_front()?;
            if status == DeviceStatus::Success {
                st.fill_byte = st.fill_byte.wrapping_add(1);
                let fill = st.fill_byte;
                let mut data = request.buffer.lock();
                let len = data.len().min(request.capacity);
                for byte in &mut data[..len] {
                    *byte = fill;
                }
            }
            request
        };
        let slot = request.slot;
        (request.on_done)(FrameCompletion { slot, status });
        Some(slot)
    }

    /// Slots of the queued requests, oldest first.
    pub fn queued_slots(&self) -> Vec<usize> {
        self.state.lock().queue.iter().map(|r| r.slot).collect()
    }

    /// Number of outstanding requests.
    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.state.lock().commands.clone()
    }

    /// How many times a command was run.
    pub fn command_count(&self, command: DeviceCommand) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| **c == command)
            .count()
    }

    /// Capture session open count.
    pub fn capture_starts(&self) -> usize {
        self.state.lock().capture_starts
    }

    /// Capture session close count.
    pub fn capture_ends(&self) -> usize {
        self.state.lock().capture_ends
    }

    /// Queue flush count.
    pub fn queue_clears(&self) -> usize {
        self.state.lock().queue_clears
    }
}

fn missing(name: &str) -> DeviceError {
    DeviceError::new(
        DeviceErrorKind::Attribute,
        DeviceStatus::BadParameter,
        format!("unknown attribute {name}"),
    )
}

fn wrong_type(name: &str) -> DeviceError {
    DeviceError::new(
        DeviceErrorKind::Attribute,
        DeviceStatus::BadParameter,
        format!("attribute {name} has a different type"),
    )
}

impl DeviceHandle for MockDevice {
    fn get_attr_u32(&self, name: &str) -> Result<u32, DeviceError> {
        match self.state.lock().attrs.get(name) {
            Some(AttrValue::U32(v)) => Ok(*v),
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn set_attr_u32(&self, name: &str, value: u32) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        if let Some((lo, hi)) = st.ranges_u32.get(name).copied() {
            if value < lo || value > hi {
                return Err(DeviceError::attribute(
                    name,
                    format!("{value} outside {lo}..={hi}"),
                ));
            }
        }
        match st.attrs.get_mut(name) {
            Some(AttrValue::U32(v)) => {
                *v = value;
                Ok(())
            }
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn attr_range_u32(&self, name: &str) -> Result<(u32, u32), DeviceError> {
        self.state
            .lock()
            .ranges_u32
            .get(name)
            .copied()
            .ok_or_else(|| missing(name))
    }

    fn get_attr_f64(&self, name: &str) -> Result<f64, DeviceError> {
        match self.state.lock().attrs.get(name) {
            Some(AttrValue::F64(v)) => Ok(*v),
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn set_attr_f64(&self, name: &str, value: f64) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        if let Some((lo, hi)) = st.ranges_f64.get(name).copied() {
            if value < lo || value > hi {
                return Err(DeviceError::attribute(
                    name,
                    format!("{value} outside {lo}..={hi}"),
                ));
            }
        }
        match st.attrs.get_mut(name) {
            Some(AttrValue::F64(v)) => {
                *v = value;
                Ok(())
            }
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn attr_range_f64(&self, name: &str) -> Result<(f64, f64), DeviceError> {
        self.state
            .lock()
            .ranges_f64
            .get(name)
            .copied()
            .ok_or_else(|| missing(name))
    }

    fn get_attr_enum(&self, name: &str) -> Result<String, DeviceError> {
        match self.state.lock().attrs.get(name) {
            Some(AttrValue::Enum(v)) => Ok(v.clone()),
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn set_attr_enum(&self, name: &str, value: &str) -> Result<(), DeviceError> {
        match self.state.lock().attrs.get_mut(name) {
            Some(AttrValue::Enum(v)) => {
                *v = value.to_owned();
                Ok(())
            }
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn get_attr_string(&self, name: &str) -> Result<String, DeviceError> {
        match self.state.lock().attrs.get(name) {
            Some(AttrValue::Str(v)) => Ok(v.clone()),
            Some(_) => Err(wrong_type(name)),
            None => Err(missing(name)),
        }
    }

    fn run_command(&self, command: DeviceCommand) -> Result<(), DeviceError> {
        self.state.lock().commands.push(command);
        Ok(())
    }

    fn capture_start(&self) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        st.capture_started = true;
        st.capture_starts += 1;
        Ok(())
    }

    fn capture_end(&self) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        st.capture_started = false;
        st.capture_ends += 1;
        Ok(())
    }

    fn capture_queue_clear(&self) -> Result<(), DeviceError> {
        let drained: Vec<FrameRequest> = {
            let mut st = self.state.lock();
            st.queue_clears += 1;
            st.queue.drain(..).collect()
        };
        // Handlers run outside the state lock, as on a real device.
        for request in drained {
            let slot = request.slot;
            (request.on_done)(FrameCompletion {
                slot,
                status: DeviceStatus::Cancelled,
            });
        }
        Ok(())
    }

    fn queue_frame(&self, request: FrameRequest) -> Result<(), DeviceError> {
        let mut st = self.state.lock();
        if !st.capture_started {
            return Err(DeviceError::new(
                DeviceErrorKind::Queue,
                DeviceStatus::BadSequence,
                "queue_frame without a capture session",
            ));
        }
        st.queue.push_back(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use acq_core::FrameBuffer;

    use super::*;

    fn request(slot: usize, done: Arc<Mutex<Vec<FrameCompletion>>>) -> FrameRequest {
        let buffer: FrameBuffer = Arc::new(Mutex::new(vec![0u8; 8]));
        FrameRequest {
            slot,
            buffer,
            capacity: 8,
            on_done: Arc::new(move |c: FrameCompletion| done.lock().push(c)),
        }
    }

    #[test]
    fn queueing_requires_a_capture_session() {
        let device = MockDevice::new();
        let done = Arc::new(Mutex::new(Vec::new()));
        assert!(device.queue_frame(request(0, done.clone())).is_err());
        device.capture_start().unwrap();
        device.queue_frame(request(0, done)).unwrap();
        assert_eq!(device.queued_len(), 1);
    }

    #[test]
    fn queue_clear_cancels_everything() {
        let device = MockDevice::new();
        device.capture_start().unwrap();
        let done = Arc::new(Mutex::new(Vec::new()));
        device.queue_frame(request(0, done.clone())).unwrap();
        device.queue_frame(request(1, done.clone())).unwrap();
        device.capture_queue_clear().unwrap();
        let completions = done.lock();
        assert_eq!(completions.len(), 2);
        assert!(completions
            .iter()
            .all(|c| c.status == DeviceStatus::Cancelled));
    }

    #[test]
    fn success_fills_the_buffer() {
        let device = MockDevice::new();
        device.capture_start().unwrap();
        let done = Arc::new(Mutex::new(Vec::new()));
        let buffer: FrameBuffer = Arc::new(Mutex::new(vec![0u8; 4]));
        let on_done: acq_core::CompletionHandler = {
            let done = done.clone();
            Arc::new(move |c: FrameCompletion| done.lock().push(c))
        };
        device
            .queue_frame(FrameRequest {
                slot: 0,
                buffer: buffer.clone(),
                capacity: 4,
                on_done,
            })
            .unwrap();
        assert_eq!(device.complete_next(DeviceStatus::Success), Some(0));
        assert!(buffer.lock().iter().all(|b| *b != 0));
        assert_eq!(done.lock().len(), 1);
    }

    #[test]
    fn ranged_attributes_reject_out_of_range_writes() {
        let device = MockDevice::new();
        assert!(device.set_attr_u32(attr::EXPOSURE_VALUE, 1).is_err());
        assert!(device.set_attr_f64(attr::FRAME_RATE, 100.0).is_err());
        device.set_attr_f64(attr::FRAME_RATE, 25.0).unwrap();
    }
}
