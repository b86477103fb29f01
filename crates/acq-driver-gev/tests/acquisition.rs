//! End-to-end acquisition scenarios against the mock device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use acq_core::device::attr;
use acq_core::{
    AcqState, BufferManager, DetState, DeviceCommand, DeviceError, DeviceHandle, DeviceStatus,
    FrameRequest, Roi, Status, TrigMode, ValidRanges,
};
use acq_driver_gev::mock::MockDevice;
use acq_driver_gev::{CameraConfig, GevInterface};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn interface() -> (Arc<MockDevice>, GevInterface) {
    init_tracing();
    let device = Arc::new(MockDevice::new());
    let interface = GevInterface::new(device.clone(), CameraConfig::default()).unwrap();
    (device, interface)
}

fn color_interface() -> (Arc<MockDevice>, GevInterface) {
    init_tracing();
    let device = Arc::new(MockDevice::new());
    device.set_attr_enum(attr::SENSOR_TYPE, "Bayer").unwrap();
    let interface = GevInterface::new(device.clone(), CameraConfig::default()).unwrap();
    (device, interface)
}

#[test]
fn finite_sequence_runs_to_completion() {
    let (device, interface) = interface();
    interface.sync().set_nb_frames(3).unwrap();
    interface.prepare_acq().unwrap();
    let mut events = interface.frame_events();
    interface.start_acq().unwrap();
    assert_eq!(device.queued_slots(), vec![0, 1]);
    assert_eq!(interface.status().acq, AcqState::Running);

    for _ in 0..3 {
        device.complete_next(DeviceStatus::Success).unwrap();
    }

    assert_eq!(interface.nb_acquired_frames(), 3);
    assert_eq!(interface.status(), Status::READY);
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStart), 1);
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStop), 1);
    assert_eq!(device.queued_len(), 0);
    for expected in 0..3 {
        assert_eq!(events.try_recv().unwrap().acq_frame_idx, expected);
    }
    assert!(events.try_recv().is_err());
}

#[test]
fn data_missing_retries_the_same_descriptor_in_place() {
    let (device, interface) = interface();
    interface.sync().set_nb_frames(1).unwrap();
    interface.prepare_acq().unwrap();
    let mut events = interface.frame_events();
    interface.start_acq().unwrap();
    assert_eq!(device.queued_slots(), vec![0]);

    assert_eq!(device.complete_next(DeviceStatus::DataMissing), Some(0));
    // Same descriptor back on the queue, nothing counted or published.
    assert_eq!(device.queued_slots(), vec![0]);
    assert_eq!(interface.nb_acquired_frames(), 0);
    assert!(events.try_recv().is_err());
    assert_eq!(interface.status().acq, AcqState::Running);

    assert_eq!(device.complete_next(DeviceStatus::Success), Some(0));
    assert_eq!(interface.nb_acquired_frames(), 1);
    assert_eq!(events.try_recv().unwrap().acq_frame_idx, 0);
    assert_eq!(interface.status(), Status::READY);
}

#[test]
fn first_fatal_completion_is_sticky_until_prepare() {
    let (device, interface) = interface();
    interface.sync().set_nb_frames(5).unwrap();
    interface.prepare_acq().unwrap();
    let mut events = interface.frame_events();
    interface.start_acq().unwrap();

    device.complete_next(DeviceStatus::Success).unwrap();
    device.complete_next(DeviceStatus::Timeout).unwrap();
    device.complete_next(DeviceStatus::Unplugged).unwrap();

    // First fatal status wins and the counter froze after the success.
    assert_eq!(interface.status(), Status::FAULT);
    assert_eq!(interface.nb_acquired_frames(), 1);
    assert_eq!(events.try_recv().unwrap().acq_frame_idx, 0);
    assert!(events.try_recv().is_err());

    // Stopping does not clear the fault; the next prepare does.
    interface.stop_acq().unwrap();
    assert_eq!(interface.status(), Status::FAULT);
    interface.prepare_acq().unwrap();
    assert_eq!(interface.status(), Status::READY);
    assert_eq!(interface.nb_acquired_frames(), 0);
}

#[test]
fn stop_flushes_the_queue_without_recording_a_fault() {
    let (device, interface) = interface();
    interface.sync().set_nb_frames(0).unwrap();
    interface.prepare_acq().unwrap();
    let mut events = interface.frame_events();
    interface.start_acq().unwrap();
    assert_eq!(device.queued_len(), 2);

    interface.stop_acq().unwrap();

    assert_eq!(device.queue_clears(), 1);
    assert_eq!(device.queued_len(), 0);
    assert_eq!(interface.status(), Status::READY);
    assert_eq!(interface.nb_acquired_frames(), 0);
    assert!(events.try_recv().is_err());
}

#[test]
fn unbounded_sequence_never_stops_on_its_own() {
    let (device, interface) = interface();
    interface.sync().set_nb_frames(0).unwrap();
    interface.prepare_acq().unwrap();
    interface.start_acq().unwrap();

    for _ in 0..6 {
        device.complete_next(DeviceStatus::Success).unwrap();
        assert_eq!(device.queued_len(), 2);
    }

    assert_eq!(interface.nb_acquired_frames(), 6);
    assert_eq!(interface.status().acq, AcqState::Running);
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStop), 0);
}

#[test]
fn stop_is_idempotent_on_device_commands() {
    let (device, interface) = interface();
    interface.sync().set_nb_frames(2).unwrap();
    interface.prepare_acq().unwrap();
    interface.start_acq().unwrap();
    interface.stop_acq().unwrap();
    interface.stop_acq().unwrap();
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStop), 1);
    assert_eq!(device.capture_ends(), 1);
}

#[test]
fn start_without_prepare_is_rejected() {
    let (_device, interface) = interface();
    interface.sync().set_nb_frames(2).unwrap();
    assert!(interface.start_acq().is_err());
}

#[test]
fn unsupported_trigger_modes_are_rejected() {
    let (device, interface) = interface();
    assert!(interface.sync().set_trig_mode(TrigMode::ExtGate).is_err());
    assert!(interface
        .sync()
        .set_trig_mode(TrigMode::ExtTrigSingle)
        .is_err());
    assert_eq!(interface.sync().trig_mode(), TrigMode::IntTrig);

    interface.sync().set_trig_mode(TrigMode::ExtTrigMult).unwrap();
    assert_eq!(
        device.get_attr_enum(attr::FRAME_START_TRIGGER_MODE).unwrap(),
        "SyncIn1"
    );
    assert_eq!(
        device
            .get_attr_enum(attr::FRAME_START_TRIGGER_EVENT)
            .unwrap(),
        "EdgeRising"
    );
}

#[test]
fn software_multi_fires_one_trigger_per_start() {
    let (device, interface) = interface();
    interface.sync().set_trig_mode(TrigMode::IntTrigMult).unwrap();
    assert_eq!(
        device.get_attr_enum(attr::FRAME_START_TRIGGER_MODE).unwrap(),
        "Software"
    );
    interface.sync().set_nb_frames(2).unwrap();
    interface.prepare_acq().unwrap();

    interface.start_acq().unwrap();
    assert_eq!(device.command_count(DeviceCommand::SoftwareTrigger), 1);
    // A frame is exposing; software-multi reports the detector idle.
    assert_eq!(interface.status().det, DetState::Idle);

    device.complete_next(DeviceStatus::Success).unwrap();
    // Between triggers the inverted report shows exposure.
    assert_eq!(interface.status().det, DetState::Exposure);

    interface.start_acq().unwrap();
    assert_eq!(device.command_count(DeviceCommand::SoftwareTrigger), 2);
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStart), 1);
    assert_eq!(device.capture_starts(), 1);
}

#[test]
fn exposure_and_latency_derive_the_frame_rate() {
    let (device, interface) = interface();
    let sync = interface.sync();

    sync.set_exp_time(Duration::from_millis(100)).unwrap();
    sync.set_lat_time(Duration::ZERO).unwrap();
    assert_eq!(device.get_attr_u32(attr::EXPOSURE_VALUE).unwrap(), 100_000);
    assert!((device.get_attr_f64(attr::FRAME_RATE).unwrap() - 10.0).abs() < 1e-9);

    sync.set_lat_time(Duration::from_millis(100)).unwrap();
    assert!((device.get_attr_f64(attr::FRAME_RATE).unwrap() - 5.0).abs() < 1e-9);

    // Very short periods clamp the rate to the device maximum instead of
    // pushing an illegal value.
    sync.set_exp_time(Duration::from_micros(10)).unwrap();
    sync.set_lat_time(Duration::ZERO).unwrap();
    assert!((device.get_attr_f64(attr::FRAME_RATE).unwrap() - 53.0).abs() < 1e-9);

    // An exposure longer than the longest acquisition period is rejected.
    assert!(sync.set_exp_time(Duration::from_secs(2)).is_err());
}

#[test]
fn valid_ranges_follow_the_device_bounds() {
    let (_device, interface) = interface();
    let ranges = interface.sync().valid_ranges();
    assert_eq!(ranges.min_exp_time, Duration::from_micros(10));
    let min_lat = 1.0 / 53.0 - 10e-6;
    assert!((ranges.min_lat_time.as_secs_f64() - min_lat).abs() < 1e-8);
    // The longest acquisition period (1 s at the 1 Hz floor) is shared
    // between exposure and latency: each bound leaves room for the current
    // value of the other (exposure starts at 10 ms, latency at its floor).
    assert!((ranges.max_lat_time.as_secs_f64() - (1.0 - 0.01)).abs() < 1e-8);
    assert!((ranges.max_exp_time.as_secs_f64() - (1.0 - min_lat)).abs() < 1e-8);
}

#[test]
fn timing_setters_re_derive_the_opposite_bound() {
    let (_device, interface) = interface();
    let sync = interface.sync();
    let seen: Arc<Mutex<Vec<ValidRanges>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    sync.connect_ranges_observer(Box::new(move |ranges| sink.lock().push(ranges)));

    sync.set_exp_time(Duration::from_millis(800)).unwrap();
    let ranges = sync.valid_ranges();
    assert!((ranges.max_lat_time.as_secs_f64() - 0.2).abs() < 1e-8);
    assert_eq!(seen.lock().len(), 1);

    sync.set_lat_time(Duration::from_millis(150)).unwrap();
    let ranges = sync.valid_ranges();
    assert!((ranges.max_exp_time.as_secs_f64() - 0.85).abs() < 1e-8);
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn ranges_observers_fire_on_forced_update() {
    let (_device, interface) = interface();
    let seen: Arc<Mutex<Vec<ValidRanges>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    interface
        .sync()
        .connect_ranges_observer(Box::new(move |ranges| sink.lock().push(ranges)));

    interface.sync().update_valid_ranges(false).unwrap();
    assert!(seen.lock().is_empty());
    interface.sync().update_valid_ranges(true).unwrap();
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn roi_changes_resize_the_frame_buffers() -> anyhow::Result<()> {
    let (_device, interface) = interface();
    interface.set_roi(Roi::new(0, 0, 320, 240))?;
    interface.prepare_acq()?;
    let dim = interface.buffer_manager().frame_dim();
    assert_eq!((dim.width, dim.height), (320, 240));
    assert_eq!(dim.mem_size(), 320 * 240 * 2);
    Ok(())
}

#[test]
fn color_camera_streams_live_video() -> anyhow::Result<()> {
    let (device, interface) = color_interface();
    assert!(!interface.camera().is_monochrome());

    let mut frames = interface.video_frames()?;
    interface.set_live(true)?;
    assert_eq!(device.queued_len(), 2);

    for expected in 0..3 {
        device.complete_next(DeviceStatus::Success).unwrap();
        let frame = frames.try_recv()?;
        assert_eq!(frame.frame_idx, expected);
        assert_eq!(frame.bit_depth, 16);
        assert_eq!(frame.data.len(), 1360 * 1024 * 2);
    }
    assert_eq!(device.queued_len(), 2);

    interface.set_live(false)?;
    assert_eq!(interface.status(), Status::READY);
    assert_eq!(device.queued_len(), 0);
    Ok(())
}

#[test]
fn live_video_is_rejected_on_a_buffered_pipeline() {
    let (_device, interface) = interface();
    assert!(interface.set_live(true).is_err());
    assert!(interface.video_frames().is_err());
}

#[test]
fn live_stream_without_subscribers_keeps_running() {
    let (device, interface) = color_interface();
    interface.set_live(true).unwrap();

    for _ in 0..3 {
        device.complete_next(DeviceStatus::Success).unwrap();
    }

    // Nobody subscribed, but the stream is not its own consumer: it keeps
    // rotating descriptors until someone flips the live switch off.
    assert_eq!(interface.status().acq, AcqState::Running);
    assert_eq!(device.queued_len(), 2);
    assert_eq!(interface.nb_acquired_frames(), 3);

    interface.set_live(false).unwrap();
    assert_eq!(interface.status(), Status::READY);
}

#[test]
fn monitor_connection_still_stops_the_camera() {
    init_tracing();
    let device = Arc::new(MockDevice::new());
    let config = CameraConfig {
        master: false,
        ..CameraConfig::default()
    };
    let interface = GevInterface::new(device.clone(), config).unwrap();
    interface.sync().set_nb_frames(1).unwrap();
    interface.prepare_acq().unwrap();
    interface.start_acq().unwrap();
    // Only the start command is reserved to the master connection.
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStart), 0);

    interface.stop_acq().unwrap();
    assert_eq!(device.command_count(DeviceCommand::AcquisitionStop), 1);
    assert_eq!(device.capture_ends(), 1);
}

/// Wraps the mock so that, once armed, `capture_start` releases a waiting
/// thread and lingers long enough for that thread's completion callback to
/// run concurrently with the start path.
struct GatedDevice {
    inner: MockDevice,
    armed: AtomicBool,
    release: mpsc::Sender<()>,
}

impl DeviceHandle for GatedDevice {
    fn get_attr_u32(&self, name: &str) -> Result<u32, DeviceError> {
        self.inner.get_attr_u32(name)
    }
    fn set_attr_u32(&self, name: &str, value: u32) -> Result<(), DeviceError> {
        self.inner.set_attr_u32(name, value)
    }
    fn attr_range_u32(&self, name: &str) -> Result<(u32, u32), DeviceError> {
        self.inner.attr_range_u32(name)
    }
    fn get_attr_f64(&self, name: &str) -> Result<f64, DeviceError> {
        self.inner.get_attr_f64(name)
    }
    fn set_attr_f64(&self, name: &str, value: f64) -> Result<(), DeviceError> {
        self.inner.set_attr_f64(name, value)
    }
    fn attr_range_f64(&self, name: &str) -> Result<(f64, f64), DeviceError> {
        self.inner.attr_range_f64(name)
    }
    fn get_attr_enum(&self, name: &str) -> Result<String, DeviceError> {
        self.inner.get_attr_enum(name)
    }
    fn set_attr_enum(&self, name: &str, value: &str) -> Result<(), DeviceError> {
        self.inner.set_attr_enum(name, value)
    }
    fn get_attr_string(&self, name: &str) -> Result<String, DeviceError> {
        self.inner.get_attr_string(name)
    }
    fn run_command(&self, command: DeviceCommand) -> Result<(), DeviceError> {
        self.inner.run_command(command)
    }
    fn capture_start(&self) -> Result<(), DeviceError> {
        self.inner.capture_start()?;
        if self.armed.load(Ordering::SeqCst) {
            let _ = self.release.send(());
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    }
    fn capture_end(&self) -> Result<(), DeviceError> {
        self.inner.capture_end()
    }
    fn capture_queue_clear(&self) -> Result<(), DeviceError> {
        self.inner.capture_queue_clear()
    }
    fn queue_frame(&self, request: FrameRequest) -> Result<(), DeviceError> {
        self.inner.queue_frame(request)
    }
}

#[test]
fn sequence_end_completion_does_not_block_a_concurrent_start() {
    init_tracing();
    let (release_tx, release_rx) = mpsc::channel();
    let device = Arc::new(GatedDevice {
        inner: MockDevice::new(),
        armed: AtomicBool::new(false),
        release: release_tx,
    });
    let interface =
        Arc::new(GevInterface::new(device.clone(), CameraConfig::default()).unwrap());
    interface.sync().set_nb_frames(1).unwrap();
    interface.prepare_acq().unwrap();
    interface.start_acq().unwrap();
    // Leave the queued request outstanding across the stop.
    interface.sync().stop_acq(false).unwrap();
    device.armed.store(true, Ordering::SeqCst);

    // One thread finishes the outstanding frame (its auto-stop path takes
    // the controller lock) while the other re-enters start.
    let completer = {
        let device = device.clone();
        thread::spawn(move || {
            release_rx.recv_timeout(Duration::from_secs(3)).unwrap();
            device.inner.complete_next(DeviceStatus::Success).unwrap();
        })
    };
    let starter = {
        let interface = interface.clone();
        thread::spawn(move || {
            // The re-start may be rejected; only finishing matters here.
            let _ = interface.start_acq();
        })
    };

    let (done_tx, done_rx) = mpsc::channel();
    let watchdog = thread::spawn(move || {
        completer.join().unwrap();
        starter.join().unwrap();
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("start and the completion callback blocked each other");
    watchdog.join().unwrap();
    assert_eq!(interface.nb_acquired_frames(), 1);
}
