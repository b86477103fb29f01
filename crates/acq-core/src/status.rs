//! Acquisition status, trigger modes, and timing ranges.

use std::time::Duration;

/// Acquisition-session state as seen by a polling client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    /// No sequence running; ready to prepare/start.
    Ready,
    /// A sequence is in progress.
    Running,
    /// A fatal completion latched; cleared by the next prepare.
    Fault,
}

/// Detector (sensor) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetState {
    /// Sensor idle.
    Idle,
    /// Sensor exposing or the frame is in transit.
    Exposure,
    /// Detector-side fault.
    Fault,
}

/// Combined status snapshot returned by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Session state.
    pub acq: AcqState,
    /// Detector state.
    pub det: DetState,
}

impl Status {
    /// Idle/ready snapshot.
    pub const READY: Status = Status {
        acq: AcqState::Ready,
        det: DetState::Idle,
    };

    /// Fault snapshot.
    pub const FAULT: Status = Status {
        acq: AcqState::Fault,
        det: DetState::Fault,
    };
}

/// Trigger modes the framework can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrigMode {
    /// Internal fixed-rate: one start command runs the whole sequence.
    IntTrig,
    /// Internal software-multi: one software trigger pulse per frame.
    IntTrigMult,
    /// External edge, one frame per hardware pulse.
    ExtTrigMult,
    /// External edge, one pulse for the whole sequence. Not supported here.
    ExtTrigSingle,
    /// External gate. Not supported here.
    ExtGate,
}

/// Valid exposure/latency ranges at the current geometry.
///
/// The bounds are coupled: the maximum acquisition period is `1/min_rate`,
/// so the maximum latency depends on the minimum exposure and vice versa.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidRanges {
    /// Minimum exposure time.
    pub min_exp_time: Duration,
    /// Maximum exposure time.
    pub max_exp_time: Duration,
    /// Minimum latency (inter-frame gap).
    pub min_lat_time: Duration,
    /// Maximum latency.
    pub max_lat_time: Duration,
}

impl Default for ValidRanges {
    fn default() -> Self {
        Self {
            min_exp_time: Duration::ZERO,
            max_exp_time: Duration::ZERO,
            min_lat_time: Duration::ZERO,
            max_lat_time: Duration::ZERO,
        }
    }
}
