#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Simulated boost-control hardware.
//!
//! Real MCU peripherals are out of scope; this crate provides a small
//! physics model of the valve and manifold behind the `boostctl_traits`
//! seams, good enough to exercise calibration, the control loop and the
//! serial link end to end. The sampler, motor and link port all share one
//! [`SimRig`] through `Rc<RefCell<..>>` handles, the same way the
//! peripherals share the physical plant.

pub mod error;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use boostctl_traits::{AnalogChannel, AnalogSampler, LinkPort, ValveMotor};

pub use error::HwError;

/// Mechanical stops of the simulated valve, in raw ADC counts.
pub const CLOSED_STOP_RAW: f32 = 120.0;
pub const OPEN_STOP_RAW: f32 = 890.0;

/// Atmospheric pressure reading of both TMAP sensors at rest.
pub const ATMOSPHERE_RAW: f32 = 400.0;

// Counts the valve moves per position sample at full duty, and the drift
// the return spring adds when the motor is unpowered. The travel rate must
// keep a homing sweep at the default calibration speeds moving faster than
// the stall window's stability threshold, or homing would stop mid-travel.
const TRAVEL_PER_SPEED_UNIT: f32 = 0.3;
const SPRING_DRIFT_PER_SAMPLE: f32 = 2.0;

// First-order lag of manifold pressure toward its equilibrium.
const MANIFOLD_LAG: f32 = 0.1;

#[derive(Debug)]
struct SimState {
    position_raw: f32,
    motor_speed: i16,
    manifold_raw: f32,
    intake_raw: f32,
    manifold_temp_raw: u16,
    intake_temp_raw: u16,
    /// Boost the engine would produce with the valve fully closed, in raw
    /// counts above atmosphere.
    load_raw: f32,
}

impl SimState {
    fn new() -> Self {
        Self {
            position_raw: (CLOSED_STOP_RAW + OPEN_STOP_RAW) / 2.0,
            motor_speed: 0,
            manifold_raw: ATMOSPHERE_RAW,
            intake_raw: ATMOSPHERE_RAW,
            manifold_temp_raw: 650,
            intake_temp_raw: 500,
            load_raw: 0.0,
        }
    }

    /// Advance valve mechanics by one position-sample interval. Positive
    /// motor speed opens; with the motor unpowered the spring creeps the
    /// valve toward the open stop.
    fn step_valve(&mut self) {
        let delta = if self.motor_speed == 0 {
            SPRING_DRIFT_PER_SAMPLE
        } else {
            f32::from(self.motor_speed) * TRAVEL_PER_SPEED_UNIT
        };
        self.position_raw = (self.position_raw + delta).clamp(CLOSED_STOP_RAW, OPEN_STOP_RAW);
    }

    /// Advance manifold pressure by one pressure-sample interval: a lag
    /// toward the equilibrium set by valve openness and engine load.
    fn step_manifold(&mut self) {
        let open_frac =
            (self.position_raw - CLOSED_STOP_RAW) / (OPEN_STOP_RAW - CLOSED_STOP_RAW);
        let equilibrium = ATMOSPHERE_RAW + self.load_raw * (1.0 - open_frac);
        self.manifold_raw += (equilibrium - self.manifold_raw) * MANIFOLD_LAG;
    }
}

/// One simulated plant, shared by the sampler and motor handles.
#[derive(Clone)]
pub struct SimRig {
    state: Rc<RefCell<SimState>>,
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRig {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new())),
        }
    }

    pub fn sampler(&self) -> SimSampler {
        SimSampler {
            state: Rc::clone(&self.state),
        }
    }

    pub fn motor(&self) -> SimMotor {
        SimMotor {
            state: Rc::clone(&self.state),
        }
    }

    /// Set how hard the simulated engine is pushing, as raw counts of boost
    /// above atmosphere with the valve fully closed.
    pub fn set_load_raw(&self, load_raw: f32) {
        self.state.borrow_mut().load_raw = load_raw.max(0.0);
    }

    pub fn position_raw(&self) -> u16 {
        self.state.borrow().position_raw.round() as u16
    }

    pub fn manifold_raw(&self) -> u16 {
        self.state.borrow().manifold_raw.round() as u16
    }
}

/// Analog front end of the rig. Position reads advance the valve model and
/// pressure reads advance the manifold model, so physics time follows the
/// caller's own sampling cadence.
pub struct SimSampler {
    state: Rc<RefCell<SimState>>,
}

impl AnalogSampler for SimSampler {
    fn read_averaged(
        &mut self,
        channel: AnalogChannel,
        _samples: u32,
        _inter_sample_delay: Duration,
    ) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        let mut state = self.state.borrow_mut();
        let raw = match channel {
            AnalogChannel::ValvePosition => {
                state.step_valve();
                state.position_raw
            }
            AnalogChannel::ManifoldPressure => {
                state.step_manifold();
                state.manifold_raw
            }
            AnalogChannel::IntakePressure => state.intake_raw,
            AnalogChannel::ManifoldTemp => f32::from(state.manifold_temp_raw),
            AnalogChannel::IntakeTemp => f32::from(state.intake_temp_raw),
        };
        Ok(raw.round().clamp(0.0, 1023.0) as u16)
    }
}

/// Motor driver of the rig. Commands outside the H-bridge's duty range are
/// rejected the way the real driver would fault.
pub struct SimMotor {
    state: Rc<RefCell<SimState>>,
}

impl ValveMotor for SimMotor {
    fn set_speed(&mut self, speed: i16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !(-255..=255).contains(&speed) {
            return Err(Box::new(HwError::SpeedOutOfRange(speed)));
        }
        tracing::trace!(speed, "valve motor command");
        self.state.borrow_mut().motor_speed = speed;
        Ok(())
    }
}

/// Simulated master end of the serial link: a byte source polled once per
/// read cycle, capturing everything the controller writes back.
pub struct ScriptedMaster {
    source: Box<dyn FnMut(u64) -> Option<Vec<u8>> + Send>,
    pending: VecDeque<u8>,
    poll: u64,
    responses: Vec<Vec<u8>>,
}

impl ScriptedMaster {
    /// `source` is called once per poll with the poll index and returns the
    /// bytes the master sent during that interval, if any.
    pub fn new(source: impl FnMut(u64) -> Option<Vec<u8>> + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
            pending: VecDeque::new(),
            poll: 0,
            responses: Vec::new(),
        }
    }

    /// A master that never transmits. Useful for comms-loss testing.
    pub fn silent() -> Self {
        Self::new(|_| None)
    }

    /// Frames the controller wrote back to the master.
    pub fn responses(&self) -> &[Vec<u8>] {
        &self.responses
    }
}

impl LinkPort for ScriptedMaster {
    fn read_pending(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(bytes) = (self.source)(self.poll) {
            self.pending.extend(bytes);
        }
        self.poll += 1;
        let mut n = 0;
        while n < buf.len() {
            let Some(b) = self.pending.pop_front() else {
                break;
            };
            buf[n] = b;
            n += 1;
        }
        Ok(n)
    }

    fn write_frame(
        &mut self,
        frame: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.responses.push(frame.to_vec());
        Ok(())
    }
}
