#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core boost-control logic (hardware-agnostic).
//!
//! This crate provides the closed-loop control and fault-management engine of
//! the electronic boost controller. All hardware interactions go through the
//! `boostctl_traits` seams (`AnalogSampler`, `ValveMotor`, `LinkPort`).
//!
//! ## Architecture
//!
//! - **Calibration**: drive the valve to both mechanical stops and record the
//!   raw travel limits (`calibration` module)
//! - **Conversion**: saturating-linear range mapping and TMAP sensor
//!   conversions (`convert`)
//! - **Control**: dual PID engine (pressure / position feedback) with a mode
//!   selector, travel-limit guard and fail-safe gate (`pid`, `context`)
//! - **Faults**: latching critical alarm fed by comms-loss, overboost and
//!   link-quality detectors (`fault`)
//! - **Link**: `<...>`-delimited frame reassembly, XOR checksum validation
//!   and typed command dispatch (`link`)
//! - **Runner**: the single-threaded cooperative loop tying it together
//!   (`runner`)
//!
//! Once the critical alarm latches, the motor is commanded to zero and the
//! return spring fails the valve open; only a restart clears the alarm.

pub mod calibration;
pub mod context;
pub mod convert;
pub mod error;
pub mod fault;
pub mod link;
pub mod mocks;
pub mod pid;
pub mod runner;
pub mod target;

pub use calibration::{CalibrationLimits, calibrate};
pub use context::{AtmosphericOffsets, ControlMode, ControllerContext};
pub use error::{BuildError, CalibrationError, ControlError, Result};
pub use fault::{Alarm, AlarmReason, FaultMonitor};
pub use link::{Framer, LinkCounters, Message, StatusReport, VehicleState};
pub use pid::{Direction, Pid, PidMode};
pub use runner::{Periodic, RunSummary, Runner};
pub use target::BoostTargets;
