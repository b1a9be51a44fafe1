//! Controller state and the per-tick control engine.
//!
//! `ControllerContext` replaces the pile of globals a firmware loop would
//! share between interrupt-free tasks: one struct, one writer (the loop),
//! mutated only through named methods. Sensor tasks record raw readings,
//! the link task applies vehicle state, and `control_tick` turns the lot
//! into a single signed motor command.

use std::time::Duration;

use boostctl_config::Config;

use crate::calibration::CalibrationLimits;
use crate::convert::{celsius_from_raw, gauge_kpa_from_raw};
use crate::error::BuildError;
use crate::fault::{Alarm, FaultMonitor};
use crate::link::{LinkCounters, StatusReport, VehicleState};
use crate::pid::{Direction, Pid, PidGains};
use crate::target::BoostTargets;

/// Which feedback loop drives the motor this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Manifold pressure feedback against the live boost target.
    Pressure,
    /// Valve position feedback; used when no boost is wanted (hold fully
    /// open) or when pressure is still far below target (hold closed to
    /// build boost quickly).
    Position,
}

/// Atmospheric raw readings captured at boot, before the engine makes any
/// pressure. Gauge conversions subtract these.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtmosphericOffsets {
    pub manifold_raw: f32,
    pub intake_raw: f32,
}

pub struct ControllerContext {
    limits: CalibrationLimits,
    pressure_pid: Pid,
    position_pid: Pid,
    faults: FaultMonitor,
    targets: BoostTargets,
    transition_factor: f32,
    offsets: AtmosphericOffsets,

    vehicle: VehicleState,
    position_raw: u16,
    manifold_raw: u16,
    manifold_temp_raw: u16,
    intake_raw: u16,
    intake_temp_raw: u16,
    target_kpa: f32,
    mode: ControlMode,
}

impl ControllerContext {
    pub fn new(
        cfg: &Config,
        limits: CalibrationLimits,
        offsets: AtmosphericOffsets,
    ) -> Result<Self, BuildError> {
        let out_min = f32::from(cfg.control.motor_min);
        let out_max = f32::from(cfg.control.motor_max);
        let pressure_pid = Pid::new(
            PidGains {
                kp: cfg.pid.pressure.kp,
                ki: cfg.pid.pressure.ki,
                kd: cfg.pid.pressure.kd,
            },
            Direction::Reverse,
            out_min,
            out_max,
        )?;
        let position_pid = Pid::new(
            PidGains {
                kp: cfg.pid.position.kp,
                ki: cfg.pid.position.ki,
                kd: cfg.pid.position.kd,
            },
            Direction::Direct,
            out_min,
            out_max,
        )?;
        Ok(Self {
            limits,
            pressure_pid,
            position_pid,
            faults: FaultMonitor::new(cfg.faults),
            targets: BoostTargets::from_cfg(&cfg.boost),
            transition_factor: cfg.control.transition_factor,
            offsets,
            vehicle: VehicleState::default(),
            // Start mid-travel so the guard does not fire before the first
            // real sample lands.
            position_raw: limits.min_raw.midpoint(limits.max_raw),
            manifold_raw: offsets.manifold_raw.round() as u16,
            manifold_temp_raw: 0,
            intake_raw: offsets.intake_raw.round() as u16,
            intake_temp_raw: 0,
            target_kpa: 0.0,
            mode: ControlMode::Position,
        })
    }

    pub fn record_position(&mut self, raw: u16) {
        self.position_raw = raw;
    }

    pub fn record_manifold(&mut self, pressure_raw: u16, temp_raw: u16) {
        self.manifold_raw = pressure_raw;
        self.manifold_temp_raw = temp_raw;
    }

    pub fn record_intake(&mut self, pressure_raw: u16, temp_raw: u16) {
        self.intake_raw = pressure_raw;
        self.intake_temp_raw = temp_raw;
    }

    /// The master pushed fresh vehicle state over the link.
    pub fn apply_vehicle_state(&mut self, vehicle: VehicleState, now_ms: u64) {
        self.vehicle = vehicle;
        self.faults.record_good_comms(now_ms);
        tracing::trace!(
            speed_kph = vehicle.speed_kph,
            rpm = vehicle.rpm,
            gear = vehicle.gear,
            clutch = vehicle.clutch_pressed,
            "vehicle state updated"
        );
    }

    pub fn manifold_kpa(&self) -> f32 {
        gauge_kpa_from_raw(f32::from(self.manifold_raw), self.offsets.manifold_raw)
    }

    pub fn intake_kpa(&self) -> f32 {
        gauge_kpa_from_raw(f32::from(self.intake_raw), self.offsets.intake_raw)
    }

    pub fn valve_open_pct(&self) -> f32 {
        self.limits.percent_open(self.position_raw)
    }

    pub fn target_kpa(&self) -> f32 {
        self.target_kpa
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn alarm(&self) -> Alarm {
        self.faults.alarm()
    }

    /// Recompute the boost target from the latest vehicle state. Forced to
    /// zero while the alarm is critical.
    pub fn update_target(&mut self) {
        self.target_kpa = if self.faults.is_critical() {
            0.0
        } else {
            self.targets.target_kpa(&self.vehicle)
        };
    }

    /// Periodic fault pass over comms staleness and overboost.
    pub fn fault_tick(&mut self, now_ms: u64) {
        self.faults.check(now_ms, self.manifold_kpa(), self.target_kpa);
    }

    /// Periodic statistical pass over the lifetime link counters.
    pub fn check_link_quality(&mut self, counters: &LinkCounters) {
        self.faults.check_link_quality(counters);
    }

    /// One control step: select the feedback mode, run the active PID, and
    /// return the signed motor command. Fail-safe and travel-limit guards
    /// override the controllers.
    pub fn control_tick(&mut self, dt: Duration) -> i16 {
        // Latched alarm bypasses both controllers unconditionally: command
        // zero and let the return spring fail the valve open.
        if self.faults.is_critical() {
            return 0;
        }

        let current_kpa = self.manifold_kpa();
        let (mode, output) = if self.target_kpa == 0.0 {
            // No boost wanted: hold the valve fully open.
            let out = self
                .position_pid
                .compute(self.valve_open_pct(), 100.0, dt);
            (ControlMode::Position, out)
        } else if current_kpa < self.target_kpa * self.transition_factor {
            // Far below target: hold closed so the turbo spools quickly.
            let out = self.position_pid.compute(self.valve_open_pct(), 0.0, dt);
            (ControlMode::Position, out)
        } else {
            let out = self
                .pressure_pid
                .compute(current_kpa, self.target_kpa, dt);
            (ControlMode::Pressure, out)
        };

        if mode != self.mode {
            // Controllers keep their integral state across the handover.
            tracing::debug!(from = ?self.mode, to = ?mode, "control mode changed");
            self.mode = mode;
        }

        let command = output.round() as i16;
        if self.limits.drives_into_stop(self.position_raw, command) {
            tracing::trace!(
                raw = self.position_raw,
                command,
                "command would drive past a travel limit; forcing zero"
            );
            return 0;
        }
        command
    }

    /// Snapshot for the command-0 status response.
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            alarm_critical: self.faults.is_critical(),
            target_kpa: self.target_kpa,
            manifold_kpa: self.manifold_kpa(),
            manifold_temp_c: celsius_from_raw(self.manifold_temp_raw),
            intake_kpa: self.intake_kpa(),
            intake_temp_c: celsius_from_raw(self.intake_temp_raw),
            valve_open_pct: self.valve_open_pct(),
        }
    }
}
