//! Discrete PID controller owning its own state.
//!
//! Each controller holds its gains, integral accumulator and last input;
//! callers pass the current input and setpoint in every tick and read the
//! computed output back. Derivative acts on the measurement rather than the
//! error, so setpoint steps do not kick the output. The integral accumulator
//! is clamped to the output limits on every step (anti-windup).

use std::time::Duration;

use crate::error::BuildError;

/// Sign convention of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Output moves the measurement toward the setpoint.
    Direct,
    /// Output moves the measurement away from the setpoint (more motor speed
    /// opens the valve and *reduces* pressure).
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidMode {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Debug)]
pub struct Pid {
    gains: PidGains,
    direction: Direction,
    mode: PidMode,
    out_min: f32,
    out_max: f32,
    integral: f32,
    last_input: Option<f32>,
    last_output: f32,
}

impl Pid {
    pub fn new(
        gains: PidGains,
        direction: Direction,
        out_min: f32,
        out_max: f32,
    ) -> Result<Self, BuildError> {
        if !(gains.kp.is_finite() && gains.ki.is_finite() && gains.kd.is_finite()) {
            return Err(BuildError::InvalidConfig("pid gains must be finite"));
        }
        if gains.kp < 0.0 || gains.ki < 0.0 || gains.kd < 0.0 {
            return Err(BuildError::InvalidConfig("pid gains must be >= 0"));
        }
        if !(out_min.is_finite() && out_max.is_finite()) || out_min >= out_max {
            return Err(BuildError::InvalidConfig("pid output limits must satisfy min < max"));
        }
        Ok(Self {
            gains,
            direction,
            mode: PidMode::Automatic,
            out_min,
            out_max,
            integral: 0.0,
            last_input: None,
            last_output: 0.0,
        })
    }

    /// Hot-swap gains between compute calls (live tuning seam).
    pub fn set_tunings(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_mode(&mut self, mode: PidMode) {
        // Re-entering automatic keeps the accumulated integral.
        self.mode = mode;
    }

    pub fn mode(&self) -> PidMode {
        self.mode
    }

    /// Clear integral and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = None;
        self.last_output = 0.0;
    }

    /// One control step. `dt` is the elapsed time since the previous step.
    /// In `Manual` mode the last output is held.
    pub fn compute(&mut self, input: f32, setpoint: f32, dt: Duration) -> f32 {
        if self.mode == PidMode::Manual {
            return self.last_output;
        }
        let dt_s = dt.as_secs_f32().max(1e-6);
        let sign = match self.direction {
            Direction::Direct => 1.0,
            Direction::Reverse => -1.0,
        };
        let kp = sign * self.gains.kp;
        let ki = sign * self.gains.ki;
        let kd = sign * self.gains.kd;

        let error = setpoint - input;
        self.integral = (self.integral + ki * error * dt_s).clamp(self.out_min, self.out_max);

        // Derivative on measurement: immune to setpoint steps.
        let d_input = match self.last_input {
            Some(prev) => (input - prev) / dt_s,
            None => 0.0,
        };
        self.last_input = Some(input);

        let output = (kp * error + self.integral - kd * d_input).clamp(self.out_min, self.out_max);
        self.last_output = output;
        output
    }

    pub fn last_output(&self) -> f32 {
        self.last_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: Duration = Duration::from_millis(2);

    fn pid(gains: PidGains, direction: Direction) -> Pid {
        Pid::new(gains, direction, -150.0, 100.0).expect("valid pid")
    }

    #[test]
    fn rejects_invalid_construction() {
        let g = PidGains { kp: 1.0, ki: 0.0, kd: 0.0 };
        assert!(Pid::new(g, Direction::Direct, 100.0, -150.0).is_err());
        let bad = PidGains { kp: -1.0, ki: 0.0, kd: 0.0 };
        assert!(Pid::new(bad, Direction::Direct, -150.0, 100.0).is_err());
    }

    #[test]
    fn direct_proportional_pushes_toward_setpoint() {
        let mut p = pid(PidGains { kp: 2.0, ki: 0.0, kd: 0.0 }, Direction::Direct);
        let out = p.compute(10.0, 30.0, DT);
        assert!((out - 40.0).abs() < 1e-4); // kp * (30 - 10)
    }

    #[test]
    fn reverse_flips_output_sign() {
        let mut p = pid(PidGains { kp: 2.0, ki: 0.0, kd: 0.0 }, Direction::Reverse);
        // Below setpoint: a reverse-acting controller must drive negative
        // (close the valve to raise pressure).
        let out = p.compute(10.0, 30.0, DT);
        assert!((out + 40.0).abs() < 1e-4);
    }

    #[test]
    fn output_clamps_to_limits() {
        let mut p = pid(PidGains { kp: 100.0, ki: 0.0, kd: 0.0 }, Direction::Direct);
        assert_eq!(p.compute(0.0, 1000.0, DT), 100.0);
        assert_eq!(p.compute(1000.0, 0.0, DT), -150.0);
    }

    #[test]
    fn integral_does_not_wind_up_past_limits() {
        let mut p = pid(PidGains { kp: 0.0, ki: 50.0, kd: 0.0 }, Direction::Direct);
        // Saturate hard for many steps with a large persistent error.
        for _ in 0..10_000 {
            p.compute(0.0, 1000.0, Duration::from_millis(100));
        }
        assert_eq!(p.last_output(), 100.0);
        // After the error collapses, the output must recover promptly
        // instead of burning off an unbounded accumulator.
        let out = p.compute(1000.0, 1000.0, Duration::from_millis(100));
        assert!(out <= 100.0);
        let out = p.compute(1001.0, 1000.0, Duration::from_millis(100));
        assert!(out < 100.0, "windup: output stuck at {out}");
    }

    #[test]
    fn derivative_acts_on_measurement_not_setpoint() {
        let mut p = pid(PidGains { kp: 0.0, ki: 0.0, kd: 1.0 }, Direction::Direct);
        p.compute(10.0, 0.0, DT);
        // Setpoint step with a constant measurement: no derivative kick.
        let out = p.compute(10.0, 500.0, DT);
        assert_eq!(out, 0.0);
        // Measurement rising drives a damping (negative) derivative term.
        let out = p.compute(20.0, 500.0, DT);
        assert!(out < 0.0);
    }

    #[test]
    fn manual_mode_holds_last_output() {
        let mut p = pid(PidGains { kp: 1.0, ki: 0.0, kd: 0.0 }, Direction::Direct);
        let held = p.compute(0.0, 50.0, DT);
        p.set_mode(PidMode::Manual);
        assert_eq!(p.compute(999.0, -999.0, DT), held);
    }

    #[test]
    fn tunings_hot_swap_between_steps() {
        let mut p = pid(PidGains { kp: 1.0, ki: 0.0, kd: 0.0 }, Direction::Direct);
        assert!((p.compute(0.0, 10.0, DT) - 10.0).abs() < 1e-4);
        p.set_tunings(PidGains { kp: 3.0, ki: 0.0, kd: 0.0 });
        assert!((p.compute(0.0, 10.0, DT) - 30.0).abs() < 1e-4);
    }
}
