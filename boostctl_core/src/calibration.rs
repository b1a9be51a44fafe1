//! Valve travel-limit self-calibration.
//!
//! At boot, before the control loop starts, the valve is driven gently
//! against each mechanical stop. A short moving-average window over the raw
//! position feedback detects the stall: once the latest reading stops moving
//! relative to the window mean, the mechanism is judged to be against the
//! stop and the mean is recorded as that direction's travel limit. The
//! closed stop (worked against the spring) gives the minimum raw reading,
//! the open stop (spring assisted) the maximum.
//!
//! Homing is bounded: a direction that never stalls within its timeout
//! fails the boot instead of hanging it.

use std::time::Duration;

use boostctl_config::CalibrationCfg;
use boostctl_traits::{AnalogChannel, AnalogSampler, Clock, ValveMotor};

use crate::convert::percent_in_range;
use crate::error::CalibrationError;

/// Raw position readings at the two mechanical stops. Produced once per
/// boot; immutable afterward. `min_raw < max_raw` holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationLimits {
    pub min_raw: u16,
    pub max_raw: u16,
}

impl CalibrationLimits {
    /// Validate a candidate limit pair against the configured minimum span.
    pub fn try_new(min_raw: u16, max_raw: u16, min_span: u16) -> Result<Self, CalibrationError> {
        let span = max_raw.saturating_sub(min_raw);
        if max_raw <= min_raw || span < min_span {
            return Err(CalibrationError::DegenerateSpan {
                min_raw,
                max_raw,
                min_span,
            });
        }
        Ok(Self { min_raw, max_raw })
    }

    pub fn span(&self) -> u16 {
        self.max_raw - self.min_raw
    }

    /// Valve open percentage for a raw reading, saturating at the stops.
    pub fn percent_open(&self, raw: u16) -> f32 {
        percent_in_range(f32::from(raw), f32::from(self.min_raw), f32::from(self.max_raw))
    }

    /// True when `command` would push the mechanism further into a stop the
    /// reading already sits at or beyond. Motion back toward mid-travel is
    /// never blocked; the guard only protects the hardware, it must not trap
    /// the valve where homing parked it.
    pub fn drives_into_stop(&self, raw: u16, command: i16) -> bool {
        (command < 0 && raw <= self.min_raw) || (command > 0 && raw >= self.max_raw)
    }
}

/// Circular stall-detection window. Stability is only judged once the
/// window is full; comparing against a part-filled window would stall
/// immediately on the very first sample.
#[derive(Debug)]
struct StallWindow {
    readings: Vec<u16>,
    next: usize,
    filled: bool,
    threshold: f32,
}

impl StallWindow {
    fn new(size: usize, threshold: f32) -> Self {
        Self {
            readings: vec![0; size.max(2)],
            next: 0,
            filled: false,
            threshold,
        }
    }

    /// Push one reading; returns the window mean when the mechanism is
    /// judged stalled against the stop.
    fn push(&mut self, raw: u16) -> Option<u16> {
        self.readings[self.next] = raw;
        self.next = (self.next + 1) % self.readings.len();
        if self.next == 0 {
            self.filled = true;
        }
        if !self.filled {
            return None;
        }
        let mean =
            self.readings.iter().map(|&r| f32::from(r)).sum::<f32>() / self.readings.len() as f32;
        if (f32::from(raw) - mean).abs() < self.threshold {
            Some(mean.round() as u16)
        } else {
            None
        }
    }
}

fn stop_motor<M: ValveMotor>(motor: &mut M) -> Result<(), CalibrationError> {
    motor
        .set_speed(0)
        .map_err(|e| CalibrationError::Hardware(e.to_string()))
}

/// Drive in one direction until the feedback stalls, then return the window
/// mean at the stop. The motor is always commanded to zero before returning.
fn home_one_direction<S, M, C>(
    sampler: &mut S,
    motor: &mut M,
    clock: &C,
    cfg: &CalibrationCfg,
    speed: i16,
    direction: &'static str,
) -> Result<u16, CalibrationError>
where
    S: AnalogSampler,
    M: ValveMotor,
    C: Clock,
{
    tracing::debug!(direction, speed, "homing toward stop");
    motor
        .set_speed(speed)
        .map_err(|e| CalibrationError::Hardware(e.to_string()))?;

    let mut window = StallWindow::new(cfg.window, cfg.stability_threshold);
    let epoch = clock.now();
    loop {
        clock.sleep(Duration::from_millis(cfg.sample_period_ms));
        let raw = match sampler.read_averaged(AnalogChannel::ValvePosition, 1, Duration::ZERO) {
            Ok(raw) => raw,
            Err(e) => {
                let _ = stop_motor(motor);
                return Err(CalibrationError::Hardware(e.to_string()));
            }
        };
        if let Some(limit) = window.push(raw) {
            stop_motor(motor)?;
            tracing::debug!(direction, limit, "stall detected at stop");
            return Ok(limit);
        }
        if clock.ms_since(epoch) >= cfg.direction_timeout_ms {
            let _ = stop_motor(motor);
            return Err(CalibrationError::StallTimeout {
                direction,
                timeout_ms: cfg.direction_timeout_ms,
            });
        }
    }
}

/// Blocking pre-loop calibration: home the closed stop, then the open stop,
/// and validate the resulting span. Fails the boot rather than arming a
/// controller with untrustworthy limits.
pub fn calibrate<S, M, C>(
    sampler: &mut S,
    motor: &mut M,
    clock: &C,
    cfg: &CalibrationCfg,
) -> Result<CalibrationLimits, CalibrationError>
where
    S: AnalogSampler,
    M: ValveMotor,
    C: Clock,
{
    tracing::info!("calibrating valve travel limits");
    let min_raw = home_one_direction(sampler, motor, clock, cfg, cfg.close_speed, "closed")?;
    let max_raw = home_one_direction(sampler, motor, clock, cfg, cfg.open_speed, "open")?;
    let limits = CalibrationLimits::try_new(min_raw, max_raw, cfg.min_span_counts)?;
    tracing::info!(
        min_raw = limits.min_raw,
        max_raw = limits.max_raw,
        span = limits.span(),
        "travel limits set"
    );
    Ok(limits)
}
