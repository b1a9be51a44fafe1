//! Boot sequence and the single-threaded cooperative control loop.
//!
//! The loop is deliberately free of blocking waits: every task is gated by a
//! fixed-period [`Periodic`] and the loop body polls them all each pass,
//! sleeping one millisecond between passes. Timing comes exclusively from
//! the injected [`Clock`], so the whole runner executes deterministically
//! under a test clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use boostctl_config::{Config, SchedulerCfg};
use boostctl_traits::{AnalogChannel, AnalogSampler, Clock, LinkPort, ValveMotor};
use eyre::WrapErr;

use crate::calibration::calibrate;
use crate::context::{AtmosphericOffsets, ControllerContext};
use crate::error::{Result, map_hw_error, map_link_error};
use crate::fault::Alarm;
use crate::link::{Framer, LinkCounters, Message, encode_status};

/// Averaging used for the one-off atmospheric offset capture at boot.
const ATMOSPHERIC_SAMPLES: u32 = 20;
const ATMOSPHERIC_SAMPLE_DELAY: Duration = Duration::from_millis(2);

/// Fixed-period task gate. `call` answers "is this task due now" and
/// schedules the next due time; a late caller slips by at most one period
/// rather than accumulating drift or firing in bursts.
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    period_ms: u64,
    next_due_ms: u64,
}

impl Periodic {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_due_ms: 0,
        }
    }

    pub fn call(&mut self, now_ms: u64) -> bool {
        if now_ms < self.next_due_ms {
            return false;
        }
        self.next_due_ms = self.next_due_ms.saturating_add(self.period_ms);
        if self.next_due_ms <= now_ms {
            // More than one period behind: resynchronize instead of firing
            // a burst of catch-up calls.
            self.next_due_ms = now_ms.saturating_add(self.period_ms);
        }
        true
    }
}

/// What the loop did before it stopped.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub elapsed_ms: u64,
    pub loop_iterations: u64,
    pub control_ticks: u64,
    pub final_alarm: Alarm,
    pub link: LinkCounters,
}

/// Owns the hardware seams and the controller context, and drives the
/// steady-state loop. Built by [`Runner::bring_up`], which performs the
/// blocking boot sequence (offset capture, travel-limit calibration).
pub struct Runner<S, M, P, C> {
    sampler: S,
    motor: M,
    port: P,
    clock: C,
    epoch: Instant,
    ctx: ControllerContext,
    framer: Framer,
    scheduler: SchedulerCfg,
    read_buf: Vec<u8>,
}

impl<S, M, P, C> Runner<S, M, P, C>
where
    S: AnalogSampler,
    M: ValveMotor,
    P: LinkPort,
    C: Clock,
{
    /// Boot sequence: capture atmospheric pressure offsets while the engine
    /// is off, home the valve against both stops, then arm.
    pub fn bring_up(cfg: &Config, mut sampler: S, motor: M, port: P, clock: C) -> Result<Self> {
        let epoch = clock.now();

        tracing::info!("capturing atmospheric pressure offsets");
        let manifold_raw = read_offset(&mut sampler, AnalogChannel::ManifoldPressure)?;
        let intake_raw = read_offset(&mut sampler, AnalogChannel::IntakePressure)?;
        let offsets = AtmosphericOffsets {
            manifold_raw,
            intake_raw,
        };
        tracing::info!(manifold_raw, intake_raw, "atmospheric offsets captured");

        let mut motor = motor;
        let limits = calibrate(&mut sampler, &mut motor, &clock, &cfg.calibration)
            .wrap_err("travel-limit calibration failed; refusing to arm")?;

        let ctx = ControllerContext::new(cfg, limits, offsets)?;
        let framer = Framer::new(cfg.link.max_frame_len)?;
        let read_buf = vec![0u8; cfg.link.max_frame_len.max(64)];
        tracing::info!("controller armed");
        Ok(Self {
            sampler,
            motor,
            port,
            clock,
            epoch,
            ctx,
            framer,
            scheduler: cfg.scheduler,
            read_buf,
        })
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    /// Post-run inspection seams for tests and the CLI summary.
    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn motor(&self) -> &M {
        &self.motor
    }

    pub fn link_counters(&self) -> LinkCounters {
        self.framer.counters()
    }

    /// Drive the steady-state loop until `shutdown` is raised or
    /// `max_runtime` elapses. The motor is commanded to zero on every exit
    /// path, including errors.
    pub fn run(
        &mut self,
        shutdown: &AtomicBool,
        max_runtime: Option<Duration>,
    ) -> Result<RunSummary> {
        let outcome = self.run_inner(shutdown, max_runtime);
        let stop = self
            .motor
            .set_speed(0)
            .map_err(|e| map_hw_error(e.as_ref()));
        let summary = outcome?;
        stop.wrap_err("failed to stop the valve motor on shutdown")?;
        Ok(summary)
    }

    fn run_inner(
        &mut self,
        shutdown: &AtomicBool,
        max_runtime: Option<Duration>,
    ) -> Result<RunSummary> {
        let s = self.scheduler;
        let mut position = Periodic::new(s.position_ms);
        let mut pressure = Periodic::new(s.pressure_ms);
        let mut link = Periodic::new(s.link_ms);
        let mut control = Periodic::new(s.control_ms);
        let mut target = Periodic::new(s.target_ms);
        let mut fault = Periodic::new(s.fault_ms);
        let mut stats = Periodic::new(s.stats_ms);

        let start_ms = self.clock.ms_since(self.epoch);
        let max_ms = max_runtime.map(|d| d.as_millis() as u64);
        let mut iterations: u64 = 0;
        let mut control_ticks: u64 = 0;
        let mut last_control_ms: Option<u64> = None;
        let mut stats_window = (start_ms, 0u64);

        tracing::info!("entering control loop");
        loop {
            let now_ms = self.clock.ms_since(self.epoch);
            if shutdown.load(Ordering::Relaxed) {
                tracing::info!("shutdown requested");
                break;
            }
            if let Some(max) = max_ms
                && now_ms.saturating_sub(start_ms) >= max
            {
                tracing::info!(elapsed_ms = now_ms - start_ms, "max runtime reached");
                break;
            }
            iterations += 1;

            if position.call(now_ms) {
                let raw = self.read_raw(AnalogChannel::ValvePosition)?;
                self.ctx.record_position(raw);
            }

            if pressure.call(now_ms) {
                let manifold = self.read_raw(AnalogChannel::ManifoldPressure)?;
                let manifold_temp = self.read_raw(AnalogChannel::ManifoldTemp)?;
                self.ctx.record_manifold(manifold, manifold_temp);
                let intake = self.read_raw(AnalogChannel::IntakePressure)?;
                let intake_temp = self.read_raw(AnalogChannel::IntakeTemp)?;
                self.ctx.record_intake(intake, intake_temp);
            }

            if link.call(now_ms) {
                self.poll_link(now_ms)?;
            }

            if target.call(now_ms) {
                self.ctx.update_target();
            }

            if fault.call(now_ms) {
                self.ctx.fault_tick(now_ms);
            }

            if control.call(now_ms) {
                let dt_ms = match last_control_ms {
                    Some(prev) => now_ms.saturating_sub(prev).max(1),
                    None => s.control_ms,
                };
                last_control_ms = Some(now_ms);
                let command = self.ctx.control_tick(Duration::from_millis(dt_ms));
                self.motor
                    .set_speed(command)
                    .map_err(|e| map_hw_error(e.as_ref()))?;
                control_ticks += 1;
            }

            if stats.call(now_ms) {
                let counters = self.framer.counters();
                self.ctx.check_link_quality(&counters);
                let (since_ms, since_iters) = stats_window;
                tracing::info!(
                    window_ms = now_ms.saturating_sub(since_ms),
                    iterations = iterations - since_iters,
                    frames_received = counters.received,
                    frames_partial = counters.partial,
                    frames_bad_checksum = counters.bad_checksum,
                    frames_corrupt = counters.corrupt,
                    alarm = ?self.ctx.alarm(),
                    "loop statistics"
                );
                stats_window = (now_ms, iterations);
            }

            self.clock.sleep(Duration::from_millis(1));
        }

        Ok(RunSummary {
            elapsed_ms: self.clock.ms_since(self.epoch).saturating_sub(start_ms),
            loop_iterations: iterations,
            control_ticks,
            final_alarm: self.ctx.alarm(),
            link: self.framer.counters(),
        })
    }

    fn read_raw(&mut self, channel: AnalogChannel) -> Result<u16> {
        let raw = self
            .sampler
            .read_averaged(channel, 1, Duration::ZERO)
            .map_err(|e| map_hw_error(e.as_ref()))?;
        Ok(raw)
    }

    /// Drain pending link bytes and dispatch every completed message.
    fn poll_link(&mut self, now_ms: u64) -> Result<()> {
        let n = self
            .port
            .read_pending(&mut self.read_buf)
            .map_err(|e| map_link_error(e.as_ref()))?;
        if n == 0 {
            return Ok(());
        }
        for message in self.framer.push(&self.read_buf[..n]) {
            match message {
                Message::StatusRequest => {
                    let frame = encode_status(&self.ctx.status_report());
                    self.port
                        .write_frame(&frame)
                        .map_err(|e| map_link_error(e.as_ref()))?;
                }
                Message::StatusPush(vehicle) => {
                    self.ctx.apply_vehicle_state(vehicle, now_ms);
                }
                // Already logged by the framer.
                Message::Unknown(_) => {}
            }
        }
        Ok(())
    }
}

fn read_offset<S: AnalogSampler>(sampler: &mut S, channel: AnalogChannel) -> Result<f32> {
    let raw = sampler
        .read_averaged(channel, ATMOSPHERIC_SAMPLES, ATMOSPHERIC_SAMPLE_DELAY)
        .map_err(|e| map_hw_error(e.as_ref()))?;
    Ok(f32::from(raw))
}
