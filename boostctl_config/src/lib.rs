#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the boost controller.
//!
//! All sections are deserialized from TOML and validated before the
//! controller is allowed to arm. Defaults match the tunings the valve was
//! commissioned with; everything here can be overridden per vehicle.
use serde::Deserialize;
use serde::de::Deserializer;

/// Gains for one PID strategy.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PidGainsCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// The two PID strategies of the dual control engine.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    /// Pressure-feedback controller (reverse acting: opening the valve
    /// reduces manifold pressure).
    pub pressure: PidGainsCfg,
    /// Position-feedback controller (direct acting).
    pub position: PidGainsCfg,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            pressure: PidGainsCfg {
                kp: 25.0,
                ki: 2.0,
                kd: 1.0,
            },
            position: PidGainsCfg {
                kp: 2.5,
                ki: 5.0,
                kd: 0.0,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ControlCfg {
    /// Fraction of target pressure below which position control (valve held
    /// closed) is used instead of pressure feedback.
    pub transition_factor: f32,
    /// Motor command floor (negative: closing, works against the spring).
    pub motor_min: i16,
    /// Motor command ceiling (positive: opening, spring-assisted, so a
    /// smaller magnitude is enough).
    pub motor_max: i16,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            transition_factor: 0.9,
            motor_min: -150,
            motor_max: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Moving-average window used for stall detection (samples).
    pub window: usize,
    /// Reading is judged stalled when |latest - window mean| is below this.
    pub stability_threshold: f32,
    /// Drive speed toward the closed stop (against the spring; negative).
    pub close_speed: i16,
    /// Drive speed toward the open stop (spring-assisted; positive).
    pub open_speed: i16,
    /// Cadence of stall-window samples while homing.
    pub sample_period_ms: u64,
    /// Give up homing one direction after this long.
    pub direction_timeout_ms: u64,
    /// Minimum acceptable raw span between the two stops; anything less is
    /// a degenerate calibration and the controller refuses to arm.
    pub min_span_counts: u16,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            window: 5,
            stability_threshold: 20.0,
            close_speed: -50,
            open_speed: 50,
            sample_period_ms: 50,
            direction_timeout_ms: 10_000,
            min_span_counts: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct FaultCfg {
    /// Neither detector may latch the alarm before this much uptime.
    pub boot_grace_ms: u64,
    /// Silence from the master beyond this latches the critical alarm.
    pub comms_timeout_ms: u64,
    /// Overboost is pressure above target multiplied by this allowance.
    pub overboost_allowance: f32,
    /// Contiguous overboost longer than this latches the critical alarm.
    pub overboost_allowance_ms: u64,
    /// Lifetime partial-message rate (%) above which the link is untrusted.
    pub partial_pct_max: f32,
    /// Lifetime bad-checksum rate (%) above which the link is untrusted.
    pub bad_checksum_pct_max: f32,
    /// Lifetime corrupt-frame rate (%) above which the link is untrusted.
    pub corrupt_pct_max: f32,
}

impl Default for FaultCfg {
    fn default() -> Self {
        Self {
            boot_grace_ms: 1_000,
            comms_timeout_ms: 1_000,
            overboost_allowance: 1.1,
            overboost_allowance_ms: 1_000,
            partial_pct_max: 20.0,
            bad_checksum_pct_max: 5.0,
            corrupt_pct_max: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct LinkCfg {
    /// Longest frame the master may send, delimiters included. Anything that
    /// grows past this without a terminator is discarded as corrupt.
    pub max_frame_len: usize,
}

impl Default for LinkCfg {
    fn default() -> Self {
        Self { max_frame_len: 60 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BoostCfg {
    /// Below this road speed the target is always zero.
    pub min_speed_kph: f32,
    /// Below this engine speed the target is always zero.
    pub min_rpm: i32,
    /// Gear -> target boost (kPa gauge). Accepts either an array of tables
    /// `[{ gear = 3, kpa = 55.0 }]` or an array of pairs `[[3, 55.0]]`.
    #[serde(deserialize_with = "de_gear_table")]
    pub gear_table: Vec<(i32, f32)>,
}

impl Default for BoostCfg {
    fn default() -> Self {
        Self {
            min_speed_kph: 2.0,
            min_rpm: 1000,
            gear_table: vec![
                (1, 14.0),
                (2, 28.0),
                (3, 55.0),
                (4, 55.0),
                (5, 55.0),
                (6, 55.0),
            ],
        }
    }
}

/// Fixed periods for the cooperative loop tasks (ms).
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SchedulerCfg {
    pub position_ms: u64,
    pub pressure_ms: u64,
    pub link_ms: u64,
    pub control_ms: u64,
    pub target_ms: u64,
    pub fault_ms: u64,
    pub stats_ms: u64,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            position_ms: 2,
            pressure_ms: 10,
            link_ms: 10,
            control_ms: 2,
            target_ms: 200,
            fault_ms: 200,
            stats_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pid: PidCfg,
    pub control: ControlCfg,
    pub calibration: CalibrationCfg,
    pub faults: FaultCfg,
    pub link: LinkCfg,
    pub boost: BoostCfg,
    pub scheduler: SchedulerCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GearToml {
    Pair((i32, f32)),
    Table { gear: i32, kpa: f32 },
}

fn de_gear_table<'de, D>(deserializer: D) -> Result<Vec<(i32, f32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<GearToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for g in items {
            match g {
                GearToml::Pair((gear, kpa)) => out.push((gear, kpa)),
                GearToml::Table { gear, kpa } => out.push((gear, kpa)),
            }
        }
    }
    Ok(out)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // PID
        for (name, g) in [("pressure", &self.pid.pressure), ("position", &self.pid.position)] {
            if !(g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite()) {
                eyre::bail!("pid.{name} gains must be finite");
            }
            if g.kp < 0.0 || g.ki < 0.0 || g.kd < 0.0 {
                eyre::bail!("pid.{name} gains must be >= 0");
            }
        }

        // Control
        if !self.control.transition_factor.is_finite()
            || self.control.transition_factor <= 0.0
            || self.control.transition_factor >= 1.0
        {
            eyre::bail!("control.transition_factor must be in (0.0, 1.0)");
        }
        if self.control.motor_min >= 0 {
            eyre::bail!("control.motor_min must be < 0 (closing direction)");
        }
        if self.control.motor_max <= 0 {
            eyre::bail!("control.motor_max must be > 0 (opening direction)");
        }

        // Calibration
        if self.calibration.window < 2 {
            eyre::bail!("calibration.window must be >= 2");
        }
        if !(self.calibration.stability_threshold > 0.0) {
            eyre::bail!("calibration.stability_threshold must be > 0");
        }
        if self.calibration.close_speed >= 0 {
            eyre::bail!("calibration.close_speed must be < 0");
        }
        if self.calibration.open_speed <= 0 {
            eyre::bail!("calibration.open_speed must be > 0");
        }
        if self.calibration.sample_period_ms == 0 {
            eyre::bail!("calibration.sample_period_ms must be >= 1");
        }
        if self.calibration.direction_timeout_ms
            < self.calibration.sample_period_ms * self.calibration.window as u64
        {
            eyre::bail!("calibration.direction_timeout_ms too short to fill the stall window");
        }
        if self.calibration.min_span_counts == 0 {
            eyre::bail!("calibration.min_span_counts must be >= 1");
        }

        // Faults
        if self.faults.comms_timeout_ms == 0 {
            eyre::bail!("faults.comms_timeout_ms must be >= 1");
        }
        if self.faults.overboost_allowance < 1.0 {
            eyre::bail!("faults.overboost_allowance must be >= 1.0");
        }
        if self.faults.overboost_allowance_ms == 0 {
            eyre::bail!("faults.overboost_allowance_ms must be >= 1");
        }
        for (name, pct) in [
            ("partial_pct_max", self.faults.partial_pct_max),
            ("bad_checksum_pct_max", self.faults.bad_checksum_pct_max),
            ("corrupt_pct_max", self.faults.corrupt_pct_max),
        ] {
            if !(pct > 0.0 && pct <= 100.0) {
                eyre::bail!("faults.{name} must be in (0.0, 100.0]");
            }
        }

        // Link
        if self.link.max_frame_len < 8 {
            eyre::bail!("link.max_frame_len must be >= 8 (smallest legal frame)");
        }

        // Boost
        if self.boost.min_rpm < 0 {
            eyre::bail!("boost.min_rpm must be >= 0");
        }
        for (gear, kpa) in &self.boost.gear_table {
            if *gear < 0 {
                eyre::bail!("boost.gear_table gears must be >= 0");
            }
            if !kpa.is_finite() || *kpa < 0.0 {
                eyre::bail!("boost.gear_table targets must be finite and >= 0");
            }
        }

        // Scheduler
        for (name, ms) in [
            ("position_ms", self.scheduler.position_ms),
            ("pressure_ms", self.scheduler.pressure_ms),
            ("link_ms", self.scheduler.link_ms),
            ("control_ms", self.scheduler.control_ms),
            ("target_ms", self.scheduler.target_ms),
            ("fault_ms", self.scheduler.fault_ms),
            ("stats_ms", self.scheduler.stats_ms),
        ] {
            if ms == 0 {
                eyre::bail!("scheduler.{name} must be >= 1");
            }
        }

        Ok(())
    }
}
