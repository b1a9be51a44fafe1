//! Command implementations against the simulated rig.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use boostctl_config::Config;
use boostctl_core::link::encode_frame;
use boostctl_core::{Runner, calibrate};
use boostctl_hardware::{ScriptedMaster, SimRig};
use boostctl_traits::MonotonicClock;
use eyre::{Result, WrapErr};

pub struct RunOptions {
    pub duration_ms: Option<u64>,
    pub speed_kph: f32,
    pub rpm: i32,
    pub gear: i32,
    pub load_raw: f32,
    pub silent_master: bool,
}

// Master cadence in link polls (10 ms each at the default scheduler).
const PUSH_EVERY_POLLS: u64 = 20;
const REQUEST_EVERY_POLLS: u64 = 100;

/// Boot against the sim rig and drive the loop until shutdown or timeout.
pub fn run(cfg: &Config, opts: RunOptions, shutdown: Arc<AtomicBool>) -> Result<serde_json::Value> {
    let rig = SimRig::new();

    let master = if opts.silent_master {
        ScriptedMaster::silent()
    } else {
        let payload = format!("1,{},{},{},0", opts.speed_kph, opts.rpm, opts.gear);
        ScriptedMaster::new(move |poll| {
            if poll % REQUEST_EVERY_POLLS == REQUEST_EVERY_POLLS - 1 {
                Some(encode_frame("0"))
            } else if poll % PUSH_EVERY_POLLS == 0 {
                Some(encode_frame(&payload))
            } else {
                None
            }
        })
    };

    let mut runner = Runner::bring_up(
        cfg,
        rig.sampler(),
        rig.motor(),
        master,
        MonotonicClock::new(),
    )
    .wrap_err("controller failed to arm")?;

    // The engine starts making boost only after the controller is armed, so
    // the atmospheric offsets are captured against a quiet manifold.
    rig.set_load_raw(opts.load_raw);

    let summary = runner.run(&shutdown, opts.duration_ms.map(Duration::from_millis))?;

    Ok(serde_json::json!({
        "elapsed_ms": summary.elapsed_ms,
        "loop_iterations": summary.loop_iterations,
        "control_ticks": summary.control_ticks,
        "alarm": format!("{:?}", summary.final_alarm),
        "target_kpa": runner.context().target_kpa(),
        "valve_open_pct": runner.context().valve_open_pct(),
        "manifold_kpa": runner.context().manifold_kpa(),
        "frames": {
            "received": summary.link.received,
            "partial": summary.link.partial,
            "bad_checksum": summary.link.bad_checksum,
            "corrupt": summary.link.corrupt,
        },
        "responses_sent": runner.port().responses().len(),
    }))
}

/// Home the simulated valve once and report the limits.
pub fn calibrate_only(cfg: &Config) -> Result<serde_json::Value> {
    let rig = SimRig::new();
    let mut sampler = rig.sampler();
    let mut motor = rig.motor();
    let clock = MonotonicClock::new();
    let limits = calibrate(&mut sampler, &mut motor, &clock, &cfg.calibration)?;
    Ok(serde_json::json!({
        "min_raw": limits.min_raw,
        "max_raw": limits.max_raw,
        "span": limits.span(),
    }))
}
