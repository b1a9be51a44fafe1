//! The real control stack running against the simulated plant: homing must
//! find the physical stops, and a full loaded run must actually build boost.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use boostctl_config::{CalibrationCfg, Config};
use boostctl_core::link::encode_frame;
use boostctl_core::{Alarm, Runner, calibrate};
use boostctl_hardware::{ScriptedMaster, SimRig};
use boostctl_traits::clock::test_clock::TestClock;

#[test]
fn default_homing_finds_both_stops_on_the_rig() {
    let rig = SimRig::new();
    let clock = TestClock::new();
    let cfg = CalibrationCfg::default();

    let mut sampler = rig.sampler();
    let mut motor = rig.motor();
    let limits = calibrate(&mut sampler, &mut motor, &clock, &cfg).expect("homing");

    // The stall window settles a little short of the hard stops (its mean
    // includes the last in-flight readings), but both limits must land near
    // the physical travel and span the configured minimum.
    assert!(limits.min_raw < 200, "min_raw = {}", limits.min_raw);
    assert!(limits.max_raw > 800, "max_raw = {}", limits.max_raw);
    assert!(limits.span() >= cfg.min_span_counts);
}

#[test]
fn loaded_run_builds_boost_toward_the_target() {
    let rig = SimRig::new();
    // Push vehicle state (third gear, on throttle) every 200 ms of loop
    // time, well inside the comms timeout.
    let master = ScriptedMaster::new(|poll| {
        (poll % 20 == 0).then(|| encode_frame("1,90,4500,3,0"))
    });

    let cfg = Config::default();
    let clock = TestClock::new();
    let mut runner =
        Runner::bring_up(&cfg, rig.sampler(), rig.motor(), master, clock).expect("bring up");

    // The engine comes on load only after the controller is armed. 150 raw
    // counts of load tops out below the boost target, so the valve must
    // stay closed and the manifold must climb the whole run.
    rig.set_load_raw(150.0);

    let shutdown = AtomicBool::new(false);
    let summary = runner
        .run(&shutdown, Some(Duration::from_secs(2)))
        .expect("run");

    assert_eq!(summary.final_alarm, Alarm::Nominal);
    assert_eq!(runner.context().target_kpa(), 55.0);

    // Homing parks the valve against the open stop; the controller has to
    // drive it off the stop and hold it closed for boost to build at all.
    let manifold = runner.context().manifold_kpa();
    assert!(
        manifold > 25.0,
        "manifold never built boost: {manifold:.1} kPa"
    );
    assert!(
        runner.context().valve_open_pct() < 20.0,
        "valve still open: {:.1}%",
        runner.context().valve_open_pct()
    );
}
