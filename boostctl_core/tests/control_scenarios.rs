//! End-to-end control-mode selection against the documented tunings.

use std::time::Duration;

use boostctl_config::Config;
use boostctl_core::convert::ADC_FULL_SCALE;
use boostctl_core::{
    Alarm, AlarmReason, AtmosphericOffsets, CalibrationLimits, ControlMode, ControllerContext,
    VehicleState,
};
use rstest::rstest;

const DT: Duration = Duration::from_millis(2);
const ATMOSPHERE_RAW: f32 = 400.0;

/// Raw manifold counts that convert to roughly `kpa` gauge against the
/// atmospheric offset used by every test here.
fn manifold_raw_for(kpa: f32) -> u16 {
    let counts_per_kpa = ADC_FULL_SCALE * (0.85 / 280.0);
    (ATMOSPHERE_RAW + kpa * counts_per_kpa).round() as u16
}

fn context(transition_factor: f32, gear_kpa: f32) -> ControllerContext {
    let toml = format!(
        r#"
        [control]
        transition_factor = {transition_factor}

        [boost]
        gear_table = [[3, {gear_kpa}]]
        "#
    );
    let cfg: Config = boostctl_config::load_toml(&toml).expect("config");
    cfg.validate().expect("valid config");
    let limits = CalibrationLimits::try_new(100, 900, 100).expect("limits");
    let offsets = AtmosphericOffsets {
        manifold_raw: ATMOSPHERE_RAW,
        intake_raw: ATMOSPHERE_RAW,
    };
    ControllerContext::new(&cfg, limits, offsets).expect("context")
}

fn third_gear_pull() -> VehicleState {
    VehicleState {
        speed_kph: 90.0,
        rpm: 4_500,
        gear: 3,
        clutch_pressed: false,
    }
}

#[test]
fn zero_target_selects_position_control_fully_open() {
    let mut ctx = context(0.8, 200.0);
    // Idling: every hold-off condition zeroes the target.
    ctx.apply_vehicle_state(VehicleState::default(), 0);
    ctx.update_target();
    ctx.record_position(500);

    let command = ctx.control_tick(DT);
    assert_eq!(ctx.mode(), ControlMode::Position);
    assert!(command > 0, "expected drive toward open, got {command}");
}

#[test]
fn far_below_target_selects_position_control_fully_closed() {
    let mut ctx = context(0.8, 200.0);
    ctx.apply_vehicle_state(third_gear_pull(), 0);
    ctx.update_target();
    assert_eq!(ctx.target_kpa(), 200.0);

    // 50 < 200 * 0.8: hold the valve closed to spool.
    ctx.record_position(500);
    ctx.record_manifold(manifold_raw_for(50.0), 500);
    let command = ctx.control_tick(DT);
    assert_eq!(ctx.mode(), ControlMode::Position);
    assert!(command < 0, "expected drive toward closed, got {command}");
}

#[test]
fn near_target_hands_over_to_pressure_control() {
    let mut ctx = context(0.8, 200.0);
    ctx.apply_vehicle_state(third_gear_pull(), 0);
    ctx.update_target();

    // 180 >= 200 * 0.8: pressure feedback against the 200 kPa setpoint.
    ctx.record_position(500);
    ctx.record_manifold(manifold_raw_for(180.0), 500);
    ctx.control_tick(DT);
    assert_eq!(ctx.mode(), ControlMode::Pressure);
}

#[rstest]
#[case::spooling(50.0)]
#[case::at_target(200.0)]
#[case::overboosting(260.0)]
fn latched_alarm_commands_zero_for_any_pressure(#[case] kpa: f32) {
    let mut ctx = context(0.8, 200.0);
    ctx.apply_vehicle_state(third_gear_pull(), 0);
    ctx.update_target();

    // Comms silence well past grace and timeout latches the alarm.
    ctx.fault_tick(60_000);
    assert_eq!(ctx.alarm(), Alarm::Critical(AlarmReason::CommsLost));

    ctx.record_position(500);
    ctx.record_manifold(manifold_raw_for(kpa), 500);
    assert_eq!(ctx.control_tick(DT), 0);
    // Repeat ticks stay at zero: the selector is idempotent once latched.
    assert_eq!(ctx.control_tick(DT), 0);

    ctx.update_target();
    assert_eq!(ctx.target_kpa(), 0.0);
}

#[test]
fn sustained_overboost_latches_and_drops_the_target() {
    let mut ctx = context(0.8, 200.0);
    ctx.apply_vehicle_state(third_gear_pull(), 5_000);
    ctx.update_target();
    ctx.record_manifold(manifold_raw_for(260.0), 500); // > 200 * 1.1

    // Contiguous overboost for longer than the allowance.
    for t in (5_000..6_600).step_by(200) {
        ctx.apply_vehicle_state(third_gear_pull(), t);
        ctx.fault_tick(t);
    }
    assert_eq!(ctx.alarm(), Alarm::Critical(AlarmReason::Overboost));

    ctx.update_target();
    assert_eq!(ctx.target_kpa(), 0.0);
    ctx.record_position(500);
    assert_eq!(ctx.control_tick(DT), 0);
}
