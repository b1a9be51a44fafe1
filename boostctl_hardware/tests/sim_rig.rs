//! Physics sanity checks for the simulated rig.

use std::time::Duration;

use boostctl_hardware::{
    ATMOSPHERE_RAW, CLOSED_STOP_RAW, OPEN_STOP_RAW, ScriptedMaster, SimRig,
};
use boostctl_traits::{AnalogChannel, AnalogSampler, LinkPort, ValveMotor};
use rstest::rstest;

fn read(sampler: &mut impl AnalogSampler, channel: AnalogChannel) -> u16 {
    sampler.read_averaged(channel, 1, Duration::ZERO).unwrap()
}

#[rstest]
#[case::closing(-100, CLOSED_STOP_RAW)]
#[case::opening(100, OPEN_STOP_RAW)]
fn valve_drives_to_the_stop_and_clamps(#[case] speed: i16, #[case] stop: f32) {
    let rig = SimRig::new();
    let mut sampler = rig.sampler();
    let mut motor = rig.motor();

    motor.set_speed(speed).unwrap();
    for _ in 0..500 {
        read(&mut sampler, AnalogChannel::ValvePosition);
    }
    assert_eq!(rig.position_raw(), stop.round() as u16);
}

#[test]
fn spring_creeps_the_valve_open_when_unpowered() {
    let rig = SimRig::new();
    let mut sampler = rig.sampler();
    let before = rig.position_raw();
    for _ in 0..10 {
        read(&mut sampler, AnalogChannel::ValvePosition);
    }
    assert!(rig.position_raw() > before);
}

#[test]
fn closed_valve_under_load_builds_boost() {
    let rig = SimRig::new();
    let mut sampler = rig.sampler();
    let mut motor = rig.motor();
    rig.set_load_raw(200.0);

    motor.set_speed(-100).unwrap();
    for _ in 0..500 {
        read(&mut sampler, AnalogChannel::ValvePosition);
        read(&mut sampler, AnalogChannel::ManifoldPressure);
    }
    let boosted = rig.manifold_raw();
    assert!(
        f32::from(boosted) > ATMOSPHERE_RAW + 150.0,
        "manifold never built boost: {boosted}"
    );

    // Opening the valve bleeds the boost back toward atmosphere.
    motor.set_speed(100).unwrap();
    for _ in 0..500 {
        read(&mut sampler, AnalogChannel::ValvePosition);
        read(&mut sampler, AnalogChannel::ManifoldPressure);
    }
    assert!(f32::from(rig.manifold_raw()) < ATMOSPHERE_RAW + 20.0);
}

#[test]
fn out_of_range_motor_command_faults() {
    let rig = SimRig::new();
    let mut motor = rig.motor();
    assert!(motor.set_speed(1000).is_err());
    assert!(motor.set_speed(-255).is_ok());
}

#[test]
fn scripted_master_delivers_per_poll_and_captures_responses() {
    let mut master = ScriptedMaster::new(|poll| match poll {
        0 => Some(b"<0,48>".to_vec()),
        _ => None,
    });
    let mut buf = [0u8; 16];
    assert_eq!(master.read_pending(&mut buf).unwrap(), 6);
    assert_eq!(&buf[..6], b"<0,48>");
    assert_eq!(master.read_pending(&mut buf).unwrap(), 0);

    master.write_frame(b"<2,0,99>").unwrap();
    assert_eq!(master.responses(), &[b"<2,0,99>".to_vec()]);
}
