//! Wire-level protocol tests with hand-built frames.

use boostctl_core::link::{StatusReport, checksum, encode_frame, encode_status};
use boostctl_core::{Framer, Message, VehicleState};
use rstest::rstest;

fn framer() -> Framer {
    Framer::new(60).expect("framer")
}

#[test]
fn documented_example_frame_decodes() {
    // XOR over "1,55.5,4200,3,0" is 47; the frame is spelled out here so a
    // change to the checksum rules cannot hide behind the encoder.
    assert_eq!(checksum(b"1,55.5,4200,3,0"), 47);
    let mut f = framer();
    let got = f.push(b"<1,55.5,4200,3,0,47>");
    assert_eq!(
        got,
        vec![Message::StatusPush(VehicleState {
            speed_kph: 55.5,
            rpm: 4200,
            gear: 3,
            clutch_pressed: false,
        })]
    );
}

#[test]
fn off_by_one_checksum_is_rejected() {
    let mut f = framer();
    assert!(f.push(b"<1,55.5,4200,3,0,46>").is_empty());
    assert_eq!(f.counters().bad_checksum, 1);
}

#[rstest]
#[case::one_byte_at_a_time(1)]
#[case::pairs(2)]
#[case::sevens(7)]
fn frame_split_into_fixed_chunks_reassembles(#[case] chunk_len: usize) {
    let frame = encode_frame("1,88,5500,4,1");
    let mut f = framer();
    let mut got = Vec::new();
    for chunk in frame.chunks(chunk_len) {
        got.extend(f.push(chunk));
    }
    assert_eq!(got.len(), 1);
    assert!(matches!(got[0], Message::StatusPush(v) if v.gear == 4 && v.clutch_pressed));
    assert_eq!(f.counters().received, 1);
    assert_eq!(f.counters().bad_checksum + f.counters().corrupt, 0);
}

#[test]
fn back_to_back_frames_in_one_poll_all_decode() {
    let mut bytes = encode_frame("0");
    bytes.extend(encode_frame("1,20,2000,2,0"));
    bytes.extend(encode_frame("0"));
    let mut f = framer();
    let got = f.push(&bytes);
    assert_eq!(got.len(), 3);
    assert_eq!(got[0], Message::StatusRequest);
    assert!(matches!(got[1], Message::StatusPush(_)));
    assert_eq!(got[2], Message::StatusRequest);
    assert_eq!(f.counters().received, 3);
}

#[test]
fn corrupt_frame_between_good_frames_does_not_poison_the_stream() {
    let mut bytes = encode_frame("1,20,2000,2,0");
    bytes.extend_from_slice(b"<1,garbage>");
    bytes.extend(encode_frame("0"));
    let mut f = framer();
    let got = f.push(&bytes);
    assert_eq!(got.len(), 2);
    assert_eq!(f.counters().received, 3);
    assert_eq!(f.counters().corrupt, 1);
}

#[test]
fn status_response_carries_alarm_and_telemetry() {
    let report = StatusReport {
        alarm_critical: true,
        target_kpa: 0.0,
        manifold_kpa: 132.75,
        manifold_temp_c: 68,
        intake_kpa: 55.0,
        intake_temp_c: 39,
        valve_open_pct: 100.0,
    };
    let frame = encode_status(&report);
    let text = String::from_utf8(frame.clone()).expect("ascii frame");
    assert!(text.starts_with("<2,1,0.00,132.75,68,55.00,39,100.00,"));
    assert!(text.ends_with('>'));

    // The response passes our own acceptance rules (checksum included).
    let mut f = framer();
    assert_eq!(f.push(&frame), vec![Message::Unknown(2)]);
    assert_eq!(f.counters().bad_checksum + f.counters().corrupt, 0);
}
