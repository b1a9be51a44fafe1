//! Serial link framing protocol.
//!
//! Wire format (bit-exact with the master):
//! `<` + comma-separated ASCII fields + `,` + up-to-3-digit checksum + `>`.
//! The checksum is the XOR of every payload byte strictly between the start
//! delimiter and the comma that precedes the checksum field, rendered as a
//! decimal number 0..=255. A 1-byte XOR accepts 1 in 256 corrupted payloads;
//! that weakness is kept for wire compatibility and covered by the
//! link-quality fault detector instead.
//!
//! Messages may arrive split across read cycles; `Framer` keeps the
//! unterminated tail and restores it on the next poll.

use crate::error::BuildError;

pub const START_DELIMITER: u8 = b'<';
pub const END_DELIMITER: u8 = b'>';
pub const FIELD_SEPARATOR: u8 = b',';

/// Lifetime message counters, the input to the link-quality detector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkCounters {
    /// Terminated frames seen, valid or not.
    pub received: u64,
    /// Times a read cycle ended mid-frame and the tail was buffered.
    pub partial: u64,
    /// Structurally valid frames whose checksum did not match.
    pub bad_checksum: u64,
    /// Frames rejected for structure or field decode.
    pub corrupt: u64,
}

impl LinkCounters {
    fn rate(numerator: u64, received: u64) -> f32 {
        if received == 0 {
            0.0
        } else {
            numerator as f32 / received as f32 * 100.0
        }
    }

    pub fn partial_rate_pct(&self) -> f32 {
        Self::rate(self.partial, self.received)
    }

    pub fn bad_checksum_rate_pct(&self) -> f32 {
        Self::rate(self.bad_checksum, self.received)
    }

    pub fn corrupt_rate_pct(&self) -> f32 {
        Self::rate(self.corrupt, self.received)
    }
}

/// Vehicle state pushed by the master (command id 1).
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub speed_kph: f32,
    pub rpm: i32,
    pub gear: i32,
    pub clutch_pressed: bool,
}

/// A successfully framed and validated message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Command 0: master asks for our current status.
    StatusRequest,
    /// Command 1: master pushes authoritative vehicle state.
    StatusPush(VehicleState),
    /// Valid frame, command id we do not understand. Logged and ignored.
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameError {
    Corrupt,
    BadChecksum,
}

/// XOR checksum over a payload (delimiters and checksum field excluded).
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Wrap a payload in delimiters and append its checksum field.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    format!("<{},{}>", payload, checksum(payload.as_bytes())).into_bytes()
}

/// Snapshot of controller state for the command-0 response (command id 2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub alarm_critical: bool,
    pub target_kpa: f32,
    pub manifold_kpa: f32,
    pub manifold_temp_c: i32,
    pub intake_kpa: f32,
    pub intake_temp_c: i32,
    pub valve_open_pct: f32,
}

/// Encode the command-0 response as a checksum-framed command-2 message.
pub fn encode_status(report: &StatusReport) -> Vec<u8> {
    let payload = format!(
        "2,{},{:.2},{:.2},{},{:.2},{},{:.2}",
        u8::from(report.alarm_critical),
        report.target_kpa,
        report.manifold_kpa,
        report.manifold_temp_c,
        report.intake_kpa,
        report.intake_temp_c,
        report.valve_open_pct,
    );
    encode_frame(&payload)
}

/// Reassembles delimited frames out of an arbitrary byte stream.
pub struct Framer {
    partial: Option<Vec<u8>>,
    counters: LinkCounters,
    max_frame_len: usize,
}

impl Framer {
    pub fn new(max_frame_len: usize) -> Result<Self, BuildError> {
        // "<0,48>" is the smallest legal frame.
        if max_frame_len < 8 {
            return Err(BuildError::InvalidConfig("max_frame_len must be >= 8"));
        }
        Ok(Self {
            partial: None,
            counters: LinkCounters::default(),
            max_frame_len,
        })
    }

    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Consume one read cycle's bytes and return every message completed by
    /// them. Junk before a start delimiter is discarded, but only when no
    /// partial frame is pending; an unterminated tail is buffered for the
    /// next cycle.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();
        let mut frame = self.partial.take().unwrap_or_default();

        for &byte in chunk {
            if frame.is_empty() {
                // Framing state: discard until a start delimiter appears.
                if byte != START_DELIMITER {
                    continue;
                }
            }
            frame.push(byte);

            if byte == END_DELIMITER {
                self.counters.received += 1;
                match decode_frame(&frame) {
                    Ok(Message::Unknown(id)) => {
                        tracing::debug!(command_id = id, "ignoring unknown command id");
                        out.push(Message::Unknown(id));
                    }
                    Ok(msg) => out.push(msg),
                    Err(FrameError::Corrupt) => {
                        self.counters.corrupt += 1;
                        tracing::debug!(
                            frame = %String::from_utf8_lossy(&frame),
                            "discarding corrupt frame"
                        );
                    }
                    Err(FrameError::BadChecksum) => {
                        self.counters.bad_checksum += 1;
                        tracing::debug!(
                            frame = %String::from_utf8_lossy(&frame),
                            "discarding frame with bad checksum"
                        );
                    }
                }
                frame.clear();
            } else if frame.len() > self.max_frame_len {
                // Never saw a terminator within the longest legal frame.
                self.counters.corrupt += 1;
                tracing::debug!(len = frame.len(), "discarding oversized unterminated frame");
                frame.clear();
            }
        }

        if !frame.is_empty() {
            self.counters.partial += 1;
            tracing::trace!(
                buffered = frame.len(),
                "storing partial frame until next poll"
            );
            self.partial = Some(frame);
        }
        out
    }
}

/// Validate structure and checksum of one terminated frame, then decode the
/// command. The frame must contain exactly one `<` (first), exactly one `>`
/// (last) and at least one field separator.
fn decode_frame(frame: &[u8]) -> Result<Message, FrameError> {
    let n = frame.len();
    if n < 2 || frame[0] != START_DELIMITER || frame[n - 1] != END_DELIMITER {
        return Err(FrameError::Corrupt);
    }
    let starts = frame.iter().filter(|&&b| b == START_DELIMITER).count();
    let ends = frame.iter().filter(|&&b| b == END_DELIMITER).count();
    if starts != 1 || ends != 1 {
        return Err(FrameError::Corrupt);
    }

    let interior = &frame[1..n - 1];
    let sep = interior
        .iter()
        .rposition(|&b| b == FIELD_SEPARATOR)
        .ok_or(FrameError::Corrupt)?;
    let (payload, checksum_field) = (&interior[..sep], &interior[sep + 1..]);

    if checksum_field.is_empty()
        || checksum_field.len() > 3
        || !checksum_field.iter().all(u8::is_ascii_digit)
    {
        return Err(FrameError::Corrupt);
    }
    let declared: u16 = std::str::from_utf8(checksum_field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(FrameError::Corrupt)?;
    if declared > u16::from(u8::MAX) {
        return Err(FrameError::Corrupt);
    }
    if checksum(payload) != declared as u8 {
        return Err(FrameError::BadChecksum);
    }

    decode_payload(payload)
}

/// Split a checksum-valid payload into fields and dispatch by command id.
fn decode_payload(payload: &[u8]) -> Result<Message, FrameError> {
    let text = std::str::from_utf8(payload).map_err(|_| FrameError::Corrupt)?;
    let mut fields = text.split(',');
    let command_id: u32 = fields
        .next()
        .and_then(|f| f.trim().parse().ok())
        .ok_or(FrameError::Corrupt)?;

    match command_id {
        0 => Ok(Message::StatusRequest),
        1 => {
            let speed_kph: f32 = next_field(&mut fields)?;
            let rpm: i32 = next_field(&mut fields)?;
            let gear: i32 = next_field(&mut fields)?;
            let clutch_pressed = match fields.next().map(str::trim) {
                Some("1") => true,
                Some("0") => false,
                _ => return Err(FrameError::Corrupt),
            };
            Ok(Message::StatusPush(VehicleState {
                speed_kph,
                rpm,
                gear,
                clutch_pressed,
            }))
        }
        other => Ok(Message::Unknown(other)),
    }
}

fn next_field<T: std::str::FromStr>(
    fields: &mut std::str::Split<'_, char>,
) -> Result<T, FrameError> {
    fields
        .next()
        .and_then(|f| f.trim().parse().ok())
        .ok_or(FrameError::Corrupt)
}
