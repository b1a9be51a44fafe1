//! Scriptable hardware doubles for deterministic tests.
//!
//! Compiled unconditionally so integration tests in `tests/` can drive the
//! runner without real hardware. Not intended for production use.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use boostctl_traits::{AnalogChannel, AnalogSampler, LinkPort, ValveMotor};

type HwResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Sampler replaying per-channel scripts. When a script runs out the last
/// value repeats forever; an unscripted channel reads zero.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    scripts: HashMap<AnalogChannel, VecDeque<u16>>,
    last: HashMap<AnalogChannel, u16>,
    failing: Option<AnalogChannel>,
}

impl ScriptedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append readings to a channel's script, in read order.
    pub fn script(&mut self, channel: AnalogChannel, readings: impl IntoIterator<Item = u16>) {
        self.scripts.entry(channel).or_default().extend(readings);
    }

    /// Make every read of `channel` fail from now on.
    pub fn fail_channel(&mut self, channel: AnalogChannel) {
        self.failing = Some(channel);
    }
}

impl AnalogSampler for ScriptedSampler {
    fn read_averaged(
        &mut self,
        channel: AnalogChannel,
        _samples: u32,
        _inter_sample_delay: Duration,
    ) -> HwResult<u16> {
        if self.failing == Some(channel) {
            return Err(format!("adc fault on {channel:?}").into());
        }
        let value = match self.scripts.get_mut(&channel).and_then(VecDeque::pop_front) {
            Some(v) => v,
            None => self.last.get(&channel).copied().unwrap_or(0),
        };
        self.last.insert(channel, value);
        Ok(value)
    }
}

/// Motor that records every commanded speed.
#[derive(Debug, Default)]
pub struct SpyMotor {
    commands: Vec<i16>,
    failing: bool,
}

impl SpyMotor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self) {
        self.failing = true;
    }

    pub fn commands(&self) -> &[i16] {
        &self.commands
    }

    pub fn last(&self) -> Option<i16> {
        self.commands.last().copied()
    }
}

impl ValveMotor for SpyMotor {
    fn set_speed(&mut self, speed: i16) -> HwResult<()> {
        if self.failing {
            return Err("motor driver fault".into());
        }
        self.commands.push(speed);
        Ok(())
    }
}

/// Link port replaying queued inbound chunks one per poll and capturing
/// every written frame.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one read cycle's worth of inbound bytes.
    pub fn queue(&mut self, chunk: impl Into<Vec<u8>>) {
        self.incoming.push_back(chunk.into());
    }

    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }
}

impl LinkPort for ScriptedPort {
    fn read_pending(&mut self, buf: &mut [u8]) -> HwResult<usize> {
        let Some(mut chunk) = self.incoming.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            // Deliver the rest on the next poll.
            chunk.drain(..n);
            self.incoming.push_front(chunk);
        }
        Ok(n)
    }

    fn write_frame(&mut self, frame: &[u8]) -> HwResult<()> {
        self.written.push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_repeats_last_scripted_value() {
        let mut s = ScriptedSampler::new();
        s.script(AnalogChannel::ValvePosition, [100, 200]);
        let read = |s: &mut ScriptedSampler| {
            s.read_averaged(AnalogChannel::ValvePosition, 1, Duration::ZERO)
                .unwrap()
        };
        assert_eq!(read(&mut s), 100);
        assert_eq!(read(&mut s), 200);
        assert_eq!(read(&mut s), 200);
    }

    #[test]
    fn port_splits_oversized_chunks_across_polls() {
        let mut p = ScriptedPort::new();
        p.queue(b"abcdef".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(p.read_pending(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(p.read_pending(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(p.read_pending(&mut buf).unwrap(), 0);
    }
}
