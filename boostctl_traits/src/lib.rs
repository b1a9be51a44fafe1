pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Analog channels the controller samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalogChannel {
    ValvePosition,
    ManifoldPressure,
    IntakePressure,
    ManifoldTemp,
    IntakeTemp,
}

/// Debounced analog input. Implementations average `samples` raw conversions
/// taken `inter_sample_delay` apart and return the mean. Raw range is 0..=1023.
pub trait AnalogSampler {
    fn read_averaged(
        &mut self,
        channel: AnalogChannel,
        samples: u32,
        inter_sample_delay: std::time::Duration,
    ) -> Result<u16, Box<dyn std::error::Error + Send + Sync>>;
}

/// Motorised valve drive. Sign is direction (positive opens the valve, the
/// direction the return spring assists), magnitude is duty, zero is stop.
pub trait ValveMotor {
    fn set_speed(&mut self, speed: i16) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Byte-oriented duplex stream to the master controller.
pub trait LinkPort {
    /// Non-blocking read of whatever bytes are pending; `Ok(0)` when idle.
    fn read_pending(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Write one framed message in full.
    fn write_frame(&mut self, frame: &[u8])
    -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
