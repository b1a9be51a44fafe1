use thiserror::Error;

/// Typed hardware-layer errors surfaced through the trait seams.
#[derive(Debug, Error)]
pub enum HwError {
    #[error("motor command {0} outside the driver's supported range")]
    SpeedOutOfRange(i16),
    #[error("link port disconnected")]
    Disconnected,
}
