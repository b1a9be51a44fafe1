use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ControlError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("link port error: {0}")]
    Link(String),
    #[error("controller not armed: {0}")]
    NotArmed(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("valve never stalled homing toward the {direction} stop within {timeout_ms}ms")]
    StallTimeout {
        direction: &'static str,
        timeout_ms: u64,
    },
    #[error(
        "degenerate travel span: min_raw={min_raw} max_raw={max_raw}, need span >= {min_span}"
    )]
    DegenerateSpan {
        min_raw: u16,
        max_raw: u16,
        min_span: u16,
    },
    #[error("hardware error while homing: {0}")]
    Hardware(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Map a trait-boundary error to a typed `ControlError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    ControlError::Hardware(e.to_string())
}

/// Map a link-port error to a typed `ControlError`.
pub fn map_link_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    ControlError::Link(e.to_string())
}
