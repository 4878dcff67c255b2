use thiserror::Error;

/// Errors from the outer surfaces of the crate (profiles, CLI input, reports).
///
/// The transport itself never fails outward: framing errors, collisions,
/// CRC mismatches and contention are all recovered where they happen.
#[derive(Debug, Error)]
pub enum KiloError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid calibration profile: {0}")]
    InvalidProfile(String),

    #[error("invalid hex input: {0}")]
    InvalidHex(String),

    #[error("frame must be {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, KiloError>;
