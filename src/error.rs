// error.rs - Error handling types
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid mode descriptor: {0}")]
    InvalidMode(String),
    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(usize),
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },
    #[error("Range coder carry buffer overflowed; frame is undecodable")]
    CarryOverflow,
    #[error("Range coder output buffer exhausted")]
    BufferExhausted,
}

pub type Result<T> = std::result::Result<T, CodecError>;

pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CodecError::BufferSizeMismatch { expected, actual });
    }
    Ok(())
}
