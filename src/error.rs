//! Error type for the serial session.
//!
//! Control-point domain failures are NOT errors — they travel as FTMS result
//! codes in the response indication (see `control`). Malformed serial frames
//! have their own `kettler::FrameError` and are dropped at the read loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("serial device error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
