//! Error types for the fakelink library.

use thiserror::Error;

/// The main error type for fakelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Display payload decoding error.
    #[error("display error: {0}")]
    Display(#[from] DisplayError),

    /// Accelerometer component outside the signed 16-bit range.
    #[error("accelerometer value out of range: {value}")]
    AccelerometerRange { value: i32 },

    /// The outbound transport is gone (peer disconnected).
    #[error("transport closed")]
    TransportClosed,
}

/// Errors decoding a display-write payload.
///
/// These never fail an RPC; callers log them and ack normally.
#[derive(Debug, Error)]
pub enum DisplayError {
    /// Write payload carried no bytes at all.
    #[error("empty display payload")]
    Empty,

    /// Set-pixel needs x, y and an on/off byte.
    #[error("set-pixel payload too short: {0} bytes after opcode")]
    SetPixelTooShort(usize),

    /// Opcode byte not in the display command set.
    #[error("unknown display opcode 0x{0:02X}")]
    UnknownOpcode(u8),
}

/// Result type alias for fakelink operations.
pub type Result<T> = std::result::Result<T, Error>;
