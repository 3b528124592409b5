//! Binary encoding and decoding of characteristic payloads.
//!
//! Everything in this module is a pure function over byte slices: attach
//! frames announcing which device occupies a port, sensor value frames,
//! motor control commands, accelerometer vectors, button and pin-event
//! frames, and the display opcode set. All multi-byte values are
//! little-endian. Payloads travel base64-encoded inside the JSON envelope.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BufMut;

use crate::error::DisplayError;

/// First byte of every sensor value frame.
pub const SENSOR_FRAME_HEADER: u8 = 0x05;

/// Opcode announcing a pin connect/disconnect event.
pub const PIN_EVENT_OPCODE: u8 = 0xA5;

/// Display opcode: set a single pixel.
pub const OPCODE_SET_PIXEL: u8 = 0x80;

/// Display opcode: scroll a text string.
pub const OPCODE_TEXT: u8 = 0x81;

/// Display opcode: show a 5x5 bitmap.
pub const OPCODE_MATRIX: u8 = 0x82;

/// Fixed trailer bytes of an attach frame.
const ATTACH_TRAILER: [u8; 8] = [0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x10];

/// The kind of device occupying a port.
///
/// The set is closed: the match arms below are exhaustive, so adding a kind
/// without wiring its wire code is a compile error rather than a silent
/// fallback at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Motor actuator.
    Motor,
    /// Two-axis tilt sensor.
    Tilt,
    /// Distance sensor.
    Distance,
}

impl DeviceKind {
    /// Wire code used in attach frames.
    #[must_use]
    pub const fn type_code(self) -> u8 {
        match self {
            Self::Motor => 0x01,
            Self::Tilt => 0x22,
            Self::Distance => 0x23,
        }
    }
}

/// A decoded motor control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    /// Target port.
    pub port: u8,
    /// Power magnitude, clamped to 0..=127.
    pub power: u8,
    /// Rotation direction: `+1` clockwise, `-1` counter-clockwise.
    pub direction: i8,
}

/// A sensor value to frame for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    /// Current motor power echo.
    Motor(u8),
    /// Tilt x/y, each 0..=255.
    Tilt(u8, u8),
    /// Distance, 0..=255.
    Distance(u8),
}

/// Encodes a payload as base64 text for the JSON envelope.
#[must_use]
pub fn b64_encode(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

/// Decodes base64 text into bytes.
///
/// Missing or malformed input yields an empty vector; the protocol treats a
/// bad `message` field as "no payload", never as a session error.
#[must_use]
pub fn b64_decode(text: &str) -> Vec<u8> {
    BASE64.decode(text).unwrap_or_default()
}

/// Encodes the attach frame announcing `kind` on `port`.
///
/// Layout: `[port, 0x01, role, type_code]` followed by a fixed trailer.
/// `role` is `0x00` for the first configured port and `0x01` for every
/// subsequent one.
#[must_use]
pub fn encode_attach(port: u8, first: bool, kind: DeviceKind) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + ATTACH_TRAILER.len());
    buf.put_u8(port);
    buf.put_u8(0x01);
    buf.put_u8(u8::from(!first));
    buf.put_u8(kind.type_code());
    buf.put_slice(&ATTACH_TRAILER);
    buf
}

/// Encodes a sensor value frame: `[0x05, port, value...]`.
#[must_use]
pub fn encode_sensor(port: u8, reading: SensorReading) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4);
    buf.put_u8(SENSOR_FRAME_HEADER);
    buf.put_u8(port);
    match reading {
        SensorReading::Motor(power) => buf.put_u8(power),
        SensorReading::Tilt(x, y) => {
            buf.put_u8(x);
            buf.put_u8(y);
        }
        SensorReading::Distance(value) => buf.put_u8(value),
    }
    buf
}

/// Decodes a sensor value frame back into `(port, value bytes)`.
///
/// Returns `None` if the frame is too short or does not carry the sensor
/// header.
#[must_use]
pub fn decode_sensor(frame: &[u8]) -> Option<(u8, &[u8])> {
    if frame.len() < 3 || frame[0] != SENSOR_FRAME_HEADER {
        return None;
    }
    Some((frame[1], &frame[2..]))
}

/// Decodes a motor control write.
///
/// The port is the first byte; the last byte is a two's-complement signed
/// power where negative means counter-clockwise. Magnitude is clamped to
/// 0..=127. Payloads shorter than 3 bytes are not motor commands.
#[must_use]
pub fn decode_motor_command(payload: &[u8]) -> Option<MotorCommand> {
    if payload.len() < 3 {
        return None;
    }
    let port = payload[0];
    let signed = *payload.last()? as i8;
    let direction: i8 = if signed >= 0 { 1 } else { -1 };
    let power = u8::try_from(i16::from(signed).abs().min(127)).unwrap_or(127);
    Some(MotorCommand {
        port,
        power,
        direction,
    })
}

/// Encodes an accelerometer vector as three signed 16-bit LE values.
///
/// # Errors
///
/// Returns [`crate::Error::AccelerometerRange`] if any component is outside
/// the signed 16-bit range. Out-of-range input is rejected, not clamped.
pub fn encode_accelerometer(x: i32, y: i32, z: i32) -> crate::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(6);
    for value in [x, y, z] {
        let component = i16::try_from(value)
            .map_err(|_| crate::Error::AccelerometerRange { value })?;
        buf.put_i16_le(component);
    }
    Ok(buf)
}

/// Encodes a button state frame (single byte).
///
/// Plain presses are 0/1; higher values encode long-press codes.
#[must_use]
pub fn encode_button(value: u8) -> Vec<u8> {
    vec![value]
}

/// Encodes a pin connect/disconnect event frame.
#[must_use]
pub fn encode_pin_event(pin: u8, connected: bool) -> Vec<u8> {
    vec![PIN_EVENT_OPCODE, pin, u8::from(connected)]
}

/// Generates the 8-byte heartbeat payload for tick `t`.
#[must_use]
pub fn heartbeat_payload(t: u8) -> Vec<u8> {
    (0..8u8).map(|i| t.wrapping_add(i.wrapping_mul(11))).collect()
}

/// A decoded display write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCommand {
    /// Set one pixel on or off.
    SetPixel { x: u8, y: u8, on: bool },
    /// Scroll a text string.
    Text(String),
    /// Show a 5x5 bitmap; each row byte uses bits 4..=0, one column per bit.
    Matrix([u8; 5]),
    /// Clear the display (the all-zero bitmap write).
    Clear,
}

/// Decodes a display write payload by its leading opcode byte.
///
/// An all-zero bitmap decodes to [`DisplayCommand::Clear`] rather than a
/// blank matrix; the wire bytes are identical but consumers get the
/// dedicated callback.
///
/// # Errors
///
/// Returns a [`DisplayError`] for empty payloads, truncated set-pixel
/// arguments, or opcodes outside the display command set. Callers log these
/// and ack the RPC normally.
pub fn decode_display(payload: &[u8]) -> Result<DisplayCommand, DisplayError> {
    let (&opcode, args) = payload.split_first().ok_or(DisplayError::Empty)?;
    match opcode {
        OPCODE_SET_PIXEL => {
            if args.len() < 3 {
                return Err(DisplayError::SetPixelTooShort(args.len()));
            }
            Ok(DisplayCommand::SetPixel {
                x: args[0],
                y: args[1],
                on: args[2] != 0,
            })
        }
        OPCODE_TEXT => Ok(DisplayCommand::Text(
            String::from_utf8_lossy(args).into_owned(),
        )),
        OPCODE_MATRIX => {
            let mut rows = [0u8; 5];
            for (row, &byte) in rows.iter_mut().zip(args.iter().take(5)) {
                *row = byte;
            }
            if rows.iter().all(|&b| b == 0) {
                Ok(DisplayCommand::Clear)
            } else {
                Ok(DisplayCommand::Matrix(rows))
            }
        }
        other => Err(DisplayError::UnknownOpcode(other)),
    }
}
