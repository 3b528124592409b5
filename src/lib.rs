//! # fakelink
//!
//! A Scratch Link BLE peripheral emulator.
//!
//! This library speaks the Scratch Link WebSocket/JSON-RPC protocol and
//! pretends to be one or more Bluetooth Low Energy peripherals, so Scratch
//! extensions can be developed and tested without real hardware.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Bit-exact characteristic payload codec (attach frames, sensor frames,
//!   motor commands, display opcodes, accelerometer vectors)
//! - Idempotent notification lifecycle with per-subscription push loops
//! - Multiple peripherals multiplexed over one WebSocket session
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use fakelink::{DeviceKind, LinkHub, WeDoDevice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fakelink::Error> {
//!     let wedo = WeDoDevice::new(
//!         "Fake-Wedo",
//!         BTreeMap::from([(1, DeviceKind::Motor), (2, DeviceKind::Tilt)]),
//!     );
//!
//!     // Observe motor commands from the Scratch extension
//!     wedo.on_motor_power(|port, power, direction| {
//!         println!("motor {port} -> {power} ({direction:+})");
//!     })
//!     .await;
//!
//!     let mut hub = LinkHub::new();
//!     hub.register(wedo.peripheral());
//!     hub.run(fakelink::hub::DEFAULT_ADDRESS).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`rpc`] - JSON-RPC envelope types and outbound message builders
//! - [`codec`] - Binary encoding/decoding of characteristic payloads
//! - [`peripheral`] - Device models and the generic notification engine
//! - [`dispatcher`] - Per-session method routing and peripheral fan-out
//! - [`transport`] - Per-connection outbound message queue
//! - [`hub`] - WebSocket accept loop and session lifecycle

pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod peripheral;
pub mod rpc;
pub mod transport;

// Re-exports for convenience
pub use codec::{DeviceKind, DisplayCommand, MotorCommand, SensorReading};
pub use dispatcher::Dispatcher;
pub use error::{DisplayError, Error, Result};
pub use hub::LinkHub;
pub use peripheral::microbit::{Button, MicrobitDevice};
pub use peripheral::wedo::WeDoDevice;
pub use peripheral::{Advertisement, Channel, Device, DeviceModel, Peripheral};
pub use rpc::{Method, Params, Request, ServiceId};
pub use transport::Sink;
