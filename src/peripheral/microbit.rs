//! micro:bit-style peripheral: 5x5 display, buttons, pins and an
//! accelerometer.
//!
//! The rx channel streams a heartbeat payload while subscribed. Display
//! writes arrive on the tx characteristic and are decoded by opcode into
//! application hooks. Buttons, pin events and accelerometer gestures are
//! event-driven: the application fires them and the peripheral pushes one
//! notification immediately.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{self, DisplayCommand};
use crate::error::Result;
use crate::peripheral::{Channel, Device, DeviceModel, Peripheral};
use crate::rpc::ServiceId;

/// Numeric service id carrying the rx/tx characteristics.
pub const SERVICE_ID: u64 = 61445;
/// Notify characteristic (heartbeat, pin events).
pub const CHAR_RX: &str = "5261da01-fa7e-42ab-850b-7c80220097cc";
/// Write characteristic (display commands).
pub const CHAR_TX: &str = "5261da02-fa7e-42ab-850b-7c80220097cc";

/// Button event service.
pub const BUTTON_SERVICE: &str = "E95D9882-251D-470A-A062-FA1922DFA9A8";
/// Button A state characteristic.
pub const BUTTON_A_CHAR: &str = "E95DDA90-251D-470A-A062-FA1922DFA9A8";
/// Button B state characteristic.
pub const BUTTON_B_CHAR: &str = "E95DDA91-251D-470A-A062-FA1922DFA9A8";
/// Combined A+B state characteristic.
pub const BUTTON_AB_CHAR: &str = "E95DDA92-251D-470A-A062-FA1922DFA9A8";

/// Accelerometer service.
pub const ACCEL_SERVICE: &str = "E95D0753-251D-470A-A062-FA1922DFA9A8";
/// Accelerometer data characteristic.
pub const ACCEL_DATA_CHAR: &str = "E95DCA4B-251D-470A-A062-FA1922DFA9A8";

/// Default heartbeat rate.
pub const DEFAULT_HEARTBEAT_HZ: f64 = 1.0;

/// A physical button (or the chord of both).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Button A.
    A,
    /// Button B.
    B,
    /// Both buttons together.
    Both,
}

impl Button {
    const fn characteristic(self) -> &'static str {
        match self {
            Self::A => BUTTON_A_CHAR,
            Self::B => BUTTON_B_CHAR,
            Self::Both => BUTTON_AB_CHAR,
        }
    }
}

type TextHook = Box<dyn Fn(&str) + Send + Sync>;
type MatrixHook = Box<dyn Fn(&[u8; 5]) + Send + Sync>;
type ClearHook = Box<dyn Fn() + Send + Sync>;
type PixelHook = Box<dyn Fn(u8, u8, bool) + Send + Sync>;

/// Device model for a micro:bit peripheral.
pub struct MicrobitModel {
    name: String,
    heartbeat_enabled: bool,
    heartbeat_tick: u8,
    on_text: Option<TextHook>,
    on_matrix: Option<MatrixHook>,
    on_clear: Option<ClearHook>,
    on_set_pixel: Option<PixelHook>,
}

impl MicrobitModel {
    /// Creates a model; `heartbeat_enabled = false` silences the rx stream.
    #[must_use]
    pub fn new(name: impl Into<String>, heartbeat_enabled: bool) -> Self {
        Self {
            name: name.into(),
            heartbeat_enabled,
            heartbeat_tick: 0,
            on_text: None,
            on_matrix: None,
            on_clear: None,
            on_set_pixel: None,
        }
    }

    fn apply_display(&self, command: DisplayCommand) {
        match command {
            DisplayCommand::Text(text) => {
                if let Some(hook) = &self.on_text {
                    hook(&text);
                } else {
                    tracing::info!(text = %text, "display text");
                }
            }
            DisplayCommand::Matrix(rows) => {
                if let Some(hook) = &self.on_matrix {
                    hook(&rows);
                } else {
                    let grid: Vec<String> = rows
                        .iter()
                        .map(|row| {
                            (0..5)
                                .map(|col| if (row >> (4 - col)) & 1 == 1 { '#' } else { '.' })
                                .collect()
                        })
                        .collect();
                    tracing::info!(grid = %grid.join("/"), "display matrix");
                }
            }
            DisplayCommand::Clear => {
                if let Some(hook) = &self.on_clear {
                    hook();
                } else {
                    tracing::info!("display clear");
                }
            }
            DisplayCommand::SetPixel { x, y, on } => {
                if let Some(hook) = &self.on_set_pixel {
                    hook(x, y, on);
                } else {
                    tracing::info!(x, y, on, "display set pixel");
                }
            }
        }
    }
}

impl DeviceModel for MicrobitModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn peripheral_id(&self) -> &str {
        "FAKE-MICROBIT-1234"
    }

    fn channels(&self) -> Vec<Channel> {
        vec![Channel::new(
            ServiceId::Number(SERVICE_ID),
            CHAR_RX.into(),
            true,
        )]
    }

    fn on_write(&mut self, _service: &ServiceId, characteristic: &ServiceId, payload: &[u8]) {
        if !characteristic.matches(&CHAR_TX.into()) {
            return;
        }
        match codec::decode_display(payload) {
            Ok(command) => self.apply_display(command),
            Err(e) => {
                tracing::warn!(payload = %hex::encode(payload), "ignoring display write: {e}");
            }
        }
    }

    fn tick(&mut self, _channel: &Channel) -> Vec<Vec<u8>> {
        if !self.heartbeat_enabled {
            return Vec::new();
        }
        self.heartbeat_tick = self.heartbeat_tick.wrapping_add(1);
        vec![codec::heartbeat_payload(self.heartbeat_tick)]
    }
}

/// A simulated micro:bit peripheral.
///
/// Clonable handle; clones share the same device state.
#[derive(Clone)]
pub struct MicrobitDevice {
    device: Device<MicrobitModel>,
}

impl MicrobitDevice {
    /// Creates a micro:bit with the default 1 Hz heartbeat.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_heartbeat_hz(name, DEFAULT_HEARTBEAT_HZ)
    }

    /// Creates a micro:bit with an explicit heartbeat rate.
    ///
    /// A non-positive rate disables the heartbeat stream entirely; the rx
    /// subscription still activates but pushes nothing.
    #[must_use]
    pub fn with_heartbeat_hz(name: impl Into<String>, hz: f64) -> Self {
        let enabled = hz > 0.0;
        let interval = if enabled {
            Duration::from_secs_f64(1.0 / hz)
        } else {
            Duration::from_secs(1)
        };
        Self {
            device: Device::new(MicrobitModel::new(name, enabled), interval),
        }
    }

    /// The engine handle, for direct channel operations in embedding code.
    #[must_use]
    pub fn device(&self) -> &Device<MicrobitModel> {
        &self.device
    }

    /// An erased handle for hub registration.
    #[must_use]
    pub fn peripheral(&self) -> Arc<dyn Peripheral> {
        Arc::new(self.device.clone())
    }

    /// Installs the display-text hook.
    pub async fn on_display_text(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.device
            .with_model(|m| m.on_text = Some(Box::new(hook)))
            .await;
    }

    /// Installs the display-bitmap hook.
    pub async fn on_display_matrix(&self, hook: impl Fn(&[u8; 5]) + Send + Sync + 'static) {
        self.device
            .with_model(|m| m.on_matrix = Some(Box::new(hook)))
            .await;
    }

    /// Installs the clear-display hook.
    pub async fn on_clear_display(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.device
            .with_model(|m| m.on_clear = Some(Box::new(hook)))
            .await;
    }

    /// Installs the set-pixel hook.
    pub async fn on_set_pixel(&self, hook: impl Fn(u8, u8, bool) + Send + Sync + 'static) {
        self.device
            .with_model(|m| m.on_set_pixel = Some(Box::new(hook)))
            .await;
    }

    /// Pushes a raw button state value (long-press codes included).
    pub async fn button(&self, button: Button, value: u8) -> Result<()> {
        self.device
            .notify(
                &ServiceId::from(BUTTON_SERVICE),
                &ServiceId::from(button.characteristic()),
                &codec::encode_button(value),
            )
            .await
    }

    /// Pushes button A pressed/released.
    pub async fn button_a(&self, pressed: bool) -> Result<()> {
        self.button(Button::A, u8::from(pressed)).await
    }

    /// Pushes button B pressed/released.
    pub async fn button_b(&self, pressed: bool) -> Result<()> {
        self.button(Button::B, u8::from(pressed)).await
    }

    /// Pushes both buttons pressed/released.
    pub async fn button_ab(&self, pressed: bool) -> Result<()> {
        self.button(Button::Both, u8::from(pressed)).await
    }

    /// Presses button A.
    pub async fn press_a(&self) -> Result<()> {
        self.button_a(true).await
    }

    /// Releases button A.
    pub async fn release_a(&self) -> Result<()> {
        self.button_a(false).await
    }

    /// Presses button B.
    pub async fn press_b(&self) -> Result<()> {
        self.button_b(true).await
    }

    /// Releases button B.
    pub async fn release_b(&self) -> Result<()> {
        self.button_b(false).await
    }

    /// Pushes a pin connect/disconnect event on the rx channel.
    pub async fn pin_connected(&self, pin: u8, connected: bool) -> Result<()> {
        self.device
            .notify(
                &ServiceId::Number(SERVICE_ID),
                &ServiceId::from(CHAR_RX),
                &codec::encode_pin_event(pin, connected),
            )
            .await
    }

    /// Pushes an accelerometer vector.
    ///
    /// # Errors
    ///
    /// Rejects components outside the signed 16-bit range without sending
    /// anything.
    pub async fn accelerometer(&self, x: i32, y: i32, z: i32) -> Result<()> {
        let payload = codec::encode_accelerometer(x, y, z)?;
        self.device
            .notify(
                &ServiceId::from(ACCEL_SERVICE),
                &ServiceId::from(ACCEL_DATA_CHAR),
                &payload,
            )
            .await
    }

    /// Gesture: tilt toward the front edge.
    pub async fn tilt_front(&self) -> Result<()> {
        self.accelerometer(0, 800, 1000).await
    }

    /// Gesture: tilt toward the back edge.
    pub async fn tilt_back(&self) -> Result<()> {
        self.accelerometer(0, -800, 1000).await
    }

    /// Gesture: tilt left.
    pub async fn tilt_left(&self) -> Result<()> {
        self.accelerometer(-800, 0, 1000).await
    }

    /// Gesture: tilt right.
    pub async fn tilt_right(&self) -> Result<()> {
        self.accelerometer(800, 0, 1000).await
    }

    /// Gesture: tilted in some direction.
    pub async fn tilt_any(&self) -> Result<()> {
        self.accelerometer(300, 300, 1000).await
    }

    /// Gesture: the device was moved.
    pub async fn moved(&self) -> Result<()> {
        self.accelerometer(1500, 0, 1000).await
    }

    /// Gesture: the device was shaken.
    pub async fn shaken(&self) -> Result<()> {
        self.accelerometer(3000, 3000, 1000).await
    }

    /// Gesture: the device jumped (free fall).
    pub async fn jumped(&self) -> Result<()> {
        self.accelerometer(0, 0, 400).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Sink;
    use serde_json::Value;
    use std::sync::Mutex;

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    fn payload_of(v: &Value) -> Vec<u8> {
        codec::b64_decode(v["params"]["message"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_display_text_write_hits_hook() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let texts = Arc::clone(&seen);
        microbit
            .on_display_text(move |t| texts.lock().unwrap().push(t.to_owned()))
            .await;

        let svc = ServiceId::Number(SERVICE_ID);
        let chr = ServiceId::from(CHAR_TX);
        microbit
            .device()
            .write(&svc, &chr, &[0x81, b'h', b'i'])
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &["hi".to_owned()]);
    }

    #[tokio::test]
    async fn test_all_zero_bitmap_is_a_clear() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let cleared = Arc::new(Mutex::new(0usize));
        let count = Arc::clone(&cleared);
        microbit
            .on_clear_display(move || *count.lock().unwrap() += 1)
            .await;
        let matrices = Arc::new(Mutex::new(0usize));
        let mcount = Arc::clone(&matrices);
        microbit
            .on_display_matrix(move |_| *mcount.lock().unwrap() += 1)
            .await;

        let svc = ServiceId::Number(SERVICE_ID);
        let chr = ServiceId::from(CHAR_TX);
        microbit
            .device()
            .write(&svc, &chr, &[0x82, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        assert_eq!(*cleared.lock().unwrap(), 1);
        assert_eq!(*matrices.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_opcode_and_short_pixel_are_tolerated() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let svc = ServiceId::Number(SERVICE_ID);
        let chr = ServiceId::from(CHAR_TX);
        // neither write may panic or error
        microbit.device().write(&svc, &chr, &[0x42, 1]).await.unwrap();
        microbit.device().write(&svc, &chr, &[0x80, 2]).await.unwrap();
        microbit.device().write(&svc, &chr, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_streams_after_subscribe() {
        let microbit = MicrobitDevice::with_heartbeat_hz("Fake-Microbit", 20.0);
        let (sink, mut rx) = Sink::channel(32);
        microbit.device().register_transport(sink).await;

        let svc = ServiceId::Number(SERVICE_ID);
        let chr = ServiceId::from(CHAR_RX);
        microbit.device().start_notifications(&svc, &chr).await.unwrap();

        let v = parse(
            &tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .expect("heartbeat never arrived")
                .unwrap(),
        );
        assert_eq!(v["params"]["serviceId"], 61445);
        let payload = payload_of(&v);
        assert_eq!(payload.len(), 8);
        assert_eq!(payload[1], payload[0].wrapping_add(11));
    }

    #[tokio::test]
    async fn test_disabled_heartbeat_pushes_nothing() {
        let microbit = MicrobitDevice::with_heartbeat_hz("Fake-Microbit", 0.0);
        let (sink, mut rx) = Sink::channel(32);
        microbit.device().register_transport(sink).await;

        let svc = ServiceId::Number(SERVICE_ID);
        let chr = ServiceId::from(CHAR_RX);
        microbit.device().start_notifications(&svc, &chr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_button_press_frame() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let (sink, mut rx) = Sink::channel(32);
        microbit.device().register_transport(sink).await;

        microbit.press_a().await.unwrap();
        let v = parse(&rx.recv().await.unwrap());
        assert_eq!(v["params"]["characteristicId"], BUTTON_A_CHAR);
        assert_eq!(payload_of(&v), [1]);

        microbit.release_a().await.unwrap();
        let v = parse(&rx.recv().await.unwrap());
        assert_eq!(payload_of(&v), [0]);

        microbit.button(Button::Both, 2).await.unwrap();
        let v = parse(&rx.recv().await.unwrap());
        assert_eq!(v["params"]["characteristicId"], BUTTON_AB_CHAR);
        assert_eq!(payload_of(&v), [2]);
    }

    #[tokio::test]
    async fn test_pin_event_frame() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let (sink, mut rx) = Sink::channel(32);
        microbit.device().register_transport(sink).await;

        microbit.pin_connected(3, true).await.unwrap();
        let v = parse(&rx.recv().await.unwrap());
        assert_eq!(payload_of(&v), [0xA5, 3, 1]);
    }

    #[tokio::test]
    async fn test_accelerometer_gesture_vector() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let (sink, mut rx) = Sink::channel(32);
        microbit.device().register_transport(sink).await;

        microbit.tilt_front().await.unwrap();
        let v = parse(&rx.recv().await.unwrap());
        assert_eq!(v["params"]["characteristicId"], ACCEL_DATA_CHAR);
        // (0, 800, 1000) little-endian
        assert_eq!(payload_of(&v), [0x00, 0x00, 0x20, 0x03, 0xE8, 0x03]);
    }

    #[tokio::test]
    async fn test_out_of_range_accelerometer_sends_nothing() {
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let (sink, mut rx) = Sink::channel(32);
        microbit.device().register_transport(sink).await;

        assert!(microbit.accelerometer(0, 40_000, 0).await.is_err());
        assert!(rx.try_recv().is_err());
    }
}
