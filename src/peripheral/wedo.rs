//! WeDo-style peripheral: motors, tilt and distance sensors on numbered
//! ports.
//!
//! The ports channel announces which device occupies each port when a client
//! first subscribes; the sensor channel streams one value frame per port on
//! every push-loop tick. Motor writes arrive on the control characteristic
//! and are surfaced to the application through an observer hook.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{self, DeviceKind, SensorReading};
use crate::peripheral::{Channel, Device, DeviceModel, Peripheral};
use crate::rpc::ServiceId;

/// Port attach/detach notification service.
pub const PORT_SERVICE: &str = "00001523-1212-efde-1523-785feabcd123";
/// Port attach/detach characteristic.
pub const PORT_CHAR: &str = "00001527-1212-efde-1523-785feabcd123";
/// Sensor value notification service.
pub const SENSOR_SERVICE: &str = "00004f0e-1212-efde-1523-785feabcd123";
/// Sensor value characteristic.
pub const SENSOR_CHAR: &str = "00001560-1212-efde-1523-785feabcd123";
/// Motor/LED control characteristic (write).
pub const CTRL_CHAR: &str = "00001565-1212-efde-1523-785feabcd123";

/// Default push interval for the sensor loop.
pub const DEFAULT_SENSOR_INTERVAL: Duration = Duration::from_millis(500);

/// Power a motor port reports before any write arrives.
const DEFAULT_MOTOR_POWER: u8 = 100;

/// LED palette addressed by `set_light_color`.
const LED_PALETTE: [(u8, u8, u8); 10] = [
    (0, 0, 0),
    (255, 255, 255),
    (255, 0, 0),
    (0, 255, 0),
    (0, 0, 255),
    (255, 255, 0),
    (255, 128, 0),
    (0, 255, 255),
    (255, 0, 255),
    (128, 128, 128),
];

/// Observer hook for motor commands: `(port, power, direction)`.
pub type MotorHook = Box<dyn Fn(u8, u8, i8) + Send + Sync>;

/// Device model for a WeDo peripheral.
pub struct WeDoModel {
    name: String,
    ports: BTreeMap<u8, DeviceKind>,
    motor_power: HashMap<u8, u8>,
    tilt: (u8, u8),
    distance: u8,
    motor_hook: Option<MotorHook>,
}

impl WeDoModel {
    /// Creates a model with the given port layout.
    #[must_use]
    pub fn new(name: impl Into<String>, ports: BTreeMap<u8, DeviceKind>) -> Self {
        let motor_power = ports
            .iter()
            .filter(|(_, kind)| **kind == DeviceKind::Motor)
            .map(|(port, _)| (*port, DEFAULT_MOTOR_POWER))
            .collect();
        Self {
            name: name.into(),
            ports,
            motor_power,
            tilt: (0, 200),
            distance: 0,
            motor_hook: None,
        }
    }

    fn find_port(&self, kind: DeviceKind) -> Option<u8> {
        self.ports
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(port, _)| *port)
    }

    fn sensor_frame(&self, port: u8, kind: DeviceKind) -> Vec<u8> {
        let reading = match kind {
            DeviceKind::Motor => SensorReading::Motor(
                self.motor_power.get(&port).copied().unwrap_or(DEFAULT_MOTOR_POWER),
            ),
            DeviceKind::Tilt => SensorReading::Tilt(self.tilt.0, self.tilt.1),
            DeviceKind::Distance => SensorReading::Distance(self.distance),
        };
        codec::encode_sensor(port, reading)
    }

    /// Stores a distance value, clamped to 0..=255.
    ///
    /// With no distance-capable port configured this is a logged no-op.
    pub fn set_distance(&mut self, value: i32) {
        if self.find_port(DeviceKind::Distance).is_none() {
            tracing::warn!("no distance sensor configured");
            return;
        }
        self.distance = clamp_byte(value);
        tracing::info!(value = self.distance, "distance updated");
    }

    /// Stores tilt x/y, each clamped to 0..=255.
    pub fn set_tilt(&mut self, x: i32, y: i32) {
        self.tilt = (clamp_byte(x), clamp_byte(y));
    }

    /// Current power of a motor port, if one was ever written.
    #[must_use]
    pub fn motor_power(&self, port: u8) -> Option<u8> {
        self.motor_power.get(&port).copied()
    }

    /// Replaces the motor observer hook.
    pub fn set_motor_hook(&mut self, hook: MotorHook) {
        self.motor_hook = Some(hook);
    }
}

impl DeviceModel for WeDoModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn peripheral_id(&self) -> &str {
        "FAKE-WEDO-1234"
    }

    fn channels(&self) -> Vec<Channel> {
        vec![
            Channel::new(PORT_SERVICE.into(), PORT_CHAR.into(), false),
            Channel::new(SENSOR_SERVICE.into(), SENSOR_CHAR.into(), true),
        ]
    }

    fn on_start(&mut self, channel: &Channel) -> Vec<Vec<u8>> {
        if !channel.characteristic.matches(&PORT_CHAR.into()) {
            return Vec::new();
        }
        // one attach frame per configured port, in port order
        self.ports
            .iter()
            .enumerate()
            .map(|(i, (port, kind))| codec::encode_attach(*port, i == 0, *kind))
            .collect()
    }

    fn on_write(&mut self, _service: &ServiceId, characteristic: &ServiceId, payload: &[u8]) {
        if !characteristic.matches(&CTRL_CHAR.into()) {
            return;
        }
        let Some(cmd) = codec::decode_motor_command(payload) else {
            return;
        };
        self.motor_power.insert(cmd.port, cmd.power);
        tracing::info!(
            port = cmd.port,
            power = cmd.power,
            direction = if cmd.direction > 0 { "cw" } else { "ccw" },
            "motor command"
        );
        if let Some(hook) = &self.motor_hook {
            hook(cmd.port, cmd.power, cmd.direction);
        }
    }

    fn tick(&mut self, channel: &Channel) -> Vec<Vec<u8>> {
        if !channel.characteristic.matches(&SENSOR_CHAR.into()) {
            return Vec::new();
        }
        self.ports
            .iter()
            .map(|(port, kind)| self.sensor_frame(*port, *kind))
            .collect()
    }
}

fn clamp_byte(value: i32) -> u8 {
    u8::try_from(value.clamp(0, 255)).unwrap_or(0)
}

/// A simulated WeDo peripheral.
///
/// Clonable handle; clones share the same device state, so one copy can be
/// registered with the hub while another drives the sensors from a scenario
/// script.
#[derive(Clone)]
pub struct WeDoDevice {
    device: Device<WeDoModel>,
}

impl WeDoDevice {
    /// Creates a WeDo peripheral with the given port layout.
    #[must_use]
    pub fn new(name: impl Into<String>, ports: BTreeMap<u8, DeviceKind>) -> Self {
        Self {
            device: Device::new(WeDoModel::new(name, ports), DEFAULT_SENSOR_INTERVAL),
        }
    }

    /// The engine handle, for direct channel operations in embedding code.
    #[must_use]
    pub fn device(&self) -> &Device<WeDoModel> {
        &self.device
    }

    /// An erased handle for hub registration.
    #[must_use]
    pub fn peripheral(&self) -> Arc<dyn Peripheral> {
        Arc::new(self.device.clone())
    }

    /// Sets the simulated distance reading (clamped to 0..=255).
    pub async fn set_distance(&self, value: i32) {
        self.device.with_model(|m| m.set_distance(value)).await;
    }

    /// Sets the simulated tilt reading (each axis clamped to 0..=255).
    pub async fn set_tilt(&self, x: i32, y: i32) {
        self.device.with_model(|m| m.set_tilt(x, y)).await;
    }

    /// Tilts the device up.
    pub async fn tilt_up(&self) {
        self.set_tilt(0, 60).await;
    }

    /// Tilts the device down.
    pub async fn tilt_down(&self) {
        self.set_tilt(0, 30).await;
    }

    /// Tilts the device left.
    pub async fn tilt_left(&self) {
        self.set_tilt(60, 0).await;
    }

    /// Tilts the device right.
    pub async fn tilt_right(&self) {
        self.set_tilt(30, 0).await;
    }

    /// Sets the sensor push interval in seconds (floor 0.05 s).
    pub async fn set_sensor_interval(&self, seconds: f64) {
        let seconds = seconds.max(0.05);
        self.device
            .set_push_interval(Duration::from_secs_f64(seconds))
            .await;
        tracing::info!(interval_s = seconds, "sensor interval updated");
    }

    /// Shows a palette color on the hub LED.
    ///
    /// The simulator only logs the resolved RGB triple.
    pub async fn set_light_color(&self, index: usize) {
        let (r, g, b) = LED_PALETTE[index % LED_PALETTE.len()];
        tracing::info!(index, r, g, b, "led color");
    }

    /// Installs the observer hook for motor commands.
    pub async fn on_motor_power(&self, hook: impl Fn(u8, u8, i8) + Send + Sync + 'static) {
        self.device
            .with_model(|m| m.set_motor_hook(Box::new(hook)))
            .await;
    }

    /// Current power of a motor port.
    pub async fn motor_power(&self, port: u8) -> Option<u8> {
        self.device.with_model(|m| m.motor_power(port)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Sink;
    use serde_json::Value;
    use std::sync::Mutex;

    fn ports(entries: &[(u8, DeviceKind)]) -> BTreeMap<u8, DeviceKind> {
        entries.iter().copied().collect()
    }

    fn payload_of(text: &str) -> Vec<u8> {
        let v: Value = serde_json::from_str(text).unwrap();
        codec::b64_decode(v["params"]["message"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_ports_subscription_sends_attach_frames_in_port_order() {
        let wedo = WeDoDevice::new(
            "Fake-Wedo",
            ports(&[(1, DeviceKind::Motor), (2, DeviceKind::Tilt)]),
        );
        let (sink, mut rx) = Sink::channel(32);
        wedo.device().register_transport(sink).await;

        let svc = ServiceId::from(PORT_SERVICE);
        let chr = ServiceId::from(PORT_CHAR);
        wedo.device().start_notifications(&svc, &chr).await.unwrap();

        let first = payload_of(&rx.recv().await.unwrap());
        assert_eq!(&first[..4], &[1, 0x01, 0x00, 0x01]);

        let second = payload_of(&rx.recv().await.unwrap());
        assert_eq!(&second[..4], &[2, 0x01, 0x01, 0x22]);

        // double start: no further attach frames
        wedo.device().start_notifications(&svc, &chr).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_motor_write_invokes_hook_once() {
        let wedo = WeDoDevice::new("Fake-Wedo", ports(&[(1, DeviceKind::Motor)]));
        let calls: Arc<Mutex<Vec<(u8, u8, i8)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        wedo.on_motor_power(move |port, power, direction| {
            seen.lock().unwrap().push((port, power, direction));
        })
        .await;

        let svc = ServiceId::from(SENSOR_SERVICE);
        let chr = ServiceId::from(CTRL_CHAR);
        wedo.device()
            .write(&svc, &chr, &[1, 0x00, 0x00, 0xFF])
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), &[(1, 1, -1)]);
        assert_eq!(wedo.motor_power(1).await, Some(1));
    }

    #[tokio::test]
    async fn test_short_motor_write_is_ignored() {
        let wedo = WeDoDevice::new("Fake-Wedo", ports(&[(1, DeviceKind::Motor)]));
        let svc = ServiceId::from(SENSOR_SERVICE);
        let chr = ServiceId::from(CTRL_CHAR);
        wedo.device().write(&svc, &chr, &[1, 50]).await.unwrap();
        assert_eq!(wedo.motor_power(1).await, Some(DEFAULT_MOTOR_POWER));
    }

    #[tokio::test]
    async fn test_distance_is_clamped_in_sensor_frame() {
        let wedo = WeDoDevice::new("Fake-Wedo", ports(&[(3, DeviceKind::Distance)]));
        wedo.set_distance(300).await;

        let frames = wedo
            .device()
            .with_model(|m| {
                let channel = Channel::new(SENSOR_SERVICE.into(), SENSOR_CHAR.into(), true);
                m.tick(&channel)
            })
            .await;
        assert_eq!(frames, vec![vec![0x05, 3, 255]]);
    }

    #[tokio::test]
    async fn test_set_distance_without_distance_port_is_a_no_op() {
        let wedo = WeDoDevice::new("Fake-Wedo", ports(&[(1, DeviceKind::Motor)]));
        wedo.set_distance(90).await;

        let frames = wedo
            .device()
            .with_model(|m| {
                let channel = Channel::new(SENSOR_SERVICE.into(), SENSOR_CHAR.into(), true);
                m.tick(&channel)
            })
            .await;
        // only the motor echo frame, untouched by the ignored setter
        assert_eq!(frames, vec![vec![0x05, 1, DEFAULT_MOTOR_POWER]]);
    }

    #[tokio::test]
    async fn test_tilt_helpers_and_clamping() {
        let wedo = WeDoDevice::new("Fake-Wedo", ports(&[(2, DeviceKind::Tilt)]));
        wedo.tilt_up().await;
        let tilt_frame = wedo
            .device()
            .with_model(|m| m.sensor_frame(2, DeviceKind::Tilt))
            .await;
        assert_eq!(tilt_frame, [0x05, 2, 0, 60]);

        wedo.set_tilt(-5, 300).await;
        let tilt_frame = wedo
            .device()
            .with_model(|m| m.sensor_frame(2, DeviceKind::Tilt))
            .await;
        assert_eq!(tilt_frame, [0x05, 2, 0, 255]);
    }

    #[tokio::test]
    async fn test_sensor_interval_floor() {
        let wedo = WeDoDevice::new("Fake-Wedo", ports(&[(2, DeviceKind::Tilt)]));
        wedo.set_sensor_interval(0.0).await;
        assert_eq!(
            wedo.device().push_interval().await,
            Duration::from_millis(50)
        );
    }
}
