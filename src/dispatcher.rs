//! Per-session JSON-RPC method router.
//!
//! One dispatcher per WebSocket session. Inbound messages are processed in
//! arrival order; each request with a non-null id gets exactly one
//! correlated ack, and channel-addressed side effects fan out to every
//! registered peripheral (pairs a peripheral does not expose are no-ops for
//! it). A malformed message or failing handler is logged and dropped; only
//! a dead transport ends the session.

use std::sync::Arc;

use crate::codec;
use crate::error::{Error, Result};
use crate::peripheral::Peripheral;
use crate::rpc::{self, Method, Params, Request};
use crate::transport::Sink;

/// Routes inbound RPC messages to the registered peripherals.
pub struct Dispatcher {
    peripherals: Vec<Arc<dyn Peripheral>>,
    sink: Sink,
}

impl Dispatcher {
    /// Creates a dispatcher for one session.
    #[must_use]
    pub fn new(peripherals: Vec<Arc<dyn Peripheral>>, sink: Sink) -> Self {
        Self { peripherals, sink }
    }

    /// Handles one raw inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error only when the outbound transport is gone; every
    /// other problem is logged and tolerated.
    pub async fn dispatch(&self, raw: &str) -> Result<()> {
        let request: Request = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("dropping malformed message: {e}");
                return Ok(());
            }
        };
        tracing::debug!(method = %request.method, "rpc request");

        let outcome = self.handle(&request).await;
        match outcome {
            Err(Error::TransportClosed) => Err(Error::TransportClosed),
            Err(e) => {
                tracing::warn!(method = %request.method, "rpc handler failed: {e}");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn handle(&self, request: &Request) -> Result<()> {
        match Method::from_name(&request.method) {
            Some(Method::Discover) => {
                self.ack(request).await?;
                for peripheral in &self.peripherals {
                    let adv = peripheral.advertisement();
                    self.sink
                        .send(rpc::did_discover(&adv.name, &adv.peripheral_id, adv.rssi))
                        .await?;
                }
                Ok(())
            }
            Some(Method::Connect) => self.ack(request).await,
            Some(Method::StartNotifications) => {
                self.ack(request).await?;
                self.fan_start(&request.params).await
            }
            Some(Method::StopNotifications) => {
                self.ack(request).await?;
                self.fan_stop(&request.params).await
            }
            Some(Method::Write) => {
                self.fan_write(&request.params).await?;
                self.ack(request).await
            }
            Some(Method::Read) => {
                self.ack(request).await?;
                if request.params.start_notifications == Some(true) {
                    self.fan_start(&request.params).await
                } else {
                    Ok(())
                }
            }
            None => {
                tracing::debug!(method = %request.method, "unrecognized method, acking");
                self.ack(request).await
            }
        }
    }

    async fn ack(&self, request: &Request) -> Result<()> {
        if let Some(id) = request.request_id() {
            self.sink.send(rpc::ack(id)).await?;
        }
        Ok(())
    }

    async fn fan_start(&self, params: &Params) -> Result<()> {
        let (Some(service), Some(characteristic)) =
            (&params.service_id, &params.characteristic_id)
        else {
            tracing::warn!("startNotifications without serviceId/characteristicId");
            return Ok(());
        };
        for peripheral in &self.peripherals {
            peripheral
                .start_notifications(service, characteristic)
                .await?;
        }
        Ok(())
    }

    async fn fan_stop(&self, params: &Params) -> Result<()> {
        let (Some(service), Some(characteristic)) =
            (&params.service_id, &params.characteristic_id)
        else {
            tracing::warn!("stopNotifications without serviceId/characteristicId");
            return Ok(());
        };
        for peripheral in &self.peripherals {
            peripheral
                .stop_notifications(service, characteristic)
                .await?;
        }
        Ok(())
    }

    async fn fan_write(&self, params: &Params) -> Result<()> {
        let (Some(service), Some(characteristic)) =
            (&params.service_id, &params.characteristic_id)
        else {
            tracing::warn!("write without serviceId/characteristicId");
            return Ok(());
        };
        let payload = codec::b64_decode(params.message.as_deref().unwrap_or_default());
        for peripheral in &self.peripherals {
            peripheral.write(service, characteristic, &payload).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeviceKind;
    use crate::peripheral::microbit::MicrobitDevice;
    use crate::peripheral::wedo::{self, WeDoDevice};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn wedo_with_ports(entries: &[(u8, DeviceKind)]) -> WeDoDevice {
        WeDoDevice::new("Fake-Wedo", entries.iter().copied().collect::<BTreeMap<_, _>>())
    }

    async fn session(
        devices: Vec<Arc<dyn Peripheral>>,
    ) -> (Dispatcher, mpsc::Receiver<String>) {
        let (sink, rx) = Sink::channel(64);
        for device in &devices {
            device.register_transport(sink.clone()).await;
        }
        (Dispatcher::new(devices, sink), rx)
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    fn payload_of(v: &Value) -> Vec<u8> {
        codec::b64_decode(v["params"]["message"].as_str().unwrap())
    }

    #[tokio::test]
    async fn test_start_notifications_acks_then_attaches() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor), (2, DeviceKind::Tilt)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        let raw = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "startNotifications",
            "params": {
                "serviceId": wedo::PORT_SERVICE,
                "characteristicId": wedo::PORT_CHAR,
            },
        })
        .to_string();
        dispatcher.dispatch(&raw).await.unwrap();

        // ack first, correlated by id
        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 5);

        // then exactly one attach frame per port, type code at byte 3
        let first = parse(&rx.recv().await.unwrap());
        assert_eq!(first["method"], "characteristicDidChange");
        assert_eq!(payload_of(&first)[3], 0x01);

        let second = parse(&rx.recv().await.unwrap());
        assert_eq!(payload_of(&second)[3], 0x22);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_motor_write_scenario() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let calls: Arc<Mutex<Vec<(u8, u8, i8)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        wedo.on_motor_power(move |port, power, direction| {
            seen.lock().unwrap().push((port, power, direction));
        })
        .await;
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        let raw = json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "write",
            "params": {
                "serviceId": wedo::SENSOR_SERVICE,
                "characteristicId": wedo::CTRL_CHAR,
                "message": codec::b64_encode(&[1, 0x00, 0x00, 0xFF]),
                "encoding": "base64",
            },
        })
        .to_string();
        dispatcher.dispatch(&raw).await.unwrap();

        assert_eq!(calls.lock().unwrap().as_slice(), &[(1, 1, -1)]);
        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 9);
    }

    #[tokio::test]
    async fn test_discover_advertises_every_peripheral() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let (dispatcher, mut rx) =
            session(vec![wedo.peripheral(), microbit.peripheral()]).await;

        dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":1,"method":"discover","params":{}}"#)
            .await
            .unwrap();

        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 1);

        let first = parse(&rx.recv().await.unwrap());
        assert_eq!(first["method"], "didDiscoverPeripheral");
        assert_eq!(first["params"]["peripheralId"], "FAKE-WEDO-1234");
        assert_eq!(first["params"]["rssi"], -40);

        let second = parse(&rx.recv().await.unwrap());
        assert_eq!(second["params"]["peripheralId"], "FAKE-MICROBIT-1234");
    }

    #[tokio::test]
    async fn test_unmatched_pairs_are_no_ops_for_other_peripherals() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor), (2, DeviceKind::Tilt)]);
        let microbit = MicrobitDevice::new("Fake-Microbit");
        let (dispatcher, mut rx) =
            session(vec![wedo.peripheral(), microbit.peripheral()]).await;

        // addressed at the WeDo ports channel only
        let raw = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "startNotifications",
            "params": {
                "serviceId": wedo::PORT_SERVICE,
                "characteristicId": wedo::PORT_CHAR,
            },
        })
        .to_string();
        dispatcher.dispatch(&raw).await.unwrap();

        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 2);
        // two attach frames from the WeDo, nothing from the micro:bit
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_method_gets_fallback_ack() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":3,"method":"getVersion","params":{}}"#)
            .await
            .unwrap();

        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_json_is_dropped_quietly() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        dispatcher.dispatch("{not json").await.unwrap();
        dispatcher.dispatch("42").await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_ids_ack_without_side_effects() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor), (2, DeviceKind::Tilt)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        dispatcher
            .dispatch(r#"{"jsonrpc":"2.0","id":4,"method":"startNotifications","params":{}}"#)
            .await
            .unwrap();

        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_without_start_still_acks() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        let raw = json!({
            "jsonrpc": "2.0",
            "id": 6,
            "method": "stopNotifications",
            "params": {
                "serviceId": wedo::SENSOR_SERVICE,
                "characteristicId": wedo::SENSOR_CHAR,
            },
        })
        .to_string();
        dispatcher.dispatch(&raw).await.unwrap();

        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 6);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_with_start_notifications_delegates() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        let raw = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "read",
            "params": {
                "serviceId": wedo::PORT_SERVICE,
                "characteristicId": wedo::PORT_CHAR,
                "startNotifications": true,
            },
        })
        .to_string();
        dispatcher.dispatch(&raw).await.unwrap();

        let ack = parse(&rx.recv().await.unwrap());
        assert_eq!(ack["id"], 7);
        let attach = parse(&rx.recv().await.unwrap());
        assert_eq!(attach["method"], "characteristicDidChange");
    }

    #[tokio::test]
    async fn test_write_without_id_gets_no_ack() {
        let wedo = wedo_with_ports(&[(1, DeviceKind::Motor)]);
        let (dispatcher, mut rx) = session(vec![wedo.peripheral()]).await;

        let raw = json!({
            "jsonrpc": "2.0",
            "method": "write",
            "params": {
                "serviceId": wedo::SENSOR_SERVICE,
                "characteristicId": wedo::CTRL_CHAR,
                "message": codec::b64_encode(&[1, 0x00, 50]),
            },
        })
        .to_string();
        dispatcher.dispatch(&raw).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(wedo.motor_power(1).await, Some(50));
    }
}
