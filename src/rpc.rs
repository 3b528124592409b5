//! JSON-RPC 2.0 envelope types for the Scratch Link wire protocol.
//!
//! Inbound messages are requests (`{id, method, params}`); outbound messages
//! are either correlated results (`{id, result}`) or unsolicited
//! notifications (`{method, params}`, no `id`). Characteristic payloads ride
//! inside `params.message` as base64 text.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::codec;

/// Protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Simulated signal strength reported in `didDiscoverPeripheral`.
pub const SIMULATED_RSSI: i32 = -40;

/// A service or characteristic identifier.
///
/// Scratch Link extensions address GATT services either by a bare number
/// (micro:bit) or by a full UUID string (WeDo), so both spellings must
/// round-trip through the wire format unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceId {
    /// Numeric service identifier (e.g. `61445`).
    Number(u64),
    /// UUID string identifier.
    Uuid(String),
}

impl ServiceId {
    /// Compares two identifiers, case-insensitively for UUID strings.
    ///
    /// BLE UUIDs are case-insensitive and clients are inconsistent about
    /// casing, so string comparison must ignore it.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

impl From<u64> for ServiceId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self::Uuid(s.to_owned())
    }
}

/// RPC method names understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Scan request; answered with a result plus `didDiscoverPeripheral`.
    Discover,
    /// Connect to the discovered peripheral.
    Connect,
    /// Subscribe to a characteristic.
    StartNotifications,
    /// Unsubscribe from a characteristic.
    StopNotifications,
    /// Write a payload to a characteristic.
    Write,
    /// Read a characteristic, optionally starting notifications.
    Read,
}

impl Method {
    /// Looks up a method by its wire name.
    ///
    /// Returns `None` for unrecognized methods; the dispatcher answers those
    /// with a bare ack rather than failing the session.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "discover" => Some(Self::Discover),
            "connect" => Some(Self::Connect),
            "startNotifications" => Some(Self::StartNotifications),
            "stopNotifications" => Some(Self::StopNotifications),
            "write" => Some(Self::Write),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// Parameters of an inbound request.
///
/// Every field is optional on the wire; handlers decide what is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Params {
    /// Target service.
    pub service_id: Option<ServiceId>,
    /// Target characteristic.
    pub characteristic_id: Option<ServiceId>,
    /// Base64-encoded payload for `write`.
    pub message: Option<String>,
    /// Payload encoding label (always `"base64"` in practice).
    pub encoding: Option<String>,
    /// `read` side channel: `true` requests notification start.
    pub start_notifications: Option<bool>,
}

/// An inbound JSON-RPC request.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Protocol version; tolerated if absent.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Correlation id; `None` or JSON null means "no ack expected".
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Params,
}

impl Request {
    /// Returns the correlation id, treating JSON null as absent.
    #[must_use]
    pub fn request_id(&self) -> Option<&Value> {
        self.id.as_ref().filter(|id| !id.is_null())
    }
}

/// Builds the `{id, result: {}}` ack for a request.
#[must_use]
pub fn ack(id: &Value) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": {},
    })
    .to_string()
}

/// Builds the unsolicited `didDiscoverPeripheral` notification.
#[must_use]
pub fn did_discover(name: &str, peripheral_id: &str, rssi: i32) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": "didDiscoverPeripheral",
        "params": {
            "name": name,
            "peripheralId": peripheral_id,
            "rssi": rssi,
        },
    })
    .to_string()
}

/// Builds a `characteristicDidChange` notification carrying `payload`.
#[must_use]
pub fn characteristic_did_change(
    service: &ServiceId,
    characteristic: &ServiceId,
    payload: &[u8],
) -> String {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": "characteristicDidChange",
        "params": {
            "serviceId": service,
            "characteristicId": characteristic,
            "encoding": "base64",
            "message": codec::b64_encode(payload),
        },
    })
    .to_string()
}
