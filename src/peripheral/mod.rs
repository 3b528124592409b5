//! Per-peripheral protocol engine.
//!
//! A peripheral is composed of two halves: a [`DeviceModel`] holding the
//! device-specific behavior (capability table, activation side effects,
//! write decoding, periodic frames) and the generic [`Device`] engine that
//! owns the notification lifecycle — subscription flags, push-loop task
//! handles, and the attached transport. The session layer talks to
//! peripherals through the object-safe [`Peripheral`] trait.

pub mod microbit;
pub mod wedo;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::rpc::{self, ServiceId};
use crate::transport::Sink;

/// Lower bound on the push interval, bounding resource use.
pub const MIN_PUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Discovery advertisement data for a peripheral.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Peripheral display name.
    pub name: String,
    /// Stable peripheral identifier.
    pub peripheral_id: String,
    /// Simulated signal strength.
    pub rssi: i32,
}

/// One notifiable characteristic in a peripheral's capability table.
///
/// The table is fixed for the peripheral's lifetime; there is no hot-plug.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Owning service.
    pub service: ServiceId,
    /// Characteristic within the service.
    pub characteristic: ServiceId,
    /// Whether an active subscription runs a periodic push loop.
    pub streamed: bool,
}

impl Channel {
    /// Creates a channel entry.
    #[must_use]
    pub const fn new(service: ServiceId, characteristic: ServiceId, streamed: bool) -> Self {
        Self {
            service,
            characteristic,
            streamed,
        }
    }

    /// Returns true if this channel is addressed by the given pair.
    #[must_use]
    pub fn matches(&self, service: &ServiceId, characteristic: &ServiceId) -> bool {
        self.service.matches(service) && self.characteristic.matches(characteristic)
    }
}

/// Device-specific behavior behind the generic engine.
///
/// Implementations are plain synchronous state machines; all I/O and
/// concurrency lives in [`Device`].
pub trait DeviceModel: Send + 'static {
    /// Peripheral display name.
    fn name(&self) -> &str;

    /// Stable peripheral identifier for discovery.
    fn peripheral_id(&self) -> &str;

    /// The fixed capability table.
    fn channels(&self) -> Vec<Channel>;

    /// Frames to emit when a subscription first activates, in order.
    fn on_start(&mut self, _channel: &Channel) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Called after a subscription deactivates and its loop has stopped.
    fn on_stop(&mut self, _channel: &Channel) {}

    /// Handles a decoded write payload addressed to this peripheral.
    ///
    /// Pairs that do not concern this peripheral must be ignored.
    fn on_write(&mut self, _service: &ServiceId, _characteristic: &ServiceId, _payload: &[u8]) {}

    /// Frames for one push-loop iteration of a streamed channel.
    fn tick(&mut self, _channel: &Channel) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

/// Subscription state for one channel.
#[derive(Default)]
struct Slot {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

struct Shared<M> {
    name: String,
    peripheral_id: String,
    channels: Vec<Channel>,
    model: Mutex<M>,
    transport: RwLock<Option<Sink>>,
    subs: Mutex<Vec<Slot>>,
    interval: RwLock<Duration>,
}

/// Generic peripheral engine: a cheaply clonable handle around shared state.
pub struct Device<M: DeviceModel> {
    shared: Arc<Shared<M>>,
}

impl<M: DeviceModel> Clone for Device<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: DeviceModel> Device<M> {
    /// Creates an engine around `model` pushing at `interval`.
    ///
    /// The interval is clamped to [`MIN_PUSH_INTERVAL`].
    #[must_use]
    pub fn new(model: M, interval: Duration) -> Self {
        let channels = model.channels();
        let subs = channels.iter().map(|_| Slot::default()).collect();
        let shared = Shared {
            name: model.name().to_owned(),
            peripheral_id: model.peripheral_id().to_owned(),
            channels,
            model: Mutex::new(model),
            transport: RwLock::new(None),
            subs: Mutex::new(subs),
            interval: RwLock::new(interval.max(MIN_PUSH_INTERVAL)),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Peripheral display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Discovery advertisement for this peripheral.
    #[must_use]
    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            name: self.shared.name.clone(),
            peripheral_id: self.shared.peripheral_id.clone(),
            rssi: rpc::SIMULATED_RSSI,
        }
    }

    /// Updates the push interval, clamped to [`MIN_PUSH_INTERVAL`].
    pub async fn set_push_interval(&self, interval: Duration) {
        *self.shared.interval.write().await = interval.max(MIN_PUSH_INTERVAL);
    }

    /// Current push interval.
    pub async fn push_interval(&self) -> Duration {
        *self.shared.interval.read().await
    }

    /// Runs a closure against the locked device model.
    pub async fn with_model<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut model = self.shared.model.lock().await;
        f(&mut model)
    }

    /// Attaches the session transport.
    pub async fn register_transport(&self, sink: Sink) {
        *self.shared.transport.write().await = Some(sink);
    }

    /// Returns true while a transport is attached.
    pub async fn is_connected(&self) -> bool {
        self.shared.transport.read().await.is_some()
    }

    /// Sends one `characteristicDidChange` notification immediately.
    ///
    /// A missing transport is a silent no-op: event notifications fired
    /// while no client is attached simply go nowhere.
    pub async fn notify(
        &self,
        service: &ServiceId,
        characteristic: &ServiceId,
        payload: &[u8],
    ) -> Result<()> {
        let sink = self.shared.transport.read().await.clone();
        let Some(sink) = sink else {
            return Ok(());
        };
        sink.send(rpc::characteristic_did_change(service, characteristic, payload))
            .await
    }

    fn find_channel(&self, service: &ServiceId, characteristic: &ServiceId) -> Option<usize> {
        self.shared
            .channels
            .iter()
            .position(|c| c.matches(service, characteristic))
    }

    /// Activates a subscription if the pair addresses one of our channels.
    ///
    /// Re-activating an already-active subscription is an explicit no-op:
    /// the flag guards both the activation side effects and the loop spawn,
    /// so a double start can never duplicate attach frames or tasks.
    pub async fn start_notifications(
        &self,
        service: &ServiceId,
        characteristic: &ServiceId,
    ) -> Result<()> {
        let Some(idx) = self.find_channel(service, characteristic) else {
            return Ok(());
        };
        let mut subs = self.shared.subs.lock().await;
        let slot = &mut subs[idx];
        if slot.active.load(Ordering::SeqCst) {
            tracing::trace!(peripheral = %self.shared.name, "subscription already active");
            return Ok(());
        }
        slot.active.store(true, Ordering::SeqCst);

        let channel = &self.shared.channels[idx];
        let frames = {
            let mut model = self.shared.model.lock().await;
            model.on_start(channel)
        };
        if !frames.is_empty() {
            let sink = self.shared.transport.read().await.clone();
            if let Some(sink) = sink {
                for payload in frames {
                    sink.send(rpc::characteristic_did_change(
                        &channel.service,
                        &channel.characteristic,
                        &payload,
                    ))
                    .await?;
                }
            }
        }

        if channel.streamed && slot.task.is_none() {
            let shared = Arc::clone(&self.shared);
            let active = Arc::clone(&slot.active);
            slot.task = Some(tokio::spawn(push_loop(shared, idx, active)));
        }
        Ok(())
    }

    /// Deactivates a subscription and joins its push loop.
    ///
    /// The task handle is aborted and awaited before this returns, so a
    /// subsequent start can never race a half-cancelled loop. Stopping an
    /// inactive subscription leaves state unchanged.
    pub async fn stop_notifications(
        &self,
        service: &ServiceId,
        characteristic: &ServiceId,
    ) -> Result<()> {
        let Some(idx) = self.find_channel(service, characteristic) else {
            return Ok(());
        };
        let mut subs = self.shared.subs.lock().await;
        let slot = &mut subs[idx];
        let was_active = slot.active.swap(false, Ordering::SeqCst);
        if let Some(task) = slot.task.take() {
            task.abort();
            let _ = task.await;
        }
        if was_active {
            let mut model = self.shared.model.lock().await;
            model.on_stop(&self.shared.channels[idx]);
        }
        Ok(())
    }

    /// Routes a decoded write payload into the model.
    pub async fn write(
        &self,
        service: &ServiceId,
        characteristic: &ServiceId,
        payload: &[u8],
    ) -> Result<()> {
        let mut model = self.shared.model.lock().await;
        model.on_write(service, characteristic, payload);
        Ok(())
    }

    /// Tears down the session: clears the transport and joins every loop.
    pub async fn on_disconnect(&self) {
        *self.shared.transport.write().await = None;
        let mut subs = self.shared.subs.lock().await;
        for slot in subs.iter_mut() {
            slot.active.store(false, Ordering::SeqCst);
            if let Some(task) = slot.task.take() {
                task.abort();
                let _ = task.await;
            }
        }
    }
}

/// Periodic notification loop for one streamed subscription.
///
/// Sleeps, re-checks the flag, then emits the model's tick frames. A send
/// failure means the peer is gone; the loop ends silently.
async fn push_loop<M: DeviceModel>(shared: Arc<Shared<M>>, idx: usize, active: Arc<AtomicBool>) {
    loop {
        let interval = *shared.interval.read().await;
        tokio::time::sleep(interval).await;
        if !active.load(Ordering::SeqCst) {
            break;
        }
        let frames = {
            let mut model = shared.model.lock().await;
            model.tick(&shared.channels[idx])
        };
        let Some(sink) = shared.transport.read().await.clone() else {
            break;
        };
        let channel = &shared.channels[idx];
        for payload in frames {
            let text = rpc::characteristic_did_change(
                &channel.service,
                &channel.characteristic,
                &payload,
            );
            if sink.send(text).await.is_err() {
                tracing::debug!(peripheral = %shared.name, "transport closed, push loop ending");
                return;
            }
        }
    }
}

/// Object-safe peripheral interface consumed by the session layer.
pub trait Peripheral: Send + Sync {
    /// Discovery advertisement.
    fn advertisement(&self) -> Advertisement;

    /// Attaches the session transport.
    fn register_transport(&self, sink: Sink) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Activates a matching subscription.
    fn start_notifications<'a>(
        &'a self,
        service: &'a ServiceId,
        characteristic: &'a ServiceId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Deactivates a matching subscription.
    fn stop_notifications<'a>(
        &'a self,
        service: &'a ServiceId,
        characteristic: &'a ServiceId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Delivers a write payload.
    fn write<'a>(
        &'a self,
        service: &'a ServiceId,
        characteristic: &'a ServiceId,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Tears down all session state.
    fn on_disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

impl<M: DeviceModel> Peripheral for Device<M> {
    fn advertisement(&self) -> Advertisement {
        Self::advertisement(self)
    }

    fn register_transport(&self, sink: Sink) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move { Self::register_transport(self, sink).await })
    }

    fn start_notifications<'a>(
        &'a self,
        service: &'a ServiceId,
        characteristic: &'a ServiceId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Self::start_notifications(self, service, characteristic))
    }

    fn stop_notifications<'a>(
        &'a self,
        service: &'a ServiceId,
        characteristic: &'a ServiceId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Self::stop_notifications(self, service, characteristic))
    }

    fn write<'a>(
        &'a self,
        service: &'a ServiceId,
        characteristic: &'a ServiceId,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(Self::write(self, service, characteristic, payload))
    }

    fn on_disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(Self::on_disconnect(self))
    }
}
