//! Event bridge between acquisition threads and async clients
//!
//! Flow per device:
//! acquisition thread → device channel → streaming task → subscriber
//! queues → draining task → client sink.
//!
//! Acquisition threads only `try_send`; the async side only polls with
//! `try_recv`. Neither side ever waits on the other.

pub mod rate;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BridgeSettings;
use crate::device::{lock, DeviceManager};
use crate::events::DeviceEvent;

pub use rate::StreamRate;

/// Identifies one connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

struct Subscription {
    devices: HashSet<u32>,
    queue_tx: Sender<DeviceEvent>,
    queue_rx: Receiver<DeviceEvent>,
    sink: mpsc::Sender<DeviceEvent>,
}

/// Subscriber registry plus the tasks that feed it
pub struct EventBridge {
    settings: BridgeSettings,
    rate: StreamRate,
    next_client: AtomicU64,
    clients: Mutex<HashMap<ClientId, Subscription>>,
    streams: Mutex<HashMap<u32, JoinHandle<()>>>,
}

/// Handles of the bridge's background tasks
pub struct BridgeTasks {
    pub drain: JoinHandle<()>,
    pub watchdog: JoinHandle<()>,
}

impl BridgeTasks {
    pub fn abort(&self) {
        self.drain.abort();
        self.watchdog.abort();
    }
}

impl EventBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        Self {
            rate: StreamRate::from_settings(&settings),
            settings,
            next_client: AtomicU64::new(1),
            clients: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Register a client. Events for it arrive on the returned receiver.
    pub fn connect(&self) -> (ClientId, mpsc::Receiver<DeviceEvent>) {
        let id = ClientId(self.next_client.fetch_add(1, Ordering::Relaxed));
        let (queue_tx, queue_rx) = bounded(self.settings.queue_capacity.max(1));
        let (sink, events) = mpsc::channel(self.settings.sink_capacity.max(1));

        lock(&self.clients).insert(
            id,
            Subscription {
                devices: HashSet::new(),
                queue_tx,
                queue_rx,
                sink,
            },
        );
        info!("{} connected", id);
        (id, events)
    }

    /// Drop a client and everything queued for it
    pub fn disconnect(&self, client: ClientId) {
        if lock(&self.clients).remove(&client).is_some() {
            info!("{} disconnected", client);
        }
    }

    /// Returns false for an unknown client
    pub fn subscribe(&self, client: ClientId, device_index: u32) -> bool {
        match lock(&self.clients).get_mut(&client) {
            Some(sub) => {
                sub.devices.insert(device_index);
                debug!("{} subscribed to device {}", client, device_index);
                true
            }
            None => false,
        }
    }

    /// Returns false for an unknown client. Scanning is unaffected.
    pub fn unsubscribe(&self, client: ClientId, device_index: u32) -> bool {
        match lock(&self.clients).get_mut(&client) {
            Some(sub) => {
                sub.devices.remove(&device_index);
                debug!("{} unsubscribed from device {}", client, device_index);
                true
            }
            None => false,
        }
    }

    pub fn subscriptions(&self, client: ClientId) -> Vec<u32> {
        let mut devices: Vec<u32> = lock(&self.clients)
            .get(&client)
            .map(|sub| sub.devices.iter().copied().collect())
            .unwrap_or_default();
        devices.sort_unstable();
        devices
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Copy `event` into every queue subscribed to its device. A full queue
    /// drops the new event. Returns how many queues accepted it.
    pub fn enqueue(&self, event: &DeviceEvent) -> usize {
        let device_index = event.device_index();
        let clients = lock(&self.clients);
        let mut accepted = 0;

        for (id, sub) in clients.iter() {
            if !sub.devices.contains(&device_index) {
                continue;
            }
            match sub.queue_tx.try_send(event.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("{} queue full, dropping event for device {}", id, device_index);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        accepted
    }

    /// One draining pass: move at most `drain_batch` events per client
    /// into its sink. Clients whose sink is closed are removed. Returns the
    /// number of events forwarded.
    pub fn drain_once(&self) -> usize {
        let mut clients = lock(&self.clients);
        let mut forwarded = 0;
        let mut closed = Vec::new();

        for (id, sub) in clients.iter() {
            if sub.sink.is_closed() {
                closed.push(*id);
                continue;
            }

            // Never pull more than the sink can take right now
            let budget = self.settings.drain_batch.min(sub.sink.capacity());
            for _ in 0..budget {
                let event = match sub.queue_rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                };
                match sub.sink.try_send(event) {
                    Ok(()) => forwarded += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => break,
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                        break;
                    }
                }
            }
        }

        for id in closed {
            clients.remove(&id);
            info!("{} sink closed, removing subscription", id);
        }
        forwarded
    }

    /// Start the draining task and the streaming watchdog. Must be called
    /// from within a tokio runtime.
    pub fn spawn(self: &Arc<Self>, registry: Arc<DeviceManager>) -> BridgeTasks {
        let bridge = self.clone();
        let drain = tokio::spawn(async move {
            let interval = bridge.settings.drain_interval();
            loop {
                bridge.drain_once();
                tokio::time::sleep(interval).await;
            }
        });

        let bridge = self.clone();
        let watchdog = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bridge.settings.watchdog_interval());
            loop {
                ticker.tick().await;
                bridge.reconcile_streams(&registry).await;
            }
        });

        info!(
            "Event bridge started (queue {}, batch {}, max {} FFT points)",
            self.settings.queue_capacity, self.settings.drain_batch, self.settings.max_fft_points
        );
        BridgeTasks { drain, watchdog }
    }

    /// Start missing streaming tasks, restart finished ones and abort those
    /// whose device is gone.
    pub async fn reconcile_streams(self: &Arc<Self>, registry: &DeviceManager) {
        let sources: HashMap<u32, Receiver<DeviceEvent>> = registry.event_sources().into_iter().collect();

        let finished: Vec<(u32, JoinHandle<()>)> = {
            let mut streams = lock(&self.streams);

            let removed: Vec<u32> = streams
                .keys()
                .copied()
                .filter(|index| !sources.contains_key(index))
                .collect();
            for index in removed {
                if let Some(task) = streams.remove(&index) {
                    task.abort();
                    info!("Stopped streaming task for removed device {}", index);
                }
            }

            let done: Vec<u32> = streams
                .iter()
                .filter(|(_, task)| task.is_finished())
                .map(|(index, _)| *index)
                .collect();
            done.into_iter()
                .filter_map(|index| streams.remove(&index).map(|task| (index, task)))
                .collect()
        };

        for (index, task) in finished {
            match task.await {
                Ok(()) => warn!("Streaming task for device {} exited, restarting", index),
                Err(e) if e.is_panic() => error!(
                    "Streaming task for device {} panicked: {}, restarting",
                    index,
                    panic_message(e.into_panic())
                ),
                Err(e) => warn!("Streaming task for device {} ended: {}, restarting", index, e),
            }
        }

        let mut streams = lock(&self.streams);
        for (index, source) in sources {
            if streams.contains_key(&index) {
                continue;
            }
            let bridge = self.clone();
            streams.insert(index, tokio::spawn(bridge.stream_device(index, source)));
            debug!("Streaming task started for device {}", index);
        }
    }

    /// Indices with a live streaming task
    pub fn streaming_devices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = lock(&self.streams)
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(index, _)| *index)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Abort every streaming task
    pub fn shutdown(&self) {
        for (_, task) in lock(&self.streams).drain() {
            task.abort();
        }
    }

    /// Per-device streaming loop: bursts go out as they arrive, FFT frames
    /// are coalesced to the latest and paced by [`StreamRate`].
    async fn stream_device(self: Arc<Self>, index: u32, source: Receiver<DeviceEvent>) {
        loop {
            let mut latest_fft = None;
            loop {
                match source.try_recv() {
                    Ok(DeviceEvent::FftData(frame)) => latest_fft = Some(frame),
                    Ok(burst) => {
                        self.enqueue(&burst);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("Device {} event channel closed", index);
                        return;
                    }
                }
            }

            if let Some(frame) = latest_fft {
                let frame = frame.decimate(self.settings.max_fft_points);
                self.enqueue(&DeviceEvent::FftData(frame));
            }

            tokio::time::sleep(self.rate.interval(self.client_count())).await;
        }
    }
}

/// Text of a panic payload, when it carries one
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<&'static str>() {
        Ok(msg) => (*msg).to_string(),
        Err(payload) => match payload.downcast::<String>() {
            Ok(msg) => *msg,
            Err(_) => "unknown panic".to_string(),
        },
    }
}
