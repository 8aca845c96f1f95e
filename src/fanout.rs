//! Live fan-out of vehicle updates to WebSocket subscribers.
//!
//! A new subscriber first receives one snapshot frame per cached vehicle in
//! cache iteration order, then joins the broadcast set. Two frame kinds
//! exist, both versioned: `vehicle_update` and `vehicle_remove`. Slow
//! subscribers are dropped rather than buffered without bound: a subscriber
//! whose queued outbound bytes exceed the configured threshold loses the
//! frame and the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use crate::cache::SharedVehicleCache;
use crate::config::WebSocketConfig;
use crate::model::{format_rfc3339, EnrichedVehicle};

/// Outbound frame on the push channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Latest state of one vehicle.
    #[serde(rename_all = "camelCase")]
    VehicleUpdate {
        /// Payload version; subscribers ignore versions they do not know.
        version: u32,
        /// Vehicle identifier.
        vehicle_id: String,
        /// Reported position.
        position: WirePosition,
        /// Observation detail.
        telemetry: WireTelemetry,
        /// Fields the dashboard filters on.
        filters: WireFilters,
        /// Server-side ingestion instant, RFC 3339.
        last_seen: String,
    },
    /// A vehicle left the cache through expiry.
    #[serde(rename_all = "camelCase")]
    VehicleRemove {
        /// Payload version.
        version: u32,
        /// Vehicle identifier.
        vehicle_id: String,
    },
}

/// Position with non-finite numbers nulled out.
#[derive(Debug, Clone, Serialize)]
pub struct WirePosition {
    /// Latitude in degrees.
    pub lat: Option<f64>,
    /// Longitude in degrees.
    pub lng: Option<f64>,
}

/// Observation detail of an update frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTelemetry {
    /// Observation instant, RFC 3339.
    pub timestamp: String,
    /// Derived speed in km/h.
    pub speed: Option<f64>,
    /// Fuel level percentage.
    pub fuel_level: Option<f64>,
    /// Engine status.
    pub engine_status: String,
}

/// Filterable fields duplicated at the top of the frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFilters {
    /// Engine status.
    pub engine_status: String,
    /// Fuel level percentage.
    pub fuel_level: Option<f64>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

struct Subscriber {
    tx: UnboundedSender<Message>,
    queued_bytes: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
}

struct HubInner {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

/// The broadcast set and its policy knobs.
///
/// The hub reads cache snapshots through an injected handle but never
/// mutates the cache; the cache notifies the hub of expiries through a
/// callback wired up at startup.
pub struct FanoutHub {
    cache: SharedVehicleCache,
    inner: Mutex<HubInner>,
    payload_version: u32,
    buffer_limit: usize,
}

/// One attached subscriber's receiving half.
pub struct SubscriberConn {
    id: u64,
    rx: UnboundedReceiver<Message>,
    queued_bytes: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
}

impl SubscriberConn {
    /// Receives the next queued frame.
    pub async fn recv(&mut self) -> Option<Message> {
        let msg = self.rx.recv().await?;
        if let Message::Text(text) = &msg {
            self.queued_bytes.fetch_sub(text.len(), Ordering::AcqRel);
        }
        Some(msg)
    }

    /// Receives without waiting, if a frame is queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        let msg = self.rx.try_recv().ok()?;
        if let Message::Text(text) = &msg {
            self.queued_bytes.fetch_sub(text.len(), Ordering::AcqRel);
        }
        Some(msg)
    }
}

impl FanoutHub {
    /// Creates a hub serving snapshots from `cache`.
    pub fn new(cache: SharedVehicleCache, config: &WebSocketConfig) -> Self {
        Self {
            cache,
            inner: Mutex::new(HubInner {
                next_id: 0,
                subscribers: HashMap::new(),
            }),
            payload_version: config.payload_version,
            buffer_limit: config.buffer_limit_bytes,
        }
    }

    /// Number of attached subscribers.
    pub fn connected_clients(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Builds the update frame for one vehicle.
    pub fn update_frame(&self, vehicle: &EnrichedVehicle) -> Frame {
        let rec = &vehicle.record;
        let status = rec.engine_status.as_str().to_string();
        Frame::VehicleUpdate {
            version: self.payload_version,
            vehicle_id: rec.vehicle_id.clone(),
            position: WirePosition {
                lat: finite(rec.position.lat),
                lng: finite(rec.position.lng),
            },
            telemetry: WireTelemetry {
                timestamp: format_rfc3339(rec.timestamp),
                speed: finite(vehicle.speed_kmh),
                fuel_level: finite(rec.fuel_level),
                engine_status: status.clone(),
            },
            filters: WireFilters {
                engine_status: status,
                fuel_level: finite(rec.fuel_level),
            },
            last_seen: format_rfc3339(vehicle.last_seen),
        }
    }

    /// Broadcasts the latest state of one vehicle.
    pub fn broadcast_update(&self, vehicle: &EnrichedVehicle) {
        let frame = self.update_frame(vehicle);
        self.broadcast(&frame);
    }

    /// Broadcasts the removal of an expired vehicle.
    pub fn broadcast_remove(&self, vehicle_id: &str) {
        let frame = Frame::VehicleRemove {
            version: self.payload_version,
            vehicle_id: vehicle_id.to_string(),
        };
        self.broadcast(&frame);
    }

    fn broadcast(&self, frame: &Frame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                error!(error = %err, "frame serialisation failed");
                return;
            }
        };
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|id, sub| {
            if !sub.open.load(Ordering::Acquire) {
                debug!(subscriber = *id, "removing closed subscriber");
                return false;
            }
            if sub.queued_bytes.load(Ordering::Acquire) > self.buffer_limit {
                warn!(
                    subscriber = *id,
                    limit_bytes = self.buffer_limit,
                    "subscriber outbound buffer over threshold, dropping"
                );
                sub.open.store(false, Ordering::Release);
                return false;
            }
            sub.queued_bytes.fetch_add(text.len(), Ordering::AcqRel);
            if sub.tx.send(Message::Text(text.clone())).is_err() {
                warn!(subscriber = *id, "subscriber channel gone, dropping");
                return false;
            }
            true
        });
    }

    /// Registers a subscriber: enqueues one snapshot frame per cached
    /// vehicle, oldest first, then joins the broadcast set. Both happen
    /// under the hub lock so no broadcast can interleave before the
    /// snapshot.
    pub fn attach(&self) -> SubscriberConn {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued_bytes = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(true));

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        for vehicle in self.cache.read().snapshot() {
            let frame = self.update_frame(&vehicle);
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    queued_bytes.fetch_add(text.len(), Ordering::AcqRel);
                    let _ = tx.send(Message::Text(text));
                }
                Err(err) => error!(error = %err, "snapshot frame serialisation failed"),
            }
        }
        inner.subscribers.insert(
            id,
            Subscriber {
                tx,
                queued_bytes: queued_bytes.clone(),
                open: open.clone(),
            },
        );
        debug!(subscriber = id, "subscriber attached");
        SubscriberConn {
            id,
            rx,
            queued_bytes,
            open,
        }
    }

    /// Removes a subscriber if it is still registered.
    pub fn detach(&self, conn: &SubscriberConn) {
        conn.open.store(false, Ordering::Release);
        self.detach_id(conn.id);
    }

    fn detach_id(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
        debug!(subscriber = id, "subscriber detached");
    }

    /// Drops every subscriber, closing their transports.
    pub fn close_all(&self) {
        let mut inner = self.inner.lock();
        for (_, sub) in inner.subscribers.drain() {
            sub.open.store(false, Ordering::Release);
        }
    }

    /// Drives one WebSocket connection until either side closes it.
    ///
    /// Inbound frames are read and ignored; the fan-out is one-directional.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let SubscriberConn {
            id,
            mut rx,
            queued_bytes,
            open,
        } = self.attach();

        let writer_open = open.clone();
        let writer = async move {
            while let Some(msg) = rx.recv().await {
                let len = match &msg {
                    Message::Text(text) => text.len(),
                    _ => 0,
                };
                if sink.send(msg).await.is_err() {
                    writer_open.store(false, Ordering::Release);
                    break;
                }
                queued_bytes.fetch_sub(len, Ordering::AcqRel);
            }
            let _ = sink.send(Message::Close(None)).await;
        };
        let reader = async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        tokio::select! {
            _ = writer => {}
            _ = reader => {}
        }
        open.store(false, Ordering::Release);
        self.detach_id(id);
    }
}
