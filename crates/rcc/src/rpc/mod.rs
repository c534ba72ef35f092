pub mod events;
mod wire;

pub use events::{Event, EventBus};

use crate::error::{RpcError, WorkerError};
use crate::registry::{Registry, ResourceId};
use crate::worker::WorkerAdapter;
use bytes::Bytes;
use rcc_config::WorkerSettings;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, warn};
use wire::{WireMessage, WireRequest};

type ResponseSlot = oneshot::Sender<Result<Value, RpcError>>;

/// Typed request/response and notification fan-out layered over a single
/// worker's [`WorkerAdapter`] (spec.md §4.C). One `WorkerRpc` per worker
/// subprocess.
pub struct WorkerRpc {
    pub wid: u32,
    adapter: Arc<WorkerAdapter>,
    registry: Arc<Registry>,
    events: Arc<EventBus>,
    pending: std::sync::Mutex<HashMap<u32, ResponseSlot>>,
    next_request_id: AtomicU32,
    timeout: Duration,
    payload_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl WorkerRpc {
    /// Spawns the worker subprocess and starts its message/payload pumps.
    /// The caller is responsible for wiring `events`'s close handler to the
    /// registry (see `registry::Registry::close`) and for handling
    /// `Event::WorkerShutdown` by closing every id in
    /// `registry.ids_for_worker(wid)`; this module only reports the event.
    pub fn start(
        wid: u32,
        settings: &WorkerSettings,
        max_frame_len: usize,
        registry: Arc<Registry>,
        events: Arc<EventBus>,
        timeout: Duration,
    ) -> Result<Arc<Self>, WorkerError> {
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Bytes>();
        let (payload_tx, payload_rx) = mpsc::unbounded_channel::<Bytes>();
        let (closed_tx, closed_rx) = oneshot::channel::<()>();

        let adapter = WorkerAdapter::spawn(
            wid,
            settings,
            max_frame_len,
            move |frame| {
                let _ = msg_tx.send(frame);
            },
            move |frame| {
                let _ = payload_tx.send(frame);
            },
            move || {
                let _ = closed_tx.send(());
            },
        )?;

        let rpc = Arc::new(Self {
            wid,
            adapter,
            registry,
            events,
            pending: std::sync::Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(1),
            timeout,
            payload_rx: AsyncMutex::new(Some(payload_rx)),
        });

        let msg_rpc = rpc.clone();
        tokio::spawn(async move {
            while let Some(frame) = msg_rx.recv().await {
                msg_rpc.handle_message(&frame);
            }
        });

        let closed_rpc = rpc.clone();
        tokio::spawn(async move {
            let _ = closed_rx.await;
            closed_rpc.handle_worker_closed();
        });

        Ok(rpc)
    }

    /// Takes ownership of the raw payload-frame receiver, once, for the
    /// media graph layer to wire up to direct-transport / RTP-tap consumers.
    pub async fn take_payload_receiver(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.payload_rx.lock().await.take()
    }

    /// Synchronous RPC: blocks until a matching response arrives or
    /// `timeout` elapses (default 10s, spec.md §4.C).
    pub async fn request(
        &self,
        method: &str,
        internal: Value,
        data: Option<Value>,
    ) -> Result<Value, RpcError> {
        if self.adapter.is_closed() {
            return Err(RpcError::WorkerGone);
        }
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let envelope = WireRequest {
            id: Some(id),
            method,
            internal,
            data,
        };
        let bytes = serde_json::to_vec(&envelope).expect("request envelope always serializes");

        if let Err(e) = self.adapter.send_message(&bytes).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(RpcError::Worker(e));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(RpcError::WorkerGone),
            Err(_elapsed) => {
                self.pending.lock().unwrap().remove(&id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Fire-and-forget: the caller is not notified of success or failure
    /// beyond the initial write.
    pub async fn notify(&self, method: &str, internal: Value, data: Option<Value>) -> Result<(), RpcError> {
        if self.adapter.is_closed() {
            return Err(RpcError::WorkerGone);
        }
        let envelope = WireRequest {
            id: None,
            method,
            internal,
            data,
        };
        let bytes = serde_json::to_vec(&envelope).expect("notify envelope always serializes");
        self.adapter.send_message(&bytes).await.map_err(RpcError::Worker)
    }

    fn handle_message(&self, frame: &Bytes) {
        let parsed: WireMessage = match serde_json::from_slice(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!(wid = self.wid, error = %e, "malformed worker channel frame");
                return;
            }
        };

        match parsed {
            WireMessage::Response { id, data, error } => {
                let slot = self.pending.lock().unwrap().remove(&id);
                let Some(slot) = slot else {
                    warn!(wid = self.wid, id, "response for unknown or timed-out request");
                    return;
                };
                let result = match error {
                    Some(message) => Err(RpcError::WorkerReturnedError(message)),
                    None => Ok(data.unwrap_or(Value::Null)),
                };
                let _ = slot.send(result);
            }
            WireMessage::Notification {
                target_id,
                event,
                data,
            } => self.dispatch_notification(&target_id, &event, data),
        }
    }

    fn dispatch_notification(&self, target_uuid: &str, event: &str, data: Value) {
        let Some(target) = self.registry.resolve_uuid(target_uuid) else {
            debug!(wid = self.wid, target_uuid, event, "notification for unknown/closed resource");
            return;
        };
        let Some(event) = decode_event(target, event, data) else {
            warn!(wid = self.wid, event, "unrecognized worker notification kind");
            return;
        };
        self.events.dispatch(event);
    }

    fn handle_worker_closed(&self) {
        let pending: Vec<ResponseSlot> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, slot)| slot).collect()
        };
        for slot in pending {
            let _ = slot.send(Err(RpcError::WorkerGone));
        }
        // Dispatched before any of this worker's resources are closed; the
        // graph layer's handler for `WorkerShutdown` does the actual
        // cascade via `registry.ids_for_worker`.
        self.events.dispatch(Event::WorkerShutdown { wid: self.wid });
    }
}

fn decode_event(target: ResourceId, name: &str, data: Value) -> Option<Event> {
    Some(match name {
        "router-created" => Event::RouterCreated { router: target },
        "router-closed" => Event::RouterClosed { router: target },

        "transport-created" => Event::TransportCreated { transport: target },
        "transport-updated" => Event::TransportUpdated { transport: target, data },
        "transport-closed" => Event::TransportClosed { transport: target },
        "transport-ice-state-change" => Event::TransportIceStateChange { transport: target, data },
        "transport-dtls-state-change" => Event::TransportDtlsStateChange { transport: target, data },
        "transport-sctp-state-change" => Event::TransportSctpStateChange { transport: target, data },
        "transport-tuple-change" => Event::TransportTupleChange { transport: target, data },

        "producer-created" => Event::ProducerCreated { producer: target },
        "producer-closed" => Event::ProducerClosed { producer: target },
        "producer-pause" => Event::ProducerPause { producer: target },
        "producer-resume" => Event::ProducerResume { producer: target },
        "producer-video-orientation-change" => {
            Event::ProducerVideoOrientationChange { producer: target, data }
        }
        "producer-score" => Event::ProducerScore { producer: target, data },

        "consumer-created" => Event::ConsumerCreated { consumer: target },
        "consumer-closed" => Event::ConsumerClosed { consumer: target },
        "consumer-pause" => Event::ConsumerPause { consumer: target },
        "consumer-resume" => Event::ConsumerResume { consumer: target },
        "consumer-layers-change" => Event::ConsumerLayersChange { consumer: target, data },
        "consumer-producer-pause" => Event::ConsumerProducerPause { consumer: target },
        "consumer-producer-resume" => Event::ConsumerProducerResume { consumer: target },

        "observer-paused" => Event::ObserverPaused { observer: target },
        "observer-resumed" => Event::ObserverResumed { observer: target },
        "observer-silence" => Event::ObserverSilence { observer: target },
        "observer-volumes" => Event::ObserverVolumes { observer: target, data },
        "active-speaker" => Event::ActiveSpeaker { observer: target, data },

        "room-created" => Event::RoomCreated { room: target },
        "room-closed" => Event::RoomClosed { room: target },
        "room-recording-on" => Event::RoomRecordingOn { room: target },
        "room-recording-off" => Event::RoomRecordingOff { room: target },
        "room-postprocessed" => Event::RoomPostprocessed { room: target, data },

        _ => return None,
    })
}
