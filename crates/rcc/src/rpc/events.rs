use crate::registry::ResourceId;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// The stable set of notification kinds the worker channel can emit
/// (spec.md §4.C), plus the internal `WorkerShutdown` kind fired when a
/// worker subprocess exits.
#[derive(Debug, Clone)]
pub enum Event {
    RouterCreated { router: ResourceId },
    RouterClosed { router: ResourceId },

    TransportCreated { transport: ResourceId },
    TransportUpdated { transport: ResourceId, data: Value },
    TransportClosed { transport: ResourceId },
    TransportIceStateChange { transport: ResourceId, data: Value },
    TransportDtlsStateChange { transport: ResourceId, data: Value },
    TransportSctpStateChange { transport: ResourceId, data: Value },
    TransportTupleChange { transport: ResourceId, data: Value },

    ProducerCreated { producer: ResourceId },
    ProducerClosed { producer: ResourceId },
    ProducerPause { producer: ResourceId },
    ProducerResume { producer: ResourceId },
    ProducerVideoOrientationChange { producer: ResourceId, data: Value },
    ProducerScore { producer: ResourceId, data: Value },

    ConsumerCreated { consumer: ResourceId },
    ConsumerClosed { consumer: ResourceId },
    ConsumerPause { consumer: ResourceId },
    ConsumerResume { consumer: ResourceId },
    ConsumerLayersChange { consumer: ResourceId, data: Value },
    ConsumerProducerPause { consumer: ResourceId },
    ConsumerProducerResume { consumer: ResourceId },

    ObserverPaused { observer: ResourceId },
    ObserverResumed { observer: ResourceId },
    ObserverSilence { observer: ResourceId },
    ObserverVolumes { observer: ResourceId, data: Value },
    ActiveSpeaker { observer: ResourceId, data: Value },

    RoomCreated { room: ResourceId },
    RoomClosed { room: ResourceId },
    RoomMemberJoin { room: ResourceId, member: ResourceId },
    RoomMemberLeft { room: ResourceId, member: ResourceId },
    RoomMemberMute { room: ResourceId, member: ResourceId },
    RoomMemberMsg { room: ResourceId, member: ResourceId, data: Value },
    RoomRecordingOn { room: ResourceId },
    RoomRecordingOff { room: ResourceId },
    RoomPostprocessed { room: ResourceId, data: Value },

    /// Fired once per worker on subprocess exit, before any of that
    /// worker's resources are closed (spec.md §8 scenario 5).
    WorkerShutdown { wid: u32 },
}

impl Event {
    /// The resource this event disposes, for the event kinds that map
    /// directly to `close(id)` (spec.md §4.C).
    pub fn close_target(&self) -> Option<ResourceId> {
        match self {
            Event::RouterClosed { router } => Some(*router),
            Event::TransportClosed { transport } => Some(*transport),
            Event::ProducerClosed { producer } => Some(*producer),
            Event::ConsumerClosed { consumer } => Some(*consumer),
            _ => None,
        }
    }
}

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

/// Ordered notification fan-out. Handlers registered via `on` run in
/// registration order; the close-cascade handler (set once, by the
/// registry) always runs last, regardless of when application handlers
/// were registered, so observers see the final pre-close state first.
pub struct EventBus {
    handlers: Mutex<Vec<Handler>>,
    close_handler: Mutex<Option<Handler>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(Vec::new()),
            close_handler: Mutex::new(None),
        })
    }

    pub fn on(&self, handler: impl Fn(&Event) + Send + Sync + 'static) {
        self.handlers.lock().push(Box::new(handler));
    }

    /// Installs the registry's close-cascade handler. Idempotent only in
    /// the sense that a second call replaces the first; callers should
    /// install this exactly once at process start.
    pub fn set_close_handler(&self, handler: impl Fn(&Event) + Send + Sync + 'static) {
        *self.close_handler.lock() = Some(Box::new(handler));
    }

    pub fn dispatch(&self, event: Event) {
        let handlers = self.handlers.lock();
        for handler in handlers.iter() {
            handler(&event);
        }
        drop(handlers);
        if let Some(handler) = self.close_handler.lock().as_ref() {
            handler(&event);
        }
    }
}
