//! The router/transport/producer/consumer/observer/room entities built on
//! top of the registry, worker RPC and RTP negotiator (spec.md §4.E).
//!
//! Every entity type here is a plain data struct registered into the
//! [`crate::registry::Registry`]; a child keeps its parent alive by holding a
//! [`crate::registry::Handle`] to it (the "one strong reference for its
//! entire lifetime" invariant), while the parent keeps a plain list of child
//! [`ResourceId`]s purely to drive the close cascade.

pub mod consumer;
pub mod observer;
pub mod producer;
pub mod room;
pub mod router;
pub mod transport;

pub use consumer::{Consumer, ConsumerData};
pub use observer::{Observer, ObserverData, ObserverKind};
pub use producer::{Producer, ProducerData, ProducerType};
pub use room::{Member, MemberData, Room, RoomData, RoomFlags};
pub use router::{Router, RouterData};
pub use transport::{Transport, TransportData, TransportFlags, TransportKind};

use crate::registry::{Registry, ResourceId};
use crate::rpc::{Event, EventBus};
use serde_json::Value;
use std::sync::Arc;

/// `audio` / `video`, as carried through `rtpParameters.codecs[].mimeType`
/// and the worker command `internal`/`data` objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpKind {
    Audio,
    Video,
}

impl RtpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RtpKind::Audio => "audio",
            RtpKind::Video => "video",
        }
    }
}

/// Routing identity embedded in every worker command, per spec.md §6.
pub(crate) fn identity(
    router: Option<ResourceId>,
    transport: Option<ResourceId>,
    producer: Option<ResourceId>,
    consumer: Option<ResourceId>,
    rtp_observer: Option<ResourceId>,
) -> Value {
    let mut obj = serde_json::Map::new();
    if let Some(r) = router {
        obj.insert("routerId".into(), Value::String(r.to_string()));
    }
    if let Some(t) = transport {
        obj.insert("transportId".into(), Value::String(t.to_string()));
    }
    if let Some(p) = producer {
        obj.insert("producerId".into(), Value::String(p.to_string()));
    }
    if let Some(c) = consumer {
        obj.insert("consumerId".into(), Value::String(c.to_string()));
    }
    if let Some(o) = rtp_observer {
        obj.insert("rtpObserverId".into(), Value::String(o.to_string()));
    }
    Value::Object(obj)
}

/// Wires worker-reported close events into the registry's close cascade
/// (spec.md §4.C / §8 scenario 5): `RouterClosed`/`TransportClosed`/
/// `ProducerClosed`/`ConsumerClosed` close the matching resource, and
/// `WorkerShutdown` closes every resource still assigned to that worker
/// before the worker is considered gone. Call this once per `EventBus`,
/// at process start.
pub fn install_close_cascade(events: &Arc<EventBus>, registry: &Arc<Registry>) {
    let registry = registry.clone();
    events.set_close_handler(move |event: &Event| {
        if let Some(id) = event.close_target() {
            registry.close(id);
            return;
        }
        if let Event::WorkerShutdown { wid } = event {
            for id in registry.ids_for_worker(*wid) {
                registry.close(id);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceKind;

    #[test]
    fn identity_only_includes_present_ids() {
        let obj = identity(Some(ResourceId(1)), None, Some(ResourceId(3)), None, None);
        let map = obj.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["routerId"], "1");
        assert_eq!(map["producerId"], "3");
        assert!(!map.contains_key("transportId"));
    }

    #[test]
    fn close_cascade_closes_target_on_matching_event() {
        let registry = Registry::new();
        let events = EventBus::new();
        install_close_cascade(&events, &registry);

        let router = registry.register(ResourceKind::Router, 1, (), |_, _| {}, |_| {});
        let id = router.id();
        events.dispatch(Event::RouterClosed { router: id });
        assert!(registry.is_closed(id));
    }

    #[test]
    fn close_cascade_closes_every_resource_on_worker_shutdown() {
        let registry = Registry::new();
        let events = EventBus::new();
        install_close_cascade(&events, &registry);

        let a = registry.register(ResourceKind::Router, 9, (), |_, _| {}, |_| {});
        let b = registry.register(ResourceKind::TransportWebRtc, 9, (), |_, _| {}, |_| {});
        let other_worker = registry.register(ResourceKind::Router, 10, (), |_, _| {}, |_| {});

        events.dispatch(Event::WorkerShutdown { wid: 9 });

        assert!(registry.is_closed(a.id()));
        assert!(registry.is_closed(b.id()));
        assert!(!registry.is_closed(other_worker.id()));
    }
}
