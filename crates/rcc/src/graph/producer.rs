//! Producer entity (spec.md §4.E "Producer").

use super::identity;
use super::transport::Transport;
use super::RtpKind;
use crate::error::GraphError;
use crate::ortc::{self, consumable};
use crate::registry::{new_uuid_v4, Handle, Registry, ResourceId, ResourceKind};
use bitflags::bitflags;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    Simple,
    Simulcast,
    Svc,
}

impl ProducerType {
    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "simple" => Some(ProducerType::Simple),
            "simulcast" => Some(ProducerType::Simulcast),
            "svc" => Some(ProducerType::Svc),
            _ => None,
        }
    }
}

bitflags! {
    /// Trace event kinds a producer can be asked to emit (spec.md §4.E).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceEventMask: u8 {
        const RTP      = 0x01;
        const KEYFRAME = 0x02;
        const NACK     = 0x04;
        const PLI      = 0x08;
        const FIR      = 0x10;
    }
}

pub type Producer = Handle<ProducerData>;

pub struct ProducerData {
    pub transport: Transport,
    pub kind: RtpKind,
    pub rtp_parameters: Value,
    pub consumable_rtp_parameters: Value,
    pub producer_type: ProducerType,
    paused: AtomicBool,
    consumers: Arc<Mutex<Vec<ResourceId>>>,
    export: Arc<Mutex<Option<ResourceId>>>,
    trace_events: Mutex<TraceEventMask>,
}

impl ProducerData {
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn export(&self) -> Option<ResourceId> {
        *self.export.lock()
    }

    pub fn set_export(&self, id: ResourceId) {
        *self.export.lock() = Some(id);
    }

    pub(crate) fn add_consumer(&self, id: ResourceId) {
        self.consumers.lock().push(id);
    }
}

/// Creation flow (spec.md §4.E):
/// 1. validate `rtp_parameters`;
/// 2. resolve the transport's `cname_for_producers` invariant;
/// 3. synthesize consumable parameters;
/// 4. send `TRANSPORT-PRODUCE` and derive `producer_type` from the response;
/// 5. register and let the worker's own `producer-created` notification
///    confirm creation to any other observers.
pub async fn create(
    registry: &Arc<Registry>,
    transport: Transport,
    kind: RtpKind,
    rtp_parameters: Value,
) -> Result<Producer, GraphError> {
    let mut params = ortc::validate_rtp_parameters(kind.as_str(), &rtp_parameters)?;

    let candidate_cname = params["rtcp"]["cname"].as_str().map(str::to_string);
    let cname = transport.cname_or_assign(candidate_cname.as_deref());
    params["rtcp"]["cname"] = Value::String(cname);

    let consumable::Consumable { params: consumable_params, rtp_mapping } =
        consumable::synthesize(kind.as_str(), &params, transport.router.rtp_capabilities())?;

    let uuid = new_uuid_v4();
    let response = transport
        .router
        .rpc
        .request(
            "TRANSPORT-PRODUCE",
            identity(Some(transport.router.id()), Some(transport.id()), None, None, None),
            Some(json!({
                "id": uuid,
                "kind": kind.as_str(),
                "rtpParameters": params,
                "rtpMapping": rtp_mapping,
            })),
        )
        .await?;

    let producer_type = response
        .get("type")
        .and_then(Value::as_str)
        .and_then(ProducerType::from_wire)
        .ok_or_else(|| {
            GraphError::UnexpectedProducerType(
                response.get("type").cloned().unwrap_or(Value::Null).to_string(),
            )
        })?;

    let consumers = Arc::new(Mutex::new(Vec::new()));
    let export = Arc::new(Mutex::new(None::<ResourceId>));
    let data = ProducerData {
        transport: transport.clone_ref(),
        kind,
        rtp_parameters: params,
        consumable_rtp_parameters: consumable_params,
        producer_type,
        paused: AtomicBool::new(false),
        consumers: consumers.clone(),
        export: export.clone(),
        trace_events: Mutex::new(TraceEventMask::empty()),
    };

    let resource_kind = ResourceKind::Producer;
    let wid = transport.router.wid();
    let handle = registry.register_with_uuid(
        uuid,
        resource_kind,
        wid,
        data,
        move |inner, _id| {
            for c in consumers.lock().drain(..) {
                inner.close_lk(c);
            }
            if let Some(export) = export.lock().take() {
                inner.close_lk(export);
            }
        },
        |_data| {},
    );
    transport.add_producer(handle.id());
    Ok(handle)
}

/// Attaches a recording export to this producer so its close cascades into
/// the export (spec.md §4.E, "Close cascades to ... if an export is
/// attached, to the export").
pub fn attach_export(producer: &Producer, export: ResourceId) {
    producer.set_export(export);
}

pub async fn pause(producer: &Producer) -> Result<(), GraphError> {
    producer
        .transport
        .router
        .rpc
        .request(
            "PRODUCER-PAUSE",
            identity(
                Some(producer.transport.router.id()),
                Some(producer.transport.id()),
                Some(producer.id()),
                None,
                None,
            ),
            None,
        )
        .await?;
    producer.paused.store(true, Ordering::Release);
    Ok(())
}

pub async fn resume(producer: &Producer) -> Result<(), GraphError> {
    producer
        .transport
        .router
        .rpc
        .request(
            "PRODUCER-RESUME",
            identity(
                Some(producer.transport.router.id()),
                Some(producer.transport.id()),
                Some(producer.id()),
                None,
                None,
            ),
            None,
        )
        .await?;
    producer.paused.store(false, Ordering::Release);
    Ok(())
}

pub async fn enable_trace_events(producer: &Producer, mask: TraceEventMask) -> Result<(), GraphError> {
    let types: Vec<&str> = [
        (TraceEventMask::RTP, "rtp"),
        (TraceEventMask::KEYFRAME, "keyframe"),
        (TraceEventMask::NACK, "nack"),
        (TraceEventMask::PLI, "pli"),
        (TraceEventMask::FIR, "fir"),
    ]
    .into_iter()
    .filter(|(flag, _)| mask.contains(*flag))
    .map(|(_, name)| name)
    .collect();

    producer
        .transport
        .router
        .rpc
        .request(
            "PRODUCER-ENABLE-TRACE-EVENT",
            identity(
                Some(producer.transport.router.id()),
                Some(producer.transport.id()),
                Some(producer.id()),
                None,
                None,
            ),
            Some(json!({ "types": types })),
        )
        .await?;
    *producer.trace_events.lock() = mask;
    Ok(())
}

pub async fn close(producer: &Producer, registry: &Registry) {
    let _ = producer
        .transport
        .router
        .rpc
        .notify(
            "PRODUCER-CLOSE",
            identity(
                Some(producer.transport.router.id()),
                Some(producer.transport.id()),
                Some(producer.id()),
                None,
                None,
            ),
            None,
        )
        .await;
    registry.close(producer.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_type_from_wire_recognizes_the_three_kinds() {
        assert_eq!(ProducerType::from_wire("simple"), Some(ProducerType::Simple));
        assert_eq!(ProducerType::from_wire("simulcast"), Some(ProducerType::Simulcast));
        assert_eq!(ProducerType::from_wire("svc"), Some(ProducerType::Svc));
        assert_eq!(ProducerType::from_wire("bogus"), None);
    }

    #[test]
    fn trace_event_mask_combines_and_filters() {
        let mask = TraceEventMask::KEYFRAME | TraceEventMask::PLI;
        assert!(mask.contains(TraceEventMask::KEYFRAME));
        assert!(mask.contains(TraceEventMask::PLI));
        assert!(!mask.contains(TraceEventMask::RTP));
        assert!(!mask.contains(TraceEventMask::NACK));
        assert!(!mask.contains(TraceEventMask::FIR));
    }
}
