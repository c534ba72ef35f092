//! Transport entity — WebRTC / Plain / Direct / Pipe (spec.md §4.E "Transport").

use super::identity;
use super::router::Router;
use crate::error::GraphError;
use crate::registry::{new_uuid_v4, Handle, Registry, ResourceId, ResourceKind};
use bitflags::bitflags;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransportFlags: u16 {
        const ENABLE_UDP = 0x01;
        const PREFER_UDP = 0x02;
        const ENABLE_TCP = 0x04;
        const PREFER_TCP = 0x08;
        const ENABLE_SCTP = 0x10;
        const ENABLE_DATA_CHANNEL = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebRtc,
    Plain,
    Direct,
    Pipe,
}

impl TransportKind {
    fn resource_kind(self) -> ResourceKind {
        match self {
            TransportKind::WebRtc => ResourceKind::TransportWebRtc,
            TransportKind::Plain => ResourceKind::TransportPlain,
            TransportKind::Direct => ResourceKind::TransportDirect,
            TransportKind::Pipe => ResourceKind::TransportPipe,
        }
    }

    fn wire_type(self) -> &'static str {
        match self {
            TransportKind::WebRtc => "webrtc",
            TransportKind::Plain => "plain",
            TransportKind::Direct => "direct",
            TransportKind::Pipe => "pipe",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenIp {
    pub ip: String,
    pub announced_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SctpParams {
    pub max_message_size: u32,
    pub os: u16,
    pub mis: u16,
}

#[derive(Debug, Clone)]
pub struct WebRtcTransportSpec {
    pub listen_ips: Vec<ListenIp>,
    pub flags: TransportFlags,
    pub initial_outgoing_bitrate: Option<u32>,
    pub sctp: Option<SctpParams>,
}

#[derive(Debug, Clone)]
pub struct PlainTransportSpec {
    pub listen_ip: ListenIp,
    pub no_mux: bool,
    pub comedia: bool,
    pub enable_sctp: bool,
    pub enable_srtp: bool,
    pub srtp_crypto_suite: Option<String>,
    pub sctp: Option<SctpParams>,
}

#[derive(Debug, Clone)]
pub enum TransportSpec {
    WebRtc(WebRtcTransportSpec),
    Plain(PlainTransportSpec),
    Direct,
    Pipe { listen_ip: ListenIp },
}

impl TransportSpec {
    fn kind(&self) -> TransportKind {
        match self {
            TransportSpec::WebRtc(_) => TransportKind::WebRtc,
            TransportSpec::Plain(_) => TransportKind::Plain,
            TransportSpec::Direct => TransportKind::Direct,
            TransportSpec::Pipe { .. } => TransportKind::Pipe,
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            TransportSpec::WebRtc(s) => json!({
                "listenIps": s.listen_ips.iter().map(listen_ip_json).collect::<Vec<_>>(),
                "enableUdp": s.flags.contains(TransportFlags::ENABLE_UDP),
                "preferUdp": s.flags.contains(TransportFlags::PREFER_UDP),
                "enableTcp": s.flags.contains(TransportFlags::ENABLE_TCP),
                "preferTcp": s.flags.contains(TransportFlags::PREFER_TCP),
                "enableSctp": s.flags.contains(TransportFlags::ENABLE_SCTP),
                "enableDataChannel": s.flags.contains(TransportFlags::ENABLE_DATA_CHANNEL),
                "initialAvailableOutgoingBitrate": s.initial_outgoing_bitrate,
                "sctpParameters": s.sctp.as_ref().map(sctp_json),
            }),
            TransportSpec::Plain(s) => json!({
                "listenIp": listen_ip_json(&s.listen_ip),
                "noMux": s.no_mux,
                "comedia": s.comedia,
                "enableSctp": s.enable_sctp,
                "enableSrtp": s.enable_srtp,
                "srtpCryptoSuite": s.srtp_crypto_suite,
                "sctpParameters": s.sctp.as_ref().map(sctp_json),
            }),
            TransportSpec::Direct => json!({}),
            TransportSpec::Pipe { listen_ip } => json!({ "listenIp": listen_ip_json(listen_ip) }),
        }
    }
}

fn listen_ip_json(ip: &ListenIp) -> Value {
    json!({ "ip": ip.ip, "announcedIp": ip.announced_ip })
}

fn sctp_json(p: &SctpParams) -> Value {
    json!({ "maxMessageSize": p.max_message_size, "OS": p.os, "MIS": p.mis })
}

/// Allocator over a fixed range of SCTP stream ids for this transport's data
/// channels (spec.md §3, "a fixed-size pool of stream-id slots").
struct StreamIdPool {
    next: u16,
    max: u16,
    freed: Vec<u16>,
}

impl StreamIdPool {
    fn new(max: u16) -> Self {
        Self { next: 0, max, freed: Vec::new() }
    }

    fn alloc(&mut self) -> Option<u16> {
        if let Some(id) = self.freed.pop() {
            return Some(id);
        }
        if self.next >= self.max {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(id)
    }

    fn free(&mut self, id: u16) {
        self.freed.push(id);
    }
}

pub type Transport = Handle<TransportData>;

pub struct TransportData {
    pub router: Router,
    pub kind: TransportKind,
    producers: Arc<Mutex<Vec<ResourceId>>>,
    consumers: Arc<Mutex<Vec<ResourceId>>>,
    cname_for_producers: Mutex<Option<String>>,
    stream_ids: Mutex<Option<StreamIdPool>>,
}

impl TransportData {
    pub(crate) fn add_producer(&self, id: ResourceId) {
        self.producers.lock().push(id);
    }

    pub(crate) fn add_consumer(&self, id: ResourceId) {
        self.consumers.lock().push(id);
    }

    /// cname invariant (spec.md §4.D): the first producer with a cname sets
    /// it; later producers without one inherit it; if none ever supplies one,
    /// a fresh UUID is minted on first use.
    pub(crate) fn cname_or_assign(&self, candidate: Option<&str>) -> String {
        let mut slot = self.cname_for_producers.lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let cname = candidate.map(str::to_string).unwrap_or_else(new_uuid_v4);
        *slot = Some(cname.clone());
        cname
    }

    pub(crate) fn alloc_stream_id(&self) -> Option<u16> {
        self.stream_ids.lock().as_mut()?.alloc()
    }

    pub(crate) fn free_stream_id(&self, id: u16) {
        if let Some(pool) = self.stream_ids.lock().as_mut() {
            pool.free(id);
        }
    }
}

pub async fn create(
    registry: &Arc<Registry>,
    router: Router,
    spec: TransportSpec,
) -> Result<Transport, GraphError> {
    let wire = spec.to_wire();
    let kind = spec.kind();
    let mis = match &spec {
        TransportSpec::WebRtc(s) => s.sctp.as_ref().map(|p| p.mis),
        TransportSpec::Plain(s) => s.sctp.as_ref().map(|p| p.mis),
        _ => None,
    };

    let _response = router
        .rpc
        .request(
            "TRANSPORT-CREATE",
            identity(Some(router.id()), None, None, None, None),
            Some(json!({ "type": kind.wire_type(), "spec": wire })),
        )
        .await?;

    let producers = Arc::new(Mutex::new(Vec::new()));
    let consumers = Arc::new(Mutex::new(Vec::new()));
    let wid = router.wid();
    let router_for_parent = router.clone_ref();
    let data = TransportData {
        router: router_for_parent,
        kind,
        producers: producers.clone(),
        consumers: consumers.clone(),
        cname_for_producers: Mutex::new(None),
        stream_ids: Mutex::new(mis.map(StreamIdPool::new)),
    };

    let handle = registry.register(
        kind.resource_kind(),
        wid,
        data,
        move |inner, _id| {
            for p in producers.lock().drain(..) {
                inner.close_lk(p);
            }
            for c in consumers.lock().drain(..) {
                inner.close_lk(c);
            }
        },
        |_data| {},
    );
    router.add_transport(handle.id());
    Ok(handle)
}

/// `connect` sends the remote parameters (DTLS for WebRTC, IP+port for
/// Plain); the worker validates and applies them.
pub async fn connect(transport: &Transport, params: Value) -> Result<(), GraphError> {
    transport
        .router
        .rpc
        .request(
            "TRANSPORT-CONNECT",
            identity(Some(transport.router.id()), Some(transport.id()), None, None, None),
            Some(params),
        )
        .await?;
    Ok(())
}

pub async fn close(transport: &Transport, registry: &Registry) {
    let _ = transport
        .router
        .rpc
        .notify(
            "TRANSPORT-CLOSE",
            identity(Some(transport.router.id()), Some(transport.id()), None, None, None),
            None,
        )
        .await;
    registry.close(transport.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_pool_allocates_sequentially_then_exhausts() {
        let mut pool = StreamIdPool::new(2);
        assert_eq!(pool.alloc(), Some(0));
        assert_eq!(pool.alloc(), Some(1));
        assert_eq!(pool.alloc(), None);
    }

    #[test]
    fn stream_id_pool_reuses_freed_ids_before_growing() {
        let mut pool = StreamIdPool::new(2);
        let a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        pool.free(a);
        assert_eq!(pool.alloc(), Some(a));
        assert_eq!(pool.alloc(), None);
    }

    #[test]
    fn transport_spec_kind_and_wire_type_match() {
        assert_eq!(TransportSpec::Direct.kind(), TransportKind::Direct);
        assert_eq!(TransportKind::Direct.wire_type(), "direct");
        let spec = TransportSpec::Pipe { listen_ip: ListenIp { ip: "127.0.0.1".into(), announced_ip: None } };
        assert_eq!(spec.kind(), TransportKind::Pipe);
        let wire = spec.to_wire();
        assert_eq!(wire["listenIp"]["ip"], "127.0.0.1");
    }

    #[test]
    fn plain_transport_wire_carries_flags_verbatim() {
        let spec = TransportSpec::Plain(PlainTransportSpec {
            listen_ip: ListenIp { ip: "127.0.0.1".into(), announced_ip: None },
            no_mux: true,
            comedia: false,
            enable_sctp: false,
            enable_srtp: true,
            srtp_crypto_suite: Some("AES_CM_128_HMAC_SHA1_80".into()),
            sctp: None,
        });
        let wire = spec.to_wire();
        assert_eq!(wire["noMux"], true);
        assert_eq!(wire["enableSrtp"], true);
        assert_eq!(wire["srtpCryptoSuite"], "AES_CM_128_HMAC_SHA1_80");
    }
}
