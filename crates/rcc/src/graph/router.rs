//! Router entity (spec.md §4.E "Router").

use super::identity;
use crate::error::GraphError;
use crate::registry::{Handle, Registry, ResourceId, ResourceKind};
use crate::rpc::WorkerRpc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

pub type Router = Handle<RouterData>;

pub struct RouterData {
    pub rpc: Arc<WorkerRpc>,
    caps: Value,
    transports: Arc<Mutex<Vec<ResourceId>>>,
    observers: Arc<Mutex<Vec<ResourceId>>>,
    room: Mutex<Option<ResourceId>>,
}

impl RouterData {
    /// RTP capabilities filtered against the worker's supported set, as
    /// reported by the worker at creation time.
    pub fn rtp_capabilities(&self) -> &Value {
        &self.caps
    }

    pub fn room(&self) -> Option<ResourceId> {
        *self.room.lock()
    }

    pub(crate) fn set_room(&self, room: ResourceId) {
        *self.room.lock() = Some(room);
    }

    pub(crate) fn add_transport(&self, id: ResourceId) {
        self.transports.lock().push(id);
    }

    pub(crate) fn add_observer(&self, id: ResourceId) {
        self.observers.lock().push(id);
    }
}

/// Creates a router by routing a `WORKER-ROUTER-CREATE` request (spec.md
/// §4.E). `media_codecs` is the caller's desired codec set; the worker
/// intersects it with what it actually supports and returns the result.
pub async fn create(
    registry: &Arc<Registry>,
    rpc: Arc<WorkerRpc>,
    media_codecs: Value,
) -> Result<Router, GraphError> {
    let response = rpc
        .request(
            "WORKER-ROUTER-CREATE",
            identity(None, None, None, None, None),
            Some(json!({ "mediaCodecs": media_codecs })),
        )
        .await?;
    let caps = response.get("rtpCapabilities").cloned().unwrap_or(response);

    let transports = Arc::new(Mutex::new(Vec::new()));
    let observers = Arc::new(Mutex::new(Vec::new()));
    let data = RouterData {
        rpc: rpc.clone(),
        caps,
        transports: transports.clone(),
        observers: observers.clone(),
        room: Mutex::new(None),
    };

    let wid = rpc.wid;
    let handle = registry.register(
        ResourceKind::Router,
        wid,
        data,
        move |inner, _id| {
            for t in transports.lock().drain(..) {
                inner.close_lk(t);
            }
            for o in observers.lock().drain(..) {
                inner.close_lk(o);
            }
        },
        |_data| {},
    );
    Ok(handle)
}

/// Sends `ROUTER-CLOSE` to the worker (best effort) and closes the local
/// handle, cascading into every transport and observer (spec.md §4.E).
pub async fn close(router: &Router, registry: &Registry) {
    let _ = router
        .rpc
        .notify(
            "ROUTER-CLOSE",
            identity(Some(router.id()), None, None, None, None),
            None,
        )
        .await;
    registry.close(router.id());
}
