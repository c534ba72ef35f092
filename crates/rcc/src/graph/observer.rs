//! RTP observer entity — audio-level and active-speaker share one lifecycle
//! (spec.md §4.E "Observer").

use super::identity;
use super::router::Router;
use crate::error::GraphError;
use crate::registry::{Handle, Registry, ResourceKind};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverKind {
    AudioLevel,
    ActiveSpeaker,
}

impl ObserverKind {
    fn wire_type(self) -> &'static str {
        match self {
            ObserverKind::AudioLevel => "audiolevel",
            ObserverKind::ActiveSpeaker => "activespeaker",
        }
    }

    fn resource_kind(self) -> ResourceKind {
        match self {
            ObserverKind::AudioLevel => ResourceKind::ObserverAudioLevel,
            ObserverKind::ActiveSpeaker => ResourceKind::ObserverActiveSpeaker,
        }
    }
}

pub type Observer = Handle<ObserverData>;

pub struct ObserverData {
    pub router: Router,
    pub kind: ObserverKind,
    paused: AtomicBool,
}

impl ObserverData {
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

/// `interval_ms` of 0 falls back to the default 300ms sampling window
/// (spec.md §4.E).
pub async fn create(
    registry: &Arc<Registry>,
    router: Router,
    kind: ObserverKind,
    interval_ms: u32,
    max_entries: Option<u32>,
    threshold: Option<i32>,
) -> Result<Observer, GraphError> {
    let interval_ms = if interval_ms == 0 { 300 } else { interval_ms };

    router
        .rpc
        .request(
            "RTP-OBSERVER-CREATE",
            identity(Some(router.id()), None, None, None, None),
            Some(json!({
                "type": kind.wire_type(),
                "interval": interval_ms,
                "maxEntries": max_entries,
                "threshold": threshold,
            })),
        )
        .await?;

    let data = ObserverData {
        router: router.clone_ref(),
        kind,
        paused: AtomicBool::new(false),
    };

    let wid = router.wid();
    let handle = registry.register(kind.resource_kind(), wid, data, |_inner, _id| {}, |_data| {});
    router.add_observer(handle.id());
    Ok(handle)
}

pub async fn pause(observer: &Observer) -> Result<(), GraphError> {
    observer
        .router
        .rpc
        .request(
            "RTP-OBSERVER-PAUSE",
            identity(Some(observer.router.id()), None, None, None, Some(observer.id())),
            None,
        )
        .await?;
    observer.paused.store(true, Ordering::Release);
    Ok(())
}

pub async fn resume(observer: &Observer) -> Result<(), GraphError> {
    observer
        .router
        .rpc
        .request(
            "RTP-OBSERVER-RESUME",
            identity(Some(observer.router.id()), None, None, None, Some(observer.id())),
            None,
        )
        .await?;
    observer.paused.store(false, Ordering::Release);
    Ok(())
}

pub async fn close(observer: &Observer, registry: &Registry) {
    let _ = observer
        .router
        .rpc
        .notify(
            "RTP-OBSERVER-CLOSE",
            identity(Some(observer.router.id()), None, None, None, Some(observer.id())),
            None,
        )
        .await;
    registry.close(observer.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_kind_maps_to_distinct_wire_types_and_resource_kinds() {
        assert_eq!(ObserverKind::AudioLevel.wire_type(), "audiolevel");
        assert_eq!(ObserverKind::ActiveSpeaker.wire_type(), "activespeaker");
        assert_eq!(ObserverKind::AudioLevel.resource_kind(), ResourceKind::ObserverAudioLevel);
        assert_eq!(ObserverKind::ActiveSpeaker.resource_kind(), ResourceKind::ObserverActiveSpeaker);
    }
}
