mod resource;

pub use resource::{new_uuid_v4, ResourceBase, ResourceId, ResourceKind, ResourceTypeMask, MAX_ID};

use crate::error::RegistryError;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

type CloseHook = Box<dyn FnMut(&mut Inner, ResourceId) + Send>;
type DisposeHook = Box<dyn FnOnce(Arc<dyn Any + Send + Sync>) + Send>;

struct Entry {
    base: ResourceBase,
    refs: i64,
    data: Arc<dyn Any + Send + Sync>,
    close: Option<CloseHook>,
    dispose: Option<DisposeHook>,
}

/// Everything protected by the registry's single coarse mutex (spec.md §4.A).
#[derive(Default)]
struct Inner {
    by_id: HashMap<ResourceId, Entry>,
    by_uuid: HashMap<String, ResourceId>,
    worker_load: HashMap<u32, i64>,
}

impl Inner {
    fn load_delta(&mut self, kind: ResourceKind, wid: u32, delta: i64) {
        if wid == 0 {
            return;
        }
        if matches!(
            kind,
            ResourceKind::Router
                | ResourceKind::TransportWebRtc
                | ResourceKind::TransportPlain
                | ResourceKind::TransportDirect
                | ResourceKind::TransportPipe
                | ResourceKind::Producer
                | ResourceKind::ProducerData
                | ResourceKind::Consumer
                | ResourceKind::ConsumerData
        ) {
            *self.worker_load.entry(wid).or_insert(0) += delta;
        }
    }

    /// Assumes `id` is present. Runs the close hook (if not already closed),
    /// decrements the structural parent reference by releasing one ref, and
    /// disposes immediately if that drops refs to zero. Mirrors the "lk"
    /// convention: the caller already holds the lock.
    fn close_lk(&mut self, id: ResourceId) {
        let Some(entry) = self.by_id.get_mut(&id) else {
            return;
        };
        if entry.base.closed {
            return;
        }
        entry.base.closed = true;
        if let Some(mut close) = entry.close.take() {
            close(self, id);
        }
        self.release_lk(id);
    }

    fn release_lk(&mut self, id: ResourceId) {
        let dispose = {
            let Some(entry) = self.by_id.get_mut(&id) else {
                return;
            };
            entry.refs -= 1;
            if entry.refs > 0 {
                return;
            }
            if entry.refs < 0 {
                warn!(resource_id = id.0, "refcount went negative on release");
            }
            entry.dispose.take()
        };
        if let Some(removed) = self.by_id.remove(&id) {
            self.by_uuid.remove(&removed.base.uuid);
            self.load_delta(removed.base.kind, removed.base.wid, -1);
            if let Some(dispose) = dispose {
                dispose(removed.data);
            }
        }
    }

    fn add_ref_lk(&mut self, id: ResourceId, delta: i64) -> Result<(), RegistryError> {
        let entry = self
            .by_id
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id.0))?;
        entry.refs += delta;
        if entry.refs < 0 {
            return Err(RegistryError::UnbalancedRefs(id.0));
        }
        Ok(())
    }
}

/// Reference-counted map of every live resource, keyed by numeric id and
/// UUID. A single `parking_lot::Mutex` serializes every mutation; see the
/// lock-discipline contract in SPEC_FULL.md §4.A before touching this file.
pub struct Registry {
    inner: Mutex<Inner>,
    next_id: AtomicU32,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

/// A strong reference to a registered resource. Decrements the refcount on
/// `Drop`, per the "handle types that decrement refcount on Drop" design note.
pub struct Handle<T: Send + Sync + 'static> {
    id: ResourceId,
    uuid: String,
    kind: ResourceKind,
    wid: u32,
    data: Arc<T>,
    registry: Weak<Registry>,
}

impl<T: Send + Sync + 'static> Handle<T> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn wid(&self) -> u32 {
        self.wid
    }

    /// An additional strong reference sharing the same underlying slot.
    /// Each clone must eventually be dropped to release its own ref.
    pub fn clone_ref(&self) -> Handle<T> {
        if let Some(registry) = self.registry.upgrade() {
            registry.add_ref(self.id, 1).ok();
        }
        Handle {
            id: self.id,
            uuid: self.uuid.clone(),
            kind: self.kind,
            wid: self.wid,
            data: self.data.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: Send + Sync + 'static> Drop for Handle<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.id);
        }
    }
}

/// A detached snapshot of a resource's base fields, returned by `probe`.
/// Holds no pointer into registry storage, per the lock-discipline contract.
pub type Probe = ResourceBase;

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            next_id: AtomicU32::new(1),
        })
    }

    fn alloc_id(&self) -> ResourceId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id <= MAX_ID {
                return ResourceId(id);
            }
            // Wrapped past the 31-bit ceiling; reset and keep handing out ids.
            // Collisions with still-live low ids are possible under sustained
            // load, matching the documented behavior of the original design.
            self.next_id.store(1, Ordering::Relaxed);
        }
    }

    /// Registers a new resource with its type-specific close/dispose hooks
    /// and an initial refcount of 1 (the caller's own reference).
    ///
    /// `close` runs once, the first time this resource is closed; it is
    /// handed the locked `Inner` so it can cascade into child resources via
    /// `close_lk` without re-acquiring the mutex. `dispose` runs once refs
    /// reaches zero, after removal from both maps.
    pub fn register<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        kind: ResourceKind,
        wid: u32,
        data: T,
        close: impl FnMut(&mut Inner, ResourceId) + Send + 'static,
        dispose: impl FnOnce(Arc<dyn Any + Send + Sync>) + Send + 'static,
    ) -> Handle<T> {
        self.register_with_uuid(new_uuid_v4(), kind, wid, data, close, dispose)
    }

    /// Like `register`, but with a caller-supplied uuid instead of a freshly
    /// minted one. Used where the worker must be told the resource's uuid
    /// before it exists locally (the producer/consumer create flow mints the
    /// uuid first, sends it in the creation request, then registers under
    /// that same uuid so later worker notifications resolve via
    /// `resolve_uuid`).
    pub fn register_with_uuid<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        uuid: String,
        kind: ResourceKind,
        wid: u32,
        data: T,
        close: impl FnMut(&mut Inner, ResourceId) + Send + 'static,
        dispose: impl FnOnce(Arc<dyn Any + Send + Sync>) + Send + 'static,
    ) -> Handle<T> {
        let id = self.alloc_id();
        let data: Arc<dyn Any + Send + Sync> = Arc::new(data);

        let mut inner = self.inner.lock();
        if inner.by_uuid.contains_key(&uuid) {
            warn!(%uuid, "uuid collision on register, keeping latest");
        }
        inner.by_uuid.insert(uuid.clone(), id);
        inner.by_id.insert(
            id,
            Entry {
                base: ResourceBase {
                    id,
                    uuid: uuid.clone(),
                    kind,
                    wid,
                    closed: false,
                },
                refs: 1,
                data: data.clone(),
                close: Some(Box::new(close)),
                dispose: Some(Box::new(dispose)),
            },
        );
        inner.load_delta(kind, wid, 1);
        drop(inner);

        Handle {
            id,
            uuid,
            kind,
            wid,
            data: data.downcast::<T>().expect("resource type mismatch on register"),
            registry: Arc::downgrade(self),
        }
    }

    /// "locked-ref-acquire": look up by id, filtered by `mask`, taking one
    /// additional reference. Returns `None` if absent, closed, or the wrong
    /// kind.
    pub fn by_id<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        id: ResourceId,
        mask: ResourceTypeMask,
    ) -> Option<Handle<T>> {
        let mut inner = self.inner.lock();
        let entry = inner.by_id.get(&id)?;
        if entry.base.closed || !mask.contains(entry.base.kind.mask()) {
            return None;
        }
        let base = entry.base.clone();
        let data = entry.data.clone();
        inner.add_ref_lk(id, 1).ok()?;
        drop(inner);
        Some(Handle {
            id: base.id,
            uuid: base.uuid,
            kind: base.kind,
            wid: base.wid,
            data: data.downcast::<T>().ok()?,
            registry: Arc::downgrade(self),
        })
    }

    pub fn by_uuid<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        uuid: &str,
        mask: ResourceTypeMask,
    ) -> Option<Handle<T>> {
        let id = {
            let inner = self.inner.lock();
            *inner.by_uuid.get(uuid)?
        };
        self.by_id(id, mask)
    }

    /// Returns a detached copy of the base fields without taking a reference;
    /// used by read-only fast paths that don't need to keep the resource alive.
    pub fn probe(&self, id: ResourceId) -> Option<Probe> {
        let inner = self.inner.lock();
        inner.by_id.get(&id).map(|e| e.base.clone())
    }

    pub fn probe_by_uuid(&self, uuid: &str) -> Option<Probe> {
        let inner = self.inner.lock();
        let id = *inner.by_uuid.get(uuid)?;
        inner.by_id.get(&id).map(|e| e.base.clone())
    }

    /// Translates a worker-side UUID into its numeric resource id, without
    /// taking a reference. Used to resolve event targets coming off the
    /// worker channel (spec.md §4.C's "uuid→id resolver").
    pub fn resolve_uuid(&self, uuid: &str) -> Option<ResourceId> {
        self.inner.lock().by_uuid.get(uuid).copied()
    }

    /// Adjusts the refcount under lock; disposes and unregisters when it
    /// reaches zero. `delta` may be negative.
    pub fn add_ref(&self, id: ResourceId, delta: i64) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        inner.add_ref_lk(id, delta)?;
        if inner.by_id.get(&id).map(|e| e.refs) == Some(0) {
            inner.release_lk(id);
        }
        Ok(())
    }

    fn release(&self, id: ResourceId) {
        let mut inner = self.inner.lock();
        inner.release_lk(id);
    }

    /// Idempotent. Sets `closed = true` on first call, runs the type-specific
    /// close procedure (cascading into children under the same lock), then
    /// releases the caller's own structural reference.
    pub fn close(&self, id: ResourceId) {
        let mut inner = self.inner.lock();
        inner.close_lk(id);
    }

    pub fn is_closed(&self, id: ResourceId) -> bool {
        self.inner
            .lock()
            .by_id
            .get(&id)
            .map(|e| e.base.closed)
            .unwrap_or(true)
    }

    /// Current load score for a worker: the count of routers, transports,
    /// producers and consumers it owns. Used by the worker pool to pick the
    /// least-loaded worker for a new router.
    pub fn worker_load(&self, wid: u32) -> i64 {
        self.inner.lock().worker_load.get(&wid).copied().unwrap_or(0)
    }

    /// Every live resource owned by a given worker. Used to dispose a
    /// worker's whole subtree after it crashes (spec.md §8 scenario 5).
    pub fn ids_for_worker(&self, wid: u32) -> Vec<ResourceId> {
        self.inner
            .lock()
            .by_id
            .values()
            .filter(|e| e.base.wid == wid)
            .map(|e| e.base.id)
            .collect()
    }
}

pub use Inner as RegistryInner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_distinct_ids_and_uuids() {
        let registry = Registry::new();
        let a = registry.register(ResourceKind::Room, 0, 1u32, |_, _| {}, |_| {});
        let b = registry.register(ResourceKind::Room, 0, 2u32, |_, _| {}, |_| {});
        assert_ne!(a.id(), b.id());
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn by_id_rejects_wrong_mask_and_closed() {
        let registry = Registry::new();
        let handle = registry.register(ResourceKind::Room, 0, 1u32, |_, _| {}, |_| {});
        assert!(registry.by_id::<u32>(handle.id(), ResourceTypeMask::ROOM_MEMBER).is_none());
        assert!(registry.by_id::<u32>(handle.id(), ResourceTypeMask::ROOM).is_some());

        registry.close(handle.id());
        assert!(registry.by_id::<u32>(handle.id(), ResourceTypeMask::ROOM).is_none());
    }

    #[test]
    fn dispose_runs_once_refcount_hits_zero() {
        let registry = Registry::new();
        let disposed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let disposed_in_hook = disposed.clone();
        let handle = registry.register(
            ResourceKind::Room,
            0,
            1u32,
            |_, _| {},
            move |_| disposed_in_hook.store(true, Ordering::SeqCst),
        );
        let id = handle.id();
        let clone = handle.clone_ref();
        drop(handle);
        assert!(!disposed.load(Ordering::SeqCst));
        assert!(!registry.is_closed(id));
        drop(clone);
        assert!(disposed.load(Ordering::SeqCst));
    }

    #[test]
    fn close_cascades_to_children_under_same_lock() {
        let registry = Registry::new();
        let child_closed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let child = registry.register(ResourceKind::RoomMember, 0, 1u32, |_, _| {}, |_| {});
        let child_id = child.id();
        let flag = child_closed.clone();
        std::mem::forget(child);

        let parent = registry.register(ResourceKind::Room, 0, 2u32, {
            move |inner: &mut Inner, _id| {
                inner.close_lk(child_id);
                flag.store(true, Ordering::SeqCst);
            }
        }, |_| {});

        registry.close(parent.id());
        assert!(child_closed.load(Ordering::SeqCst));
        assert!(registry.is_closed(child_id));
    }

    #[test]
    fn close_is_idempotent() {
        let registry = Registry::new();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();
        let handle = registry.register(
            ResourceKind::Room,
            0,
            1u32,
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );
        let id = handle.id();
        registry.close(id);
        registry.close(id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_load_tracks_registered_kinds_and_ignores_sentinel_wid() {
        let registry = Registry::new();
        let _transport = registry.register(ResourceKind::TransportWebRtc, 7, (), |_, _| {}, |_| {});
        assert_eq!(registry.worker_load(7), 1);

        let _room = registry.register(ResourceKind::Room, 0, (), |_, _| {}, |_| {});
        assert_eq!(registry.worker_load(0), 0);
    }

    #[test]
    fn ids_for_worker_filters_by_wid() {
        let registry = Registry::new();
        let a = registry.register(ResourceKind::Router, 3, (), |_, _| {}, |_| {});
        let _b = registry.register(ResourceKind::Router, 4, (), |_, _| {}, |_| {});
        let ids = registry.ids_for_worker(3);
        assert_eq!(ids, vec![a.id()]);
    }

    #[test]
    fn resolve_uuid_round_trips_until_closed() {
        let registry = Registry::new();
        let handle = registry.register(ResourceKind::Room, 0, (), |_, _| {}, |_| {});
        let uuid = handle.uuid().to_string();
        assert_eq!(registry.resolve_uuid(&uuid), Some(handle.id()));
        registry.close(handle.id());
        assert_eq!(registry.resolve_uuid(&uuid), None);
    }
}
