//! Room and Member entities (spec.md §4.E "Room").
//!
//! A Room's parent Router is attached lazily, on the first media session,
//! and is not itself part of the Router's close cascade (spec.md §4.E lists
//! only transports and observers as cascade targets) — a Room must be
//! closed independently by the application.

use crate::registry::{new_uuid_v4, Handle, Registry, ResourceId, ResourceKind};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::router::Router;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoomFlags: u8 {
        const MEETING = 0x01;
        const WEBINAR = 0x02;
        const PRIVATE = 0x04;
        const AUDIO_LEVEL_OBSERVER_ENABLED = 0x08;
        const ACTIVE_SPEAKER_OBSERVER_ENABLED = 0x10;
    }
}

pub type Room = Handle<RoomData>;

pub struct RoomData {
    /// Durable identity distinct from the registry uuid — survives across
    /// the room's recording sessions.
    pub cid: String,
    pub cid_ts: i64,
    pub owner_user_id: String,
    pub flags: RoomFlags,
    router: Mutex<Option<Router>>,
    members: Arc<Mutex<Vec<ResourceId>>>,
    num_recording_sessions: AtomicU32,
    has_started_recording: AtomicBool,
}

impl RoomData {
    pub fn router(&self) -> Option<Router> {
        self.router.lock().clone()
    }

    pub(crate) fn attach_router(&self, router: Router) {
        *self.router.lock() = Some(router);
    }

    pub(crate) fn add_member(&self, id: ResourceId) {
        self.members.lock().push(id);
    }

    pub(crate) fn remove_member(&self, id: ResourceId) {
        self.members.lock().retain(|m| *m != id);
    }

    pub fn member_ids(&self) -> Vec<ResourceId> {
        self.members.lock().clone()
    }

    pub fn num_recording_sessions(&self) -> u32 {
        self.num_recording_sessions.load(Ordering::Acquire)
    }

    pub(crate) fn begin_recording_session(&self) {
        self.num_recording_sessions.fetch_add(1, Ordering::AcqRel);
        self.has_started_recording.store(true, Ordering::Release);
    }

    pub fn has_started_recording(&self) -> bool {
        self.has_started_recording.load(Ordering::Acquire)
    }
}

pub fn create(registry: &Arc<Registry>, cid_ts: i64, owner_user_id: String, flags: RoomFlags) -> Room {
    let data = RoomData {
        cid: new_uuid_v4(),
        cid_ts,
        owner_user_id,
        flags,
        router: Mutex::new(None),
        members: Arc::new(Mutex::new(Vec::new())),
        num_recording_sessions: AtomicU32::new(0),
        has_started_recording: AtomicBool::new(false),
    };

    registry.register(ResourceKind::Room, 0, data, |_inner, _id| {}, |_data| {})
}

/// Attaches the router a room's media sessions run on. Idempotent: later
/// calls are ignored once a router is attached.
pub fn attach_router(room: &Room, router: Router) {
    if room.router().is_none() {
        room.attach_router(router);
    }
}

pub fn close(room: &Room, registry: &Registry) {
    for member in room.member_ids() {
        registry.close(member);
    }
    registry.close(room.id());
}

pub type Member = Handle<MemberData>;

pub struct MemberData {
    pub room: Room,
    pub user_id: String,
    pub session_id: String,
    pub display_name: String,
    pub rtp_capabilities: Mutex<Option<serde_json::Value>>,
    /// Producers and consumers this member owns, tracked as plain ids: the
    /// registry's id-based lookup already behaves as a weak reference
    /// (`probe`/`by_id` return `None` once the resource is closed), so no
    /// separate `Weak<T>` bookkeeping is needed here.
    producers: Mutex<Vec<ResourceId>>,
    consumers: Mutex<Vec<ResourceId>>,
}

impl MemberData {
    pub fn set_rtp_capabilities(&self, caps: serde_json::Value) {
        *self.rtp_capabilities.lock() = Some(caps);
    }

    pub fn rtp_capabilities(&self) -> Option<serde_json::Value> {
        self.rtp_capabilities.lock().clone()
    }

    pub(crate) fn add_producer(&self, id: ResourceId) {
        self.producers.lock().push(id);
    }

    pub(crate) fn add_consumer(&self, id: ResourceId) {
        self.consumers.lock().push(id);
    }

    pub fn producer_ids(&self) -> Vec<ResourceId> {
        self.producers.lock().clone()
    }

    pub fn consumer_ids(&self) -> Vec<ResourceId> {
        self.consumers.lock().clone()
    }
}

pub fn join(
    registry: &Arc<Registry>,
    room: &Room,
    user_id: String,
    session_id: String,
    display_name: String,
) -> Member {
    let data = MemberData {
        room: room.clone_ref(),
        user_id,
        session_id,
        display_name,
        rtp_capabilities: Mutex::new(None),
        producers: Mutex::new(Vec::new()),
        consumers: Mutex::new(Vec::new()),
    };

    let handle = registry.register(ResourceKind::RoomMember, 0, data, |_inner, _id| {}, |_data| {});
    room.add_member(handle.id());
    handle
}

pub fn leave(member: &Member, registry: &Registry) {
    member.room.remove_member(member.id());
    registry.close(member.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_registers_member_and_adds_to_room() {
        let registry = Registry::new();
        let room = create(&registry, 0, "owner".into(), RoomFlags::MEETING);
        let member = join(&registry, &room, "alice".into(), "sess-1".into(), "Alice".into());

        assert_eq!(room.member_ids(), vec![member.id()]);
        assert_eq!(member.room.id(), room.id());
    }

    #[test]
    fn leave_removes_member_from_room_and_closes_it() {
        let registry = Registry::new();
        let room = create(&registry, 0, "owner".into(), RoomFlags::empty());
        let member = join(&registry, &room, "alice".into(), "sess-1".into(), "Alice".into());
        let member_id = member.id();

        leave(&member, &registry);

        assert!(room.member_ids().is_empty());
        assert!(registry.is_closed(member_id));
    }

    #[test]
    fn close_closes_every_member_then_the_room() {
        let registry = Registry::new();
        let room = create(&registry, 0, "owner".into(), RoomFlags::empty());
        let a = join(&registry, &room, "a".into(), "s1".into(), "A".into());
        let b = join(&registry, &room, "b".into(), "s2".into(), "B".into());
        let (a_id, b_id, room_id) = (a.id(), b.id(), room.id());

        close(&room, &registry);

        assert!(registry.is_closed(a_id));
        assert!(registry.is_closed(b_id));
        assert!(registry.is_closed(room_id));
    }

    #[test]
    fn member_producer_and_consumer_ids_accumulate() {
        let registry = Registry::new();
        let room = create(&registry, 0, "owner".into(), RoomFlags::empty());
        let member = join(&registry, &room, "alice".into(), "s".into(), "Alice".into());

        member.add_producer(ResourceId(42));
        member.add_consumer(ResourceId(43));

        assert_eq!(member.producer_ids(), vec![ResourceId(42)]);
        assert_eq!(member.consumer_ids(), vec![ResourceId(43)]);
    }

    #[test]
    fn rtp_capabilities_round_trip() {
        let registry = Registry::new();
        let room = create(&registry, 0, "owner".into(), RoomFlags::empty());
        let member = join(&registry, &room, "alice".into(), "s".into(), "Alice".into());

        assert!(member.rtp_capabilities().is_none());
        member.set_rtp_capabilities(serde_json::json!({"codecs": []}));
        assert_eq!(member.rtp_capabilities(), Some(serde_json::json!({"codecs": []})));
    }
}
