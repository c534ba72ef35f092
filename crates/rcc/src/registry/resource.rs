use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Mirrors the `RCT_TYPE_*` bitmask from the original implementation: a
    /// lookup can ask for "any transport kind" or "producer or producer-data"
    /// in a single mask rather than matching on every variant by hand.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceTypeMask: u32 {
        const ROUTER             = 0x0001;
        const TRANSPORT_WEBRTC   = 0x0002;
        const TRANSPORT_PLAIN    = 0x0004;
        const TRANSPORT_DIRECT   = 0x0008;
        const TRANSPORT_PIPE     = 0x0010;
        const PRODUCER           = 0x0020;
        const PRODUCER_DATA      = 0x0040;
        const CONSUMER           = 0x0080;
        const CONSUMER_DATA      = 0x0100;
        const OBSERVER_AUDIO_LEVEL = 0x0200;
        const OBSERVER_ACTIVE_SPEAKER = 0x0400;
        const ROOM               = 0x0800;
        const ROOM_MEMBER        = 0x1000;
        const PRODUCER_EXPORT    = 0x2000;
        const WORKER_ADAPTER     = 0x4000;

        const TRANSPORT_ALL = Self::TRANSPORT_WEBRTC.bits() | Self::TRANSPORT_PLAIN.bits()
            | Self::TRANSPORT_DIRECT.bits() | Self::TRANSPORT_PIPE.bits();
        const PRODUCER_ALL = Self::PRODUCER.bits() | Self::PRODUCER_DATA.bits();
        const CONSUMER_ALL = Self::CONSUMER.bits() | Self::CONSUMER_DATA.bits();
        const OBSERVER_ALL = Self::OBSERVER_AUDIO_LEVEL.bits() | Self::OBSERVER_ACTIVE_SPEAKER.bits();
        const ALL = u32::MAX;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Router,
    TransportWebRtc,
    TransportPlain,
    TransportDirect,
    TransportPipe,
    Producer,
    ProducerData,
    Consumer,
    ConsumerData,
    ObserverAudioLevel,
    ObserverActiveSpeaker,
    Room,
    RoomMember,
    ProducerExport,
    WorkerAdapter,
}

impl ResourceKind {
    pub fn mask(self) -> ResourceTypeMask {
        match self {
            ResourceKind::Router => ResourceTypeMask::ROUTER,
            ResourceKind::TransportWebRtc => ResourceTypeMask::TRANSPORT_WEBRTC,
            ResourceKind::TransportPlain => ResourceTypeMask::TRANSPORT_PLAIN,
            ResourceKind::TransportDirect => ResourceTypeMask::TRANSPORT_DIRECT,
            ResourceKind::TransportPipe => ResourceTypeMask::TRANSPORT_PIPE,
            ResourceKind::Producer => ResourceTypeMask::PRODUCER,
            ResourceKind::ProducerData => ResourceTypeMask::PRODUCER_DATA,
            ResourceKind::Consumer => ResourceTypeMask::CONSUMER,
            ResourceKind::ConsumerData => ResourceTypeMask::CONSUMER_DATA,
            ResourceKind::ObserverAudioLevel => ResourceTypeMask::OBSERVER_AUDIO_LEVEL,
            ResourceKind::ObserverActiveSpeaker => ResourceTypeMask::OBSERVER_ACTIVE_SPEAKER,
            ResourceKind::Room => ResourceTypeMask::ROOM,
            ResourceKind::RoomMember => ResourceTypeMask::ROOM_MEMBER,
            ResourceKind::ProducerExport => ResourceTypeMask::PRODUCER_EXPORT,
            ResourceKind::WorkerAdapter => ResourceTypeMask::WORKER_ADAPTER,
        }
    }
}

/// 31-bit id, monotonically increasing, wrapping at `2^31 - 1` per spec.
/// Wrapping re-uses ids; see the Open Questions note in SPEC_FULL.md about
/// generation counters, preserved here as documented observed behavior
/// rather than "fixed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const MAX_ID: u32 = (1u32 << 31) - 1;

/// Base fields shared by every resource kind (spec.md §3). `probe()` returns
/// a clone of this struct with no pointers back into registry storage.
#[derive(Debug, Clone)]
pub struct ResourceBase {
    pub id: ResourceId,
    pub uuid: String,
    pub kind: ResourceKind,
    pub wid: u32,
    pub closed: bool,
}

/// A 36-character RFC-4122 v4 string, as spec.md §3 requires.
pub fn new_uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}
