//! Narrow seams into the host application: the document store, HTTP router
//! and static-asset serving are explicitly out of scope, so the recording
//! controller and post-processor talk to the host only through these two
//! traits.

use async_trait::async_trait;
use std::path::Path;

use crate::registry::ResourceId;

/// Stands in for the document database's users/rooms/joins persistence:
/// given a room, what producers does it currently have.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn resolve_member_producers(&self, room: ResourceId) -> Vec<ResourceId>;
}

/// Stands in for patching the room document with the composite recording
/// path and notifying participants over the outer HTTP/WS layer.
#[async_trait]
pub trait RecordingSink: Send + Sync {
    async fn on_room_recorded(&self, room: ResourceId, composite_path: &Path);
}
