//! Room recording controller (spec.md §4.F).
//!
//! Owns the mapping from a recording room to the exports it started; a Room
//! itself does not own its exports (the data model lists `ProducerExport` as
//! owning a weak up-reference to its Producer, not the other way around), so
//! that bookkeeping lives here rather than on `RoomData`.

use super::export::{self, Export};
use crate::collaborators::RoomDirectory;
use crate::error::RecordingError;
use crate::graph::room::{MemberData, Room};
use crate::graph::{Producer, Router};
use crate::registry::{Registry, ResourceId, ResourceTypeMask};
use dashmap::DashMap;
use rcc_config::RecordingSettings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, warn};

pub struct RecordingController {
    registry: Arc<Registry>,
    settings: RecordingSettings,
    /// Room id -> the exports it started, keyed by the owning producer's id
    /// so `on_producer_created_or_resumed` can skip producers that already
    /// have one.
    room_exports: DashMap<ResourceId, Vec<(ResourceId, Export)>>,
}

impl RecordingController {
    pub fn new(registry: Arc<Registry>, settings: RecordingSettings) -> Self {
        Self { registry, settings, room_exports: DashMap::new() }
    }

    fn output_path(&self, room: &Room, producer: &Producer, relative_ms: u64, user_id: &str) -> PathBuf {
        let dir = export::session_dir(&self.settings.root_dir, &room.cid);
        dir.join(export::output_filename(relative_ms, user_id, producer.kind))
    }

    /// The Member whose `producer_ids()` contains this producer, used to
    /// recover the owning user's id for the output filename (spec.md §3,
    /// "weak references to produced media resources").
    fn owning_user_id(&self, room: &Room, producer_id: ResourceId) -> String {
        for member_id in room.member_ids() {
            let Some(member) = self.registry.by_id::<MemberData>(member_id, ResourceTypeMask::ROOM_MEMBER) else {
                continue;
            };
            if member.producer_ids().contains(&producer_id) {
                return member.user_id.clone();
            }
        }
        producer_id.to_string()
    }

    /// Starts recording: enumerates every Producer referenced by any Member
    /// of the room (via the host's `RoomDirectory`, which stands in for the
    /// weak-ref membership lookup) and exports each, then marks the room as
    /// recording.
    pub async fn start(&self, room: &Room, router: Router, directory: &dyn RoomDirectory, relative_ms: u64) -> Result<Vec<Export>, RecordingError> {
        let _span = info_span!("recording_session", room = %room.id()).entered();
        let producer_ids = directory.resolve_member_producers(room.id()).await;

        let mut exports = Vec::new();
        for producer_id in producer_ids {
            let Some(producer) = self.registry.by_id::<crate::graph::ProducerData>(producer_id, ResourceTypeMask::PRODUCER)
            else {
                warn!(producer = %producer_id, "producer gone before export could start");
                continue;
            };
            let user_id = self.owning_user_id(room, producer_id);
            let path = self.output_path(room, &producer, relative_ms, &user_id);
            match self.start_export(room, router.clone_ref(), &producer, path, false).await {
                Ok(export) => exports.push(export),
                Err(e) => warn!(producer = %producer_id, error = %e, "failed to start per-producer export"),
            }
        }

        room.begin_recording_session();
        Ok(exports)
    }

    async fn start_export(
        &self,
        room: &Room,
        router: Router,
        producer: &Producer,
        path: PathBuf,
        close_on_pause: bool,
    ) -> Result<Export, RecordingError> {
        let export = export::create(&self.registry, router, producer, &self.settings, path, close_on_pause).await?;
        crate::graph::producer::attach_export(producer, export.id());
        self.room_exports
            .entry(room.id())
            .or_default()
            .push((producer.id(), export.clone_ref()));
        Ok(export)
    }

    /// `producer-created` / `producer-resume`: starts an export for this
    /// producer if the room has already started recording and the producer
    /// doesn't have one yet.
    pub async fn on_producer_event(
        &self,
        room: &Room,
        router: Router,
        producer: &Producer,
        relative_ms: u64,
    ) -> Result<(), RecordingError> {
        if !room.has_started_recording() || producer.export().is_some() {
            return Ok(());
        }
        let user_id = self.owning_user_id(room, producer.id());
        let path = self.output_path(room, producer, relative_ms, &user_id);
        self.start_export(room, router, producer, path, true).await?;
        Ok(())
    }

    pub async fn handle_consumer_pause(&self, export: &Export) {
        export::handle_consumer_pause(export, &self.registry, Duration::from_secs(self.settings.sigkill_escalation_secs)).await;
    }

    /// Respawns the subprocess and, for video, requests a keyframe after the
    /// configured delay so the freshly (re)started encoder has something to
    /// latch onto.
    pub async fn handle_consumer_resume(&self, export: &Export, producer: &Producer) -> Result<(), RecordingError> {
        export::handle_consumer_resume(export).await?;
        if matches!(producer.kind, crate::graph::RtpKind::Video) {
            let delay = Duration::from_secs(self.settings.keyframe_request_delay_secs);
            let producer = producer.clone_ref();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = crate::graph::producer::enable_trace_events(
                    &producer,
                    crate::graph::producer::TraceEventMask::KEYFRAME,
                )
                .await;
            });
        }
        Ok(())
    }

    /// Stops recording: snapshots the room's export list under the dashmap
    /// shard lock, then closes each export outside of it (spec.md §4.F,
    /// "snapshot the id list under lock, then close outside the lock").
    pub async fn stop(&self, room: &Room) {
        let Some((_, exports)) = self.room_exports.remove(&room.id()) else {
            return;
        };
        let escalation = Duration::from_secs(self.settings.sigkill_escalation_secs);
        for (_, export) in exports {
            export::close(&export, &self.registry, escalation).await;
        }
    }
}
