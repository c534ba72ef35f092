//! Per-producer export (`rct_producer_export`, spec.md §4.F): an auxiliary
//! loopback Plain transport plus a paused Consumer feeding a media-processor
//! subprocess the producer's stream as a single-track SDP.

use super::sdp;
use crate::error::RecordingError;
use crate::graph::{self, Consumer, Producer, Router, Transport};
use crate::graph::transport::{ListenIp, PlainTransportSpec, TransportSpec};
use crate::registry::{Handle, Registry, ResourceId, ResourceKind};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use rcc_config::RecordingSettings;
use serde_json::{json, Value};
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

pub type Export = Handle<ExportData>;

pub struct ExportData {
    /// Weak up-reference: the export does not keep the producer alive
    /// (spec.md §3, "owns ... one Producer (weak up-ref)").
    producer_id: ResourceId,
    pub transport: Transport,
    pub consumer: Consumer,
    pub output_path: PathBuf,
    codec: Value,
    port: u16,
    media_processor_binary: PathBuf,
    close_on_pause: AtomicBool,
    child: AsyncMutex<Option<Child>>,
}

impl ExportData {
    pub fn producer_id(&self) -> ResourceId {
        self.producer_id
    }

    pub fn close_on_pause(&self) -> bool {
        self.close_on_pause.load(Ordering::Acquire)
    }

    pub fn set_close_on_pause(&self, value: bool) {
        self.close_on_pause.store(value, Ordering::Release);
    }

    fn sdp(&self) -> String {
        sdp::render(self.consumer.producer.kind, self.port, &self.codec)
    }
}

/// Picks an unused local UDP port via ephemeral bind + getsockname, then
/// immediately releases it; the aux transport's `connect` below is the
/// actual consumer of the port.
fn reserve_ephemeral_port() -> Result<u16, RecordingError> {
    let socket = UdpSocket::bind(("127.0.0.1", 0))?;
    Ok(socket.local_addr()?.port())
}

fn first_exportable_codec(producer: &Producer) -> Option<Value> {
    producer.consumable_rtp_parameters["codecs"]
        .as_array()?
        .iter()
        .find(|c| {
            !c["mimeType"]
                .as_str()
                .unwrap_or_default()
                .to_ascii_lowercase()
                .ends_with("/rtx")
        })
        .cloned()
}

pub async fn create(
    registry: &Arc<Registry>,
    router: Router,
    producer: &Producer,
    settings: &RecordingSettings,
    output_path: PathBuf,
    close_on_pause: bool,
) -> Result<Export, RecordingError> {
    let codec = first_exportable_codec(producer).ok_or(RecordingError::NoExportableCodec)?;

    let transport = graph::transport::create(
        registry,
        router,
        TransportSpec::Plain(PlainTransportSpec {
            listen_ip: ListenIp { ip: "127.0.0.1".to_string(), announced_ip: None },
            no_mux: false,
            comedia: false,
            enable_sctp: false,
            enable_srtp: false,
            srtp_crypto_suite: None,
            sctp: None,
        }),
    )
    .await?;

    let port = reserve_ephemeral_port()?;
    graph::transport::connect(&transport, json!({ "ip": "127.0.0.1", "port": port })).await?;

    let capabilities = json!({ "codecs": [codec.clone()], "headerExtensions": [] });
    let consumer = graph::consumer::create(registry, transport.clone_ref(), producer.clone_ref(), capabilities).await?;

    let data = ExportData {
        producer_id: producer.id(),
        transport: transport.clone_ref(),
        consumer: consumer.clone_ref(),
        output_path,
        codec,
        port,
        media_processor_binary: settings.media_processor_binary.clone(),
        close_on_pause: AtomicBool::new(close_on_pause),
        child: AsyncMutex::new(None),
    };

    let transport_id = transport.id();
    let consumer_id = consumer.id();
    let handle = registry.register(
        ResourceKind::ProducerExport,
        0,
        data,
        move |inner, _id| {
            inner.close_lk(consumer_id);
            inner.close_lk(transport_id);
        },
        |_data| {},
    );

    start_subprocess(&handle).await?;
    Ok(handle)
}

/// `on_start`: spawns the media-processor subprocess, feeding it the SDP on
/// stdin, and tracks the child so it can be SIGINT/SIGKILL'd on close.
async fn start_subprocess(export: &Export) -> Result<(), RecordingError> {
    if let Some(parent) = export.output_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let mut cmd = Command::new(&export.media_processor_binary);
    cmd.args([
        "-y",
        "-protocol_whitelist",
        "file,rtp,udp",
        "-f",
        "sdp",
        "-i",
        "pipe:0",
    ])
    .arg(&export.output_path)
    .stdin(Stdio::piped())
    .stdout(Stdio::null())
    .stderr(Stdio::inherit())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        let sdp = export.sdp();
        stdin.write_all(sdp.as_bytes()).await.ok();
        drop(stdin);
    }

    *export.child.lock().await = Some(child);
    Ok(())
}

/// `on_pause`: if this export was created with `close_on_pause`, close it
/// entirely (killing the subprocess); otherwise leave the subprocess alone.
pub async fn handle_consumer_pause(export: &Export, registry: &Registry, escalation: Duration) {
    if export.close_on_pause() {
        close(export, registry, escalation).await;
    }
}

/// `on_resume`: (re)spawns the subprocess if it is not already running.
/// Keyframe requests after the configured delay are issued by the caller
/// (the controller has the Producer handle this export doesn't own).
pub async fn handle_consumer_resume(export: &Export) -> Result<(), RecordingError> {
    let running = export.child.lock().await.is_some();
    if !running {
        start_subprocess(export).await?;
    }
    Ok(())
}

/// Terminates the subprocess with SIGINT, escalating to SIGKILL after
/// `escalation` if it hasn't exited, then cascades into the aux transport
/// and consumer and disposes the export itself (spec.md §5 "Cancellation").
pub async fn close(export: &Export, registry: &Registry, escalation: Duration) {
    let mut guard = export.child.lock().await;
    if let Some(mut child) = guard.take() {
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
                warn!(pid, error = %e, "failed to send SIGINT to media processor");
            }
        }
        drop(guard);

        let exited = tokio::time::timeout(escalation, child.wait()).await;
        if exited.is_err() {
            debug!(output = %export.output_path.display(), "media processor did not exit after SIGINT, sending SIGKILL");
            let _ = child.kill().await;
        }
    }

    registry.close(export.id());
}

/// Directory component of the recording filesystem layout (spec.md §4.F):
/// `<root>/<uuid[0:2]>/<uuid[2:4]>/<uuid>/`.
pub fn session_dir(root: &Path, uuid: &str) -> PathBuf {
    root.join(&uuid[0..2]).join(&uuid[2..4]).join(uuid)
}

/// Per-producer output filename: `<relative-ms>-<user-id>-<a|v>.webm`.
pub fn output_filename(relative_ms: u64, user_id: &str, kind: graph::RtpKind) -> String {
    let tag = match kind {
        graph::RtpKind::Audio => "a",
        graph::RtpKind::Video => "v",
    };
    format!("{relative_ms}-{user_id}-{tag}.webm")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_dir_shards_by_uuid_prefix() {
        let uuid = "abcd1234-0000-0000-0000-000000000000";
        let dir = session_dir(Path::new("/recordings"), uuid);
        assert_eq!(dir, PathBuf::from("/recordings/ab/cd/abcd1234-0000-0000-0000-000000000000"));
    }

    #[test]
    fn output_filename_tags_audio_and_video() {
        assert_eq!(output_filename(1500, "alice", graph::RtpKind::Audio), "1500-alice-a.webm");
        assert_eq!(output_filename(0, "bob", graph::RtpKind::Video), "0-bob-v.webm");
    }

    #[test]
    fn reserve_ephemeral_port_returns_a_usable_nonzero_port() {
        let port = reserve_ephemeral_port().unwrap();
        assert_ne!(port, 0);
    }
}
