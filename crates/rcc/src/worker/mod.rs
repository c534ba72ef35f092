mod channel;
mod frame;
mod process;

pub use frame::{encode_frame, FrameExtractor, LENGTH_PREFIX_BYTES};

use crate::error::WorkerError;
use bytes::Bytes;
use channel::{new_channel_half, read_loop, ChannelHalf};
use rcc_config::WorkerSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// One subprocess media worker and its four-pipe IPC channel. Message and
/// payload frames are delivered to the callbacks supplied at spawn time;
/// everything above this (request/response matching, event decoding) lives
/// in `rpc`.
pub struct WorkerAdapter {
    pub wid: u32,
    msg: Arc<ChannelHalf>,
    payload: Arc<ChannelHalf>,
    closed: AtomicBool,
    closed_notify: Arc<Notify>,
}

impl WorkerAdapter {
    /// Spawns the subprocess, wires both channels, and starts their read
    /// loops. `on_message`/`on_payload` run on dedicated tasks and must not
    /// block; `on_closed` fires once, when the child exits for any reason.
    pub fn spawn(
        wid: u32,
        settings: &WorkerSettings,
        max_frame_len: usize,
        mut on_message: impl FnMut(Bytes) + Send + 'static,
        mut on_payload: impl FnMut(Bytes) + Send + 'static,
        on_closed: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<Self>, WorkerError> {
        let spawned = process::spawn(wid, settings)?;

        let msg = new_channel_half(spawned.pipes.msg_in);
        let payload = new_channel_half(spawned.pipes.payload_in);

        let adapter = Arc::new(Self {
            wid,
            msg,
            payload,
            closed: AtomicBool::new(false),
            closed_notify: Arc::new(Notify::new()),
        });

        tokio::spawn(read_loop(spawned.pipes.msg_out, max_frame_len, move |f| {
            on_message(f)
        }));
        tokio::spawn(read_loop(spawned.pipes.payload_out, max_frame_len, move |f| {
            on_payload(f)
        }));

        let closed_adapter = adapter.clone();
        let mut child = spawned.child;
        tokio::spawn(async move {
            let status = child.wait().await;
            info!(wid, ?status, "worker subprocess exited");
            closed_adapter.closed.store(true, Ordering::Release);
            closed_adapter.closed_notify.notify_waiters();
            on_closed();
        });

        Ok(adapter)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn send_message(&self, payload: &[u8]) -> Result<(), WorkerError> {
        if self.is_closed() {
            return Err(WorkerError::WorkerGone);
        }
        self.msg.send(payload).await
    }

    pub async fn send_payload(&self, payload: &[u8]) -> Result<(), WorkerError> {
        if self.is_closed() {
            return Err(WorkerError::WorkerGone);
        }
        self.payload.send(payload).await
    }

    /// Resolves once the worker has exited; used by RPC waiters to detect
    /// "worker gone" without polling.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.closed_notify.notified().await;
    }
}

impl Drop for WorkerAdapter {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(wid = self.wid, "worker adapter dropped while still running");
        }
    }
}
