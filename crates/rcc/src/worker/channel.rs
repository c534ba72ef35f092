use super::frame::{encode_frame, FrameExtractor};
use crate::error::WorkerError;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe::{Receiver, Sender};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

const READ_CHUNK: usize = 64 * 1024;

/// One direction of a worker pipe pair: a growing read-accumulation buffer
/// plus a write buffer under its own mutex, independent of the registry
/// mutex (spec.md §4.B). The buffer lock is a plain sync mutex (held only
/// across memcpys); the sender lock is async since draining holds it across
/// the underlying write.
pub struct ChannelHalf {
    write_buf: SyncMutex<BytesMut>,
    sender: AsyncMutex<Sender>,
}

impl ChannelHalf {
    fn new(sender: Sender) -> Arc<Self> {
        Arc::new(Self {
            write_buf: SyncMutex::new(BytesMut::new()),
            sender: AsyncMutex::new(sender),
        })
    }

    /// Appends a framed message to the write buffer and drains it. Producer
    /// threads may call this concurrently; draining happens under the write
    /// buffer's own lock so it never contends with the registry mutex.
    pub async fn send(&self, payload: &[u8]) -> Result<(), WorkerError> {
        {
            let mut buf = self.write_buf.lock();
            buf.extend_from_slice(&encode_frame(payload));
        }
        self.drain().await
    }

    async fn drain(&self) -> Result<(), WorkerError> {
        loop {
            let chunk = {
                let mut buf = self.write_buf.lock();
                if buf.is_empty() {
                    return Ok(());
                }
                buf.split().freeze()
            };
            let mut sender = self.sender.lock().await;
            // Held across the await: only one writer drains at a time, and
            // tokio's Sender is otherwise unsynchronized across tasks.
            match sender.write_all(&chunk).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    let mut buf = self.write_buf.lock();
                    let mut requeued = BytesMut::from(&chunk[..]);
                    requeued.unsplit(std::mem::take(&mut buf));
                    *buf = requeued;
                    return Ok(());
                }
                Err(e) => return Err(WorkerError::Io(e)),
            }
        }
    }
}

/// Runs the edge-triggered read loop for one direction, handing each
/// completed frame to `on_frame`. Returns when the pipe reaches EOF (the
/// worker process exited or closed that end).
pub async fn read_loop(
    mut receiver: Receiver,
    max_frame_len: usize,
    mut on_frame: impl FnMut(Bytes) + Send,
) {
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut extractor = FrameExtractor::new();
    loop {
        match receiver.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                for frame in extractor.extract_frames(&mut buf, max_frame_len) {
                    on_frame(frame);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                warn!(error = %e, "worker channel read error");
                return;
            }
        }
    }
}

pub fn new_channel_half(sender: Sender) -> Arc<ChannelHalf> {
    ChannelHalf::new(sender)
}
