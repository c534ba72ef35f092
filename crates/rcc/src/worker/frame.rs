use crate::error::WorkerError;
use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// `uint32le length | <length bytes>` framing used on all four worker pipes
/// (spec.md §4.B). Distinct from the netstring framing some mediasoup forks
/// use on their message channel; payload and message channels here share the
/// same wire format.
pub const LENGTH_PREFIX_BYTES: usize = 4;

pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

/// Pulls complete frames out of a read-accumulation buffer across however
/// many reads it takes. Kept separate from the buffer itself because an
/// oversize frame's payload can span more than one read: `discarding` tracks
/// how many more bytes belong to the frame currently being skipped.
#[derive(Default)]
pub struct FrameExtractor {
    discarding: usize,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls every complete frame currently available out of `buf`, leaving
    /// any trailing partial frame in place for the next read. A frame over
    /// `max_frame_len` is dropped and logged rather than treated as a fatal
    /// protocol error, since a single bad frame shouldn't take the whole
    /// worker channel down (spec.md §4.B).
    pub fn extract_frames(&mut self, buf: &mut BytesMut, max_frame_len: usize) -> Vec<Bytes> {
        let mut frames = Vec::new();
        loop {
            if self.discarding > 0 {
                let take = self.discarding.min(buf.len());
                buf.advance(take);
                self.discarding -= take;
                if self.discarding > 0 {
                    return frames;
                }
                continue;
            }
            if buf.len() < LENGTH_PREFIX_BYTES {
                return frames;
            }
            let len = u32::from_le_bytes(buf[..LENGTH_PREFIX_BYTES].try_into().unwrap()) as usize;
            if len > max_frame_len {
                buf.advance(LENGTH_PREFIX_BYTES);
                warn!(
                    "{}",
                    WorkerError::FrameTooLarge {
                        len,
                        max: max_frame_len,
                    }
                );
                self.discarding = len;
                continue;
            }
            if buf.len() < LENGTH_PREFIX_BYTES + len {
                return frames;
            }
            buf.advance(LENGTH_PREFIX_BYTES);
            frames.push(buf.split_to(len).freeze());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_frame() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"hello"));
        let frames = FrameExtractor::new().extract_frames(&mut buf, 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn leaves_a_partial_frame_for_next_read() {
        let mut buf = BytesMut::new();
        let full = encode_frame(b"hello world");
        buf.extend_from_slice(&full[..full.len() - 3]);
        let mut extractor = FrameExtractor::new();
        let frames = extractor.extract_frames(&mut buf, 1024);
        assert!(frames.is_empty());
        assert!(!buf.is_empty());

        buf.extend_from_slice(&full[full.len() - 3..]);
        let frames = extractor.extract_frames(&mut buf, 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"hello world")]);
    }

    #[test]
    fn extracts_several_frames_from_one_read() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"a"));
        buf.extend_from_slice(&encode_frame(b"bb"));
        buf.extend_from_slice(&encode_frame(b"ccc"));
        let frames = FrameExtractor::new().extract_frames(&mut buf, 1024);
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"a"),
                Bytes::from_static(b"bb"),
                Bytes::from_static(b"ccc"),
            ]
        );
    }

    #[test]
    fn drops_an_oversize_frame_and_keeps_reading_later_ones() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(2_000_000u32).to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        let mut extractor = FrameExtractor::new();
        let frames = extractor.extract_frames(&mut buf, 1024 * 1024);
        assert!(frames.is_empty());
        assert_eq!(extractor.discarding, 2_000_000 - 16);

        // The rest of the oversize payload arrives in a later read, followed
        // immediately by a normal frame; both should be handled correctly.
        buf.extend_from_slice(&vec![0u8; 2_000_000 - 16]);
        buf.extend_from_slice(&encode_frame(b"next"));
        let frames = extractor.extract_frames(&mut buf, 1024 * 1024);
        assert_eq!(frames, vec![Bytes::from_static(b"next")]);
        assert_eq!(extractor.discarding, 0);
    }
}
