//! SDP synthesis for a per-producer export (spec.md §4.F).

use crate::graph::RtpKind;
use serde_json::Value;

/// A single RTP stream descriptor, enough to feed a media processor that
/// just wants to read one audio or video track off a local UDP port.
pub fn render(kind: RtpKind, port: u16, codec: &Value) -> String {
    let pt = codec["payloadType"].as_u64().unwrap_or(0);
    let mime = codec["mimeType"].as_str().unwrap_or("");
    let encoding_name = mime.split('/').nth(1).unwrap_or(mime);
    let clock_rate = codec["clockRate"].as_u64().unwrap_or(90_000);
    let channels = codec["channels"].as_u64();

    let rtpmap = match channels {
        Some(ch) if ch > 1 => format!("a=rtpmap:{pt} {encoding_name}/{clock_rate}/{ch}"),
        _ => format!("a=rtpmap:{pt} {encoding_name}/{clock_rate}"),
    };

    format!(
        "v=0\r\n\
         o=- 0 0 IN IP4 127.0.0.1\r\n\
         s=Wirow\r\n\
         c=IN IP4 127.0.0.1\r\n\
         t=0 0\r\n\
         m={} {} RTP/AVP {}\r\n\
         {}\r\n\
         a=sendonly\r\n",
        kind.as_str(),
        port,
        pt,
        rtpmap,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_audio_stream_with_channels() {
        let codec = json!({ "mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000, "channels": 2 });
        let sdp = render(RtpKind::Audio, 54321, &codec);
        assert!(sdp.contains("m=audio 54321 RTP/AVP 100"));
        assert!(sdp.contains("a=rtpmap:100 opus/48000/2"));
        assert!(sdp.contains("a=sendonly"));
    }

    #[test]
    fn renders_video_stream_without_channel_count() {
        let codec = json!({ "mimeType": "video/VP8", "payloadType": 101, "clockRate": 90000 });
        let sdp = render(RtpKind::Video, 1234, &codec);
        assert!(sdp.contains("m=video 1234 RTP/AVP 101"));
        assert!(sdp.contains("a=rtpmap:101 VP8/90000"));
    }
}
