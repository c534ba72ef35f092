//! Consumer entity (spec.md §4.E "Consumer").

use super::identity;
use super::producer::Producer;
use super::transport::Transport;
use crate::error::GraphError;
use crate::ortc;
use crate::registry::{new_uuid_v4, Handle, Registry, ResourceKind};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub type Consumer = Handle<ConsumerData>;

pub struct ConsumerData {
    pub producer: Producer,
    pub transport: Transport,
    pub rtp_capabilities: Value,
    rtp_parameters: parking_lot::Mutex<Value>,
    score: parking_lot::Mutex<Value>,
    producer_score: parking_lot::Mutex<Value>,
    priority: AtomicU32,
    preferred_layer: parking_lot::Mutex<Option<(u8, Option<u8>)>>,
    current_layer: parking_lot::Mutex<Option<(u8, Option<u8>)>>,
    paused: AtomicBool,
    resume_by_producer: AtomicBool,
}

impl ConsumerData {
    pub fn rtp_parameters(&self) -> Value {
        self.rtp_parameters.lock().clone()
    }

    pub fn score(&self) -> Value {
        self.score.lock().clone()
    }

    pub fn producer_score(&self) -> Value {
        self.producer_score.lock().clone()
    }

    pub fn priority(&self) -> u32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: u32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn preferred_layer(&self) -> Option<(u8, Option<u8>)> {
        *self.preferred_layer.lock()
    }

    pub fn current_layer(&self) -> Option<(u8, Option<u8>)> {
        *self.current_layer.lock()
    }

    pub fn set_current_layer(&self, layer: Option<(u8, Option<u8>)>) {
        *self.current_layer.lock() = layer;
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn resume_by_producer(&self) -> bool {
        self.resume_by_producer.load(Ordering::Acquire)
    }
}

/// Picks the first consumable codec the requesting side's capabilities can
/// consume: non-strict match in general, strict (full H.264 PLID
/// resolution) specifically for H.264 (spec.md §4.E).
fn negotiate_codecs(
    consumable_codecs: &[Value],
    capability_codecs: &[Value],
) -> Result<(Value, Option<Value>), GraphError> {
    for codec in consumable_codecs {
        let mime = codec["mimeType"].as_str().unwrap_or_default();
        if mime.eq_ignore_ascii_case("video/h264/rtx") || mime.to_ascii_lowercase().ends_with("/rtx") {
            continue;
        }
        let strict = mime.eq_ignore_ascii_case("video/h264");
        for cap in capability_codecs {
            if let Some(answer) = ortc::codecs_match_and_answer(codec, cap, strict, true)? {
                let rtx = consumable_codecs.iter().find(|c| {
                    c["parameters"]["apt"].as_u64() == codec["payloadType"].as_u64()
                        && c["mimeType"].as_str().unwrap_or_default().to_ascii_lowercase().ends_with("/rtx")
                });
                return Ok((answer, rtx.cloned()));
            }
        }
    }
    Err(GraphError::Ortc(crate::error::OrtcError::new(
        crate::error::OrtcErrorCode::UnsupportedCodec,
        "no capability codec can consume this producer",
    )))
}

/// Requires a Transport and a Producer; negotiates against `rtp_capabilities`
/// and sends `TRANSPORT-CONSUME` with identity
/// `{routerId, transportId, producerId, consumerId}`.
pub async fn create(
    registry: &Arc<Registry>,
    transport: Transport,
    producer: Producer,
    rtp_capabilities: Value,
) -> Result<Consumer, GraphError> {
    let consumable_codecs = producer.consumable_rtp_parameters["codecs"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let capability_codecs = rtp_capabilities["codecs"].as_array().cloned().unwrap_or_default();
    let (codec, rtx) = negotiate_codecs(&consumable_codecs, &capability_codecs)?;

    let mut codecs = vec![codec];
    if let Some(rtx) = rtx {
        codecs.push(rtx);
    }

    let capability_uris: Vec<&str> = rtp_capabilities["headerExtensions"]
        .as_array()
        .map(|exts| exts.iter().filter_map(|e| e["uri"].as_str()).collect())
        .unwrap_or_default();
    let header_extensions: Vec<Value> = producer.consumable_rtp_parameters["headerExtensions"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|ext| {
            ext["uri"]
                .as_str()
                .map(|uri| capability_uris.contains(&uri))
                .unwrap_or(false)
        })
        .collect();

    let encodings = producer.consumable_rtp_parameters["encodings"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let rtcp = producer.consumable_rtp_parameters["rtcp"].clone();

    let rtp_parameters = json!({
        "mid": Value::Null,
        "codecs": codecs,
        "headerExtensions": header_extensions,
        "encodings": encodings,
        "rtcp": rtcp,
    });

    let uuid = new_uuid_v4();
    let response = transport
        .router
        .rpc
        .request(
            "TRANSPORT-CONSUME",
            identity(
                Some(transport.router.id()),
                Some(transport.id()),
                Some(producer.id()),
                None,
                None,
            ),
            Some(json!({
                "id": uuid,
                "producerId": producer.uuid(),
                "kind": match producer.kind { super::RtpKind::Audio => "audio", super::RtpKind::Video => "video" },
                "rtpParameters": rtp_parameters,
                "paused": true,
            })),
        )
        .await?;

    let negotiated_params = response.get("rtpParameters").cloned().unwrap_or(rtp_parameters);
    let producer_score = response.get("producerScore").cloned().unwrap_or(json!([]));

    let data = ConsumerData {
        producer: producer.clone_ref(),
        transport: transport.clone_ref(),
        rtp_capabilities,
        rtp_parameters: parking_lot::Mutex::new(negotiated_params),
        score: parking_lot::Mutex::new(json!({})),
        producer_score: parking_lot::Mutex::new(producer_score),
        priority: AtomicU32::new(1),
        preferred_layer: parking_lot::Mutex::new(None),
        current_layer: parking_lot::Mutex::new(None),
        paused: AtomicBool::new(true),
        resume_by_producer: AtomicBool::new(false),
    };

    let wid = transport.router.wid();
    let handle = registry.register_with_uuid(
        uuid,
        ResourceKind::Consumer,
        wid,
        data,
        |_inner, _id| {},
        |_data| {},
    );
    transport.add_consumer(handle.id());
    producer.add_consumer(handle.id());
    Ok(handle)
}

pub async fn pause(consumer: &Consumer) -> Result<(), GraphError> {
    consumer
        .transport
        .router
        .rpc
        .request("CONSUMER-PAUSE", consumer_identity(consumer), None)
        .await?;
    consumer.paused.store(true, Ordering::Release);
    Ok(())
}

pub async fn resume(consumer: &Consumer) -> Result<(), GraphError> {
    consumer
        .transport
        .router
        .rpc
        .request("CONSUMER-RESUME", consumer_identity(consumer), None)
        .await?;
    consumer.paused.store(false, Ordering::Release);
    Ok(())
}

/// Called when the owning producer pauses/resumes, for consumers created
/// with `resume_by_producer` set: they track the producer's paused state
/// rather than being paused/resumed independently.
pub async fn on_producer_pause_state_change(consumer: &Consumer, producer_paused: bool) -> Result<(), GraphError> {
    if !consumer.resume_by_producer() {
        return Ok(());
    }
    if producer_paused {
        pause(consumer).await
    } else {
        resume(consumer).await
    }
}

pub fn set_resume_by_producer(consumer: &Consumer, enabled: bool) {
    consumer.resume_by_producer.store(enabled, Ordering::Release);
}

fn consumer_identity(consumer: &Consumer) -> Value {
    identity(
        Some(consumer.transport.router.id()),
        Some(consumer.transport.id()),
        Some(consumer.producer.id()),
        Some(consumer.id()),
        None,
    )
}

pub async fn close(consumer: &Consumer, registry: &Registry) {
    let _ = consumer
        .transport
        .router
        .rpc
        .notify("CONSUMER-CLOSE", consumer_identity(consumer), None)
        .await;
    registry.close(consumer.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn negotiate_codecs_skips_rtx_and_picks_first_matching() {
        let consumable = vec![
            json!({"mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000, "channels": 2, "parameters": {}}),
            json!({"mimeType": "audio/rtx", "payloadType": 101, "clockRate": 48000, "parameters": {"apt": 100}}),
        ];
        let capability = vec![json!({"mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000, "channels": 2, "parameters": {}})];

        let (codec, rtx) = negotiate_codecs(&consumable, &capability).unwrap();
        assert_eq!(codec["mimeType"], "audio/opus");
        assert_eq!(rtx.unwrap()["mimeType"], "audio/rtx");
    }

    #[test]
    fn negotiate_codecs_errors_when_nothing_matches() {
        let consumable = vec![json!({"mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000, "parameters": {}})];
        let capability = vec![json!({"mimeType": "video/VP9", "payloadType": 98, "clockRate": 90000, "parameters": {}})];

        let err = negotiate_codecs(&consumable, &capability).unwrap_err();
        assert!(matches!(err, GraphError::Ortc(_)));
    }
}
