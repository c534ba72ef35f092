//! Synthesizes `consumable_rtp_parameters` for a freshly created producer
//! (spec.md §4.D, "Consumable parameters synthesis"). Computed exactly once,
//! at producer creation; the result is treated as immutable thereafter.

use super::{codecs_match_and_answer, too_many_dynamic_payloads};
use crate::error::{OrtcError, OrtcErrorCode};
use rand::Rng;
use serde_json::{json, Value};

struct CodecMapping {
    payload_type: u64,
    mapped_payload_type: u64,
}

/// Output of synthesis: the consumable parameters themselves, plus the
/// `rtpMapping` the worker needs to rewrite incoming packets onto capability
/// payload types.
pub struct Consumable {
    pub params: Value,
    pub rtp_mapping: Value,
}

/// `caps` is the router's (already worker-filtered) RTP capabilities for
/// this producer's `kind`. `producer_params` must already be the output of
/// `validate::validate_rtp_parameters`.
pub fn synthesize(kind: &str, producer_params: &Value, caps: &Value) -> Result<Consumable, OrtcError> {
    let producer_codecs = producer_params["codecs"].as_array().cloned().unwrap_or_default();
    let cap_codecs = caps["codecs"].as_array().cloned().unwrap_or_default();

    // Step 1: bijection codec -> cap-codec for every non-RTX producer codec.
    let mut media_mappings = Vec::new();
    let mut media_answers = Vec::new();
    for codec in &producer_codecs {
        if is_rtx(codec) {
            continue;
        }
        let mut matched = None;
        for cap in &cap_codecs {
            if is_rtx(cap) {
                continue;
            }
            if let Some(answer) = codecs_match_and_answer(codec, cap, true, true)? {
                matched = Some((cap.clone(), answer));
                break;
            }
        }
        let (cap, answer) = matched.ok_or_else(|| {
            OrtcError::new(
                OrtcErrorCode::UnsupportedCodec,
                format!("no capability codec supports {}", codec["mimeType"]),
            )
        })?;
        let payload_type = codec["payloadType"].as_u64().unwrap();
        let mapped_payload_type = cap["preferredPayloadType"].as_u64().ok_or_else(too_many_dynamic_payloads)?;
        media_mappings.push(CodecMapping { payload_type, mapped_payload_type });
        media_answers.push((codec.clone(), cap, answer));
    }

    // Step 2: pair each RTX codec via its `apt` to the matched media codec,
    // then find the cap's RTX codec sharing `apt == matched_cap.preferredPayloadType`.
    let mut rtx_mappings = Vec::new();
    let mut rtx_consumables = Vec::new();
    for codec in &producer_codecs {
        if !is_rtx(codec) {
            continue;
        }
        let apt = codec["parameters"]["apt"]
            .as_u64()
            .ok_or_else(|| OrtcError::new(OrtcErrorCode::InvalidRtpParameters, "RTX codec missing apt"))?;
        let (_, matched_cap, _) = media_answers
            .iter()
            .find(|(media_codec, _, _)| media_codec["payloadType"].as_u64() == Some(apt))
            .ok_or_else(|| OrtcError::new(OrtcErrorCode::NoRtxAssociatedCodec, "RTX apt references unknown codec"))?;
        let matched_preferred = matched_cap["preferredPayloadType"].as_u64();
        let cap_rtx = cap_codecs
            .iter()
            .find(|c| is_rtx(c) && c["parameters"]["apt"].as_u64() == matched_preferred)
            .ok_or_else(|| OrtcError::new(OrtcErrorCode::NoRtxAssociatedCodec, "no RTX capability codec for matched media codec"))?;

        let payload_type = codec["payloadType"].as_u64().unwrap();
        let mapped_payload_type = cap_rtx["preferredPayloadType"].as_u64().ok_or_else(too_many_dynamic_payloads)?;
        rtx_mappings.push(CodecMapping { payload_type, mapped_payload_type });
        rtx_consumables.push(json!({
            "mimeType": cap_rtx["mimeType"],
            "clockRate": cap_rtx["clockRate"],
            "channels": cap_rtx.get("channels"),
            "rtcpFeedback": cap_rtx.get("rtcpFeedback").cloned().unwrap_or(json!([])),
            "payloadType": mapped_payload_type,
            "parameters": json!({ "apt": mapped_payload_type.min(matched_preferred.unwrap_or(0)) }),
        }));
    }

    // Step 3: rtpMapping.codecs.
    let mapping_codecs: Vec<Value> = media_mappings
        .iter()
        .chain(rtx_mappings.iter())
        .map(|m| json!({ "payloadType": m.payload_type, "mappedPayloadType": m.mapped_payload_type }))
        .collect();

    // Step 4: rtpMapping.encodings — random base ssrc, sequential offsets.
    let producer_encodings = producer_params["encodings"].as_array().cloned().unwrap_or_default();
    let base_ssrc: u32 = rand::rng().random_range(100_000_000..900_000_000);
    let mut mapping_encodings = Vec::with_capacity(producer_encodings.len());
    for (i, enc) in producer_encodings.iter().enumerate() {
        let mapped_ssrc = base_ssrc + i as u32;
        let mut mapped = json!({ "mappedSsrc": mapped_ssrc });
        if let Some(rid) = enc.get("rid").filter(|v| !v.is_null()) {
            mapped["rid"] = rid.clone();
        }
        if let Some(ssrc) = enc.get("ssrc").filter(|v| !v.is_null()) {
            mapped["ssrc"] = ssrc.clone();
        }
        if let Some(mode) = enc.get("scalabilityMode").filter(|v| !v.is_null()) {
            mapped["scalabilityMode"] = mode.clone();
        }
        mapping_encodings.push(mapped);
    }

    // Step 5: consumable.codecs — cloned cap-codec fields, producer params.
    let mut consumable_codecs = Vec::new();
    for (codec, cap, _answer) in &media_answers {
        consumable_codecs.push(json!({
            "mimeType": cap["mimeType"],
            "clockRate": cap["clockRate"],
            "channels": cap.get("channels"),
            "rtcpFeedback": cap.get("rtcpFeedback").cloned().unwrap_or(json!([])),
            "payloadType": cap["preferredPayloadType"],
            "parameters": codec["parameters"],
        }));
    }
    consumable_codecs.extend(rtx_consumables);

    // Step 6: consumable.headerExtensions — caps filtered by kind + direction.
    let mut consumable_header_extensions = Vec::new();
    if let Some(cap_exts) = caps["headerExtensions"].as_array() {
        for ext in cap_exts {
            let ext_kind = ext.get("kind").and_then(Value::as_str).unwrap_or(kind);
            let direction = ext.get("direction").and_then(Value::as_str).unwrap_or("sendrecv");
            if ext_kind != kind || !matches!(direction, "sendrecv" | "sendonly") {
                continue;
            }
            consumable_header_extensions.push(json!({
                "uri": ext["uri"],
                "id": ext["preferredId"],
                "encrypt": ext.get("preferredEncrypt").cloned().unwrap_or(json!(false)),
                "parameters": json!({}),
            }));
        }
    }

    // Step 7: consumable.encodings — producer encodings stripped of
    // {rid, rtx, ssrc, codecPayloadType}, ssrc = mappedSsrc.
    let mut consumable_encodings = Vec::new();
    for (enc, mapped) in producer_encodings.iter().zip(mapping_encodings.iter()) {
        let mut out = enc.clone();
        if let Some(obj) = out.as_object_mut() {
            obj.remove("rid");
            obj.remove("rtx");
            obj.remove("codecPayloadType");
            obj.insert("ssrc".to_string(), mapped["mappedSsrc"].clone());
        }
        consumable_encodings.push(out);
    }

    // Step 8: consumable.rtcp.
    let cname = producer_params["rtcp"]["cname"].as_str().map(str::to_string);
    let consumable_rtcp = json!({ "cname": cname, "reducedSize": true, "mux": true });

    let params = json!({
        "mid": Value::Null,
        "codecs": consumable_codecs,
        "headerExtensions": consumable_header_extensions,
        "encodings": consumable_encodings,
        "rtcp": consumable_rtcp,
    });
    let rtp_mapping = json!({ "codecs": mapping_codecs, "encodings": mapping_encodings });

    Ok(Consumable { params, rtp_mapping })
}

fn is_rtx(codec: &Value) -> bool {
    codec["mimeType"]
        .as_str()
        .map(|m| m.to_ascii_lowercase().ends_with("/rtx"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router_caps() -> Value {
        json!({
            "codecs": [
                { "mimeType": "audio/opus", "clockRate": 48000, "channels": 2,
                  "preferredPayloadType": 100, "rtcpFeedback": [] },
            ],
            "headerExtensions": [
                { "uri": "urn:ietf:params:rtp-hdrext:sdes:mid", "kind": "audio",
                  "direction": "sendrecv", "preferredId": 1, "preferredEncrypt": false },
            ],
        })
    }

    #[test]
    fn opus_producer_maps_onto_the_capability_payload_type() {
        let producer_params = json!({
            "mid": Value::Null,
            "codecs": [
                { "mimeType": "audio/opus", "payloadType": 111, "clockRate": 48000,
                  "channels": 2, "parameters": {}, "rtcpFeedback": [] },
            ],
            "headerExtensions": [],
            "rtcp": { "cname": "abc123", "reducedSize": true },
            "encodings": [ { "ssrc": 1111 } ],
        });
        let out = synthesize("audio", &producer_params, &router_caps()).unwrap();
        assert_eq!(out.params["codecs"][0]["payloadType"], json!(100));
        assert_eq!(out.params["rtcp"]["mux"], json!(true));
        assert_eq!(out.params["rtcp"]["cname"], json!("abc123"));
    }

    #[test]
    fn unsupported_codec_is_rejected() {
        let producer_params = json!({
            "mid": Value::Null,
            "codecs": [
                { "mimeType": "audio/g722", "payloadType": 9, "clockRate": 8000,
                  "channels": 1, "parameters": {}, "rtcpFeedback": [] },
            ],
            "headerExtensions": [],
            "rtcp": { "cname": Value::Null, "reducedSize": true },
            "encodings": [],
        });
        let err = synthesize("audio", &producer_params, &router_caps()).unwrap_err();
        assert_eq!(err.code(), OrtcErrorCode::UnsupportedCodec);
    }
}
