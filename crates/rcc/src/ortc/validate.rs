//! Field-by-field validation and normalization of inbound `rtp_parameters`
//! (spec.md §4.D). Malformed input always fails with `invalid-rtp-parameters`
//! and an explanatory message; valid input is returned normalized (defaults
//! filled in) so every downstream consumer sees the same shape.

use crate::error::{OrtcError, OrtcErrorCode};
use serde_json::{json, Map, Value};

fn fail(message: impl Into<String>) -> OrtcError {
    OrtcError::new(OrtcErrorCode::InvalidRtpParameters, message)
}

fn as_object(v: &Value, what: &str) -> Result<Map<String, Value>, OrtcError> {
    v.as_object().cloned().ok_or_else(|| fail(format!("{what} must be an object")))
}

fn as_array<'a>(v: &'a Value, what: &str) -> Result<&'a Vec<Value>, OrtcError> {
    v.as_array().ok_or_else(|| fail(format!("{what} must be an array")))
}

/// Validates and normalizes `rtp_parameters`, returning the normalized JSON
/// object. `kind` is `"audio"` or `"video"`.
pub fn validate_rtp_parameters(kind: &str, params: &Value) -> Result<Value, OrtcError> {
    let obj = as_object(params, "rtpParameters")?;

    let mid = match obj.get("mid") {
        None | Some(Value::Null) => Value::Null,
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(_) => return Err(fail("mid must be a string")),
    };

    let codecs_in = as_array(obj.get("codecs").unwrap_or(&Value::Null), "codecs")?;
    let mut codecs = Vec::with_capacity(codecs_in.len());
    for codec in codecs_in {
        codecs.push(validate_codec(kind, codec)?);
    }

    let mut header_extensions = Vec::new();
    if let Some(exts) = obj.get("headerExtensions") {
        for ext in as_array(exts, "headerExtensions")? {
            header_extensions.push(validate_header_extension(ext)?);
        }
    }

    let rtcp = validate_rtcp(obj.get("rtcp"))?;

    let mut encodings = Vec::new();
    if let Some(encs) = obj.get("encodings") {
        for enc in as_array(encs, "encodings")? {
            encodings.push(validate_encoding(enc)?);
        }
    }

    Ok(json!({
        "mid": mid,
        "codecs": codecs,
        "headerExtensions": header_extensions,
        "rtcp": rtcp,
        "encodings": encodings,
    }))
}

fn validate_codec(kind: &str, codec: &Value) -> Result<Value, OrtcError> {
    let obj = as_object(codec, "codec")?;

    let mime_type = obj
        .get("mimeType")
        .and_then(Value::as_str)
        .ok_or_else(|| fail("codec.mimeType is required"))?;
    let prefix = format!("{kind}/");
    if !mime_type.to_ascii_lowercase().starts_with(&prefix) {
        return Err(fail(format!("codec.mimeType must start with \"{prefix}\"")));
    }

    let payload_type = obj
        .get("payloadType")
        .and_then(Value::as_u64)
        .ok_or_else(|| fail("codec.payloadType must be an integer"))?;
    let clock_rate = obj
        .get("clockRate")
        .and_then(Value::as_u64)
        .ok_or_else(|| fail("codec.clockRate must be an integer"))?;

    let channels = if kind == "audio" {
        Some(obj.get("channels").and_then(Value::as_u64).unwrap_or(1))
    } else {
        None
    };

    let parameters_value = obj.get("parameters").cloned().unwrap_or(json!({}));
    let mut parameters = as_object(&parameters_value, "codec.parameters")?;
    if let Some(apt) = parameters.get("apt") {
        if !apt.is_u64() && !apt.is_i64() {
            return Err(fail("codec.parameters.apt must be an integer"));
        }
    }

    let mut rtcp_feedback = Vec::new();
    if let Some(fb) = obj.get("rtcpFeedback") {
        for entry in as_array(fb, "codec.rtcpFeedback")? {
            let fb_obj = as_object(entry, "codec.rtcpFeedback entry")?;
            let ty = fb_obj
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| fail("rtcpFeedback.type is required"))?
                .to_string();
            let parameter = fb_obj
                .get("parameter")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            rtcp_feedback.push(json!({ "type": ty, "parameter": parameter }));
        }
    }

    let mut out = json!({
        "mimeType": mime_type,
        "payloadType": payload_type,
        "clockRate": clock_rate,
        "parameters": std::mem::take(&mut parameters),
        "rtcpFeedback": rtcp_feedback,
    });
    if let Some(channels) = channels {
        out["channels"] = json!(channels);
    }
    Ok(out)
}

fn validate_header_extension(ext: &Value) -> Result<Value, OrtcError> {
    let obj = as_object(ext, "headerExtension")?;
    let uri = obj
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| fail("headerExtension.uri is required"))?
        .to_string();
    let id = obj
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| fail("headerExtension.id must be an integer"))?;
    let encrypt = obj.get("encrypt").and_then(Value::as_bool).unwrap_or(false);
    let parameters = obj.get("parameters").cloned().unwrap_or(json!({}));
    Ok(json!({ "uri": uri, "id": id, "encrypt": encrypt, "parameters": parameters }))
}

fn validate_rtcp(rtcp: Option<&Value>) -> Result<Value, OrtcError> {
    let obj = match rtcp {
        None | Some(Value::Null) => Map::new(),
        Some(v) => as_object(v, "rtcp")?,
    };
    let cname = obj.get("cname").and_then(Value::as_str).map(str::to_string);
    let reduced_size = obj.get("reducedSize").and_then(Value::as_bool).unwrap_or(true);
    Ok(json!({ "cname": cname, "reducedSize": reduced_size }))
}

fn validate_encoding(enc: &Value) -> Result<Value, OrtcError> {
    let obj = as_object(enc, "encoding")?;
    let ssrc = obj.get("ssrc").and_then(Value::as_u64);
    let rid = obj.get("rid").and_then(Value::as_str).map(str::to_string);
    let rtx_ssrc = obj
        .get("rtx")
        .and_then(|r| r.get("ssrc"))
        .and_then(Value::as_u64);
    let dtx = obj.get("dtx").and_then(Value::as_bool).unwrap_or(false);
    let scalability_mode = obj
        .get("scalabilityMode")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(json!({
        "ssrc": ssrc,
        "rid": rid,
        "rtx": rtx_ssrc.map(|s| json!({ "ssrc": s })),
        "dtx": dtx,
        "scalabilityMode": scalability_mode,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_a_minimal_audio_codec() {
        let params = json!({
            "codecs": [{ "mimeType": "audio/opus", "payloadType": 100, "clockRate": 48000 }],
        });
        let normalized = validate_rtp_parameters("audio", &params).unwrap();
        let codec = &normalized["codecs"][0];
        assert_eq!(codec["channels"], 1);
        assert_eq!(codec["rtcpFeedback"], json!([]));
        assert_eq!(normalized["rtcp"]["reducedSize"], true);
    }

    #[test]
    fn video_codecs_get_no_channels_field() {
        let params = json!({
            "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }],
        });
        let normalized = validate_rtp_parameters("video", &params).unwrap();
        assert!(normalized["codecs"][0].get("channels").is_none());
    }

    #[test]
    fn rejects_mime_type_mismatched_with_kind() {
        let params = json!({
            "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }],
        });
        let err = validate_rtp_parameters("audio", &params).unwrap_err();
        assert_eq!(err.code(), OrtcErrorCode::InvalidRtpParameters);
    }

    #[test]
    fn rejects_non_integer_apt_parameter() {
        let params = json!({
            "codecs": [{
                "mimeType": "video/rtx", "payloadType": 97, "clockRate": 90000,
                "parameters": { "apt": "not-a-number" },
            }],
        });
        assert!(validate_rtp_parameters("video", &params).is_err());
    }

    #[test]
    fn preserves_rtcp_feedback_entries() {
        let params = json!({
            "codecs": [{
                "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000,
                "rtcpFeedback": [{ "type": "nack", "parameter": "" }, { "type": "ccm", "parameter": "fir" }],
            }],
        });
        let normalized = validate_rtp_parameters("video", &params).unwrap();
        let fb = normalized["codecs"][0]["rtcpFeedback"].as_array().unwrap();
        assert_eq!(fb.len(), 2);
        assert_eq!(fb[1]["parameter"], "fir");
    }

    #[test]
    fn encoding_carries_rtx_ssrc_and_scalability_mode() {
        let params = json!({
            "codecs": [{ "mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000 }],
            "encodings": [{ "ssrc": 1111, "rtx": { "ssrc": 2222 }, "scalabilityMode": "L1T3" }],
        });
        let normalized = validate_rtp_parameters("video", &params).unwrap();
        let encoding = &normalized["encodings"][0];
        assert_eq!(encoding["ssrc"], 1111);
        assert_eq!(encoding["rtx"]["ssrc"], 2222);
        assert_eq!(encoding["scalabilityMode"], "L1T3");
    }

    #[test]
    fn rejects_non_object_rtp_parameters() {
        let err = validate_rtp_parameters("audio", &json!("not-an-object")).unwrap_err();
        assert_eq!(err.code(), OrtcErrorCode::InvalidRtpParameters);
    }
}
