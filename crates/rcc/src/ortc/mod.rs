pub mod consumable;
pub mod h264;
pub mod scalability;
pub mod validate;

pub use validate::validate_rtp_parameters;

use crate::error::{OrtcError, OrtcErrorCode};
use serde_json::Value;

fn mime_type_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn is_h264(mime_type: &str) -> bool {
    mime_type.eq_ignore_ascii_case("video/h264")
}

fn is_vp9(mime_type: &str) -> bool {
    mime_type.eq_ignore_ascii_case("video/vp9")
}

/// Codec match per spec.md §4.D: mimeType/clockRate/channels equality, plus
/// codec-specific parameter checks for H.264 (packetization-mode, and in
/// strict mode the profile-level-id answer algorithm) and VP9 (profile-id).
/// Callers that also need the rewritten answer codec (the `modify` case)
/// should use `codecs_match_and_answer` instead.
pub fn codecs_match(a: &Value, b: &Value, strict: bool) -> Result<bool, OrtcError> {
    let (Some(mime_a), Some(mime_b)) = (
        a.get("mimeType").and_then(Value::as_str),
        b.get("mimeType").and_then(Value::as_str),
    ) else {
        return Ok(false);
    };
    if !mime_type_eq(mime_a, mime_b) {
        return Ok(false);
    }
    if a.get("clockRate") != b.get("clockRate") {
        return Ok(false);
    }
    if let (Some(ca), Some(cb)) = (a.get("channels"), b.get("channels")) {
        if ca != cb {
            return Ok(false);
        }
    }

    if is_h264(mime_a) {
        let params_a = a.get("parameters").cloned().unwrap_or_default();
        let params_b = b.get("parameters").cloned().unwrap_or_default();
        let pm_a = params_a.get("packetization-mode").and_then(Value::as_u64).unwrap_or(0);
        let pm_b = params_b.get("packetization-mode").and_then(Value::as_u64).unwrap_or(0);
        if pm_a != pm_b {
            return Ok(false);
        }
        if strict {
            // Profile equality (and, without asymmetry, level compatibility)
            // is enforced by `plid_to_answer` itself; a mismatch surfaces as
            // `Err` and aborts the match. The resolved answer PLID is only
            // needed by callers that asked to rewrite `b` — see
            // `codecs_match_and_answer`.
            h264::plid_to_answer(&params_a, &params_b)?;
        }
    } else if is_vp9(mime_a) && strict {
        let profile_a = a
            .get("parameters")
            .and_then(|p| p.get("profile-id"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let profile_b = b
            .get("parameters")
            .and_then(|p| p.get("profile-id"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if profile_a != profile_b {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Same matching rule as `codecs_match`, but returns the rewritten answer
/// codec (a clone of `b` with `profile-level-id` patched for H.264) instead
/// of mutating in place — easier to reason about under the registry's
/// immutable-after-creation invariant for consumable parameters.
pub fn codecs_match_and_answer(a: &Value, b: &Value, strict: bool, modify: bool) -> Result<Option<Value>, OrtcError> {
    if !codecs_match(a, b, strict)? {
        return Ok(None);
    }
    if !modify || !is_h264(a.get("mimeType").and_then(Value::as_str).unwrap_or_default()) {
        return Ok(Some(b.clone()));
    }
    let params_a = a.get("parameters").cloned().unwrap_or_default();
    let params_b = b.get("parameters").cloned().unwrap_or_default();
    let mut answer = b.clone();
    if let Some(plid) = h264::plid_to_answer(&params_a, &params_b)? {
        let written = h264::write(plid)?;
        answer["parameters"]["profile-level-id"] = Value::String(written);
    }
    Ok(Some(answer))
}

pub(crate) fn too_many_dynamic_payloads() -> OrtcError {
    OrtcError::new(OrtcErrorCode::TooManyDynamicPayloads, "exhausted dynamic payload type range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mime_type_case_differences_still_match() {
        let a = json!({"mimeType": "audio/opus", "clockRate": 48000, "channels": 2});
        let b = json!({"mimeType": "AUDIO/OPUS", "clockRate": 48000, "channels": 2});
        assert!(codecs_match(&a, &b, false).unwrap());
    }

    #[test]
    fn h264_non_strict_match_ignores_profile_level_id() {
        let a = json!({
            "mimeType": "video/H264", "clockRate": 90000,
            "parameters": {"packetization-mode": 1, "profile-level-id": "42e01f"},
        });
        let b = json!({
            "mimeType": "video/h264", "clockRate": 90000,
            "parameters": {"packetization-mode": 1, "profile-level-id": "4d0032"},
        });
        assert!(codecs_match(&a, &b, false).unwrap());
    }

    #[test]
    fn h264_strict_match_rejects_profile_mismatch() {
        let a = json!({
            "mimeType": "video/h264", "clockRate": 90000,
            "parameters": {"packetization-mode": 1, "profile-level-id": "42e01f"},
        });
        let b = json!({
            "mimeType": "video/h264", "clockRate": 90000,
            "parameters": {"packetization-mode": 1, "profile-level-id": "4d0032"},
        });
        assert!(codecs_match(&a, &b, true).is_err());
    }
}
