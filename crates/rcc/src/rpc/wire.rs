use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound envelope. Notifications (no response expected) omit `id`.
#[derive(Debug, Serialize)]
pub struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub method: &'a str,
    pub internal: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound envelope. A message carrying `id` is a response; one carrying
/// `target_id`/`event` instead is a notification (spec.md §6).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Response {
        id: u32,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Notification {
        target_id: String,
        event: String,
        #[serde(default)]
        data: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_id_serializes_id_field() {
        let req = WireRequest { id: Some(7), method: "ROUTER-CLOSE", internal: serde_json::json!({}), data: None };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["id"], 7);
        assert!(value.get("data").is_none());
    }

    #[test]
    fn notification_omits_id_field() {
        let req = WireRequest { id: None, method: "ROUTER-CLOSE", internal: serde_json::json!({}), data: None };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("id").is_none());
    }

    #[test]
    fn parses_response_message() {
        let raw = serde_json::json!({ "id": 3, "data": { "ok": true } });
        let parsed: WireMessage = serde_json::from_value(raw).unwrap();
        match parsed {
            WireMessage::Response { id, data, error } => {
                assert_eq!(id, 3);
                assert_eq!(data, Some(serde_json::json!({ "ok": true })));
                assert!(error.is_none());
            }
            WireMessage::Notification { .. } => panic!("expected a response"),
        }
    }

    #[test]
    fn parses_notification_message() {
        let raw = serde_json::json!({ "target_id": "abc", "event": "producer-closed" });
        let parsed: WireMessage = serde_json::from_value(raw).unwrap();
        match parsed {
            WireMessage::Notification { target_id, event, data } => {
                assert_eq!(target_id, "abc");
                assert_eq!(event, "producer-closed");
                assert_eq!(data, Value::Null);
            }
            WireMessage::Response { .. } => panic!("expected a notification"),
        }
    }
}
