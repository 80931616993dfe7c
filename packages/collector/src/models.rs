use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Body of a captured payload.
///
/// Structured content is decoded where recognized; everything else is kept
/// verbatim. Bytes that are not valid UTF-8 are hex-encoded so nothing is
/// lost between capture and retrieval.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PayloadBody {
    Json(Value),
    Text(String),
    Binary { encoding: &'static str, data: String },
}

impl PayloadBody {
    /// Best-effort decode of an inbound request body.
    ///
    /// A JSON content type with an unparseable body falls back to raw text
    /// rather than failing the capture.
    pub fn from_bytes(content_type: Option<&str>, body: &[u8]) -> Self {
        if content_type.is_some_and(|ct| ct.contains("json")) {
            if let Ok(value) = serde_json::from_slice::<Value>(body) {
                return PayloadBody::Json(value);
            }
        }

        match std::str::from_utf8(body) {
            Ok(text) => PayloadBody::Text(text.to_string()),
            Err(_) => PayloadBody::Binary {
                encoding: "hex",
                data: hex::encode(body),
            },
        }
    }
}

/// One captured request, immutable once appended to an endpoint's history.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    pub payload_id: Uuid,
    /// Assigned at capture under the endpoint's lock, never client-supplied.
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    /// Order-preserving multimap; duplicate names allowed.
    pub query_params: Vec<(String, String)>,
    /// Order-preserving multimap; duplicate names allowed.
    pub headers: Vec<(String, String)>,
    pub body: PayloadBody,
    pub ip_address: String,
    pub user_agent: String,
    pub content_length: usize,
}

/// Response for endpoint creation
#[derive(Debug, Serialize)]
pub struct CreateEndpointResponse {
    pub id: Uuid,
    pub path: String,
}

/// Per-endpoint summary for the listing route
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub id: Uuid,
    pub path: String,
    pub payload_count: usize,
}

/// Full endpoint view with its payload history, newest first
#[derive(Debug, Serialize)]
pub struct EndpointDetailResponse {
    pub id: Uuid,
    pub path: String,
    pub payloads: Vec<Payload>,
}

/// Response for a successful capture
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub status: String,
}

/// Query parameters for fetching an endpoint's payloads
#[derive(Debug, Deserialize)]
pub struct FetchPayloadsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl FetchPayloadsQuery {
    pub fn validated_limit(&self) -> usize {
        self.limit.clamp(1, 1000)
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub endpoints: usize,
    pub sse_channels: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_body_is_decoded() {
        let body = PayloadBody::from_bytes(Some("application/json"), br#"{"a":1}"#);
        assert!(matches!(&body, PayloadBody::Json(v) if v == &json!({"a": 1})));
    }

    #[test]
    fn malformed_json_is_captured_as_text() {
        let body = PayloadBody::from_bytes(Some("application/json"), b"{not json");
        assert!(matches!(&body, PayloadBody::Text(t) if t == "{not json"));
    }

    #[test]
    fn non_utf8_body_is_preserved_as_hex() {
        let raw = [0xff, 0xfe, 0x00, 0x01];
        let body = PayloadBody::from_bytes(Some("application/octet-stream"), &raw);
        match body {
            PayloadBody::Binary { encoding, data } => {
                assert_eq!(encoding, "hex");
                assert_eq!(data, "fffe0001");
            }
            other => panic!("expected binary body, got {:?}", other),
        }
    }

    #[test]
    fn body_serializes_transparently() {
        let body = PayloadBody::from_bytes(Some("application/json"), br#"{"a":1}"#);
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"a": 1}));

        let body = PayloadBody::from_bytes(None, b"plain");
        assert_eq!(serde_json::to_value(&body).unwrap(), json!("plain"));
    }

    #[test]
    fn fetch_query_limit_is_clamped() {
        let query = FetchPayloadsQuery { limit: 0, offset: 0 };
        assert_eq!(query.validated_limit(), 1);

        let query = FetchPayloadsQuery { limit: 5000, offset: 0 };
        assert_eq!(query.validated_limit(), 1000);
    }
}
