//! Outbound envelope construction and HMAC-SHA256 payload signing.
//!
//! Signature input is the byte concatenation `<ts>.<eventId>.<body>` — the
//! three segments joined by literal `.` dots, `body` being the JSON bytes
//! verbatim. Output is lowercase hex, not base64 — a bespoke scheme for
//! this pipeline, not "Standard Webhooks".

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

pub const USER_AGENT: &str = "toko-api-webhooks/1.0";

type HmacSha256 = Hmac<Sha256>;

/// The canonical outbound body: `event.payload` re-serialized verbatim
/// under `data`, never introspected beyond that.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope<'a> {
    #[serde(rename = "eventId")]
    pub event_id: Uuid,
    pub topic: &'a str,
    pub data: &'a serde_json::Value,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
}

impl<'a> OutboundEnvelope<'a> {
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// `HMAC-SHA256(secret, "<ts>.<eventId>.<body>")`, hex-encoded.
pub fn sign(secret: &[u8], ts: i64, event_id: Uuid, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(event_id.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Headers for a single signed attempt, in the exact casing the spec pins.
pub fn headers(event_id: Uuid, delivery_id: Uuid, ts: i64, signature: &str) -> Vec<(String, String)> {
    vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("X-Event-ID".to_string(), event_id.to_string()),
        ("X-Timestamp".to_string(), ts.to_string()),
        ("X-Idempotency-Key".to_string(), delivery_id.to_string()),
        ("X-Signature".to_string(), signature.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let secret = b"shh";
        let event_id = Uuid::nil();
        let sig1 = sign(secret, 1_700_000_000, event_id, b"{}");
        let sig2 = sign(secret, 1_700_000_000, event_id, b"{}");
        assert_eq!(sig1, sig2);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig1.len(), 64);
    }

    #[test]
    fn signature_matches_manual_hmac_over_dot_joined_segments() {
        let secret = b"topsecret";
        let event_id = Uuid::nil();
        let ts = 42i64;
        let body = b"{\"a\":1}";

        let mut expected_input = Vec::new();
        expected_input.extend_from_slice(ts.to_string().as_bytes());
        expected_input.extend_from_slice(b".");
        expected_input.extend_from_slice(event_id.to_string().as_bytes());
        expected_input.extend_from_slice(b".");
        expected_input.extend_from_slice(body);

        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(&expected_input);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(sign(secret, ts, event_id, body), expected);
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let event_id = Uuid::new_v4();
        let a = sign(b"secret-a", 1, event_id, b"{}");
        let b = sign(b"secret-b", 1, event_id, b"{}");
        assert_ne!(a, b);
    }

    #[test]
    fn envelope_serializes_with_verbatim_data_and_camel_case_keys() {
        let payload = serde_json::json!({"orderId": "o-1"});
        let envelope = OutboundEnvelope {
            event_id: Uuid::nil(),
            topic: "order.paid",
            data: &payload,
            occurred_at: Utc::now(),
        };
        let bytes = envelope.to_json_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["eventId"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(value["topic"], "order.paid");
        assert_eq!(value["data"], payload);
        assert!(value.get("occurredAt").is_some());
    }
}
