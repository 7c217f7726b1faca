//! Payment notification signatures and payloads
//!
//! Notifications arrive with a header of the form `t=<unix seconds>,v1=<hex>`.
//! Each `v1` is `HMAC-SHA256(secret, "<t>.<payload>")`; several may be present
//! while the processor rotates secrets, and any one matching is enough.

use crate::{config::WebhookConfig, Result, SettlementError};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use token_ledger::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Payment succeeded; credit the purchase
pub const EVENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Payment failed
pub const EVENT_FAILED: &str = "payment_intent.payment_failed";

/// Payment intent cancelled
pub const EVENT_CANCELED: &str = "payment_intent.canceled";

/// Verifies notification signatures against the shared secret
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: u64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Verifier for the configured secret and tolerance
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            secret: config.signing_secret.as_bytes().to_vec(),
            tolerance_secs: config.tolerance_secs,
        }
    }

    /// Verify against the current time
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<()> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    /// Verify as of `now` (unix seconds)
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let (timestamp, signatures) = parse_header(header)?;

        if now.abs_diff(timestamp) > self.tolerance_secs {
            return Err(SettlementError::InvalidSignature(format!(
                "timestamp {} outside tolerance",
                timestamp
            )));
        }

        for signature in signatures {
            let mac = self.mac(timestamp, payload)?;
            if mac.verify_slice(&signature).is_ok() {
                return Ok(());
            }
        }

        Err(SettlementError::InvalidSignature(
            "no matching v1 signature".to_string(),
        ))
    }

    /// Header a processor would send for `payload` at `timestamp`
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let signature = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SettlementError::Config(format!("Invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<Vec<u8>>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    SettlementError::InvalidSignature(format!("bad timestamp: {}", value))
                })?);
            }
            // Undecodable entries are skipped; another v1 may still match
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| SettlementError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(SettlementError::InvalidSignature(
            "missing v1 signature".to_string(),
        ));
    }
    Ok((timestamp, signatures))
}

/// Event kinds the reconciler acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// Payment captured
    Succeeded,
    /// Payment failed
    Failed,
    /// Intent cancelled
    Canceled,
    /// Anything else; acknowledged and ignored
    Other(String),
}

/// Purchase details echoed back from intent metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseMetadata {
    /// Buyer
    pub user_id: UserId,
    /// Tokens to credit
    pub tokens: i64,
}

/// Parsed, verified notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    /// Processor event id
    pub event_id: String,
    /// What happened
    pub kind: NotificationKind,
    /// Payment intent id; absent for ignored events
    pub external_reference: Option<String>,
    /// Metadata, when present and well-formed
    pub metadata: Option<PurchaseMetadata>,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawIntent {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// Parse a notification payload
///
/// Payment events must carry the intent id. Metadata is parsed when present,
/// for every payment event kind; a present but unparseable value is an error.
pub fn parse_notification(payload: &[u8]) -> Result<PaymentNotification> {
    let event: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| SettlementError::MalformedNotification(e.to_string()))?;

    let kind = match event.event_type.as_str() {
        EVENT_SUCCEEDED => NotificationKind::Succeeded,
        EVENT_FAILED => NotificationKind::Failed,
        EVENT_CANCELED => NotificationKind::Canceled,
        _ => {
            return Ok(PaymentNotification {
                event_id: event.id,
                kind: NotificationKind::Other(event.event_type),
                external_reference: None,
                metadata: None,
            })
        }
    };

    let object = event
        .data
        .map(|data| data.object)
        .ok_or_else(|| SettlementError::MalformedNotification("missing data.object".to_string()))?;
    let intent: RawIntent = serde_json::from_value(object)
        .map_err(|e| SettlementError::MalformedNotification(e.to_string()))?;

    let metadata = parse_metadata(&intent.metadata)?;

    Ok(PaymentNotification {
        event_id: event.id,
        kind,
        external_reference: Some(intent.id),
        metadata,
    })
}

fn parse_metadata(
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<Option<PurchaseMetadata>> {
    use crate::gateway::{METADATA_TOKENS, METADATA_USER_ID};

    let (Some(user_id), Some(tokens)) = (metadata.get(METADATA_USER_ID), metadata.get(METADATA_TOKENS))
    else {
        return Ok(None);
    };

    let user_id = metadata_number::<u64>(METADATA_USER_ID, user_id)?;
    let tokens = metadata_number::<i64>(METADATA_TOKENS, tokens)?;
    if tokens <= 0 {
        return Err(SettlementError::MalformedNotification(format!(
            "{} must be positive, got {}",
            METADATA_TOKENS, tokens
        )));
    }

    Ok(Some(PurchaseMetadata {
        user_id: UserId::new(user_id),
        tokens,
    }))
}

// Processor metadata values are strings; bare numbers are accepted too
fn metadata_number<T: std::str::FromStr>(key: &str, value: &serde_json::Value) -> Result<T> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(SettlementError::MalformedNotification(format!(
                "{} has unexpected value {}",
                key, other
            )))
        }
    };
    text.trim().parse().map_err(|_| {
        SettlementError::MalformedNotification(format!("{} is not a number: {}", key, text))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(&WebhookConfig {
            signing_secret: "whsec_test".to_string(),
            tolerance_secs: 300,
        })
    }

    fn succeeded_payload(user_id: &str, tokens: &str) -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1", "metadata": {"user_id": user_id, "tokens_to_award": tokens}}}
        })
        .to_string()
    }

    #[test]
    fn test_signed_payload_verifies() {
        let payload = succeeded_payload("7", "50");
        let header = verifier().sign(payload.as_bytes(), NOW).unwrap();
        assert!(verifier().verify_at(payload.as_bytes(), &header, NOW + 10).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = succeeded_payload("7", "50");
        let header = verifier().sign(payload.as_bytes(), NOW).unwrap();
        let tampered = succeeded_payload("7", "5000");

        let err = verifier()
            .verify_at(tampered.as_bytes(), &header, NOW)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidSignature(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = succeeded_payload("7", "50");
        let other = WebhookVerifier::new(&WebhookConfig {
            signing_secret: "whsec_other".to_string(),
            tolerance_secs: 300,
        });
        let header = other.sign(payload.as_bytes(), NOW).unwrap();
        assert!(verifier().verify_at(payload.as_bytes(), &header, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = succeeded_payload("7", "50");
        let header = verifier().sign(payload.as_bytes(), NOW).unwrap();
        assert!(verifier().verify_at(payload.as_bytes(), &header, NOW + 301).is_err());
    }

    #[test]
    fn test_any_v1_may_match() {
        let payload = succeeded_payload("7", "50");
        let signed = verifier().sign(payload.as_bytes(), NOW).unwrap();
        let good = signed.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1={},v1=zz,v0=abc,v1={}", NOW, "00".repeat(32), good);
        assert!(verifier().verify_at(payload.as_bytes(), &header, NOW).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        for header in ["", "v1=abcd", "t=abc,v1=abcd", "t=1760000000"] {
            let err = verifier().verify_at(b"{}", header, NOW).unwrap_err();
            assert!(matches!(err, SettlementError::InvalidSignature(_)), "{}", header);
        }
    }

    #[test]
    fn test_parse_succeeded() {
        let notification = parse_notification(succeeded_payload("7", "50").as_bytes()).unwrap();
        assert_eq!(notification.kind, NotificationKind::Succeeded);
        assert_eq!(notification.external_reference.as_deref(), Some("pi_1"));
        assert_eq!(
            notification.metadata,
            Some(PurchaseMetadata {
                user_id: UserId::new(7),
                tokens: 50
            })
        );
    }

    #[test]
    fn test_parse_rejects_bad_metadata() {
        let err = parse_notification(succeeded_payload("seven", "50").as_bytes()).unwrap_err();
        assert!(matches!(err, SettlementError::MalformedNotification(_)));

        let err = parse_notification(succeeded_payload("7", "-5").as_bytes()).unwrap_err();
        assert!(matches!(err, SettlementError::MalformedNotification(_)));
    }

    #[test]
    fn test_parse_other_events() {
        let payload = br#"{"id":"evt_2","type":"charge.refunded","data":{"object":{"amount":100}}}"#;
        let notification = parse_notification(payload).unwrap();
        assert_eq!(
            notification.kind,
            NotificationKind::Other("charge.refunded".to_string())
        );
        assert_eq!(notification.external_reference, None);

        assert!(matches!(
            parse_notification(b"not json"),
            Err(SettlementError::MalformedNotification(_))
        ));
    }
}
