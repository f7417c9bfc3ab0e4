//! Stripe webhook authentication and the events the ledger cares about.
//!
//! The `Stripe-Signature` header carries `t=<unix ts>` and one or more
//! `v1=<hex>` entries, each an HMAC-SHA256 of `"<t>.<raw body>"` under the
//! endpoint secret.

use crate::error::{PaymentError, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::NotConfigured(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds a header value the way Stripe does. Used by tests and local tooling.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<()> {
    if secret.is_empty() {
        return Err(PaymentError::NotConfigured(
            "webhook secret is empty".to_string(),
        ));
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature);
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(PaymentError::TimestampOutOfTolerance);
    }

    for candidate in signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        let mac = mac_for(secret, timestamp, payload)?;
        if mac.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }
    Err(PaymentError::InvalidSignature)
}

#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

/// The checkout session carried by `checkout.session.completed`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutCompleted {
    pub id: String,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutCompleted {
    pub fn user_id(&self) -> Option<&str> {
        self.metadata
            .get("user_id")
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StripeEvent {
    CheckoutCompleted {
        event_id: String,
        session: CheckoutCompleted,
    },
    /// Acknowledged and ignored.
    Other { event_id: String, kind: String },
}

pub fn parse_event(payload: &[u8]) -> Result<StripeEvent> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    match raw.kind.as_str() {
        "checkout.session.completed" => Ok(StripeEvent::CheckoutCompleted {
            event_id: raw.id,
            session: serde_json::from_value(raw.data.object)?,
        }),
        _ => Ok(StripeEvent::Other {
            event_id: raw.id,
            kind: raw.kind,
        }),
    }
}

/// Verifies the signature, then parses the event.
pub fn construct_event(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<StripeEvent> {
    let header = header.ok_or(PaymentError::MissingSignature)?;
    verify_signature(payload, header, secret, now, tolerance_secs)?;
    parse_event(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn checkout_payload() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_test_1",
                "amount_total": 2500,
                "customer": "cus_1",
                "payment_intent": "pi_1",
                "metadata": {"user_id": "dev-1"}
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_signed_payload_verifies() {
        let payload = checkout_payload();
        let header = sign(&payload, SECRET, 1_700_000_000).unwrap();
        assert!(verify_signature(&payload, &header, SECRET, 1_700_000_100, 300).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let payload = checkout_payload();
        let header = sign(&payload, SECRET, 1_700_000_000).unwrap();
        let mut tampered = payload.clone();
        tampered.extend_from_slice(b" ");
        assert_eq!(
            verify_signature(&tampered, &header, SECRET, 1_700_000_000, 300),
            Err(PaymentError::InvalidSignature)
        );
        assert_eq!(
            verify_signature(&payload, &header, "whsec_other", 1_700_000_000, 300),
            Err(PaymentError::InvalidSignature)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = checkout_payload();
        let header = sign(&payload, SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature(&payload, &header, SECRET, 1_700_000_301, 300),
            Err(PaymentError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let payload = checkout_payload();
        let good = sign(&payload, SECRET, 1_700_000_000).unwrap();
        let v1 = good.split(",v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), v1);
        assert!(verify_signature(&payload, &header, SECRET, 1_700_000_000, 300).is_ok());
    }

    #[test]
    fn test_parse_checkout_completed() {
        let event = parse_event(&checkout_payload()).unwrap();
        match event {
            StripeEvent::CheckoutCompleted { session, .. } => {
                assert_eq!(session.id, "cs_test_1");
                assert_eq!(session.amount_total, Some(2500));
                assert_eq!(session.user_id(), Some("dev-1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(
            construct_event(&checkout_payload(), None, SECRET, 0, 300),
            Err(PaymentError::MissingSignature)
        );
    }

    #[test]
    fn test_other_events_are_passed_through() {
        let payload = br#"{"id":"evt_2","type":"payout.paid","data":{"object":{}}}"#;
        assert_eq!(
            parse_event(payload).unwrap(),
            StripeEvent::Other {
                event_id: "evt_2".to_string(),
                kind: "payout.paid".to_string()
            }
        );
    }
}
