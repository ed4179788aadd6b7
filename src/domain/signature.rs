//! The gateway's webhook signing scheme.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. Each `v1` is
//! HMAC-SHA256 over `"<t>.<raw body>"` keyed with the endpoint secret; several may be
//! present while the secret is being rolled.

use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: SecretString, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Checks `header` against `payload`. Nothing about the payload may be trusted before this passes.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<()> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
        if candidates.is_empty() {
            return Err(PaymentError::InvalidSignature(
                "missing v1 signature".to_string(),
            ));
        }

        let signed_at = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| PaymentError::InvalidSignature("timestamp out of range".to_string()))?;
        if (now - signed_at).abs() > self.tolerance {
            return Err(PaymentError::InvalidSignature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        for candidate in candidates {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            // verify_slice compares in constant time
            if self.mac(timestamp, payload)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(PaymentError::InvalidSignature(
            "no matching signature".to_string(),
        ))
    }

    /// Produces a header for `payload` signed at `at`.
    pub fn sign(&self, payload: &[u8], at: DateTime<Utc>) -> Result<String> {
        let timestamp = at.timestamp();
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn verifier(secret: &str) -> SignatureVerifier {
        SignatureVerifier::new(SecretString::from(secret.to_string()), Duration::seconds(300))
    }

    #[test]
    fn test_valid_signature() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = Utc::now();
        let header = verifier(SECRET).sign(payload, now).unwrap();
        assert!(verifier(SECRET).verify(payload, &header, now).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = Utc::now();
        let header = verifier("wrong_secret").sign(payload, now).unwrap();
        assert!(matches!(
            verifier(SECRET).verify(payload, &header, now),
            Err(PaymentError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_modified_payload_rejected() {
        let now = Utc::now();
        let header = verifier(SECRET)
            .sign(br#"{"type":"checkout.session.completed"}"#, now)
            .unwrap();
        assert!(
            verifier(SECRET)
                .verify(
                    br#"{"type":"checkout.session.completed","hacked":true}"#,
                    &header,
                    now
                )
                .is_err()
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let payload = b"{}";
        let signed_at = Utc::now() - Duration::minutes(10);
        let header = verifier(SECRET).sign(payload, signed_at).unwrap();
        assert!(verifier(SECRET).verify(payload, &header, Utc::now()).is_err());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let v = verifier(SECRET);
        let now = Utc::now();
        assert!(v.verify(b"{}", "", now).is_err());
        assert!(v.verify(b"{}", "v1=abcdef", now).is_err());
        assert!(v.verify(b"{}", &format!("t={}", now.timestamp()), now).is_err());
        assert!(
            v.verify(b"{}", &format!("t={},v1=zz-not-hex", now.timestamp()), now)
                .is_err()
        );
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let payload = b"{}";
        let now = Utc::now();
        let good = verifier(SECRET).sign(payload, now).unwrap();
        let good_sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t={},v1={},v1={}", now.timestamp(), "00".repeat(32), good_sig);
        assert!(verifier(SECRET).verify(payload, &header, now).is_ok());
    }
}
