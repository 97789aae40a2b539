//! Stripe webhook signature verification.
//!
//! Stripe signs webhook requests using HMAC-SHA256.
//! Reference: https://stripe.com/docs/webhooks#verify-manually
//!
//! The `Stripe-Signature` header looks like `t=1492774577,v1=5257a869...,v0=...`.
//! The signed payload is `"{t}.{raw body}"`, keyed by the endpoint secret
//! (`whsec_...`) exactly as configured.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{GatewayError, VerificationError};
use crate::events::WebhookEnvelope;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying Stripe's signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Signature scheme Stripe uses for live signatures.
const EXPECTED_SCHEME: &str = "v1";

/// Default tolerance between the signed timestamp and now, in seconds.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Verify a Stripe webhook and parse the event it carries.
///
/// Verification runs on the exact raw bytes before any JSON parsing, since
/// re-serializing can change the bytes Stripe signed.
///
/// # Arguments
///
/// * `payload` - The raw request body
/// * `signature_header` - The `Stripe-Signature` header, if sent
/// * `secret` - The endpoint signing secret, if configured
/// * `tolerance_secs` - Maximum age of the signed timestamp (0 disables the check)
///
/// # Errors
///
/// A [`GatewayError::Verification`] when the request is not authentic, or
/// [`GatewayError::InvalidPayload`] when a correctly signed body is not an
/// event envelope.
pub fn verify(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
    tolerance_secs: u64,
) -> Result<WebhookEnvelope, GatewayError> {
    verify_signature(payload, signature_header, secret, tolerance_secs, unix_now())?;
    Ok(WebhookEnvelope::from_slice(payload)?)
}

/// Check `signature_header` against `payload` at time `now`.
pub fn verify_signature(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), VerificationError> {
    let secret = secret
        .filter(|s| !s.trim().is_empty())
        .ok_or(VerificationError::Configuration)?;

    let header = signature_header
        .filter(|h| !h.trim().is_empty())
        .ok_or(VerificationError::MissingSignature)?;

    let parsed = parse_header(header)?;

    // Stripe only rejects old timestamps; a clock running behind is tolerated.
    let age = now.saturating_sub(parsed.timestamp);
    let max_age = i64::try_from(tolerance_secs).unwrap_or(i64::MAX);
    if tolerance_secs > 0 && age > max_age {
        warn!(
            webhook_time = parsed.timestamp,
            current_time = now,
            age_seconds = age,
            max_age_seconds = tolerance_secs,
            "stripe_signature_stale"
        );
        return Err(VerificationError::TimestampOutsideTolerance {
            age,
            tolerance: tolerance_secs,
        });
    }

    // HMAC takes keys of any length, so this cannot fail for a non-empty secret.
    let expected = sign_payload(secret, parsed.timestamp, payload)
        .map_err(|_| VerificationError::Configuration)?;

    let valid = parsed
        .signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate));

    if !valid {
        warn!(
            candidates = parsed.signatures.len(),
            payload_length = payload.len(),
            "stripe_signature_mismatch"
        );
        return Err(VerificationError::SignatureMismatch);
    }

    debug!(webhook_time = parsed.timestamp, "stripe_signature_valid");
    Ok(())
}

/// Compute the hex `v1` signature of `payload` signed at `timestamp`.
pub fn sign_payload(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a complete `Stripe-Signature` header value for `payload`.
///
/// Useful to replay a stored event against a local gateway.
pub fn signature_header(
    secret: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, InvalidLength> {
    let signature = sign_payload(secret, timestamp, payload)?;
    Ok(format!("t={},{}={}", timestamp, EXPECTED_SCHEME, signature))
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

/// Split `t=...,v1=...` into the timestamp and every `v1` signature.
///
/// Unknown schemes (such as `v0`) are ignored.
fn parse_header(header: &str) -> Result<ParsedHeader<'_>, VerificationError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for item in header.split(',') {
        let Some((key, value)) = item.split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => timestamp = Some(value.trim()),
            EXPECTED_SCHEME => signatures.push(value.trim()),
            _ => {}
        }
    }

    let timestamp = match timestamp.map(str::parse::<i64>) {
        Some(Ok(t)) => t,
        Some(Err(_)) => {
            warn!("stripe_signature_invalid_timestamp");
            return Err(VerificationError::MalformedHeader("invalid timestamp"));
        }
        None => {
            warn!("stripe_signature_missing_timestamp");
            return Err(VerificationError::MalformedHeader("no timestamp"));
        }
    };

    if signatures.is_empty() {
        warn!("stripe_signature_missing_v1");
        return Err(VerificationError::MalformedHeader(
            "no signatures found with expected scheme",
        ));
    }

    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"type":"charge.succeeded","data":{"object":{}}}"#;

    fn header_at(timestamp: i64) -> String {
        signature_header(SECRET, timestamp, BODY).unwrap()
    }

    #[test]
    fn test_sign_payload_matches_reference_vector() {
        let expected = "a8a252be8cd9b58d40ea07d0e65c3f653e35265712667453a024857098d444d3";

        assert_eq!(sign_payload(SECRET, NOW, BODY).unwrap(), expected);
        assert_eq!(header_at(NOW), format!("t=1700000000,v1={}", expected));
    }

    #[test]
    fn test_verify_signature_valid() {
        let header = header_at(NOW);
        assert_eq!(
            verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW),
            Ok(())
        );
    }

    #[test]
    fn test_verify_signature_missing_secret() {
        let header = header_at(NOW);
        assert_eq!(
            verify_signature(BODY, Some(&header), None, 300, NOW),
            Err(VerificationError::Configuration)
        );
        assert_eq!(
            verify_signature(BODY, Some(&header), Some("  "), 300, NOW),
            Err(VerificationError::Configuration)
        );
    }

    #[test]
    fn test_missing_secret_is_reported_before_missing_header() {
        assert_eq!(
            verify_signature(BODY, None, None, 300, NOW),
            Err(VerificationError::Configuration)
        );
    }

    #[test]
    fn test_verify_signature_missing_header() {
        assert_eq!(
            verify_signature(BODY, None, Some(SECRET), 300, NOW),
            Err(VerificationError::MissingSignature)
        );
        assert_eq!(
            verify_signature(BODY, Some(""), Some(SECRET), 300, NOW),
            Err(VerificationError::MissingSignature)
        );
    }

    #[test]
    fn test_verify_signature_tampered_body() {
        let header = header_at(NOW);
        let tampered = br#"{"type":"charge.refunded","data":{"object":{}}}"#;
        assert_eq!(
            verify_signature(tampered, Some(&header), Some(SECRET), 300, NOW),
            Err(VerificationError::SignatureMismatch)
        );
    }

    #[test]
    fn test_verify_signature_wrong_secret() {
        let header = signature_header("whsec_other", NOW, BODY).unwrap();
        assert_eq!(
            verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW),
            Err(VerificationError::SignatureMismatch)
        );
    }

    #[test]
    fn test_verify_signature_is_whitespace_sensitive() {
        // Same JSON, different bytes.
        let header = header_at(NOW);
        let reformatted = br#"{"type": "charge.succeeded", "data": {"object": {}}}"#;
        assert!(verify_signature(reformatted, Some(&header), Some(SECRET), 300, NOW).is_err());
    }

    #[test]
    fn test_verify_signature_stale() {
        let header = header_at(NOW - 301);
        assert_eq!(
            verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW),
            Err(VerificationError::TimestampOutsideTolerance {
                age: 301,
                tolerance: 300
            })
        );

        // Right at the edge is still accepted
        let header = header_at(NOW - 300);
        assert!(verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW).is_ok());
    }

    #[test]
    fn test_verify_signature_zero_tolerance_disables_check() {
        // Year 2000
        let header = header_at(946684800);
        assert!(verify_signature(BODY, Some(&header), Some(SECRET), 0, NOW).is_ok());
    }

    #[test]
    fn test_verify_signature_extreme_timestamp() {
        let header = format!("t={},v1={}", i64::MIN, "0".repeat(64));
        assert_eq!(
            verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW),
            Err(VerificationError::TimestampOutsideTolerance {
                age: i64::MAX,
                tolerance: 300
            })
        );
    }

    #[test]
    fn test_verify_signature_huge_tolerance() {
        let header = header_at(946684800);
        assert!(verify_signature(BODY, Some(&header), Some(SECRET), u64::MAX, NOW).is_ok());
    }

    #[test]
    fn test_verify_signature_future_timestamp() {
        let header = header_at(NOW + 3600);
        assert!(verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW).is_ok());
    }

    #[test]
    fn test_verify_signature_accepts_any_v1() {
        // Secret rotation: Stripe sends one v1 per active secret.
        let good = sign_payload(SECRET, NOW, BODY).unwrap();
        let header = format!("t={},v1={},v1={},v0=deadbeef", NOW, "0".repeat(64), good);
        assert!(verify_signature(BODY, Some(&header), Some(SECRET), 300, NOW).is_ok());
    }

    #[test]
    fn test_verify_signature_malformed_header() {
        let good = sign_payload(SECRET, NOW, BODY).unwrap();

        let no_timestamp = format!("v1={}", good);
        assert_eq!(
            verify_signature(BODY, Some(&no_timestamp), Some(SECRET), 300, NOW),
            Err(VerificationError::MalformedHeader("no timestamp"))
        );

        let bad_timestamp = format!("t=yesterday,v1={}", good);
        assert_eq!(
            verify_signature(BODY, Some(&bad_timestamp), Some(SECRET), 300, NOW),
            Err(VerificationError::MalformedHeader("invalid timestamp"))
        );

        let only_v0 = format!("t={},v0={}", NOW, good);
        assert!(matches!(
            verify_signature(BODY, Some(&only_v0), Some(SECRET), 300, NOW),
            Err(VerificationError::MalformedHeader(_))
        ));

        assert!(verify_signature(BODY, Some("garbage"), Some(SECRET), 300, NOW).is_err());
    }

    #[test]
    fn test_verify_is_idempotent() {
        let header = signature_header(SECRET, unix_now(), BODY).unwrap();

        let first = verify(BODY, Some(&header), Some(SECRET), 300).unwrap();
        let second = verify(BODY, Some(&header), Some(SECRET), 300).unwrap();
        assert_eq!(first.event_type(), second.event_type());
        assert_eq!(first.event_type(), Some("charge.succeeded"));
        assert_eq!(first.object(), second.object());

        for _ in 0..2 {
            assert!(matches!(
                verify(BODY, None, Some(SECRET), 300),
                Err(GatewayError::Verification(VerificationError::MissingSignature))
            ));
        }
    }

    #[test]
    fn test_verify_parses_only_after_signature() {
        let body = b"not json";
        let header = signature_header(SECRET, unix_now(), body).unwrap();

        // Signed garbage verifies, then fails to parse.
        assert!(matches!(
            verify(body, Some(&header), Some(SECRET), 300),
            Err(GatewayError::InvalidPayload(_))
        ));

        // Unsigned garbage never reaches the parser.
        assert!(matches!(
            verify(body, None, Some(SECRET), 300),
            Err(GatewayError::Verification(VerificationError::MissingSignature))
        ));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
