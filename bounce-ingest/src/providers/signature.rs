//! Webhook authenticity checks shared by the provider adapters.
//!
//! Every check operates on the raw request bytes exactly as received. A body
//! that was decoded and re-encoded will not verify.
//!
//! - HMAC-SHA256 hex digests (ForwardEmail)
//! - ECDSA P-256 over `timestamp || body` (SendGrid)
//! - RSA PKCS#1 v1.5 over a canonical string (SNS)
//! - HTTP Basic credentials (Postmark)

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use p256::ecdsa::{signature::Verifier as _, Signature as EcdsaSignature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::signature::Verifier as _;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Why a webhook failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature")]
    MissingSignature,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("stale timestamp")]
    StaleTimestamp,
    #[error("invalid verification key")]
    InvalidKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature mismatch")]
    Mismatch,
    #[error("untrusted signing certificate: {0}")]
    UntrustedCertificate(String),
}

/// Digest used by an RSA PKCS#1 v1.5 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaDigest {
    Sha1,
    Sha256,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Check if a configured secret is usable for verification.
pub fn is_secret_configured(secret: &Option<String>) -> bool {
    secret
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Parse a webhook timestamp header and reject it if it is more than
/// `max_age_seconds` away from `now` in either direction.
pub fn check_timestamp(
    timestamp: Option<&str>,
    now: u64,
    max_age_seconds: u64,
) -> Result<u64, SignatureError> {
    let raw = timestamp
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(SignatureError::MissingTimestamp)?;

    let webhook_time: u64 = raw.parse().map_err(|_| {
        warn!(timestamp = %raw, "webhook_signature_invalid_timestamp");
        SignatureError::InvalidTimestamp
    })?;

    let age = now.abs_diff(webhook_time);
    if age > max_age_seconds {
        warn!(
            webhook_time = webhook_time,
            current_time = now,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "webhook_signature_stale"
        );
        return Err(SignatureError::StaleTimestamp);
    }

    Ok(webhook_time)
}

/// Compute the hex HMAC-SHA256 of `payload` under `key`.
pub fn hmac_sha256_hex(key: &[u8], payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex HMAC-SHA256 signature over the raw payload.
pub fn verify_hmac_sha256_hex(
    key: &[u8],
    payload: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::MissingSignature)?;

    let expected = hmac_sha256_hex(key, payload)?;

    if !constant_time_compare(expected.as_bytes(), signature.to_ascii_lowercase().as_bytes()) {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "webhook_signature_mismatch"
        );
        return Err(SignatureError::Mismatch);
    }

    Ok(())
}

/// Decode a base64 DER SubjectPublicKeyInfo into a P-256 verifying key.
pub fn parse_ecdsa_public_key(public_key_b64: &str) -> Result<VerifyingKey, SignatureError> {
    let der = STANDARD
        .decode(public_key_b64.trim())
        .map_err(|_| SignatureError::InvalidKey)?;
    VerifyingKey::from_public_key_der(&der).map_err(|_| SignatureError::InvalidKey)
}

/// Verify a base64 DER ECDSA P-256/SHA-256 signature over `timestamp || payload`.
pub fn verify_ecdsa_p256(
    key: &VerifyingKey,
    timestamp: &str,
    payload: &[u8],
    signature_b64: Option<&str>,
) -> Result<(), SignatureError> {
    let signature_b64 = signature_b64
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::MissingSignature)?;

    let der = STANDARD
        .decode(signature_b64)
        .map_err(|_| SignatureError::MalformedSignature)?;
    let signature =
        EcdsaSignature::from_der(&der).map_err(|_| SignatureError::MalformedSignature)?;

    let signed = [timestamp.as_bytes(), payload].concat();
    key.verify(&signed, &signature).map_err(|_| {
        warn!(payload_length = payload.len(), "ecdsa_signature_mismatch");
        SignatureError::Mismatch
    })
}

/// Verify a base64 RSA PKCS#1 v1.5 signature over `data`.
pub fn verify_rsa_pkcs1(
    key: &RsaPublicKey,
    digest: RsaDigest,
    data: &[u8],
    signature_b64: &str,
) -> Result<(), SignatureError> {
    let raw = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| SignatureError::MalformedSignature)?;
    let signature =
        RsaSignature::try_from(raw.as_slice()).map_err(|_| SignatureError::MalformedSignature)?;

    let result = match digest {
        RsaDigest::Sha1 => RsaVerifyingKey::<Sha1>::new(key.clone()).verify(data, &signature),
        RsaDigest::Sha256 => RsaVerifyingKey::<Sha256>::new(key.clone()).verify(data, &signature),
    };

    result.map_err(|_| {
        warn!(digest = ?digest, "rsa_signature_mismatch");
        SignatureError::Mismatch
    })
}

/// Check an `Authorization: Basic ...` header against configured credentials.
pub fn verify_basic_auth(
    authorization: Option<&str>,
    username: &str,
    password: &str,
) -> Result<(), SignatureError> {
    let encoded = authorization
        .and_then(|h| h.trim().strip_prefix("Basic "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::MissingSignature)?;

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| SignatureError::MalformedSignature)?;

    let expected = format!("{username}:{password}");
    if !constant_time_compare(expected.as_bytes(), &decoded) {
        warn!("basic_auth_mismatch");
        return Err(SignatureError::Mismatch);
    }

    Ok(())
}
