//! Signing and verification for worker progress callbacks.
//!
//! Each job gets its own callback credential, derived from the server-wide
//! callback secret and the job id. The worker receives the credential in the
//! start call and signs every callback as
//! `hex(HMAC-SHA256(credential, "{timestamp}.{body}"))`, sent in
//! `Authorization: Bearer <hex>` alongside `X-Timestamp: <unix seconds>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::JobId;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed skew between the callback timestamp and server time.
pub const CALLBACK_WINDOW_SECS: i64 = 300;

/// Header carrying the unix-seconds timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Reasons a callback signature is rejected.
///
/// Callers collapse all of these into a single `401` so the response never
/// tells an attacker which check failed; the variant is only for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CallbackAuthError {
    #[error("timestamp header is missing or not an integer")]
    MalformedTimestamp,
    #[error("timestamp is outside the allowed window")]
    Expired,
    #[error("signature is not valid hex")]
    MalformedSignature,
    #[error("signature does not match")]
    SignatureMismatch,
}

fn mac_for(key: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length")
}

/// Derive the per-job callback credential handed to the worker.
pub fn derive_credential(callback_secret: &str, job_id: JobId) -> String {
    let mut mac = mac_for(callback_secret);
    mac.update(job_id.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the signature a worker sends for `body` at `timestamp`.
pub fn sign(credential: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = mac_for(credential);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a callback signature.
///
/// `timestamp` is the raw `X-Timestamp` header value and `signature_hex` the
/// bearer token. The comparison is constant-time.
pub fn verify(
    credential: &str,
    timestamp: &str,
    signature_hex: &str,
    body: &[u8],
    now_unix: i64,
) -> Result<(), CallbackAuthError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| CallbackAuthError::MalformedTimestamp)?;

    if now_unix.abs_diff(ts) > CALLBACK_WINDOW_SECS.unsigned_abs() {
        return Err(CallbackAuthError::Expired);
    }

    let presented =
        hex::decode(signature_hex.trim()).map_err(|_| CallbackAuthError::MalformedSignature)?;

    let mut mac = mac_for(credential);
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&presented)
        .map_err(|_| CallbackAuthError::SignatureMismatch)
}

/// Constant-time equality for shared bearer secrets of arbitrary length.
///
/// Both sides are run through an HMAC keyed by `expected` so the comparison
/// happens over fixed-size digests.
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    let mut mac = mac_for(expected);
    mac.update(expected.as_bytes());
    let expected_digest = mac.finalize().into_bytes();

    let mut mac = mac_for(expected);
    mac.update(presented.as_bytes());
    mac.verify_slice(&expected_digest).is_ok()
}
