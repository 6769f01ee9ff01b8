//! Fetch sources (magnet links and uploaded torrent files) and the
//! idempotency key that guards against duplicate submission.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::types::DbId;

/// Maximum accepted length of a source payload (magnet URI or file reference).
pub const MAX_SOURCE_PAYLOAD_LEN: usize = 4096;

/// Regex pattern extracting the BitTorrent info-hash from a magnet URI.
///
/// Accepts both the 40-character hex form and the 32-character base32 form.
pub const MAGNET_BTIH_PATTERN: &str = r"(?i)[?&]xt=urn:btih:([0-9a-f]{40}|[a-z2-7]{32})(?:&|$)";

static MAGNET_BTIH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MAGNET_BTIH_PATTERN).expect("valid regex"));

/// How the user supplied the thing to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// `source_payload` is a `magnet:?` URI.
    Magnet,
    /// `source_payload` is a storage reference to an uploaded `.torrent` file.
    File,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Magnet => "magnet",
            SourceType::File => "file",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "magnet" => Ok(SourceType::Magnet),
            "file" => Ok(SourceType::File),
            other => Err(CoreError::Validation(format!(
                "Unknown source type: {other}"
            ))),
        }
    }
}

/// Extract the info-hash from a magnet URI, normalised for comparison.
///
/// Hex hashes are lowercased; base32 hashes are uppercased.
pub fn magnet_info_hash(uri: &str) -> Option<String> {
    let caps = MAGNET_BTIH_RE.captures(uri)?;
    let hash = caps.get(1)?.as_str();
    if hash.len() == 40 {
        Some(hash.to_ascii_lowercase())
    } else {
        Some(hash.to_ascii_uppercase())
    }
}

/// Validate a source payload for its declared type.
///
/// Rules:
/// - Must not be empty or exceed [`MAX_SOURCE_PAYLOAD_LEN`].
/// - Magnet payloads must start with `magnet:?` and carry a BitTorrent
///   info-hash (`xt=urn:btih:`).
pub fn validate_source(source_type: SourceType, payload: &str) -> Result<(), CoreError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(CoreError::Validation(
            "Source payload must not be empty".to_string(),
        ));
    }
    if payload.len() > MAX_SOURCE_PAYLOAD_LEN {
        return Err(CoreError::Validation(format!(
            "Source payload must not exceed {MAX_SOURCE_PAYLOAD_LEN} characters"
        )));
    }

    if source_type == SourceType::Magnet {
        if !payload.starts_with("magnet:?") {
            return Err(CoreError::Validation(
                "Magnet links must start with 'magnet:?'".to_string(),
            ));
        }
        if magnet_info_hash(payload).is_none() {
            return Err(CoreError::Validation(
                "Magnet link is missing a valid 'xt=urn:btih:' info-hash".to_string(),
            ));
        }
    }

    Ok(())
}

/// Compute the idempotency key for a (user, source) pair.
///
/// Two magnet links for the same info-hash collapse to the same key even if
/// their tracker lists or display names differ. The key is the hex SHA-256
/// of `{user_id}:{canonical source}`.
pub fn idempotency_key(user_id: DbId, source_type: SourceType, payload: &str) -> String {
    let canonical = match source_type {
        SourceType::Magnet => magnet_info_hash(payload)
            .map(|h| format!("btih:{h}"))
            .unwrap_or_else(|| payload.trim().to_string()),
        SourceType::File => format!("file:{}", payload.trim()),
    };
    let digest = Sha256::digest(format!("{user_id}:{canonical}").as_bytes());
    hex::encode(digest)
}
