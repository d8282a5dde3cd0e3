//! String hashing helpers shared by cache keys, name lookups and bucketing.
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

/// Name hashing algorithm used by the server when it produced an initialize response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    /// Names are returned as-is.
    None,
    /// 32-bit djb2 hash formatted as an unsigned decimal string.
    Djb2,
    /// Base64-encoded SHA-256 digest.
    #[default]
    Sha256,
}

impl HashAlgorithm {
    /// Parse the `hash_used` field of an initialize response. Anything unrecognized is treated as
    /// SHA-256, matching what older servers did before the field existed.
    pub fn from_hash_used(hash_used: Option<&str>) -> HashAlgorithm {
        match hash_used {
            Some("none") => HashAlgorithm::None,
            Some("djb2") => HashAlgorithm::Djb2,
            _ => HashAlgorithm::Sha256,
        }
    }

    /// Value sent in the `hash` field of an initialize request.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::None => "none",
            HashAlgorithm::Djb2 => "djb2",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn hash_name(&self, name: &str) -> String {
        match self {
            HashAlgorithm::None => name.to_owned(),
            HashAlgorithm::Djb2 => djb2(name),
            HashAlgorithm::Sha256 => sha256_base64(name),
        }
    }
}

/// djb2 over UTF-16 code units with 32-bit wrapping arithmetic, rendered as an unsigned decimal.
pub fn djb2(value: &str) -> String {
    let mut hash: i32 = 0;
    for unit in value.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    (hash as u32).to_string()
}

pub fn sha256_base64(value: &str) -> String {
    BASE64.encode(Sha256::digest(value.as_bytes()))
}
