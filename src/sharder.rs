//! Sharder implementation.
use sha2::{Digest, Sha256};

/// Number of buckets used for rule pass percentages (two decimal places of precision).
pub const PERCENTAGE_BUCKETS: u64 = 10_000;
/// Number of buckets used by `user_bucket` conditions.
pub const USER_BUCKETS: u64 = 1_000;

pub trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
pub struct Sha256Sharder;

impl Sharder for Sha256Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        bucket_bytes(input.as_ref()) % total_shards
    }
}

/// First 8 bytes of the SHA-256 digest of `seed`, big-endian.
pub fn bucket(seed: &str) -> u64 {
    bucket_bytes(seed.as_bytes())
}

pub fn percentage_bucket(seed: &str) -> u64 {
    Sha256Sharder.get_shard(seed, PERCENTAGE_BUCKETS)
}

pub fn user_bucket(seed: &str) -> u64 {
    Sha256Sharder.get_shard(seed, USER_BUCKETS)
}

fn bucket_bytes(input: &[u8]) -> u64 {
    let digest = Sha256::digest(input);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_big_endian_digest_prefix() {
        assert_eq!(bucket("a_gate"), 16644890864482643305);
        assert_eq!(bucket("salt.rule.user-1"), 15577061253428978512);
    }

    #[test]
    fn percentage_and_user_buckets() {
        assert_eq!(percentage_bucket("salt.rule.user-1"), 8512);
        assert_eq!(user_bucket("user_bucket_salt.user-1"), 977);
        assert_eq!(percentage_bucket("exp_salt.rule_salt.user-a"), 3617);
    }

    #[test]
    fn bucket_is_deterministic() {
        for seed in ["", "a", "spec.rule.u1", "ünïcödé"] {
            assert_eq!(bucket(seed), bucket(seed));
        }
    }

    #[test]
    fn changing_any_component_changes_bucket() {
        let base = bucket("spec.rule.u1");
        assert_ne!(base, bucket("spec.rule.u2"));
        assert_ne!(base, bucket("spec.other.u1"));
        assert_ne!(base, bucket("other.rule.u1"));
    }
}
