//! Content-addressed vote fingerprints

use sha2::{Digest, Sha256};

/// Compute the content hash binding a vote to its campaign, voter and chosen
/// option. The nonce (wall-clock milliseconds at the call site) keeps retried
/// attempts from colliding; the voter seed ties the hash to the voter's
/// registry identity without exposing it.
pub fn vote_content_hash(
    campaign_id: i64,
    voter_id: i64,
    option_id: i64,
    voter_seed: &str,
    nonce: i64,
) -> String {
    let data = format!("{campaign_id}-{voter_id}-{option_id}-{nonce}-{voter_seed}");
    let digest = Sha256::digest(data.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::vote_content_hash;

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = vote_content_hash(1, 42, 7, "seed-x", 1_700_000_000_000);
        let b = vote_content_hash(1, 42, 7, "seed-x", 1_700_000_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn nonce_changes_the_hash() {
        let a = vote_content_hash(1, 42, 7, "seed-x", 1_700_000_000_000);
        let b = vote_content_hash(1, 42, 7, "seed-x", 1_700_000_000_001);
        assert_ne!(a, b);
    }

    #[test]
    fn hex_encoded_sha256() {
        let h = vote_content_hash(3, 9, 2, "dni-123", 0);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, h.to_lowercase());
    }
}
