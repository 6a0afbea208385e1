//! Stable fingerprints for cache keys.

use sha2::{Digest, Sha256};

/// Compute a stable fingerprint for a route and its canonical parameter string.
pub fn compute_key_fingerprint(route: &str, canonical_params: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(route.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_params.as_bytes());
    hex::encode(hasher.finalize())
}
