//! Prefixed identifiers
//!
//! Record ids look like `usr_3xQk1Nn0cQhGfW2p` or `ses_...`: a short prefix naming
//! the record kind followed by at least 96 bits of URL-safe base64 randomness.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

/// Generate a prefixed ID with 96 bits of entropy.
///
/// # Example
/// ```
/// let user_id = aula_core::id::generate_prefixed_id("usr");
/// assert!(user_id.starts_with("usr_"));
/// ```
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");

    format!("{prefix}_{}", BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Check that `id` is `{expected_prefix}_{base64 with >= 96 bits}`.
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    BASE64_URL_SAFE_NO_PAD
        .decode(random_part)
        .is_ok_and(|decoded| decoded.len() >= 12)
}
