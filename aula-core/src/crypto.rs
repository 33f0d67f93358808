//! Cryptographic helpers for session tokens, recovery codes and TOTP.
//!
//! Recovery codes are stored as SHA256 hashes and compared in constant time.
//! Time-based one-time passwords follow RFC 6238 (HMAC-SHA1, 30 second step),
//! which is what authenticator apps expect by default.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

type HmacSha1 = Hmac<Sha1>;

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");
    bytes
}

/// Generate a 256-bit random token encoded as URL-safe base64 (43 characters).
pub fn generate_secure_token() -> String {
    base64::Engine::encode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        random_bytes::<32>(),
    )
}

/// Hex-encoded SHA256 of a token, used as its storage form.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a token against a stored SHA256 hash without early exit.
pub fn verify_token_hash(token: &str, stored_hash: &str) -> bool {
    constant_time_compare(hash_token(token).as_bytes(), stored_hash.as_bytes())
}

pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// A recovery code in the form `a1b2c3d4e5-f6a7b8c9d0`.
pub fn generate_recovery_code() -> String {
    format!(
        "{}-{}",
        hex::encode(random_bytes::<5>()),
        hex::encode(random_bytes::<5>())
    )
}

/// Normalize user input before hashing: authenticator users paste codes with
/// stray whitespace and mixed case.
pub fn normalize_recovery_code(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}

/// A fresh 160-bit TOTP secret, base32 encoded without padding.
pub fn generate_totp_secret() -> String {
    BASE32_NOPAD.encode(&random_bytes::<20>())
}

pub fn decode_totp_secret(secret: &str) -> Result<Vec<u8>, CryptoError> {
    BASE32_NOPAD
        .decode(secret.trim().to_ascii_uppercase().as_bytes())
        .map_err(|e| CryptoError::TwoFactorSecret(e.to_string()))
}

/// RFC 4226 HOTP value for `counter`, zero padded to `digits`.
pub fn hotp(secret: &[u8], counter: u64, digits: u32) -> Result<String, CryptoError> {
    let modulus = 10u32
        .checked_pow(digits)
        .ok_or_else(|| CryptoError::TwoFactorParameters(format!("{digits} digits")))?;

    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| CryptoError::TwoFactorSecret(e.to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    let code = binary % modulus;
    Ok(format!("{code:0width$}", width = digits as usize))
}

/// RFC 6238 TOTP value for a unix timestamp.
pub fn totp(secret: &[u8], unix_time: u64, step: u64, digits: u32) -> Result<String, CryptoError> {
    hotp(secret, time_step(unix_time, step)?, digits)
}

fn time_step(unix_time: u64, step: u64) -> Result<u64, CryptoError> {
    unix_time
        .checked_div(step)
        .ok_or_else(|| CryptoError::TwoFactorParameters("time step of 0 seconds".to_string()))
}

/// Widest accepted window on either side of the current time step.
pub const MAX_TOTP_SKEW: u64 = 10;

/// Check `code` against the time steps `[-skew, +skew]` around `unix_time`.
pub fn verify_totp(
    secret: &[u8],
    code: &str,
    unix_time: u64,
    step: u64,
    digits: u32,
    skew: u64,
) -> Result<bool, CryptoError> {
    let code = code.trim();
    if code.len() != digits as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }

    if skew > MAX_TOTP_SKEW {
        return Err(CryptoError::TwoFactorParameters(format!("skew of {skew} steps")));
    }

    let counter = time_step(unix_time, step)?;
    let mut matched = false;
    for candidate in counter.saturating_sub(skew)..=counter.saturating_add(skew) {
        // Every window is computed so timing does not depend on which one matched.
        let expected = hotp(secret, candidate, digits)?;
        matched |= constant_time_compare(expected.as_bytes(), code.as_bytes());
    }
    Ok(matched)
}
