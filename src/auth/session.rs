//! Bearer session tokens.
//!
//! Tokens are 32 random bytes, base64url encoded without padding. Only the
//! sha-256 digest (hex) is persisted, so a leaked database does not leak
//! usable sessions.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Name of the cookie carrying the session token for page requests.
pub const SESSION_COOKIE: &str = "clientdesk_session";

const TOKEN_BYTES: usize = 32;

/// Generate a fresh session token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest stored in the sessions table for `token`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time comparison of a presented token against a stored digest.
pub fn token_matches(token: &str, stored_hash: &str) -> bool {
    hash_token(token)
        .as_bytes()
        .ct_eq(stored_hash.as_bytes())
        .into()
}

/// Whether `token` has the shape of a token produced by [`generate_token`].
pub fn looks_like_token(token: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(token)
        .is_ok_and(|bytes| bytes.len() == TOKEN_BYTES)
}
