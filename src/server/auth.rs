//! Single-admin authentication.
//!
//! Bearer tokens are HMAC-SHA256 signed over a JSON claims blob with a
//! secret generated at process start — restarting the server invalidates
//! outstanding tokens, which is acceptable for a single-operator tool.
//! Passwords are stored as salted SHA-256 with a constant-time verify.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime.
const TOKEN_EXPIRE_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Process-wide token signer/verifier.
pub struct AuthService {
    secret: [u8; 32],
}

impl Default for AuthService {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthService {
    #[must_use]
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    /// Issue a bearer token for the admin subject.
    #[must_use]
    pub fn issue_token(&self) -> String {
        let claims = Claims {
            sub: "admin".to_string(),
            exp: (Utc::now() + chrono::Duration::hours(TOKEN_EXPIRE_HOURS)).timestamp(),
        };
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Verify signature, subject, and expiry.
    #[must_use]
    pub fn verify_token(&self, token: &str) -> bool {
        let Some((payload_b64, signature_b64)) = token.split_once('.') else {
            return false;
        };
        let Ok(payload) = URL_SAFE_NO_PAD.decode(payload_b64) else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_b64) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(&payload);
        if mac.verify_slice(&signature).is_err() {
            return false;
        }
        let Ok(claims) = serde_json::from_slice::<Claims>(&payload) else {
            return false;
        };
        claims.sub == "admin" && claims.exp > Utc::now().timestamp()
    }
}

/// Hash a password as `salt$digest`, both hex.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = salted_digest(&salt, password);
    format!("{}${}", hex::encode(salt), hex::encode(digest))
}

/// Constant-time password check against a stored `salt$digest`.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once('$') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };
    let actual = salted_digest(&salt, password);
    if actual.len() != expected.len() {
        return false;
    }
    actual
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn salted_digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let auth = AuthService::new();
        let token = auth.issue_token();
        assert!(auth.verify_token(&token));
    }

    #[test]
    fn token_from_other_service_is_rejected() {
        let token = AuthService::new().issue_token();
        assert!(!AuthService::new().verify_token(&token));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let auth = AuthService::new();
        let mut token = auth.issue_token();
        token.push('x');
        assert!(!auth.verify_token(&token));
        assert!(!auth.verify_token("not-a-token"));
        assert!(!auth.verify_token(""));
    }

    #[test]
    fn password_hash_and_verify() {
        let hash = hash_password("hunter22");
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "garbage"));
        // Two hashes of the same password differ by salt.
        assert_ne!(hash, hash_password("hunter22"));
    }
}
