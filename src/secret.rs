//! Sealing for the stored gateway credential.
//!
//! Encryption at rest is an external concern (a KMS or OS keystore in a
//! real deployment); the engine only needs a seam so callers never touch
//! the raw column value. `seal`/`open` currently base64-wrap the secret —
//! replace these two functions to introduce real encryption without
//! touching any caller.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const SEALED_PREFIX: &str = "sealed:";

/// Wrap a secret for storage.
#[must_use]
pub fn seal(secret: &str) -> String {
    format!("{SEALED_PREFIX}{}", STANDARD.encode(secret.as_bytes()))
}

/// Unwrap a stored secret. `None` for values that are not valid sealed
/// blobs — callers treat that as a configuration failure, not a panic.
#[must_use]
pub fn open(sealed: &str) -> Option<String> {
    let encoded = sealed.strip_prefix(SEALED_PREFIX)?;
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let sealed = seal("api-key-123");
        assert_ne!(sealed, "api-key-123");
        assert_eq!(open(&sealed).as_deref(), Some("api-key-123"));
    }

    #[test]
    fn open_rejects_unsealed_values() {
        assert_eq!(open("plaintext"), None);
        assert_eq!(open("sealed:!!!not-base64!!!"), None);
    }
}
