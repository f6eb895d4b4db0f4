//! Subscriber bearer tokens.
//!
//! Tokens are `<tenant_id>.<expiry_unix>.<hex hmac>`, signed with the
//! broker's signing key. Issuance happens during the OAuth bind flow, which
//! is outside the core; the broker only verifies.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

fn signature(key: &str, tenant_id: &str, expiry: i64) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    mac.update(tenant_id.as_bytes());
    mac.update(b".");
    mac.update(expiry.to_string().as_bytes());
    Some(mac.finalize().into_bytes().to_vec())
}

/// Mint a token for `tenant_id` valid until `expiry` (unix seconds).
pub fn sign_token(key: &str, tenant_id: &str, expiry: i64) -> Option<String> {
    let sig = signature(key, tenant_id, expiry)?;
    Some(format!("{tenant_id}.{expiry}.{}", hex::encode(sig)))
}

/// Verify a token and return the tenant id it is bound to.
///
/// Rejects malformed tokens, bad signatures, and expired tokens.
pub fn verify_token(key: &str, token: &str) -> Option<String> {
    let (tenant_id, rest) = token.split_once('.')?;
    let (expiry_str, sig_hex) = rest.split_once('.')?;
    let expiry: i64 = expiry_str.parse().ok()?;
    if expiry < chrono::Utc::now().timestamp() {
        return None;
    }

    let sig = hex::decode(sig_hex).ok()?;
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).ok()?;
    mac.update(tenant_id.as_bytes());
    mac.update(b".");
    mac.update(expiry_str.as_bytes());
    mac.verify_slice(&sig).ok()?;

    Some(tenant_id.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "test-signing-key";

    fn future_expiry() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn signed_token_verifies_to_its_tenant() {
        let token = sign_token(KEY, "t-1", future_expiry()).unwrap();
        assert_eq!(verify_token(KEY, &token).as_deref(), Some("t-1"));
    }

    #[test]
    fn wrong_key_and_tampered_tenant_are_rejected() {
        let token = sign_token(KEY, "t-1", future_expiry()).unwrap();
        assert!(verify_token("other-key", &token).is_none());

        let tampered = token.replacen("t-1", "t-2", 1);
        assert!(verify_token(KEY, &tampered).is_none());
    }

    #[test]
    fn expired_and_malformed_tokens_are_rejected() {
        let expired = sign_token(KEY, "t-1", chrono::Utc::now().timestamp() - 10).unwrap();
        assert!(verify_token(KEY, &expired).is_none());
        assert!(verify_token(KEY, "not-a-token").is_none());
        assert!(verify_token(KEY, "t-1.notanumber.aabb").is_none());
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("Basic abc"), None);
    }
}
