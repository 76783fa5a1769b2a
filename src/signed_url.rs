//! Time-limited signed content URLs.
//!
//! The engine downloads decks and data-room files through these links.
//! Tokens are a SHA-256 digest over (secret, path, expiry) rendered as
//! hex, with the expiry carried openly as a query parameter — the link
//! is a capability, never a permanent identifier.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

pub struct SignedUrlIssuer {
    base_url: String,
    secret: String,
}

impl SignedUrlIssuer {
    pub fn new(base_url: &str, secret: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    /// Issue a signed URL for a storage path, valid for `ttl_hours`.
    pub fn issue(&self, path: &str, ttl_hours: u64) -> Result<String, String> {
        let expires = Utc::now() + chrono::Duration::hours(ttl_hours as i64);
        let expires_unix = expires.timestamp();
        let token = self.token_for(path, expires_unix);

        let mut url = Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .map_err(|e| format!("Invalid storage URL: {}", e))?;
        url.query_pairs_mut()
            .append_pair("expires", &expires_unix.to_string())
            .append_pair("token", &token);
        Ok(url.to_string())
    }

    /// Verify a previously issued URL: token must match and the expiry
    /// must be in the future.
    pub fn verify(&self, signed: &str) -> bool {
        let Ok(url) = Url::parse(signed) else {
            return false;
        };
        let mut expires: Option<i64> = None;
        let mut token: Option<String> = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "expires" => expires = value.parse().ok(),
                "token" => token = Some(value.to_string()),
                _ => {}
            }
        }
        let (Some(expires), Some(token)) = (expires, token) else {
            return false;
        };
        if let Some(expiry_time) = DateTime::from_timestamp(expires, 0) {
            if expiry_time <= Utc::now() {
                return false;
            }
        } else {
            return false;
        }
        let path = url.path().trim_start_matches('/');
        token == self.token_for(path, expires)
    }

    fn token_for(&self, path: &str, expires_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"|");
        hasher.update(path.trim_start_matches('/').as_bytes());
        hasher.update(b"|");
        hasher.update(expires_unix.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> SignedUrlIssuer {
        SignedUrlIssuer::new("https://storage.example.com", "test-secret")
    }

    #[test]
    fn test_issue_carries_expiry_and_token() {
        let signed = issuer().issue("decks/s1/deck.pdf", 24).unwrap();
        let url = Url::parse(&signed).unwrap();
        let params: Vec<_> = url.query_pairs().map(|(k, _)| k.to_string()).collect();
        assert!(params.contains(&"expires".to_string()));
        assert!(params.contains(&"token".to_string()));
        assert!(signed.starts_with("https://storage.example.com/decks/s1/deck.pdf"));
    }

    #[test]
    fn test_verify_accepts_own_urls() {
        let issuer = issuer();
        let signed = issuer.issue("decks/s1/deck.pdf", 24).unwrap();
        assert!(issuer.verify(&signed));
    }

    #[test]
    fn test_verify_rejects_tampered_path() {
        let issuer = issuer();
        let signed = issuer.issue("decks/s1/deck.pdf", 24).unwrap();
        let tampered = signed.replace("s1", "s2");
        assert!(!issuer.verify(&tampered));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let signed = issuer().issue("decks/s1/deck.pdf", 24).unwrap();
        let other = SignedUrlIssuer::new("https://storage.example.com", "other-secret");
        assert!(!other.verify(&signed));
    }
}
