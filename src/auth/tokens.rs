//! Stored bearer credential with expiry tracking

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds before expiry at which a token is already treated as expired.
const EXPIRY_SKEW_SECS: u64 = 300;

/// Stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| now_secs() + secs);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 5 minutes remaining
            Some(exp) => now_secs() + EXPIRY_SKEW_SECS >= exp,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_without_expiry_never_expires() {
        let t = StoredToken::new("abc".into(), None);
        assert!(!t.is_expired());
    }

    #[test]
    fn test_token_inside_skew_window_is_expired() {
        let t = StoredToken::new("abc".into(), Some(60));
        assert!(t.is_expired());

        let t = StoredToken::new("abc".into(), Some(3600));
        assert!(!t.is_expired());
    }
}
