//! Identity gate for the call core
//!
//! The bearer token itself is issued by the FinderNate login flow (outside
//! this tool). Here we only store it and decide whether a usable identity
//! is present: the socket channel, the push channel and the stale-call
//! janitor all refuse to start without one.

pub mod tokens;

use anyhow::Result;

pub use tokens::StoredToken;

use crate::config::Config;

/// Authenticated user as seen by the call core.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub token: StoredToken,
}

impl Identity {
    /// Current identity, or `None` when not logged in or the token has expired.
    pub fn from_config(config: &Config) -> Option<Self> {
        let user_id = config.user_id.clone().filter(|id| !id.is_empty())?;
        let token = config.access_token.clone()?;
        if token.is_expired() {
            tracing::debug!("Stored access token for {} is expired", user_id);
            return None;
        }
        Some(Self { user_id, token })
    }

    pub fn bearer(&self) -> &str {
        &self.token.token
    }
}

/// Store a credential obtained from the FinderNate login flow.
pub fn login(user_id: &str, token: &str, expires_in: Option<u64>) -> Result<()> {
    let mut config = Config::load()?;
    config.user_id = Some(user_id.to_string());
    config.access_token = Some(StoredToken::new(token.to_string(), expires_in));
    config.save()?;
    println!("Stored credentials for user {}", user_id);
    Ok(())
}

/// Clear the stored credential.
pub fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_credentials();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Print identity status.
pub fn status() -> Result<()> {
    let config = Config::load()?;
    match Identity::from_config(&config) {
        Some(identity) => {
            println!("Logged in as {}", identity.user_id);
            match identity.token.expires_at {
                Some(exp) => println!("Token expires at unix time {}", exp),
                None => println!("Token has no recorded expiry"),
            }
        }
        None if config.access_token.is_some() => {
            println!("Token expired or user id missing. Run 'findernate-calls login'.");
        }
        None => println!("Not logged in."),
    }
    Ok(())
}
