//! Access to the application's persisted credentials.
//!
//! A channel authenticates by embedding an access token in its connection
//! URL. The token lives in a store the application owns; the channel only
//! reads it, once per [`connect_from`](crate::Channel::connect_from) call,
//! and never refreshes it. [`TokenStore`] is the seam between the two;
//! [`MemoryTokenStore`] is the bundled implementation for composition
//! roots that keep credentials in process memory.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// The token pair issued by the authentication API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    /// Short-lived token presented on every connection.
    pub access_token: String,
    /// Long-lived token the application exchanges for fresh access tokens.
    /// Carried here for persistence; the channel client never uses it.
    pub refresh_token: String,
}

impl AuthTokens {
    /// Create a token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Read-only view of the current credentials.
///
/// Reads are synchronous: the channel samples the token at connect time
/// only, so there is nothing to await and no reason for the store to be
/// async.
pub trait TokenStore: Send + Sync {
    /// The current access token, if a user is logged in.
    fn access_token(&self) -> Option<String>;
}

/// An in-memory [`TokenStore`] with login/logout semantics.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<AuthTokens>>,
}

impl MemoryTokenStore {
    /// Create an empty store (logged out).
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored credentials with a freshly issued pair.
    pub fn login(&self, tokens: AuthTokens) {
        if let Ok(mut slot) = self.tokens.write() {
            *slot = Some(tokens);
        }
    }

    /// Clear the stored credentials.
    pub fn logout(&self) {
        if let Ok(mut slot) = self.tokens.write() {
            *slot = None;
        }
    }

    /// Returns `true` if credentials are present.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.read().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|t| t.access_token.clone()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn starts_logged_out() {
        let store = MemoryTokenStore::new();
        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());
    }

    #[test]
    fn login_exposes_the_access_token() {
        let store = MemoryTokenStore::new();
        store.login(AuthTokens::new("acc-1", "ref-1"));
        assert!(store.is_authenticated());
        assert_eq!(store.access_token().as_deref(), Some("acc-1"));
    }

    #[test]
    fn login_replaces_previous_tokens() {
        let store = MemoryTokenStore::new();
        store.login(AuthTokens::new("acc-1", "ref-1"));
        store.login(AuthTokens::new("acc-2", "ref-2"));
        assert_eq!(store.access_token().as_deref(), Some("acc-2"));
    }

    #[test]
    fn logout_clears_tokens() {
        let store = MemoryTokenStore::new();
        store.login(AuthTokens::new("acc-1", "ref-1"));
        store.logout();
        assert!(!store.is_authenticated());
        assert!(store.access_token().is_none());
    }

    #[test]
    fn tokens_round_trip_through_json() {
        let tokens = AuthTokens::new("acc", "ref");
        let text = serde_json::to_string(&tokens).unwrap();
        assert!(text.contains("\"access_token\":\"acc\""));
        assert!(text.contains("\"refresh_token\":\"ref\""));
        let back: AuthTokens = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tokens);
    }
}
