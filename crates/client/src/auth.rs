//! Bearer token supply for the push connection.
//!
//! Token storage and refresh belong to the application's auth layer. The
//! real-time client only asks for the current token each time it opens a
//! physical connection.

use orderlink_shared::{RealtimeError, RealtimeResult};

/// Source of the bearer token attached when a connection is opened.
pub trait TokenProvider: Send + Sync {
    /// The current token, or `None` when the user is signed out.
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A fixed token, e.g. one read once from the environment.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Fetch a usable token or fail with `AuthenticationRequired`.
pub(crate) fn require_token(provider: &dyn TokenProvider) -> RealtimeResult<String> {
    provider
        .token()
        .filter(|token| !token.trim().is_empty())
        .ok_or(RealtimeError::AuthenticationRequired)
}
