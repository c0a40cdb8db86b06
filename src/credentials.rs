//! Credential access for the authentication handshake and HTTP calls.
//!
//! [`CredentialSource`] is the leaf seam between the engine and wherever
//! the session token actually lives (a cookie jar, a keychain, a config
//! file). The engine only ever asks for the current token on demand;
//! absence of a token makes connection attempts silent no-ops that are
//! retried once a token appears.

use std::sync::RwLock;

/// Read (and optionally record) the current session credential.
///
/// `token` is called at every dial attempt and on every HTTP request, so
/// implementations should be cheap. The `store`/`clear` hooks let the
/// login and logout flows record the server-issued token; read-only
/// sources may leave the default no-op implementations.
pub trait CredentialSource: Send + Sync + 'static {
    /// The current bearer token, if one is available.
    fn token(&self) -> Option<String>;

    /// Record a freshly issued token. Default: ignored.
    fn store(&self, _token: String) {}

    /// Discard the stored token. Default: ignored.
    fn clear(&self) {}
}

/// Process-local in-memory credential store.
///
/// The login flow writes the server-issued token here; every connection
/// and HTTP call reads it back. Shared across tasks via `Arc`.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<String>>,
}

impl MemoryCredentials {
    /// An empty store with no credential.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with a token (e.g. restored from a cookie).
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl CredentialSource for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn store(&self, token: String) {
        *self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(token);
    }

    fn clear(&self) {
        *self
            .token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let creds = MemoryCredentials::new();
        assert!(creds.token().is_none());

        creds.store("tok".into());
        assert_eq!(creds.token().as_deref(), Some("tok"));

        creds.clear();
        assert!(creds.token().is_none());
    }

    #[test]
    fn with_token_is_populated() {
        let creds = MemoryCredentials::with_token("abc");
        assert_eq!(creds.token().as_deref(), Some("abc"));
    }
}
