use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;

const SESSION_EVENT_CAPACITY: usize = 16;

/// Lifecycle notifications emitted by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A 401 was recovered by refreshing the bearer token.
    TokenRefreshed,
    /// Refresh failed or the replay was rejected: the token has been
    /// dropped and the user must log in again.
    LoggedOut,
}

/// Bearer token holder shared by every request.
///
/// Reads are lock-free (`ArcSwapOption`); the token is only ever replaced
/// wholesale on login, refresh, or logout.
#[derive(Debug)]
pub struct Session {
    token: ArcSwapOption<SecretString>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for Session {
    fn default() -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            token: ArcSwapOption::empty(),
            events,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a bearer token (after login).
    pub fn set_token(&self, token: SecretString) {
        self.token.store(Some(Arc::new(token)));
    }

    /// Whether a session is active (a token is present).
    pub fn is_active(&self) -> bool {
        self.token.load().is_some()
    }

    /// The `Authorization` header value, if a token is present.
    pub(crate) fn bearer(&self) -> Option<String> {
        self.token
            .load_full()
            .map(|t| format!("Bearer {}", t.expose_secret()))
    }

    pub(crate) fn refreshed(&self, token: SecretString) {
        self.set_token(token);
        let _ = self.events.send(SessionEvent::TokenRefreshed);
    }

    /// Drop the token and tell subscribers the session is gone.
    pub fn logout(&self) {
        self.token.store(None);
        let _ = self.events.send(SessionEvent::LoggedOut);
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bearer_reflects_token() {
        let session = Session::new();
        assert!(session.bearer().is_none());

        session.set_token(SecretString::from("abc".to_string()));
        assert!(session.is_active());
        assert_eq!(session.bearer().as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn logout_clears_and_notifies() {
        let session = Session::new();
        let mut rx = session.subscribe();
        session.set_token(SecretString::from("abc".to_string()));

        session.logout();
        assert!(!session.is_active());
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::LoggedOut);
    }
}
