//! Authentication boundary consumed by the cloud backend.
//!
//! Identity provisioning lives elsewhere; storage only needs to know whether a
//! session exists and which opaque user id it belongs to.

use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

/// Source of the current session. The session may end at any time, so
/// callers re-query before every operation.
pub trait SessionProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

/// Session holder for embedders that push sign-in state into storage.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    session: RwLock<Option<Session>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    pub fn signed_in(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(Some(Session::new(user_id, access_token)))
    }

    pub fn sign_in(&self, session: Session) {
        match self.session.write() {
            Ok(mut guard) => *guard = Some(session),
            Err(poisoned) => *poisoned.into_inner() = Some(session),
        }
    }

    pub fn sign_out(&self) {
        match self.session.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl SessionProvider for StaticSessionProvider {
    fn current_session(&self) -> Option<Session> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_out_clears_session() {
        let provider = StaticSessionProvider::signed_in("user-1", "token");
        assert_eq!(
            provider.current_session().map(|s| s.user_id),
            Some("user-1".to_string())
        );

        provider.sign_out();
        assert!(provider.current_session().is_none());
    }
}
