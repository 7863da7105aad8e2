//! Opaque refresh sessions.
//!
//! A user has at most one live refresh id. Issuing a new one supersedes the
//! previous id, and presenting an id consumes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clubhub_core::UserId;

use crate::claims::TokenError;

/// Opaque long-lived refresh identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RefreshToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub token: RefreshToken,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

/// Storage for refresh sessions.
///
/// Failures surface as [`TokenError::Store`].
pub trait RefreshStore: Send + Sync {
    /// Store `session`, invalidating every other session of the same user.
    fn replace_for_user(&self, session: RefreshSession) -> Result<(), TokenError>;

    /// Remove and return the session for `token` (single use).
    fn take(&self, token: &RefreshToken) -> Result<Option<RefreshSession>, TokenError>;
}

impl<S> RefreshStore for Arc<S>
where
    S: RefreshStore + ?Sized,
{
    fn replace_for_user(&self, session: RefreshSession) -> Result<(), TokenError> {
        (**self).replace_for_user(session)
    }

    fn take(&self, token: &RefreshToken) -> Result<Option<RefreshSession>, TokenError> {
        (**self).take(token)
    }
}

#[derive(Debug, Default)]
struct Sessions {
    by_token: HashMap<RefreshToken, RefreshSession>,
    by_user: HashMap<UserId, RefreshToken>,
}

/// In-memory refresh store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRefreshStore {
    inner: Mutex<Sessions>,
}

impl InMemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> Result<MutexGuard<'_, Sessions>, TokenError> {
        self.inner
            .lock()
            .map_err(|_| TokenError::Store("session lock poisoned".into()))
    }
}

impl RefreshStore for InMemoryRefreshStore {
    fn replace_for_user(&self, session: RefreshSession) -> Result<(), TokenError> {
        let mut s = self.sessions()?;
        if let Some(previous) = s.by_user.insert(session.user_id, session.token.clone()) {
            s.by_token.remove(&previous);
        }
        s.by_token.insert(session.token.clone(), session);
        Ok(())
    }

    fn take(&self, token: &RefreshToken) -> Result<Option<RefreshSession>, TokenError> {
        let mut s = self.sessions()?;
        let Some(session) = s.by_token.remove(token) else {
            return Ok(None);
        };
        if s.by_user.get(&session.user_id) == Some(token) {
            s.by_user.remove(&session.user_id);
        }
        Ok(Some(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user_id: UserId) -> RefreshSession {
        RefreshSession {
            token: RefreshToken::generate(),
            user_id,
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn new_session_supersedes_previous() {
        let store = InMemoryRefreshStore::new();
        let user = UserId::new();
        let first = session(user);
        let second = session(user);

        store.replace_for_user(first.clone()).unwrap();
        store.replace_for_user(second.clone()).unwrap();

        assert!(store.take(&first.token).unwrap().is_none());
        assert_eq!(store.take(&second.token).unwrap(), Some(second));
    }

    #[test]
    fn take_is_single_use() {
        let store = InMemoryRefreshStore::new();
        let s = session(UserId::new());
        store.replace_for_user(s.clone()).unwrap();

        assert!(store.take(&s.token).unwrap().is_some());
        assert!(store.take(&s.token).unwrap().is_none());
    }

    #[test]
    fn sessions_of_other_users_are_untouched() {
        let store = InMemoryRefreshStore::new();
        let a = session(UserId::new());
        let b = session(UserId::new());
        store.replace_for_user(a.clone()).unwrap();
        store.replace_for_user(b.clone()).unwrap();
        store.replace_for_user(session(a.user_id)).unwrap();

        assert!(store.take(&a.token).unwrap().is_none());
        assert!(store.take(&b.token).unwrap().is_some());
    }

    #[test]
    fn poisoned_store_reports_instead_of_dropping_the_session() {
        let store = Arc::new(InMemoryRefreshStore::new());
        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("writer died mid-update");
        })
        .join();

        let s = session(UserId::new());
        assert!(matches!(store.replace_for_user(s.clone()), Err(TokenError::Store(_))));
        assert!(matches!(store.take(&s.token), Err(TokenError::Store(_))));
    }
}
