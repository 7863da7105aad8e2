//! External collaborators: object storage, e-mail, and the identity
//! service's user lookup. Interfaces plus in-memory implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use clubhub_core::UserId;

use crate::store::{Repository, UserDirectoryEntry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    #[error("{service} rejected the request: {reason}")]
    Rejected { service: &'static str, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Object storage
// ─────────────────────────────────────────────────────────────────────────────

pub trait ObjectStorage: Send + Sync {
    fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), ExternalError>;
    /// URL for a stored object, `None` if the key does not exist.
    fn get_url(&self, key: &str) -> Result<Option<String>, ExternalError>;
    fn delete(&self, key: &str) -> Result<bool, ExternalError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug)]
pub struct InMemoryObjectStorage {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl InMemoryObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(key).cloned()
    }
}

impl Default for InMemoryObjectStorage {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

fn storage_poisoned() -> ExternalError {
    ExternalError::Unavailable {
        service: "object storage",
        reason: "lock poisoned".into(),
    }
}

impl ObjectStorage for InMemoryObjectStorage {
    fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), ExternalError> {
        if key.is_empty() {
            return Err(ExternalError::Rejected {
                service: "object storage",
                reason: "empty key".into(),
            });
        }
        self.objects.lock().map_err(|_| storage_poisoned())?.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn get_url(&self, key: &str) -> Result<Option<String>, ExternalError> {
        let objects = self.objects.lock().map_err(|_| storage_poisoned())?;
        Ok(objects.contains_key(key).then(|| format!("{}/{key}", self.base_url)))
    }

    fn delete(&self, key: &str) -> Result<bool, ExternalError> {
        Ok(self.objects.lock().map_err(|_| storage_poisoned())?.remove(key).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mailer
// ─────────────────────────────────────────────────────────────────────────────

pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExternalError>;
}

impl<M> Mailer for Arc<M>
where
    M: Mailer + ?Sized,
{
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExternalError> {
        (**self).send(to, subject, body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Records mail instead of sending it. `fail_next(n)` makes the next `n`
/// sends fail as unavailable.
#[derive(Debug, Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<SentMail>>,
    failures: Mutex<u32>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn fail_next(&self, n: u32) {
        if let Ok(mut f) = self.failures.lock() {
            *f = n;
        }
    }
}

impl Mailer for InMemoryMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExternalError> {
        let unavailable = |reason: &str| ExternalError::Unavailable {
            service: "mailer",
            reason: reason.to_string(),
        };

        let mut failures = self.failures.lock().map_err(|_| unavailable("lock poisoned"))?;
        if *failures > 0 {
            *failures -= 1;
            return Err(unavailable("smtp relay refused connection"));
        }
        drop(failures);

        self.sent.lock().map_err(|_| unavailable("lock poisoned"))?.push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Dev mailer: writes each message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ExternalError> {
        info!(to, subject, body, "mail");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User lookup
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve a login e-mail to a user id in the identity service.
pub trait UserLookup: Send + Sync {
    fn find_by_email(&self, email: &str) -> Result<Option<UserId>, ExternalError>;
}

impl<L> UserLookup for Arc<L>
where
    L: UserLookup + ?Sized,
{
    fn find_by_email(&self, email: &str) -> Result<Option<UserId>, ExternalError> {
        (**self).find_by_email(email)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserLookup {
    users: Mutex<HashMap<String, UserId>>,
    offline: Mutex<bool>,
}

impl InMemoryUserLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, email: &str, user_id: UserId) {
        if let Ok(mut u) = self.users.lock() {
            u.insert(email.trim().to_lowercase(), user_id);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut o) = self.offline.lock() {
            *o = offline;
        }
    }
}

impl UserLookup for InMemoryUserLookup {
    fn find_by_email(&self, email: &str) -> Result<Option<UserId>, ExternalError> {
        let unavailable = |reason: &str| ExternalError::Unavailable {
            service: "user lookup",
            reason: reason.to_string(),
        };
        if *self.offline.lock().map_err(|_| unavailable("lock poisoned"))? {
            return Err(unavailable("identity service unreachable"));
        }
        let users = self.users.lock().map_err(|_| unavailable("lock poisoned"))?;
        Ok(users.get(&email.trim().to_lowercase()).copied())
    }
}

/// Lookup backed by the portal's user directory (fed by `user.registered`).
pub struct DirectoryUserLookup {
    directory: Arc<dyn Repository<UserDirectoryEntry>>,
}

impl DirectoryUserLookup {
    pub fn new(directory: Arc<dyn Repository<UserDirectoryEntry>>) -> Self {
        Self { directory }
    }
}

impl UserLookup for DirectoryUserLookup {
    fn find_by_email(&self, email: &str) -> Result<Option<UserId>, ExternalError> {
        let wanted = email.trim().to_lowercase();
        let entries = self.directory.list().map_err(|e| ExternalError::Unavailable {
            service: "user directory",
            reason: e.to_string(),
        })?;
        Ok(entries.into_iter().find(|e| e.email == wanted).map(|e| e.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRepository;

    #[test]
    fn object_storage_round_trip() {
        let s = InMemoryObjectStorage::new("https://cdn.example/");
        s.put("clubs/1/logo.png", vec![1, 2, 3], "image/png").unwrap();
        assert_eq!(
            s.get_url("clubs/1/logo.png").unwrap().as_deref(),
            Some("https://cdn.example/clubs/1/logo.png")
        );
        assert!(s.delete("clubs/1/logo.png").unwrap());
        assert_eq!(s.get_url("clubs/1/logo.png").unwrap(), None);
        assert!(!s.delete("clubs/1/logo.png").unwrap());
    }

    #[test]
    fn mailer_failures_are_scripted() {
        let m = InMemoryMailer::new();
        m.fail_next(1);
        assert!(m.send("a@b.c", "s", "b").is_err());
        assert!(m.send("a@b.c", "s", "b").is_ok());
        assert_eq!(m.sent().len(), 1);
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let l = InMemoryUserLookup::new();
        let id = UserId::new();
        l.insert("Pat@Campus.edu", id);
        assert_eq!(l.find_by_email(" pat@campus.EDU").unwrap(), Some(id));

        l.set_offline(true);
        assert!(l.find_by_email("pat@campus.edu").is_err());
    }

    #[test]
    fn directory_lookup_reads_registered_users() {
        let repo: Arc<InMemoryRepository<UserDirectoryEntry>> = Arc::new(InMemoryRepository::new());
        let id = UserId::new();
        let mut entry = UserDirectoryEntry::placeholder(id);
        entry.email = "kim@campus.edu".into();
        repo.save(entry).unwrap();

        let lookup = DirectoryUserLookup::new(repo);
        assert_eq!(lookup.find_by_email("KIM@campus.edu").unwrap(), Some(id));
        assert_eq!(lookup.find_by_email("nobody@campus.edu").unwrap(), None);
    }
}
