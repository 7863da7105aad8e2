use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use clubhub_core::Entity;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Storage could not be reached or is in a bad state. Callers may retry.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Persistence interface for one entity type.
///
/// `save` is an upsert keyed by `Entity::id`.
pub trait Repository<T: Entity>: Send + Sync {
    fn save(&self, entity: T) -> Result<(), RepositoryError>;
    fn find_by_id(&self, id: &T::Id) -> Result<Option<T>, RepositoryError>;
    /// Returns whether a row was removed.
    fn delete(&self, id: &T::Id) -> Result<bool, RepositoryError>;
    fn list(&self) -> Result<Vec<T>, RepositoryError>;
}

impl<T, S> Repository<T> for Arc<S>
where
    T: Entity,
    S: Repository<T> + ?Sized,
{
    fn save(&self, entity: T) -> Result<(), RepositoryError> {
        (**self).save(entity)
    }

    fn find_by_id(&self, id: &T::Id) -> Result<Option<T>, RepositoryError> {
        (**self).find_by_id(id)
    }

    fn delete(&self, id: &T::Id) -> Result<bool, RepositoryError> {
        (**self).delete(id)
    }

    fn list(&self) -> Result<Vec<T>, RepositoryError> {
        (**self).list()
    }
}

/// In-memory repository for tests/dev.
///
/// `set_unavailable(true)` makes every call fail, to exercise retry paths.
/// `set_read_only(true)` fails only `save` and `delete`.
#[derive(Debug)]
pub struct InMemoryRepository<T: Entity> {
    inner: RwLock<HashMap<T::Id, T>>,
    unavailable: AtomicBool,
    read_only: AtomicBool,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("storage offline".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), RepositoryError> {
        self.check()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("storage is read-only".into()));
        }
        Ok(())
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Unavailable("lock poisoned".into())
}

impl<T> Repository<T> for InMemoryRepository<T>
where
    T: Entity + Clone + Send + Sync + 'static,
    T::Id: Send + Sync,
{
    fn save(&self, entity: T) -> Result<(), RepositoryError> {
        self.check_write()?;
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(entity.id().clone(), entity);
        Ok(())
    }

    fn find_by_id(&self, id: &T::Id) -> Result<Option<T>, RepositoryError> {
        self.check()?;
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(id).cloned())
    }

    fn delete(&self, id: &T::Id) -> Result<bool, RepositoryError> {
        self.check_write()?;
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        Ok(map.remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<T>, RepositoryError> {
        self.check()?;
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }
}
