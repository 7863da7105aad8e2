//! Undo journal for multi-row writes made under [`PortalStore::transaction`].
//!
//! [`PortalStore::transaction`]: super::PortalStore::transaction

use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use clubhub_core::Entity;

use super::repository::{Repository, RepositoryError};

type Undo = Box<dyn FnOnce() -> Result<(), RepositoryError> + Send>;

/// Prior values of every row written through a [`Journaled`] repository.
///
/// `rollback` puts them back newest first; dropping the journal keeps the
/// writes.
#[derive(Clone, Default)]
pub struct Journal {
    undo: Arc<Mutex<Vec<Undo>>>,
}

impl core::fmt::Debug for Journal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Journal").field("entries", &self.len()).finish()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.undo.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, step: Undo) {
        self.undo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(step);
    }

    /// Restore every journaled row. Returns how many restores failed; each
    /// failure is logged and the rest still run.
    pub fn rollback(&self) -> usize {
        let steps = std::mem::take(&mut *self.undo.lock().unwrap_or_else(PoisonError::into_inner));
        let mut failed = 0;
        for step in steps.into_iter().rev() {
            if let Err(e) = step() {
                failed += 1;
                error!(error = %e, "could not restore a row during rollback");
            }
        }
        failed
    }
}

/// Pass-through repository that records what each write replaced.
pub struct Journaled<T: Entity> {
    inner: Arc<dyn Repository<T>>,
    journal: Journal,
}

impl<T: Entity> Journaled<T> {
    pub fn wrap(inner: &Arc<dyn Repository<T>>, journal: &Journal) -> Arc<dyn Repository<T>>
    where
        T: Send + Sync + 'static,
        T::Id: Send + Sync + 'static,
    {
        Arc::new(Self {
            inner: Arc::clone(inner),
            journal: journal.clone(),
        })
    }
}

impl<T> Repository<T> for Journaled<T>
where
    T: Entity + Send + Sync + 'static,
    T::Id: Send + Sync + 'static,
{
    fn save(&self, entity: T) -> Result<(), RepositoryError> {
        let id = entity.id().clone();
        let before = self.inner.find_by_id(&id)?;
        self.inner.save(entity)?;

        let inner = Arc::clone(&self.inner);
        self.journal.record(Box::new(move || match before {
            Some(previous) => inner.save(previous),
            None => inner.delete(&id).map(|_| ()),
        }));
        Ok(())
    }

    fn find_by_id(&self, id: &T::Id) -> Result<Option<T>, RepositoryError> {
        self.inner.find_by_id(id)
    }

    fn delete(&self, id: &T::Id) -> Result<bool, RepositoryError> {
        let before = self.inner.find_by_id(id)?;
        let removed = self.inner.delete(id)?;
        if let Some(previous) = before.filter(|_| removed) {
            let inner = Arc::clone(&self.inner);
            self.journal.record(Box::new(move || inner.save(previous)));
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<T>, RepositoryError> {
        self.inner.list()
    }
}
