//! The currently authenticated student for one context
//!
//! The session keeps a denormalized copy of the student's record and
//! persists it in the `currentUser` slot, so a restarted context comes back
//! logged in.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::repository::into_persistence;
use crate::student::Student;
use crate::traits::{CURRENT_USER_KEY, PersistentStore};

pub struct SessionService {
    store: Arc<dyn PersistentStore>,
    current: RwLock<Option<Student>>,
}

impl SessionService {
    /// Restore the session persisted in `store`, if any
    ///
    /// An unreadable session record is discarded and the context starts
    /// logged out.
    pub async fn load(store: Arc<dyn PersistentStore>) -> Result<Self> {
        let current = match store.load(CURRENT_USER_KEY).await.map_err(into_persistence)? {
            Some(bytes) => match serde_json::from_slice::<Student>(&bytes) {
                Ok(student) => {
                    debug!("Restored session for {}", student.id);
                    Some(student)
                }
                Err(e) => {
                    warn!("Discarding unreadable session record: {}", e);
                    store.remove(CURRENT_USER_KEY).await.map_err(into_persistence)?;
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    pub async fn current(&self) -> Option<Student> {
        self.current.read().await.clone()
    }

    pub async fn current_id(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|s| s.id.clone())
    }

    /// Make `student` the authenticated student
    ///
    /// The session only changes once the record is stored.
    pub async fn establish(&self, student: Student) -> Result<()> {
        let bytes = serde_json::to_vec(&student)?;
        self.store
            .save(CURRENT_USER_KEY, bytes)
            .await
            .map_err(into_persistence)?;
        *self.current.write().await = Some(student);
        Ok(())
    }

    /// Log out
    pub async fn clear(&self) -> Result<()> {
        self.store
            .remove(CURRENT_USER_KEY)
            .await
            .map_err(into_persistence)?;
        *self.current.write().await = None;
        Ok(())
    }

    /// Refresh the cached record from `students`
    ///
    /// If the session's id is missing from `students` the session is left
    /// untouched. Returns whether the cached copy changed.
    pub async fn reconcile(&self, students: &[Student]) -> Result<bool> {
        let Some(current) = self.current().await else {
            return Ok(false);
        };

        match students.iter().find(|s| s.id == current.id) {
            Some(fresh) if *fresh != current => {
                debug!("Session record {} changed, refreshing", current.id);
                self.establish(fresh.clone()).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                warn!("Session id {} is not in the collection, keeping session", current.id);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn establish_persists_and_restores() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let session = SessionService::load(Arc::clone(&store)).await.unwrap();
        assert!(session.current().await.is_none());

        let zoe = Student::new("7", "Zoe", "zoe@x.edu", "pw");
        session.establish(zoe.clone()).await.unwrap();

        let restored = SessionService::load(Arc::clone(&store)).await.unwrap();
        assert_eq!(restored.current().await, Some(zoe));

        restored.clear().await.unwrap();
        assert!(store.load(CURRENT_USER_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_refreshes_or_keeps() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let session = SessionService::load(store).await.unwrap();
        let zoe = Student::new("7", "Zoe", "zoe@x.edu", "pw");

        // Nothing to do while logged out
        assert!(!session.reconcile(&[zoe.clone()]).await.unwrap());

        session.establish(zoe.clone()).await.unwrap();
        let renamed = Student {
            name: "Zoe Q".into(),
            ..zoe.clone()
        };
        assert!(session.reconcile(&[renamed.clone()]).await.unwrap());
        assert_eq!(session.current().await, Some(renamed.clone()));

        // Id vanished: pointer stays as it is
        assert!(!session.reconcile(&[]).await.unwrap());
        assert_eq!(session.current().await, Some(renamed));
    }

    #[tokio::test]
    async fn unreadable_session_is_discarded() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        store
            .save(CURRENT_USER_KEY, b"{\"id\":1}".to_vec())
            .await
            .unwrap();

        let session = SessionService::load(Arc::clone(&store)).await.unwrap();
        assert!(session.current().await.is_none());
        assert!(store.load(CURRENT_USER_KEY).await.unwrap().is_none());
    }
}
