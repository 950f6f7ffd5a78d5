//! In-memory view of the student collection
//!
//! Every mutation runs the same steps while holding the namespace write
//! lock:
//!
//! 1. Refresh the in-memory snapshot from the `students` slot
//! 2. Validate the email invariant against the snapshot
//! 3. Apply the change to the snapshot
//! 4. Write the whole snapshot to the `students` slot
//! 5. Publish the snapshot to other contexts
//!
//! The refresh means a context never writes back a collection that is
//! older than what another context already stored.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::student::{Student, seed_students};
use crate::sync::SyncBroadcaster;
use crate::traits::{PersistentStore, STUDENTS_KEY};

struct View {
    students: Vec<Student>,
    /// Latest namespace revision reflected in `students`
    revision: u64,
}

/// Uniqueness-checked store of student records
pub struct RecordRepository {
    store: Arc<dyn PersistentStore>,
    broadcaster: Arc<SyncBroadcaster>,
    view: RwLock<View>,
}

impl RecordRepository {
    /// Load the collection from `store`
    ///
    /// On the very first run (no `students` slot) the collection starts as
    /// the sample seed, or empty when `seed` is false, and is written back
    /// immediately so later runs never seed again.
    pub async fn load(
        store: Arc<dyn PersistentStore>,
        broadcaster: Arc<SyncBroadcaster>,
        seed: bool,
    ) -> Result<Self> {
        let lock_owner = Arc::clone(&broadcaster);
        let _writes = lock_owner.lock_writes().await;
        let revision = broadcaster.revision();

        let students = match read_collection(store.as_ref()).await? {
            Some(students) => {
                debug!("Loaded {} student(s) from storage", students.len());
                students
            }
            None => {
                let initial = if seed { seed_students() } else { Vec::new() };
                info!(
                    "No stored collection, initializing with {} student(s)",
                    initial.len()
                );
                store
                    .save(STUDENTS_KEY, serde_json::to_vec(&initial)?)
                    .await
                    .map_err(into_persistence)?;
                initial
            }
        };

        Ok(Self {
            store,
            broadcaster,
            view: RwLock::new(View { students, revision }),
        })
    }

    /// Snapshot of the full collection, in insertion order
    pub async fn all(&self) -> Vec<Student> {
        self.view.read().await.students.clone()
    }

    /// Namespace revision the local view reflects
    pub async fn revision(&self) -> u64 {
        self.view.read().await.revision
    }

    /// Exact match on both email and password
    ///
    /// Passwords are compared as plain values.
    pub async fn find_by_credentials(&self, email: &str, password: &str) -> Option<Student> {
        self.view
            .read()
            .await
            .students
            .iter()
            .find(|s| s.email == email && s.password == password)
            .cloned()
    }

    pub async fn find_by_id(&self, id: &str) -> Option<Student> {
        self.view
            .read()
            .await
            .students
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Whether any record other than `excluding` uses `email`
    pub async fn email_exists(&self, email: &str, excluding: Option<&str>) -> bool {
        email_taken(&self.view.read().await.students, email, excluding)
    }

    /// Add a record that already carries its id
    pub async fn insert(&self, student: Student) -> Result<Student> {
        self.insert_with(|_| student).await
    }

    /// Add a new record under a fresh id
    ///
    /// Ids are millisecond timestamps, bumped until unused. The id is picked
    /// under the namespace write lock against the stored collection, so two
    /// contexts never hand out the same one.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<Student> {
        self.insert_with(|students| Student::new(next_id(students), name, email, password))
            .await
    }

    /// Change exactly one record
    ///
    /// The mutator works on a copy. The id is restored afterwards and a paid
    /// fee status is never reverted, whatever the mutator did.
    pub async fn update<F>(&self, id: &str, mutator: F) -> Result<Student>
    where
        F: FnOnce(&mut Student),
    {
        let _writes = self.broadcaster.lock_writes().await;
        self.refresh().await?;

        let (updated, snapshot) = {
            let mut view = self.view.write().await;
            let students = &mut view.students;
            let index = students
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| Error::not_found(id))?;

            let mut updated = students[index].clone();
            mutator(&mut updated);
            updated.id = students[index].id.clone();
            updated.fees_paid |= students[index].fees_paid;

            if updated.email != students[index].email
                && email_taken(students, &updated.email, Some(id))
            {
                return Err(Error::duplicate_email(&updated.email));
            }

            students[index] = updated.clone();
            (updated, students.clone())
        };

        self.persist(&snapshot).await?;
        info!("Updated student {}", id);
        Ok(updated)
    }

    /// Adopt a collection published by another context
    ///
    /// Only the in-memory view changes. The publisher already wrote storage.
    /// Snapshots no newer than the local view are dropped. Returns whether
    /// the snapshot was adopted.
    pub async fn adopt(&self, students: Vec<Student>, revision: u64) -> bool {
        let mut view = self.view.write().await;
        if revision <= view.revision {
            debug!(
                "Dropping snapshot r{}, local view is at r{}",
                revision, view.revision
            );
            return false;
        }

        debug!(
            "Adopting remote snapshot r{} ({} student(s))",
            revision,
            students.len()
        );
        *view = View { students, revision };
        true
    }

    /// Re-read the collection from storage
    ///
    /// A missing slot leaves the local view as it is.
    pub async fn reload(&self) -> Result<()> {
        self.refresh().await
    }

    async fn refresh(&self) -> Result<()> {
        // Read the revision first: labelling a newer collection with an
        // older revision is harmless, the reverse would drop a later change
        let revision = self.broadcaster.revision();
        if let Some(students) = read_collection(self.store.as_ref()).await? {
            *self.view.write().await = View { students, revision };
        }
        Ok(())
    }

    async fn insert_with<F>(&self, build: F) -> Result<Student>
    where
        F: FnOnce(&[Student]) -> Student,
    {
        let _writes = self.broadcaster.lock_writes().await;
        self.refresh().await?;

        let (student, snapshot) = {
            let mut view = self.view.write().await;
            let student = build(&view.students);
            if email_taken(&view.students, &student.email, None) {
                return Err(Error::duplicate_email(&student.email));
            }
            if view.students.iter().any(|s| s.id == student.id) {
                return Err(Error::Other(format!("Student id already in use: {}", student.id)));
            }
            view.students.push(student.clone());
            (student, view.students.clone())
        };

        self.persist(&snapshot).await?;
        info!("Inserted student {} <{}>", student.id, student.email);
        Ok(student)
    }

    async fn persist(&self, snapshot: &[Student]) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.store
            .save(STUDENTS_KEY, bytes)
            .await
            .map_err(into_persistence)?;
        let revision = self.broadcaster.publish_collection_change(snapshot)?;
        self.view.write().await.revision = revision;
        Ok(())
    }
}

fn next_id(students: &[Student]) -> String {
    let mut candidate = chrono::Utc::now().timestamp_millis();
    while students.iter().any(|s| s.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

fn email_taken(students: &[Student], email: &str, excluding: Option<&str>) -> bool {
    students
        .iter()
        .any(|s| s.email == email && Some(s.id.as_str()) != excluding)
}

async fn read_collection(store: &dyn PersistentStore) -> Result<Option<Vec<Student>>> {
    match store.load(STUDENTS_KEY).await.map_err(into_persistence)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Storage failures all surface as `Persistence`, whatever the backend reported
pub(crate) fn into_persistence(err: Error) -> Error {
    match err {
        Error::Persistence(_) => err,
        other => Error::persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::sync::{Received, StorageNamespace};

    async fn repo(seed: bool) -> (RecordRepository, StorageNamespace) {
        let ns = StorageNamespace::new(Arc::new(MemoryStore::new()), 8);
        let broadcaster = Arc::new(SyncBroadcaster::new(&ns));
        let repo = RecordRepository::load(ns.store(), broadcaster, seed)
            .await
            .unwrap();
        (repo, ns)
    }

    #[tokio::test]
    async fn first_load_seeds_and_writes_through() {
        let (repo, ns) = repo(true).await;
        assert_eq!(repo.all().await.len(), 5);
        assert!(ns.store().load(STUDENTS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() {
        let (repo, _ns) = repo(true).await;
        let err = repo
            .insert(Student::new("99", "Fake Alice", "alice@student.edu", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEmail(_)));
        assert_eq!(repo.all().await.len(), 5);
    }

    #[tokio::test]
    async fn email_exists_honours_exclusion() {
        let (repo, _ns) = repo(true).await;
        assert!(repo.email_exists("bob@student.edu", None).await);
        assert!(!repo.email_exists("bob@student.edu", Some("2")).await);
        assert!(repo.email_exists("bob@student.edu", Some("1")).await);
        // Case-sensitive as stored
        assert!(!repo.email_exists("BOB@student.edu", None).await);
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let (repo, _ns) = repo(false).await;
        let err = repo.update("nope", |s| s.name = "x".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_cannot_change_id_or_unpay() {
        let (repo, _ns) = repo(true).await;
        let updated = repo
            .update("1", |s| {
                s.id = "hijacked".into();
                s.fees_paid = false;
                s.name = "Alicia".into();
            })
            .await
            .unwrap();

        assert_eq!(updated.id, "1");
        assert!(updated.fees_paid);
        assert_eq!(updated.name, "Alicia");
    }

    #[tokio::test]
    async fn update_rejects_email_collision() {
        let (repo, _ns) = repo(true).await;
        let err = repo
            .update("2", |s| s.email = "carol@student.edu".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateEmail(_)));
        assert_eq!(repo.find_by_id("2").await.unwrap().email, "bob@student.edu");
    }

    #[tokio::test]
    async fn mutations_publish_to_other_contexts() {
        let (repo, ns) = repo(false).await;
        let other = SyncBroadcaster::new(&ns);
        let mut sub = other.subscribe_collection_changes();

        repo.insert(Student::new("7", "Zoe", "zoe@x.edu", "pw"))
            .await
            .unwrap();

        match sub.try_recv() {
            Some(Received::Message(change)) => {
                assert_eq!(change.students().unwrap(), repo.all().await);
            }
            unexpected => panic!("expected a change, got {:?}", unexpected),
        }
    }

    #[tokio::test]
    async fn writers_build_on_the_stored_collection() {
        let ns = StorageNamespace::new(Arc::new(MemoryStore::new()), 8);
        let a = RecordRepository::load(ns.store(), Arc::new(SyncBroadcaster::new(&ns)), true)
            .await
            .unwrap();
        let b_broadcaster = Arc::new(SyncBroadcaster::new(&ns));
        let mut b_sub = b_broadcaster.subscribe_collection_changes();
        let b = RecordRepository::load(ns.store(), b_broadcaster, true)
            .await
            .unwrap();

        // B never applies A's change before writing
        a.update("3", |s| s.name = "Caroline".into()).await.unwrap();
        b.update("2", Student::mark_fees_paid).await.unwrap();

        let stored = read_collection(ns.store().as_ref()).await.unwrap().unwrap();
        let carol = stored.iter().find(|s| s.id == "3").unwrap();
        let bob = stored.iter().find(|s| s.id == "2").unwrap();
        assert_eq!(carol.name, "Caroline");
        assert!(bob.fees_paid);

        // A's snapshot is older than B's view now
        let change = match b_sub.try_recv() {
            Some(Received::Message(change)) => change,
            unexpected => panic!("expected a change, got {:?}", unexpected),
        };
        assert!(!b.adopt(change.students().unwrap(), change.revision).await);
        assert!(b.find_by_id("2").await.unwrap().fees_paid);
        assert_eq!(b.revision().await, 2);
    }

    #[tokio::test]
    async fn register_skips_ids_taken_in_storage() {
        let ns = StorageNamespace::new(Arc::new(MemoryStore::new()), 8);
        let a = RecordRepository::load(ns.store(), Arc::new(SyncBroadcaster::new(&ns)), false)
            .await
            .unwrap();
        let b = RecordRepository::load(ns.store(), Arc::new(SyncBroadcaster::new(&ns)), false)
            .await
            .unwrap();

        let (zoe, yan) = tokio::join!(
            a.register("Zoe", "zoe@x.edu", "pw"),
            b.register("Yan", "yan@x.edu", "pw")
        );
        let (zoe, yan) = (zoe.unwrap(), yan.unwrap());
        assert_ne!(zoe.id, yan.id);

        let stored = read_collection(ns.store().as_ref()).await.unwrap().unwrap();
        assert_eq!(stored.len(), 2);
    }
}
