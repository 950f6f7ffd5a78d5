//! Public operation surface of the fee portal
//!
//! One [`AuthService`] per execution context. It owns the context's
//! [`RecordRepository`], [`SessionService`] and [`SyncBroadcaster`], and
//! keeps them consistent with changes arriving from other contexts.
//!
//! ## Lifecycle
//!
//! 1. Open a [`StorageNamespace`] (shared by all contexts)
//! 2. [`AuthService::attach`] once per context
//! 3. Call operations. Each one first applies whatever remote changes are
//!    already queued, unless [`AuthService::run_sync`] is running on a task
//!    and doing that itself
//! 4. [`AuthService::close`] to flush and deregister
//!
//! ## Results
//!
//! Operations report domain failures (duplicate email, bad credentials, no
//! session) as `Ok(false)`. Storage failures come back as
//! `Err(Error::Persistence)`. The `*_checked` variants return the typed
//! error instead of `false`.
//!
//! ## Payment race
//!
//! [`AuthService::pay_fees`] suspends *before* it writes. A login, logout or
//! signup during that window changes which record the payment lands on.
//! This is kept as-is and logged at `warn`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{Error, Result};
use crate::repository::RecordRepository;
use crate::session::SessionService;
use crate::student::{ProfileUpdate, Student};
use crate::sync::{
    ContextId, ObserverGuard, PaymentCompleted, Received, StorageChange, StorageNamespace,
    Subscription, SyncBroadcaster,
};
use crate::traits::{PersistentStore, STUDENTS_KEY};

pub struct AuthService {
    repository: RecordRepository,
    session: SessionService,
    broadcaster: Arc<SyncBroadcaster>,
    store: Arc<dyn PersistentStore>,
    remote: Mutex<Subscription<StorageChange>>,
    payment_delay: Duration,
}

impl AuthService {
    /// Attach a new execution context to `namespace`
    ///
    /// Loads (or seeds) the collection, restores any persisted session and
    /// refreshes it against the collection.
    pub async fn attach(namespace: &StorageNamespace, config: &PortalConfig) -> Result<Self> {
        config.validate()?;

        let broadcaster = Arc::new(SyncBroadcaster::new(namespace));
        // Subscribe before loading so no change between the two is missed
        let remote = broadcaster.subscribe_collection_changes();

        let store = namespace.store();
        let repository = RecordRepository::load(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            config.seed_on_first_run,
        )
        .await?;
        let session = SessionService::load(Arc::clone(&store)).await?;
        session.reconcile(&repository.all().await).await?;

        info!(
            "Context {} attached ({} student(s), session: {})",
            broadcaster.context(),
            repository.all().await.len(),
            session.current_id().await.as_deref().unwrap_or("none")
        );

        Ok(Self {
            repository,
            session,
            broadcaster,
            store,
            remote: Mutex::new(remote),
            payment_delay: config.payment.processing_delay(),
        })
    }

    pub fn context_id(&self) -> ContextId {
        self.broadcaster.context()
    }

    /// The authenticated student, if any
    pub async fn current_user(&self) -> Option<Student> {
        self.catch_up_or_warn().await;
        self.session.current().await
    }

    /// Full collection snapshot
    pub async fn list_all(&self) -> Vec<Student> {
        self.catch_up_or_warn().await;
        self.repository.all().await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<bool> {
        report("login", self.login_checked(email, password).await)
    }

    /// Authenticate by plain email/password equality
    pub async fn login_checked(&self, email: &str, password: &str) -> Result<Student> {
        self.catch_up().await?;
        let student = self
            .repository
            .find_by_credentials(email, password)
            .await
            .ok_or_else(|| Error::InvalidCredentials(email.to_string()))?;

        self.session.establish(student.clone()).await?;
        info!("{} logged in as {}", self.context_id(), student.id);
        Ok(student)
    }

    pub async fn logout(&self) -> Result<()> {
        self.catch_up().await?;
        self.session.clear().await?;
        info!("{} logged out", self.context_id());
        Ok(())
    }

    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<bool> {
        report("signup", self.signup_checked(name, email, password).await)
    }

    /// Register a new student and log them in
    pub async fn signup_checked(&self, name: &str, email: &str, password: &str) -> Result<Student> {
        self.catch_up().await?;
        let student = self.repository.register(name, email, password).await?;

        self.session.establish(student.clone()).await?;
        Ok(student)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<bool> {
        report("update_profile", self.update_profile_checked(update).await)
    }

    /// Change the authenticated student's name and/or email
    pub async fn update_profile_checked(&self, update: ProfileUpdate) -> Result<Student> {
        self.catch_up().await?;
        let id = self.session.current_id().await.ok_or(Error::NoSession)?;

        let updated = self.repository.update(&id, |s| s.apply(&update)).await?;
        self.session.establish(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn pay_fees(&self) -> Result<bool> {
        report("pay_fees", self.pay_fees_checked().await)
    }

    /// Simulated payment: wait, then mark the session's record as paid
    ///
    /// Always succeeds once a session exists. Paying twice is harmless.
    pub async fn pay_fees_checked(&self) -> Result<Student> {
        self.catch_up().await?;
        let initiator = self.session.current_id().await.ok_or(Error::NoSession)?;

        debug!("Processing payment for {} ({:?})", initiator, self.payment_delay);
        tokio::time::sleep(self.payment_delay).await;
        self.catch_up().await?;

        let target = match self.session.current_id().await {
            Some(target) => target,
            None => {
                warn!("Session for {} ended during payment processing, nothing written", initiator);
                return Err(Error::NoSession);
            }
        };
        if target != initiator {
            warn!(
                "Session changed during payment processing: started by {}, recording for {}",
                initiator, target
            );
        }

        let updated = self
            .repository
            .update(&target, Student::mark_fees_paid)
            .await?;
        self.session.establish(updated.clone()).await?;
        self.broadcaster.publish_payment_completed(&target);

        info!("Fees paid for {}", target);
        Ok(updated)
    }

    /// Same-context payment notifications
    pub fn subscribe_payments(&self) -> Subscription<PaymentCompleted> {
        self.broadcaster.subscribe_payments()
    }

    /// Run `callback` for each payment in this context until the guard drops
    pub fn observe_payments<F>(&self, callback: F) -> ObserverGuard
    where
        F: FnMut(PaymentCompleted) + Send + 'static,
    {
        self.broadcaster.observe_payments(callback)
    }

    /// Apply every change other contexts have published so far
    ///
    /// Does not wait for new changes. Returns how many were applied.
    pub async fn process_remote_changes(&self) -> Result<usize> {
        let mut remote = self.remote.lock().await;
        self.drain(&mut remote).await
    }

    async fn drain(&self, remote: &mut Subscription<StorageChange>) -> Result<usize> {
        let mut applied = 0;
        while let Some(received) = remote.try_recv() {
            match received {
                Received::Message(change) => {
                    if self.apply_remote_change(&change).await? {
                        applied += 1;
                    }
                }
                Received::Lagged(missed) => self.resync(missed).await?,
            }
        }

        Ok(applied)
    }

    /// Apply remote changes as they arrive until `shutdown` fires
    ///
    /// Holds the remote subscription for its whole run, so
    /// [`process_remote_changes`](Self::process_remote_changes) waits until
    /// this returns.
    pub async fn run_sync(&self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut remote = self.remote.lock().await;
        info!("{} listening for remote changes", self.context_id());

        loop {
            tokio::select! {
                received = remote.recv() => match received {
                    Some(Received::Message(change)) => {
                        self.apply_remote_change(&change).await?;
                    }
                    Some(Received::Lagged(missed)) => self.resync(missed).await?,
                    None => {
                        debug!("Change feed closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("{} stopped listening for remote changes", self.context_id());
                    break;
                }
            }
        }

        Ok(())
    }

    /// Replace the local collection with a remote snapshot and refresh the session
    ///
    /// Returns `false` if the change was not a readable collection snapshot
    /// or is older than the local view.
    pub async fn apply_remote_change(&self, change: &StorageChange) -> Result<bool> {
        if change.key != STUDENTS_KEY {
            return Ok(false);
        }

        let students = match change.students() {
            Ok(students) => students,
            Err(e) => {
                warn!("Ignoring unreadable snapshot from {}: {}", change.origin, e);
                return Ok(false);
            }
        };

        debug!(
            "{} received r{} from {}",
            self.context_id(),
            change.revision,
            change.origin
        );
        if !self.repository.adopt(students, change.revision).await {
            return Ok(false);
        }
        self.session.reconcile(&self.repository.all().await).await?;
        Ok(true)
    }

    /// Flush storage and stop receiving remote changes
    pub async fn close(self) -> Result<()> {
        self.store.flush().await?;
        info!("{} closed", self.context_id());
        Ok(())
    }

    async fn resync(&self, missed: u64) -> Result<()> {
        warn!(
            "{} missed {} remote change(s), reloading from storage",
            self.context_id(),
            missed
        );
        self.repository.reload().await?;
        self.session.reconcile(&self.repository.all().await).await?;
        Ok(())
    }

    /// Apply queued remote changes unless `run_sync` owns the feed
    async fn catch_up(&self) -> Result<()> {
        if let Ok(mut remote) = self.remote.try_lock() {
            self.drain(&mut remote).await?;
        }
        Ok(())
    }

    async fn catch_up_or_warn(&self) {
        if let Err(e) = self.catch_up().await {
            warn!("{} could not apply remote changes: {}", self.context_id(), e);
        }
    }
}

/// Fold domain failures into `false`, keep real errors
fn report(operation: &str, result: Result<Student>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(e) if e.is_domain() => {
            warn!("{} rejected: {}", operation, e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
