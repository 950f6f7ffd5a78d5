//! Cross-context synchronization
//!
//! Execution contexts (tabs, windows, embedded instances) attach to one
//! [`StorageNamespace`]: a shared [`PersistentStore`] plus a change feed.
//! Whenever a context writes the `students` slot it publishes the whole new
//! collection on the feed; every *other* context replaces its local view
//! with the snapshot.
//!
//! ```text
//!   context A                     namespace                     context B
//! ┌───────────┐  save(students) ┌────────────┐
//! │ Repository│────────────────▶│   store    │
//! │           │  StorageChange  ├────────────┤  StorageChange  ┌───────────┐
//! │           │────────────────▶│ change feed│────────────────▶│ AuthService│
//! └───────────┘                 └────────────┘   (origin ≠ B)  └───────────┘
//! ```
//!
//! Writes to the collection are serialized across the namespace. Each one
//! carries a revision number, so a context can tell a snapshot older than
//! its own view apart from a newer one and drop it.
//!
//! Payment notifications never leave the publishing context.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace, warn};

use crate::config::PortalConfig;
use crate::error::Result;
use crate::student::Student;
use crate::traits::{PersistentStore, STUDENTS_KEY};

/// Identifies one execution context within a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A slot changed in durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Slot name
    pub key: String,
    /// The slot's new serialized value
    pub snapshot: String,
    /// Context that made the change
    pub origin: ContextId,
    /// Namespace-wide write sequence number
    pub revision: u64,
}

impl StorageChange {
    /// Parse the snapshot as a student collection
    pub fn students(&self) -> Result<Vec<Student>> {
        Ok(serde_json::from_str(&self.snapshot)?)
    }
}

/// Fees were paid in this context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCompleted {
    pub student_id: String,
}

/// Durable storage shared by every context attached to it
#[derive(Clone)]
pub struct StorageNamespace {
    store: Arc<dyn PersistentStore>,
    changes: broadcast::Sender<StorageChange>,
    capacity: usize,
    next_context: Arc<AtomicU64>,
    revision: Arc<AtomicU64>,
    writes: Arc<Mutex<()>>,
}

impl StorageNamespace {
    /// Wrap a store with a change feed of the given capacity
    pub fn new(store: Arc<dyn PersistentStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (changes, _) = broadcast::channel(capacity);
        Self {
            store,
            changes,
            capacity,
            next_context: Arc::new(AtomicU64::new(1)),
            revision: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Open the store described by `config` and wrap it
    pub async fn open(config: &PortalConfig) -> Result<Self> {
        config.validate()?;
        let store = config.storage.open().await?;
        Ok(Self::new(store, config.sync.channel_capacity))
    }

    /// The underlying store
    pub fn store(&self) -> Arc<dyn PersistentStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn next_context_id(&self) -> ContextId {
        ContextId(self.next_context.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for StorageNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageNamespace")
            .field("capacity", &self.capacity)
            .field("receivers", &self.changes.receiver_count())
            .field("revision", &self.revision.load(Ordering::SeqCst))
            .finish()
    }
}

/// Outcome of reading from a [`Subscription`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<T> {
    Message(T),
    /// The subscriber fell behind and this many messages were lost
    Lagged(u64),
}

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Registration on a broadcast channel
///
/// Messages are delivered until the subscription is dropped or
/// [`unsubscribe`](Subscription::unsubscribe)d.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    filter: Filter<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    fn new(rx: broadcast::Receiver<T>, filter: Filter<T>) -> Self {
        Self { rx, filter }
    }

    /// Wait for the next message
    ///
    /// Returns `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<Received<T>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if (self.filter)(&msg) => return Some(Received::Message(msg)),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => return Some(Received::Lagged(n)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next queued message without waiting
    pub fn try_recv(&mut self) -> Option<Received<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if (self.filter)(&msg) => return Some(Received::Message(msg)),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(n)) => return Some(Received::Lagged(n)),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a stream of messages. Lag is logged and skipped.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static {
        let filter = self.filter;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(msg) if filter(&msg) => Some(msg),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!("Subscriber lagged, {} message(s) dropped", n);
                None
            }
        })
    }

    /// Stop receiving messages
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Runs a callback for each message until dropped
///
/// Dropping the guard deregisters the observer.
#[must_use = "the observer stops as soon as the guard is dropped"]
pub struct ObserverGuard {
    task: JoinHandle<()>,
}

impl ObserverGuard {
    /// Deregister the observer
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Per-context publisher for collection changes and payment notifications
pub struct SyncBroadcaster {
    context: ContextId,
    changes: broadcast::Sender<StorageChange>,
    payments: broadcast::Sender<PaymentCompleted>,
    revision: Arc<AtomicU64>,
    writes: Arc<Mutex<()>>,
}

impl SyncBroadcaster {
    /// Create the broadcaster for a new context in `namespace`
    pub fn new(namespace: &StorageNamespace) -> Self {
        let (payments, _) = broadcast::channel(namespace.capacity);
        Self {
            context: namespace.next_context_id(),
            changes: namespace.changes.clone(),
            payments,
            revision: Arc::clone(&namespace.revision),
            writes: Arc::clone(&namespace.writes),
        }
    }

    /// The context this broadcaster publishes for
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Latest revision published by any context in the namespace
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Exclusive right to write the `students` slot, namespace-wide
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    /// Tell every other context the collection now equals `snapshot`
    ///
    /// Returns the revision assigned to the change.
    pub fn publish_collection_change(&self, snapshot: &[Student]) -> Result<u64> {
        let snapshot = serde_json::to_string(snapshot)?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let change = StorageChange {
            key: STUDENTS_KEY.to_string(),
            snapshot,
            origin: self.context,
            revision,
        };

        match self.changes.send(change) {
            Ok(receivers) => trace!(
                "{} published revision {} to {} receiver(s)",
                self.context,
                revision,
                receivers
            ),
            Err(_) => trace!(
                "{} published revision {} with no receivers",
                self.context,
                revision
            ),
        }
        Ok(revision)
    }

    /// Same-context notification that `student_id` just paid
    pub fn publish_payment_completed(&self, student_id: &str) {
        let event = PaymentCompleted {
            student_id: student_id.to_string(),
        };
        if self.payments.send(event).is_err() {
            debug!("No payment observers for {}", student_id);
        }
    }

    /// Collection changes made by other contexts
    pub fn subscribe_collection_changes(&self) -> Subscription<StorageChange> {
        let own = self.context;
        Subscription::new(
            self.changes.subscribe(),
            Arc::new(move |change: &StorageChange| {
                change.origin != own && change.key == STUDENTS_KEY
            }),
        )
    }

    /// Payment notifications from this context
    pub fn subscribe_payments(&self) -> Subscription<PaymentCompleted> {
        Subscription::new(self.payments.subscribe(), Arc::new(|_| true))
    }

    /// Call `callback` for every payment notification until the guard is dropped
    ///
    /// Must be called from within a tokio runtime.
    pub fn observe_payments<F>(&self, mut callback: F) -> ObserverGuard
    where
        F: FnMut(PaymentCompleted) + Send + 'static,
    {
        let mut stream = Box::pin(self.subscribe_payments().into_stream());
        let task = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                callback(event);
            }
        });
        ObserverGuard { task }
    }
}
