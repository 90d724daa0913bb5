//! Registry of live transactions.
//!
//! A [`TxnHandle`] is the part of a transaction other threads may observe or
//! poke: its current timestamp, published status, cooperative abort signal,
//! and held-set. The [`TransactionDirectory`] maps ids to handles until the
//! transaction reaches `Committed` or `Failed`.
//!
//! Lookups are inherently racy: a holder may terminate between the moment a
//! resource is reported busy and the moment its handle is looked up. Callers
//! treat a missing entry as "the resource is probably free now".

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

use ordo_common::{Timestamp, TxnId, TxnStatus};
use parking_lot::{Mutex, RwLock};

/// Shared, observable state of one transaction.
pub struct TxnHandle {
    id: TxnId,
    timestamp: AtomicU64,
    status: AtomicU8,
    attempts: AtomicU32,
    abort: AtomicBool,
    held: Mutex<BTreeSet<String>>,
}

impl TxnHandle {
    /// Creates an `Active` handle with the given timestamp.
    pub fn new(id: TxnId, timestamp: Timestamp) -> Self {
        Self {
            id,
            timestamp: AtomicU64::new(timestamp.as_u64()),
            status: AtomicU8::new(TxnStatus::Active as u8),
            attempts: AtomicU32::new(0),
            abort: AtomicBool::new(false),
            held: Mutex::new(BTreeSet::new()),
        }
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current timestamp.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.timestamp.load(AtomicOrdering::Acquire))
    }

    /// Replaces the timestamp on restart.
    pub fn set_timestamp(&self, timestamp: Timestamp) {
        self.timestamp
            .store(timestamp.as_u64(), AtomicOrdering::Release);
    }

    /// Returns the last published status.
    pub fn status(&self) -> TxnStatus {
        // Only valid discriminants are ever stored.
        TxnStatus::from_u8(self.status.load(AtomicOrdering::Acquire)).unwrap_or(TxnStatus::Active)
    }

    /// Publishes a status change made by the owning transaction.
    pub fn publish_status(&self, status: TxnStatus) {
        self.status.store(status as u8, AtomicOrdering::Release);
    }

    /// Returns the number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(AtomicOrdering::Acquire)
    }

    /// Publishes the attempt counter.
    pub fn publish_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, AtomicOrdering::Release);
    }

    /// Sets the abort signal. Observed at the next check boundary.
    pub fn request_abort(&self) {
        self.abort.store(true, AtomicOrdering::SeqCst);
    }

    /// Returns true if an abort has been requested.
    pub fn abort_requested(&self) -> bool {
        self.abort.load(AtomicOrdering::SeqCst)
    }

    /// Clears the abort signal before a restart.
    pub fn clear_abort(&self) {
        self.abort.store(false, AtomicOrdering::SeqCst);
    }

    /// Records that the transaction now holds `resource`.
    pub fn hold(&self, resource: &str) {
        self.held.lock().insert(resource.to_string());
    }

    /// Returns true if `resource` is in the held-set.
    pub fn holds(&self, resource: &str) -> bool {
        self.held.lock().contains(resource)
    }

    /// Returns a copy of the held-set.
    pub fn held(&self) -> Vec<String> {
        self.held.lock().iter().cloned().collect()
    }

    /// Empties the held-set and returns what it contained.
    ///
    /// Whoever drains first (the transaction or the detector) is the one
    /// that releases those resources.
    pub fn take_held(&self) -> BTreeSet<String> {
        std::mem::take(&mut *self.held.lock())
    }
}

impl fmt::Debug for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnHandle")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp())
            .field("status", &self.status())
            .field("attempts", &self.attempts())
            .field("abort", &self.abort_requested())
            .field("held", &self.held())
            .finish()
    }
}

/// Maps live transaction ids to their handles.
#[derive(Default)]
pub struct TransactionDirectory {
    transactions: RwLock<HashMap<TxnId, Arc<TxnHandle>>>,
}

impl TransactionDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handle, replacing any previous entry with the same id.
    pub fn register(&self, handle: Arc<TxnHandle>) {
        self.transactions.write().insert(handle.id(), handle);
    }

    /// Removes a transaction. Returns its handle if it was registered.
    pub fn deregister(&self, txn: TxnId) -> Option<Arc<TxnHandle>> {
        self.transactions.write().remove(&txn)
    }

    /// Looks up a transaction.
    pub fn get(&self, txn: TxnId) -> Option<Arc<TxnHandle>> {
        self.transactions.read().get(&txn).cloned()
    }

    /// Looks up a transaction's current timestamp.
    pub fn timestamp_of(&self, txn: TxnId) -> Option<Timestamp> {
        self.transactions.read().get(&txn).map(|h| h.timestamp())
    }

    /// Returns true if the transaction is registered.
    pub fn contains(&self, txn: TxnId) -> bool {
        self.transactions.read().contains_key(&txn)
    }

    /// Returns the number of live transactions.
    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    /// Returns true if no transaction is live.
    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }

    /// Returns the ids of every live transaction.
    pub fn ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.transactions.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for TransactionDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionDirectory")
            .field("live", &self.ids())
            .finish()
    }
}
