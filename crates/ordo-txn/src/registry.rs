//! Resource lock registry.
//!
//! Each named resource carries its own exclusive lock (fine-grained, one per
//! resource) guarding the current holder and payload. Every lock acquisition
//! in this module is bounded: contention is resolved by the wait-die protocol
//! one layer up, never by blocking here.
//!
//! # Holder hint
//!
//! When a resource's lock cannot be taken within the timeout, the registry
//! still reports who holds the resource, read from an atomic mirror of the
//! holder field. The value is only a hint for the wait-die decision and is
//! re-validated by the next acquisition attempt.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use ordo_common::{OrdoError, OrdoResult, TxnId};
use parking_lot::{Mutex, MutexGuard};

/// Result of a bounded acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    /// The resource was free and is now held by the caller.
    Acquired,
    /// The caller already held the resource.
    AlreadyHeld,
    /// The resource is held by someone else, or its lock could not be taken
    /// in time. `holder` is `None` when the holder could not be determined.
    Busy {
        /// The reported holder.
        holder: Option<TxnId>,
    },
}

impl LockResult {
    /// Returns true if the caller holds the resource.
    pub fn is_success(&self) -> bool {
        matches!(self, LockResult::Acquired | LockResult::AlreadyHeld)
    }
}

/// Point-in-time view of a resource, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot<V> {
    /// Resource name.
    pub name: String,
    /// Current holder, if any.
    pub holder: Option<TxnId>,
    /// Current payload.
    pub value: V,
}

/// State guarded by a resource's lock.
struct Slot<V> {
    holder: Option<TxnId>,
    value: V,
}

/// A named resource.
struct Resource<V> {
    slot: Mutex<Slot<V>>,
    /// Mirror of `slot.holder` readable without the lock; 0 means free.
    holder_hint: AtomicU64,
}

impl<V> Resource<V> {
    fn new(value: V) -> Self {
        Self {
            slot: Mutex::new(Slot {
                holder: None,
                value,
            }),
            holder_hint: AtomicU64::new(TxnId::INVALID.as_u64()),
        }
    }

    fn hint(&self) -> Option<TxnId> {
        let raw = TxnId::new(self.holder_hint.load(AtomicOrdering::Acquire));
        raw.is_valid().then_some(raw)
    }

    fn set_holder(&self, slot: &mut Slot<V>, holder: Option<TxnId>) {
        slot.holder = holder;
        self.holder_hint.store(
            holder.unwrap_or(TxnId::INVALID).as_u64(),
            AtomicOrdering::Release,
        );
    }
}

/// Statistics about the registry.
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Successful acquisitions.
    pub acquisitions: AtomicU64,
    /// Releases.
    pub releases: AtomicU64,
    /// Attempts that found the resource held by another transaction.
    pub contentions: AtomicU64,
    /// Attempts whose lock could not be taken within the timeout.
    pub lock_timeouts: AtomicU64,
}

impl RegistryStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Owns the named resources of a context.
///
/// The set of resources is fixed at construction; only holders and values
/// change afterwards.
pub struct ResourceRegistry<V = i64> {
    resources: BTreeMap<String, Resource<V>>,
    stats: RegistryStats,
}

impl<V: Clone> ResourceRegistry<V> {
    /// Creates a registry from `(name, initial value)` pairs.
    pub fn new(resources: impl IntoIterator<Item = (String, V)>) -> Self {
        Self {
            resources: resources
                .into_iter()
                .map(|(name, value)| (name, Resource::new(value)))
                .collect(),
            stats: RegistryStats::new(),
        }
    }

    fn resource(&self, name: &str) -> OrdoResult<&Resource<V>> {
        self.resources
            .get(name)
            .ok_or_else(|| OrdoError::unknown_resource(name))
    }

    /// Tries to make `txn` the holder of `name`, waiting at most `timeout`
    /// for the resource's lock. Never blocks longer than that.
    pub fn try_acquire(
        &self,
        txn: TxnId,
        name: &str,
        timeout: Duration,
    ) -> OrdoResult<LockResult> {
        let resource = self.resource(name)?;

        let Some(mut slot) = resource.slot.try_lock_for(timeout) else {
            RegistryStats::record(&self.stats.lock_timeouts);
            return Ok(LockResult::Busy {
                holder: resource.hint(),
            });
        };

        match slot.holder {
            None => {
                resource.set_holder(&mut slot, Some(txn));
                RegistryStats::record(&self.stats.acquisitions);
                Ok(LockResult::Acquired)
            }
            Some(holder) if holder == txn => Ok(LockResult::AlreadyHeld),
            Some(holder) => {
                RegistryStats::record(&self.stats.contentions);
                Ok(LockResult::Busy {
                    holder: Some(holder),
                })
            }
        }
    }

    /// Releases `name` if `txn` holds it. Returns whether it was held.
    pub fn release(&self, txn: TxnId, name: &str) -> OrdoResult<bool> {
        let resource = self.resource(name)?;
        let mut slot = resource.slot.lock();

        if slot.holder == Some(txn) {
            resource.set_holder(&mut slot, None);
            RegistryStats::record(&self.stats.releases);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Reads the payload of `name`. The caller is expected to hold it.
    pub fn read(&self, name: &str) -> OrdoResult<V> {
        Ok(self.resource(name)?.slot.lock().value.clone())
    }

    /// Overwrites the payload of `name`. The caller is expected to hold it.
    pub fn write(&self, name: &str, value: V) -> OrdoResult<()> {
        self.resource(name)?.slot.lock().value = value;
        Ok(())
    }

    /// Applies a batch of writes atomically on behalf of `txn`.
    ///
    /// Locks every target in name order (each with the bounded `timeout`),
    /// verifies `txn` still holds all of them, then writes. If any resource
    /// was released in the meantime nothing is written and
    /// [`OrdoError::LockLost`] is returned.
    pub fn apply_writes(
        &self,
        txn: TxnId,
        writes: BTreeMap<String, V>,
        timeout: Duration,
    ) -> OrdoResult<()> {
        let mut guards: Vec<(MutexGuard<'_, Slot<V>>, V)> = Vec::with_capacity(writes.len());

        for (name, value) in writes {
            let resource = self.resource(&name)?;
            let Some(slot) = resource.slot.try_lock_for(timeout) else {
                RegistryStats::record(&self.stats.lock_timeouts);
                return Err(OrdoError::LockLost { resource: name });
            };
            if slot.holder != Some(txn) {
                return Err(OrdoError::LockLost { resource: name });
            }
            guards.push((slot, value));
        }

        for (mut slot, value) in guards {
            slot.value = value;
        }
        Ok(())
    }

    /// Returns the current holder of `name`.
    pub fn holder(&self, name: &str) -> OrdoResult<Option<TxnId>> {
        Ok(self.resource(name)?.slot.lock().holder)
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Returns the resource names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Returns the number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if there are no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Captures every resource's holder and value.
    pub fn snapshot(&self) -> Vec<ResourceSnapshot<V>> {
        self.resources
            .iter()
            .map(|(name, resource)| {
                let slot = resource.slot.lock();
                ResourceSnapshot {
                    name: name.clone(),
                    holder: slot.holder,
                    value: slot.value.clone(),
                }
            })
            .collect()
    }

    /// Returns statistics about the registry.
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

impl<V> fmt::Debug for ResourceRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn registry() -> ResourceRegistry<i64> {
        ResourceRegistry::new([("X".to_string(), 1), ("Y".to_string(), 2)])
    }

    #[test]
    fn test_acquire_and_release() {
        let reg = registry();
        let t1 = TxnId::new(1);

        assert_eq!(reg.try_acquire(t1, "X", TIMEOUT).unwrap(), LockResult::Acquired);
        assert_eq!(reg.holder("X").unwrap(), Some(t1));

        // Same lock again
        assert_eq!(
            reg.try_acquire(t1, "X", TIMEOUT).unwrap(),
            LockResult::AlreadyHeld
        );

        assert!(reg.release(t1, "X").unwrap());
        assert_eq!(reg.holder("X").unwrap(), None);
        assert!(!reg.release(t1, "X").unwrap());
    }

    #[test]
    fn test_busy_reports_holder() {
        let reg = registry();
        let t1 = TxnId::new(1);
        let t2 = TxnId::new(2);

        reg.try_acquire(t1, "X", TIMEOUT).unwrap();
        let result = reg.try_acquire(t2, "X", TIMEOUT).unwrap();
        assert_eq!(result, LockResult::Busy { holder: Some(t1) });
        assert!(!result.is_success());

        // A non-holder cannot release
        assert!(!reg.release(t2, "X").unwrap());
        assert_eq!(reg.holder("X").unwrap(), Some(t1));
    }

    #[test]
    fn test_unknown_resource() {
        let reg = registry();
        let err = reg.try_acquire(TxnId::new(1), "Z", TIMEOUT).unwrap_err();
        assert!(matches!(err, OrdoError::ResourceUnknown { .. }));
        assert!(reg.read("Z").is_err());
        assert!(reg.release(TxnId::new(1), "Z").is_err());
    }

    #[test]
    fn test_read_write() {
        let reg = registry();
        assert_eq!(reg.read("Y").unwrap(), 2);
        reg.write("Y", 42).unwrap();
        assert_eq!(reg.read("Y").unwrap(), 42);
    }

    #[test]
    fn test_apply_writes_requires_every_hold() {
        let reg = registry();
        let t1 = TxnId::new(1);
        reg.try_acquire(t1, "X", TIMEOUT).unwrap();

        let writes: BTreeMap<_, _> = [("X".to_string(), 10), ("Y".to_string(), 20)].into();
        let err = reg.apply_writes(t1, writes.clone(), TIMEOUT).unwrap_err();
        assert!(matches!(err, OrdoError::LockLost { ref resource } if resource == "Y"));
        // Nothing was written
        assert_eq!(reg.read("X").unwrap(), 1);

        reg.try_acquire(t1, "Y", TIMEOUT).unwrap();
        reg.apply_writes(t1, writes, TIMEOUT).unwrap();
        assert_eq!(reg.read("X").unwrap(), 10);
        assert_eq!(reg.read("Y").unwrap(), 20);
    }

    #[test]
    fn test_snapshot() {
        let reg = registry();
        reg.try_acquire(TxnId::new(3), "Y", TIMEOUT).unwrap();

        let snapshot = reg.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "X");
        assert_eq!(snapshot[0].holder, None);
        assert_eq!(snapshot[1].holder, Some(TxnId::new(3)));
        assert_eq!(snapshot[1].value, 2);
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["X", "Y"]);
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let reg = Arc::new(ResourceRegistry::new([("X".to_string(), 0_i64)]));
        let mut handles = vec![];

        for i in 1..=8 {
            let reg = Arc::clone(&reg);
            handles.push(thread::spawn(move || {
                let me = TxnId::new(i);
                let mut wins: i64 = 0;
                for _ in 0..200 {
                    let result = reg.try_acquire(me, "X", Duration::from_millis(1)).unwrap();
                    if result == LockResult::Acquired {
                        assert_eq!(reg.holder("X").unwrap(), Some(me));
                        let v = reg.read("X").unwrap();
                        reg.write("X", v + 1).unwrap();
                        assert!(reg.release(me, "X").unwrap());
                        wins += 1;
                    }
                }
                wins
            }));
        }

        let total: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Increments are only lost if two threads held X at once
        assert_eq!(reg.read("X").unwrap(), total);
        assert_eq!(reg.stats().acquisitions.load(AtomicOrdering::Relaxed), total as u64);
    }

    #[test]
    fn test_stats() {
        let reg = registry();
        let t1 = TxnId::new(1);

        reg.try_acquire(t1, "X", TIMEOUT).unwrap();
        reg.try_acquire(TxnId::new(2), "X", TIMEOUT).unwrap();
        reg.release(t1, "X").unwrap();

        assert_eq!(reg.stats().acquisitions.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(reg.stats().contentions.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(reg.stats().releases.load(AtomicOrdering::Relaxed), 1);
    }
}
