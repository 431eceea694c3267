use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::snapshot::{Snapshot, SlotCache, SlotSnapshot};
use crate::sync::OnceHandle;
use crate::types::{LogIndex, Slot, Term};

struct Inner {
    last_index: LogIndex,
    last_term: Term,
    slots: HashMap<Slot, SlotCache>,
}

/// Ordered log store plus per-slot snapshot cache. All mutation goes through
/// `lock()`'s guard, which serialises log append and snapshot application
/// for this manager.
pub struct PartitionedLogManager {
    inner: Mutex<Inner>,
}

/// Held while the caller performs a read-modify-write sequence that must
/// not interleave with any other append, install, or `pullSnapshot` export.
pub struct LogManagerGuard<'a> {
    inner: tokio::sync::MutexGuard<'a, Inner>,
}

impl PartitionedLogManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_index: 0,
                last_term: 0,
                slots: HashMap::new(),
            }),
        }
    }

    pub async fn lock(&self) -> LogManagerGuard<'_> {
        LogManagerGuard {
            inner: self.inner.lock().await,
        }
    }

    pub async fn last_position(&self) -> (Term, LogIndex) {
        let inner = self.inner.lock().await;
        (inner.last_term, inner.last_index)
    }
}

impl Default for PartitionedLogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> LogManagerGuard<'a> {
    pub fn last_index(&self) -> LogIndex {
        self.inner.last_index
    }

    pub fn last_term(&self) -> Term {
        self.inner.last_term
    }

    /// Sets the manager's `lastIndex`/`lastTerm` bookkeeping, enforcing a
    /// monotonic-non-decreasing invariant: a snapshot install that reports
    /// a lower index than we already hold is ignored.
    pub fn advance_to(&mut self, term: Term, index: LogIndex) {
        if index >= self.inner.last_index {
            self.inner.last_index = index;
            self.inner.last_term = term;
        }
    }

    /// Installs `snapshot` under `slot` if it is newer than whatever is
    /// already cached there: replaces only if it carries a strictly
    /// greater `lastIndex`.
    pub fn install_slot(&mut self, slot: Slot, snapshot: SlotSnapshot) {
        let should_replace = match self.inner.slots.get(&slot) {
            Some(SlotCache::Resolved(existing)) => snapshot.last_index() > existing.last_index(),
            Some(SlotCache::Remote(_)) => true,
            None => true,
        };
        if should_replace {
            self.inner.slots.insert(slot, SlotCache::Resolved(snapshot));
        }
    }

    /// Installs an unresolved placeholder for `slot`, returning the handle
    /// the pull-snapshot scheduler will later `complete()`. If a resolved
    /// snapshot or another placeholder is already present, it is replaced —
    /// callers only do this for slots freshly assigned by a membership
    /// change.
    pub fn install_remote_placeholder(&mut self, slot: Slot) -> OnceHandle<SlotSnapshot> {
        let handle = OnceHandle::new();
        self.inner
            .slots
            .insert(slot, SlotCache::Remote(handle.clone()));
        handle
    }

    pub fn slot_cache(&self, slot: Slot) -> Option<SlotCache> {
        self.inner.slots.get(&slot).cloned()
    }

    pub fn held_slots(&self) -> Vec<Slot> {
        self.inner.slots.keys().copied().collect()
    }

    /// Materialises the current state as a `PartitionedSnapshot` covering
    /// `slots`, skipping any slot not present locally (it belongs to a
    /// different header). Used by `pullSnapshot` under this same guard so
    /// the export is consistent with any in-progress append.
    pub fn take_snapshot(&self, slots: &[Slot]) -> Snapshot {
        let mut per_slot = Vec::new();
        for &slot in slots {
            if let Some(SlotCache::Resolved(snapshot)) = self.inner.slots.get(&slot) {
                per_slot.push((slot, snapshot.clone()));
            }
        }
        Snapshot::Partitioned {
            per_slot,
            last_index: self.inner.last_index,
            last_term: self.inner.last_term,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MeasurementSchema;

    fn simple(last_index: LogIndex) -> SlotSnapshot {
        SlotSnapshot::Simple {
            schemas: vec![MeasurementSchema {
                path: "root.sg.d1.s1".to_string(),
                encoding: "PLAIN".to_string(),
            }],
            operations: vec![],
            last_index,
            last_term: 1,
        }
    }

    #[tokio::test]
    async fn install_replaces_only_on_strictly_greater_index() {
        let mgr = PartitionedLogManager::new();
        {
            let mut guard = mgr.lock().await;
            guard.install_slot(1, simple(10));
            guard.install_slot(1, simple(5)); // stale, ignored
        }
        let cache = mgr.lock().await.slot_cache(1).unwrap();
        match cache {
            SlotCache::Resolved(s) => assert_eq!(s.last_index(), 10),
            SlotCache::Remote(_) => panic!("expected resolved"),
        }
    }

    #[tokio::test]
    async fn advance_to_never_decreases() {
        let mgr = PartitionedLogManager::new();
        {
            let mut guard = mgr.lock().await;
            guard.advance_to(2, 20);
            guard.advance_to(1, 5); // would decrease, ignored
        }
        assert_eq!(mgr.last_position().await, (2, 20));
    }

    #[tokio::test]
    async fn take_snapshot_skips_unheld_slots() {
        let mgr = PartitionedLogManager::new();
        {
            let mut guard = mgr.lock().await;
            guard.install_slot(1, simple(3));
            guard.install_slot(3, simple(4));
            guard.advance_to(1, 4);
        }
        let snap = mgr.lock().await.take_snapshot(&[1, 2, 3]);
        match snap {
            Snapshot::Partitioned { per_slot, .. } => {
                let slots: Vec<Slot> = per_slot.iter().map(|(s, _)| *s).collect();
                assert_eq!(slots, vec![1, 3]);
            }
            _ => panic!("expected partitioned snapshot"),
        }
    }
}
