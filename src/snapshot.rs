// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::SeqNo;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

/// A pinned point-in-time view of the database
///
/// Reads through a snapshot see exactly the state at creation time,
/// regardless of later writes. While a snapshot is alive, compaction
/// keeps every entry that is visible to it.
///
/// Dropping the snapshot releases the pin; [`Db::release_snapshot`](crate::Db::release_snapshot)
/// does the same explicitly.
pub struct Snapshot {
    seqno: SeqNo,
    registry: Weak<Mutex<BTreeMap<SeqNo, usize>>>,
}

impl Snapshot {
    /// The sequence number this snapshot reads at.
    #[must_use]
    pub fn seqno(&self) -> SeqNo {
        self.seqno
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Snapshot({})", self.seqno)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut registry = registry.lock().expect("lock is poisoned");

            if let Some(count) = registry.get_mut(&self.seqno) {
                *count -= 1;

                if *count == 0 {
                    registry.remove(&self.seqno);
                }
            }
        }
    }
}

/// Ordered, reference-counted registry of open snapshots
///
/// The smallest registered sequence number bounds what compaction may
/// garbage-collect.
#[derive(Clone, Default)]
pub struct SnapshotList(Arc<Mutex<BTreeMap<SeqNo, usize>>>);

impl SnapshotList {
    /// Registers a new snapshot at `seqno`.
    #[must_use]
    pub fn create(&self, seqno: SeqNo) -> Snapshot {
        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut registry = self.0.lock().expect("lock is poisoned");
            *registry.entry(seqno).or_insert(0) += 1;
        }

        Snapshot {
            seqno,
            registry: Arc::downgrade(&self.0),
        }
    }

    /// The smallest live snapshot sequence number.
    #[must_use]
    pub fn smallest(&self) -> Option<SeqNo> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let registry = self.0.lock().expect("lock is poisoned");
        registry.keys().next().copied()
    }

    /// Returns `true` if no snapshots are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let registry = self.0.lock().expect("lock is poisoned");
        registry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::SnapshotList;
    use test_log::test;

    #[test]
    fn snapshot_registry_tracks_smallest() {
        let list = SnapshotList::default();
        assert!(list.is_empty());
        assert_eq!(None, list.smallest());

        let s10 = list.create(10);
        let s5 = list.create(5);
        let s5_again = list.create(5);

        assert_eq!(Some(5), list.smallest());

        drop(s5);
        assert_eq!(Some(5), list.smallest(), "refcounted seqno still pinned");

        drop(s5_again);
        assert_eq!(Some(10), list.smallest());

        drop(s10);
        assert!(list.is_empty());
    }

    #[test]
    fn snapshot_release_out_of_order() {
        let list = SnapshotList::default();

        let s1 = list.create(1);
        let s2 = list.create(2);
        let s3 = list.create(3);

        drop(s3);
        drop(s1);

        assert_eq!(Some(2), list.smallest());
        drop(s2);
    }
}
