// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::key::InternalKey;
use crate::value::{InternalValue, SeqNo, UserValue};
use crate::ValueType;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// The memtable serves as an intermediary, ephemeral, sorted storage for new items
///
/// When the memtable exceeds the write buffer size, it is sealed
/// (turned immutable) and flushed to a level-0 table.
pub struct Memtable {
    /// The actual content, stored in a lock-free skiplist.
    #[doc(hidden)]
    pub items: SkipMap<InternalKey, UserValue>,

    /// Approximate active memtable size.
    ///
    /// If this grows too large, a flush is triggered.
    pub(crate) approximate_size: AtomicU64,

    /// Highest encountered sequence number.
    pub(crate) highest_seqno: AtomicU64,
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new()
    }
}

impl Memtable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: SkipMap::new(),
            approximate_size: AtomicU64::default(),
            highest_seqno: AtomicU64::default(),
        }
    }

    /// Creates an iterator over all items.
    pub fn iter(&self) -> impl Iterator<Item = InternalValue> + '_ {
        self.items.iter().map(|entry| InternalValue {
            key: entry.key().clone(),
            value: entry.value().clone(),
        })
    }

    /// Returns the item by key if it exists.
    ///
    /// The newest entry with `seqno <= read_seqno` is returned.
    /// A returned tombstone means the key was deleted at that point in time.
    #[doc(hidden)]
    pub fn get(&self, key: &[u8], read_seqno: SeqNo) -> Option<InternalValue> {
        // NOTE: Internal keys are multi-sorted by user_key asc and seqno desc.
        // We seek to the first entry of `key` that is visible at `read_seqno`
        // (everything with a higher seqno sorts before it), and check whether
        // it still belongs to `key`.
        let lower_bound = InternalKey::new(key, read_seqno, ValueType::Value);

        let mut iter = self
            .items
            .range(lower_bound..)
            .take_while(|entry| &*entry.key().user_key == key);

        iter.next().map(|entry| InternalValue {
            key: entry.key().clone(),
            value: entry.value().clone(),
        })
    }

    /// Gets approximate size of memtable in bytes.
    pub fn size(&self) -> u64 {
        self.approximate_size
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Counts the number of items in the memtable.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts an item into the memtable
    #[doc(hidden)]
    pub fn insert(&self, item: InternalValue) -> u64 {
        #[expect(
            clippy::expect_used,
            reason = "keys are limited to 16-bit length + values are limited to 32-bit length"
        )]
        let item_size =
            (item.key.user_key.len() + item.value.len() + std::mem::size_of::<InternalValue>())
                .try_into()
                .expect("should fit into u64");

        let size_before = self
            .approximate_size
            .fetch_add(item_size, std::sync::atomic::Ordering::AcqRel);

        self.highest_seqno
            .fetch_max(item.key.seqno, std::sync::atomic::Ordering::AcqRel);

        self.items.insert(item.key, item.value);

        size_before + item_size
    }

    /// Returns the highest sequence number in the memtable.
    pub fn highest_seqno(&self) -> Option<SeqNo> {
        if self.is_empty() {
            None
        } else {
            Some(
                self.highest_seqno
                    .load(std::sync::atomic::Ordering::Acquire),
            )
        }
    }
}

/// An owning cursor over a pinned memtable
///
/// Unlike [`Memtable::iter`], this iterator holds onto the memtable
/// itself, so it can outlive the engine lock that handed out the
/// memtable pointer. Because entries are never removed from a memtable,
/// stepping by re-seeking behind the last yielded key is stable.
pub struct MemtableCursor {
    memtable: Arc<Memtable>,
    cursor: Option<InternalKey>,
    started: bool,
}

impl MemtableCursor {
    #[must_use]
    pub fn new(memtable: Arc<Memtable>, lower_bound: Option<InternalKey>) -> Self {
        Self {
            memtable,
            cursor: lower_bound,
            started: false,
        }
    }
}

impl Iterator for MemtableCursor {
    type Item = InternalValue;

    fn next(&mut self) -> Option<Self::Item> {
        let range = match (&self.cursor, self.started) {
            (Some(key), false) => (Included(key.clone()), Unbounded),
            (Some(key), true) => (Excluded(key.clone()), Unbounded),
            (None, _) => (Unbounded, Unbounded),
        };
        self.started = true;

        let entry = self.memtable.items.range(range).next()?;
        let item = InternalValue {
            key: entry.key().clone(),
            value: entry.value().clone(),
        };

        self.cursor = Some(item.key.clone());

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MAX_SEQNO;
    use crate::ValueType;
    use test_log::test;

    #[test]
    #[expect(clippy::unwrap_used)]
    fn memtable_mvcc_point_read() {
        let memtable = Memtable::new();

        memtable.insert(InternalValue::from_components(
            *b"hello-key-999991",
            *b"hello-value-999991",
            1,
            ValueType::Value,
        ));

        let item = memtable.get(b"hello-key-99999", MAX_SEQNO);
        assert_eq!(None, item);

        let item = memtable.get(b"hello-key-999991", MAX_SEQNO);
        assert_eq!(*b"hello-value-999991", &*item.unwrap().value);

        memtable.insert(InternalValue::from_components(
            *b"hello-key-999991",
            *b"hello-value-999991-2",
            2,
            ValueType::Value,
        ));

        let item = memtable.get(b"hello-key-999991", MAX_SEQNO);
        assert_eq!((*b"hello-value-999991-2"), &*item.unwrap().value);

        let item = memtable.get(b"hello-key-999991", 1);
        assert_eq!((*b"hello-value-999991"), &*item.unwrap().value);

        let item = memtable.get(b"hello-key-999991", 2);
        assert_eq!((*b"hello-value-999991-2"), &*item.unwrap().value);
    }

    #[test]
    fn memtable_get_old_version() {
        let memtable = Memtable::new();

        memtable.insert(InternalValue::from_components(
            b"abc".to_vec(),
            b"v1".to_vec(),
            1,
            ValueType::Value,
        ));
        memtable.insert(InternalValue::from_components(
            b"abc".to_vec(),
            b"v99".to_vec(),
            99,
            ValueType::Value,
        ));
        memtable.insert(InternalValue::from_components(
            b"abc".to_vec(),
            b"v255".to_vec(),
            255,
            ValueType::Value,
        ));

        assert_eq!(
            Some(InternalValue::from_components(
                b"abc".to_vec(),
                b"v255".to_vec(),
                255,
                ValueType::Value,
            )),
            memtable.get(b"abc", MAX_SEQNO)
        );

        assert_eq!(
            Some(InternalValue::from_components(
                b"abc".to_vec(),
                b"v99".to_vec(),
                99,
                ValueType::Value,
            )),
            memtable.get(b"abc", 100)
        );

        assert_eq!(
            Some(InternalValue::from_components(
                b"abc".to_vec(),
                b"v1".to_vec(),
                1,
                ValueType::Value,
            )),
            memtable.get(b"abc", 50)
        );
    }

    #[test]
    fn memtable_tombstone_visibility() {
        let memtable = Memtable::new();

        memtable.insert(InternalValue::from_components(
            *b"abc",
            *b"v1",
            1,
            ValueType::Value,
        ));
        memtable.insert(InternalValue::new_tombstone(*b"abc", 2));

        #[expect(clippy::unwrap_used)]
        {
            assert!(memtable.get(b"abc", MAX_SEQNO).unwrap().is_tombstone());
            assert!(!memtable.get(b"abc", 1).unwrap().is_tombstone());
        }
    }

    #[test]
    fn memtable_size_tracking() {
        let memtable = Memtable::new();
        assert_eq!(0, memtable.size());

        memtable.insert(InternalValue::from_components(
            *b"abc",
            *b"def",
            1,
            ValueType::Value,
        ));

        assert!(memtable.size() > 0);
        assert_eq!(Some(1), memtable.highest_seqno());
    }

    #[test]
    fn memtable_cursor_ordered() {
        let memtable = Arc::new(Memtable::new());

        for (seqno, key) in [b"b", b"a", b"c"].into_iter().enumerate() {
            memtable.insert(InternalValue::from_components(
                *key,
                *b"",
                (seqno + 1) as SeqNo,
                ValueType::Value,
            ));
        }

        let keys = MemtableCursor::new(memtable.clone(), None)
            .map(|item| item.key.user_key.to_vec())
            .collect::<Vec<_>>();

        assert_eq!(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], keys);

        let keys = MemtableCursor::new(memtable, Some(InternalKey::lower_bound(*b"b")))
            .map(|item| item.key.user_key.to_vec())
            .collect::<Vec<_>>();

        assert_eq!(vec![b"b".to_vec(), b"c".to_vec()], keys);
    }
}
