// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::binary_search::partition_point;
use crate::key::InternalKey;
use crate::memtable::{Memtable, MemtableCursor};
use crate::merge::{BoxedIterator, MergeIterator};
use crate::table::TableCache;
use crate::value::{InternalValue, SeqNo, UserKey};
use crate::version::{FileMetadata, Version, NUM_LEVELS};
use crate::{KvPair, ValueType};
use std::sync::Arc;

/// Concatenating iterator over the files of one sorted (L1+) level
///
/// Files are range-disjoint and sorted, so walking them back to back
/// yields internal-key order. Tables are opened lazily through the
/// table cache.
pub(crate) struct LevelIterator {
    files: Vec<Arc<FileMetadata>>,
    table_cache: Arc<TableCache>,
    idx: usize,
    current: Option<crate::table::Iter>,
    lower_bound: Option<InternalKey>,
}

impl LevelIterator {
    pub fn new(
        files: Vec<Arc<FileMetadata>>,
        table_cache: Arc<TableCache>,
        lower_bound: Option<InternalKey>,
    ) -> Self {
        let idx = match &lower_bound {
            Some(bound) => partition_point(&files, |file| file.largest < *bound),
            None => 0,
        };

        Self {
            files,
            table_cache,
            idx,
            current: None,
            lower_bound,
        }
    }
}

impl Iterator for LevelIterator {
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(item) = current.next() {
                    return Some(item);
                }
                self.current = None;
            }

            let file = self.files.get(self.idx)?.clone();
            self.idx += 1;

            let table = fail_iter!(self.table_cache.get(file.file_number));

            // The bound only matters for the first table; later files
            // lie entirely behind it
            self.current = Some(table.iter(self.lower_bound.take()));
        }
    }
}

/// Builds the raw merged stream over all live structures.
///
/// Yields every entry version in internal-key order, without any
/// visibility filtering.
pub(crate) fn build_merge(
    mem: &Arc<Memtable>,
    imm: Option<&Arc<Memtable>>,
    version: &Arc<Version>,
    table_cache: &Arc<TableCache>,
    lower_bound: Option<&InternalKey>,
) -> crate::Result<MergeIterator<'static>> {
    let mut iterators: Vec<BoxedIterator<'static>> = vec![];

    iterators.push(Box::new(
        MemtableCursor::new(mem.clone(), lower_bound.cloned()).map(Ok),
    ));

    if let Some(imm) = imm {
        iterators.push(Box::new(
            MemtableCursor::new(imm.clone(), lower_bound.cloned()).map(Ok),
        ));
    }

    // L0 files overlap, each contributes its own iterator
    for file in version.level(0) {
        let table = table_cache.get(file.file_number)?;
        iterators.push(Box::new(table.iter(lower_bound.cloned())));
    }

    for level in 1..NUM_LEVELS {
        let files = version.level(level);

        if !files.is_empty() {
            iterators.push(Box::new(LevelIterator::new(
                files.to_vec(),
                table_cache.clone(),
                lower_bound.cloned(),
            )));
        }
    }

    Ok(MergeIterator::new(iterators))
}

/// An iterator over the user-visible entries of the database
///
/// Pins the memtables and version it was created against, and reads at
/// a fixed sequence number, so it observes a stable snapshot no matter
/// what is written or compacted afterwards.
///
/// Yields one `(key, value)` pair per live user key, in ascending
/// unsigned-lexicographic key order. Deleted keys do not appear.
pub struct DbIterator {
    read_seqno: SeqNo,

    mem: Arc<Memtable>,
    imm: Option<Arc<Memtable>>,
    version: Arc<Version>,
    table_cache: Arc<TableCache>,

    merge: MergeIterator<'static>,
    current: Option<crate::Result<KvPair>>,
    last_user_key: Option<UserKey>,
}

impl DbIterator {
    pub(crate) fn new(
        mem: Arc<Memtable>,
        imm: Option<Arc<Memtable>>,
        version: Arc<Version>,
        table_cache: Arc<TableCache>,
        read_seqno: SeqNo,
    ) -> crate::Result<Self> {
        let merge = build_merge(&mem, imm.as_ref(), &version, &table_cache, None)?;

        let mut iter = Self {
            read_seqno,
            mem,
            imm,
            version,
            table_cache,
            merge,
            current: None,
            last_user_key: None,
        };
        iter.advance();

        Ok(iter)
    }

    /// Repositions at the first entry.
    pub fn seek_to_first(&mut self) -> crate::Result<()> {
        self.merge = build_merge(
            &self.mem,
            self.imm.as_ref(),
            &self.version,
            &self.table_cache,
            None,
        )?;
        self.last_user_key = None;
        self.advance();

        Ok(())
    }

    /// Repositions at the first user key >= `key`.
    pub fn seek<K: AsRef<[u8]>>(&mut self, key: K) -> crate::Result<()> {
        // Entries of this key newer than the read seqno sort before the
        // bound; they are invisible anyway
        let bound = InternalKey::new(key.as_ref(), self.read_seqno, ValueType::Value);

        self.merge = build_merge(
            &self.mem,
            self.imm.as_ref(),
            &self.version,
            &self.table_cache,
            Some(&bound),
        )?;
        self.last_user_key = None;
        self.advance();

        Ok(())
    }

    /// The entry the iterator currently points at, if any.
    ///
    /// Errors are surfaced by [`Iterator::next`], not here.
    #[must_use]
    pub fn peek(&self) -> Option<&KvPair> {
        match &self.current {
            Some(Ok(pair)) => Some(pair),
            _ => None,
        }
    }

    /// Returns `true` if the iterator points at an entry.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.current.is_some()
    }

    /// Pulls the next visible entry out of the merged stream.
    fn advance(&mut self) {
        self.current = loop {
            let Some(item) = self.merge.next() else {
                break None;
            };

            let item = match item {
                Ok(item) => item,
                Err(e) => break Some(Err(e)),
            };

            if item.key.seqno > self.read_seqno {
                // Not visible at this snapshot
                continue;
            }

            if self
                .last_user_key
                .as_ref()
                .is_some_and(|last| *last == item.key.user_key)
            {
                // Older version of a key we already resolved
                continue;
            }

            self.last_user_key = Some(item.key.user_key.clone());

            if item.is_tombstone() {
                continue;
            }

            break Some(Ok((item.key.user_key, item.value)));
        };
    }
}

impl Iterator for DbIterator {
    type Item = crate::Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        let out = self.current.take()?;

        if out.is_ok() {
            self.advance();
        }

        Some(out)
    }
}
