// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Versioned file layout
//!
//! A [`Version`] is an immutable snapshot of which table files live in
//! which level. Mutations go through [`VersionEdit`]s applied by the
//! [`VersionSet`], which also persists them to the manifest.

pub mod edit;
pub mod set;

pub use edit::VersionEdit;
pub use set::VersionSet;

use crate::binary_search::partition_point;
use crate::key::InternalKey;
use crate::key_range::KeyRange;
use crate::table::TableCache;
use crate::value::{InternalValue, UserKey};
use std::sync::atomic::{AtomicI64, Ordering::Relaxed};
use std::sync::Arc;

/// Number of levels
pub const NUM_LEVELS: usize = 7;

/// Level-0 file count that triggers compaction
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Level-0 file count at which writes are slowed down
pub const L0_SLOWDOWN_WRITES_TRIGGER: usize = 8;

/// Level-0 file count at which writes stall entirely
pub const L0_STOP_WRITES_TRIGGER: usize = 12;

/// Deepest level a flushed memtable may be placed in
pub const MAX_MEM_COMPACT_LEVEL: usize = 2;

/// Table file target size
pub const TARGET_FILE_SIZE: u64 = 2 * 1_024 * 1_024;

/// Output files are cut when they would overlap more than this many
/// bytes of grandparent (level + 2) data
pub const MAX_GRANDPARENT_OVERLAP_BYTES: u64 = 10 * TARGET_FILE_SIZE;

/// Upper bound on the bytes pulled into a compaction when expanding
/// the lower level
pub const EXPANDED_COMPACTION_BYTE_LIMIT: u64 = 25 * TARGET_FILE_SIZE;

/// Maximum desired bytes in a level; above this, the level is a compaction candidate
#[must_use]
pub fn max_bytes_for_level(level: usize) -> f64 {
    debug_assert!(level >= 1, "level 0 is scored by file count");

    let mut result = 10.0 * 1_048_576.0;

    for _ in 1..level {
        result *= 10.0;
    }

    result
}

/// Metadata of one table file
pub struct FileMetadata {
    /// Unique, monotonically increasing file number
    pub file_number: u64,

    /// File size in bytes
    pub size: u64,

    /// Smallest internal key in the file
    pub smallest: InternalKey,

    /// Largest internal key in the file
    pub largest: InternalKey,

    /// Seek debit; when it runs out, the file seeds a compaction
    ///
    /// One seek costs roughly as much as compacting 16 KiB, so wide
    /// files get a proportionally larger budget.
    pub allowed_seeks: AtomicI64,
}

impl FileMetadata {
    #[must_use]
    pub fn new(file_number: u64, size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let allowed_seeks = ((size / 16_384) as i64).max(100);

        Self {
            file_number,
            size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks),
        }
    }

    /// The user key range covered by this file.
    #[must_use]
    pub fn key_range(&self) -> KeyRange {
        KeyRange::new((
            self.smallest.user_key.clone(),
            self.largest.user_key.clone(),
        ))
    }

    /// Charges one fruitless seek against this file.
    ///
    /// Returns `true` if the debit just ran out.
    pub fn charge_seek(&self) -> bool {
        self.allowed_seeks.fetch_sub(1, Relaxed) == 1
    }
}

impl PartialEq for FileMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.file_number == other.file_number
    }
}

impl Eq for FileMetadata {}

impl std::fmt::Debug for FileMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "File#{}({} bytes, {:?}..{:?})",
            self.file_number, self.size, self.smallest, self.largest
        )
    }
}

/// Immutable snapshot of the leveled file layout
///
/// Shared through `Arc`; point reads, iterators and compactions pin the
/// version they started from, so files they reference are not deleted
/// under them.
pub struct Version {
    levels: Vec<Vec<Arc<FileMetadata>>>,
}

/// Result of a point lookup descending the levels
pub struct GetResult {
    /// The resolved entry, possibly a tombstone
    pub item: Option<InternalValue>,

    /// File that ran out of its seek debit during this lookup
    pub seek_seed: Option<(usize, Arc<FileMetadata>)>,
}

impl Version {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            levels: (0..NUM_LEVELS).map(|_| vec![]).collect(),
        }
    }

    pub(crate) fn from_levels(levels: Vec<Vec<Arc<FileMetadata>>>) -> Self {
        debug_assert_eq!(NUM_LEVELS, levels.len());
        Self { levels }
    }

    /// Files of one level; L1+ sorted by smallest key, L0 by file number.
    #[must_use]
    pub fn level(&self, level: usize) -> &[Arc<FileMetadata>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn file_count(&self, level: usize) -> usize {
        self.level(level).len()
    }

    #[must_use]
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.level(level).iter().map(|f| f.size).sum()
    }

    /// Total number of files across all levels.
    #[must_use]
    pub fn file_count_total(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Index of the first file in a sorted level whose largest key
    /// is >= `target`.
    fn find_file(files: &[Arc<FileMetadata>], target: &InternalKey) -> usize {
        partition_point(files, |file| file.largest < *target)
    }

    /// Returns `true` if any file in `level` overlaps `[begin, end]`
    /// (user keys, `None` meaning unbounded).
    #[must_use]
    pub fn overlap_in_level(
        &self,
        level: usize,
        begin: Option<&UserKey>,
        end: Option<&UserKey>,
    ) -> bool {
        !self.overlapping_files(level, begin, end).is_empty()
    }

    /// Collects all files in `level` overlapping the user key range.
    ///
    /// For level 0, the range is grown to the union of all overlapping
    /// files, since L0 files may overlap each other; every file that
    /// overlaps the grown range is included.
    #[must_use]
    pub fn overlapping_files(
        &self,
        level: usize,
        begin: Option<&UserKey>,
        end: Option<&UserKey>,
    ) -> Vec<Arc<FileMetadata>> {
        let mut begin = begin.cloned();
        let mut end = end.cloned();

        let mut results = vec![];
        let files = self.level(level);

        let mut idx = 0;

        while idx < files.len() {
            let Some(file) = files.get(idx) else {
                break;
            };
            idx += 1;

            let file_smallest = &file.smallest.user_key;
            let file_largest = &file.largest.user_key;

            if begin.as_ref().is_some_and(|b| file_largest < b)
                || end.as_ref().is_some_and(|e| file_smallest > e)
            {
                continue;
            }

            results.push(file.clone());

            if level == 0 {
                // L0 files overlap each other: widen the range and restart
                let mut restart = false;

                if begin.as_ref().is_some_and(|b| file_smallest < b) {
                    begin = Some(file_smallest.clone());
                    restart = true;
                }
                if end.as_ref().is_some_and(|e| file_largest > e) {
                    end = Some(file_largest.clone());
                    restart = true;
                }

                if restart {
                    results.clear();
                    idx = 0;
                }
            }
        }

        results
    }

    /// Point lookup through the level hierarchy.
    ///
    /// L0 files are probed newest first; deeper levels have at most one
    /// candidate file each, found by binary search. The first entry for
    /// the user key terminates the descent.
    pub fn get(&self, target: &InternalKey, table_cache: &TableCache) -> crate::Result<GetResult> {
        let mut seek_seed: Option<(usize, Arc<FileMetadata>)> = None;

        let charge = |level: usize, file: &Arc<FileMetadata>, seed: &mut Option<_>| {
            if file.charge_seek() && seed.is_none() {
                *seed = Some((level, file.clone()));
            }
        };

        // Level 0: overlapping files, newest wins
        let mut l0_candidates = self
            .level(0)
            .iter()
            .filter(|file| file.key_range().contains_key(&target.user_key))
            .collect::<Vec<_>>();

        l0_candidates.sort_unstable_by_key(|file| std::cmp::Reverse(file.file_number));

        for file in l0_candidates {
            let table = table_cache.get(file.file_number)?;

            if let Some(item) = table.get(target)? {
                return Ok(GetResult {
                    item: Some(item),
                    seek_seed,
                });
            }

            charge(0, file, &mut seek_seed);
        }

        // Deeper levels are disjoint
        for level in 1..NUM_LEVELS {
            let files = self.level(level);

            let idx = Self::find_file(files, target);

            let Some(file) = files.get(idx) else {
                continue;
            };

            if target.user_key < file.smallest.user_key {
                continue;
            }

            let table = table_cache.get(file.file_number)?;

            if let Some(item) = table.get(target)? {
                return Ok(GetResult {
                    item: Some(item),
                    seek_seed,
                });
            }

            charge(level, file, &mut seek_seed);
        }

        Ok(GetResult {
            item: None,
            seek_seed,
        })
    }

    /// Chooses the level a flushed memtable lands in.
    ///
    /// L0 by default, but if the flushed range does not overlap L0/L1 it
    /// is pushed down (up to [`MAX_MEM_COMPACT_LEVEL`]) as long as the
    /// grandparent overlap stays small, saving one compaction cycle.
    #[must_use]
    pub fn pick_level_for_memtable_output(
        &self,
        smallest_user: &UserKey,
        largest_user: &UserKey,
    ) -> usize {
        let mut level = 0;

        if !self.overlap_in_level(0, Some(smallest_user), Some(largest_user)) {
            while level < MAX_MEM_COMPACT_LEVEL {
                if self.overlap_in_level(level + 1, Some(smallest_user), Some(largest_user)) {
                    break;
                }

                if level + 2 < NUM_LEVELS {
                    let overlap_bytes: u64 = self
                        .overlapping_files(level + 2, Some(smallest_user), Some(largest_user))
                        .iter()
                        .map(|f| f.size)
                        .sum();

                    if overlap_bytes > MAX_GRANDPARENT_OVERLAP_BYTES {
                        break;
                    }
                }

                level += 1;
            }
        }

        level
    }

    /// Returns `true` if no level deeper than `level` contains the user key.
    ///
    /// Only then may a tombstone for that key be dropped at `level`.
    #[must_use]
    pub fn is_base_level_for_key(&self, level: usize, user_key: &UserKey) -> bool {
        for deeper in (level + 1)..NUM_LEVELS {
            for file in self.level(deeper) {
                if file.key_range().contains_key(user_key) {
                    return false;
                }
            }
        }

        true
    }

    /// Largest number of bytes any single file overlaps in its next level.
    #[must_use]
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let mut result = 0;

        for level in 1..NUM_LEVELS - 1 {
            for file in self.level(level) {
                let overlap: u64 = self
                    .overlapping_files(
                        level + 1,
                        Some(&file.smallest.user_key),
                        Some(&file.largest.user_key),
                    )
                    .iter()
                    .map(|f| f.size)
                    .sum();

                result = result.max(overlap);
            }
        }

        result
    }

    /// Approximate byte offset of `target` in the keyspace laid out on disk.
    pub fn approximate_offset_of(
        &self,
        target: &InternalKey,
        table_cache: &TableCache,
    ) -> crate::Result<u64> {
        let mut offset = 0;

        for (level, files) in self.levels.iter().enumerate() {
            for file in files {
                if file.largest < *target {
                    // Whole file is before target
                    offset += file.size;
                } else if file.smallest > *target {
                    // Whole file is behind target
                    if level > 0 {
                        // Sorted level: nothing further overlaps either
                        break;
                    }
                } else {
                    let table = table_cache.get(file.file_number)?;
                    offset += table.approximate_offset_of(target)?;
                }
            }
        }

        Ok(offset)
    }

    /// Compaction score of a level; >= 1.0 means compaction is due.
    ///
    /// L0 is scored by file count (many small files hurt every read),
    /// deeper levels by byte size.
    #[must_use]
    pub fn compaction_score(&self, level: usize) -> f64 {
        if level == 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.file_count(0) as f64 / L0_COMPACTION_TRIGGER as f64
            }
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.level_bytes(level) as f64 / max_bytes_for_level(level)
            }
        }
    }

    /// The level with the highest compaction score, if any is >= 1.0.
    #[must_use]
    pub fn pick_compaction_level(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;

        // The last level has nowhere to compact into
        for level in 0..NUM_LEVELS - 1 {
            let score = self.compaction_score(level);

            if score >= 1.0 && best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((level, score));
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValueType;
    use test_log::test;

    fn file(number: u64, smallest: &str, largest: &str, size: u64) -> Arc<FileMetadata> {
        Arc::new(FileMetadata::new(
            number,
            size,
            InternalKey::new(smallest.as_bytes(), 5, ValueType::Value),
            InternalKey::new(largest.as_bytes(), 1, ValueType::Value),
        ))
    }

    fn version_with(level1: Vec<Arc<FileMetadata>>) -> Version {
        let mut levels: Vec<Vec<Arc<FileMetadata>>> =
            (0..NUM_LEVELS).map(|_| vec![]).collect();
        if let Some(slot) = levels.get_mut(1) {
            *slot = level1;
        }
        Version::from_levels(levels)
    }

    #[test]
    fn level_max_bytes_grow_tenfold() {
        assert!((max_bytes_for_level(1) - 10.0 * 1_048_576.0).abs() < f64::EPSILON);
        assert!((max_bytes_for_level(3) - 1_000.0 * 1_048_576.0).abs() < f64::EPSILON);
    }

    #[test]
    fn version_overlapping_files_sorted_level() {
        let version = version_with(vec![
            file(1, "a", "c", 100),
            file(2, "e", "g", 100),
            file(3, "i", "k", 100),
        ]);

        let hits = version.overlapping_files(1, Some(&"f".into()), Some(&"j".into()));
        assert_eq!(2, hits.len());

        let hits = version.overlapping_files(1, None, Some(&"b".into()));
        assert_eq!(1, hits.len());

        let hits = version.overlapping_files(1, Some(&"z".into()), None);
        assert!(hits.is_empty());
    }

    #[test]
    fn version_overlapping_files_l0_widens() {
        let mut levels: Vec<Vec<Arc<FileMetadata>>> =
            (0..NUM_LEVELS).map(|_| vec![]).collect();
        if let Some(slot) = levels.get_mut(0) {
            *slot = vec![
                file(1, "a", "m", 100),
                file(2, "l", "z", 100),
                file(3, "x", "zz", 100),
            ];
        }
        let version = Version::from_levels(levels);

        // "k".."l" overlaps file 1 and 2; file 2 drags in file 3
        let hits = version.overlapping_files(0, Some(&"k".into()), Some(&"l".into()));
        assert_eq!(3, hits.len());
    }

    #[test]
    fn version_compaction_score() {
        let version = version_with(vec![file(1, "a", "c", 20 * 1_048_576)]);

        assert!(version.compaction_score(1) >= 1.0);
        assert!(version.compaction_score(2) < 1.0);

        let (level, _) = version.pick_compaction_level().expect("should pick");
        assert_eq!(1, level);
    }

    #[test]
    fn version_memtable_output_level() {
        // Empty version: flushed file can be pushed down
        let version = Version::empty();
        assert_eq!(
            MAX_MEM_COMPACT_LEVEL,
            version.pick_level_for_memtable_output(&"a".into(), &"b".into())
        );

        // Overlap in L1 keeps it in L0
        let version = version_with(vec![file(1, "a", "c", 100)]);
        assert_eq!(
            0,
            version.pick_level_for_memtable_output(&"b".into(), &"d".into())
        );
    }

    #[test]
    fn version_base_level_check() {
        let version = version_with(vec![file(1, "a", "c", 100)]);

        assert!(!version.is_base_level_for_key(0, &"b".into()));
        assert!(version.is_base_level_for_key(0, &"x".into()));
        assert!(version.is_base_level_for_key(1, &"b".into()));
    }
}
