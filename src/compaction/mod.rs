// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Compaction planning
//!
//! A [`Compaction`] describes one merge of files from level L (and the
//! overlapping files of L+1) into new files of L+1. Plans are produced
//! by the [`VersionSet`](crate::version::VersionSet) picker, either
//! because a level's score reached 1.0, because a file exhausted its
//! seek debit, or on explicit request (`compact_range`).

use crate::key::InternalKey;
use crate::version::{FileMetadata, Version, MAX_GRANDPARENT_OVERLAP_BYTES};
use std::sync::Arc;

/// Why a compaction was scheduled
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// A level's compaction score reached 1.0
    Score,

    /// A file ran out of `allowed_seeks`
    Seek,

    /// `compact_range` was called
    Manual,
}

/// A planned compaction of `level` into `level + 1`
pub struct Compaction {
    /// Input level
    pub level: usize,

    /// Input files; `inputs[0]` from `level`, `inputs[1]` from `level + 1`
    pub inputs: [Vec<Arc<FileMetadata>>; 2],

    /// Files in `level + 2` overlapping the inputs; bounds output file cuts
    pub grandparents: Vec<Arc<FileMetadata>>,

    /// The version this plan was made against (pinned)
    pub version: Arc<Version>,

    /// Resume point recorded for the next score-triggered pick of `level`
    pub compact_pointer: Option<(usize, InternalKey)>,

    pub trigger: Trigger,

    // State for should_stop_before
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,
}

impl std::fmt::Debug for Compaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Compaction(L{}: {} + {} files, {:?})",
            self.level,
            self.inputs.first().map(Vec::len).unwrap_or_default(),
            self.inputs.get(1).map(Vec::len).unwrap_or_default(),
            self.trigger,
        )
    }
}

impl Compaction {
    pub(crate) fn new(
        level: usize,
        inputs: [Vec<Arc<FileMetadata>>; 2],
        grandparents: Vec<Arc<FileMetadata>>,
        version: Arc<Version>,
        compact_pointer: Option<(usize, InternalKey)>,
        trigger: Trigger,
    ) -> Self {
        Self {
            level,
            inputs,
            grandparents,
            version,
            compact_pointer,
            trigger,
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
        }
    }

    /// The level the output files are installed into.
    #[must_use]
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    /// A trivial move shifts a single file one level down without
    /// rewriting it.
    #[must_use]
    pub fn is_trivial_move(&self) -> bool {
        self.trigger != Trigger::Manual
            && self.inputs.first().is_some_and(|files| files.len() == 1)
            && self.inputs.get(1).is_some_and(Vec::is_empty)
            && self.grandparents.iter().map(|f| f.size).sum::<u64>()
                <= MAX_GRANDPARENT_OVERLAP_BYTES
    }

    /// All input files, lower level first.
    pub fn input_iter(&self) -> impl Iterator<Item = (usize, &Arc<FileMetadata>)> + '_ {
        let lower = self
            .inputs
            .first()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |f| (self.level, f));

        let upper = self
            .inputs
            .get(1)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |f| (self.level + 1, f));

        lower.chain(upper)
    }

    /// Returns `true` if no level below the output level contains
    /// `user_key`, so a tombstone for it can be dropped here.
    #[must_use]
    pub fn is_base_level_for_key(&self, user_key: &crate::UserKey) -> bool {
        self.version.is_base_level_for_key(self.output_level(), user_key)
    }

    /// Returns `true` if the current output file should be finished
    /// before adding `key`, to keep the overlap with the grandparent
    /// level bounded.
    pub fn should_stop_before(&mut self, key: &InternalKey) -> bool {
        while let Some(grandparent) = self.grandparents.get(self.grandparent_index) {
            if *key <= grandparent.largest {
                break;
            }

            if self.seen_key {
                self.overlapped_bytes += grandparent.size;
            }

            self.grandparent_index += 1;
        }

        self.seen_key = true;

        if self.overlapped_bytes > MAX_GRANDPARENT_OVERLAP_BYTES {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
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

    #[test]
    fn compaction_trivial_move() {
        let c = Compaction::new(
            1,
            [vec![file(1, "a", "b", 100)], vec![]],
            vec![],
            Arc::new(Version::empty()),
            None,
            Trigger::Score,
        );
        assert!(c.is_trivial_move());

        let c = Compaction::new(
            1,
            [vec![file(1, "a", "b", 100)], vec![file(2, "a", "c", 100)]],
            vec![],
            Arc::new(Version::empty()),
            None,
            Trigger::Score,
        );
        assert!(!c.is_trivial_move());
    }

    #[test]
    fn compaction_stop_before_bounds_overlap() {
        let grandparents = (0..20)
            .map(|idx| {
                file(
                    idx,
                    &format!("k{idx:0>2}"),
                    &format!("k{idx:0>2}z"),
                    MAX_GRANDPARENT_OVERLAP_BYTES / 4,
                )
            })
            .collect::<Vec<_>>();

        let mut c = Compaction::new(
            0,
            [vec![], vec![]],
            grandparents,
            Arc::new(Version::empty()),
            None,
            Trigger::Score,
        );

        let mut cuts = 0;

        for idx in 0..20 {
            let key = InternalKey::new(format!("k{idx:0>2}zz").as_bytes(), 1, ValueType::Value);
            if c.should_stop_before(&key) {
                cuts += 1;
            }
        }

        assert!(cuts >= 2, "expected output cuts, got {cuts}");
    }
}
