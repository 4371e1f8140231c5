// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    FileMetadata, Version, VersionEdit, EXPANDED_COMPACTION_BYTE_LIMIT, NUM_LEVELS,
};
use crate::coding::{Decode, Encode};
use crate::compaction::{Compaction, Trigger};
use crate::file::{manifest_file_path, read_current_file, set_current_file};
use crate::key::InternalKey;
use crate::key_range::KeyRange;
use crate::value::UserKey;
use crate::{wal, HashSet, SeqNo};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// Owns the version history, counters and the manifest
///
/// All mutation goes through [`VersionSet::log_and_apply`]: the edit is
/// made durable in the manifest first, then the new version is swapped
/// in. Old versions stay alive for as long as something (an iterator, a
/// read, a compaction) pins them.
pub struct VersionSet {
    folder: PathBuf,

    current: Arc<Version>,
    live: Vec<Weak<Version>>,

    manifest: Option<wal::Writer>,

    /// File number of the live manifest
    pub manifest_file_number: u64,

    /// Next file number to hand out
    next_file_number: u64,

    /// Oldest write-ahead log still needed for recovery
    pub log_number: u64,

    /// Highest sequence number stamped onto a write
    pub last_seqno: SeqNo,

    /// Per-level resume points for score-triggered compactions
    compact_pointers: Vec<Option<InternalKey>>,

    /// File that exhausted its seek debit, if any
    seek_compaction: Option<(usize, Arc<FileMetadata>)>,
}

impl VersionSet {
    #[must_use]
    pub fn new(folder: PathBuf) -> Self {
        Self {
            folder,
            current: Arc::new(Version::empty()),
            live: vec![],
            manifest: None,
            manifest_file_number: 0,
            next_file_number: 2,
            log_number: 0,
            last_seqno: 0,
            compact_pointers: (0..NUM_LEVELS).map(|_| None).collect(),
            seek_compaction: None,
        }
    }

    /// The live version.
    #[must_use]
    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    /// Allocates a fresh file number.
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Bumps the file number counter past an externally observed number.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Registers a file whose seek debit ran out.
    ///
    /// Returns `true` if this newly seeds a compaction.
    pub fn record_seek_seed(&mut self, level: usize, file: Arc<FileMetadata>) -> bool {
        if self.seek_compaction.is_none() {
            self.seek_compaction = Some((level, file));
            true
        } else {
            false
        }
    }

    /// Returns `true` if the picker would produce a compaction.
    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        self.seek_compaction.is_some() || self.current.pick_compaction_level().is_some()
    }

    /// Replays the manifest pointed at by `CURRENT`.
    pub fn recover(&mut self) -> crate::Result<()> {
        let Some(manifest_name) = read_current_file(&self.folder)? else {
            return Err(crate::Error::corruption(format!(
                "CURRENT missing in {:?}",
                self.folder
            )));
        };

        let Some(crate::file::FileType::Manifest(manifest_number)) =
            crate::file::parse_file_name(&manifest_name)
        else {
            return Err(crate::Error::corruption(format!(
                "CURRENT names no manifest: {manifest_name:?}"
            )));
        };

        log::debug!("Recovering version set from {manifest_name}");

        // Manifest corruption is fatal, hence a strict reader
        let mut reader = wal::Reader::new(&self.folder.join(&manifest_name), true)?;

        let mut builder = Builder::new(self.current.clone());

        let mut log_number = None;
        let mut next_file_number = None;
        let mut last_seqno = None;

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode_from(&mut record.as_slice())?;

            builder.apply(&edit);

            for (level, key) in &edit.compact_pointers {
                if let Some(slot) = self.compact_pointers.get_mut(*level) {
                    *slot = Some(key.clone());
                }
            }

            log_number = edit.log_number.or(log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_seqno = edit.last_seqno.or(last_seqno);
        }

        let (Some(log_number), Some(next_file_number), Some(last_seqno)) =
            (log_number, next_file_number, last_seqno)
        else {
            return Err(crate::Error::corruption(format!(
                "manifest {manifest_name:?} is missing meta fields"
            )));
        };

        self.log_number = log_number;
        self.next_file_number = next_file_number;
        self.last_seqno = last_seqno;
        self.manifest_file_number = manifest_number;
        self.mark_file_number_used(manifest_number);
        self.mark_file_number_used(log_number);

        let version = Arc::new(builder.build());
        self.live.push(Arc::downgrade(&version));
        self.current = version;

        Ok(())
    }

    /// Applies an edit: persist to the manifest, then install the new version.
    ///
    /// A freshly created manifest is prefixed with a snapshot of the
    /// complete current state, so recovery only ever replays one manifest.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> crate::Result<Arc<Version>> {
        if let Some(edit_log_number) = edit.log_number {
            debug_assert!(edit_log_number >= self.log_number);
            debug_assert!(edit_log_number < self.next_file_number);
        } else {
            edit.log_number = Some(self.log_number);
        }

        edit.next_file_number = Some(self.next_file_number);
        edit.last_seqno = Some(self.last_seqno);

        let new_version = {
            let mut builder = Builder::new(self.current.clone());
            builder.apply(&edit);
            builder.build()
        };

        let is_fresh_manifest = self.manifest.is_none();

        if is_fresh_manifest {
            let manifest_number = self.new_file_number();
            let path = manifest_file_path(&self.folder, manifest_number);

            let result: crate::Result<wal::Writer> = (|| {
                let mut writer = wal::Writer::create(&path)?;

                let snapshot = self.snapshot_edit();
                writer.add_record(&snapshot.encode_into_vec()?)?;

                Ok(writer)
            })();

            self.manifest = Some(result?);
            self.manifest_file_number = manifest_number;
        }

        {
            #[expect(clippy::expect_used, reason = "manifest was just ensured above")]
            let manifest = self.manifest.as_mut().expect("manifest should exist");

            manifest.add_record(&edit.encode_into_vec()?)?;
            manifest.sync()?;
        }

        if is_fresh_manifest {
            set_current_file(&self.folder, self.manifest_file_number)?;
        }

        // Install
        for (level, key) in &edit.compact_pointers {
            if let Some(slot) = self.compact_pointers.get_mut(*level) {
                *slot = Some(key.clone());
            }
        }

        if let Some(log_number) = edit.log_number {
            self.log_number = log_number;
        }

        let version = Arc::new(new_version);
        self.live.push(Arc::downgrade(&version));
        self.current = version.clone();

        Ok(version)
    }

    /// An edit reproducing the complete current state.
    fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit {
            log_number: Some(self.log_number),
            ..Default::default()
        };

        for (level, pointer) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = pointer {
                edit.compact_pointers.push((level, key.clone()));
            }
        }

        for level in 0..NUM_LEVELS {
            for file in self.current.level(level) {
                edit.add_file(level, file.clone());
            }
        }

        edit
    }

    /// File numbers referenced by any version that is still pinned.
    pub fn live_file_numbers(&mut self) -> HashSet<u64> {
        let mut live = HashSet::default();

        self.live.retain(|weak| {
            let Some(version) = weak.upgrade() else {
                return false;
            };

            for level in 0..NUM_LEVELS {
                for file in version.level(level) {
                    live.insert(file.file_number);
                }
            }

            true
        });

        live
    }

    /// Picks the next due compaction, score-based compactions first.
    pub fn pick_compaction(&mut self) -> Option<Compaction> {
        let current = self.current.clone();

        let (level, seed, trigger) = if let Some((level, score)) = current.pick_compaction_level() {
            log::debug!("L{level} reached compaction score {score:.2}");

            // Resume behind the last compacted key, wrapping around
            let pointer = self.compact_pointers.get(level).cloned().flatten();

            let seed = current
                .level(level)
                .iter()
                .find(|file| pointer.as_ref().is_none_or(|ptr| file.largest > *ptr))
                .or_else(|| current.level(level).first())?
                .clone();

            (level, seed, Trigger::Score)
        } else if let Some((level, file)) = self.seek_compaction.take() {
            log::debug!(
                "File#{} exhausted its seek debit, compacting L{level}",
                file.file_number
            );

            (level, file, Trigger::Seek)
        } else {
            return None;
        };

        let inputs0 = if level == 0 {
            // L0 files overlap, so pull in everything touching the seed's range
            current.overlapping_files(
                0,
                Some(&seed.smallest.user_key),
                Some(&seed.largest.user_key),
            )
        } else {
            vec![seed]
        };

        if inputs0.is_empty() {
            return None;
        }

        Some(self.setup_other_inputs(level, inputs0, trigger))
    }

    /// Plans a manual compaction over a user key range.
    pub fn compaction_for_range(
        &mut self,
        level: usize,
        begin: Option<&UserKey>,
        end: Option<&UserKey>,
    ) -> Option<Compaction> {
        let inputs0 = self.current.overlapping_files(level, begin, end);

        if inputs0.is_empty() {
            return None;
        }

        Some(self.setup_other_inputs(level, inputs0, Trigger::Manual))
    }

    /// Completes a plan: pulls in the overlapping files of L+1, tries to
    /// grow the L side without growing the L+1 side, and collects the
    /// grandparent files bounding output cuts.
    fn setup_other_inputs(
        &mut self,
        level: usize,
        mut inputs0: Vec<Arc<FileMetadata>>,
        trigger: Trigger,
    ) -> Compaction {
        let current = self.current.clone();

        let mut range0 = files_user_key_range(&inputs0);

        let mut inputs1 =
            current.overlapping_files(level + 1, Some(range0.min()), Some(range0.max()));

        if !inputs1.is_empty() {
            let both = KeyRange::aggregate(
                [&range0, &files_user_key_range(&inputs1)].into_iter(),
            );

            let expanded0 = current.overlapping_files(level, Some(both.min()), Some(both.max()));

            let inputs1_size: u64 = inputs1.iter().map(|f| f.size).sum();
            let expanded0_size: u64 = expanded0.iter().map(|f| f.size).sum();

            if expanded0.len() > inputs0.len()
                && inputs1_size + expanded0_size < EXPANDED_COMPACTION_BYTE_LIMIT
            {
                let expanded_range = files_user_key_range(&expanded0);

                let expanded1 = current.overlapping_files(
                    level + 1,
                    Some(expanded_range.min()),
                    Some(expanded_range.max()),
                );

                if expanded1.len() == inputs1.len() {
                    log::debug!(
                        "Expanding L{level} compaction from {} to {} files",
                        inputs0.len(),
                        expanded0.len(),
                    );

                    inputs0 = expanded0;
                    inputs1 = expanded1;
                    range0 = expanded_range;
                }
            }
        }

        let grandparents = if level + 2 < NUM_LEVELS {
            let all = KeyRange::aggregate(
                [&range0, &files_user_key_range(&inputs1)]
                    .into_iter()
                    .filter(|range| !range.min().is_empty() || !range.max().is_empty()),
            );

            current.overlapping_files(level + 2, Some(all.min()), Some(all.max()))
        } else {
            vec![]
        };

        // Remember where to resume this level, even if the engine reopens
        let compact_pointer = inputs0
            .iter()
            .map(|f| &f.largest)
            .max()
            .cloned()
            .map(|key| (level, key));

        if let (Some(slot), Some((_, key))) =
            (self.compact_pointers.get_mut(level), &compact_pointer)
        {
            *slot = Some(key.clone());
        }

        Compaction::new(
            level,
            [inputs0, inputs1],
            grandparents,
            current,
            compact_pointer,
            trigger,
        )
    }
}

/// Accumulates edits on top of a base version
struct Builder {
    base: Arc<Version>,
    added: Vec<Vec<Arc<FileMetadata>>>,
    deleted: Vec<HashSet<u64>>,
}

impl Builder {
    fn new(base: Arc<Version>) -> Self {
        Self {
            base,
            added: (0..NUM_LEVELS).map(|_| vec![]).collect(),
            deleted: (0..NUM_LEVELS).map(|_| HashSet::default()).collect(),
        }
    }

    fn apply(&mut self, edit: &VersionEdit) {
        for (level, file_number) in &edit.deleted_files {
            if let Some(slot) = self.deleted.get_mut(*level) {
                slot.insert(*file_number);
            }
        }

        for (level, file) in &edit.new_files {
            if let Some(slot) = self.deleted.get_mut(*level) {
                slot.remove(&file.file_number);
            }
            if let Some(slot) = self.added.get_mut(*level) {
                slot.push(file.clone());
            }
        }
    }

    fn build(&self) -> Version {
        let levels = (0..NUM_LEVELS)
            .map(|level| {
                let deleted = self.deleted.get(level);

                let mut files = self
                    .base
                    .level(level)
                    .iter()
                    .filter(|file| {
                        !deleted.is_some_and(|del| del.contains(&file.file_number))
                    })
                    .cloned()
                    .chain(
                        self.added
                            .get(level)
                            .map(Vec::as_slice)
                            .unwrap_or_default()
                            .iter()
                            .cloned(),
                    )
                    .collect::<Vec<_>>();

                if level == 0 {
                    files.sort_unstable_by_key(|file| file.file_number);
                } else {
                    files.sort_unstable_by(|a, b| a.smallest.cmp(&b.smallest));

                    debug_assert!(
                        files
                            .windows(2)
                            .all(|pair| matches!(pair, [a, b] if a.largest < b.smallest)),
                        "level {level} has overlapping files",
                    );
                }

                files
            })
            .collect();

        Version::from_levels(levels)
    }
}

/// Union of the user key ranges of a set of files.
fn files_user_key_range(files: &[Arc<FileMetadata>]) -> KeyRange {
    KeyRange::aggregate(files.iter().map(|f| f.key_range()).collect::<Vec<_>>().iter())
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
    fn version_set_bootstrap_and_recover() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        {
            let mut versions = VersionSet::new(dir.path().into());
            versions.last_seqno = 42;

            let mut edit = VersionEdit::default();
            edit.add_file(0, file(5, "a", "m", 1_000));
            edit.add_file(2, file(6, "x", "z", 2_000));
            versions.log_and_apply(edit)?;

            let mut edit = VersionEdit::default();
            edit.delete_file(0, 5);
            edit.add_file(1, file(7, "a", "m", 900));
            versions.log_and_apply(edit)?;
        }

        {
            let mut versions = VersionSet::new(dir.path().into());
            versions.recover()?;

            assert_eq!(42, versions.last_seqno);

            let current = versions.current();
            assert_eq!(0, current.file_count(0));
            assert_eq!(1, current.file_count(1));
            assert_eq!(1, current.file_count(2));

            let live = versions.live_file_numbers();
            assert!(live.contains(&6));
            assert!(live.contains(&7));
            assert!(!live.contains(&5));
        }

        Ok(())
    }

    #[test]
    fn version_set_live_files_track_pins() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut versions = VersionSet::new(dir.path().into());

        let mut edit = VersionEdit::default();
        edit.add_file(1, file(5, "a", "m", 1_000));
        versions.log_and_apply(edit)?;

        // Pin the version containing file 5
        let pinned = versions.current();

        let mut edit = VersionEdit::default();
        edit.delete_file(1, 5);
        edit.add_file(1, file(8, "a", "m", 1_000));
        versions.log_and_apply(edit)?;

        let live = versions.live_file_numbers();
        assert!(live.contains(&5), "pinned version still references file 5");
        assert!(live.contains(&8));

        drop(pinned);

        let live = versions.live_file_numbers();
        assert!(!live.contains(&5));
        assert!(live.contains(&8));

        Ok(())
    }

    #[test]
    fn version_set_picks_l0_compaction() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut versions = VersionSet::new(dir.path().into());

        let mut edit = VersionEdit::default();
        for idx in 0..4 {
            edit.add_file(0, file(10 + idx, "a", "z", 1_000));
        }
        versions.log_and_apply(edit)?;

        assert!(versions.needs_compaction());

        let compaction = versions.pick_compaction().expect("should pick");
        assert_eq!(0, compaction.level);
        assert_eq!(
            4,
            compaction.inputs.first().map(Vec::len).unwrap_or_default()
        );

        Ok(())
    }

    #[test]
    fn version_set_seek_seed_triggers_compaction() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut versions = VersionSet::new(dir.path().into());

        let mut edit = VersionEdit::default();
        edit.add_file(1, file(5, "a", "m", 1_000));
        versions.log_and_apply(edit)?;

        assert!(!versions.needs_compaction());

        let seed = versions.current().level(1).first().cloned().expect("file");
        assert!(versions.record_seek_seed(1, seed));
        assert!(versions.needs_compaction());

        let compaction = versions.pick_compaction().expect("should pick");
        assert_eq!(Trigger::Seek, compaction.trigger);
        assert_eq!(1, compaction.level);

        Ok(())
    }
}
