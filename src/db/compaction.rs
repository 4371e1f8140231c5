// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Flush and compaction execution

use super::{DbInner, DbState};
use crate::compaction::Compaction;
use crate::config::Config;
use crate::file::{parse_file_name, table_file_path, FileType};
use crate::merge::{BoxedIterator, MergeIterator};
use crate::table;
use crate::value::{InternalValue, SeqNo, UserKey};
use crate::version::{FileMetadata, VersionEdit, TARGET_FILE_SIZE};
use std::sync::{Arc, MutexGuard};

/// Streams sorted entries into a new table file.
///
/// Returns the metadata of the written file.
pub(crate) fn build_table(
    config: &Config,
    file_number: u64,
    items: &mut dyn Iterator<Item = crate::Result<InternalValue>>,
) -> crate::Result<Arc<FileMetadata>> {
    let path = table_file_path(&config.path, file_number);

    let mut writer = table::Writer::create(
        &path,
        table::writer::Options {
            block_size: config.block_size,
            restart_interval: config.block_restart_interval,
            compression: config.compression,
        },
    )?;

    for item in items {
        writer.add(&item?)?;
    }

    let trailer = writer.finish()?;

    crate::file::fsync_directory(&config.path)?;

    log::debug!(
        "Wrote table #{file_number} ({} items, {} bytes)",
        trailer.item_count,
        trailer.file_size,
    );

    Ok(Arc::new(FileMetadata::new(
        file_number,
        trailer.file_size,
        trailer.smallest,
        trailer.largest,
    )))
}

impl DbInner {
    /// One unit of background work: drain the sealed memtable first,
    /// otherwise run one compaction if due.
    pub(crate) fn background_work(&self) -> crate::Result<()> {
        {
            let state = self.lock_state();

            if state.imm.is_some() {
                drop(state);
                return self.compact_memtable();
            }
        }

        let compaction = {
            let mut state = self.lock_state();
            state.versions.pick_compaction()
        };

        let Some(compaction) = compaction else {
            return Ok(());
        };

        if compaction.is_trivial_move() {
            return self.apply_trivial_move(&compaction);
        }

        self.run_compaction(compaction)
    }

    /// Flushes the sealed memtable into a table file.
    fn compact_memtable(&self) -> crate::Result<()> {
        let (imm, base_version) = {
            let state = self.lock_state();
            (state.imm.clone(), state.versions.current())
        };

        let Some(imm) = imm else {
            return Ok(());
        };

        let file_number = {
            let mut state = self.lock_state();
            let number = state.versions.new_file_number();
            state.pending_outputs.insert(number);
            number
        };

        let result = build_table(&self.config, file_number, &mut imm.iter().map(Ok));

        let mut state = self.lock_state();
        state.pending_outputs.remove(&file_number);

        let meta = match result {
            Ok(meta) => meta,
            Err(e) => {
                drop(state);
                self.discard_output(file_number);
                return Err(e);
            }
        };

        // The base version is good enough for placement; the level
        // layout cannot have shifted underneath a running flush
        let level = base_version
            .pick_level_for_memtable_output(&meta.smallest.user_key, &meta.largest.user_key);

        log::debug!("Flushed memtable into L{level} table #{file_number}");

        let mut edit = VersionEdit::default();
        edit.add_file(level, meta);

        // Logs older than the active one are no longer needed
        edit.log_number = Some(state.log_number);

        if let Err(e) = state.versions.log_and_apply(edit) {
            drop(state);
            self.discard_output(file_number);
            return Err(e);
        }

        state.imm = None;

        self.sweep_obsolete_files(state);

        Ok(())
    }

    /// Moves a single file one level down without rewriting it.
    fn apply_trivial_move(&self, compaction: &Compaction) -> crate::Result<()> {
        let Some(file) = compaction
            .inputs
            .first()
            .and_then(|files| files.first())
            .cloned()
        else {
            return Ok(());
        };

        let mut edit = VersionEdit::default();
        edit.delete_file(compaction.level, file.file_number);

        // Re-wrap the metadata so the moved file gets a fresh seek debit
        edit.add_file(
            compaction.output_level(),
            Arc::new(FileMetadata::new(
                file.file_number,
                file.size,
                file.smallest.clone(),
                file.largest.clone(),
            )),
        );

        if let Some((level, key)) = compaction.compact_pointer.clone() {
            edit.compact_pointers.push((level, key));
        }

        log::debug!(
            "Trivially moved table #{} from L{} to L{}",
            file.file_number,
            compaction.level,
            compaction.output_level(),
        );

        let mut state = self.lock_state();
        state.versions.log_and_apply(edit)?;

        self.sweep_obsolete_files(state);

        Ok(())
    }

    /// Merges the compaction inputs into new files of the output level.
    pub(crate) fn run_compaction(
        &self,
        mut compaction: Compaction,
    ) -> crate::Result<()> {
        log::debug!("Starting {compaction:?}");

        let smallest_snapshot = {
            let state = self.lock_state();
            self.snapshots
                .smallest()
                .unwrap_or(state.versions.last_seqno)
        };

        let mut output_numbers: Vec<u64> = vec![];

        let result =
            self.run_compaction_inner(&mut compaction, smallest_snapshot, &mut output_numbers);

        match result {
            Ok(outputs) => {
                let mut edit = VersionEdit::default();

                if let Some((level, key)) = compaction.compact_pointer.clone() {
                    edit.compact_pointers.push((level, key));
                }

                for (level, file) in compaction.input_iter() {
                    edit.delete_file(level, file.file_number);
                }

                for meta in &outputs {
                    edit.add_file(compaction.output_level(), meta.clone());
                }

                log::debug!(
                    "Compacted {} input files into {} L{} files",
                    compaction.input_iter().count(),
                    outputs.len(),
                    compaction.output_level(),
                );

                let mut state = self.lock_state();

                for number in &output_numbers {
                    state.pending_outputs.remove(number);
                }

                if let Err(e) = state.versions.log_and_apply(edit) {
                    drop(state);

                    for number in output_numbers {
                        self.discard_output(number);
                    }

                    return Err(e);
                }

                self.sweep_obsolete_files(state);

                Ok(())
            }
            Err(e) => {
                let mut state = self.lock_state();

                for number in &output_numbers {
                    state.pending_outputs.remove(number);
                }
                drop(state);

                for number in output_numbers {
                    self.discard_output(number);
                }

                Err(e)
            }
        }
    }

    /// The merge loop: applies the version/tombstone garbage rules and
    /// cuts output files on size and grandparent overlap.
    fn run_compaction_inner(
        &self,
        compaction: &mut Compaction,
        smallest_snapshot: SeqNo,
        output_numbers: &mut Vec<u64>,
    ) -> crate::Result<Vec<Arc<FileMetadata>>> {
        let mut iterators: Vec<BoxedIterator<'static>> = vec![];

        if compaction.level == 0 {
            // L0 inputs overlap each other, one iterator per file
            for file in compaction.inputs.first().map(Vec::as_slice).unwrap_or_default() {
                let table = self.table_cache.get(file.file_number)?;
                iterators.push(Box::new(table.iter(None)));
            }
        } else {
            iterators.push(Box::new(super::iterator::LevelIterator::new(
                compaction
                    .inputs
                    .first()
                    .cloned()
                    .unwrap_or_default(),
                self.table_cache.clone(),
                None,
            )));
        }

        iterators.push(Box::new(super::iterator::LevelIterator::new(
            compaction.inputs.get(1).cloned().unwrap_or_default(),
            self.table_cache.clone(),
            None,
        )));

        let merge = MergeIterator::new(iterators);

        let mut outputs: Vec<Arc<FileMetadata>> = vec![];
        let mut writer: Option<(u64, table::Writer)> = None;

        let mut last_user_key: Option<UserKey> = None;
        let mut last_seqno_for_key = SeqNo::MAX;

        let finish_output =
            |writer: &mut Option<(u64, table::Writer)>,
             outputs: &mut Vec<Arc<FileMetadata>>|
             -> crate::Result<()> {
                if let Some((file_number, writer)) = writer.take() {
                    let trailer = writer.finish()?;

                    outputs.push(Arc::new(FileMetadata::new(
                        file_number,
                        trailer.file_size,
                        trailer.smallest,
                        trailer.largest,
                    )));
                }

                Ok(())
            };

        for (idx, item) in merge.enumerate() {
            let item = item?;

            if idx % 1_000 == 0 && self.stop_signal.is_stopped() {
                return Err(crate::Error::ShuttingDown);
            }

            if compaction.should_stop_before(&item.key) && writer.is_some() {
                finish_output(&mut writer, &mut outputs)?;
            }

            // Garbage rules: an entry is dropped if a newer entry for the
            // same user key is already visible below the snapshot floor,
            // or if it is a tombstone at its base level that no snapshot
            // can observe anymore
            if last_user_key.as_ref() != Some(&item.key.user_key) {
                last_user_key = Some(item.key.user_key.clone());
                last_seqno_for_key = SeqNo::MAX;
            }

            let drop_entry = if last_seqno_for_key <= smallest_snapshot {
                true
            } else {
                item.is_tombstone()
                    && item.key.seqno <= smallest_snapshot
                    && compaction.is_base_level_for_key(&item.key.user_key)
            };

            last_seqno_for_key = item.key.seqno;

            if drop_entry {
                continue;
            }

            if writer.is_none() {
                let file_number = {
                    let mut state = self.lock_state();
                    let number = state.versions.new_file_number();
                    state.pending_outputs.insert(number);
                    number
                };

                output_numbers.push(file_number);

                writer = Some((
                    file_number,
                    table::Writer::create(
                        &table_file_path(&self.config.path, file_number),
                        table::writer::Options {
                            block_size: self.config.block_size,
                            restart_interval: self.config.block_restart_interval,
                            compression: self.config.compression,
                        },
                    )?,
                ));
            }

            if let Some((_, writer)) = &mut writer {
                writer.add(&item)?;
            }

            let full = writer
                .as_ref()
                .is_some_and(|(_, w)| w.estimated_file_size() >= TARGET_FILE_SIZE);

            if full {
                finish_output(&mut writer, &mut outputs)?;
            }
        }

        finish_output(&mut writer, &mut outputs)?;

        crate::file::fsync_directory(&self.config.path)?;

        Ok(outputs)
    }

    /// Best-effort removal of an orphaned output file.
    fn discard_output(&self, file_number: u64) {
        self.table_cache.evict(file_number);

        let path = table_file_path(&self.config.path, file_number);

        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to remove orphaned table {path:?}: {e:?}");
            }
        }
    }

    /// Deletes files no live version references anymore.
    ///
    /// The file list is computed under the lock, the actual unlinking
    /// happens after releasing it.
    pub(crate) fn sweep_obsolete_files(&self, mut state: MutexGuard<'_, DbState>) {
        if state.bg_error.is_some() {
            // Better not to delete anything while in a weird state
            return;
        }

        let mut live = state.versions.live_file_numbers();
        live.extend(state.pending_outputs.iter().copied());

        let log_number = state.versions.log_number;
        let manifest_number = state.versions.manifest_file_number;

        drop(state);

        let Ok(entries) = std::fs::read_dir(&self.config.path) else {
            return;
        };

        for entry in entries.flatten() {
            let name = entry.file_name();

            let Some(file_type) = name.to_str().and_then(parse_file_name) else {
                continue;
            };

            let keep = match file_type {
                FileType::Log(number) => number >= log_number,
                FileType::Manifest(number) => number >= manifest_number,
                FileType::Table(number) => live.contains(&number),
                FileType::Current | FileType::Lock | FileType::InfoLog => true,
            };

            if keep {
                continue;
            }

            if let FileType::Table(number) = file_type {
                self.table_cache.evict(number);
            }

            log::trace!("Sweeping obsolete file {name:?}");

            if let Err(e) = std::fs::remove_file(entry.path()) {
                log::warn!("Failed to sweep {name:?}: {e:?}");
            }
        }
    }
}
