// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The storage engine
//!
//! Ties together memtables, write-ahead log, version set and the
//! background worker. One mutex guards all mutable engine state;
//! readers take it only long enough to clone a handful of `Arc`s.

mod compaction;
mod iterator;

pub use iterator::DbIterator;

use crate::batch::Batch;
use crate::config::{Config, ReadOptions, WriteOptions};
use crate::file::{
    log_file_path, parse_file_name, FileType, CURRENT_FILE, LOCK_FILE,
};
use crate::flock::FileLock;
use crate::key::InternalKey;
use crate::memtable::Memtable;
use crate::seqno::SequenceNumberCounter;
use crate::snapshot::{Snapshot, SnapshotList};
use crate::stop_signal::StopSignal;
use crate::table::TableCache;
use crate::value::{InternalValue, SeqNo, UserKey, UserValue};
use crate::version::{
    VersionEdit, VersionSet, L0_SLOWDOWN_WRITES_TRIGGER, L0_STOP_WRITES_TRIGGER, NUM_LEVELS,
};
use crate::{wal, HashSet, ValueType};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Mutable engine state, guarded by the engine mutex
pub(crate) struct DbState {
    /// Active memtable
    pub mem: Arc<Memtable>,

    /// Sealed memtable, currently being flushed
    pub imm: Option<Arc<Memtable>>,

    /// Active write-ahead log
    pub log: Option<wal::Writer>,

    /// File number of the active log
    pub log_number: u64,

    pub versions: VersionSet,

    /// Output files of in-flight flushes/compactions; protected from
    /// the obsolete-file sweep
    pub pending_outputs: HashSet<u64>,

    /// Set while the background worker (or a manual compaction) works
    pub bg_compaction_scheduled: bool,

    /// Sticky background error; the engine is read-only while set
    pub bg_error: Option<Arc<crate::Error>>,

    /// Folder lock, held until close
    pub file_lock: Option<FileLock>,
}

pub(crate) struct DbInner {
    pub config: Config,
    pub mutex: Mutex<DbState>,

    /// Signals the background worker that there may be work
    pub work_requested: Condvar,

    /// Signals waiters that background work finished (or state changed)
    pub work_finished: Condvar,

    pub snapshots: SnapshotList,
    pub table_cache: Arc<TableCache>,
    pub stop_signal: StopSignal,
    pub seqno: SequenceNumberCounter,
}

impl DbInner {
    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DbState> {
        self.mutex.lock().expect("lock is poisoned")
    }

    fn sticky_error(state: &DbState) -> crate::Result<()> {
        if let Some(e) = &state.bg_error {
            return Err(crate::Error::Background(e.clone()));
        }
        Ok(())
    }

    /// Applies the write stall ladder, rotating the memtable when full.
    fn make_room_for_write<'a>(
        &'a self,
        mut state: MutexGuard<'a, DbState>,
    ) -> crate::Result<MutexGuard<'a, DbState>> {
        let mut allow_delay = true;

        loop {
            if self.stop_signal.is_stopped() {
                return Err(crate::Error::ShuttingDown);
            }

            Self::sticky_error(&state)?;

            let l0_count = state.versions.current().file_count(0);

            if allow_delay && l0_count >= L0_SLOWDOWN_WRITES_TRIGGER {
                // Yield some CPU to the compactor, once per write
                drop(state);
                std::thread::sleep(std::time::Duration::from_millis(1));
                state = self.lock_state();
                allow_delay = false;
                continue;
            }

            if state.mem.size() <= self.config.write_buffer_size {
                return Ok(state);
            }

            if state.imm.is_some() {
                // Previous memtable is still being flushed
                log::trace!("Write stalled on pending memtable flush");
                self.work_requested.notify_one();

                #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
                {
                    state = self.work_finished.wait(state).expect("lock is poisoned");
                }
                continue;
            }

            if l0_count >= L0_STOP_WRITES_TRIGGER {
                log::warn!("Write stalled on level-0 file count ({l0_count})");

                #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
                {
                    state = self.work_finished.wait(state).expect("lock is poisoned");
                }
                continue;
            }

            // Seal the memtable and swap in a fresh log + memtable
            let new_log_number = state.versions.new_file_number();
            let writer = wal::Writer::create(&log_file_path(&self.config.path, new_log_number))?;

            state.log = Some(writer);
            state.log_number = new_log_number;
            state.imm = Some(std::mem::replace(&mut state.mem, Arc::new(Memtable::new())));

            log::trace!("Rotated memtable, new log #{new_log_number}");

            self.work_requested.notify_one();
        }
    }
}

/// An embedded, persistent key-value store
///
/// All operations are thread-safe; share the handle behind an `Arc` to
/// use it from multiple threads. Dropping the handle closes the engine.
///
/// # Examples
///
/// ```
/// # let folder = tempfile::tempdir()?;
/// use talus::Config;
///
/// let db = Config::new(&folder).open()?;
///
/// db.insert("season", "winter", &Default::default())?;
/// assert!(db.get("season", &Default::default())?.is_some());
///
/// db.remove("season", &Default::default())?;
/// assert!(db.get("season", &Default::default())?.is_none());
/// # Ok::<(), talus::Error>(())
/// ```
pub struct Db {
    inner: Arc<DbInner>,
    bg_thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Db({:?})", self.inner.config.path)
    }
}

impl Db {
    /// Opens (or initializes) the database described by `config`.
    pub(crate) fn open(config: Config) -> crate::Result<Self> {
        let folder = config.path.clone();
        std::fs::create_dir_all(&folder)?;

        let file_lock = FileLock::acquire(&folder.join(LOCK_FILE))?;

        let current_exists = folder.join(CURRENT_FILE).try_exists()?;

        if current_exists && config.error_if_exists {
            return Err(crate::Error::InvalidArgument(format!(
                "database already exists: {folder:?}"
            )));
        }

        if !current_exists && !config.create_if_missing {
            return Err(crate::Error::InvalidArgument(format!(
                "database does not exist: {folder:?}"
            )));
        }

        let table_cache = Arc::new(TableCache::new(
            folder.clone(),
            config.max_open_files,
            config.verify_checksums || config.paranoid_checks,
        ));

        let mut versions = VersionSet::new(folder.clone());

        if current_exists {
            versions.recover()?;
        } else {
            log::info!("Initializing fresh database at {folder:?}");
        }

        // Replay write-ahead logs newer than the manifest state
        let mut edit = VersionEdit::default();
        let max_seqno = Self::replay_logs(&config, &mut versions, &mut edit)?;
        versions.last_seqno = max_seqno;

        // Every open rotates to a fresh log and manifest
        let log_number = versions.new_file_number();
        let log = wal::Writer::create(&log_file_path(&folder, log_number))?;

        edit.log_number = Some(log_number);
        versions.log_and_apply(edit)?;

        let inner = Arc::new(DbInner {
            mutex: Mutex::new(DbState {
                mem: Arc::new(Memtable::new()),
                imm: None,
                log: Some(log),
                log_number,
                versions,
                pending_outputs: HashSet::default(),
                bg_compaction_scheduled: false,
                bg_error: None,
                file_lock: Some(file_lock),
            }),
            work_requested: Condvar::new(),
            work_finished: Condvar::new(),
            snapshots: SnapshotList::default(),
            table_cache,
            stop_signal: StopSignal::default(),
            seqno: SequenceNumberCounter::new(max_seqno),
            config,
        });

        {
            let state = inner.lock_state();
            inner.sweep_obsolete_files(state);
        }

        let thread_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("talus-bg".into())
            .spawn(move || background_worker(&thread_inner))?;

        // Kick off compaction in case recovery left work behind
        inner.work_requested.notify_one();

        Ok(Self {
            inner,
            bg_thread: Mutex::new(Some(handle)),
        })
    }

    /// Replays all logs >= the recovered log number into (possibly
    /// several) level-0 tables, collecting files into `edit`.
    fn replay_logs(
        config: &Config,
        versions: &mut VersionSet,
        edit: &mut VersionEdit,
    ) -> crate::Result<SeqNo> {
        let mut log_numbers = vec![];

        for entry in std::fs::read_dir(&config.path)? {
            let entry = entry?;

            if let Some(FileType::Log(number)) =
                entry.file_name().to_str().and_then(parse_file_name)
            {
                if number >= versions.log_number {
                    log_numbers.push(number);
                }
            }
        }

        log_numbers.sort_unstable();

        let mut max_seqno = versions.last_seqno;
        let mut mem = Memtable::new();

        let flush =
            |mem: &mut Memtable, versions: &mut VersionSet, edit: &mut VersionEdit| -> crate::Result<()> {
                let full = std::mem::replace(mem, Memtable::new());

                let file_number = versions.new_file_number();
                let meta = compaction::build_table(
                    config,
                    file_number,
                    &mut full.iter().map(Ok),
                )?;

                let level = versions.current().pick_level_for_memtable_output(
                    &meta.smallest.user_key,
                    &meta.largest.user_key,
                );

                log::debug!("Recovered memtable into L{level} table #{file_number}");
                edit.add_file(level, meta);

                Ok(())
            };

        for log_number in log_numbers {
            log::debug!("Replaying log #{log_number}");
            versions.mark_file_number_used(log_number);

            let path = log_file_path(&config.path, log_number);
            let mut reader = wal::Reader::new(&path, config.paranoid_checks)?;

            while let Some(record) = reader.read_record()? {
                let decoded = Batch::decode(&record)?;

                for item in decoded.items {
                    max_seqno = max_seqno.max(item.key.seqno);
                    mem.insert(item);
                }

                if mem.size() > config.write_buffer_size {
                    flush(&mut mem, versions, edit)?;
                }
            }
        }

        if !mem.is_empty() {
            flush(&mut mem, versions, edit)?;
        }

        Ok(max_seqno)
    }

    /// Inserts a key-value pair.
    pub fn insert<K: Into<UserKey>, V: Into<UserValue>>(
        &self,
        key: K,
        value: V,
        opts: &WriteOptions,
    ) -> crate::Result<()> {
        let mut batch = Batch::new();
        batch.insert(key.into(), value.into());
        self.write(batch, opts)
    }

    /// Removes a key (writes a tombstone).
    pub fn remove<K: Into<UserKey>>(&self, key: K, opts: &WriteOptions) -> crate::Result<()> {
        let mut batch = Batch::new();
        batch.remove(key.into());
        self.write(batch, opts)
    }

    /// Applies a batch atomically.
    ///
    /// All operations receive consecutive sequence numbers and are
    /// appended to the write-ahead log as one record.
    pub fn write(&self, batch: Batch, opts: &WriteOptions) -> crate::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let inner = &self.inner;

        let state = inner.lock_state();
        let mut state = inner.make_room_for_write(state)?;

        let base_seqno = state.versions.last_seqno + 1;
        let payload = batch.encode(base_seqno)?;

        {
            let Some(log) = state.log.as_mut() else {
                return Err(crate::Error::ShuttingDown);
            };

            let result = log
                .add_record(&payload)
                .and_then(|()| if opts.sync { log.sync() } else { Ok(()) });

            if let Err(e) = result {
                // A partially written log record poisons the engine
                let e = Arc::new(e);
                state.bg_error = Some(e.clone());
                return Err(crate::Error::Background(e));
            }
        }

        for (idx, (value_type, key, value)) in batch.items.iter().enumerate() {
            state.mem.insert(InternalValue::from_components(
                key.clone(),
                value.clone(),
                base_seqno + idx as u64,
                *value_type,
            ));
        }

        let last_seqno = base_seqno + batch.len() as u64 - 1;
        state.versions.last_seqno = last_seqno;
        inner.seqno.set(last_seqno);

        Ok(())
    }

    /// Point read.
    ///
    /// Returns `None` for missing (or deleted) keys; only I/O and
    /// corruption problems are errors.
    pub fn get<K: AsRef<[u8]>>(
        &self,
        key: K,
        opts: &ReadOptions<'_>,
    ) -> crate::Result<Option<UserValue>> {
        let inner = &self.inner;

        if inner.stop_signal.is_stopped() {
            return Err(crate::Error::ShuttingDown);
        }

        let (mem, imm, version, read_seqno) = {
            let state = inner.lock_state();

            (
                state.mem.clone(),
                state.imm.clone(),
                state.versions.current(),
                opts.snapshot
                    .map_or(state.versions.last_seqno, Snapshot::seqno),
            )
        };

        let key = key.as_ref();

        if let Some(item) = mem.get(key, read_seqno) {
            return Ok(visible(item));
        }

        if let Some(imm) = imm {
            if let Some(item) = imm.get(key, read_seqno) {
                return Ok(visible(item));
            }
        }

        let target = InternalKey::new(key, read_seqno, ValueType::Value);
        let result = version.get(&target, &inner.table_cache)?;

        if let Some((level, file)) = result.seek_seed {
            let mut state = inner.lock_state();

            if state.versions.record_seek_seed(level, file) {
                inner.work_requested.notify_one();
            }

            drop(state);
        }

        Ok(result.item.and_then(visible))
    }

    /// Creates an iterator over the database.
    ///
    /// The iterator observes the state at creation time (or at
    /// `opts.snapshot`, if set); later writes do not appear.
    pub fn iter(&self, opts: &ReadOptions<'_>) -> crate::Result<DbIterator> {
        let inner = &self.inner;

        if inner.stop_signal.is_stopped() {
            return Err(crate::Error::ShuttingDown);
        }

        let (mem, imm, version, read_seqno) = {
            let state = inner.lock_state();

            (
                state.mem.clone(),
                state.imm.clone(),
                state.versions.current(),
                opts.snapshot
                    .map_or(state.versions.last_seqno, Snapshot::seqno),
            )
        };

        DbIterator::new(mem, imm, version, inner.table_cache.clone(), read_seqno)
    }

    /// Takes a snapshot of the current state.
    pub fn snapshot(&self) -> Snapshot {
        let seqno = self.inner.lock_state().versions.last_seqno;
        self.inner.snapshots.create(seqno)
    }

    /// Releases a snapshot.
    ///
    /// Equivalent to dropping it.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    /// Approximate on-disk size of each `[begin, end)` range.
    ///
    /// Memtable contents are not included.
    pub fn approximate_sizes<K: AsRef<[u8]>>(
        &self,
        ranges: &[(K, K)],
    ) -> crate::Result<Vec<u64>> {
        let version = self.inner.lock_state().versions.current();

        let mut sizes = Vec::with_capacity(ranges.len());

        for (begin, end) in ranges {
            let begin_offset = version.approximate_offset_of(
                &InternalKey::lower_bound(begin.as_ref()),
                &self.inner.table_cache,
            )?;
            let end_offset = version.approximate_offset_of(
                &InternalKey::lower_bound(end.as_ref()),
                &self.inner.table_cache,
            )?;

            sizes.push(end_offset.saturating_sub(begin_offset));
        }

        Ok(sizes)
    }

    /// Flushes the active memtable to a table file, blocking until done.
    pub fn flush_memtable(&self) -> crate::Result<()> {
        let inner = &self.inner;
        let mut state = inner.lock_state();

        DbInner::sticky_error(&state)?;

        if state.mem.is_empty() && state.imm.is_none() {
            return Ok(());
        }

        if state.imm.is_none() {
            let new_log_number = state.versions.new_file_number();
            let writer =
                wal::Writer::create(&log_file_path(&inner.config.path, new_log_number))?;

            state.log = Some(writer);
            state.log_number = new_log_number;
            state.imm = Some(std::mem::replace(&mut state.mem, Arc::new(Memtable::new())));
        }

        inner.work_requested.notify_one();

        while state.imm.is_some() {
            if inner.stop_signal.is_stopped() {
                return Err(crate::Error::ShuttingDown);
            }

            DbInner::sticky_error(&state)?;

            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            {
                state = inner.work_finished.wait(state).expect("lock is poisoned");
            }
        }

        Ok(())
    }

    /// Compacts all files of `level` overlapping `[begin, end]` into
    /// `level + 1`, blocking until done.
    ///
    /// `None` bounds are unbounded. Mostly useful for tests and
    /// maintenance jobs.
    pub fn compact_range(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> crate::Result<()> {
        if level + 1 >= NUM_LEVELS {
            return Err(crate::Error::InvalidArgument(format!(
                "cannot compact level {level}"
            )));
        }

        let inner = &self.inner;
        let mut state = inner.lock_state();

        // Wait until the background worker is idle and any sealed
        // memtable has been flushed, so the level content is settled
        while state.bg_compaction_scheduled || state.imm.is_some() {
            if inner.stop_signal.is_stopped() {
                return Err(crate::Error::ShuttingDown);
            }

            DbInner::sticky_error(&state)?;
            inner.work_requested.notify_one();

            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            {
                state = inner.work_finished.wait(state).expect("lock is poisoned");
            }
        }

        DbInner::sticky_error(&state)?;

        let begin = begin.map(UserKey::from);
        let end = end.map(UserKey::from);

        let Some(compaction) =
            state
                .versions
                .compaction_for_range(level, begin.as_ref(), end.as_ref())
        else {
            return Ok(());
        };

        state.bg_compaction_scheduled = true;
        drop(state);

        let result = inner.run_compaction(compaction);

        let mut state = inner.lock_state();
        state.bg_compaction_scheduled = false;

        if let Err(e) = &result {
            if !matches!(e, crate::Error::ShuttingDown) {
                log::error!("Manual compaction failed: {e:?}");
            }
        }

        drop(state);
        inner.work_finished.notify_all();

        // The worker may have deferred work while we held the slot
        inner.work_requested.notify_one();

        result
    }

    /// Number of table files in `level`.
    #[must_use]
    pub fn number_of_files_in_level(&self, level: usize) -> usize {
        self.inner.lock_state().versions.current().file_count(level)
    }

    /// Largest number of next-level bytes any single file overlaps.
    #[must_use]
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let version = self.inner.lock_state().versions.current();
        version.max_next_level_overlapping_bytes()
    }

    /// All internal entries (every version, including tombstones) for a
    /// user key, newest first.
    #[doc(hidden)]
    pub fn internal_entries<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<Vec<InternalValue>> {
        let inner = &self.inner;

        let (mem, imm, version) = {
            let state = inner.lock_state();
            (
                state.mem.clone(),
                state.imm.clone(),
                state.versions.current(),
            )
        };

        let key = key.as_ref();
        let bound = InternalKey::lower_bound(key);

        let merge = iterator::build_merge(
            &mem,
            imm.as_ref(),
            &version,
            &inner.table_cache,
            Some(&bound),
        )?;

        let mut entries = vec![];

        for item in merge {
            let item = item?;

            if &*item.key.user_key != key {
                break;
            }

            entries.push(item);
        }

        Ok(entries)
    }

    /// Shuts the engine down: stops the background worker, syncs and
    /// closes the log, releases the folder lock.
    ///
    /// Subsequent operations fail with [`ShuttingDown`](crate::Error::ShuttingDown).
    /// Called automatically on drop.
    pub fn close(&self) -> crate::Result<()> {
        let inner = &self.inner;

        inner.stop_signal.send();

        // Serialize against anyone who last saw the stop signal unset,
        // so no waiter can go to sleep after the wake-up below
        drop(inner.lock_state());

        inner.work_requested.notify_all();
        inner.work_finished.notify_all();

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let handle = self.bg_thread.lock().expect("lock is poisoned").take();

        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let mut state = inner.lock_state();

        if let Some(log) = state.log.as_mut() {
            let _ = log.sync();
        }

        state.log = None;
        state.file_lock = None;

        Ok(())
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error while closing database: {e:?}");
        }
    }
}

fn visible(item: InternalValue) -> Option<UserValue> {
    if item.is_tombstone() {
        None
    } else {
        Some(item.value)
    }
}

/// Background worker: drains sealed memtables and runs due compactions
/// until the engine shuts down.
fn background_worker(inner: &Arc<DbInner>) {
    loop {
        let mut state = inner.lock_state();

        loop {
            if inner.stop_signal.is_stopped() {
                return;
            }

            if !state.bg_compaction_scheduled
                && state.bg_error.is_none()
                && (state.imm.is_some() || state.versions.needs_compaction())
            {
                break;
            }

            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            {
                state = inner.work_requested.wait(state).expect("lock is poisoned");
            }
        }

        state.bg_compaction_scheduled = true;
        drop(state);

        let result = inner.background_work();

        let mut state = inner.lock_state();
        state.bg_compaction_scheduled = false;

        if let Err(e) = result {
            if matches!(e, crate::Error::ShuttingDown) {
                log::debug!("Background work aborted by shutdown");
            } else {
                log::error!("Background work failed, entering read-only mode: {e:?}");
                state.bg_error = Some(Arc::new(e));
            }
        }

        drop(state);
        inner.work_finished.notify_all();
    }
}
