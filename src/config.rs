// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{CompressionType, Db, Snapshot};
use std::path::{Path, PathBuf};

/// Database configuration builder
///
/// # Examples
///
/// ```
/// # let folder = tempfile::tempdir()?;
/// use talus::Config;
///
/// let db = Config::new(folder)
///     .write_buffer_size(8 * 1_024 * 1_024)
///     .open()?;
/// # Ok::<(), talus::Error>(())
/// ```
#[derive(Clone)]
pub struct Config {
    /// Database folder path
    #[doc(hidden)]
    pub path: PathBuf,

    /// Initialize a fresh database if none exists
    pub(crate) create_if_missing: bool,

    /// Fail `open` if the database already exists
    pub(crate) error_if_exists: bool,

    /// Memtable size threshold that triggers a flush
    pub(crate) write_buffer_size: u64,

    /// Bound for the table (file handle) cache
    pub(crate) max_open_files: usize,

    /// Uncompressed target size of table data blocks
    pub(crate) block_size: usize,

    /// Interval of restart points inside blocks
    pub(crate) block_restart_interval: usize,

    /// Compression applied to table blocks
    pub(crate) compression: CompressionType,

    /// Verify block checksums on every read
    pub(crate) verify_checksums: bool,

    /// Treat recoverable log damage as an error
    pub(crate) paranoid_checks: bool,
}

impl Config {
    /// Creates a new configuration for the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            create_if_missing: true,
            error_if_exists: false,
            write_buffer_size: /* 4 MiB */ 4 * 1_024 * 1_024,
            max_open_files: 1_000,
            block_size: /* 4 KiB */ 4_096,
            block_restart_interval: 16,
            compression: CompressionType::default(),
            verify_checksums: false,
            paranoid_checks: false,
        }
    }

    /// Whether to initialize a fresh database if none exists.
    ///
    /// Default = `true`
    #[must_use]
    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    /// Whether to fail opening if the database already exists.
    ///
    /// Default = `false`
    #[must_use]
    pub fn error_if_exists(mut self, enabled: bool) -> Self {
        self.error_if_exists = enabled;
        self
    }

    /// Sets the memtable flush threshold in bytes.
    ///
    /// Larger buffers absorb more writes before hitting the disk, at the
    /// cost of memory and recovery time.
    ///
    /// Default = 4 MiB
    #[must_use]
    pub fn write_buffer_size(mut self, bytes: u64) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    /// Sets the bound of the table handle cache.
    ///
    /// Default = 1000
    #[must_use]
    pub fn max_open_files(mut self, count: usize) -> Self {
        self.max_open_files = count;
        self
    }

    /// Sets the target uncompressed size of table data blocks.
    ///
    /// Default = 4 KiB
    #[must_use]
    pub fn block_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "block size must be positive");

        self.block_size = bytes;
        self
    }

    /// Sets the restart point interval inside table blocks.
    ///
    /// Default = 16
    #[must_use]
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        assert!(interval > 0, "restart interval must be positive");

        self.block_restart_interval = interval;
        self
    }

    /// Sets the compression used for table blocks.
    ///
    /// Default = LZ4, when the `lz4` feature is enabled
    #[must_use]
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Whether to verify block checksums on read.
    ///
    /// Default = `false`
    #[must_use]
    pub fn verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }

    /// Whether to escalate recoverable damage (e.g. a torn log tail)
    /// into open errors.
    ///
    /// Default = `false`
    #[must_use]
    pub fn paranoid_checks(mut self, enabled: bool) -> Self {
        self.paranoid_checks = enabled;
        self
    }

    /// Opens the database.
    pub fn open(self) -> crate::Result<Db> {
        Db::open(self)
    }
}

/// Options for write operations
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Fsync the write-ahead log before acknowledging the write.
    ///
    /// Without it, a machine crash may lose the most recent writes (a
    /// process crash does not).
    ///
    /// Default = `false`
    pub sync: bool,
}

/// Options for read operations
#[derive(Clone, Debug, Default)]
pub struct ReadOptions<'a> {
    /// Read at this snapshot instead of the current state.
    pub snapshot: Option<&'a Snapshot>,

    /// Accepted for API compatibility; table checksum verification is
    /// configured at open time via [`Config::verify_checksums`].
    pub verify_checksums: bool,

    /// Accepted for API compatibility; table handles are always cached.
    pub fill_cache: bool,
}

impl<'a> ReadOptions<'a> {
    /// Pins reads to the given snapshot.
    #[must_use]
    pub fn snapshot(mut self, snapshot: &'a Snapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}
