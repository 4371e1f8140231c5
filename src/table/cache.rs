// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Table;
use crate::file::table_file_path;
use quick_cache::sync::Cache as QuickCache;
use std::path::PathBuf;
use std::sync::Arc;

/// Caches open table files by file number
///
/// Keeps the number of simultaneously open file descriptors (and parsed
/// index blocks) bounded by `max_open_files`.
pub struct TableCache {
    folder: PathBuf,
    cache: QuickCache<u64, Arc<Table>>,
    verify_checksums: bool,
}

impl TableCache {
    #[must_use]
    pub fn new(folder: PathBuf, capacity: usize, verify_checksums: bool) -> Self {
        Self {
            folder,
            cache: QuickCache::new(capacity.max(1)),
            verify_checksums,
        }
    }

    /// Returns the opened table, reading its footer and index if it is
    /// not resident.
    pub fn get(&self, file_number: u64) -> crate::Result<Arc<Table>> {
        if let Some(table) = self.cache.get(&file_number) {
            return Ok(table);
        }

        let path = table_file_path(&self.folder, file_number);
        let table = Arc::new(Table::open(&path, self.verify_checksums)?);

        self.cache.insert(file_number, table.clone());

        Ok(table)
    }

    /// Drops a table from the cache, e.g. after its file was deleted.
    pub fn evict(&self, file_number: u64) {
        self.cache.remove(&file_number);
    }
}
