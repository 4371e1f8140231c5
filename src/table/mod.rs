// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted table files
//!
//! A table is an immutable, sorted file of internal key -> value entries,
//! produced by flushing a memtable or by compaction, and consumed through
//! point lookups and ordered iteration.

pub mod block;
pub mod cache;
pub mod writer;

pub use cache::TableCache;
pub use writer::Writer;

use crate::coding::DecodeError;
use crate::key::InternalKey;
use crate::value::InternalValue;
use crate::{Checksum, CompressionType};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use varint_rs::{VarintReader, VarintWriter};
use xxhash_rust::xxh3::Xxh3;

pub const MAGIC_BYTES: [u8; 4] = [b'T', b'L', b'S', 1];

/// Footer: index handle (16) + item count (8) + magic (4)
pub const FOOTER_SIZE: usize = 16 + 8 + MAGIC_BYTES.len();

/// Size of the per-block trailer (compression type + checksum)
const BLOCK_TRAILER_SIZE: usize = 1 + 8;

/// Points at a block inside a table file
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(10);

        #[expect(clippy::expect_used, reason = "writing into a vec cannot fail")]
        {
            bytes.write_u64_varint(self.offset).expect("cannot fail");
            bytes.write_u64_varint(self.size).expect("cannot fail");
        }

        bytes
    }

    pub fn decode(mut bytes: &[u8]) -> crate::Result<Self> {
        let offset = bytes.read_u64_varint().map_err(DecodeError::Io)?;
        let size = bytes.read_u64_varint().map_err(DecodeError::Io)?;
        Ok(Self { offset, size })
    }
}

/// A table file opened for reading
///
/// Holds the parsed index block; data blocks are read on demand.
pub struct Table {
    path: PathBuf,
    file: Mutex<File>,
    index: Arc<block::Block>,
    item_count: u64,
    file_size: u64,
    verify_checksums: bool,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Table({:?}, {} items)", self.path, self.item_count)
    }
}

impl Table {
    /// Opens a table file, reading footer and index block.
    pub fn open(path: &Path, verify_checksums: bool) -> crate::Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();

        if file_size < FOOTER_SIZE as u64 {
            return Err(crate::Error::corruption(format!(
                "table file too short: {path:?}"
            )));
        }

        let mut footer = [0; FOOTER_SIZE];
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer)?;

        let magic = footer
            .get(FOOTER_SIZE - MAGIC_BYTES.len()..)
            .unwrap_or_default();

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("Table").into());
        }

        let index_handle = BlockHandle {
            offset: LittleEndian::read_u64(footer.get(0..8).unwrap_or_default()),
            size: LittleEndian::read_u64(footer.get(8..16).unwrap_or_default()),
        };
        let item_count = LittleEndian::read_u64(footer.get(16..24).unwrap_or_default());

        let file = Mutex::new(file);
        let index = Self::read_block_from(&file, path, verify_checksums, &index_handle)?;

        Ok(Self {
            path: path.into(),
            file,
            index,
            item_count,
            file_size,
            verify_checksums,
        })
    }

    /// Number of entries in the table.
    #[must_use]
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Reads and decodes one block.
    pub(crate) fn read_block(&self, handle: &BlockHandle) -> crate::Result<Arc<block::Block>> {
        Self::read_block_from(&self.file, &self.path, self.verify_checksums, handle)
    }

    fn read_block_from(
        file: &Mutex<File>,
        path: &Path,
        verify_checksums: bool,
        handle: &BlockHandle,
    ) -> crate::Result<Arc<block::Block>> {
        let mut buf = vec![0; handle.size as usize + BLOCK_TRAILER_SIZE];

        {
            #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
            let mut file = file.lock().expect("lock is poisoned");
            file.seek(SeekFrom::Start(handle.offset))?;
            file.read_exact(&mut buf)?;
        }

        let payload = buf.get(0..handle.size as usize).unwrap_or_default();
        let compression_raw = buf.get(handle.size as usize).copied().unwrap_or_default();
        let stored_checksum = Checksum::from_raw(LittleEndian::read_u64(
            buf.get(handle.size as usize + 1..).unwrap_or_default(),
        ));

        if verify_checksums {
            let mut hasher = Xxh3::new();
            hasher.update(payload);
            hasher.update(&[compression_raw]);

            Checksum::from_raw(hasher.digest()).check(stored_checksum)?;
        }

        let compression: CompressionType = compression_raw
            .try_into()
            .map_err(|()| crate::Error::corruption(format!("invalid block trailer: {path:?}")))?;

        let data = compression.decompress(payload)?;

        Ok(Arc::new(block::Block::from_bytes(data)?))
    }

    /// Point lookup: returns the first entry >= `target` that has
    /// the same user key.
    pub fn get(&self, target: &InternalKey) -> crate::Result<Option<InternalValue>> {
        let mut index_iter = block::Iter::with_lower_bound(self.index.clone(), target)?;

        let Some(index_entry) = index_iter.next().transpose()? else {
            return Ok(None);
        };

        let handle = BlockHandle::decode(&index_entry.value)?;
        let data_block = self.read_block(&handle)?;

        let mut iter = block::Iter::with_lower_bound(data_block, target)?;

        match iter.next().transpose()? {
            Some(item) if item.key.user_key == target.user_key => Ok(Some(item)),
            _ => Ok(None),
        }
    }

    /// Creates an ordered iterator over all entries, optionally starting
    /// at the first entry >= `lower_bound`.
    pub fn iter(self: Arc<Self>, lower_bound: Option<InternalKey>) -> Iter {
        Iter::new(self, lower_bound)
    }

    /// Approximate file offset at which `target` would live.
    ///
    /// Used for `approximate_sizes`; not exact, block-granular.
    pub fn approximate_offset_of(&self, target: &InternalKey) -> crate::Result<u64> {
        let mut index_iter = block::Iter::with_lower_bound(self.index.clone(), target)?;

        match index_iter.next().transpose()? {
            Some(entry) => Ok(BlockHandle::decode(&entry.value)?.offset),
            None => Ok(self.file_size),
        }
    }
}

/// Two-level iterator over a table's entries
///
/// Walks the index block, lazily pulling in one data block at a time.
pub struct Iter {
    table: Arc<Table>,
    index_iter: Option<block::OwnedIter>,
    data_iter: Option<block::OwnedIter>,
    lower_bound: Option<InternalKey>,
    init_error: Option<crate::Error>,
}

impl Iter {
    #[must_use]
    pub fn new(table: Arc<Table>, lower_bound: Option<InternalKey>) -> Self {
        let (index_iter, init_error) = match &lower_bound {
            Some(bound) => match block::Iter::with_lower_bound(table.index.clone(), bound) {
                Ok(iter) => (Some(iter), None),
                Err(e) => (None, Some(e)),
            },
            None => (Some(block::Iter::new(table.index.clone())), None),
        };

        Self {
            table,
            index_iter,
            data_iter: None,
            lower_bound,
            init_error,
        }
    }
}

impl Iterator for Iter {
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.init_error.take() {
            self.index_iter = None;
            return Some(Err(e));
        }

        loop {
            if let Some(data_iter) = &mut self.data_iter {
                if let Some(item) = data_iter.next() {
                    return Some(item);
                }
                self.data_iter = None;
            }

            let index_entry = match self.index_iter.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            let handle = fail_iter!(BlockHandle::decode(&index_entry.value));
            let block = fail_iter!(self.table.read_block(&handle));

            let data_iter = match self.lower_bound.take() {
                Some(bound) => fail_iter!(block::Iter::with_lower_bound(block, &bound)),
                None => block::Iter::new(block),
            };

            self.data_iter = Some(data_iter);
        }
    }
}
