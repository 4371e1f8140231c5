// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{block, BlockHandle, FOOTER_SIZE, MAGIC_BYTES};
use crate::key::{shortest_separator, shortest_successor, InternalKey};
use crate::value::{InternalValue, MAX_SEQNO};
use crate::{Checksum, CompressionType, ValueType};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// Options for the table writer
pub struct Options {
    pub block_size: usize,
    pub restart_interval: usize,
    pub compression: CompressionType,
}

/// Result of writing out a table file
#[derive(Debug)]
pub struct Trailer {
    pub item_count: u64,
    pub file_size: u64,
    pub smallest: InternalKey,
    pub largest: InternalKey,
}

/// Streams sorted entries into an on-disk table file
///
/// Layout:
///
/// ```text
/// [data block  | type (1) | xxh3 (8)]*
/// [index block | type (1) | xxh3 (8)]
/// [footer: index handle (16) | item count (8) | magic (4)]
/// ```
pub struct Writer {
    file: BufWriter<File>,
    offset: u64,

    opts: Options,

    data_block: block::Builder,
    index_block: block::Builder,

    first_key: Option<InternalKey>,
    last_key: Option<InternalKey>,

    // Index entries are deferred by one block so the separator can be
    // shortened against the first key of the *next* block
    pending_index: Option<(InternalKey, BlockHandle)>,

    item_count: u64,
}

impl Writer {
    pub fn create(path: &Path, opts: Options) -> crate::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;

        let restart_interval = opts.restart_interval;

        Ok(Self {
            file: BufWriter::new(file),
            offset: 0,
            data_block: block::Builder::new(restart_interval),

            // NOTE: Index keys do not share long prefixes, restart every entry
            index_block: block::Builder::new(1),

            opts,
            first_key: None,
            last_key: None,
            pending_index: None,
            item_count: 0,
        })
    }

    /// Appends an entry. Entries must arrive in internal-key order.
    pub fn add(&mut self, item: &InternalValue) -> crate::Result<()> {
        if let Some(last) = &self.last_key {
            debug_assert!(*last < item.key, "items must be added in order");
        }

        if let Some((prev_last, handle)) = self.pending_index.take() {
            let separator = separator_between(&prev_last, Some(&item.key));
            self.add_index_entry(&separator, &handle)?;
        }

        self.data_block.add(&item.key.encode_flat(), &item.value)?;
        self.item_count += 1;

        if self.first_key.is_none() {
            self.first_key = Some(item.key.clone());
        }
        self.last_key = Some(item.key.clone());

        if self.data_block.estimated_size() >= self.opts.block_size {
            self.flush_data_block()?;
        }

        Ok(())
    }

    /// Estimated size of the file written so far.
    pub fn estimated_file_size(&self) -> u64 {
        self.offset + self.data_block.estimated_size() as u64
    }

    fn add_index_entry(&mut self, separator: &InternalKey, handle: &BlockHandle) -> crate::Result<()> {
        self.index_block.add(&separator.encode_flat(), &handle.encode())?;
        Ok(())
    }

    fn flush_data_block(&mut self) -> crate::Result<()> {
        let block = std::mem::replace(
            &mut self.data_block,
            block::Builder::new(self.opts.restart_interval),
        );
        let bytes = block.finish()?;
        let handle = self.write_raw_block(&bytes, self.opts.compression)?;

        #[expect(clippy::expect_used, reason = "a flushed block has a last key")]
        let last = self.last_key.clone().expect("no last key");

        self.pending_index = Some((last, handle));

        Ok(())
    }

    fn write_raw_block(
        &mut self,
        data: &[u8],
        compression: CompressionType,
    ) -> crate::Result<BlockHandle> {
        let payload = compression.compress(data);

        let mut hasher = Xxh3::new();
        hasher.update(&payload);
        hasher.update(&[u8::from(compression)]);
        let checksum = Checksum::from_raw(hasher.digest());

        self.file.write_all(&payload)?;
        self.file.write_u8(u8::from(compression))?;
        self.file.write_u64::<LittleEndian>(checksum.into_u64())?;

        let handle = BlockHandle {
            offset: self.offset,
            size: payload.len() as u64,
        };

        self.offset += handle.size + 9;

        Ok(handle)
    }

    /// Finishes the table and syncs it to disk.
    pub fn finish(mut self) -> crate::Result<Trailer> {
        if !self.data_block.is_empty() {
            self.flush_data_block()?;
        }

        if let Some((prev_last, handle)) = self.pending_index.take() {
            let separator = separator_between(&prev_last, None);
            self.add_index_entry(&separator, &handle)?;
        }

        let index_bytes = std::mem::replace(&mut self.index_block, block::Builder::new(1)).finish()?;
        let index_handle = self.write_raw_block(&index_bytes, self.opts.compression)?;

        self.file.write_u64::<LittleEndian>(index_handle.offset)?;
        self.file.write_u64::<LittleEndian>(index_handle.size)?;
        self.file.write_u64::<LittleEndian>(self.item_count)?;
        self.file.write_all(&MAGIC_BYTES)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        let file_size = self.offset + FOOTER_SIZE as u64;

        let (Some(smallest), Some(largest)) = (self.first_key, self.last_key) else {
            return Err(crate::Error::InvalidArgument(
                "cannot write empty table".into(),
            ));
        };

        Ok(Trailer {
            item_count: self.item_count,
            file_size,
            smallest,
            largest,
        })
    }
}

/// Computes the index separator following a finished block.
///
/// `next` is the first key of the following block, if any. Shortening is
/// optional, the exact last key is always a valid separator.
fn separator_between(prev_last: &InternalKey, next: Option<&InternalKey>) -> InternalKey {
    let shortened = match next {
        Some(next) => shortest_separator(&prev_last.user_key, &next.user_key),
        None => shortest_successor(&prev_last.user_key),
    };

    shortened.map_or_else(
        || prev_last.clone(),
        |user_key| InternalKey::new(user_key, MAX_SEQNO, ValueType::Value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn separator_shortens() {
        let a = InternalKey::new(*b"abcdefgh", 5, ValueType::Value);
        let b = InternalKey::new(*b"azz", 9, ValueType::Value);

        let sep = separator_between(&a, Some(&b));
        assert!(a < sep);
        assert!(sep < b);
        assert!(sep.user_key.len() < a.user_key.len());
    }

    #[test]
    fn separator_fallback_is_exact_key() {
        let a = InternalKey::new(*b"abc", 5, ValueType::Value);
        let b = InternalKey::new(*b"abcd", 9, ValueType::Value);

        let sep = separator_between(&a, Some(&b));
        assert_eq!(a, sep);
    }
}
