// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;
use crate::key::InternalKey;
use crate::value::InternalValue;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::sync::Arc;
use varint_rs::{VarintReader, VarintWriter};

/// Number of bytes in the restart array trailer per restart point
const RESTART_ENTRY_SIZE: usize = std::mem::size_of::<u32>();

/// Builds a single (data or index) block
///
/// Keys are prefix-compressed against their predecessor; every
/// `restart_interval` entries a full key is stored, and its offset
/// recorded in the restart array, so the block can be binary searched.
pub struct Builder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
}

impl Builder {
    #[must_use]
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval > 0, "restart interval must be positive");

        Self {
            buf: vec![],
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Approximate size of the finished block.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + (self.restarts.len() + 1) * RESTART_ENTRY_SIZE
    }

    /// Appends an entry; `key` is the flat-encoded internal key.
    ///
    /// Keys must be added in ascending order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> crate::Result<()> {
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            // NOTE: Truncation is fine, blocks are < 4 GiB
            #[allow(clippy::cast_possible_truncation)]
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        };

        let non_shared = key.len() - shared;

        // NOTE: Keys are < 64 KiB, values < 4 GiB
        #[allow(clippy::cast_possible_truncation)]
        {
            self.buf.write_u32_varint(shared as u32)?;
            self.buf.write_u32_varint(non_shared as u32)?;
            self.buf.write_u32_varint(value.len() as u32)?;
        }

        self.buf.extend_from_slice(key.get(shared..).unwrap_or_default());
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;

        Ok(())
    }

    /// Finishes the block, appending the restart array.
    pub fn finish(mut self) -> crate::Result<Vec<u8>> {
        for offset in &self.restarts {
            self.buf.write_u32::<LittleEndian>(*offset)?;
        }

        // NOTE: Truncation is fine, blocks are < 4 GiB
        #[allow(clippy::cast_possible_truncation)]
        self.buf
            .write_u32::<LittleEndian>(self.restarts.len() as u32)?;

        Ok(self.buf)
    }
}

/// An immutable, decoded block
pub struct Block {
    data: Vec<u8>,
    restarts: Vec<u32>,
    data_end: usize,
}

impl Block {
    /// Parses a block from its uncompressed on-disk representation.
    pub fn from_bytes(data: Vec<u8>) -> crate::Result<Self> {
        let Some(restart_count_offset) = data.len().checked_sub(RESTART_ENTRY_SIZE) else {
            return Err(DecodeError::InvalidLength("Block").into());
        };

        let restart_count = LittleEndian::read_u32(
            data.get(restart_count_offset..)
                .ok_or(DecodeError::InvalidLength("Block"))?,
        ) as usize;

        let Some(data_end) = restart_count_offset.checked_sub(restart_count * RESTART_ENTRY_SIZE)
        else {
            return Err(DecodeError::InvalidLength("Block").into());
        };

        let restarts = (0..restart_count)
            .map(|idx| {
                let offset = data_end + idx * RESTART_ENTRY_SIZE;
                data.get(offset..offset + RESTART_ENTRY_SIZE)
                    .map(LittleEndian::read_u32)
                    .ok_or(DecodeError::InvalidLength("Block"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            data,
            restarts,
            data_end,
        })
    }

    /// Decodes the full key starting at a restart point.
    fn restart_key(&self, restart_idx: usize) -> crate::Result<InternalKey> {
        let offset = *self
            .restarts
            .get(restart_idx)
            .ok_or(DecodeError::InvalidLength("Block"))? as usize;

        let mut iter = Iter {
            block: ArcOrRef::Ref(self),
            offset,
            last_key: vec![],
        };

        iter.next()
            .ok_or_else(|| crate::Error::corruption("restart point past block end"))?
            .map(|item| item.key)
    }
}

enum ArcOrRef<'a> {
    Arc(Arc<Block>),
    Ref(&'a Block),
}

impl std::ops::Deref for ArcOrRef<'_> {
    type Target = Block;

    fn deref(&self) -> &Block {
        match self {
            Self::Arc(block) => block,
            Self::Ref(block) => block,
        }
    }
}

/// Forward iterator over a block's entries
pub struct Iter<'a> {
    block: ArcOrRef<'a>,
    offset: usize,
    last_key: Vec<u8>,
}

/// Owning block iterator, used by table iterators
pub type OwnedIter = Iter<'static>;

impl Iter<'static> {
    #[must_use]
    pub fn new(block: Arc<Block>) -> Self {
        Self {
            block: ArcOrRef::Arc(block),
            offset: 0,
            last_key: vec![],
        }
    }

    /// Creates an iterator positioned at the first entry whose key is >= `target`.
    pub fn with_lower_bound(block: Arc<Block>, target: &InternalKey) -> crate::Result<Self> {
        let mut iter = Self::new(block);
        iter.seek(target)?;
        Ok(iter)
    }
}

impl Iter<'_> {
    /// Repositions the iterator at the first entry with key >= `target`.
    ///
    /// Binary searches the restart array, then scans linearly.
    pub fn seek(&mut self, target: &InternalKey) -> crate::Result<()> {
        let mut left = 0_usize;
        let mut right = self.block.restarts.len();

        // Find the last restart point with a key < target
        while right - left > 1 {
            let mid = (left + right) / 2;

            if self.block.restart_key(mid)? < *target {
                left = mid;
            } else {
                right = mid;
            }
        }

        self.offset = *self
            .block
            .restarts
            .get(left)
            .ok_or(DecodeError::InvalidLength("Block"))? as usize;
        self.last_key.clear();

        // Scan forward to the first entry >= target
        loop {
            let prev_offset = self.offset;
            let prev_key = self.last_key.clone();

            match self.next() {
                Some(Ok(item)) => {
                    if item.key >= *target {
                        self.offset = prev_offset;
                        self.last_key = prev_key;
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.block.data_end {
            return None;
        }

        let slice = self.block.data.get(self.offset..self.block.data_end)?;
        let mut reader = std::io::Cursor::new(slice);

        let shared = fail_iter!(reader.read_u32_varint()) as usize;
        let non_shared = fail_iter!(reader.read_u32_varint()) as usize;
        let value_len = fail_iter!(reader.read_u32_varint()) as usize;

        #[allow(clippy::cast_possible_truncation)]
        let header_len = reader.position() as usize;
        let key_start = self.offset + header_len;
        let value_start = key_start + non_shared;
        let entry_end = value_start + value_len;

        if shared > self.last_key.len() || entry_end > self.block.data_end {
            return Some(Err(crate::Error::corruption("malformed block entry")));
        }

        let key_tail = self.block.data.get(key_start..value_start)?;
        let value = self.block.data.get(value_start..entry_end)?;

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(key_tail);

        let key = fail_iter!(InternalKey::decode_from_slice(&self.last_key));
        let value = InternalValue {
            key,
            value: value.into(),
        };

        self.offset = entry_end;

        Some(Ok(value))
    }
}
