// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::DecodeError;
use crate::value::{InternalValue, SeqNo, UserKey, UserValue};
use crate::ValueType;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use varint_rs::{VarintReader, VarintWriter};

/// An atomic write batch
///
/// All operations in a batch are applied with consecutive sequence
/// numbers and hit the write-ahead log as a single record, so they
/// become visible (and durable) together.
///
/// # Examples
///
/// ```
/// # use talus::{Batch, Config};
/// # let folder = tempfile::tempdir()?;
/// # let db = Config::new(&folder).open()?;
/// let mut batch = Batch::new();
/// batch.insert("season", "winter");
/// batch.remove("weather");
/// db.write(batch, &Default::default())?;
/// # Ok::<(), talus::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub(crate) items: Vec<(ValueType, UserKey, UserValue)>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an insert.
    pub fn insert<K: Into<UserKey>, V: Into<UserValue>>(&mut self, key: K, value: V) {
        self.items.push((ValueType::Value, key.into(), value.into()));
    }

    /// Stages a deletion.
    pub fn remove<K: Into<UserKey>>(&mut self, key: K) {
        self.items
            .push((ValueType::Tombstone, key.into(), UserValue::from(vec![])));
    }

    /// Returns the number of staged operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Approximate in-memory size, used for write accounting.
    pub(crate) fn size(&self) -> u64 {
        self.items
            .iter()
            .map(|(_, k, v)| (k.len() + v.len() + 16) as u64)
            .sum()
    }

    /// Serializes the batch as a log payload.
    ///
    /// Layout: `base_seqno u64 | count u32 | count * (type u8, key, [value])`,
    /// with keys and values being varint-length-prefixed.
    pub(crate) fn encode(&self, base_seqno: SeqNo) -> crate::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(64);

        bytes.write_u64::<LittleEndian>(base_seqno)?;

        // NOTE: Batches are bounded way below u32::MAX items
        #[allow(clippy::cast_possible_truncation)]
        bytes.write_u32::<LittleEndian>(self.items.len() as u32)?;

        for (value_type, key, value) in &self.items {
            bytes.write_u8(u8::from(*value_type))?;

            #[allow(clippy::cast_possible_truncation)]
            bytes.write_u32_varint(key.len() as u32)?;
            bytes.extend_from_slice(key);

            if *value_type == ValueType::Value {
                #[allow(clippy::cast_possible_truncation)]
                bytes.write_u32_varint(value.len() as u32)?;
                bytes.extend_from_slice(value);
            }
        }

        Ok(bytes)
    }

    /// Decodes a log payload back into sequence-stamped entries.
    pub(crate) fn decode(bytes: &[u8]) -> crate::Result<DecodedBatch> {
        let mut reader = Cursor::new(bytes);

        let base_seqno = reader.read_u64::<LittleEndian>().map_err(DecodeError::Io)?;
        let count = reader.read_u32::<LittleEndian>().map_err(DecodeError::Io)?;

        let mut items = Vec::with_capacity(count as usize);

        for idx in 0..u64::from(count) {
            let value_type: ValueType = reader
                .read_u8()
                .map_err(DecodeError::Io)?
                .try_into()
                .map_err(|()| crate::Error::corruption("invalid batch entry type"))?;

            let key_len = reader.read_u32_varint().map_err(DecodeError::Io)?;
            let key = UserKey::from_reader(&mut reader, key_len as usize)
                .map_err(DecodeError::Io)?;

            let value = if value_type == ValueType::Value {
                let value_len = reader.read_u32_varint().map_err(DecodeError::Io)?;
                UserValue::from_reader(&mut reader, value_len as usize).map_err(DecodeError::Io)?
            } else {
                UserValue::from(vec![])
            };

            items.push(InternalValue::from_components(
                key,
                value,
                base_seqno + idx,
                value_type,
            ));
        }

        Ok(DecodedBatch { base_seqno, items })
    }
}

/// A batch recovered from a log record
pub(crate) struct DecodedBatch {
    #[allow(unused)]
    pub base_seqno: SeqNo,
    pub items: Vec<InternalValue>,
}
