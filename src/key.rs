// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    value::MAX_SEQNO,
    SeqNo, UserKey, ValueType,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Reverse;
use std::io::{Read, Write};

/// Internal key, the unit of ordering inside the engine
///
/// Tuple of (user key, sequence number, value type).
#[derive(Clone, Eq)]
#[allow(clippy::module_name_repetitions)]
pub struct InternalKey {
    pub user_key: UserKey,
    pub seqno: SeqNo,
    pub value_type: ValueType,
}

impl AsRef<[u8]> for InternalKey {
    fn as_ref(&self) -> &[u8] {
        &self.user_key
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        self.user_key == other.user_key && self.seqno == other.seqno
    }
}

impl std::hash::Hash for InternalKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.user_key);
        state.write_u64(self.seqno);
    }
}

impl std::fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}:{}",
            self.user_key,
            self.seqno,
            match self.value_type {
                ValueType::Value => "V",
                ValueType::Tombstone => "T",
            },
        )
    }
}

impl InternalKey {
    pub fn new<K: Into<UserKey>>(user_key: K, seqno: SeqNo, value_type: ValueType) -> Self {
        let user_key = user_key.into();

        assert!(
            u16::try_from(user_key.len()).is_ok(),
            "keys can be 65535 bytes in length",
        );
        assert!(seqno <= MAX_SEQNO, "sequence number too large");

        Self {
            user_key,
            seqno,
            value_type,
        }
    }

    /// The internal key that sorts before every entry of `user_key`.
    ///
    /// Because sequence numbers are ordered descending, that is the key
    /// with the highest possible seqno.
    pub fn lower_bound<K: Into<UserKey>>(user_key: K) -> Self {
        Self::new(user_key, MAX_SEQNO, ValueType::Value)
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_type == ValueType::Tombstone
    }

    /// The 64-bit trailer packing seqno and value type.
    #[must_use]
    pub fn tag(&self) -> u64 {
        (self.seqno << 8) | u64::from(u8::from(self.value_type))
    }

    pub(crate) fn from_tag(user_key: UserKey, tag: u64) -> Result<Self, DecodeError> {
        // NOTE: Truncation is the point here, the type lives in the low byte
        #[allow(clippy::cast_possible_truncation)]
        let value_type = (tag as u8)
            .try_into()
            .map_err(|()| DecodeError::InvalidTag(("ValueType", tag as u8)))?;

        Ok(Self {
            user_key,
            seqno: tag >> 8,
            value_type,
        })
    }

    /// Size of the encoded representation.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + std::mem::size_of::<u64>()
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by sequence number descending, THEN value type descending
// This is one of the most important functions
// Otherwise queries will not match expected behaviour
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, Reverse(self.seqno), Reverse(self.tag()))
            .cmp(&(&other.user_key, Reverse(other.seqno), Reverse(other.tag())))
    }
}

// NOTE: The length-prefixed form is used inside version edits,
// the flat form inside table blocks (where entry lengths are stored
// externally)
impl Encode for InternalKey {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        // NOTE: Max key size = u16
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<LittleEndian>(self.user_key.len() as u16)?;
        writer.write_all(&self.user_key)?;
        writer.write_u64::<LittleEndian>(self.tag())?;
        Ok(())
    }
}

impl Decode for InternalKey {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u16::<LittleEndian>()?;
        let user_key = UserKey::from_reader(reader, len.into())?;
        let tag = reader.read_u64::<LittleEndian>()?;
        Self::from_tag(user_key, tag)
    }
}

impl InternalKey {
    /// Encodes into the flat `user_key || tag` representation.
    #[must_use]
    pub fn encode_flat(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&self.user_key);
        bytes.extend_from_slice(&self.tag().to_le_bytes());
        bytes
    }

    /// Decodes an internal key from its flat `user_key || tag` representation.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Some(split) = bytes.len().checked_sub(std::mem::size_of::<u64>()) else {
            return Err(DecodeError::InvalidLength("InternalKey"));
        };

        let (user_key, mut trailer) = bytes.split_at(split);
        let tag = trailer.read_u64::<LittleEndian>()?;

        Self::from_tag(user_key.into(), tag)
    }
}

/// Returns the shortest user key that is >= `from` and < `to`, if one
/// exists that is strictly shorter than `from`.
///
/// Used to shorten index block separators. Purely a space optimization,
/// `from` itself is always a correct separator.
#[must_use]
pub fn shortest_separator(from: &[u8], to: &[u8]) -> Option<UserKey> {
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common >= from.len() {
        // `from` is a prefix of `to`
        return None;
    }

    let byte = *from.get(common)?;

    if byte < 0xFF && byte + 1 < *to.get(common)? {
        let mut sep = from.get(0..=common)?.to_vec();
        *sep.last_mut()? += 1;

        debug_assert!(&sep[..] > from);
        debug_assert!(&sep[..] < to);

        return Some(sep.into());
    }

    None
}

/// Returns the shortest user key >= `key`, by incrementing the first
/// byte that can be incremented and truncating behind it.
#[must_use]
pub fn shortest_successor(key: &[u8]) -> Option<UserKey> {
    for (idx, byte) in key.iter().enumerate() {
        if *byte != 0xFF {
            let mut succ = key.get(0..=idx)?.to_vec();
            *succ.last_mut()? += 1;
            return Some(succ.into());
        }
    }

    // All 0xFF, leave as-is
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn internal_key_tag_roundtrip() -> Result<(), DecodeError> {
        let key = InternalKey::new(*b"abc", 5, ValueType::Tombstone);
        let restored = InternalKey::from_tag(key.user_key.clone(), key.tag())?;
        assert_eq!(key, restored);
        assert_eq!(ValueType::Tombstone, restored.value_type);
        Ok(())
    }

    #[test]
    fn internal_key_flat_roundtrip() -> crate::Result<()> {
        let key = InternalKey::new(*b"hello", 12_345, ValueType::Value);

        let bytes = key.encode_flat();
        assert_eq!(key.encoded_len(), bytes.len());

        let restored = InternalKey::decode_from_slice(&bytes)?;
        assert_eq!(key, restored);

        Ok(())
    }

    #[test]
    fn internal_key_prefixed_roundtrip() -> crate::Result<()> {
        use crate::coding::{Decode, Encode};

        let key = InternalKey::new(*b"hello", 12_345, ValueType::Tombstone);

        let bytes = key.encode_into_vec()?;
        let restored = InternalKey::decode_from(&mut bytes.as_slice())?;
        assert_eq!(key, restored);
        assert_eq!(ValueType::Tombstone, restored.value_type);

        Ok(())
    }

    #[test]
    fn internal_key_order_newest_first() {
        let mut keys = vec![
            InternalKey::new(*b"a", 1, ValueType::Value),
            InternalKey::new(*b"a", 3, ValueType::Value),
            InternalKey::new(*b"a", 2, ValueType::Tombstone),
        ];
        keys.sort();

        let seqnos = keys.iter().map(|k| k.seqno).collect::<Vec<_>>();
        assert_eq!(vec![3, 2, 1], seqnos);
    }

    #[test]
    fn internal_key_lower_bound_sorts_first() {
        let bound = InternalKey::lower_bound(*b"a");
        let newest = InternalKey::new(*b"a", 999, ValueType::Value);
        assert!(bound < newest);
    }

    #[test]
    fn separator_simple() {
        let sep = shortest_separator(b"abcdefghij", b"abzzz").expect("should shorten");
        assert_eq!(*b"abd", *sep);
    }

    #[test]
    fn separator_prefix() {
        assert!(shortest_separator(b"abc", b"abcdef").is_none());
    }

    #[test]
    fn separator_adjacent() {
        // No room between 'c' and 'd' at the diverging byte
        assert!(shortest_separator(b"abc", b"abd").is_none());
    }

    #[test]
    fn successor_simple() {
        let succ = shortest_successor(b"abc").expect("should exist");
        assert_eq!(*b"b", *succ);
    }

    #[test]
    fn successor_all_ff() {
        assert!(shortest_successor(&[0xFF, 0xFF]).is_none());
    }
}
