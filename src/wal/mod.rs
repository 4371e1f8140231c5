// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Write-ahead log
//!
//! Records are framed into 32 KiB blocks. Each physical record is
//!
//! ```text
//! [crc32 (4)][length (2)][type (1)][payload (length)]
//! ```
//!
//! A payload that does not fit into the current block is split into
//! First/Middle/Last fragments; a trailer smaller than the 7-byte
//! header is zero-padded.
//!
//! The same framing is used for the version set's manifest file.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

/// Size of one log block
pub const BLOCK_SIZE: usize = 32 * 1_024;

/// Size of the per-record header
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// Physical record type
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordType {
    /// Whole payload in one record
    Full,

    /// First fragment of a payload
    First,

    /// Interior fragment of a payload
    Middle,

    /// Final fragment of a payload
    Last,
}

impl From<RecordType> for u8 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::Full => 1,
            RecordType::First => 2,
            RecordType::Middle => 3,
            RecordType::Last => 4,
        }
    }
}

impl TryFrom<u8> for RecordType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Full),
            2 => Ok(Self::First),
            3 => Ok(Self::Middle),
            4 => Ok(Self::Last),
            _ => Err(()),
        }
    }
}
