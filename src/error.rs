// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Checksum, CompressionType, DecodeError, EncodeError};
use std::sync::Arc;

/// Represents errors that can occur in the storage engine
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Decompression failed
    Decompress(CompressionType),

    /// Invalid checksum value (got, expected)
    ChecksumMismatch {
        /// Checksum that was computed from the read data
        got: Checksum,

        /// Checksum that was stored on disk
        expected: Checksum,
    },

    /// On-disk data (manifest, log or table) violates the expected format
    Corruption(String),

    /// Invalid user-supplied argument or option
    InvalidArgument(String),

    /// Another process holds the database lock
    Busy,

    /// The database is being (or has been) shut down
    ShuttingDown,

    /// A previous background task failed; the engine is read-only
    ///
    /// The original error is kept around so subsequent writes
    /// surface the same failure.
    Background(Arc<Error>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TalusError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Background(e) => Some(e),
            Self::Decompress(_)
            | Self::ChecksumMismatch { .. }
            | Self::Corruption(_)
            | Self::InvalidArgument(_)
            | Self::Busy
            | Self::ShuttingDown => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl Error {
    pub(crate) fn corruption<S: Into<String>>(msg: S) -> Self {
        Self::Corruption(msg.into())
    }
}

/// Engine result
pub type Result<T> = std::result::Result<T, Error>;
