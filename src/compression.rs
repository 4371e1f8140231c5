// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Compression algorithm to use for table blocks
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression
    ///
    /// Not recommended.
    #[cfg_attr(not(feature = "lz4"), default)]
    None,

    /// LZ4 compression
    ///
    /// Recommended for use cases with a focus
    /// on speed over compression ratio.
    #[cfg(feature = "lz4")]
    #[cfg_attr(feature = "lz4", default)]
    Lz4,
}

impl From<CompressionType> for u8 {
    fn from(val: CompressionType) -> Self {
        match val {
            CompressionType::None => 0,

            #[cfg(feature = "lz4")]
            CompressionType::Lz4 => 1,
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),

            #[cfg(feature = "lz4")]
            1 => Ok(Self::Lz4),

            _ => Err(()),
        }
    }
}

impl std::fmt::Display for CompressionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "no compression",

                #[cfg(feature = "lz4")]
                Self::Lz4 => "lz4",
            }
        )
    }
}

impl CompressionType {
    /// Compresses a byte buffer.
    #[must_use]
    pub fn compress(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None => data.to_vec(),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::compress_prepend_size(data),
        }
    }

    /// Decompresses a byte buffer.
    pub fn decompress(self, data: &[u8]) -> crate::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),

            #[cfg(feature = "lz4")]
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|_| crate::Error::Decompress(self)),
        }
    }
}
