// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Appends framed records to a log file
///
/// Bytes are handed to the OS after every record; they only hit
/// the disk for sure after [`Writer::sync`].
pub struct Writer {
    writer: BufWriter<File>,
    block_offset: usize,
}

impl Writer {
    /// Creates a new log file.
    pub fn create(path: &Path) -> crate::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            block_offset: 0,
        })
    }

    /// Appends one record, fragmenting it over block boundaries as needed.
    pub fn add_record(&mut self, payload: &[u8]) -> crate::Result<()> {
        let mut remaining = payload;
        let mut is_first_fragment = true;

        loop {
            let leftover = BLOCK_SIZE - self.block_offset;

            if leftover < HEADER_SIZE {
                // Zero-pad the block trailer; a header never straddles blocks
                if leftover > 0 {
                    const ZEROES: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

                    #[expect(clippy::indexing_slicing, reason = "leftover < HEADER_SIZE")]
                    self.writer.write_all(&ZEROES[..leftover])?;
                }
                self.block_offset = 0;
            }

            let space = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = remaining.len().min(space);

            let (fragment, rest) = remaining.split_at(fragment_len);
            let is_last_fragment = rest.is_empty();

            let record_type = match (is_first_fragment, is_last_fragment) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, false) => RecordType::Middle,
                (false, true) => RecordType::Last,
            };

            self.write_physical_record(record_type, fragment)?;

            if is_last_fragment {
                break;
            }

            remaining = rest;
            is_first_fragment = false;
        }

        self.writer.flush()?;

        Ok(())
    }

    fn write_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> crate::Result<()> {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[u8::from(record_type)]);
        hasher.update(data);

        self.writer.write_u32::<LittleEndian>(hasher.finalize())?;

        // NOTE: Fragments are capped by the block size, which is way below u16::MAX
        #[allow(clippy::cast_possible_truncation)]
        self.writer.write_u16::<LittleEndian>(data.len() as u16)?;

        self.writer.write_u8(u8::from(record_type))?;
        self.writer.write_all(data)?;

        self.block_offset += HEADER_SIZE + data.len();

        Ok(())
    }

    /// Persists all previously appended records to disk.
    pub fn sync(&mut self) -> crate::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}
