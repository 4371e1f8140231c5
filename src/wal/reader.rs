// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{RecordType, BLOCK_SIZE, HEADER_SIZE};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Replays framed records from a log file in append order
///
/// A torn record at the end of the log (crash during append) terminates
/// the replay gracefully. Any malformed interior record does as well,
/// unless `strict` is set, in which case it surfaces as a
/// [`Corruption`](crate::Error::Corruption) error.
pub struct Reader {
    file: File,
    path: PathBuf,
    strict: bool,

    block: Vec<u8>,
    block_len: usize,
    offset: usize,
    eof: bool,
}

impl Reader {
    /// Opens a log file for replay.
    pub fn new(path: &Path, strict: bool) -> crate::Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            file,
            path: path.into(),
            strict,
            block: vec![0; BLOCK_SIZE],
            block_len: 0,
            offset: 0,
            eof: false,
        })
    }

    /// Reads the next logical record, reassembling fragments.
    ///
    /// Returns `Ok(None)` once the log is exhausted (or truncated).
    pub fn read_record(&mut self) -> crate::Result<Option<Vec<u8>>> {
        let mut payload = vec![];
        let mut in_fragmented_record = false;

        loop {
            let Some((record_type, data)) = self.read_physical_record()? else {
                if in_fragmented_record {
                    // Lost the tail of a spanning record
                    return self.fail("log ended mid-record");
                }
                return Ok(None);
            };

            match record_type {
                RecordType::Full => {
                    if in_fragmented_record {
                        return self.fail("unexpected Full record amidst fragments");
                    }
                    return Ok(Some(data));
                }
                RecordType::First => {
                    if in_fragmented_record {
                        return self.fail("unexpected First record amidst fragments");
                    }
                    in_fragmented_record = true;
                    payload = data;
                }
                RecordType::Middle => {
                    if !in_fragmented_record {
                        return self.fail("orphaned Middle record");
                    }
                    payload.extend_from_slice(&data);
                }
                RecordType::Last => {
                    if !in_fragmented_record {
                        return self.fail("orphaned Last record");
                    }
                    payload.extend_from_slice(&data);
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Reads one physical record off the current block, refilling as needed.
    fn read_physical_record(&mut self) -> crate::Result<Option<(RecordType, Vec<u8>)>> {
        loop {
            if self.block_len - self.offset < HEADER_SIZE {
                if !self.refill_block()? {
                    return Ok(None);
                }
                continue;
            }

            let Some(header) = self.block.get(self.offset..self.offset + HEADER_SIZE) else {
                return Ok(None);
            };

            let checksum = LittleEndian::read_u32(header.get(0..4).unwrap_or_default());
            let length = usize::from(LittleEndian::read_u16(header.get(4..6).unwrap_or_default()));
            let type_raw = header.get(6).copied().unwrap_or_default();

            if checksum == 0 && length == 0 && type_raw == 0 {
                // Zero-padded block trailer
                self.offset = self.block_len;
                continue;
            }

            let data_start = self.offset + HEADER_SIZE;
            let data_end = data_start + length;

            if data_end > self.block_len {
                // Torn write at the end of the file
                return self.fail("record spills over block contents");
            }

            let Some(data) = self.block.get(data_start..data_end) else {
                return Ok(None);
            };

            let Ok(record_type) = RecordType::try_from(type_raw) else {
                return self.fail("invalid record type");
            };

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&[type_raw]);
            hasher.update(data);

            if hasher.finalize() != checksum {
                return self.fail("record checksum mismatch");
            }

            let data = data.to_vec();
            self.offset = data_end;

            return Ok(Some((record_type, data)));
        }
    }

    /// Pulls the next block off the file. Returns `false` on EOF.
    fn refill_block(&mut self) -> crate::Result<bool> {
        if self.eof {
            return Ok(false);
        }

        let mut filled = 0;

        while filled < BLOCK_SIZE {
            let Some(buf) = self.block.get_mut(filled..) else {
                break;
            };

            let n = self.file.read(buf)?;

            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }

        self.block_len = filled;
        self.offset = 0;

        Ok(filled >= HEADER_SIZE)
    }

    /// Ends the replay, either loudly (strict) or with a warning.
    fn fail<T>(&mut self, msg: &str) -> crate::Result<Option<T>> {
        self.offset = self.block_len;
        self.eof = true;

        if self.strict {
            return Err(crate::Error::corruption(format!(
                "{msg} in {:?}",
                self.path
            )));
        }

        log::warn!("Dropping log tail: {msg} in {:?}", self.path);

        Ok(None)
    }
}
