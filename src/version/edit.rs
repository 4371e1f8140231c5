// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::FileMetadata;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::key::InternalKey;
use crate::SeqNo;
use byteorder::WriteBytesExt;
use std::io::{Read, Write};
use std::sync::Arc;
use varint_rs::{VarintReader, VarintWriter};

// Manifest record field tags
const TAG_LOG_NUMBER: u8 = 2;
const TAG_NEXT_FILE_NUMBER: u8 = 3;
const TAG_LAST_SEQNO: u8 = 4;
const TAG_COMPACT_POINTER: u8 = 5;
const TAG_DELETED_FILE: u8 = 6;
const TAG_NEW_FILE: u8 = 7;

/// A delta between two versions
///
/// Written to the manifest before it is applied; replaying all edits of
/// a manifest reproduces the exact file layout and counters.
#[derive(Default)]
pub struct VersionEdit {
    /// Oldest write-ahead log that is still needed
    pub log_number: Option<u64>,

    /// File number counter watermark
    pub next_file_number: Option<u64>,

    /// Sequence number watermark
    pub last_seqno: Option<SeqNo>,

    /// Where the next size-triggered compaction of a level resumes
    pub compact_pointers: Vec<(usize, InternalKey)>,

    /// Files removed by this edit, per level
    pub deleted_files: Vec<(usize, u64)>,

    /// Files added by this edit, per level
    pub new_files: Vec<(usize, Arc<FileMetadata>)>,
}

impl std::fmt::Debug for VersionEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "VersionEdit(log={:?}, next_file={:?}, last_seqno={:?}, +{} files, -{} files)",
            self.log_number,
            self.next_file_number,
            self.last_seqno,
            self.new_files.len(),
            self.deleted_files.len(),
        )
    }
}

impl VersionEdit {
    pub fn add_file(&mut self, level: usize, file: Arc<FileMetadata>) {
        self.new_files.push((level, file));
    }

    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.push((level, file_number));
    }
}

impl Encode for VersionEdit {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        if let Some(log_number) = self.log_number {
            writer.write_u8(TAG_LOG_NUMBER)?;
            writer.write_u64_varint(log_number)?;
        }

        if let Some(next_file_number) = self.next_file_number {
            writer.write_u8(TAG_NEXT_FILE_NUMBER)?;
            writer.write_u64_varint(next_file_number)?;
        }

        if let Some(last_seqno) = self.last_seqno {
            writer.write_u8(TAG_LAST_SEQNO)?;
            writer.write_u64_varint(last_seqno)?;
        }

        for (level, key) in &self.compact_pointers {
            writer.write_u8(TAG_COMPACT_POINTER)?;
            writer.write_u32_varint(*level as u32)?;
            key.encode_into(writer)?;
        }

        for (level, file_number) in &self.deleted_files {
            writer.write_u8(TAG_DELETED_FILE)?;
            writer.write_u32_varint(*level as u32)?;
            writer.write_u64_varint(*file_number)?;
        }

        for (level, file) in &self.new_files {
            writer.write_u8(TAG_NEW_FILE)?;
            writer.write_u32_varint(*level as u32)?;
            writer.write_u64_varint(file.file_number)?;
            writer.write_u64_varint(file.size)?;
            file.smallest.encode_into(writer)?;
            file.largest.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for VersionEdit {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut edit = Self::default();

        loop {
            let mut tag = [0];

            if reader.read(&mut tag)? == 0 {
                break;
            }

            match tag.first().copied().unwrap_or_default() {
                TAG_LOG_NUMBER => edit.log_number = Some(reader.read_u64_varint()?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(reader.read_u64_varint()?),
                TAG_LAST_SEQNO => edit.last_seqno = Some(reader.read_u64_varint()?),
                TAG_COMPACT_POINTER => {
                    let level = reader.read_u32_varint()? as usize;
                    let key = InternalKey::decode_from(reader)?;
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = reader.read_u32_varint()? as usize;
                    let file_number = reader.read_u64_varint()?;
                    edit.deleted_files.push((level, file_number));
                }
                TAG_NEW_FILE => {
                    let level = reader.read_u32_varint()? as usize;
                    let file_number = reader.read_u64_varint()?;
                    let size = reader.read_u64_varint()?;
                    let smallest = InternalKey::decode_from(reader)?;
                    let largest = InternalKey::decode_from(reader)?;

                    edit.new_files.push((
                        level,
                        Arc::new(FileMetadata::new(file_number, size, smallest, largest)),
                    ));
                }
                invalid => return Err(DecodeError::InvalidTag(("VersionEdit", invalid))),
            }
        }

        Ok(edit)
    }
}
