// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded, persistent, ordered key-value storage engine based on a
//! log-structured merge tree.
//!
//! Keys and values are arbitrary byte strings; keys are ordered by
//! unsigned lexicographic comparison. Writes first hit a write-ahead
//! log and an in-memory table, which is flushed into immutable sorted
//! table files once it fills up. A background worker merges table files
//! down a hierarchy of levels, keeping reads fast and space bounded.
//!
//! Features:
//!
//! - Durable point writes and deletes (write-ahead logged, batchable)
//! - Point reads and ordered range iteration
//! - Multi-version snapshot reads
//! - Crash recovery (manifest + log replay)
//! - Single-process exclusivity via a folder lock file
//!
//! # Example usage
//!
//! ```
//! use talus::{Batch, Config};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let db = Config::new(&folder).open()?;
//!
//! db.insert("my_key", "my_value", &Default::default())?;
//!
//! let item = db.get("my_key", &Default::default())?;
//! assert_eq!(Some("my_value".as_bytes().into()), item);
//!
//! // Atomic multi-key writes
//! let mut batch = Batch::new();
//! batch.insert("a", "1");
//! batch.remove("my_key");
//! db.write(batch, &Default::default())?;
//!
//! // Time travel
//! let snapshot = db.snapshot();
//! db.insert("a", "2", &Default::default())?;
//!
//! let opts = talus::ReadOptions::default().snapshot(&snapshot);
//! assert_eq!(Some("1".as_bytes().into()), db.get("a", &opts)?);
//! assert_eq!(Some("2".as_bytes().into()), db.get("a", &Default::default())?);
//!
//! // Ordered iteration
//! for item in db.iter(&Default::default())? {
//!     let (key, value) = item?;
//!     // ...
//! }
//! #
//! # Ok::<(), talus::Error>(())
//! ```

#![doc(html_root_url = "https://docs.rs/talus")]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![warn(clippy::multiple_crate_versions)]

pub(crate) type HashSet<K> = std::collections::HashSet<K, rustc_hash::FxBuildHasher>;

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e.into())),
        }
    };
}

#[doc(hidden)]
pub mod batch;

#[doc(hidden)]
pub mod binary_search;

mod checksum;

#[doc(hidden)]
pub mod coding;

#[doc(hidden)]
pub mod compaction;

mod compression;
mod config;
mod db;
mod error;

#[doc(hidden)]
pub mod file;

mod flock;

#[doc(hidden)]
pub mod key;

#[doc(hidden)]
pub mod key_range;

#[doc(hidden)]
pub mod memtable;

#[doc(hidden)]
pub mod merge;

mod seqno;
mod slice;
mod snapshot;

#[doc(hidden)]
pub mod stop_signal;

#[doc(hidden)]
pub mod table;

#[doc(hidden)]
pub mod value;

#[doc(hidden)]
pub mod version;

#[doc(hidden)]
pub mod wal;

/// KV-tuple, typically returned by an iterator
pub type KvPair = (UserKey, UserValue);

#[doc(hidden)]
pub use {
    key::InternalKey,
    merge::{BoxedIterator, MergeIterator},
    value::InternalValue,
};

pub use {
    batch::Batch,
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
    compression::CompressionType,
    config::{Config, ReadOptions, WriteOptions},
    db::{Db, DbIterator},
    error::{Error, Result},
    memtable::Memtable,
    seqno::SequenceNumberCounter,
    slice::Slice,
    snapshot::Snapshot,
    value::{SeqNo, ValueType},
};

/// User defined key
pub type UserKey = Slice;

/// User defined data (byte array)
pub type UserValue = Slice;

pub(crate) use fail_iter;
