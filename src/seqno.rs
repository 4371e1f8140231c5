// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{value::MAX_SEQNO, SeqNo};
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire, Release},
    },
    Arc,
};

/// Thread-safe sequence number generator
#[derive(Clone, Default, Debug)]
pub struct SequenceNumberCounter(Arc<AtomicU64>);

impl SequenceNumberCounter {
    /// Creates a new counter, setting it to some previous value
    #[must_use]
    pub fn new(prev: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Gets the current sequence number, without incrementing the counter.
    ///
    /// This is the sequence number a snapshot is pinned to.
    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.0.load(Acquire)
    }

    /// Gets the next sequence number.
    #[must_use]
    #[allow(clippy::missing_panics_doc, reason = "we should never run out of u64s")]
    pub fn next(&self) -> SeqNo {
        let seqno = self.0.fetch_add(1, Release) + 1;

        // The tag reserves the low byte for the value type,
        // so sequence numbers are 56 bits.
        assert!(seqno <= MAX_SEQNO, "Ran out of sequence numbers");

        seqno
    }

    /// Sets the sequence number.
    pub fn set(&self, seqno: SeqNo) {
        self.0.store(seqno, Release);
    }

    /// Maximizes the sequence number.
    pub fn fetch_max(&self, seqno: SeqNo) {
        self.0.fetch_max(seqno, AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    #[test]
    fn seqno_next_is_one_based() {
        let counter = super::SequenceNumberCounter::default();
        assert_eq!(0, counter.get());
        assert_eq!(1, counter.next());
        assert_eq!(1, counter.get());
    }

    #[test]
    #[should_panic = "Ran out of sequence numbers"]
    fn seqno_max() {
        let counter = super::SequenceNumberCounter::new(super::MAX_SEQNO);
        let _ = counter.next();
    }
}
