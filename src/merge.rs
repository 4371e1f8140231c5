// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::value::InternalValue;
use std::iter::Peekable;

/// A boxed, fallible iterator over internal entries
pub type BoxedIterator<'a> = Box<dyn Iterator<Item = crate::Result<InternalValue>> + Send + 'a>;

/// Merges multiple iterators
///
/// This iterator can iterate through N iterators simultaneously in order.
/// This is achieved by advancing the iterator that yields the lowest item
/// and merging using a simple k-way merge algorithm.
///
/// All versions of all keys come through, ordered by internal key, so
/// entries for the same user key arrive newest first. Visibility and
/// garbage rules are applied by the consumers (read path, compaction).
#[allow(clippy::module_name_repetitions)]
pub struct MergeIterator<'a> {
    iterators: Vec<Peekable<BoxedIterator<'a>>>,
}

impl<'a> MergeIterator<'a> {
    /// Initializes a new merge iterator
    #[must_use]
    pub fn new(iterators: Vec<BoxedIterator<'a>>) -> Self {
        let iterators = iterators
            .into_iter()
            .map(Iterator::peekable)
            .collect::<Vec<_>>();

        Self { iterators }
    }

    fn get_min(&mut self) -> Option<crate::Result<InternalValue>> {
        let mut idx_with_err = None;

        for (idx, item) in self.iterators.iter_mut().map(Peekable::peek).enumerate() {
            if matches!(item, Some(Err(_))) {
                idx_with_err = Some(idx);
            }
        }

        if let Some(idx) = idx_with_err {
            return match self.iterators.get_mut(idx)?.next()? {
                Err(e) => Some(Err(e)),
                Ok(_) => unreachable!("just peeked an error"),
            };
        }

        let mut min: Option<(usize, &InternalValue)> = None;

        for (idx, item) in self.iterators.iter_mut().map(Peekable::peek).enumerate() {
            if let Some(Ok(item)) = item {
                if min.is_none_or(|(_, min_item)| item.key < min_item.key) {
                    min = Some((idx, item));
                }
            }
        }

        let (idx, _) = min?;

        self.iterators.get_mut(idx)?.next()
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = crate::Result<InternalValue>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_min()
    }
}
