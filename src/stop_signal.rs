// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A shared handle to tell the background worker to stop
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Signals a stop.
    pub fn send(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if a stop was signalled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::StopSignal;
    use test_log::test;

    #[test]
    fn stop_signal() {
        let signal = StopSignal::default();
        assert!(!signal.is_stopped());

        let clone = signal.clone();
        clone.send();
        assert!(signal.is_stopped());
    }
}
