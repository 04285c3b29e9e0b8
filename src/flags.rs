// SPDX-License-Identifier: GPL-3.0-only

//! Blocking event-wait/wake synchronization between the orchestrator thread
//! and the core's notification thread.
//!
//! The notification callbacks OR pending event bits into the set; the
//! orchestrator blocks until at least one wanted bit (or the error bit) is
//! pending, then atomically consumes exactly the satisfied subset. Signaled
//! bits that were not waited for stay pending for a later wait.

use crate::core::CoreError;
use crate::events::{EventKind, EventSet};
use std::fmt;
use std::sync::{Condvar, Mutex};

/// Result of a failed wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The core reported an asynchronous error in place of the expected
    /// completion event. There is no recovery path for the command that was
    /// in flight; the pipeline must be torn down.
    Async(CoreError),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Async(code) => write!(f, "asynchronous core error: {}", code),
        }
    }
}

impl std::error::Error for WaitError {}

#[derive(Default)]
struct Pending {
    events: EventSet,
    /// Code of the most recent error event, consumed together with its bit.
    error: Option<CoreError>,
}

/// Per-component event-flag set shared between the calling thread (consumer)
/// and the notification callbacks (producer).
#[derive(Default)]
pub struct EventFlags {
    pending: Mutex<Pending>,
    wakeup: Condvar,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an event pending and wake any blocked waiter.
    ///
    /// Called from the notification callback context; safe to call
    /// concurrently with an in-progress [`wait`](Self::wait).
    pub fn signal(&self, kind: EventKind) {
        let mut pending = self.lock();
        pending.events.insert(kind);
        drop(pending);
        self.wakeup.notify_all();
    }

    /// Mark the error event pending, recording its cause.
    pub fn signal_error(&self, code: CoreError) {
        let mut pending = self.lock();
        pending.events.insert(EventKind::Error);
        pending.error = Some(code);
        drop(pending);
        self.wakeup.notify_all();
    }

    /// Block until at least one event in `wanted | error` is pending, then
    /// consume and return the satisfied subset.
    ///
    /// If the only satisfied bit is the error bit and the caller did not ask
    /// for it, the error is terminal: the wait consumes it and fails. No
    /// timeout is applied; a core that never completes a command blocks the
    /// caller indefinitely.
    pub fn wait(&self, wanted: EventSet) -> Result<EventSet, WaitError> {
        let watched = wanted | EventKind::Error;
        let mut pending = self.lock();
        loop {
            let satisfied = pending.events.intersection(watched);
            if !satisfied.is_empty() {
                pending.events = pending.events.difference(satisfied);
                if satisfied == EventKind::Error.bit() && !wanted.contains(EventKind::Error) {
                    let code = pending.error.take().unwrap_or(CoreError::Undefined);
                    return Err(WaitError::Async(code));
                }
                if satisfied.contains(EventKind::Error) {
                    pending.error = None;
                }
                return Ok(satisfied);
            }
            pending = self
                .wakeup
                .wait(pending)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        // A poisoned lock only means another thread panicked while signaling;
        // the bitmask is still coherent.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_only_wanted_bits_and_clears_them() {
        let flags = EventFlags::new();
        flags.signal(EventKind::StateSet);
        flags.signal(EventKind::PortEnabled);
        flags.signal(EventKind::FillBufferDone);

        let got = flags.wait(EventKind::StateSet | EventKind::PortDisabled).unwrap();
        assert_eq!(got, EventSet::from(EventKind::StateSet));

        // The unrelated bits stay pending for later waits.
        let got = flags.wait(EventKind::PortEnabled.bit()).unwrap();
        assert_eq!(got, EventSet::from(EventKind::PortEnabled));
        let got = flags.wait(EventKind::FillBufferDone.bit()).unwrap();
        assert_eq!(got, EventSet::from(EventKind::FillBufferDone));
    }

    #[test]
    fn wait_blocks_until_signaled() {
        let flags = Arc::new(EventFlags::new());
        let signaler = Arc::clone(&flags);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal(EventKind::PortDisabled);
        });

        let got = flags.wait(EventKind::PortDisabled.bit()).unwrap();
        assert_eq!(got, EventSet::from(EventKind::PortDisabled));
        handle.join().unwrap();
    }

    #[test]
    fn unwanted_error_is_terminal() {
        let flags = Arc::new(EventFlags::new());
        let signaler = Arc::clone(&flags);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal_error(CoreError::InsufficientResources);
        });

        let err = flags.wait(EventKind::StateSet.bit()).unwrap_err();
        assert_eq!(err, WaitError::Async(CoreError::InsufficientResources));
        handle.join().unwrap();
    }

    #[test]
    fn requested_error_returns_normally() {
        let flags = EventFlags::new();
        flags.signal_error(CoreError::Hardware);

        let got = flags.wait(EventKind::Error.bit()).unwrap();
        assert_eq!(got, EventSet::from(EventKind::Error));
    }

    #[test]
    fn error_alongside_wanted_bit_is_returned_not_terminal() {
        let flags = EventFlags::new();
        flags.signal(EventKind::StateSet);
        flags.signal_error(CoreError::Undefined);

        let got = flags
            .wait(EventKind::StateSet | EventKind::Error)
            .unwrap();
        assert!(got.contains(EventKind::StateSet));
        assert!(got.contains(EventKind::Error));
    }

    #[test]
    fn signaling_is_monotonic_until_consumed() {
        let flags = EventFlags::new();
        flags.signal(EventKind::StateSet);
        flags.signal(EventKind::StateSet);

        let got = flags.wait(EventKind::StateSet.bit()).unwrap();
        assert_eq!(got, EventSet::from(EventKind::StateSet));
        // A second signal of the same bit collapses into one pending event.
        flags.signal(EventKind::StateSet);
        let got = flags.wait(EventKind::StateSet.bit()).unwrap();
        assert_eq!(got, EventSet::from(EventKind::StateSet));
    }
}
