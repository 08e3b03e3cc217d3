//! Incoming Signals
//!
//! Cross-thread state shared between the compositor thread and the
//! scheduler thread. Everything here is written under one lock; the
//! "policy may need update" flag is additionally readable without it.

use std::sync::MutexGuard;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::input::{InputEventKind, InputStreamState};

/// Signal state fed by compositor-thread notifications
#[derive(Debug)]
pub(crate) struct IncomingSignals {
    /// Current classification of the input stream
    pub input_stream_state: InputStreamState,
    /// Kind of the most recent input event
    pub last_input_kind: InputEventKind,
    /// When the compositor last received input
    pub last_input_receipt_on_compositor: Option<Instant>,
    /// When the scheduler thread last processed input; cleared on every
    /// new input event until the next commit or quiescent signal
    pub last_input_process_on_main: Option<Instant>,
}

impl IncomingSignals {
    pub fn new() -> Self {
        Self {
            input_stream_state: InputStreamState::Inactive,
            last_input_kind: InputEventKind::Undefined,
            last_input_receipt_on_compositor: None,
            last_input_process_on_main: None,
        }
    }
}

/// Single-producer flag marking a possibly stale policy.
///
/// Written only while the signals lock is held (the guard argument
/// enforces this at compile time) and read lock-free. A redundant
/// recompute is always safe, so a racy read is harmless; the flag only
/// bounds the number of pending recompute requests to one.
#[derive(Debug, Default)]
pub(crate) struct PolicyUpdateFlag {
    flag: AtomicBool,
}

impl PolicyUpdateFlag {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    pub fn set_while_locked(&self, _guard: &MutexGuard<'_, IncomingSignals>, value: bool) {
        self.flag.store(value, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
