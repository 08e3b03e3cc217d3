//! Scheduling Policy
//!
//! The policy state machine: which priority regime the main thread is in
//! and for how long it remains justified.

use std::time::{Duration, Instant};

use crate::input::InputStreamState;
use crate::signal::IncomingSignals;

/// Active scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Even priorities across application queues
    Normal,
    /// Compositor work raised, loading demoted to best effort
    CompositorPriority,
    /// Compositor work raised, loading disabled until the page responds
    TouchstartPriority,
}

impl Policy {
    /// Policy name for logs and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::CompositorPriority => "compositor",
            Self::TouchstartPriority => "touchstart",
        }
    }
}

/// Compute the policy implied by the latest input signals.
///
/// Returns the policy and how long it remains justified; a zero duration
/// means no re-check needs to be scheduled. When the escalation window
/// has fully decayed the stream is reset to `Inactive`, so the next
/// compositor-side input event posts a fresh update.
pub(crate) fn compute_new_policy(
    signals: &mut IncomingSignals,
    compositor_queue_empty: bool,
    now: Instant,
    escalation_window: Duration,
) -> (Policy, Duration) {
    if signals.input_stream_state == InputStreamState::Inactive {
        return (Policy::Normal, Duration::ZERO);
    }

    let input_priority_policy =
        if signals.input_stream_state == InputStreamState::ActiveAwaitingTouchstartResponse {
            Policy::TouchstartPriority
        } else {
            Policy::CompositorPriority
        };

    let time_left =
        time_left_in_escalated_policy(signals, compositor_queue_empty, now, escalation_window);
    if time_left > Duration::ZERO {
        (input_priority_policy, time_left)
    } else {
        signals.input_stream_state = InputStreamState::Inactive;
        (Policy::Normal, Duration::ZERO)
    }
}

fn time_left_in_escalated_policy(
    signals: &IncomingSignals,
    compositor_queue_empty: bool,
    now: Instant,
    escalation_window: Duration,
) -> Duration {
    if signals.last_input_process_on_main.is_none() && !compositor_queue_empty {
        // The input event is still queued; stay escalated and check again
        // a full window later.
        return escalation_window;
    }

    // Otherwise the escalation ends a window after the last signal seen
    // on either thread.
    let last_signal = match (
        signals.last_input_receipt_on_compositor,
        signals.last_input_process_on_main,
    ) {
        (Some(receipt), Some(process)) => receipt.max(process),
        (Some(receipt), None) => receipt,
        (None, Some(process)) => process,
        (None, None) => return Duration::ZERO,
    };
    (last_signal + escalation_window).saturating_duration_since(now)
}
