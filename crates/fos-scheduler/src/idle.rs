//! Idle Periods
//!
//! Idle period states and the long-idle-period decision, computed
//! against the next pending delayed task and a configured maximum.

use std::time::{Duration, Instant};

/// Where the scheduler is in the idle-period lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePeriodState {
    NotInIdlePeriod,
    /// Opportunistic window before the estimated next frame
    InShortIdlePeriod,
    /// No frames expected soon; bounded by pending delayed work
    InLongIdlePeriod,
    /// Long idle period at the configured maximum; idle work may assume
    /// a generous deadline and slightly overrun it
    InLongIdlePeriodWithMaxDeadline,
    /// A long idle period that is being closed out after a wakeup
    EndingLongIdlePeriod,
}

impl IdlePeriodState {
    /// State name for logs and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInIdlePeriod => "not_in_idle_period",
            Self::InShortIdlePeriod => "in_short_idle_period",
            Self::InLongIdlePeriod => "in_long_idle_period",
            Self::InLongIdlePeriodWithMaxDeadline => "in_long_idle_period_with_max_deadline",
            Self::EndingLongIdlePeriod => "ending_long_idle_period",
        }
    }

    /// True for every state inside an idle period
    pub fn is_in_idle_period(self) -> bool {
        self != Self::NotInIdlePeriod
    }
}

/// Inputs to the long-idle-period decision
#[derive(Debug, Clone, Copy)]
pub(crate) struct LongIdleInputs {
    /// Expiry of the touchstart policy, when one is in force
    pub touchstart_expiration: Option<Instant>,
    /// Earliest pending delayed task fire time
    pub next_pending_delayed_task: Option<Instant>,
    /// Configured upper bound on the period
    pub max_idle_period: Duration,
    /// Re-check delay when the period cannot start yet
    pub retry_delay: Duration,
}

/// Decide whether a long idle period may start now.
///
/// Returns the state to enter and the delay until the decision should be
/// revisited. When the state is `NotInIdlePeriod` the delay is a retry
/// hint; otherwise it is the idle period's duration.
pub(crate) fn compute_long_idle_period_state(
    now: Instant,
    inputs: &LongIdleInputs,
) -> (IdlePeriodState, Duration) {
    if let Some(expiration) = inputs.touchstart_expiration {
        // No idle work while a touchstart response is pending; try again
        // when that policy is due to end.
        return (
            IdlePeriodState::NotInIdlePeriod,
            expiration.saturating_duration_since(now),
        );
    }

    let duration = match inputs.next_pending_delayed_task {
        None => inputs.max_idle_period,
        Some(next) => next
            .saturating_duration_since(now)
            .min(inputs.max_idle_period),
    };

    if duration > Duration::ZERO {
        let state = if duration == inputs.max_idle_period {
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline
        } else {
            IdlePeriodState::InLongIdlePeriod
        };
        (state, duration)
    } else {
        (IdlePeriodState::NotInIdlePeriod, inputs.retry_delay)
    }
}
