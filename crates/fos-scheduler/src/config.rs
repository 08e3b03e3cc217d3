//! Scheduler Configuration

use std::time::Duration;

/// Invalid scheduler tuning
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("priority escalation window must be non-zero")]
    ZeroEscalationWindow,

    #[error("maximum idle period must be non-zero")]
    ZeroMaxIdlePeriod,

    #[error("long idle period retry delay must be non-zero")]
    ZeroRetryDelay,

    #[error("work batch size must be at least 1")]
    ZeroWorkBatchSize,
}

/// Scheduler tunables
///
/// The defaults are starting points, not contracts; deployments are
/// expected to retune them against end-to-end latency measurements.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long input keeps an escalated policy justified
    pub priority_escalation_after_input: Duration,

    /// Upper bound on a single long idle period
    pub max_idle_period: Duration,

    /// Delay before re-attempting a long idle period that could not start
    pub retry_initiate_long_idle_period_delay: Duration,

    /// Tasks run per scheduling pass
    pub work_batch_size: usize,

    /// Whether long idle periods may be entered at all
    pub long_idle_periods_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            priority_escalation_after_input: Duration::from_millis(150),
            max_idle_period: Duration::from_millis(50),
            retry_initiate_long_idle_period_delay: Duration::from_millis(1),
            work_batch_size: 1,
            long_idle_periods_enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Check the tunables for values that would stall the scheduler
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.priority_escalation_after_input.is_zero() {
            return Err(ConfigError::ZeroEscalationWindow);
        }
        if self.max_idle_period.is_zero() {
            return Err(ConfigError::ZeroMaxIdlePeriod);
        }
        if self.retry_initiate_long_idle_period_delay.is_zero() {
            return Err(ConfigError::ZeroRetryDelay);
        }
        if self.work_batch_size == 0 {
            return Err(ConfigError::ZeroWorkBatchSize);
        }
        Ok(())
    }
}
