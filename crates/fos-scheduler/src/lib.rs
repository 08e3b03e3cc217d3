//! fOS Scheduler
//!
//! Main thread task scheduling for the fOS browser engine.
//!
//! Multiplexes the renderer main thread's logical work queues (control,
//! default, compositor, loading, idle) onto one thread and retunes
//! per-queue priority from input and frame signals delivered by the
//! compositor thread. Task storage and pumping live behind the
//! [`TaskQueueManager`] collaborator; this crate only decides when and
//! in what order already-enqueued work runs.
//!
//! # Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use fos_scheduler::{MainThreadScheduler, MonotonicClock, SchedulerConfig};
//!
//! let scheduler = MainThreadScheduler::new(queues, Arc::new(MonotonicClock::new()), SchedulerConfig::default());
//! scheduler.default_task_runner().post_task(Box::new(|| { /* work */ }));
//! ```

mod checker;
mod config;
mod deferred;
mod idle;
mod input;
mod policy;
mod queue;
mod scheduler;
mod signal;
mod time;

pub mod testing;

pub use config::{ConfigError, SchedulerConfig};
pub use idle::IdlePeriodState;
pub use input::{InputEvent, InputEventKind, InputStreamState, compute_stream_state};
pub use policy::Policy;
pub use queue::{
    PumpPolicy, QueuePriority, QueueRole, TaskFn, TaskObserver, TaskQueueManager, TaskRunner,
};
pub use scheduler::{BeginFrameArgs, IdleTaskRunner, MainThreadScheduler, SchedulerSnapshot};
pub use time::{ManualClock, MonotonicClock, TimeSource};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
