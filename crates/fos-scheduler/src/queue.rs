//! Task Queues
//!
//! Queue roles, priority tiers and the interface to the external queue
//! manager that stores, pumps and selects tasks. The scheduler itself
//! never holds tasks; it only decides which queue runs next and at what
//! priority.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit of work
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Logical work queues multiplexed onto the main thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Internal scheduler control work, runs before everything else
    Control,
    /// Control work eligible only after the thread wakes from sleep
    ControlAfterWakeup,
    /// Default application work
    Default,
    /// Compositor-sensitive work (input response, animation)
    Compositor,
    /// Resource loading work
    Loading,
    /// Best-effort work for idle periods
    Idle,
}

impl QueueRole {
    /// All roles, in selection tie-break order
    pub const ALL: [QueueRole; 6] = [
        QueueRole::Control,
        QueueRole::ControlAfterWakeup,
        QueueRole::Default,
        QueueRole::Compositor,
        QueueRole::Loading,
        QueueRole::Idle,
    ];

    /// Number of queue roles
    pub const COUNT: usize = 6;

    /// Queue name for logs and traces
    pub fn name(&self) -> &'static str {
        match self {
            Self::Control => "control_tq",
            Self::ControlAfterWakeup => "control_after_wakeup_tq",
            Self::Default => "default_tq",
            Self::Compositor => "compositor_tq",
            Self::Loading => "loading_tq",
            Self::Idle => "idle_tq",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Control => 0,
            Self::ControlAfterWakeup => 1,
            Self::Default => 2,
            Self::Compositor => 3,
            Self::Loading => 4,
            Self::Idle => 5,
        }
    }
}

/// Priority tiers, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueuePriority {
    /// Internal control work; not user-visible
    Control,
    /// Raised above normal while input demands it
    High,
    /// The even default tier
    Normal,
    /// Runs only when nothing above it wants the thread
    BestEffort,
}

impl QueuePriority {
    /// Priority name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::High => "high",
            Self::Normal => "normal",
            Self::BestEffort => "best_effort",
        }
    }
}

/// When a queue's incoming tasks become eligible to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpPolicy {
    /// Tasks become runnable as soon as they are posted
    Auto,
    /// Tasks become runnable only on an explicit pump
    Manual,
    /// Tasks become runnable when the thread next wakes from sleep
    AfterWakeup,
}

/// Posts tasks onto one queue
pub trait TaskRunner: Send + Sync {
    /// Enqueue a task for immediate eligibility
    fn post_task(&self, task: TaskFn);

    /// Enqueue a task that becomes eligible after `delay`
    fn post_delayed_task(&self, task: TaskFn, delay: Duration);
}

/// Observes task execution on the managed queues
pub trait TaskObserver: Send + Sync {
    /// A task is about to run
    fn will_process_task(&self);

    /// A task finished running
    fn did_process_task(&self);
}

/// External queue storage/pump/selection collaborator
///
/// Setting a priority does not change enabled state; `enable_queue` and
/// `disable_queue` are the only operations that do.
pub trait TaskQueueManager: Send + Sync {
    /// Submission handle for the given role
    fn task_runner(&self, role: QueueRole) -> Arc<dyn TaskRunner>;

    /// Assign a queue's priority tier
    fn set_queue_priority(&self, role: QueueRole, priority: QueuePriority);

    /// Allow a queue to be selected
    fn enable_queue(&self, role: QueueRole);

    /// Stop selecting from a queue; its tasks are held, not dropped
    fn disable_queue(&self, role: QueueRole);

    fn is_queue_enabled(&self, role: QueueRole) -> bool;

    /// True when the queue holds no runnable or incoming tasks
    fn is_queue_empty(&self, role: QueueRole) -> bool;

    /// Move a manually pumped queue's incoming tasks to its work queue
    fn pump_queue(&self, role: QueueRole);

    fn set_pump_policy(&self, role: QueueRole, policy: PumpPolicy);

    /// Earliest fire time over all pending delayed tasks
    fn next_pending_delayed_task_time(&self) -> Option<Instant>;

    /// Tasks run per scheduling pass before re-selecting
    fn set_work_batch_size(&self, batch_size: usize);

    fn add_task_observer(&self, observer: Arc<dyn TaskObserver>);

    fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>);
}
