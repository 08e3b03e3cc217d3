//! Test Support
//!
//! A deterministic, in-process queue manager driven by `ManualClock`.
//! It implements the collaborator interface the scheduler expects, with
//! enough pump/priority fidelity for scheduling tests: tests and the
//! bundled example drive it by hand with `run_pending_tasks`,
//! `advance_time` and `wake_up`.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::queue::{
    PumpPolicy, QueuePriority, QueueRole, TaskFn, TaskObserver, TaskQueueManager, TaskRunner,
};
use crate::time::{ManualClock, TimeSource};

struct DelayedEntry {
    run_time: Instant,
    seq: u64,
    role: QueueRole,
    task: TaskFn,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_time == other.run_time && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.run_time, self.seq).cmp(&(other.run_time, other.seq))
    }
}

struct FakeQueue {
    enabled: bool,
    priority: QueuePriority,
    pump_policy: PumpPolicy,
    /// Tasks eligible for selection
    ready: VecDeque<TaskFn>,
    /// Tasks waiting on a pump or wakeup
    incoming: VecDeque<TaskFn>,
}

impl FakeQueue {
    fn new() -> Self {
        Self {
            enabled: true,
            priority: QueuePriority::Normal,
            pump_policy: PumpPolicy::Auto,
            ready: VecDeque::new(),
            incoming: VecDeque::new(),
        }
    }
}

struct FakeInner {
    queues: [FakeQueue; QueueRole::COUNT],
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    next_seq: u64,
    work_batch_size: usize,
    observers: Vec<Arc<dyn TaskObserver>>,
    posted_counts: [usize; QueueRole::COUNT],
    disable_counts: [usize; QueueRole::COUNT],
}

impl FakeInner {
    /// Highest-priority enabled queue with ready work; role order breaks
    /// ties.
    fn take_next_ready(&mut self) -> Option<TaskFn> {
        let mut best: Option<usize> = None;
        for role in QueueRole::ALL {
            let queue = &self.queues[role.index()];
            if !queue.enabled || queue.ready.is_empty() {
                continue;
            }
            match best {
                None => best = Some(role.index()),
                Some(current) => {
                    if queue.priority < self.queues[current].priority {
                        best = Some(role.index());
                    }
                }
            }
        }
        best.and_then(|index| self.queues[index].ready.pop_front())
    }
}

/// In-process queue manager for deterministic scheduler tests
pub struct FakeTaskQueueManager {
    clock: Arc<ManualClock>,
    weak_self: Weak<FakeTaskQueueManager>,
    inner: Mutex<FakeInner>,
}

impl FakeTaskQueueManager {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            clock,
            weak_self: weak.clone(),
            inner: Mutex::new(FakeInner {
                queues: std::array::from_fn(|_| FakeQueue::new()),
                delayed: BinaryHeap::new(),
                next_seq: 0,
                work_batch_size: 1,
                observers: Vec::new(),
                posted_counts: [0; QueueRole::COUNT],
                disable_counts: [0; QueueRole::COUNT],
            }),
        })
    }

    fn post(&self, role: QueueRole, task: TaskFn, delay: Option<Duration>) {
        let mut inner = self.inner.lock().unwrap();
        inner.posted_counts[role.index()] += 1;
        match delay {
            Some(delay) => {
                let run_time = self.clock.now() + delay;
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.delayed.push(Reverse(DelayedEntry {
                    run_time,
                    seq,
                    role,
                    task,
                }));
            }
            None => {
                let queue = &mut inner.queues[role.index()];
                match queue.pump_policy {
                    PumpPolicy::Auto => queue.ready.push_back(task),
                    PumpPolicy::Manual | PumpPolicy::AfterWakeup => queue.incoming.push_back(task),
                }
            }
        }
    }

    /// Run tasks in priority order until no runnable queue has work left
    pub fn run_pending_tasks(&self) {
        loop {
            let task = self.inner.lock().unwrap().take_next_ready();
            let Some(task) = task else {
                break;
            };
            let observers: Vec<_> = self.inner.lock().unwrap().observers.clone();
            for observer in &observers {
                observer.will_process_task();
            }
            task();
            for observer in &observers {
                observer.did_process_task();
            }
        }
    }

    /// Simulate the thread waking from sleep: due delayed tasks land on
    /// their queues and after-wakeup queues are pumped.
    pub fn wake_up(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        loop {
            let due = matches!(
                inner.delayed.peek(),
                Some(Reverse(entry)) if entry.run_time <= now
            );
            if !due {
                break;
            }
            let Reverse(entry) = inner.delayed.pop().unwrap();
            let queue = &mut inner.queues[entry.role.index()];
            match queue.pump_policy {
                PumpPolicy::Manual => queue.incoming.push_back(entry.task),
                // A due delayed task is itself a wakeup.
                PumpPolicy::Auto | PumpPolicy::AfterWakeup => queue.ready.push_back(entry.task),
            }
        }
        for queue in &mut inner.queues {
            if queue.pump_policy == PumpPolicy::AfterWakeup {
                while let Some(task) = queue.incoming.pop_front() {
                    queue.ready.push_back(task);
                }
            }
        }
    }

    /// Advance the clock, waking for each due delayed task in order
    pub fn advance_time(&self, delta: Duration) {
        let target = self.clock.now() + delta;
        self.run_pending_tasks();
        loop {
            match self.next_pending_delayed_task_time() {
                Some(due) if due <= target => {
                    let now = self.clock.now();
                    if due > now {
                        self.clock.advance(due - now);
                    }
                    self.wake_up();
                    self.run_pending_tasks();
                }
                _ => break,
            }
        }
        let now = self.clock.now();
        if target > now {
            self.clock.advance(target - now);
        }
    }

    /// Cumulative number of tasks posted to a role
    pub fn posted_count(&self, role: QueueRole) -> usize {
        self.inner.lock().unwrap().posted_counts[role.index()]
    }

    /// Cumulative number of `disable_queue` calls for a role
    pub fn disable_count(&self, role: QueueRole) -> usize {
        self.inner.lock().unwrap().disable_counts[role.index()]
    }

    pub fn queue_priority(&self, role: QueueRole) -> QueuePriority {
        self.inner.lock().unwrap().queues[role.index()].priority
    }

    /// Ready plus incoming task count for a role
    pub fn task_count(&self, role: QueueRole) -> usize {
        let inner = self.inner.lock().unwrap();
        let queue = &inner.queues[role.index()];
        queue.ready.len() + queue.incoming.len()
    }

    pub fn work_batch_size(&self) -> usize {
        self.inner.lock().unwrap().work_batch_size
    }
}

impl TaskQueueManager for FakeTaskQueueManager {
    fn task_runner(&self, role: QueueRole) -> Arc<dyn TaskRunner> {
        Arc::new(FakeTaskRunner {
            role,
            manager: self.weak_self.clone(),
        })
    }

    fn set_queue_priority(&self, role: QueueRole, priority: QueuePriority) {
        self.inner.lock().unwrap().queues[role.index()].priority = priority;
    }

    fn enable_queue(&self, role: QueueRole) {
        self.inner.lock().unwrap().queues[role.index()].enabled = true;
    }

    fn disable_queue(&self, role: QueueRole) {
        let mut inner = self.inner.lock().unwrap();
        inner.disable_counts[role.index()] += 1;
        inner.queues[role.index()].enabled = false;
    }

    fn is_queue_enabled(&self, role: QueueRole) -> bool {
        self.inner.lock().unwrap().queues[role.index()].enabled
    }

    fn is_queue_empty(&self, role: QueueRole) -> bool {
        let inner = self.inner.lock().unwrap();
        let queue = &inner.queues[role.index()];
        queue.ready.is_empty() && queue.incoming.is_empty()
    }

    fn pump_queue(&self, role: QueueRole) {
        let mut inner = self.inner.lock().unwrap();
        let queue = &mut inner.queues[role.index()];
        while let Some(task) = queue.incoming.pop_front() {
            queue.ready.push_back(task);
        }
    }

    fn set_pump_policy(&self, role: QueueRole, policy: PumpPolicy) {
        self.inner.lock().unwrap().queues[role.index()].pump_policy = policy;
    }

    fn next_pending_delayed_task_time(&self) -> Option<Instant> {
        self.inner
            .lock()
            .unwrap()
            .delayed
            .peek()
            .map(|Reverse(entry)| entry.run_time)
    }

    fn set_work_batch_size(&self, batch_size: usize) {
        self.inner.lock().unwrap().work_batch_size = batch_size;
    }

    fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.inner.lock().unwrap().observers.push(observer);
    }

    fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        self.inner
            .lock()
            .unwrap()
            .observers
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }
}

struct FakeTaskRunner {
    role: QueueRole,
    manager: Weak<FakeTaskQueueManager>,
}

impl TaskRunner for FakeTaskRunner {
    fn post_task(&self, task: TaskFn) {
        if let Some(manager) = self.manager.upgrade() {
            manager.post(self.role, task, None);
        }
    }

    fn post_delayed_task(&self, task: TaskFn, delay: Duration) {
        if let Some(manager) = self.manager.upgrade() {
            manager.post(self.role, task, Some(delay));
        }
    }
}
