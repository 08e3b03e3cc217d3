//! Main Thread Scheduler
//!
//! Multiplexes the renderer main thread's work queues onto one thread
//! and retunes per-queue priority from input and frame signals delivered
//! by the compositor thread.
//!
//! All policy and idle-period state is owned by the scheduler thread;
//! the compositor thread only ever touches the locked incoming-signal
//! state and posts recompute requests onto the control queue.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crate::checker::ThreadChecker;
use crate::config::SchedulerConfig;
use crate::deferred::{Cancelable, DeadlineRunner};
use crate::idle::{self, IdlePeriodState, LongIdleInputs};
use crate::input::{InputEvent, InputEventKind, InputStreamState, compute_stream_state};
use crate::policy::{self, Policy};
use crate::queue::{
    PumpPolicy, QueuePriority, QueueRole, TaskObserver, TaskQueueManager, TaskRunner,
};
use crate::signal::{IncomingSignals, PolicyUpdateFlag};
use crate::time::TimeSource;

/// Timing of an upcoming frame, as reported by the compositor
#[derive(Debug, Clone, Copy)]
pub struct BeginFrameArgs {
    /// When the frame began
    pub frame_time: Instant,
    /// Expected interval until the next frame
    pub interval: Duration,
}

/// State only ever touched from the scheduler thread
struct MainThreadOnly {
    /// Queue collaborator; `None` once shut down
    queues: Option<Arc<dyn TaskQueueManager>>,
    current_policy: Policy,
    /// When the current policy stops being justified, if it expires
    policy_expiration: Option<Instant>,
    idle_period_state: IdlePeriodState,
    /// Estimated start of the next frame; doubles as the idle deadline
    estimated_next_frame_begin: Option<Instant>,
    /// When the most recent idle period was closed out
    last_idle_period_end: Option<Instant>,
    /// Diagnostic count of idle periods that outlived their deadline
    idle_deadline_overruns: u64,
}

/// Renderer main thread scheduler.
///
/// Created with a queue collaborator that stores and pumps the actual
/// tasks; the scheduler assigns priorities, opens and closes idle
/// periods, and recomputes the scheduling policy when input or frame
/// signals arrive. Only the input/animation notification entry points
/// may be called off the scheduler thread.
pub struct MainThreadScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn TimeSource>,
    /// Reference point for snapshot timestamps
    birth: Instant,
    thread_checker: ThreadChecker,
    weak_self: Weak<MainThreadScheduler>,

    control_runner: Arc<dyn TaskRunner>,
    control_after_wakeup_runner: Arc<dyn TaskRunner>,
    default_runner: Arc<dyn TaskRunner>,
    compositor_runner: Arc<dyn TaskRunner>,
    loading_runner: Arc<dyn TaskRunner>,
    idle_queue_runner: Arc<dyn TaskRunner>,

    /// Cross-thread signal state; lock order is signals before `main`
    incoming_signals: Mutex<IncomingSignals>,
    policy_may_need_update: PolicyUpdateFlag,
    main: Mutex<MainThreadOnly>,

    delayed_update_policy: DeadlineRunner,
    end_idle_period_task: Cancelable,
    initiate_long_idle_period_task: Cancelable,
    initiate_long_idle_period_after_wakeup_task: Cancelable,
}

impl MainThreadScheduler {
    /// Create a scheduler over the given queue collaborator.
    ///
    /// Must be called on the thread that runs the queues.
    pub fn new(
        queues: Arc<dyn TaskQueueManager>,
        clock: Arc<dyn TimeSource>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let birth = clock.now();
        let work_batch_size = config.work_batch_size;

        let scheduler = Arc::new_cyclic(|weak: &Weak<Self>| {
            let control_runner = queues.task_runner(QueueRole::Control);
            let update_weak = weak.clone();
            let delayed_update_policy =
                DeadlineRunner::new(Arc::clone(&control_runner), move || {
                    if let Some(scheduler) = update_weak.upgrade() {
                        scheduler.update_policy();
                    }
                });

            Self {
                birth,
                thread_checker: ThreadChecker::new(),
                weak_self: weak.clone(),
                control_after_wakeup_runner: queues.task_runner(QueueRole::ControlAfterWakeup),
                default_runner: queues.task_runner(QueueRole::Default),
                compositor_runner: queues.task_runner(QueueRole::Compositor),
                loading_runner: queues.task_runner(QueueRole::Loading),
                idle_queue_runner: queues.task_runner(QueueRole::Idle),
                control_runner,
                incoming_signals: Mutex::new(IncomingSignals::new()),
                policy_may_need_update: PolicyUpdateFlag::new(),
                main: Mutex::new(MainThreadOnly {
                    queues: Some(Arc::clone(&queues)),
                    current_policy: Policy::Normal,
                    policy_expiration: None,
                    idle_period_state: IdlePeriodState::NotInIdlePeriod,
                    estimated_next_frame_begin: None,
                    last_idle_period_end: None,
                    idle_deadline_overruns: 0,
                }),
                delayed_update_policy,
                end_idle_period_task: Cancelable::new(),
                initiate_long_idle_period_task: Cancelable::new(),
                initiate_long_idle_period_after_wakeup_task: Cancelable::new(),
                clock,
                config,
            }
        });

        queues.set_queue_priority(QueueRole::Control, QueuePriority::Control);
        queues.set_queue_priority(QueueRole::ControlAfterWakeup, QueuePriority::Control);
        queues.set_pump_policy(QueueRole::ControlAfterWakeup, PumpPolicy::AfterWakeup);
        queues.disable_queue(QueueRole::Idle);
        queues.set_pump_policy(QueueRole::Idle, PumpPolicy::Manual);
        queues.set_work_batch_size(work_batch_size);

        tracing::debug!("main thread scheduler initialized");
        scheduler
    }

    /// Submission handle for default application work
    pub fn default_task_runner(&self) -> Arc<dyn TaskRunner> {
        self.thread_checker.assert_calling_thread();
        Arc::clone(&self.default_runner)
    }

    /// Submission handle for compositor-sensitive work
    pub fn compositor_task_runner(&self) -> Arc<dyn TaskRunner> {
        self.thread_checker.assert_calling_thread();
        Arc::clone(&self.compositor_runner)
    }

    /// Submission handle for resource loading work
    pub fn loading_task_runner(&self) -> Arc<dyn TaskRunner> {
        self.thread_checker.assert_calling_thread();
        Arc::clone(&self.loading_runner)
    }

    /// Submission handle for idle work; tasks receive the idle deadline
    pub fn idle_task_runner(&self) -> IdleTaskRunner {
        self.thread_checker.assert_calling_thread();
        IdleTaskRunner {
            idle_queue_runner: Arc::clone(&self.idle_queue_runner),
            after_wakeup_runner: Arc::clone(&self.control_after_wakeup_runner),
            scheduler: self.weak_self.clone(),
        }
    }

    /// The compositor is about to produce a frame.
    ///
    /// Ends any open idle period and refreshes the estimated next-frame
    /// time that bounds short idle periods.
    pub fn will_begin_frame(&self, args: BeginFrameArgs) {
        self.thread_checker.assert_calling_thread();
        if self.is_shutdown() {
            return;
        }
        tracing::trace!("will_begin_frame");

        self.end_idle_period();
        self.main.lock().unwrap().estimated_next_frame_begin =
            Some(args.frame_time + args.interval);
        // Approximates a dedicated input-processed notification; pending
        // input is considered handled once its frame begins.
        self.did_process_input_event(Some(args.frame_time));
    }

    /// The main thread's frame was committed to the compositor.
    ///
    /// Starts a short idle period when the commit beat the estimated
    /// next-frame time, scheduled to end exactly at that estimate.
    pub fn did_commit_frame_to_compositor(&self) {
        self.thread_checker.assert_calling_thread();
        if self.is_shutdown() {
            return;
        }
        tracing::trace!("did_commit_frame_to_compositor");

        let now = self.clock.now();
        let estimated = self.main.lock().unwrap().estimated_next_frame_begin;
        if let Some(estimated_next_frame_begin) = estimated {
            if now < estimated_next_frame_begin {
                self.start_idle_period(IdlePeriodState::InShortIdlePeriod);
                let weak = self.weak_self.clone();
                self.control_runner.post_delayed_task(
                    self.end_idle_period_task.wrap(move || {
                        if let Some(scheduler) = weak.upgrade() {
                            scheduler.end_idle_period();
                        }
                    }),
                    estimated_next_frame_begin - now,
                );
            }
        }
    }

    /// The compositor does not expect to need frames soon.
    pub fn begin_frame_not_expected_soon(&self) {
        self.thread_checker.assert_calling_thread();
        if self.is_shutdown() {
            return;
        }
        tracing::trace!("begin_frame_not_expected_soon");

        self.did_process_input_event(None);
        self.initiate_long_idle_period();
    }

    /// Input arrived on the compositor thread. Cross-thread-safe.
    ///
    /// Mouse moves with the left button held signal a drag that needs a
    /// smooth frame rate; other mouse-class and all keyboard-class
    /// events are not priority signals. Wheel events count as input.
    pub fn did_receive_input_event_on_compositor_thread(&self, event: InputEvent) {
        if event.kind == InputEventKind::MouseMove && event.left_button_down {
            self.update_for_input_event(event.kind);
            return;
        }
        if event.kind.is_mouse_kind() || event.kind.is_keyboard_kind() {
            return;
        }
        self.update_for_input_event(event.kind);
    }

    /// The compositor serviced an input-driven animation tick.
    /// Cross-thread-safe.
    pub fn did_animate_for_input_on_compositor_thread(&self) {
        self.update_for_input_event(InputEventKind::Undefined);
    }

    /// True when the near future likely holds high-priority work
    pub fn is_high_priority_work_anticipated(&self) -> bool {
        self.thread_checker.assert_calling_thread();
        if self.is_shutdown() {
            return false;
        }
        self.maybe_update_policy();
        let policy = self.main.lock().unwrap().current_policy;
        policy == Policy::CompositorPriority || policy == Policy::TouchstartPriority
    }

    /// True when long-running work should yield back to the selector.
    ///
    /// Control work never forces a yield; it runs before the next task
    /// anyway rather than interrupting the current one.
    pub fn should_yield_for_high_priority_work(&self) -> bool {
        self.thread_checker.assert_calling_thread();
        if self.is_shutdown() {
            return false;
        }
        self.maybe_update_policy();

        let (current_policy, queues) = {
            let main = self.main.lock().unwrap();
            (main.current_policy, main.queues.clone())
        };
        let Some(queues) = queues else {
            return false;
        };
        match current_policy {
            Policy::Normal => false,
            Policy::CompositorPriority => !queues.is_queue_empty(QueueRole::Compositor),
            Policy::TouchstartPriority => true,
        }
    }

    /// Currently applied policy
    pub fn current_policy(&self) -> Policy {
        self.thread_checker.assert_calling_thread();
        self.main.lock().unwrap().current_policy
    }

    /// Current idle period state
    pub fn idle_period_state(&self) -> IdlePeriodState {
        self.thread_checker.assert_calling_thread();
        self.main.lock().unwrap().idle_period_state
    }

    /// Deadline idle tasks should finish by, when inside an idle period
    pub fn current_idle_task_deadline(&self) -> Option<Instant> {
        self.thread_checker.assert_calling_thread();
        self.main.lock().unwrap().estimated_next_frame_begin
    }

    /// True when idle work may run past the announced deadline
    pub fn can_exceed_idle_deadline_if_required(&self) -> bool {
        self.thread_checker.assert_calling_thread();
        self.main.lock().unwrap().idle_period_state
            == IdlePeriodState::InLongIdlePeriodWithMaxDeadline
    }

    pub fn add_task_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.thread_checker.assert_calling_thread();
        if let Some(queues) = self.main.lock().unwrap().queues.clone() {
            queues.add_task_observer(observer);
        }
    }

    pub fn remove_task_observer(&self, observer: &Arc<dyn TaskObserver>) {
        self.thread_checker.assert_calling_thread();
        if let Some(queues) = self.main.lock().unwrap().queues.clone() {
            queues.remove_task_observer(observer);
        }
    }

    /// Stop driving the queues. Every later notification is a no-op.
    pub fn shutdown(&self) {
        self.thread_checker.assert_calling_thread();
        self.delayed_update_policy.cancel();
        self.end_idle_period_task.cancel();
        self.initiate_long_idle_period_task.cancel();
        self.initiate_long_idle_period_after_wakeup_task.cancel();
        self.main.lock().unwrap().queues = None;
        tracing::debug!("main thread scheduler shut down");
    }

    /// Point-in-time diagnostic view of the scheduler
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.thread_checker.assert_calling_thread();
        let signals = self.incoming_signals.lock().unwrap();
        let main = self.main.lock().unwrap();
        SchedulerSnapshot {
            current_policy: main.current_policy.as_str(),
            idle_period_state: main.idle_period_state.as_str(),
            input_stream_state: signals.input_stream_state.as_str(),
            now_ms: self.millis_since_birth(self.clock.now()),
            last_input_receipt_ms: signals
                .last_input_receipt_on_compositor
                .map(|t| self.millis_since_birth(t)),
            last_input_process_ms: signals
                .last_input_process_on_main
                .map(|t| self.millis_since_birth(t)),
            estimated_next_frame_begin_ms: main
                .estimated_next_frame_begin
                .map(|t| self.millis_since_birth(t)),
            last_idle_period_end_ms: main
                .last_idle_period_end
                .map(|t| self.millis_since_birth(t)),
            idle_deadline_overruns: main.idle_deadline_overruns,
        }
    }

    fn millis_since_birth(&self, t: Instant) -> f64 {
        t.saturating_duration_since(self.birth).as_secs_f64() * 1000.0
    }

    fn is_shutdown(&self) -> bool {
        self.main.lock().unwrap().queues.is_none()
    }

    fn update_for_input_event(&self, kind: InputEventKind) {
        let now = self.clock.now();
        let mut signals = self.incoming_signals.lock().unwrap();

        let new_state =
            compute_stream_state(signals.input_stream_state, kind, signals.last_input_kind);
        if signals.input_stream_state != new_state {
            signals.input_stream_state = new_state;
            self.ensure_urgent_policy_update_posted(&mut signals);
        }
        signals.last_input_receipt_on_compositor = Some(now);
        // An input event is now queued up; this stays cleared until the
        // next commit or quiescent signal marks it processed. Input
        // notifications always precede processing on either thread.
        signals.last_input_process_on_main = None;
        signals.last_input_kind = kind;
    }

    /// Post at most one pending recompute request at a time.
    fn ensure_urgent_policy_update_posted(&self, signals: &mut MutexGuard<'_, IncomingSignals>) {
        if !self.policy_may_need_update.is_set() {
            self.policy_may_need_update.set_while_locked(signals, true);
            let weak = self.weak_self.clone();
            self.control_runner.post_task(Box::new(move || {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.update_policy();
                }
            }));
        }
    }

    /// Mark pending input as processed on the scheduler thread.
    ///
    /// A `frame_time` that predates the last input arrival is ignored:
    /// from this thread's point of view that input has not been seen
    /// yet. `None` records processing unconditionally (quiescence).
    fn did_process_input_event(&self, frame_time: Option<Instant>) {
        self.thread_checker.assert_calling_thread();
        let mut signals = self.incoming_signals.lock().unwrap();
        if signals.input_stream_state == InputStreamState::Inactive {
            return;
        }
        if let (Some(frame_time), Some(receipt)) =
            (frame_time, signals.last_input_receipt_on_compositor)
        {
            if frame_time < receipt {
                return;
            }
        }
        signals.last_input_process_on_main = Some(self.clock.now());
        self.update_policy_locked(&mut signals);
    }

    fn maybe_update_policy(&self) {
        self.thread_checker.assert_calling_thread();
        if self.policy_may_need_update.is_set() {
            self.update_policy();
        }
    }

    fn update_policy(&self) {
        let mut signals = self.incoming_signals.lock().unwrap();
        self.update_policy_locked(&mut signals);
    }

    /// Recompute the policy from the latest locked signal snapshot and
    /// apply it to the queues.
    fn update_policy_locked(&self, signals: &mut MutexGuard<'_, IncomingSignals>) {
        self.thread_checker.assert_calling_thread();
        let mut main = self.main.lock().unwrap();
        let Some(queues) = main.queues.clone() else {
            return;
        };

        let now = self.clock.now();
        self.policy_may_need_update.set_while_locked(signals, false);

        let compositor_queue_empty = queues.is_queue_empty(QueueRole::Compositor);
        let (new_policy, new_policy_duration) = policy::compute_new_policy(
            signals,
            compositor_queue_empty,
            now,
            self.config.priority_escalation_after_input,
        );

        // Same policy or not, a nonzero duration refreshes the expiry
        // re-check.
        if new_policy_duration > Duration::ZERO {
            main.policy_expiration = Some(now + new_policy_duration);
            self.delayed_update_policy
                .set_deadline(new_policy_duration, now);
        } else {
            main.policy_expiration = None;
        }

        if new_policy == main.current_policy {
            return;
        }

        match new_policy {
            Policy::CompositorPriority => {
                queues.set_queue_priority(QueueRole::Compositor, QueuePriority::High);
                queues.set_queue_priority(QueueRole::Loading, QueuePriority::BestEffort);
                queues.enable_queue(QueueRole::Loading);
            }
            Policy::TouchstartPriority => {
                queues.set_queue_priority(QueueRole::Compositor, QueuePriority::High);
                // Loading must not compete with the touch response.
                queues.disable_queue(QueueRole::Loading);
            }
            Policy::Normal => {
                queues.set_queue_priority(QueueRole::Compositor, QueuePriority::Normal);
                queues.set_queue_priority(QueueRole::Loading, QueuePriority::Normal);
                queues.enable_queue(QueueRole::Loading);
            }
        }
        debug_assert!(queues.is_queue_enabled(QueueRole::Compositor));
        debug_assert!(
            new_policy == Policy::TouchstartPriority
                || queues.is_queue_enabled(QueueRole::Loading)
        );

        tracing::debug!(
            from = main.current_policy.as_str(),
            to = new_policy.as_str(),
            "scheduling policy changed"
        );
        main.current_policy = new_policy;
    }

    fn start_idle_period(&self, new_state: IdlePeriodState) {
        self.thread_checker.assert_calling_thread();
        debug_assert!(new_state.is_in_idle_period());

        let mut main = self.main.lock().unwrap();
        let Some(queues) = main.queues.clone() else {
            return;
        };
        queues.set_queue_priority(QueueRole::Idle, QueuePriority::BestEffort);
        queues.enable_queue(QueueRole::Idle);
        queues.pump_queue(QueueRole::Idle);
        main.idle_period_state = new_state;
        tracing::trace!(state = new_state.as_str(), "idle period started");
    }

    /// End any open idle period. Safe to call when none is open.
    pub fn end_idle_period(&self) {
        self.thread_checker.assert_calling_thread();

        self.end_idle_period_task.cancel();
        self.initiate_long_idle_period_task.cancel();
        self.initiate_long_idle_period_after_wakeup_task.cancel();

        let mut main = self.main.lock().unwrap();
        if !main.idle_period_state.is_in_idle_period() {
            return;
        }

        // An ending-after-wakeup period already recorded its close-out
        // time.
        if main.idle_period_state != IdlePeriodState::EndingLongIdlePeriod {
            let now = self.clock.now();
            if let Some(estimated) = main.estimated_next_frame_begin {
                if now > estimated {
                    // Diagnostic only; the overrunning task keeps running.
                    main.idle_deadline_overruns += 1;
                    tracing::warn!(
                        overrun_ms = (now - estimated).as_secs_f64() * 1000.0,
                        "idle period overran its deadline"
                    );
                }
            }
            main.last_idle_period_end = Some(now);
        }

        if let Some(queues) = main.queues.clone() {
            queues.disable_queue(QueueRole::Idle);
        }
        main.idle_period_state = IdlePeriodState::NotInIdlePeriod;
        tracing::trace!("idle period ended");
    }

    fn compute_new_long_idle_period_state(&self, now: Instant) -> (IdlePeriodState, Duration) {
        self.thread_checker.assert_calling_thread();
        self.maybe_update_policy();

        let (touchstart_expiration, queues) = {
            let main = self.main.lock().unwrap();
            let expiration = if main.current_policy == Policy::TouchstartPriority {
                Some(main.policy_expiration.unwrap_or(now))
            } else {
                None
            };
            (expiration, main.queues.clone())
        };
        let Some(queues) = queues else {
            return (
                IdlePeriodState::NotInIdlePeriod,
                self.config.retry_initiate_long_idle_period_delay,
            );
        };

        let inputs = LongIdleInputs {
            touchstart_expiration,
            next_pending_delayed_task: queues.next_pending_delayed_task_time(),
            max_idle_period: self.config.max_idle_period,
            retry_delay: self.config.retry_initiate_long_idle_period_delay,
        };
        idle::compute_long_idle_period_state(now, &inputs)
    }

    fn initiate_long_idle_period(&self) {
        self.thread_checker.assert_calling_thread();

        // End any previous idle period.
        self.end_idle_period();

        let now = self.clock.now();
        let (new_state, next_delay) = self.compute_new_long_idle_period_state(now);

        let queues = {
            let mut main = self.main.lock().unwrap();
            let Some(queues) = main.queues.clone() else {
                return;
            };
            if self.config.long_idle_periods_enabled && new_state.is_in_idle_period() {
                main.estimated_next_frame_begin = Some(now + next_delay);
            }
            queues
        };
        if self.config.long_idle_periods_enabled && new_state.is_in_idle_period() {
            self.start_idle_period(new_state);
        }

        let weak = self.weak_self.clone();
        if queues.is_queue_empty(QueueRole::Idle) {
            // No idle work right now; re-initiate after the thread next
            // wakes so idle tasks queued in the interim can run in the
            // fresh period.
            self.control_after_wakeup_runner.post_delayed_task(
                self.initiate_long_idle_period_after_wakeup_task.wrap(move || {
                    if let Some(scheduler) = weak.upgrade() {
                        scheduler.initiate_long_idle_period_after_wakeup();
                    }
                }),
                next_delay,
            );
        } else {
            self.control_runner.post_delayed_task(
                self.initiate_long_idle_period_task.wrap(move || {
                    if let Some(scheduler) = weak.upgrade() {
                        scheduler.initiate_long_idle_period();
                    }
                }),
                next_delay,
            );
        }
    }

    fn initiate_long_idle_period_after_wakeup(&self) {
        self.thread_checker.assert_calling_thread();

        let mut main = self.main.lock().unwrap();
        if main.idle_period_state.is_in_idle_period() {
            // The thread was asleep; close the period at the time it
            // would have ended had we stayed awake, not at wake-up time.
            let now = self.clock.now();
            let closed_at = match main.estimated_next_frame_begin {
                Some(estimated) => estimated.min(now),
                None => now,
            };
            main.last_idle_period_end = Some(closed_at);
            main.idle_period_state = IdlePeriodState::EndingLongIdlePeriod;
            drop(main);
            self.end_idle_period();
        } else {
            drop(main);
        }

        // Posted rather than called directly so pending after-wakeup
        // idle tasks reach the idle queue before the next period starts.
        let weak = self.weak_self.clone();
        self.control_runner
            .post_task(self.initiate_long_idle_period_task.wrap(move || {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.initiate_long_idle_period();
                }
            }));
    }
}

impl fmt::Debug for MainThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadScheduler")
            .field("config", &self.config)
            .finish()
    }
}

/// Handle for submitting idle tasks.
///
/// Idle tasks run only inside idle periods and receive the period's
/// deadline; it is a hint the task should honor by yielding, not a hard
/// cutover.
#[derive(Clone)]
pub struct IdleTaskRunner {
    idle_queue_runner: Arc<dyn TaskRunner>,
    after_wakeup_runner: Arc<dyn TaskRunner>,
    scheduler: Weak<MainThreadScheduler>,
}

impl IdleTaskRunner {
    /// Post an idle task
    pub fn post_idle_task(&self, task: impl FnOnce(Option<Instant>) + Send + 'static) {
        let scheduler = self.scheduler.clone();
        self.idle_queue_runner.post_task(Box::new(move || {
            let deadline = scheduler
                .upgrade()
                .and_then(|scheduler| scheduler.current_idle_task_deadline());
            task(deadline);
        }));
    }

    /// Post an idle task eligible only after the thread next wakes up
    pub fn post_idle_task_after_wakeup(
        &self,
        task: impl FnOnce(Option<Instant>) + Send + 'static,
    ) {
        let runner = self.clone();
        self.after_wakeup_runner.post_task(Box::new(move || {
            runner.post_idle_task(task);
        }));
    }
}

impl fmt::Debug for IdleTaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleTaskRunner").finish()
    }
}

/// Point-in-time diagnostic view of scheduler state.
///
/// Times are milliseconds since scheduler creation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerSnapshot {
    pub current_policy: &'static str,
    pub idle_period_state: &'static str,
    pub input_stream_state: &'static str,
    pub now_ms: f64,
    pub last_input_receipt_ms: Option<f64>,
    pub last_input_process_ms: Option<f64>,
    pub estimated_next_frame_begin_ms: Option<f64>,
    pub last_idle_period_end_ms: Option<f64>,
    pub idle_deadline_overruns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTaskQueueManager;
    use crate::time::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    const FRAME_INTERVAL: Duration = Duration::from_millis(16);

    fn fixture_with_config(
        config: SchedulerConfig,
    ) -> (
        Arc<ManualClock>,
        Arc<FakeTaskQueueManager>,
        Arc<MainThreadScheduler>,
    ) {
        let clock = Arc::new(ManualClock::new());
        let queues = FakeTaskQueueManager::new(Arc::clone(&clock));
        let scheduler = MainThreadScheduler::new(
            Arc::clone(&queues) as Arc<dyn TaskQueueManager>,
            Arc::clone(&clock) as Arc<dyn TimeSource>,
            config,
        );
        (clock, queues, scheduler)
    }

    fn fixture() -> (
        Arc<ManualClock>,
        Arc<FakeTaskQueueManager>,
        Arc<MainThreadScheduler>,
    ) {
        fixture_with_config(SchedulerConfig::default())
    }

    fn assert_ms(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a timestamp");
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    #[test]
    fn test_construction_configures_queues() {
        let (_clock, queues, _scheduler) = fixture();

        assert_eq!(queues.queue_priority(QueueRole::Control), QueuePriority::Control);
        assert_eq!(
            queues.queue_priority(QueueRole::ControlAfterWakeup),
            QueuePriority::Control
        );
        assert!(!queues.is_queue_enabled(QueueRole::Idle));
        assert_eq!(queues.work_batch_size(), 1);
    }

    #[test]
    fn test_no_input_stays_normal() {
        let (_clock, queues, scheduler) = fixture();

        assert_eq!(scheduler.current_policy(), Policy::Normal);
        assert!(!scheduler.is_high_priority_work_anticipated());
        assert!(!scheduler.should_yield_for_high_priority_work());

        queues.advance_time(Duration::from_secs(1));
        assert_eq!(scheduler.current_policy(), Policy::Normal);
        assert!(!scheduler.is_high_priority_work_anticipated());
    }

    #[test]
    fn test_touchstart_policy_decays_after_escalation_window() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::TouchstartPriority);
        assert!(!queues.is_queue_enabled(QueueRole::Loading));
        assert_eq!(
            queues.queue_priority(QueueRole::Compositor),
            QueuePriority::High
        );

        // The frame marks the input processed at t0.
        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: t0,
            interval: FRAME_INTERVAL,
        });

        queues.advance_time(Duration::from_millis(149));
        assert!(scheduler.is_high_priority_work_anticipated());
        assert_eq!(scheduler.current_policy(), Policy::TouchstartPriority);

        // Crossing the escalation window expires the policy.
        queues.advance_time(Duration::from_millis(2));
        assert_eq!(scheduler.current_policy(), Policy::Normal);
        assert!(!scheduler.is_high_priority_work_anticipated());
        assert!(queues.is_queue_enabled(QueueRole::Loading));
        assert_eq!(
            queues.queue_priority(QueueRole::Loading),
            QueuePriority::Normal
        );
        assert_eq!(
            queues.queue_priority(QueueRole::Compositor),
            QueuePriority::Normal
        );
    }

    #[test]
    fn test_queries_force_pending_recompute() {
        let (_clock, queues, scheduler) = fixture();

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        // The posted control task has not run, but the query recomputes.
        assert!(scheduler.is_high_priority_work_anticipated());
        assert_eq!(scheduler.current_policy(), Policy::TouchstartPriority);

        // The queued update is now redundant and harmless.
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::TouchstartPriority);
    }

    #[test]
    fn test_compositor_priority_demotes_loading() {
        let (_clock, queues, scheduler) = fixture();

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::GestureScrollBegin,
        ));
        queues.run_pending_tasks();

        assert_eq!(scheduler.current_policy(), Policy::CompositorPriority);
        assert_eq!(
            queues.queue_priority(QueueRole::Compositor),
            QueuePriority::High
        );
        assert_eq!(
            queues.queue_priority(QueueRole::Loading),
            QueuePriority::BestEffort
        );
        assert!(queues.is_queue_enabled(QueueRole::Loading));
    }

    #[test]
    fn test_mouse_and_keyboard_filtering() {
        // Plain mouse moves and keyboard input are not priority signals.
        let (_clock, queues, scheduler) = fixture();
        scheduler
            .did_receive_input_event_on_compositor_thread(InputEvent::new(InputEventKind::MouseMove));
        scheduler
            .did_receive_input_event_on_compositor_thread(InputEvent::new(InputEventKind::KeyDown));
        assert_eq!(queues.posted_count(QueueRole::Control), 0);
        assert_eq!(scheduler.current_policy(), Policy::Normal);

        // A left-button drag is.
        scheduler.did_receive_input_event_on_compositor_thread(
            InputEvent::new(InputEventKind::MouseMove).with_left_button_down(),
        );
        assert_eq!(queues.posted_count(QueueRole::Control), 1);
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::CompositorPriority);
    }

    #[test]
    fn test_mouse_wheel_counts_as_input() {
        let (_clock, queues, scheduler) = fixture();
        scheduler
            .did_receive_input_event_on_compositor_thread(InputEvent::new(InputEventKind::MouseWheel));
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::CompositorPriority);
    }

    #[test]
    fn test_animation_tick_escalates_policy() {
        let (_clock, queues, scheduler) = fixture();
        scheduler.did_animate_for_input_on_compositor_thread();
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::CompositorPriority);
    }

    #[test]
    fn test_should_yield_truth_table() {
        let (_clock, queues, scheduler) = fixture();
        assert!(!scheduler.should_yield_for_high_priority_work());

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::GestureScrollUpdate,
        ));
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::CompositorPriority);
        // Compositor priority only yields while compositor work is queued.
        assert!(!scheduler.should_yield_for_high_priority_work());

        scheduler.compositor_task_runner().post_task(Box::new(|| {}));
        assert!(scheduler.should_yield_for_high_priority_work());

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::TouchstartPriority);
        // Touchstart yields unconditionally.
        assert!(scheduler.should_yield_for_high_priority_work());
    }

    #[test]
    fn test_short_idle_period_ends_at_estimated_frame_time() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: t0,
            interval: FRAME_INTERVAL,
        });
        queues.advance_time(Duration::from_millis(5));
        scheduler.did_commit_frame_to_compositor();

        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InShortIdlePeriod
        );
        assert!(queues.is_queue_enabled(QueueRole::Idle));

        queues.advance_time(Duration::from_millis(10));
        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InShortIdlePeriod
        );

        // The scheduled end fires exactly at the estimated frame time.
        queues.advance_time(Duration::from_millis(1));
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
        assert!(!queues.is_queue_enabled(QueueRole::Idle));
        assert_ms(scheduler.snapshot().last_idle_period_end_ms, 16.0);
    }

    #[test]
    fn test_late_commit_starts_no_idle_period() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: t0,
            interval: FRAME_INTERVAL,
        });
        queues.advance_time(Duration::from_millis(20));
        scheduler.did_commit_frame_to_compositor();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
    }

    #[test]
    fn test_will_begin_frame_ends_open_idle_period() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: t0,
            interval: FRAME_INTERVAL,
        });
        queues.advance_time(Duration::from_millis(5));
        scheduler.did_commit_frame_to_compositor();
        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InShortIdlePeriod
        );

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: clock.now(),
            interval: FRAME_INTERVAL,
        });
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
    }

    #[test]
    fn test_end_idle_period_is_idempotent() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: t0,
            interval: FRAME_INTERVAL,
        });
        queues.advance_time(Duration::from_millis(5));
        scheduler.did_commit_frame_to_compositor();

        let disables_before = queues.disable_count(QueueRole::Idle);
        scheduler.end_idle_period();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
        assert_eq!(queues.disable_count(QueueRole::Idle), disables_before + 1);

        // A second end is a safe no-op.
        scheduler.end_idle_period();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
        assert_eq!(queues.disable_count(QueueRole::Idle), disables_before + 1);
    }

    #[test]
    fn test_long_idle_with_pending_idle_work_gets_max_deadline() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        let deadline_seen = Arc::new(Mutex::new(None));
        let deadline_slot = Arc::clone(&deadline_seen);
        scheduler.idle_task_runner().post_idle_task(move |deadline| {
            *deadline_slot.lock().unwrap() = deadline;
        });
        assert!(!queues.is_queue_empty(QueueRole::Idle));

        scheduler.begin_frame_not_expected_soon();
        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline
        );
        assert!(scheduler.can_exceed_idle_deadline_if_required());
        assert_eq!(
            scheduler.current_idle_task_deadline(),
            Some(t0 + Duration::from_millis(50))
        );

        queues.run_pending_tasks();
        assert_eq!(
            *deadline_seen.lock().unwrap(),
            Some(t0 + Duration::from_millis(50))
        );
    }

    #[test]
    fn test_long_idle_duration_capped_by_pending_delayed_task() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler
            .default_task_runner()
            .post_delayed_task(Box::new(|| {}), Duration::from_millis(20));
        scheduler.idle_task_runner().post_idle_task(|_| {});

        scheduler.begin_frame_not_expected_soon();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::InLongIdlePeriod);
        assert!(!scheduler.can_exceed_idle_deadline_if_required());
        assert_eq!(
            scheduler.current_idle_task_deadline(),
            Some(t0 + Duration::from_millis(20))
        );
        queues.run_pending_tasks();
    }

    #[test]
    fn test_touchstart_policy_blocks_long_idle_until_expiry() {
        let (_clock, queues, scheduler) = fixture();

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        queues.run_pending_tasks();
        scheduler.idle_task_runner().post_idle_task(|_| {});

        scheduler.begin_frame_not_expected_soon();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);

        // Once the touchstart policy expires, the deferred re-attempt
        // opens a long idle period.
        queues.advance_time(Duration::from_millis(151));
        assert_eq!(scheduler.current_policy(), Policy::Normal);
        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline
        );
    }

    #[test]
    fn test_long_idle_periods_can_be_disabled() {
        let config = SchedulerConfig {
            long_idle_periods_enabled: false,
            ..Default::default()
        };
        let (_clock, _queues, scheduler) = fixture_with_config(config);

        scheduler.idle_task_runner().post_idle_task(|_| {});
        scheduler.begin_frame_not_expected_soon();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
    }

    #[test]
    fn test_wakeup_closes_overslept_idle_period() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        // Idle queue is empty, so re-initiation waits for a wakeup.
        scheduler.begin_frame_not_expected_soon();
        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline
        );

        // Oversleep well past the 50ms idle deadline.
        clock.advance(Duration::from_millis(70));
        queues.wake_up();
        queues.run_pending_tasks();

        // The overslept period was closed at its estimated deadline, not
        // at wake-up time, and a fresh period started.
        assert_ms(scheduler.snapshot().last_idle_period_end_ms, 50.0);
        assert_eq!(
            scheduler.idle_period_state(),
            IdlePeriodState::InLongIdlePeriodWithMaxDeadline
        );
        assert_eq!(
            scheduler.current_idle_task_deadline(),
            Some(t0 + Duration::from_millis(120))
        );
    }

    #[test]
    fn test_idle_task_after_wakeup_runs_in_next_period() {
        let (_clock, queues, scheduler) = fixture();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_in_task = Arc::clone(&ran);
        scheduler
            .idle_task_runner()
            .post_idle_task_after_wakeup(move |_| {
                ran_in_task.fetch_add(1, Ordering::SeqCst);
            });

        // Nothing runs before a wakeup.
        queues.run_pending_tasks();
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        // The wakeup moves the task onto the idle queue; it then needs an
        // idle period to run.
        queues.wake_up();
        queues.run_pending_tasks();
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        scheduler.begin_frame_not_expected_soon();
        queues.run_pending_tasks();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_deadline_overrun_is_diagnostic_only() {
        let (clock, queues, scheduler) = fixture();
        let t0 = clock.now();

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: t0,
            interval: FRAME_INTERVAL,
        });
        queues.advance_time(Duration::from_millis(5));
        scheduler.did_commit_frame_to_compositor();

        // The idle period runs 9ms past its 16ms deadline.
        clock.advance(Duration::from_millis(20));
        scheduler.end_idle_period();

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.idle_deadline_overruns, 1);
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
    }

    #[test]
    fn test_cross_thread_input_posts_single_update() {
        let (_clock, queues, scheduler) = fixture();

        let remote = Arc::clone(&scheduler);
        thread::spawn(move || {
            remote.did_receive_input_event_on_compositor_thread(InputEvent::new(
                InputEventKind::TouchStart,
            ));
            remote.did_receive_input_event_on_compositor_thread(InputEvent::new(
                InputEventKind::TouchMove,
            ));
            remote.did_receive_input_event_on_compositor_thread(InputEvent::new(
                InputEventKind::TouchMove,
            ));
        })
        .join()
        .unwrap();

        // Three events, two state transitions, one posted recompute.
        assert_eq!(queues.posted_count(QueueRole::Control), 1);

        queues.run_pending_tasks();
        // The consecutive touchmoves downgraded the stream to plain
        // active by the time the recompute ran.
        assert_eq!(scheduler.current_policy(), Policy::CompositorPriority);
    }

    #[test]
    fn test_shutdown_makes_notifications_no_ops() {
        let (clock, queues, scheduler) = fixture();
        scheduler.shutdown();

        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: clock.now(),
            interval: FRAME_INTERVAL,
        });
        scheduler.did_commit_frame_to_compositor();
        scheduler.begin_frame_not_expected_soon();
        assert_eq!(scheduler.idle_period_state(), IdlePeriodState::NotInIdlePeriod);
        assert!(!scheduler.is_high_priority_work_anticipated());
        assert!(!scheduler.should_yield_for_high_priority_work());

        // Compositor-side notifications still post, but the recompute
        // no-ops against the absent queue collaborator.
        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        queues.run_pending_tasks();
        assert_eq!(scheduler.current_policy(), Policy::Normal);
    }

    #[test]
    fn test_dropped_scheduler_leaves_posted_tasks_inert() {
        let (_clock, queues, scheduler) = fixture();

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        assert_eq!(queues.posted_count(QueueRole::Control), 1);
        drop(scheduler);

        queues.run_pending_tasks();
        queues.advance_time(Duration::from_secs(1));
    }

    #[test]
    fn test_task_observers_pass_through() {
        struct CountingObserver(AtomicUsize);

        impl TaskObserver for CountingObserver {
            fn will_process_task(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn did_process_task(&self) {}
        }

        let (_clock, queues, scheduler) = fixture();
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        scheduler.add_task_observer(Arc::clone(&observer) as Arc<dyn TaskObserver>);

        scheduler.default_task_runner().post_task(Box::new(|| {}));
        queues.run_pending_tasks();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        let erased = Arc::clone(&observer) as Arc<dyn TaskObserver>;
        scheduler.remove_task_observer(&erased);
        scheduler.default_task_runner().post_task(Box::new(|| {}));
        queues.run_pending_tasks();
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let (_clock, queues, scheduler) = fixture();

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.current_policy, "normal");
        assert_eq!(snapshot.idle_period_state, "not_in_idle_period");
        assert_eq!(snapshot.input_stream_state, "inactive");
        assert!(snapshot.last_input_receipt_ms.is_none());
        assert!(snapshot.last_input_process_ms.is_none());
        assert_eq!(snapshot.idle_deadline_overruns, 0);

        scheduler.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
        queues.run_pending_tasks();

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.current_policy, "touchstart");
        assert_eq!(
            snapshot.input_stream_state,
            "active_and_awaiting_touchstart_response"
        );
        assert_ms(snapshot.last_input_receipt_ms, 0.0);
    }
}
