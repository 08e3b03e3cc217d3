//! Simulated renderer main thread session.
//!
//! Drives the scheduler through an input burst, a few frames and an
//! idle drain using the deterministic test queue manager, printing
//! state snapshots along the way.
//!
//! Run with `RUST_LOG=debug` to see the scheduler's own tracing output.

use std::sync::Arc;
use std::time::Duration;

use fos_scheduler::testing::FakeTaskQueueManager;
use fos_scheduler::{
    BeginFrameArgs, InputEvent, InputEventKind, MainThreadScheduler, ManualClock, SchedulerConfig,
    TaskQueueManager, TimeSource,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SchedulerConfig::default();
    config.validate()?;

    let clock = Arc::new(ManualClock::new());
    let queues = FakeTaskQueueManager::new(Arc::clone(&clock));
    let scheduler = MainThreadScheduler::new(
        Arc::clone(&queues) as Arc<dyn TaskQueueManager>,
        Arc::clone(&clock) as Arc<dyn TimeSource>,
        config,
    );

    scheduler.default_task_runner().post_task(Box::new(|| {
        println!("default task ran");
    }));

    // A touch arrives on the compositor thread.
    let compositor_side = Arc::clone(&scheduler);
    std::thread::spawn(move || {
        compositor_side.did_receive_input_event_on_compositor_thread(InputEvent::new(
            InputEventKind::TouchStart,
        ));
    })
    .join()
    .expect("compositor thread panicked");
    queues.run_pending_tasks();
    println!(
        "after touch:\n{}",
        serde_json::to_string_pretty(&scheduler.snapshot())?
    );

    // A few frames at 60Hz; early commits open short idle periods.
    for _ in 0..3 {
        scheduler.will_begin_frame(BeginFrameArgs {
            frame_time: clock.now(),
            interval: Duration::from_millis(16),
        });
        queues.advance_time(Duration::from_millis(6));
        scheduler.did_commit_frame_to_compositor();
        queues.advance_time(Duration::from_millis(10));
    }
    println!(
        "after frames:\n{}",
        serde_json::to_string_pretty(&scheduler.snapshot())?
    );

    // No more frames expected; idle work drains against a deadline.
    scheduler.idle_task_runner().post_idle_task(|deadline| {
        println!("idle task ran, deadline {deadline:?}");
    });
    scheduler.begin_frame_not_expected_soon();
    queues.advance_time(Duration::from_millis(200));
    println!(
        "after idle drain:\n{}",
        serde_json::to_string_pretty(&scheduler.snapshot())?
    );

    scheduler.shutdown();
    Ok(())
}
