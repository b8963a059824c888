use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use futures::{FutureExt, StreamExt};
use macro_rules_attribute::apply;
use smol_macros::test as smol_test;
use taskdrain::{Event, EventKind, EventStream, Scheduler, Task};

async fn drain_events(stream: &mut EventStream) -> Vec<Event> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            let complete = event == Event::Complete;
            events.push(event);
            if complete {
                break;
            }
        }
        events
    })
    .await
    .expect("scheduler did not drain in time")
}

fn buffered_events(stream: &mut EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(Some(event)) = stream.next().now_or_never() {
        events.push(event);
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_suppresses_callback_and_end_event() {
    let journal = Arc::new(Mutex::new(String::new()));
    let journal_cb = Arc::clone(&journal);

    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.register(
        Task::new(|done| {
            done.complete();
            Ok(())
        })
        .named("a")
        .on_complete(move || {
            journal_cb.lock().unwrap().push_str("callback");
            Ok(())
        }),
    );

    assert!(scheduler.cancel("a"), "Canceling a pending task should succeed");
    assert!(
        !scheduler.cancel("ghost"),
        "Canceling an unknown name should fail"
    );

    scheduler.run();
    let events = drain_events(&mut stream).await;

    assert!(
        events.contains(&Event::Cancel("a".to_string())),
        "A cancel event should fire for the canceled task"
    );
    assert!(
        !events.iter().any(|event| event.kind() == EventKind::End),
        "The end event should be suppressed for a canceled task"
    );
    assert!(
        journal.lock().unwrap().is_empty(),
        "The completion callback should be suppressed for a canceled task"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_running_task_ignores_late_completion() {
    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.register(
        Task::new(|done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.complete();
            });
            Ok(())
        })
        .named("slow"),
    );

    scheduler.run();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(scheduler.is_running("slow"));
    assert!(scheduler.cancel("slow"), "Canceling a running task should succeed");

    let events = drain_events(&mut stream).await;
    assert!(
        events.contains(&Event::Cancel("slow".to_string())),
        "Cancellation should be reported"
    );
    assert_eq!(events.last(), Some(&Event::Complete));

    // The in-flight action eventually fires its handle; that must be a no-op.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        !buffered_events(&mut stream)
            .iter()
            .any(|event| event.kind() == EventKind::End),
        "A handle fired after cancellation should not produce an end event"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_handle_does_not_complete_a_reused_name() {
    let journal = Arc::new(Mutex::new(String::new()));
    let journal_cb = Arc::clone(&journal);

    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.register(
        Task::new(|done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                done.complete();
            });
            Ok(())
        })
        .named("a"),
    );

    scheduler.run();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(scheduler.cancel("a"));

    // The name is free again; this task never fires its own handle.
    scheduler.register(
        Task::new(|_done| Ok(())).named("a").on_complete(move || {
            journal_cb.lock().unwrap().push_str("second completed");
            Ok(())
        }),
    );
    scheduler.run();
    drop(buffered_events(&mut stream));

    // Wait past the first action's late fire; it must not touch the new task.
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(
        scheduler.is_running("a"),
        "The re-registered task should still be pending after the old handle fires"
    );
    assert!(
        journal.lock().unwrap().is_empty(),
        "The old task's handle should not run the new task's callback"
    );
    assert!(
        !buffered_events(&mut stream)
            .iter()
            .any(|event| event.kind() == EventKind::End),
        "No end event should fire for a task whose own handle never fired"
    );

    scheduler.cancel("a");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_all_empties_the_registry() {
    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    for name in ["a", "b", "c"] {
        scheduler.register(
            Task::new(|done| {
                done.complete();
                Ok(())
            })
            .named(name),
        );
    }

    assert!(scheduler.cancel_all());
    assert_eq!(scheduler.pending_count(), 0);

    let cancels = buffered_events(&mut stream)
        .iter()
        .filter(|event| event.kind() == EventKind::Cancel)
        .count();
    assert_eq!(cancels, 3, "Every pending task should emit a cancel event");
}

#[tokio::test(flavor = "multi_thread")]
async fn completion_handle_is_idempotent() {
    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.register(
        Task::new(|done| {
            let again = done.clone();
            done.complete();
            again.complete();
            Ok(())
        })
        .named("once"),
    );

    scheduler.run();
    let events = drain_events(&mut stream).await;

    let ends = events
        .iter()
        .filter(|event| matches!(event, Event::End(name) if name == "once"))
        .count();
    assert_eq!(ends, 1, "A double-fired handle should complete the task once");
    let completes = events
        .iter()
        .filter(|event| **event == Event::Complete)
        .count();
    assert_eq!(completes, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn callback_runs_on_natural_completion_and_failures_are_isolated() {
    let journal = Arc::new(Mutex::new(String::new()));
    let journal_cb = Arc::clone(&journal);

    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.register(
        Task::new(|done| {
            done.complete();
            Ok(())
        })
        .named("ok")
        .on_complete(move || {
            journal_cb.lock().unwrap().push_str("ran");
            Ok(())
        }),
    );
    scheduler.register(
        Task::new(|done| {
            done.complete();
            Ok(())
        })
        .named("broken")
        .on_complete(|| Err("callback blew up".into())),
    );

    scheduler.run();
    let events = drain_events(&mut stream).await;

    assert_eq!(journal.lock().unwrap().as_str(), "ran");
    assert!(
        events.contains(&Event::Error {
            name: Some("broken".to_string()),
            message: "callback blew up".to_string(),
        }),
        "A failing completion callback should be reported, not propagated"
    );
    assert!(
        events.contains(&Event::End("broken".to_string())),
        "The task itself still completes when its callback fails"
    );
    assert_eq!(events.last(), Some(&Event::Complete));
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_cancels_a_stuck_task() {
    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    // The action never fires its handle; only the timer can end this task.
    scheduler.register(
        Task::new(|_done| Ok(()))
            .named("x")
            .timeout(Duration::from_millis(20)),
    );

    let armed_at = Instant::now();
    scheduler.run();
    let events = drain_events(&mut stream).await;

    assert!(
        armed_at.elapsed() >= Duration::from_millis(20),
        "The timeout should not fire before its duration"
    );
    assert!(
        events.contains(&Event::Timeout("x".to_string())),
        "A timed-out task should emit a timeout event"
    );
    assert!(
        !events
            .iter()
            .any(|event| matches!(event.kind(), EventKind::Cancel | EventKind::End)),
        "Timeout is reported as timeout, not cancel or end"
    );
    assert_eq!(events.last(), Some(&Event::Complete));
    assert!(!scheduler.is_pending("x"));
}

#[tokio::test(flavor = "multi_thread")]
async fn timer_is_defused_by_completion() {
    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.set_timeout("quick", Some(Duration::from_millis(100)));
    scheduler.register(
        Task::new(|done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.complete();
            });
            Ok(())
        })
        .named("quick"),
    );

    scheduler.run();
    let events = drain_events(&mut stream).await;
    assert!(events.contains(&Event::End("quick".to_string())));

    // Wait past the configured timeout; the defused timer must stay silent.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        !buffered_events(&mut stream)
            .iter()
            .any(|event| event.kind() == EventKind::Timeout),
        "A completed task's timer should not fire"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn clearing_a_timeout_leaves_the_task_unbounded() {
    let scheduler = Scheduler::new();
    let mut stream = scheduler.subscribe();

    scheduler.set_timeout("x", Some(Duration::from_millis(10)));
    scheduler.register(Task::new(|_done| Ok(())).named("x"));
    // `None` clears the timeout before the task ever starts.
    scheduler.set_timeout("x", None);

    scheduler.run();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(
        scheduler.is_running("x"),
        "Without a timeout the stuck task stays pending indefinitely"
    );
    assert!(
        !buffered_events(&mut stream)
            .iter()
            .any(|event| event.kind() == EventKind::Timeout),
        "No timeout event should fire after the timeout was cleared"
    );

    scheduler.cancel("x");
}

#[apply(smol_test!)]
async fn scheduler_completes_under_smol() {
    let scheduler = Scheduler::new();
    let mut complete = scheduler.subscribe_to([EventKind::Complete]);

    scheduler.register(
        Task::new(|done| {
            smol::spawn(async move {
                smol::Timer::after(Duration::from_millis(10)).await;
                done.complete();
            })
            .detach();
            Ok(())
        })
        .named("under-smol"),
    );

    scheduler.run();
    assert_eq!(
        complete.next().await,
        Some(Event::Complete),
        "The scheduler should drain regardless of the driving executor"
    );
}
