//! Drains a three-stage pipeline, printing every event on the feed.

use std::time::Duration;

use futures::StreamExt;
use taskdrain::{Event, Scheduler, Task};

#[tokio::main]
async fn main() {
    let scheduler = Scheduler::new();
    let mut events = scheduler.subscribe();

    scheduler.register(
        Task::new(|done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                done.complete();
            });
            Ok(())
        })
        .named("fetch"),
    );

    scheduler.register(
        Task::new(|done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.complete();
            });
            Ok(())
        })
        .named("parse")
        .after("fetch"),
    );

    scheduler.register(
        Task::new(|done| {
            done.complete();
            Ok(())
        })
        .named("render")
        .after("parse"),
    );

    scheduler.run_with(|| {
        println!("pipeline drained");
        Ok(())
    });

    while let Some(event) = events.next().await {
        println!("{event:?}");
        if event == Event::Complete {
            break;
        }
    }
}
