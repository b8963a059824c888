//! Bounds a stuck task with a timeout and watches the forced cancellation.

use std::time::Duration;

use futures::StreamExt;
use taskdrain::{Event, Scheduler, Task};

#[tokio::main]
async fn main() {
    let scheduler = Scheduler::new();
    let mut events = scheduler.subscribe();

    // This action never fires its handle; only the timer can end it.
    scheduler.register(
        Task::new(|_done| Ok(()))
            .named("stuck")
            .timeout(Duration::from_millis(200)),
    );

    scheduler.register(
        Task::new(|done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.complete();
            });
            Ok(())
        })
        .named("healthy"),
    );

    scheduler.run();

    while let Some(event) = events.next().await {
        println!("{event:?}");
        if event == Event::Complete {
            break;
        }
    }
}
