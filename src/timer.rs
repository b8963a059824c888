//! One-shot timers backing the scheduler's timeout monitor.
//!
//! Timers run on a shared thread pool so they fire independently of whatever
//! executor drives the rest of the application. A timer cannot be stopped
//! once armed, only defused: the expiry check is skipped if the associated
//! [`TimerGuard`] was defused (or dropped) first.
//!
//! Each armed timer occupies one pool thread for its full duration, so at
//! most 40 timers run concurrently; timers armed beyond that wait for a free
//! thread and fire late.

use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::executor::{ThreadPool, ThreadPoolBuilder};

static THREAD_POOL: OnceLock<ThreadPool> = OnceLock::new();

fn pool() -> &'static ThreadPool {
    THREAD_POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .pool_size(40)
            .create()
            .expect("Thread pool creation failed")
    })
}

/// Defuses the timer it was returned for when dropped.
pub(crate) struct TimerGuard {
    defused: Arc<AtomicBool>,
}

impl TimerGuard {
    pub(crate) fn defuse(&self) {
        self.defused.store(true, Ordering::Relaxed);
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.defuse();
    }
}

/// Arms a one-shot timer that runs `on_expire` after `duration`, unless the
/// returned guard is defused first.
pub(crate) fn arm(duration: Duration, on_expire: impl FnOnce() + Send + 'static) -> TimerGuard {
    let defused = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&defused);
    pool().spawn_ok(async move {
        std::thread::sleep(duration);
        if !flag.load(Ordering::Relaxed) {
            on_expire();
        }
    });
    TimerGuard { defused }
}
