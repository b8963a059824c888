//! Provides the `Scheduler` that drives named tasks to completion.
//!
//! This module owns the registry of pending tasks, decides which tasks are
//! eligible to start, tracks aggregate drain progress, and funnels every
//! state mutation through a single lock so that registrations, completions,
//! cancellations, and timer expirations never interleave.
//!
//! Tasks are dispatched in registration order. A task gated on a predecessor
//! stays idle while any task with that name is still pending. Once the
//! registry drains to zero, queued aggregate-completion callbacks fire in
//! order and the scheduler re-arms itself for the next batch.
//!
//! User code (actions, per-task callbacks, drain callbacks) always runs with
//! the lock released, so an action may fire its completion handle
//! synchronously from inside its own invocation.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::{
    event::{Event, EventFeed, EventKind, EventStream},
    task::{Action, Callback, Task, TaskEntry, TaskState},
    timer,
};

/// Registers, dispatches, and drains named interdependent tasks.
///
/// The scheduler is idle until [`run`] is called; registrations made before
/// that are queued. While draining, every completion or cancellation
/// re-evaluates the registry and starts newly-eligible tasks, in registration
/// order. When the pending count reaches zero a `Complete` event fires, all
/// queued drain callbacks run once in order, and the internal counters reset
/// so the scheduler can be reused for the next batch.
///
/// Cloning is shallow; all clones share the same registry and event feed.
///
/// [`run`]: Scheduler::run
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    // Registration order of pending task names; doubles as dispatch order.
    order: Vec<String>,
    registry: HashMap<String, TaskEntry>,
    // Names that still block a dependent: every pending (idle or running)
    // task is in here until it completes or is canceled.
    waiting: HashSet<String>,
    // Timeouts are kept apart from the entries so one can be configured
    // before its task is registered.
    timeouts: HashMap<String, Duration>,
    running: bool,
    // Highest pending count since the registry last drained to zero; the
    // denominator for percentage.
    peak: usize,
    completion_queue: Vec<Callback>,
    feed: EventFeed,
    name_seq: u64,
}

impl Inner {
    fn percentage(&self) -> u8 {
        let pending = self.registry.len();
        if pending == 0 || self.peak == 0 {
            return 100;
        }
        (100 - (pending * 100) / self.peak) as u8
    }

    fn generate_name(&mut self) -> String {
        loop {
            self.name_seq += 1;
            let name = format!("task-{:06x}", self.name_seq);
            if !self.registry.contains_key(&name) {
                return name;
            }
        }
    }

    // Drops the task from every bookkeeping structure. Dropping the entry's
    // timer guard defuses a still-armed timeout.
    fn remove_task(&mut self, name: &str) -> Option<TaskEntry> {
        let entry = self.registry.remove(name)?;
        self.order.retain(|n| n != name);
        self.waiting.remove(name);
        Some(entry)
    }

    // Marks the first eligible idle task as running, emits its begin event,
    // and hands its action out for invocation outside the lock.
    fn start_next(&mut self) -> Option<(String, Action, Option<Duration>)> {
        let name = self
            .order
            .iter()
            .find(|name| {
                let Some(entry) = self.registry.get(*name) else {
                    return false;
                };
                entry.state == TaskState::Idle
                    && entry
                        .predecessor
                        .as_ref()
                        .is_none_or(|p| !self.waiting.contains(p))
            })?
            .clone();

        let entry = self.registry.get_mut(&name)?;
        entry.state = TaskState::Running;
        let action = entry.action.take()?;
        self.feed.emit(Event::Begin(name.clone()));
        let timeout = self.timeouts.get(&name).copied();
        Some((name, action, timeout))
    }
}

impl Scheduler {
    /// Creates a new, idle `Scheduler` with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Scheduler {
            inner: Arc::new(Mutex::new(Inner {
                order: Vec::new(),
                registry: HashMap::with_capacity(8),
                waiting: HashSet::with_capacity(8),
                timeouts: HashMap::new(),
                running: false,
                peak: 0,
                completion_queue: Vec::new(),
                feed: EventFeed::new(),
                name_seq: 0,
            })),
        }
    }

    /// Subscribes to the full event feed.
    ///
    /// Dropping the returned stream unsubscribes it.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.inner.lock().unwrap().feed.attach(None)
    }

    /// Subscribes to a subset of event kinds.
    ///
    /// Events of other kinds are never delivered to the returned stream.
    #[must_use]
    pub fn subscribe_to(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventStream {
        self.inner
            .lock()
            .unwrap()
            .feed
            .attach(Some(kinds.into_iter().collect()))
    }

    /// Registers a task, returning whether it was accepted.
    ///
    /// Returns `false`, with no state change, if a task with the same name is
    /// already pending. Otherwise the task enters the registry idle and a
    /// refresh pass starts it as soon as the scheduler is running and its
    /// predecessor (if any) is no longer pending.
    ///
    /// A task without an explicit name gets a generated unique one.
    pub fn register(&self, mut task: Task) -> bool {
        {
            let mut guard = self.inner.lock().unwrap();
            let name = match task.name.take() {
                Some(name) => name,
                None => guard.generate_name(),
            };
            if guard.registry.contains_key(&name) {
                return false;
            }
            if let Some(duration) = task.timeout.take() {
                if duration > Duration::ZERO {
                    guard.timeouts.insert(name.clone(), duration);
                } else {
                    guard.timeouts.remove(&name);
                }
            }
            guard.order.push(name.clone());
            guard.waiting.insert(name.clone());
            guard.registry.insert(name, TaskEntry::new(task));
            if guard.registry.len() > guard.peak {
                guard.peak = guard.registry.len();
            }
        }
        Self::refresh(&self.inner);
        true
    }

    /// Cancels a pending task by name.
    ///
    /// The task is removed immediately: its completion callback and `End`
    /// event are suppressed, a `Cancel` event fires instead, and a refresh
    /// pass starts any task that was gated on it. Returns `false` if no
    /// pending task has that name.
    ///
    /// Cancellation does not stop an in-flight action's side effects; a
    /// completion handle fired later by the canceled action is a no-op.
    pub fn cancel(&self, name: &str) -> bool {
        {
            let mut guard = self.inner.lock().unwrap();
            let Some(mut entry) = guard.remove_task(name) else {
                return false;
            };
            entry.state = TaskState::Canceled;
            guard.feed.emit(Event::Cancel(name.to_string()));
        }
        Self::refresh(&self.inner);
        true
    }

    /// Cancels every currently pending task.
    ///
    /// The name list is snapshotted first, since each cancellation mutates
    /// the registry.
    pub fn cancel_all(&self) -> bool {
        let names: Vec<String> = self.inner.lock().unwrap().order.clone();
        for name in &names {
            self.cancel(name);
        }
        true
    }

    /// Configures a timeout for a named task.
    ///
    /// The timer is armed when the task starts, so the timeout may be set for
    /// a task that is not yet registered. `None` or a zero duration clears a
    /// previously configured timeout.
    pub fn set_timeout(&self, name: &str, timeout: Option<Duration>) {
        let mut guard = self.inner.lock().unwrap();
        match timeout {
            Some(duration) if duration > Duration::ZERO => {
                guard.timeouts.insert(name.to_string(), duration);
            }
            _ => {
                guard.timeouts.remove(name);
            }
        }
    }

    /// Marks the scheduler running and dispatches every eligible task.
    ///
    /// Safe to call repeatedly; each call simply triggers another refresh
    /// pass.
    pub fn run(&self) -> &Self {
        self.inner.lock().unwrap().running = true;
        Self::refresh(&self.inner);
        self
    }

    /// Like [`run`], additionally queueing a callback fired once the whole
    /// registry has drained.
    ///
    /// Callbacks accumulate across calls and run in queueing order after the
    /// `Complete` event. A callback returning an error is reported via an
    /// `Error` event and does not prevent the remaining callbacks from
    /// running.
    ///
    /// [`run`]: Scheduler::run
    pub fn run_with(
        &self,
        on_drain: impl FnOnce() -> Result<(), crate::ActionError> + Send + 'static,
    ) -> &Self {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.running = true;
            guard.completion_queue.push(Box::new(on_drain));
        }
        Self::refresh(&self.inner);
        self
    }

    /// Returns `true` while the named task is actively executing.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        let guard = self.inner.lock().unwrap();
        guard
            .registry
            .get(name)
            .is_some_and(|entry| entry.state == TaskState::Running)
    }

    /// Returns `true` while the named task is registered but not yet
    /// dispatched.
    #[must_use]
    pub fn is_waiting(&self, name: &str) -> bool {
        let guard = self.inner.lock().unwrap();
        guard
            .registry
            .get(name)
            .is_some_and(|entry| entry.state == TaskState::Idle)
    }

    /// Returns `true` while the named task is pending, idle or running.
    #[must_use]
    pub fn is_pending(&self, name: &str) -> bool {
        self.inner.lock().unwrap().registry.contains_key(name)
    }

    /// Returns `true` while the scheduler is actively draining.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// Number of currently pending tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().registry.len()
    }

    /// Aggregate drain progress, `0..=100`.
    ///
    /// Computed against the highest pending count observed since the last
    /// full drain; exactly `100` once nothing is pending.
    #[must_use]
    pub fn percentage(&self) -> u8 {
        self.inner.lock().unwrap().percentage()
    }

    // The re-evaluation pass invoked after every registration, completion,
    // and cancellation. Starts eligible tasks one at a time, releasing the
    // lock around each action so user code can re-enter the scheduler.
    fn refresh(inner: &Arc<Mutex<Inner>>) {
        loop {
            let next = {
                let mut guard = inner.lock().unwrap();
                if !guard.running {
                    return;
                }
                match guard.start_next() {
                    Some((name, action, timeout)) => {
                        let handle = CompletionHandle {
                            name: name.clone(),
                            inner: Arc::downgrade(inner),
                            fired: Arc::new(AtomicBool::new(false)),
                        };
                        if let Some(entry) = guard.registry.get_mut(&name) {
                            entry.fired = Some(Arc::clone(&handle.fired));
                        }
                        if let Some(duration) = timeout {
                            let weak = Arc::downgrade(inner);
                            let expired = name.clone();
                            let timer = timer::arm(duration, move || {
                                if let Some(strong) = weak.upgrade() {
                                    Self::expire(&strong, &expired);
                                }
                            });
                            if let Some(entry) = guard.registry.get_mut(&name) {
                                entry.timer = Some(timer);
                            }
                        }
                        Some((name, action, handle))
                    }
                    None => None,
                }
            };

            let Some((name, action, handle)) = next else {
                break;
            };

            // A synchronously failing action counts as an immediate failed
            // completion; the drain continues.
            if let Err(err) = action(handle.clone()) {
                inner.lock().unwrap().feed.emit(Event::Error {
                    name: Some(name),
                    message: err.to_string(),
                });
                handle.complete();
            }
        }

        let callbacks = {
            let mut guard = inner.lock().unwrap();
            // A nested refresh, reached through a synchronous completion, may
            // have finished the drain already.
            if !guard.running {
                return;
            }
            if guard.registry.is_empty() {
                guard.running = false;
                guard.peak = 0;
                guard.feed.emit(Event::Percentage(100));
                guard.feed.emit(Event::Complete);
                std::mem::take(&mut guard.completion_queue)
            } else {
                let percentage = guard.percentage();
                guard.feed.emit(Event::Percentage(percentage));
                return;
            }
        };

        for callback in callbacks {
            if let Err(err) = callback() {
                inner.lock().unwrap().feed.emit(Event::Error {
                    name: None,
                    message: err.to_string(),
                });
            }
        }
    }

    // Natural completion, reached through a fired completion handle. The
    // handle's flag must match the one recorded when the task started:
    // after a cancel or timeout the name may already belong to a freshly
    // registered task, and a stale handle must not complete that one.
    fn finish(inner: &Arc<Mutex<Inner>>, name: &str, fired: &Arc<AtomicBool>) {
        let callback = {
            let mut guard = inner.lock().unwrap();
            let current = guard
                .registry
                .get(name)
                .and_then(|entry| entry.fired.as_ref())
                .is_some_and(|flag| Arc::ptr_eq(flag, fired));
            if !current {
                // Already canceled or timed out; the handle is stale.
                return;
            }
            let Some(mut entry) = guard.remove_task(name) else {
                return;
            };
            entry.state = TaskState::Completed;
            guard.feed.emit(Event::End(name.to_string()));
            entry.callback.take()
        };

        if let Some(callback) = callback {
            if let Err(err) = callback() {
                inner.lock().unwrap().feed.emit(Event::Error {
                    name: Some(name.to_string()),
                    message: err.to_string(),
                });
            }
        }

        Self::refresh(inner);
    }

    // Timer expiry: same removal path as an explicit cancel, but the emitted
    // event is `Timeout`.
    fn expire(inner: &Arc<Mutex<Inner>>, name: &str) {
        {
            let mut guard = inner.lock().unwrap();
            let Some(mut entry) = guard.remove_task(name) else {
                return;
            };
            entry.state = TaskState::Canceled;
            guard.feed.emit(Event::Timeout(name.to_string()));
        }
        Self::refresh(inner);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot completion signal handed to every started action.
///
/// Firing the handle marks its task completed, emits the `End` event, runs
/// the task's callback, and cascades a refresh to any task gated on this one.
/// The first call wins: later calls, and calls for a task that was canceled
/// or timed out in the meantime, are no-ops, even when the name has since
/// been reused for a newly registered task.
///
/// The handle may be cloned and fired from any thread.
#[derive(Clone)]
pub struct CompletionHandle {
    name: String,
    inner: Weak<Mutex<Inner>>,
    fired: Arc<AtomicBool>,
}

impl CompletionHandle {
    /// Signals that the task's unit of work has finished.
    pub fn complete(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        Scheduler::finish(&inner, &self.name, &self.fired);
    }

    /// The name of the task this handle completes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
