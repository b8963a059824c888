//! Defines the `Task` builder and per-task lifecycle state.
//!
//! A `Task` describes a single named unit of asynchronous work: an action
//! invoked with a [`CompletionHandle`] when the task starts, an optional
//! predecessor name gating the start, an optional callback run on natural
//! completion, and an optional timeout. Tasks are handed to
//! [`Scheduler::register`] for execution.
//!
//! Actions and callbacks report failure through an explicit `Result`; a
//! returned error is converted into an [`Event::Error`] notification and
//! never unwinds into the caller of `register` or `run`.
//!
//! [`Scheduler::register`]: crate::Scheduler::register
//! [`Event::Error`]: crate::Event::Error

use std::{
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use crate::{scheduler::CompletionHandle, timer::TimerGuard};

/// The failure payload an action or callback may return.
///
/// Failures are surfaced on the event feed as [`Event::Error`] and never
/// propagated out of the scheduler's API.
///
/// [`Event::Error`]: crate::Event::Error
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type Action = Box<dyn FnOnce(CompletionHandle) -> Result<(), ActionError> + Send>;
pub(crate) type Callback = Box<dyn FnOnce() -> Result<(), ActionError> + Send>;

/// Lifecycle state of a registered task.
///
/// The success path is Idle → Running → Completed, exactly once. Cancellation
/// (explicit or by timeout) moves Idle or Running to Canceled. No other
/// transition is legal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, not yet dispatched.
    Idle,

    /// Dispatched; its action has been invoked and its completion handle has
    /// not fired yet.
    Running,

    /// The completion handle fired while the task was not canceled.
    Completed,

    /// Removed by an explicit cancel or an expired timeout.
    Canceled,
}

/// A named unit of asynchronous work for a [`Scheduler`].
///
/// The action receives a [`CompletionHandle`] when the task starts and must
/// eventually fire it to signal completion; until then the task counts as
/// pending and blocks any task naming it as predecessor.
///
/// # Example
/// ```
/// # use taskdrain::{Scheduler, Task};
/// #
/// let scheduler = Scheduler::new();
///
/// scheduler.register(
///     Task::new(|done| {
///         done.complete();
///         Ok(())
///     })
///     .named("warmup"),
/// );
///
/// scheduler.register(
///     Task::new(|done| {
///         done.complete();
///         Ok(())
///     })
///     .named("serve")
///     .after("warmup"),
/// );
///
/// scheduler.run();
/// ```
///
/// [`Scheduler`]: crate::Scheduler
#[must_use = "tasks do nothing unless registered with a scheduler"]
pub struct Task {
    pub(crate) name: Option<String>,
    pub(crate) predecessor: Option<String>,
    pub(crate) action: Action,
    pub(crate) callback: Option<Callback>,
    pub(crate) timeout: Option<Duration>,
}

impl Task {
    /// Creates a task around the given action.
    ///
    /// Without further configuration the task gets a generated unique name,
    /// no predecessor, no completion callback, and no timeout.
    pub fn new(
        action: impl FnOnce(CompletionHandle) -> Result<(), ActionError> + Send + 'static,
    ) -> Self {
        Task {
            name: None,
            predecessor: None,
            action: Box::new(action),
            callback: None,
            timeout: None,
        }
    }

    /// Names the task.
    ///
    /// The name must be unique among currently pending tasks; registration
    /// returns `false` otherwise.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Gates the task on another named task.
    ///
    /// The task will not start while a task with that name is still pending.
    /// A predecessor name that was never registered, or that has already
    /// finished, counts as immediately satisfied.
    pub fn after(mut self, predecessor: impl Into<String>) -> Self {
        self.predecessor = Some(predecessor.into());
        self
    }

    /// Attaches a callback invoked once on natural (non-canceled) completion.
    ///
    /// A returned error is reported through the event feed and does not
    /// affect the rest of the drain.
    pub fn on_complete(
        mut self,
        callback: impl FnOnce() -> Result<(), ActionError> + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Bounds the task's running time.
    ///
    /// The timer is armed when the task starts; if the completion handle has
    /// not fired after `duration`, the task is force-canceled and a timeout
    /// event is emitted. A zero duration clears a previously set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

// A task as it lives in the scheduler's registry. The action is taken out
// when the task starts, the callback when it completes.
pub(crate) struct TaskEntry {
    pub(crate) state: TaskState,
    pub(crate) predecessor: Option<String>,
    pub(crate) action: Option<Action>,
    pub(crate) callback: Option<Callback>,
    pub(crate) timer: Option<TimerGuard>,
    // The fired flag of the completion handle issued at start. Names may be
    // reused across registrations, so a completion is only honored when the
    // firing handle carries this exact flag.
    pub(crate) fired: Option<Arc<AtomicBool>>,
}

impl TaskEntry {
    pub(crate) fn new(task: Task) -> Self {
        TaskEntry {
            state: TaskState::Idle,
            predecessor: task.predecessor,
            action: Some(task.action),
            callback: task.callback,
            timer: None,
            fired: None,
        }
    }
}
