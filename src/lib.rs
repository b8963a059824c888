//! Named-task dependency scheduling with aggregated completion notification.
//!
//! `taskdrain` tracks a registry of named, possibly interdependent
//! asynchronous operations. Each task may be gated on at most one other named
//! task (its predecessor) and may carry a timeout that force-cancels it if it
//! never completes. The scheduler drains the whole registry to completion,
//! reporting progress through a typed event feed.
//!
//! The crate is designed to work independently of any specific async runtime.
//! Task actions receive a [`CompletionHandle`] and may fire it from any
//! thread or executor; the scheduler serializes all of its own bookkeeping
//! internally.
//!
//! Features include:
//! - A [`Scheduler`] holding the task registry, driving the drain-to-completion
//!   protocol, and answering state queries
//! - A [`Task`] builder describing a unit of work, its optional predecessor,
//!   completion callback, and timeout
//! - A one-shot, idempotent [`CompletionHandle`] handed to every started action
//! - An [`EventStream`] of lifecycle notifications (begin, end, cancel,
//!   timeout, error, percentage, complete) for observing progress without
//!   polling
//!
//! The scheduler provides ordering and bookkeeping, not parallel execution:
//! among simultaneously-eligible tasks, dispatch order equals registration
//! order, and every state mutation runs serialized with respect to every
//! other.

pub mod event;
pub mod scheduler;
pub mod task;
mod timer;

pub use event::{Event, EventKind, EventStream};
pub use scheduler::{CompletionHandle, Scheduler};
pub use task::{ActionError, Task, TaskState};
