//! Typed notification feed emitted by the [`Scheduler`].
//!
//! Subscribers receive lifecycle events over an unbounded channel wrapped in
//! an [`EventStream`]. Subscriptions can cover the whole feed or be filtered
//! down to a set of [`EventKind`]s. Dropping the stream unsubscribes; the
//! feed prunes dead subscribers on the next emission.
//!
//! Events are sent while the scheduler holds its internal lock, so the order
//! observed on any stream equals the order the corresponding state mutations
//! happened in.
//!
//! [`Scheduler`]: crate::Scheduler

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    Stream,
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use pin_project_lite::pin_project;

/// A lifecycle notification emitted by the [`Scheduler`].
///
/// [`Scheduler`]: crate::Scheduler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A task started running.
    Begin(String),

    /// A task completed naturally; suppressed for canceled tasks.
    End(String),

    /// A task was canceled by an explicit [`cancel`](crate::Scheduler::cancel) call.
    Cancel(String),

    /// A task was force-canceled by its timeout timer.
    Timeout(String),

    /// An action, per-task callback, or drain callback failed.
    ///
    /// `name` is `None` for failures of aggregate-completion callbacks, which
    /// are not tied to a single task.
    Error {
        name: Option<String>,
        message: String,
    },

    /// Aggregate drain progress, `0..=100`.
    Percentage(u8),

    /// The registry drained to zero pending tasks.
    Complete,
}

impl Event {
    /// Returns the kind of this event, for subscription filtering.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Begin(_) => EventKind::Begin,
            Event::End(_) => EventKind::End,
            Event::Cancel(_) => EventKind::Cancel,
            Event::Timeout(_) => EventKind::Timeout,
            Event::Error { .. } => EventKind::Error,
            Event::Percentage(_) => EventKind::Percentage,
            Event::Complete => EventKind::Complete,
        }
    }
}

/// Discriminant of an [`Event`], used to subscribe to a subset of the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Begin,
    End,
    Cancel,
    Timeout,
    Error,
    Percentage,
    Complete,
}

pin_project! {
    /// A stream of scheduler [`Event`]s.
    ///
    /// Obtained from [`Scheduler::subscribe`] or [`Scheduler::subscribe_to`].
    /// Dropping the stream unsubscribes it from the feed.
    ///
    /// [`Scheduler::subscribe`]: crate::Scheduler::subscribe
    /// [`Scheduler::subscribe_to`]: crate::Scheduler::subscribe_to
    #[must_use = "streams do nothing unless polled"]
    pub struct EventStream {
        #[pin]
        receiver: UnboundedReceiver<Event>,
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.project().receiver.poll_next(cx)
    }
}

struct Subscriber {
    sender: UnboundedSender<Event>,
    // `None` subscribes to every event kind.
    kinds: Option<Vec<EventKind>>,
}

impl Subscriber {
    fn wants(&self, kind: EventKind) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

// The subscriber registry held by the scheduler. Emission never blocks: the
// channels are unbounded, so events can be sent while the scheduler lock is
// held without running any user code.
pub(crate) struct EventFeed {
    subscribers: Vec<Subscriber>,
}

impl EventFeed {
    pub(crate) fn new() -> Self {
        EventFeed {
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn attach(&mut self, kinds: Option<Vec<EventKind>>) -> EventStream {
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers.push(Subscriber { sender, kinds });
        EventStream { receiver }
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.subscribers.retain(|subscriber| {
            if !subscriber.wants(event.kind()) {
                return !subscriber.sender.is_closed();
            }
            subscriber.sender.unbounded_send(event.clone()).is_ok()
        });
    }
}
