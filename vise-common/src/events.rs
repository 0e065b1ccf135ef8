//! Event types and the shared event queue
//!
//! The browser has no native push channel, so the server collects events
//! from every producer (stage workers, request handlers) in one FIFO queue
//! and delivers them one at a time through the long-poll route. The queue
//! is constructed once in `main` and injected wherever it is needed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Category of a pushed event, rendered as the middle token of the wire line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Free-form text shown to the user
    Message,
    /// UI control directive (e.g. `_state update_now`)
    Command,
    /// Append-only training log text
    Log,
    /// `completed/total` progress counter
    Progress,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Command => "command",
            EventKind::Log => "log",
            EventKind::Progress => "progress",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pushed event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub sender: String,
    pub kind: EventKind,
    pub payload: String,
}

impl Event {
    pub fn new(sender: impl Into<String>, kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            kind,
            payload: payload.into(),
        }
    }

    /// Wire form delivered to the long-poll client: `<sender> <kind> <payload>`.
    ///
    /// The payload must not contain newlines; producers are responsible for
    /// pushing one event per logical line.
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.sender, self.kind, self.payload)
    }
}

/// Thread-safe unbounded FIFO of [`Event`]s.
///
/// Multiple producers (sync worker threads or async tasks) push; a single
/// consumer pops with a bounded wait. Push order is preserved as long as the
/// pushes themselves are serialized.
pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
    ready: Notify,
    drained: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Append an event and wake one waiting consumer.
    ///
    /// Callable from any thread; never blocks beyond the internal lock.
    pub fn push(&self, event: Event) {
        let mut queue = self.inner.lock().expect("event queue mutex poisoned");
        queue.push_back(event);
        drop(queue);
        self.ready.notify_one();
    }

    /// Pop the front event, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` once the timeout elapses with the queue still empty.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeup before checking, so a push between the
            // check and the await cannot be lost.
            let notified = self.ready.notified();
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn try_pop(&self) -> Option<Event> {
        let mut queue = self.inner.lock().expect("event queue mutex poisoned");
        let event = queue.pop_front();
        if event.is_some() && queue.is_empty() {
            self.drained.notify_waiters();
        }
        event
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("event queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once the queue is empty. Used for diagnostics and orderly
    /// shutdown; does not consume events itself.
    pub async fn drain_wait(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
