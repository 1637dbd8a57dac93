//! Time-ordered message queue shared between producers and the worker.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Error;
use crate::message::{self, Message, MessageFactory};

/// Poll interval while the queue is empty — the worker rechecks the stop
/// flag at this cadence even if no wakeup arrives.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Queue of pending messages, ordered by `handle_time` ascending and
/// FIFO-stable for equal times.
///
/// One mutex guards the deque, the stop flag, and the consumer-blocked
/// flag together; keeping all three under a single lock closes the
/// missed-wakeup window between "signal" and "recompute wait". The single
/// consumer is the machine's worker thread; producers may insert from any
/// thread.
#[derive(Debug)]
pub(crate) struct MessageQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
    epoch: Instant,
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Message>,
    stopped: bool,
    consumer_blocked: bool,
}

impl MessageQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                stopped: false,
                consumer_blocked: false,
            }),
            ready: Condvar::new(),
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed on this queue's monotonic clock.
    pub(crate) fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    /// Inserts in time order, scanning from the head. The blocked consumer
    /// is woken when the queue was empty, the message became the new head,
    /// or the message is immediately eligible. Hands the message back once
    /// the queue has been stopped so the caller can reclaim it.
    pub(crate) fn insert(&self, msg: Message) -> Result<(), Message> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(msg);
        }
        let was_empty = inner.queue.is_empty();
        let immediate = msg.handle_time() == 0;
        let pos = inner
            .queue
            .iter()
            .position(|queued| queued.handle_time() > msg.handle_time())
            .unwrap_or(inner.queue.len());
        inner.queue.insert(pos, msg);
        if inner.consumer_blocked && (was_empty || pos == 0 || immediate) {
            self.ready.notify_one();
        }
        Ok(())
    }

    /// Removes every queued message with a matching name, returning them
    /// for reclamation. Used to cancel timers.
    pub(crate) fn remove_by_name(&self, name: i32) -> Vec<Message> {
        let mut inner = self.inner.lock().unwrap();
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(inner.queue.len());
        for msg in inner.queue.drain(..) {
            if msg.name() == name {
                removed.push(msg);
            } else {
                kept.push_back(msg);
            }
        }
        inner.queue = kept;
        removed
    }

    /// Blocking pop used only by the worker thread.
    ///
    /// Pops the head as soon as it is due; otherwise waits with a deadline
    /// computed from the head's remaining time (or [`IDLE_POLL`] while
    /// empty) and re-evaluates on wakeup. Returns `None` once the queue
    /// has been stopped.
    pub(crate) fn next_ready(&self) -> Option<Message> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.stopped {
                return None;
            }
            let now = self.now_ms();
            let wait = match inner.queue.front().map(Message::handle_time) {
                Some(at) if at <= now => return inner.queue.pop_front(),
                Some(at) => Duration::from_millis((at - now) as u64),
                None => IDLE_POLL,
            };
            inner.consumer_blocked = true;
            inner = self.ready.wait_timeout(inner, wait).unwrap().0;
            inner.consumer_blocked = false;
        }
    }

    /// Splices `batch` at the head in order, stamped immediately eligible.
    /// These become the next messages dispatched, ahead of anything queued
    /// at time zero before the splice.
    pub(crate) fn replay_front(&self, batch: Vec<Message>) {
        let mut inner = self.inner.lock().unwrap();
        for mut msg in batch.into_iter().rev() {
            msg.set_handle_time(0);
            inner.queue.push_front(msg);
        }
        if inner.consumer_blocked {
            self.ready.notify_one();
        }
    }

    /// Stops the queue: future inserts are rejected and the blocked
    /// consumer is woken so it can exit.
    pub(crate) fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        self.ready.notify_one();
    }

    /// Removes and returns everything still queued. Used by the worker to
    /// reclaim undispatched messages during shutdown.
    pub(crate) fn drain(&self) -> Vec<Message> {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.drain(..).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

/// Stamps `msg` with its eligibility time and enqueues it, reclaiming it
/// on rejection. Shared by the producer handle and `StateOps`.
pub(crate) fn submit(
    queue: &MessageQueue,
    factory: &MessageFactory,
    mut msg: Message,
    delay_ms: i64,
) -> Result<(), Error> {
    let name = msg.name();
    if message::is_reserved(name) {
        factory.reclaim(msg);
        return Err(Error::ReservedName(name));
    }
    let at = if delay_ms > 0 { queue.now_ms() + delay_ms } else { 0 };
    msg.set_handle_time(at);
    match queue.insert(msg) {
        Ok(()) => Ok(()),
        Err(rejected) => {
            debug!(name, "send rejected, queue stopped");
            factory.reclaim(rejected);
            Err(Error::Stopped)
        }
    }
}
