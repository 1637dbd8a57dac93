//! The state capability trait and the in-dispatch operations handle.

use std::any::Any;

use crate::error::Error;
use crate::message::{Message, MessageFactory};
use crate::queue::{self, MessageQueue};
use crate::tree::StateId;

/// Whether a state consumed a message. Unconsumed messages bubble to the
/// parent state; a miss across the whole active chain invokes the
/// machine's unhandled hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Yes,
    No,
}

impl Handled {
    pub fn is_handled(self) -> bool {
        matches!(self, Handled::Yes)
    }
}

/// A unit of behavior in the state hierarchy.
///
/// All three callbacks run only on the machine's worker thread, never
/// concurrently and never reentrantly, so implementations need no internal
/// locking for their own fields. `enter` is called once when the state
/// joins the active chain and is always paired with a later `exit`.
/// Callbacks must not panic; a panic tears down the worker thread, since
/// an inconsistent hierarchy is unsafe to continue from.
///
/// # Example
///
/// ```rust
/// use hsm_rt_core::{Handled, Message, State, StateOps};
///
/// const SCAN_DONE: i32 = 4;
///
/// struct Scanning {
///     results: Vec<String>,
/// }
///
/// impl State for Scanning {
///     fn name(&self) -> &str {
///         "scanning"
///     }
///
///     fn handle(&mut self, msg: &Message, _ops: &mut StateOps<'_>) -> Handled {
///         match msg.name() {
///             SCAN_DONE => {
///                 if let Some(ssid) = msg.payload::<String>() {
///                     self.results.push(ssid.clone());
///                 }
///                 Handled::Yes
///             }
///             _ => Handled::No,
///         }
///     }
/// }
/// ```
pub trait State: Send {
    /// Stable name identifying this state within its machine.
    fn name(&self) -> &str;

    /// Called once when the state joins the active chain.
    fn enter(&mut self, _ops: &mut StateOps<'_>) {}

    /// Called once when the state leaves the active chain.
    fn exit(&mut self, _ops: &mut StateOps<'_>) {}

    /// Attempts to consume `msg`. Return [`Handled::No`] to let the parent
    /// state try.
    fn handle(&mut self, msg: &Message, ops: &mut StateOps<'_>) -> Handled;
}

/// Operations available to a state while the worker is inside one of its
/// callbacks: transition requests, message deferral, and producer sends.
///
/// Only the dispatch loop can construct this, which confines
/// [`switch_state`](StateOps::switch_state) and
/// [`delay_message`](StateOps::delay_message) to state callbacks.
pub struct StateOps<'a> {
    pub(crate) machine: &'a str,
    pub(crate) live: &'a [bool],
    pub(crate) pending_switch: &'a mut Option<StateId>,
    pub(crate) deferred: &'a mut Vec<Message>,
    pub(crate) queue: &'a MessageQueue,
    pub(crate) factory: &'a MessageFactory,
}

impl StateOps<'_> {
    /// Requests a transition to `target`, resolved as soon as the current
    /// callback returns. A second request before resolution replaces the
    /// first. Ids never registered with this machine are rejected and the
    /// active chain is left unchanged.
    pub fn switch_state(&mut self, target: StateId) -> Result<(), Error> {
        if !self.live.get(target.index()).copied().unwrap_or(false) {
            tracing::error!(machine = self.machine, target = %target, "switch to unregistered state");
            return Err(Error::UnknownState(target));
        }
        *self.pending_switch = Some(target);
        Ok(())
    }

    /// Stashes a copy of `msg` for replay at the head of the queue once
    /// the next transition completes. Deferred messages that never see a
    /// transition are reclaimed, not dispatched, at teardown; bounding
    /// that buffer is the caller's responsibility.
    pub fn delay_message(&mut self, msg: &Message) {
        self.deferred.push(msg.clone());
    }

    /// Enqueues a message for immediate dispatch.
    pub fn send(&mut self, name: i32) -> Result<(), Error> {
        queue::submit(self.queue, self.factory, self.factory.obtain(name), 0)
    }

    pub fn send_with_params(&mut self, name: i32, param1: i32, param2: i32) -> Result<(), Error> {
        let msg = self.factory.obtain(name).with_params(param1, param2);
        queue::submit(self.queue, self.factory, msg, 0)
    }

    pub fn send_with_payload<P: Any + Send + Sync>(
        &mut self,
        name: i32,
        payload: P,
    ) -> Result<(), Error> {
        let msg = self.factory.obtain(name).with_payload(payload);
        queue::submit(self.queue, self.factory, msg, 0)
    }

    /// Enqueues a message eligible `delay_ms` milliseconds from now.
    pub fn send_later(&mut self, name: i32, delay_ms: i64) -> Result<(), Error> {
        queue::submit(self.queue, self.factory, self.factory.obtain(name), delay_ms)
    }

    /// Schedules `name` to fire once after `interval_ms`.
    pub fn start_timer(&mut self, name: i32, interval_ms: i64) -> Result<(), Error> {
        self.send_later(name, interval_ms)
    }

    /// Cancels every pending occurrence of `name`. A timer whose message
    /// was already dispatched is unaffected; callers must tolerate
    /// at-least-once firing when cancelling concurrently with expiry.
    pub fn stop_timer(&mut self, name: i32) {
        for msg in self.queue.remove_by_name(name) {
            self.factory.reclaim(msg);
        }
    }
}
