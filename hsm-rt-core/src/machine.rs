//! Public facade: machine assembly, lifecycle, and the producer handle.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::info;

use crate::error::Error;
use crate::handler::StateMachineHandler;
use crate::message::{Message, MessageFactory};
use crate::queue::{self, MessageQueue};
use crate::state::State;
use crate::tree::StateId;

/// A hierarchical state machine driven by a dedicated worker thread.
///
/// Build the tree with [`add_state`](StateMachine::add_state), pick a leaf
/// with [`set_initial_state`](StateMachine::set_initial_state), then call
/// [`start`](StateMachine::start): the worker thread spawns and performs
/// initial entry root-to-leaf. Every `State` callback runs on that one
/// thread. Producers enqueue messages from any thread through this type or
/// a cloned [`MachineHandle`].
///
/// Registration is only possible before `start`; afterwards the tree is
/// owned by the worker and registration calls return
/// [`Error::AlreadyStarted`].
pub struct StateMachine {
    handle: MachineHandle,
    handler: Option<StateMachineHandler>,
    worker: Option<JoinHandle<()>>,
}

impl StateMachine {
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = name.into().into();
        let queue = Arc::new(MessageQueue::new());
        let factory = Arc::new(MessageFactory::new());
        let chain = Arc::new(Mutex::new(Vec::new()));
        let handler = StateMachineHandler::new(
            name.clone(),
            queue.clone(),
            factory.clone(),
            chain.clone(),
        );
        Self {
            handle: MachineHandle {
                name,
                queue,
                factory,
                chain,
            },
            handler: Some(handler),
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.handle.name
    }

    fn handler_mut(&mut self) -> Result<&mut StateMachineHandler, Error> {
        self.handler.as_mut().ok_or(Error::AlreadyStarted)
    }

    /// Registers a state under `parent` (`None` for a root). Registering
    /// an existing name again is idempotent when the parentage matches and
    /// an error when it does not.
    pub fn add_state(
        &mut self,
        state: Box<dyn State>,
        parent: Option<StateId>,
    ) -> Result<StateId, Error> {
        self.handler_mut()?.add_state(state, parent)
    }

    /// Unregisters a state. Returns `Ok(false)` without removing anything
    /// while the node is active or still has children.
    pub fn remove_state(&mut self, id: StateId) -> Result<bool, Error> {
        Ok(self.handler_mut()?.remove_state(id))
    }

    /// Designates the leaf the initial transition will enter.
    pub fn set_initial_state(&mut self, id: StateId) -> Result<(), Error> {
        self.handler_mut()?.set_initial_state(id)
    }

    /// Installs a diagnostic hook invoked on the worker thread whenever no
    /// active state consumes a message. The default logs a warning.
    pub fn on_unhandled(
        &mut self,
        hook: impl FnMut(&Message) + Send + 'static,
    ) -> Result<(), Error> {
        self.handler_mut()?.on_unhandled(Box::new(hook));
        Ok(())
    }

    /// Seals the tree and spawns the worker thread. Initial entry runs on
    /// the worker via an internal message queued ahead of everything else,
    /// so sends issued before `start` are dispatched after entry.
    pub fn start(&mut self) -> Result<(), Error> {
        let mut handler = self.handler.take().ok_or(Error::AlreadyStarted)?;
        if let Err(err) = handler.build_tree_complete() {
            self.handler = Some(handler);
            return Err(err);
        }
        let worker = thread::Builder::new()
            .name(format!("hsm-{}", self.handle.name))
            .spawn(move || handler.run())?;
        self.worker = Some(worker);
        info!(machine = %self.handle.name, "worker spawned");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// A cheap cloneable producer handle usable from other threads.
    pub fn handle(&self) -> MachineHandle {
        self.handle.clone()
    }

    pub fn send(&self, name: i32) -> Result<(), Error> {
        self.handle.send(name)
    }

    pub fn send_with_params(&self, name: i32, param1: i32, param2: i32) -> Result<(), Error> {
        self.handle.send_with_params(name, param1, param2)
    }

    pub fn send_with_payload<P: Any + Send + Sync>(
        &self,
        name: i32,
        payload: P,
    ) -> Result<(), Error> {
        self.handle.send_with_payload(name, payload)
    }

    pub fn send_message(&self, msg: Message) -> Result<(), Error> {
        self.handle.send_message(msg)
    }

    pub fn obtain_message(&self, name: i32) -> Message {
        self.handle.obtain_message(name)
    }

    pub fn send_later(&self, name: i32, delay_ms: i64) -> Result<(), Error> {
        self.handle.send_later(name, delay_ms)
    }

    pub fn send_later_with_params(
        &self,
        name: i32,
        param1: i32,
        param2: i32,
        delay_ms: i64,
    ) -> Result<(), Error> {
        self.handle.send_later_with_params(name, param1, param2, delay_ms)
    }

    pub fn start_timer(&self, name: i32, interval_ms: i64) -> Result<(), Error> {
        self.handle.start_timer(name, interval_ms)
    }

    pub fn stop_timer(&self, name: i32) {
        self.handle.stop_timer(name);
    }

    /// Names of the currently entered states, root first. Empty before
    /// initial entry completes.
    pub fn active_states(&self) -> Vec<String> {
        self.handle.active_states()
    }

    /// Name of the current leaf state, if entry has completed.
    pub fn current_state_name(&self) -> Option<String> {
        self.handle.current_state_name()
    }

    /// Graceful shutdown: stop the queue, wake the worker, let it reclaim
    /// everything still queued without dispatching, then join it.
    pub fn stop_handler_thread(&mut self) {
        self.handle.queue.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.stop_handler_thread();
    }
}

/// Cloneable producer side of a [`StateMachine`].
///
/// Carries the send and timer operations plus the active-chain snapshot;
/// safe to use from any thread. Handles only touch the machine's message
/// queue, never the state hierarchy.
#[derive(Clone)]
pub struct MachineHandle {
    name: Arc<str>,
    queue: Arc<MessageQueue>,
    factory: Arc<MessageFactory>,
    chain: Arc<Mutex<Vec<String>>>,
}

impl MachineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues a message for immediate dispatch.
    pub fn send(&self, name: i32) -> Result<(), Error> {
        queue::submit(&self.queue, &self.factory, self.factory.obtain(name), 0)
    }

    pub fn send_with_params(&self, name: i32, param1: i32, param2: i32) -> Result<(), Error> {
        let msg = self.factory.obtain(name).with_params(param1, param2);
        queue::submit(&self.queue, &self.factory, msg, 0)
    }

    pub fn send_with_payload<P: Any + Send + Sync>(
        &self,
        name: i32,
        payload: P,
    ) -> Result<(), Error> {
        let msg = self.factory.obtain(name).with_payload(payload);
        queue::submit(&self.queue, &self.factory, msg, 0)
    }

    /// Enqueues an already-built message for immediate dispatch.
    pub fn send_message(&self, msg: Message) -> Result<(), Error> {
        queue::submit(&self.queue, &self.factory, msg, 0)
    }

    /// Pulls a message from the machine's recycling factory.
    pub fn obtain_message(&self, name: i32) -> Message {
        self.factory.obtain(name)
    }

    /// Enqueues a message eligible `delay_ms` milliseconds from now.
    pub fn send_later(&self, name: i32, delay_ms: i64) -> Result<(), Error> {
        queue::submit(&self.queue, &self.factory, self.factory.obtain(name), delay_ms)
    }

    pub fn send_later_with_params(
        &self,
        name: i32,
        param1: i32,
        param2: i32,
        delay_ms: i64,
    ) -> Result<(), Error> {
        let msg = self.factory.obtain(name).with_params(param1, param2);
        queue::submit(&self.queue, &self.factory, msg, delay_ms)
    }

    /// Schedules `name` to fire once after `interval_ms`.
    pub fn start_timer(&self, name: i32, interval_ms: i64) -> Result<(), Error> {
        self.send_later(name, interval_ms)
    }

    /// Cancels every pending occurrence of `name`. A timer whose message
    /// already left the queue is unaffected; cancelling concurrently with
    /// expiry can still observe one firing.
    pub fn stop_timer(&self, name: i32) {
        for msg in self.queue.remove_by_name(name) {
            self.factory.reclaim(msg);
        }
    }

    /// Names of the currently entered states, root first.
    pub fn active_states(&self) -> Vec<String> {
        self.chain.lock().unwrap().clone()
    }

    /// Name of the current leaf state, if entry has completed.
    pub fn current_state_name(&self) -> Option<String> {
        self.chain.lock().unwrap().last().cloned()
    }
}
