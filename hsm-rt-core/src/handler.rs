//! The scheduler core: worker loop, dispatch, and the transition
//! algorithm.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::message::{Message, MessageFactory, SM_INIT};
use crate::queue::MessageQueue;
use crate::state::{State, StateOps};
use crate::tree::{StateId, StateRegistry};

/// Worker lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInit,
    Running,
}

/// Scheduler core owning the state registry, the active chain, and the
/// deferred-message buffer.
///
/// Built on the registration thread, then moved into the worker thread at
/// start — exclusive ownership of the hierarchy is enforced by the move,
/// not by locking. Producers only ever touch the shared queue.
pub(crate) struct StateMachineHandler {
    name: Arc<str>,
    registry: StateRegistry,
    /// Active chain, root first, current leaf last.
    state_vector: Vec<StateId>,
    /// Scratch walk of a transition target's ancestors, leaf first.
    sequence: Vec<StateId>,
    /// Which ids are registered, snapshotted when the tree is sealed.
    live: Vec<bool>,
    initial: Option<StateId>,
    phase: Phase,
    pending_switch: Option<StateId>,
    deferred: Vec<Message>,
    queue: Arc<MessageQueue>,
    factory: Arc<MessageFactory>,
    unhandled: Option<Box<dyn FnMut(&Message) + Send>>,
    /// Snapshot of active chain names, readable from producer handles.
    chain_names: Arc<Mutex<Vec<String>>>,
}

impl StateMachineHandler {
    pub(crate) fn new(
        name: Arc<str>,
        queue: Arc<MessageQueue>,
        factory: Arc<MessageFactory>,
        chain_names: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            name,
            registry: StateRegistry::new(),
            state_vector: Vec::new(),
            sequence: Vec::new(),
            live: Vec::new(),
            initial: None,
            phase: Phase::AwaitingInit,
            pending_switch: None,
            deferred: Vec::new(),
            queue,
            factory,
            unhandled: None,
            chain_names,
        }
    }

    pub(crate) fn add_state(
        &mut self,
        state: Box<dyn State>,
        parent: Option<StateId>,
    ) -> Result<StateId, Error> {
        self.registry.add(state, parent)
    }

    pub(crate) fn remove_state(&mut self, id: StateId) -> bool {
        self.registry.remove(id)
    }

    pub(crate) fn set_initial_state(&mut self, id: StateId) -> Result<(), Error> {
        if !self.registry.contains(id) {
            return Err(Error::UnknownState(id));
        }
        self.initial = Some(id);
        Ok(())
    }

    pub(crate) fn on_unhandled(&mut self, hook: Box<dyn FnMut(&Message) + Send>) {
        self.unhandled = Some(hook);
    }

    /// Seals the tree: validates the initial state, sizes the chain
    /// vectors from the forest's maximum depth, snapshots the live-id
    /// mask, and splices the init message at the queue head so initial
    /// entry happens on the worker thread, ahead of any early sends.
    pub(crate) fn build_tree_complete(&mut self) -> Result<(), Error> {
        match self.initial {
            Some(id) if self.registry.contains(id) => {}
            Some(id) => return Err(Error::UnknownState(id)),
            None => return Err(Error::NoInitialState),
        }
        let depth = self.registry.max_depth();
        self.state_vector.reserve_exact(depth);
        self.sequence.reserve_exact(depth);
        self.live = self.registry.live_mask();
        self.queue.replay_front(vec![self.factory.obtain(SM_INIT)]);
        Ok(())
    }

    /// Worker thread body. Pops ready messages until the queue is
    /// stopped, then drains and reclaims everything that never got
    /// dispatched, including deferred messages no transition replayed.
    pub(crate) fn run(mut self) {
        while let Some(msg) = self.queue.next_ready() {
            match self.phase {
                Phase::AwaitingInit if msg.name() == SM_INIT => self.enter_initial(),
                Phase::AwaitingInit => {
                    warn!(machine = %self.name, name = msg.name(), "dropping message received before init");
                }
                Phase::Running => self.dispatch(&msg),
            }
            self.factory.reclaim(msg);
        }
        for msg in self.queue.drain() {
            self.factory.reclaim(msg);
        }
        for msg in self.deferred.drain(..) {
            self.factory.reclaim(msg);
        }
        debug!(machine = %self.name, "worker stopped");
    }

    fn enter_initial(&mut self) {
        self.pending_switch = self.initial;
        self.resolve_transitions();
        self.phase = Phase::Running;
        info!(machine = %self.name, "state machine started");
    }

    /// Offers `msg` to the leaf state, bubbling up the active chain until
    /// some state consumes it, then resolves any requested transition.
    fn dispatch(&mut self, msg: &Message) {
        let Self {
            name,
            registry,
            state_vector,
            live,
            pending_switch,
            deferred,
            queue,
            factory,
            unhandled,
            ..
        } = self;
        let machine: &str = name;
        let live: &[bool] = live;
        let queue: &MessageQueue = queue;
        let factory: &MessageFactory = factory;
        let mut ops = StateOps {
            machine,
            live,
            pending_switch,
            deferred,
            queue,
            factory,
        };
        let mut consumed = false;
        for &id in state_vector.iter().rev() {
            if let Some(state) = registry.state_mut(id) {
                if state.handle(msg, &mut ops).is_handled() {
                    consumed = true;
                    break;
                }
            }
        }
        if !consumed {
            match unhandled {
                Some(hook) => hook(msg),
                None => warn!(machine, name = msg.name(), "no active state handled message"),
            }
        }
        self.resolve_transitions();
    }

    /// Applies pending transitions until none remain — entry of a new
    /// state may itself request another switch.
    fn resolve_transitions(&mut self) {
        let mut moved = false;
        while let Some(target) = self.pending_switch.take() {
            moved = true;
            self.perform_switch(target);
            let deferred = std::mem::take(&mut self.deferred);
            if !deferred.is_empty() {
                self.queue.replay_front(deferred);
            }
        }
        if moved {
            self.publish_chain();
        }
    }

    /// One transition: walk target→root collecting inactive ancestors
    /// until the lowest active ancestor (or the root), exit the current
    /// chain down to that ancestor, then enter the collected sequence
    /// parent→child. Switching to the current leaf walks zero nodes and
    /// is a no-op.
    fn perform_switch(&mut self, target: StateId) {
        let from = self.state_vector.last().copied();

        self.sequence.clear();
        let mut lca = None;
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if self.registry.is_active(id) {
                lca = Some(id);
                break;
            }
            self.sequence.push(id);
            cursor = self.registry.parent(id);
        }

        while let Some(&leaf) = self.state_vector.last() {
            if lca == Some(leaf) {
                break;
            }
            self.state_vector.pop();
            self.call_exit(leaf);
        }

        for walked in (0..self.sequence.len()).rev() {
            let id = self.sequence[walked];
            self.state_vector.push(id);
            self.call_enter(id);
        }

        info!(
            machine = %self.name,
            from = from.and_then(|id| self.registry.name_of(id)).unwrap_or("<none>"),
            to = self.registry.name_of(target).unwrap_or("<unknown>"),
            "state transition"
        );
    }

    fn call_enter(&mut self, id: StateId) {
        let Self {
            name,
            registry,
            live,
            pending_switch,
            deferred,
            queue,
            factory,
            ..
        } = self;
        let machine: &str = name;
        let live: &[bool] = live;
        let queue: &MessageQueue = queue;
        let factory: &MessageFactory = factory;
        registry.set_active(id, true);
        debug!(machine, state = registry.name_of(id).unwrap_or("?"), "enter");
        let mut ops = StateOps {
            machine,
            live,
            pending_switch,
            deferred,
            queue,
            factory,
        };
        if let Some(state) = registry.state_mut(id) {
            state.enter(&mut ops);
        }
    }

    fn call_exit(&mut self, id: StateId) {
        let Self {
            name,
            registry,
            live,
            pending_switch,
            deferred,
            queue,
            factory,
            ..
        } = self;
        let machine: &str = name;
        let live: &[bool] = live;
        let queue: &MessageQueue = queue;
        let factory: &MessageFactory = factory;
        debug!(machine, state = registry.name_of(id).unwrap_or("?"), "exit");
        let mut ops = StateOps {
            machine,
            live,
            pending_switch,
            deferred,
            queue,
            factory,
        };
        if let Some(state) = registry.state_mut(id) {
            state.exit(&mut ops);
        }
        registry.set_active(id, false);
    }

    fn publish_chain(&self) {
        let names: Vec<String> = self
            .state_vector
            .iter()
            .filter_map(|&id| self.registry.name_of(id).map(str::to_owned))
            .collect();
        *self.chain_names.lock().unwrap() = names;
    }
}
