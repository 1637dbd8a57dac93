//! Core runtime for hsm-rt: message queue, state tree, and dispatch loop.
//!
//! The engine is a cooperative single-worker-thread scheduler. A
//! [`StateMachine`] owns a time-ordered [`Message`] queue and a forest of
//! registered [`State`]s; its worker thread pops ready messages, offers
//! each to the current leaf state, bubbles unconsumed messages up the
//! active chain, and applies tree-structured enter/exit transitions when a
//! state calls [`StateOps::switch_state`].

mod error;
mod handler;
mod machine;
mod message;
mod queue;
mod state;
mod tree;

pub use error::Error;
pub use machine::{MachineHandle, StateMachine};
pub use message::{AnyPayload, Message, MessageFactory};
pub use state::{Handled, State, StateOps};
pub use tree::StateId;
