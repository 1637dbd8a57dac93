//! # hsm-rt
//!
//! Threaded hierarchical state machine runtime with time-ordered message
//! dispatch.
//!
//! States nest inside parent states; messages go to the current leaf and
//! bubble upward until consumed. A dedicated worker thread per machine
//! runs every state callback, so state implementations need no internal
//! locking. Messages can be sent for immediate dispatch, scheduled for the
//! future, deferred until the next transition, or cancelled by name.
//!
//! ## Example
//!
//! ```rust
//! use hsm_rt::{Handled, Message, State, StateMachine, StateOps};
//!
//! const PING: i32 = 1;
//!
//! struct Idle;
//!
//! impl State for Idle {
//!     fn name(&self) -> &str {
//!         "idle"
//!     }
//!
//!     fn handle(&mut self, msg: &Message, _ops: &mut StateOps<'_>) -> Handled {
//!         match msg.name() {
//!             PING => Handled::Yes,
//!             _ => Handled::No,
//!         }
//!     }
//! }
//!
//! # fn main() -> Result<(), hsm_rt::Error> {
//! let mut machine = StateMachine::new("demo");
//! let idle = machine.add_state(Box::new(Idle), None)?;
//! machine.set_initial_state(idle)?;
//! machine.start()?;
//! machine.send(PING)?;
//! machine.stop_handler_thread();
//! # Ok(())
//! # }
//! ```

#[doc(inline)]
pub use hsm_rt_core::{
    AnyPayload, Error, Handled, MachineHandle, Message, MessageFactory, State, StateId,
    StateMachine, StateOps,
};
