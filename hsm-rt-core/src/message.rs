//! Message records and the recycling factory.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Opaque payload attached to a message. Shared behind an `Arc` so that
/// messages stay cheap to clone when deferred.
pub type AnyPayload = Arc<dyn Any + Send + Sync>;

/// Internal discriminant that triggers initial tree entry on the worker
/// thread. All negative names are reserved for the runtime.
pub(crate) const SM_INIT: i32 = -1;

pub(crate) fn is_reserved(name: i32) -> bool {
    name < 0
}

/// Upper bound on recycled messages retained by a factory.
const POOL_CAPACITY: usize = 64;

/// A typed event record dispatched through the state machine.
///
/// A message carries an integer discriminant, two integer parameters, and
/// an optional shared payload. `handle_time` is stamped by the scheduling
/// layer: milliseconds on the owning queue's monotonic clock, with zero
/// meaning immediately eligible. Messages are owned by exactly one
/// container at a time (factory pool, queue, or dispatch site).
///
/// # Example
///
/// ```rust
/// use hsm_rt_core::Message;
///
/// let msg = Message::new(7).with_params(80, 0).with_payload("ssid".to_string());
/// assert_eq!(msg.name(), 7);
/// assert_eq!(msg.param1(), 80);
/// assert_eq!(msg.payload::<String>().map(String::as_str), Some("ssid"));
/// ```
#[derive(Clone)]
pub struct Message {
    name: i32,
    param1: i32,
    param2: i32,
    payload: Option<AnyPayload>,
    handle_time: i64,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("name", &self.name)
            .field("param1", &self.param1)
            .field("param2", &self.param2)
            .field("has_payload", &self.payload.is_some())
            .field("handle_time", &self.handle_time)
            .finish()
    }
}

impl Message {
    /// Creates an immediately-eligible message with zeroed parameters.
    pub fn new(name: i32) -> Self {
        Self {
            name,
            param1: 0,
            param2: 0,
            payload: None,
            handle_time: 0,
        }
    }

    /// Sets both integer parameters.
    #[must_use]
    pub fn with_params(mut self, param1: i32, param2: i32) -> Self {
        self.param1 = param1;
        self.param2 = param2;
        self
    }

    /// Attaches an opaque payload.
    #[must_use]
    pub fn with_payload<P: Any + Send + Sync>(mut self, payload: P) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Event discriminant.
    pub fn name(&self) -> i32 {
        self.name
    }

    pub fn param1(&self) -> i32 {
        self.param1
    }

    pub fn param2(&self) -> i32 {
        self.param2
    }

    /// Downcasts the payload to a concrete type, if one is attached.
    pub fn payload<P: Any + Send + Sync>(&self) -> Option<&P> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }

    /// Milliseconds on the owning queue's clock at which this message
    /// becomes eligible. Zero means immediately.
    pub fn handle_time(&self) -> i64 {
        self.handle_time
    }

    pub(crate) fn set_handle_time(&mut self, at: i64) {
        self.handle_time = at;
    }

    fn reset(&mut self, name: i32) {
        self.name = name;
        self.param1 = 0;
        self.param2 = 0;
        self.payload = None;
        self.handle_time = 0;
    }
}

/// Recycling message allocator, one per machine instance.
///
/// The worker reclaims every dispatched message here instead of dropping
/// it, so a busy machine reuses a small set of allocations rather than
/// churning the allocator. At most [`POOL_CAPACITY`] recycled messages are
/// retained; excess reclaims are dropped.
#[derive(Debug, Default)]
pub struct MessageFactory {
    pool: Mutex<Vec<Message>>,
}

impl MessageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a recycled message reset to `name`, or a fresh allocation
    /// when the pool is empty.
    pub fn obtain(&self, name: i32) -> Message {
        let mut pool = self.pool.lock().unwrap();
        match pool.pop() {
            Some(mut msg) => {
                msg.reset(name);
                msg
            }
            None => Message::new(name),
        }
    }

    /// Returns a message to the pool.
    pub fn reclaim(&self, mut msg: Message) {
        let mut pool = self.pool.lock().unwrap();
        if pool.len() < POOL_CAPACITY {
            msg.reset(0);
            pool.push(msg);
        }
    }

    /// Number of messages currently pooled.
    pub fn pooled(&self) -> usize {
        self.pool.lock().unwrap().len()
    }
}
