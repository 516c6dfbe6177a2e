//! herald-core - symbolic addressing between a master, its workers and agents
//!
//! This crate provides:
//! - Topology registry of live workers and named agents (master only)
//! - Address resolver expanding `master`, `workers`, `agents`, `*`, names and pids
//! - Dispatcher fanning one payload out to many channels
//! - Inbound router classifying arrivals and relaying on the master
//! - The `Ipc` façade and the event loop that drives it

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handle;
pub mod ipc;
pub mod resolver;
pub mod router;
pub mod runtime;
pub mod topology;
pub mod types;

// Re-export main types for convenience
pub use channel::{Channel, Delivery, MemoryChannel};
pub use error::{ChannelError, IpcError};
pub use events::{EventBus, EventReceiver, LocalEvent};
pub use handle::ProcessHandle;
pub use ipc::{Ipc, IpcOptions, Lifecycle};
pub use runtime::{IpcHandle, spawn};
pub use topology::Topology;
pub use types::{
    AddressSpecifier, Envelope, IntoSpecifiers, MESSAGE_EVENT, Payload, Pid, ProcessContext,
    Resource, Role,
};
