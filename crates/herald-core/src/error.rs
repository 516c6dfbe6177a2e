//! Error types for herald-core

use thiserror::Error;

use crate::types::MESSAGE_EVENT;

/// Errors surfaced synchronously to the caller of the façade
#[derive(Debug, Error)]
pub enum IpcError {
    /// A signal name or action collides with the routed-message event
    #[error("`{0}` is reserved for routed messages and cannot be used as a signal or action name")]
    ReservedEventName(String),

    /// A transferable resource was attached to a send that can reach several processes
    #[error("a transferable resource needs exactly one target: {0}")]
    ResourceFanout(String),

    /// A worker or agent addressed a signal to anything but the master
    #[error("signals from a worker or agent only reach the master, not `{0}`")]
    UpstreamOnly(String),

    /// A non-master process has no channel to the master
    #[error("no upstream channel to the master process")]
    NoUpstream,

    /// The event loop owning this instance has stopped
    #[error("ipc runtime has shut down")]
    Closed,
}

/// Failure to write to a single channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("channel cannot carry transferable resources")]
    ResourceUnsupported,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IpcError> = std::result::Result<T, E>;

/// Reject names that collide with the routed-message event
pub(crate) fn check_event_name(name: &str) -> Result<()> {
    if name == MESSAGE_EVENT {
        return Err(IpcError::ReservedEventName(name.to_string()));
    }
    Ok(())
}
