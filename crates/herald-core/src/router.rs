//! Inbound router — one per channel endpoint, feeding the process's event loop

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handle::ProcessHandle;
use crate::types::{Payload, Pid, Resource};

/// A payload that reached this process, tagged with the endpoint it came from
#[derive(Debug, Clone)]
pub struct Arrival {
    pub source: Pid,
    pub payload: Payload,
    pub resource: Option<Resource>,
}

/// Pumps a channel's inbound payloads into the owning loop's arrival queue
/// until detached or the peer goes away.
pub struct InboundRouter {
    source: Pid,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl InboundRouter {
    /// Start routing arrivals from `handle`'s channel into `arrivals`
    pub fn attach(handle: &ProcessHandle, arrivals: mpsc::UnboundedSender<Arrival>) -> Self {
        let token = CancellationToken::new();
        let channel = handle.channel().clone();
        let source = handle.pid();
        let cancel = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delivery = channel.recv() => {
                        let Some(delivery) = delivery else {
                            debug!("Router: channel from {} closed", source);
                            break;
                        };
                        let arrival = Arrival {
                            source,
                            payload: delivery.payload,
                            resource: delivery.resource,
                        };
                        if arrivals.send(arrival).is_err() {
                            // owning loop is gone
                            break;
                        }
                    }
                }
            }
        });

        debug!("Router: attached to {}", handle);
        Self {
            source,
            token,
            task,
        }
    }

    pub fn source(&self) -> Pid {
        self.source
    }

    /// Stop routing; payloads still queued on the channel are not delivered
    pub fn detach(self) {
        debug!("Router: detached from {}", self.source);
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
