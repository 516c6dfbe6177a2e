//! Local event bus — what a process observes: routed messages, signals, diagnostics

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::check_event_name;
use crate::types::{Envelope, MESSAGE_EVENT, Pid, Resource};

/// Name under which transport failures are reported
pub const TRANSPORT_FAILURE_EVENT: &str = "transport.failure";

/// Something delivered to, or observed by, the local process
#[derive(Debug, Clone)]
pub enum LocalEvent {
    /// A routed envelope addressed to this process
    Message {
        envelope: Envelope,
        resource: Option<Resource>,
    },
    /// A bare signal, emitted under its own name
    Signal {
        name: String,
        resource: Option<Resource>,
    },
    /// A channel write failed while dispatching
    TransportFailure { target: Pid, error: String },
}

impl LocalEvent {
    /// Event name subscribers filter on
    pub fn name(&self) -> &str {
        match self {
            Self::Message { .. } => MESSAGE_EVENT,
            Self::Signal { name, .. } => name,
            Self::TransportFailure { .. } => TRANSPORT_FAILURE_EVENT,
        }
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Message { envelope, .. } => Some(envelope),
            _ => None,
        }
    }

    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Self::Message { resource, .. } | Self::Signal { resource, .. } => resource.as_ref(),
            Self::TransportFailure { .. } => None,
        }
    }
}

/// Broadcast bus for local events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<LocalEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity (at least one)
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            warn!("EventBus: capacity 0 raised to 1");
        }
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to every local event
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            filter: None,
        }
    }

    /// Subscribe to events with a specific name
    pub fn subscribe_to(&self, name: impl Into<String>) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            filter: Some(name.into()),
        }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: LocalEvent) {
        debug!("Emitting local event '{}'", event.name());
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Emit a signal locally; the routed-message name is reserved
    pub fn emit(&self, name: &str, resource: Option<Resource>) -> crate::error::Result<()> {
        check_event_name(name)?;
        self.publish(LocalEvent::Signal {
            name: name.to_string(),
            resource,
        });
        Ok(())
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of an [`EventBus`] subscription
pub struct EventReceiver {
    receiver: broadcast::Receiver<LocalEvent>,
    filter: Option<String>,
}

impl EventReceiver {
    /// Next matching event, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<LocalEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event receiver lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<LocalEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Event receiver lagged by {} events", n);
                }
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &LocalEvent) -> bool {
        self.filter.as_deref().is_none_or(|name| event.name() == name)
    }
}
