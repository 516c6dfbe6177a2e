//! Channel abstraction between two process endpoints, plus an in-memory implementation

use async_trait::async_trait;
use std::fmt;
use tokio::sync::{Mutex, mpsc};

use crate::error::ChannelError;
use crate::types::{Payload, Resource};

/// One inbound item: a payload and the resource that came with it
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: Payload,
    pub resource: Option<Resource>,
}

/// Trait that every transport between two endpoints implements.
///
/// `send` must not block and must preserve order per channel.
#[async_trait]
pub trait Channel: Send + Sync + fmt::Debug {
    /// Queue a payload (and at most one resource) for the peer
    fn send(&self, payload: Payload, resource: Option<Resource>) -> Result<(), ChannelError>;

    /// Next payload from the peer, or `None` once the peer is gone
    async fn recv(&self) -> Option<Delivery>;
}

/// Channel endpoint backed by tokio unbounded mpsc queues
pub struct MemoryChannel {
    label: String,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
}

impl MemoryChannel {
    /// Two connected endpoints: what one sends, the other receives
    pub fn pair(label: &str) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                label: format!("{}:a", label),
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                label: format!("{}:b", label),
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }

    /// An endpoint connected to itself
    pub fn loopback(label: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            label: label.to_string(),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Non-blocking receive; `None` when nothing is queued or the receiver is busy
    pub fn try_recv(&self) -> Option<Delivery> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("label", &self.label)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn send(&self, payload: Payload, resource: Option<Resource>) -> Result<(), ChannelError> {
        self.tx
            .send(Delivery { payload, resource })
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self) -> Option<Delivery> {
        self.rx.lock().await.recv().await
    }
}
