//! Newline-delimited JSON channel over any async byte stream
//!
//! Suits pipes to child processes (stdin/stdout) and unix sockets. Each line
//! is one [`Payload`]; a signal is a bare JSON string, an envelope an object.

use async_trait::async_trait;
use herald_core::{Channel, ChannelError, Delivery, Payload, Resource};
use std::fmt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

type LineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Channel endpoint speaking JSON lines
pub struct StreamChannel {
    label: String,
    outbound: mpsc::UnboundedSender<String>,
    lines: Mutex<LineReader>,
}

impl StreamChannel {
    /// Wrap a reader/writer pair; writes happen on a background task in send order
    pub fn new<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(label.clone(), writer, rx));

        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            label,
            outbound,
            lines: Mutex::new(BufReader::new(reader).lines()),
        }
    }

    /// The current process's stdin/stdout, as seen by a spawned child
    pub fn stdio() -> Self {
        Self::new("stdio", tokio::io::stdin(), tokio::io::stdout())
    }
}

async fn write_lines<W>(label: String, mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("StreamChannel {}: write failed, closing: {}", label, e);
            return;
        }
    }
    debug!("StreamChannel {}: writer finished", label);
}

impl fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("label", &self.label)
            .field("closed", &self.outbound.is_closed())
            .finish()
    }
}

#[async_trait]
impl Channel for StreamChannel {
    fn send(&self, payload: Payload, resource: Option<Resource>) -> Result<(), ChannelError> {
        if resource.is_some() {
            return Err(ChannelError::ResourceUnsupported);
        }
        let line = serde_json::to_string(&payload)?;
        self.outbound.send(line).map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self) -> Option<Delivery> {
        let mut lines = self.lines.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<Payload>(&line) {
                    Ok(payload) => {
                        return Some(Delivery {
                            payload,
                            resource: None,
                        });
                    }
                    Err(e) => warn!("StreamChannel {}: skipping malformed line: {}", self.label, e),
                },
                Ok(None) => return None,
                Err(e) => {
                    warn!("StreamChannel {}: read failed: {}", self.label, e);
                    return None;
                }
            }
        }
    }
}
