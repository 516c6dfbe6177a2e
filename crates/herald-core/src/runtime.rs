//! Event loop — drives one [`Ipc`] on a tokio task
//!
//! Commands from every [`IpcHandle`] clone share one queue and are applied in
//! order; arrivals from all channel routers share another. The loop handles
//! one item at a time.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{IpcError, Result, check_event_name};
use crate::events::{EventBus, EventReceiver};
use crate::handle::ProcessHandle;
use crate::ipc::{Ipc, Lifecycle};
use crate::types::{AddressSpecifier, IntoSpecifiers, Pid, Resource, Role};

enum Command {
    Send {
        to: Vec<AddressSpecifier>,
        action: String,
        body: Value,
        resource: Option<Resource>,
        reply: oneshot::Sender<Result<()>>,
    },
    Signal {
        to: Vec<AddressSpecifier>,
        name: String,
        resource: Option<Resource>,
        reply: oneshot::Sender<Result<()>>,
    },
    Register {
        name: String,
        handle: ProcessHandle,
        reply: oneshot::Sender<()>,
    },
    Lifecycle {
        event: Lifecycle,
        reply: oneshot::Sender<()>,
    },
    Workers {
        reply: oneshot::Sender<Vec<ProcessHandle>>,
    },
    Agents {
        reply: oneshot::Sender<HashMap<String, ProcessHandle>>,
    },
}

/// Cloneable handle to a running [`Ipc`] loop
#[derive(Clone)]
pub struct IpcHandle {
    pid: Pid,
    role: Role,
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
    shutdown: CancellationToken,
}

/// Move `ipc` onto its own task and return a handle to it.
///
/// The task ends on [`IpcHandle::shutdown`], when every handle is dropped, or
/// with an error if a peer sends a signal named after the routed-message event.
pub fn spawn(mut ipc: Ipc) -> (IpcHandle, JoinHandle<Result<()>>) {
    let (commands, mut command_rx) = mpsc::unbounded_channel();
    let shutdown = CancellationToken::new();
    let handle = IpcHandle {
        pid: ipc.pid(),
        role: ipc.role(),
        commands,
        events: ipc.events().clone(),
        shutdown: shutdown.clone(),
    };
    let mut arrivals = ipc.take_arrivals();

    let task = tokio::spawn(async move {
        info!("ipc: {} loop for {} started", ipc.role(), ipc.pid());
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = command_rx.recv() => {
                    let Some(command) = command else { break };
                    execute(&mut ipc, command);
                }
                Some(arrival) = next_arrival(&mut arrivals) => {
                    if let Err(e) = ipc.route(arrival) {
                        error!("ipc: fatal routing error on {}: {}", ipc.pid(), e);
                        return Err(e);
                    }
                }
            }
        }
        debug!("ipc: loop for {} stopped", ipc.pid());
        Ok(())
    });

    (handle, task)
}

async fn next_arrival(
    arrivals: &mut Option<mpsc::UnboundedReceiver<crate::router::Arrival>>,
) -> Option<crate::router::Arrival> {
    match arrivals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn execute(ipc: &mut Ipc, command: Command) {
    // A dropped reply receiver just means the caller stopped waiting
    match command {
        Command::Send {
            to,
            action,
            body,
            resource,
            reply,
        } => {
            let result = ipc.send(to, action, body, resource).map(|_| ());
            let _ = reply.send(result);
        }
        Command::Signal {
            to,
            name,
            resource,
            reply,
        } => {
            let result = ipc.signal(to, &name, resource).map(|_| ());
            let _ = reply.send(result);
        }
        Command::Register {
            name,
            handle,
            reply,
        } => {
            ipc.register(name, handle);
            let _ = reply.send(());
        }
        Command::Lifecycle { event, reply } => {
            ipc.apply(event);
            let _ = reply.send(());
        }
        Command::Workers { reply } => {
            let _ = reply.send(ipc.workers().to_vec());
        }
        Command::Agents { reply } => {
            let _ = reply.send(ipc.agents());
        }
    }
}

impl IpcHandle {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queue a command and wait for the loop to apply it
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| IpcError::Closed)?;
        rx.await.map_err(|_| IpcError::Closed)
    }

    /// Send `action`/`body` to `to`.
    ///
    /// Resolves once the loop has dispatched; says nothing about delivery.
    pub async fn send(
        &self,
        to: impl IntoSpecifiers,
        action: impl Into<String>,
        body: Value,
        resource: Option<Resource>,
    ) -> Result<()> {
        let action = action.into();
        check_event_name(&action)?;
        let to = to.into_specifiers();
        self.request(|reply| Command::Send {
            to,
            action,
            body,
            resource,
            reply,
        })
        .await?
    }

    /// Send a bare signal; a reserved name fails before anything is queued
    pub async fn signal(
        &self,
        to: impl IntoSpecifiers,
        name: &str,
        resource: Option<Resource>,
    ) -> Result<()> {
        check_event_name(name)?;
        let to = to.into_specifiers();
        let name = name.to_string();
        self.request(|reply| Command::Signal {
            to,
            name,
            resource,
            reply,
        })
        .await?
    }

    /// Register an agent; a no-op unless this is the master
    pub async fn register(&self, name: impl Into<String>, handle: ProcessHandle) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::Register {
            name,
            handle,
            reply,
        })
        .await
    }

    /// Supervisor notification: a worker was spawned
    pub async fn worker_created(&self, handle: ProcessHandle) -> Result<()> {
        self.request(|reply| Command::Lifecycle {
            event: Lifecycle::WorkerCreated(handle),
            reply,
        })
        .await
    }

    /// Supervisor notification: a worker exited
    pub async fn worker_terminated(&self, handle: ProcessHandle) -> Result<()> {
        self.request(|reply| Command::Lifecycle {
            event: Lifecycle::WorkerTerminated(handle),
            reply,
        })
        .await
    }

    pub async fn workers(&self) -> Result<Vec<ProcessHandle>> {
        self.request(|reply| Command::Workers { reply }).await
    }

    pub async fn agents(&self) -> Result<HashMap<String, ProcessHandle>> {
        self.request(|reply| Command::Agents { reply }).await
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn subscribe_to(&self, name: impl Into<String>) -> EventReceiver {
        self.events.subscribe_to(name)
    }

    /// Emit a signal to local subscribers only
    pub fn emit(&self, name: &str, resource: Option<Resource>) -> Result<()> {
        self.events.emit(name, resource)
    }

    /// Stop the loop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
