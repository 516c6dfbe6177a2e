//! Process handles — identity-bearing references to reachable processes

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::{Payload, Pid, Resource, Role};

struct HandleInner {
    id: Uuid,
    pid: Pid,
    role: Role,
    name: Option<String>,
    channel: Arc<dyn Channel>,
}

/// Reference to a process reachable over a channel.
///
/// Clones share identity. Two handles are equal only when they are clones of
/// the same handle; an equal pid is not enough.
#[derive(Clone)]
pub struct ProcessHandle(Arc<HandleInner>);

impl ProcessHandle {
    fn build(pid: Pid, role: Role, name: Option<String>, channel: Arc<dyn Channel>) -> Self {
        Self(Arc::new(HandleInner {
            id: Uuid::new_v4(),
            pid,
            role,
            name,
            channel,
        }))
    }

    pub fn master(pid: Pid, channel: Arc<dyn Channel>) -> Self {
        Self::build(pid, Role::Master, None, channel)
    }

    pub fn worker(pid: Pid, channel: Arc<dyn Channel>) -> Self {
        Self::build(pid, Role::Worker, None, channel)
    }

    pub fn agent(name: impl Into<String>, pid: Pid, channel: Arc<dyn Channel>) -> Self {
        Self::build(pid, Role::Agent, Some(name.into()), channel)
    }

    /// Unique identity of this handle
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn pid(&self) -> Pid {
        self.0.pid
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.0.channel
    }

    /// Write a payload to this process's channel
    pub fn send(&self, payload: Payload, resource: Option<Resource>) -> Result<(), ChannelError> {
        self.0.channel.send(payload, resource)
    }
}

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ProcessHandle {}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.0.pid)
            .field("role", &self.0.role)
            .field("name", &self.0.name)
            .finish()
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.name {
            Some(name) => write!(f, "{} '{}' ({})", self.0.role, name, self.0.pid),
            None => write!(f, "{} ({})", self.0.role, self.0.pid),
        }
    }
}
