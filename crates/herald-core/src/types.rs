//! Shared types for herald-core

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Event name under which routed envelopes are emitted locally.
///
/// Signals and envelope actions may not use it.
pub const MESSAGE_EVENT: &str = "message";

/// Operating-system process id of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl Pid {
    /// Pid of the current process
    pub fn current() -> Self {
        Self(std::process::id())
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a process plays in the cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Worker,
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Worker => write!(f, "worker"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Environment variable a supervisor sets on the workers it spawns
pub const WORKER_ENV: &str = "HERALD_WORKER_ID";

/// How the current process came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessContext {
    /// The process coordinating the cluster
    Coordinator,
    /// A process spawned by the coordinator's supervisor
    Spawned,
    /// Neither; started on its own
    Detached,
}

impl ProcessContext {
    /// Inspect the environment: a spawned worker carries `HERALD_WORKER_ID`.
    pub fn detect() -> Self {
        if std::env::var_os(WORKER_ENV).is_some() {
            Self::Spawned
        } else {
            Self::Coordinator
        }
    }

    /// Role of a process created in this context
    pub fn role(self, is_agent: bool) -> Role {
        if is_agent {
            return Role::Agent;
        }
        match self {
            Self::Coordinator => Role::Master,
            Self::Spawned => Role::Worker,
            Self::Detached => Role::Agent,
        }
    }
}

/// Symbolic target of a send.
///
/// On the wire a specifier is a bare JSON string (`"master"`, `"workers"`,
/// `"agents"`, `"*"` or an agent name) or a bare number (a pid).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawSpecifier", into = "RawSpecifier")]
pub enum AddressSpecifier {
    Master,
    Workers,
    Agents,
    /// `*`: master, then workers, then agents
    All,
    /// An agent registered under this exact name
    Name(String),
    Pid(Pid),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSpecifier {
    Pid(u32),
    Text(String),
}

impl From<RawSpecifier> for AddressSpecifier {
    fn from(raw: RawSpecifier) -> Self {
        match raw {
            RawSpecifier::Pid(pid) => Self::Pid(Pid(pid)),
            RawSpecifier::Text(s) => Self::from_string(&s),
        }
    }
}

impl From<AddressSpecifier> for RawSpecifier {
    fn from(spec: AddressSpecifier) -> Self {
        match spec {
            AddressSpecifier::Pid(pid) => Self::Pid(pid.0),
            other => Self::Text(other.to_string()),
        }
    }
}

impl AddressSpecifier {
    /// Parse a textual specifier; anything that isn't a role keyword is an agent name.
    pub fn from_string(s: &str) -> Self {
        match s {
            "master" => Self::Master,
            "workers" => Self::Workers,
            "agents" => Self::Agents,
            "*" => Self::All,
            name => Self::Name(name.to_string()),
        }
    }

    /// True when this specifier can never expand to more than one process
    /// (barring pid collisions between a worker and an agent).
    pub fn is_single_target(&self) -> bool {
        matches!(self, Self::Master | Self::Name(_) | Self::Pid(_))
    }
}

impl fmt::Display for AddressSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Workers => write!(f, "workers"),
            Self::Agents => write!(f, "agents"),
            Self::All => write!(f, "*"),
            Self::Name(name) => write!(f, "{}", name),
            Self::Pid(pid) => write!(f, "{}", pid),
        }
    }
}

impl From<&str> for AddressSpecifier {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for AddressSpecifier {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl From<Pid> for AddressSpecifier {
    fn from(pid: Pid) -> Self {
        Self::Pid(pid)
    }
}

impl From<u32> for AddressSpecifier {
    fn from(pid: u32) -> Self {
        Self::Pid(Pid(pid))
    }
}

/// Normalizes "one target or many" into a specifier sequence
pub trait IntoSpecifiers {
    fn into_specifiers(self) -> Vec<AddressSpecifier>;
}

impl IntoSpecifiers for AddressSpecifier {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        vec![self]
    }
}

impl IntoSpecifiers for &str {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        vec![self.into()]
    }
}

impl IntoSpecifiers for String {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        vec![self.into()]
    }
}

impl IntoSpecifiers for Pid {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        vec![self.into()]
    }
}

impl IntoSpecifiers for u32 {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        vec![self.into()]
    }
}

impl<T: Into<AddressSpecifier>> IntoSpecifiers for Vec<T> {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<AddressSpecifier>, const N: usize> IntoSpecifiers for [T; N] {
    fn into_specifiers(self) -> Vec<AddressSpecifier> {
        self.into_iter().map(Into::into).collect()
    }
}

/// A routed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: Pid,
    /// Raw specifiers before resolution, concrete pids after
    pub to: Vec<AddressSpecifier>,
    pub action: String,
    #[serde(default)]
    pub body: Value,
    /// Ask the master to resolve `to` and relay to the result
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transfer: bool,
}

impl Envelope {
    /// Whether `pid` appears as a concrete target in `to`
    pub fn is_addressed_to(&self, pid: Pid) -> bool {
        self.to
            .iter()
            .any(|spec| matches!(spec, AddressSpecifier::Pid(p) if *p == pid))
    }
}

/// What travels over a channel: a bare signal name or a routed envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Signal(String),
    Envelope(Envelope),
}

/// Opaque object handed over alongside a payload (a socket, a file handle).
///
/// Never serialized; clones share the same underlying object.
#[derive(Clone)]
pub struct Resource(Arc<dyn Any + Send + Sync>);

impl Resource {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both values share the same underlying object
    pub fn same_as(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resource(..)")
    }
}
