//! The ipc façade — send, register and introspect, plus inbound routing
//!
//! An [`Ipc`] is owned by a single event loop (see [`crate::runtime`]); every
//! method takes `&mut self` and runs to completion, so the master's
//! [`Topology`] needs no locking.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{Channel, MemoryChannel};
use crate::dispatcher::{self, DispatchReport};
use crate::error::{IpcError, Result, check_event_name};
use crate::events::{EventBus, EventReceiver, LocalEvent};
use crate::handle::ProcessHandle;
use crate::resolver::{concrete_targets, resolve};
use crate::router::{Arrival, InboundRouter};
use crate::topology::Topology;
use crate::types::{
    AddressSpecifier, Envelope, IntoSpecifiers, Payload, Pid, ProcessContext, Resource, Role,
};

/// Default capacity of the local event bus
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How to construct an [`Ipc`]
#[derive(Debug)]
pub struct IpcOptions {
    pub is_agent: bool,
    pub context: ProcessContext,
    pub pid: Pid,
    /// Channel to the master; required for workers and agents to send
    pub upstream: Option<Arc<dyn Channel>>,
    pub event_capacity: usize,
}

impl IpcOptions {
    /// Options for the current process, role taken from the environment
    pub fn detect(is_agent: bool) -> Self {
        Self {
            is_agent,
            context: ProcessContext::detect(),
            pid: Pid::current(),
            upstream: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn Channel>) -> Self {
        self.upstream = Some(upstream);
        self
    }
}

/// Supervisor notifications about worker processes
#[derive(Debug, Clone)]
pub enum Lifecycle {
    WorkerCreated(ProcessHandle),
    WorkerTerminated(ProcessHandle),
}

/// One process's view of the cluster
pub struct Ipc {
    pid: Pid,
    role: Role,
    /// Master: a loopback handle for itself. Others: the upstream channel.
    master: Option<ProcessHandle>,
    topology: Option<Topology>,
    routers: HashMap<Uuid, InboundRouter>,
    /// Agents displaced by re-registration whose routers are still attached
    replaced: Vec<ProcessHandle>,
    events: EventBus,
    arrivals_tx: mpsc::UnboundedSender<Arrival>,
    arrivals_rx: Option<mpsc::UnboundedReceiver<Arrival>>,
}

impl fmt::Debug for Ipc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipc")
            .field("pid", &self.pid)
            .field("role", &self.role)
            .field("workers", &self.workers().len())
            .field("agents", &self.topology.as_ref().map_or(0, Topology::agent_count))
            .field("routers", &self.routers.len())
            .finish()
    }
}

impl Ipc {
    /// Build an instance and attach a router to its own process channel.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(options: IpcOptions) -> Self {
        let role = options.context.role(options.is_agent);
        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();

        let master = match role {
            Role::Master => {
                let loopback: Arc<dyn Channel> = Arc::new(MemoryChannel::loopback("master"));
                Some(ProcessHandle::master(options.pid, loopback))
            }
            _ => options
                .upstream
                // pid of the master is unknown here; the handle only carries the channel
                .map(|channel| ProcessHandle::master(Pid(0), channel)),
        };

        let mut ipc = Self {
            pid: options.pid,
            role,
            master,
            topology: (role == Role::Master).then(Topology::new),
            routers: HashMap::new(),
            replaced: Vec::new(),
            events: EventBus::new(options.event_capacity),
            arrivals_tx,
            arrivals_rx: Some(arrivals_rx),
        };

        if let Some(own) = ipc.master.clone() {
            ipc.attach_router(&own);
        }
        info!("ipc: {} process {} ready", role, options.pid);
        ipc
    }

    /// The master process
    pub fn master(pid: Pid) -> Self {
        Self::new(IpcOptions {
            is_agent: false,
            context: ProcessContext::Coordinator,
            pid,
            upstream: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        })
    }

    /// A worker spawned by the master, talking to it over `upstream`
    pub fn worker(pid: Pid, upstream: Arc<dyn Channel>) -> Self {
        Self::new(IpcOptions {
            is_agent: false,
            context: ProcessContext::Spawned,
            pid,
            upstream: Some(upstream),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        })
    }

    /// An agent, talking to the master over `upstream`
    pub fn agent(pid: Pid, upstream: Arc<dyn Channel>) -> Self {
        Self::new(IpcOptions {
            is_agent: true,
            context: ProcessContext::Detached,
            pid,
            upstream: Some(upstream),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Live workers in spawn order; empty outside the master
    pub fn workers(&self) -> &[ProcessHandle] {
        self.topology.as_ref().map(Topology::workers).unwrap_or(&[])
    }

    /// Snapshot of registered agents; empty outside the master
    pub fn agents(&self) -> HashMap<String, ProcessHandle> {
        self.topology
            .as_ref()
            .map(Topology::agents)
            .unwrap_or_default()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn subscribe_to(&self, name: impl Into<String>) -> EventReceiver {
        self.events.subscribe_to(name)
    }

    /// Emit a signal to local subscribers only
    pub fn emit(&self, name: &str, resource: Option<Resource>) -> Result<&Self> {
        self.events.emit(name, resource)?;
        Ok(self)
    }

    /// Hand the arrival queue to the loop that will drive this instance
    pub fn take_arrivals(&mut self) -> Option<mpsc::UnboundedReceiver<Arrival>> {
        self.arrivals_rx.take()
    }

    // ── Topology lifecycle ──

    /// Supervisor notification dispatch
    pub fn apply(&mut self, event: Lifecycle) {
        match event {
            Lifecycle::WorkerCreated(handle) => self.worker_created(handle),
            Lifecycle::WorkerTerminated(handle) => self.worker_terminated(&handle),
        }
    }

    /// A worker was spawned: track it and route what it sends
    pub fn worker_created(&mut self, handle: ProcessHandle) {
        let Some(topology) = self.topology.as_mut() else {
            warn!("ipc: worker_created ignored on {} process", self.role);
            return;
        };
        if self.routers.contains_key(&handle.id()) {
            debug!("ipc: {} is already tracked", handle);
            return;
        }
        topology.add_worker(handle.clone());
        self.attach_router(&handle);
    }

    /// A worker exited: stop tracking it before anything else can target it
    pub fn worker_terminated(&mut self, handle: &ProcessHandle) {
        let Some(topology) = self.topology.as_mut() else {
            warn!("ipc: worker_terminated ignored on {} process", self.role);
            return;
        };
        topology.remove_worker(handle);
        if let Some(router) = self.routers.remove(&handle.id()) {
            router.detach();
        }
    }

    /// Register an agent by name; only effective on the master.
    ///
    /// A handle replaced by re-registration keeps its router, so that process
    /// can still send, but it is no longer addressable by name. Its router is
    /// dropped on a later registration once that process's channel has closed.
    pub fn register(&mut self, name: impl Into<String>, handle: ProcessHandle) -> &mut Self {
        let name = name.into();
        let Some(topology) = self.topology.as_mut() else {
            debug!("ipc: register('{}') is a no-op on {} process", name, self.role);
            return self;
        };
        if let Some(replaced) = topology.register_agent(name, handle.clone()) {
            self.replaced.push(replaced);
        }
        self.prune_replaced();
        if !self.routers.contains_key(&handle.id()) {
            self.attach_router(&handle);
        }
        self
    }

    /// Forget replaced agents whose router has stopped
    fn prune_replaced(&mut self) {
        let routers = &mut self.routers;
        self.replaced.retain(|old| {
            let finished = routers.get(&old.id()).is_none_or(InboundRouter::is_finished);
            if finished {
                routers.remove(&old.id());
                debug!("ipc: dropped router of replaced {}", old);
            }
            !finished
        });
    }

    fn attach_router(&mut self, handle: &ProcessHandle) {
        let router = InboundRouter::attach(handle, self.arrivals_tx.clone());
        self.routers.insert(handle.id(), router);
    }

    // ── Outbound ──

    /// Send `action`/`body` to `to`.
    ///
    /// Fire-and-forget: errors only report misuse, never delivery.
    pub fn send(
        &mut self,
        to: impl IntoSpecifiers,
        action: impl Into<String>,
        body: Value,
        resource: Option<Resource>,
    ) -> Result<&mut Self> {
        let action = action.into();
        check_event_name(&action)?;
        let to = to.into_specifiers();

        if self.is_master() {
            let targets = self.resolve(&to, self.pid);
            check_resource_targets(resource.as_ref(), targets.len())?;
            let envelope = Envelope {
                from: self.pid,
                to: concrete_targets(&targets),
                action,
                body,
                transfer: false,
            };
            let report = self.dispatch(&targets, &Payload::Envelope(envelope), resource.as_ref());
            debug!(
                "ipc: master send to {:?} reached {} of {}",
                to,
                report.delivered,
                targets.len()
            );
        } else {
            check_resource_specifiers(resource.as_ref(), &to)?;
            let envelope = Envelope {
                from: self.pid,
                to,
                action,
                body,
                transfer: true,
            };
            self.send_upstream(Payload::Envelope(envelope), resource)?;
        }
        Ok(self)
    }

    /// Send a bare signal. The receiving endpoint emits it locally; it is never relayed.
    ///
    /// Workers and agents can only signal the master.
    pub fn signal(
        &mut self,
        to: impl IntoSpecifiers,
        name: &str,
        resource: Option<Resource>,
    ) -> Result<&mut Self> {
        check_event_name(name)?;
        let payload = Payload::Signal(name.to_string());

        if self.is_master() {
            let targets = self.resolve(&to.into_specifiers(), self.pid);
            check_resource_targets(resource.as_ref(), targets.len())?;
            self.dispatch(&targets, &payload, resource.as_ref());
        } else {
            let to = to.into_specifiers();
            if to != [AddressSpecifier::Master] {
                let to: Vec<String> = to.iter().map(ToString::to_string).collect();
                return Err(IpcError::UpstreamOnly(to.join(", ")));
            }
            self.send_upstream(payload, resource)?;
        }
        Ok(self)
    }

    fn send_upstream(&self, payload: Payload, resource: Option<Resource>) -> Result<()> {
        let upstream = self.master.as_ref().ok_or(IpcError::NoUpstream)?;
        if let Err(e) = upstream.send(payload, resource) {
            warn!("ipc: failed to reach master from {}: {}", self.pid, e);
            self.events.publish(LocalEvent::TransportFailure {
                target: upstream.pid(),
                error: e.to_string(),
            });
        }
        Ok(())
    }

    fn resolve(&self, to: &[AddressSpecifier], exclude: Pid) -> Vec<ProcessHandle> {
        match (&self.topology, &self.master) {
            (Some(topology), Some(master)) => resolve(topology, master, to, exclude),
            _ => Vec::new(),
        }
    }

    fn dispatch(
        &self,
        targets: &[ProcessHandle],
        payload: &Payload,
        resource: Option<&Resource>,
    ) -> DispatchReport {
        dispatcher::deliver(targets, payload, resource, &self.events)
    }

    // ── Inbound ──

    /// Classify one arrival: emit locally and, on the master, relay.
    ///
    /// The only error is a signal named after the routed-message event, which
    /// is fatal for the loop.
    pub fn route(&mut self, arrival: Arrival) -> Result<()> {
        let Arrival {
            source,
            payload,
            resource,
        } = arrival;

        match payload {
            Payload::Signal(name) => {
                check_event_name(&name)?;
                debug!("ipc: signal '{}' from {}", name, source);
                self.events.publish(LocalEvent::Signal { name, resource });
            }
            Payload::Envelope(envelope) if !self.is_master() => {
                if envelope.is_addressed_to(self.pid) {
                    self.events.publish(LocalEvent::Message { envelope, resource });
                } else {
                    debug!(
                        "ipc: envelope '{}' from {} not addressed to {}",
                        envelope.action, envelope.from, self.pid
                    );
                }
            }
            Payload::Envelope(envelope) => self.relay(envelope, resource),
        }
        Ok(())
    }

    /// Master side: resolve against the topology as it is now, deliver
    /// locally if addressed, then fan out when asked to transfer.
    fn relay(&self, mut envelope: Envelope, resource: Option<Resource>) {
        let mut pool = self.resolve(&envelope.to, envelope.from);

        if let Some(own) = &self.master {
            if let Some(index) = pool.iter().position(|h| h == own) {
                pool.remove(index);
                self.events.publish(LocalEvent::Message {
                    envelope: envelope.clone(),
                    resource: resource.clone(),
                });
            }
        }

        if !envelope.transfer || pool.is_empty() {
            return;
        }
        if resource.is_some() && pool.len() > 1 {
            warn!(
                "ipc: relaying '{}' with a resource to {} targets",
                envelope.action,
                pool.len()
            );
        }

        envelope.to = concrete_targets(&pool);
        let report = self.dispatch(&pool, &Payload::Envelope(envelope), resource.as_ref());
        debug!("ipc: relayed to {} targets", report.delivered);
    }
}

fn check_resource_targets(resource: Option<&Resource>, targets: usize) -> Result<()> {
    if resource.is_some() && targets > 1 {
        return Err(IpcError::ResourceFanout(format!("{} processes matched", targets)));
    }
    Ok(())
}

fn check_resource_specifiers(resource: Option<&Resource>, to: &[AddressSpecifier]) -> Result<()> {
    if resource.is_none() {
        return Ok(());
    }
    match to {
        [single] if single.is_single_target() => Ok(()),
        [single] => Err(IpcError::ResourceFanout(format!("'{}' may match several processes", single))),
        _ => Err(IpcError::ResourceFanout(format!("{} specifiers given", to.len()))),
    }
}

impl Drop for Ipc {
    fn drop(&mut self) {
        for (_, router) in self.routers.drain() {
            router.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Delivery;
    use serde_json::json;

    const MASTER: Pid = Pid(100);

    /// Master with two workers and a "logger" agent; keeps the far ends
    struct Cluster {
        master: Ipc,
        w1: (ProcessHandle, MemoryChannel),
        w2: (ProcessHandle, MemoryChannel),
        logger: (ProcessHandle, MemoryChannel),
    }

    fn link(pid: u32, name: Option<&str>) -> (ProcessHandle, MemoryChannel) {
        let (near, far) = MemoryChannel::pair("link");
        let near: Arc<dyn Channel> = Arc::new(near);
        let handle = match name {
            Some(name) => ProcessHandle::agent(name, Pid(pid), near),
            None => ProcessHandle::worker(Pid(pid), near),
        };
        (handle, far)
    }

    fn cluster() -> Cluster {
        let mut master = Ipc::master(MASTER);
        let w1 = link(101, None);
        let w2 = link(102, None);
        let logger = link(200, Some("logger"));
        master.worker_created(w1.0.clone());
        master.worker_created(w2.0.clone());
        master.register("logger", logger.0.clone());
        Cluster {
            master,
            w1,
            w2,
            logger,
        }
    }

    fn arrival(from: u32, to: Vec<AddressSpecifier>, action: &str, transfer: bool) -> Arrival {
        Arrival {
            source: Pid(from),
            payload: Payload::Envelope(Envelope {
                from: Pid(from),
                to,
                action: action.to_string(),
                body: json!({"msg": "x"}),
                transfer,
            }),
            resource: None,
        }
    }

    fn envelope_of(delivery: Delivery) -> Envelope {
        match delivery.payload {
            Payload::Envelope(e) => e,
            other => panic!("expected envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_role_selection() {
        assert_eq!(Ipc::master(MASTER).role(), Role::Master);
        let (up, _) = MemoryChannel::pair("up");
        assert_eq!(Ipc::worker(Pid(1), Arc::new(up)).role(), Role::Worker);

        let (up, _) = MemoryChannel::pair("up");
        let opts = IpcOptions {
            is_agent: true,
            context: ProcessContext::Coordinator,
            pid: Pid(2),
            upstream: Some(Arc::new(up)),
            event_capacity: 8,
        };
        assert_eq!(Ipc::new(opts).role(), Role::Agent);
    }

    #[tokio::test]
    async fn test_master_send_all_skips_itself() {
        let mut c = cluster();
        let mut local = c.master.subscribe();
        c.master.send("*", "ping", json!({}), None).unwrap();

        for far in [&c.w1.1, &c.w2.1, &c.logger.1] {
            let env = envelope_of(far.try_recv().unwrap());
            assert_eq!(env.action, "ping");
            assert_eq!(env.from, MASTER);
            assert!(!env.transfer);
            assert_eq!(
                env.to,
                vec![
                    AddressSpecifier::Pid(Pid(101)),
                    AddressSpecifier::Pid(Pid(102)),
                    AddressSpecifier::Pid(Pid(200)),
                ]
            );
            assert!(far.try_recv().is_none());
        }
        assert!(local.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_worker_send_to_agents_is_relayed() {
        let mut c = cluster();
        let mut local = c.master.subscribe();
        c.master
            .route(arrival(101, vec![AddressSpecifier::Agents], "log", true))
            .unwrap();

        let env = envelope_of(c.logger.1.try_recv().unwrap());
        assert_eq!(env.body, json!({"msg": "x"}));
        assert_eq!(env.to, vec![AddressSpecifier::Pid(Pid(200))]);
        assert!(c.w1.1.try_recv().is_none());
        assert!(c.w2.1.try_recv().is_none());
        assert!(local.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_worker_send_to_workers_skips_sender() {
        let mut c = cluster();
        c.master
            .route(arrival(101, vec![AddressSpecifier::Workers], "sync", true))
            .unwrap();

        assert!(c.w2.1.try_recv().is_some());
        assert!(c.w1.1.try_recv().is_none());
        assert!(c.logger.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_envelope_for_master_emitted_locally() {
        let mut c = cluster();
        let mut local = c.master.subscribe();
        c.master
            .route(arrival(101, vec![AddressSpecifier::Master], "hello", true))
            .unwrap();

        let event = local.try_recv().unwrap();
        assert_eq!(event.envelope().unwrap().action, "hello");
        assert!(c.w2.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_no_transfer_means_no_relay() {
        let mut c = cluster();
        let mut local = c.master.subscribe();
        c.master
            .route(arrival(101, vec![AddressSpecifier::All], "peek", false))
            .unwrap();

        assert!(local.try_recv().is_some());
        assert!(c.w2.1.try_recv().is_none());
        assert!(c.logger.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_terminated_worker_absent_at_arrival() {
        let mut c = cluster();
        let pending = arrival(
            101,
            vec![AddressSpecifier::Workers, AddressSpecifier::Pid(Pid(102))],
            "sync",
            true,
        );

        c.master.worker_terminated(&c.w2.0);
        assert_eq!(c.master.workers(), &[c.w1.0.clone()]);

        c.master.route(pending).unwrap();
        assert!(c.w2.1.try_recv().is_none());
        assert!(c.w1.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_unknown_pid_yields_nothing() {
        let mut c = cluster();
        c.master.send(4242u32, "ping", json!({}), None).unwrap();
        assert!(c.w1.1.try_recv().is_none());
        assert!(c.w2.1.try_recv().is_none());
        assert!(c.logger.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_reregistered_agent_receives() {
        let mut c = cluster();
        let h2 = link(201, Some("logger"));
        c.master.register("logger", h2.0.clone());

        c.master.send("logger", "log", json!({}), None).unwrap();
        assert!(h2.1.try_recv().is_some());
        assert!(c.logger.1.try_recv().is_none());
        assert_eq!(c.master.agents().get("logger"), Some(&h2.0));
    }

    #[tokio::test]
    async fn test_signal_named_message_is_fatal() {
        let mut c = cluster();
        let err = c
            .master
            .route(Arrival {
                source: Pid(101),
                payload: Payload::Signal("message".to_string()),
                resource: None,
            })
            .unwrap_err();
        assert!(matches!(err, IpcError::ReservedEventName(_)));
    }

    #[tokio::test]
    async fn test_reserved_names_rejected_before_delivery() {
        let mut c = cluster();
        assert!(matches!(
            c.master.signal("workers", "message", None),
            Err(IpcError::ReservedEventName(_))
        ));
        assert!(matches!(
            c.master.send("workers", "message", json!({}), None),
            Err(IpcError::ReservedEventName(_))
        ));
        assert!(c.w1.1.try_recv().is_none());
        assert!(c.w2.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_signal_is_emitted_with_resource() {
        let mut c = cluster();
        let mut reloads = c.master.subscribe_to("reload");
        let fd = Resource::new(3i32);
        c.master
            .route(Arrival {
                source: Pid(101),
                payload: Payload::Signal("reload".to_string()),
                resource: Some(fd.clone()),
            })
            .unwrap();

        let event = reloads.try_recv().unwrap();
        assert!(event.resource().unwrap().same_as(&fd));
    }

    #[tokio::test]
    async fn test_master_signal_to_workers() {
        let mut c = cluster();
        c.master.signal("workers", "reload", None).unwrap();
        for far in [&c.w1.1, &c.w2.1] {
            assert_eq!(far.try_recv().unwrap().payload, Payload::Signal("reload".to_string()));
        }
        assert!(c.logger.1.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_resource_fanout_rejected_on_master() {
        let mut c = cluster();
        let sock = Resource::new(());
        let Err(err) = c.master.send("workers", "conn", json!({}), Some(sock.clone())) else {
            panic!("expected ResourceFanout");
        };
        assert!(matches!(err, IpcError::ResourceFanout(_)));
        assert!(c.w1.1.try_recv().is_none());

        c.master.send(101u32, "conn", json!({}), Some(sock.clone())).unwrap();
        let got = c.w1.1.try_recv().unwrap();
        assert!(got.resource.unwrap().same_as(&sock));
    }

    #[tokio::test]
    async fn test_worker_forwards_upstream() {
        let (up, master_end) = MemoryChannel::pair("up");
        let mut worker = Ipc::worker(Pid(101), Arc::new(up));
        worker.send("agents", "log", json!({"msg": "x"}), None).unwrap();

        let env = envelope_of(master_end.recv().await.unwrap());
        assert_eq!(env.from, Pid(101));
        assert_eq!(env.to, vec![AddressSpecifier::Agents]);
        assert!(env.transfer);
    }

    #[tokio::test]
    async fn test_worker_resource_needs_single_specifier() {
        let (up, _master_end) = MemoryChannel::pair("up");
        let mut worker = Ipc::worker(Pid(101), Arc::new(up));
        let sock = Resource::new(());

        assert!(matches!(
            worker.send("workers", "conn", json!({}), Some(sock.clone())),
            Err(IpcError::ResourceFanout(_))
        ));
        assert!(matches!(
            worker.send(["logger", "cache"], "conn", json!({}), Some(sock.clone())),
            Err(IpcError::ResourceFanout(_))
        ));
        assert!(worker.send("logger", "conn", json!({}), Some(sock)).is_ok());
    }

    #[tokio::test]
    async fn test_worker_only_emits_own_envelopes() {
        let (up, _master_end) = MemoryChannel::pair("up");
        let mut worker = Ipc::worker(Pid(101), Arc::new(up));
        let mut local = worker.subscribe();

        worker
            .route(arrival(100, vec![AddressSpecifier::Pid(Pid(102))], "ping", false))
            .unwrap();
        assert!(local.try_recv().is_none());

        worker
            .route(arrival(100, vec![AddressSpecifier::Pid(Pid(101))], "ping", true))
            .unwrap();
        assert_eq!(local.try_recv().unwrap().envelope().unwrap().action, "ping");
    }

    #[tokio::test]
    async fn test_worker_without_upstream() {
        let mut orphan = Ipc::new(IpcOptions {
            is_agent: false,
            context: ProcessContext::Spawned,
            pid: Pid(5),
            upstream: None,
            event_capacity: 8,
        });
        assert!(matches!(
            orphan.send("master", "hi", json!({}), None),
            Err(IpcError::NoUpstream)
        ));
    }

    #[tokio::test]
    async fn test_worker_signal_rejects_peer_addressing() {
        let (up, master_end) = MemoryChannel::pair("up");
        let mut worker = Ipc::worker(Pid(101), Arc::new(up));

        for to in [
            vec![AddressSpecifier::Workers],
            vec![AddressSpecifier::Pid(Pid(102))],
            vec![AddressSpecifier::Master, AddressSpecifier::Agents],
        ] {
            assert!(matches!(
                worker.signal(to, "reload", None),
                Err(IpcError::UpstreamOnly(_))
            ));
        }
        assert!(master_end.try_recv().is_none());

        worker.signal("master", "reload", None).unwrap();
        assert_eq!(
            master_end.try_recv().unwrap().payload,
            Payload::Signal("reload".to_string())
        );
    }

    #[tokio::test]
    async fn test_duplicate_worker_created_is_ignored() {
        let mut c = cluster();
        let mut local = c.master.subscribe();
        c.master.worker_created(c.w1.0.clone());
        assert_eq!(c.master.workers().len(), 2);
        assert_eq!(c.master.routers.len(), 4);

        c.master.worker_terminated(&c.w1.0);
        assert_eq!(c.master.workers(), &[c.w2.0.clone()]);
        assert!(!c.master.routers.contains_key(&c.w1.0.id()));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        c.w1.1.send(Payload::Signal("late".to_string()), None).unwrap();
        let mut arrivals = c.master.take_arrivals().unwrap();
        let got = tokio::time::timeout(std::time::Duration::from_millis(50), arrivals.recv()).await;
        assert!(got.is_err());
        assert!(local.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_replaced_agent_router_dropped_after_exit() {
        let mut c = cluster();
        let second = link(201, Some("logger"));
        c.master.register("logger", second.0.clone());
        assert!(c.master.routers.contains_key(&c.logger.0.id()));

        // The first logger exits; its router stops once the channel closes
        let (old, far) = std::mem::replace(&mut c.logger, link(0, Some("gone")));
        drop(far);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let third = link(202, Some("cache"));
        c.master.register("cache", third.0.clone());
        assert!(!c.master.routers.contains_key(&old.id()));
        assert!(c.master.routers.contains_key(&second.0.id()));
        assert!(c.master.replaced.is_empty());
    }

    #[tokio::test]
    async fn test_debug_summary() {
        let rendered = format!("{:?}", Ipc::master(MASTER));
        assert!(rendered.contains("Master"));
        assert!(rendered.contains("routers: 1"));
    }

    #[tokio::test]
    async fn test_register_is_noop_off_master() {
        let (up, _m) = MemoryChannel::pair("up");
        let mut worker = Ipc::worker(Pid(101), Arc::new(up));
        let (h, _far) = link(300, Some("cache"));
        worker.register("cache", h);
        assert!(worker.agents().is_empty());
        assert!(worker.workers().is_empty());
    }

    #[tokio::test]
    async fn test_dead_worker_reported_not_propagated() {
        let mut c = cluster();
        let mut failures = c.master.subscribe_to(crate::events::TRANSPORT_FAILURE_EVENT);
        // A crashed worker whose exit hasn't been reported yet
        let (_, far) = std::mem::replace(&mut c.w2, link(999, None));
        drop(far);

        c.master.send("workers", "ping", json!({}), None).unwrap();
        assert!(c.w1.1.try_recv().is_some());
        match failures.try_recv().unwrap() {
            LocalEvent::TransportFailure { target, .. } => assert_eq!(target, Pid(102)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
