//! In-process cluster simulation — master, workers and agents on memory channels

use anyhow::{Context, Result, anyhow};
use herald_core::{
    Channel, EventReceiver, Ipc, IpcHandle, IpcOptions, LocalEvent, MemoryChannel, Pid,
    ProcessContext, ProcessHandle, spawn,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{HeraldConfig, ScriptStep, Sender};

/// One simulated process
struct Member {
    label: String,
    ipc: IpcHandle,
    events: EventReceiver,
}

impl Member {
    fn start(label: String, options: IpcOptions) -> Self {
        let (ipc, _task) = spawn(Ipc::new(options));
        let events = ipc.subscribe();
        Self { label, ipc, events }
    }

    /// Everything observed so far, formatted one event per line
    fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(event) = self.events.try_recv() {
            lines.push(describe(&event));
        }
        lines
    }
}

fn describe(event: &LocalEvent) -> String {
    match event {
        LocalEvent::Message { envelope, resource } => format!(
            "message '{}' from {} {}{}",
            envelope.action,
            envelope.from,
            envelope.body,
            if resource.is_some() { " (+resource)" } else { "" }
        ),
        LocalEvent::Signal { name, .. } => format!("signal '{}'", name),
        LocalEvent::TransportFailure { target, error } => {
            format!("transport failure to {}: {}", target, error)
        }
    }
}

pub struct Simulation {
    master: Member,
    workers: Vec<Member>,
    agents: Vec<(String, Member)>,
}

impl Simulation {
    /// Start every process and wire the topology through the master
    pub async fn start(config: &HeraldConfig) -> Result<Self> {
        let cluster = &config.cluster;
        let capacity = config.runtime.event_capacity;
        let master_pid = cluster.master_pid;

        let master = Member::start(
            format!("master ({})", master_pid),
            IpcOptions {
                is_agent: false,
                context: ProcessContext::Coordinator,
                pid: Pid(master_pid),
                upstream: None,
                event_capacity: capacity,
            },
        );

        let mut workers = Vec::with_capacity(cluster.workers);
        for n in 1..=cluster.workers {
            let pid = cluster.worker_pid(n)?;
            let (master_end, child_end) = link(&format!("worker:{}", n));
            let member = Member::start(
                format!("worker:{} ({})", n, pid),
                IpcOptions {
                    is_agent: false,
                    context: ProcessContext::Spawned,
                    pid,
                    upstream: Some(child_end),
                    event_capacity: capacity,
                },
            );
            master
                .ipc
                .worker_created(ProcessHandle::worker(pid, master_end))
                .await
                .context("master loop stopped while adding workers")?;
            workers.push(member);
        }

        let mut agents = Vec::with_capacity(cluster.agents.len());
        for (i, name) in cluster.agents.iter().enumerate() {
            let pid = cluster.agent_pid(i)?;
            let (master_end, child_end) = link(&format!("agent:{}", name));
            let member = Member::start(
                format!("agent:{} ({})", name, pid),
                IpcOptions {
                    is_agent: true,
                    context: ProcessContext::Detached,
                    pid,
                    upstream: Some(child_end),
                    event_capacity: capacity,
                },
            );
            master
                .ipc
                .register(name.clone(), ProcessHandle::agent(name.clone(), pid, master_end))
                .await
                .context("master loop stopped while registering agents")?;
            agents.push((name.clone(), member));
        }

        info!(
            "Simulation: master {} with {} workers and {} agents",
            master_pid,
            workers.len(),
            agents.len()
        );
        Ok(Self {
            master,
            workers,
            agents,
        })
    }

    fn member(&self, sender: &Sender) -> Result<&Member> {
        match sender {
            Sender::Master => Ok(&self.master),
            Sender::Worker(n) => self
                .workers
                .get(n - 1)
                .ok_or_else(|| anyhow!("worker:{} does not exist", n)),
            Sender::Agent(name) => self
                .agents
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, m)| m)
                .ok_or_else(|| anyhow!("agent '{}' does not exist", name)),
        }
    }

    /// Perform each step in order
    pub async fn run_script(&self, script: &[ScriptStep]) -> Result<()> {
        for (i, step) in script.iter().enumerate() {
            let sender: Sender = step.from.parse()?;
            let member = self.member(&sender)?;
            debug!("Simulation: step {} from {}", i + 1, member.label);

            let result = if step.signal {
                member.ipc.signal(step.to.clone(), &step.action, None).await
            } else {
                member
                    .ipc
                    .send(step.to.clone(), step.action.clone(), step.body.clone(), None)
                    .await
            };
            result.with_context(|| format!("script step {} ({})", i + 1, step.action))?;
        }
        Ok(())
    }

    /// Print what each process observed
    pub fn report(&mut self) {
        let members = std::iter::once(&mut self.master)
            .chain(self.workers.iter_mut())
            .chain(self.agents.iter_mut().map(|(_, m)| m));
        for member in members {
            let lines = member.drain();
            if lines.is_empty() {
                println!("{}: nothing received", member.label);
                continue;
            }
            println!("{}:", member.label);
            for line in lines {
                println!("  <- {}", line);
            }
        }
    }

    pub fn shutdown(&self) {
        self.master.ipc.shutdown();
        for member in &self.workers {
            member.ipc.shutdown();
        }
        for (_, member) in &self.agents {
            member.ipc.shutdown();
        }
    }
}

fn link(label: &str) -> (Arc<dyn Channel>, Arc<dyn Channel>) {
    let (master_end, child_end) = MemoryChannel::pair(label);
    (Arc::new(master_end), Arc::new(child_end))
}

/// Run the configured script and print the result
pub async fn run(config: &HeraldConfig, settle: Duration) -> Result<()> {
    let mut sim = Simulation::start(config).await?;
    sim.run_script(&config.script).await?;
    tokio::time::sleep(settle).await;
    sim.report();
    sim.shutdown();
    Ok(())
}
