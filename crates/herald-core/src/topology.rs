//! Topology registry — live workers in spawn order and named agents

use std::collections::HashMap;
use tracing::{debug, info};

use crate::handle::ProcessHandle;

/// Who the master can currently reach.
///
/// Only the master owns one. Workers keep spawn order across removals;
/// agents keep the slot of their first registration.
#[derive(Debug, Default)]
pub struct Topology {
    workers: Vec<ProcessHandle>,
    agents: Vec<(String, ProcessHandle)>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly spawned worker
    pub fn add_worker(&mut self, handle: ProcessHandle) {
        info!("Topology: worker {} joined", handle.pid());
        self.workers.push(handle);
    }

    /// Forget a terminated worker; returns false if it wasn't tracked
    pub fn remove_worker(&mut self, handle: &ProcessHandle) -> bool {
        match self.workers.iter().position(|w| w == handle) {
            Some(index) => {
                self.workers.remove(index);
                info!("Topology: worker {} left", handle.pid());
                true
            }
            None => {
                debug!("Topology: worker {} was not tracked", handle.pid());
                false
            }
        }
    }

    /// Register an agent under `name`, returning the handle it replaced
    pub fn register_agent(
        &mut self,
        name: impl Into<String>,
        handle: ProcessHandle,
    ) -> Option<ProcessHandle> {
        let name = name.into();
        if let Some(slot) = self.agents.iter_mut().find(|(n, _)| *n == name) {
            info!("Topology: agent '{}' re-registered ({})", name, handle.pid());
            return Some(std::mem::replace(&mut slot.1, handle));
        }
        info!("Topology: agent '{}' registered ({})", name, handle.pid());
        self.agents.push((name, handle));
        None
    }

    /// Live workers in spawn order
    pub fn workers(&self) -> &[ProcessHandle] {
        &self.workers
    }

    /// The agent registered under exactly `name`
    pub fn agent(&self, name: &str) -> Option<&ProcessHandle> {
        self.agents
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handle)| handle)
    }

    /// Agents in registry order
    pub fn agent_handles(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.agents.iter().map(|(_, handle)| handle)
    }

    /// Snapshot of the name→agent mapping
    pub fn agents(&self) -> HashMap<String, ProcessHandle> {
        self.agents
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}
