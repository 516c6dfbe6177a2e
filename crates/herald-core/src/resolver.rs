//! Address resolver — expands specifiers into concrete handles

use tracing::debug;

use crate::handle::ProcessHandle;
use crate::topology::Topology;
use crate::types::{AddressSpecifier, Pid};

/// Expand `specifiers` against `topology`.
///
/// Matches accumulate in specifier order, duplicates (by identity) keep their
/// first position, and any handle whose pid is `exclude` is dropped.
/// Specifiers that match nothing contribute nothing.
pub fn resolve(
    topology: &Topology,
    master: &ProcessHandle,
    specifiers: &[AddressSpecifier],
    exclude: Pid,
) -> Vec<ProcessHandle> {
    let mut matched: Vec<&ProcessHandle> = Vec::new();

    for spec in specifiers {
        let before = matched.len();
        match spec {
            AddressSpecifier::Master => matched.push(master),
            AddressSpecifier::Agents => matched.extend(topology.agent_handles()),
            AddressSpecifier::Workers => matched.extend(topology.workers()),
            AddressSpecifier::All => {
                matched.push(master);
                matched.extend(topology.workers());
                matched.extend(topology.agent_handles());
            }
            AddressSpecifier::Name(name) => matched.extend(topology.agent(name)),
            AddressSpecifier::Pid(pid) => {
                matched.extend(topology.workers().iter().filter(|w| w.pid() == *pid));
                matched.extend(topology.agent_handles().filter(|a| a.pid() == *pid));
            }
        }
        if matched.len() == before {
            debug!("Resolver: '{}' matched nothing", spec);
        }
    }

    let mut resolved: Vec<ProcessHandle> = Vec::with_capacity(matched.len());
    for handle in matched {
        if handle.pid() != exclude && !resolved.contains(handle) {
            resolved.push(handle.clone());
        }
    }
    resolved
}

/// Pids of `handles`, as concrete specifiers
pub fn concrete_targets(handles: &[ProcessHandle]) -> Vec<AddressSpecifier> {
    handles
        .iter()
        .map(|h| AddressSpecifier::Pid(h.pid()))
        .collect()
}
