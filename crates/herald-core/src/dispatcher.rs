//! Dispatcher — writes one payload to every resolved target

use tracing::{debug, warn};

use crate::events::{EventBus, LocalEvent};
use crate::handle::ProcessHandle;
use crate::types::{Payload, Pid, Resource};

/// Outcome of one dispatch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: Vec<Pid>,
}

/// Send `payload` to each target in order.
///
/// A failed write is logged and published as a transport-failure event; the
/// remaining targets are still attempted.
pub fn deliver(
    targets: &[ProcessHandle],
    payload: &Payload,
    resource: Option<&Resource>,
    events: &EventBus,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for target in targets {
        match target.send(payload.clone(), resource.cloned()) {
            Ok(()) => {
                debug!("Dispatched to {}", target);
                report.delivered += 1;
            }
            Err(e) => {
                warn!("Failed to deliver to {}: {}", target, e);
                events.publish(LocalEvent::TransportFailure {
                    target: target.pid(),
                    error: e.to_string(),
                });
                report.failed.push(target.pid());
            }
        }
    }
    report
}
