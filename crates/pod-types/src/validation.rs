//! Validation applied to a desired pod list before reconciliation

use crate::container::{ContainerSpec, Protocol};
use crate::pod::Pod;
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Host port already claimed, by this pod or an earlier one
    #[error("host port {port}/{protocol} is already in use (container {container})")]
    DuplicateHostPort {
        port: u16,
        protocol: Protocol,
        container: String,
    },
}

/// Claims every host port of `containers` in `claimed`.
///
/// Nothing is committed when any port conflicts, so a rejected pod does not
/// block ports for the pods that follow it. This differs from claiming
/// ports one at a time, where a dropped pod's other ports would still
/// reject later pods.
pub fn accumulate_unique_host_ports(
    containers: &[ContainerSpec],
    claimed: &mut HashSet<(u16, Protocol)>,
) -> Result<(), Vec<ValidationError>> {
    let mut pending: HashSet<(u16, Protocol)> = HashSet::new();
    let mut errors = Vec::new();

    for container in containers {
        for port in container.host_ports() {
            let Some(host_port) = port.host_port else {
                continue;
            };
            let key = (host_port, port.protocol);
            if claimed.contains(&key) || !pending.insert(key) {
                errors.push(ValidationError::DuplicateHostPort {
                    port: host_port,
                    protocol: port.protocol,
                    container: container.name.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        claimed.extend(pending);
        Ok(())
    } else {
        Err(errors)
    }
}

/// Drops pods whose host ports conflict with an earlier pod in the list.
///
/// Iteration order decides the winner: the first pod to claim a port keeps it.
pub fn filter_host_port_conflicts(pods: Vec<Pod>) -> Vec<Pod> {
    let mut claimed = HashSet::new();
    pods.into_iter()
        .filter(|pod| match accumulate_unique_host_ports(&pod.manifest.containers, &mut claimed) {
            Ok(()) => true,
            Err(errors) => {
                warn!("Pod {} has conflicting ports, ignoring: {:?}", pod.full_name(), errors);
                false
            }
        })
        .collect()
}
