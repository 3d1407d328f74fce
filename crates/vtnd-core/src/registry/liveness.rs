// ── Liveness ──
//
// Reachability plus the last oper state seen per logical port and
// boundary. Only real changes are forwarded to the engine.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::ControllerRegistry;

impl ControllerRegistry {
    /// Mark a controller reachable or not. Returns `true` on change.
    pub fn set_disconnected(&self, ctrlr: &str, disconnected: bool) -> bool {
        let changed = if disconnected {
            self.disconnected.insert(ctrlr.to_owned())
        } else {
            self.disconnected.remove(ctrlr).is_some()
        };
        if changed {
            info!(ctrlr, disconnected, "controller reachability changed");
        }
        changed
    }

    pub fn is_disconnected(&self, ctrlr: &str) -> bool {
        self.disconnected.contains(ctrlr)
    }

    pub fn disconnected_controllers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.disconnected.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Record a logical port's oper state. The first report for a port
    /// always counts as a change.
    pub fn update_port_state(&self, ctrlr: &str, port_id: &str, up: bool) -> bool {
        let mut ports = self.port_states.entry(ctrlr.to_owned()).or_default();
        let previous = ports.insert(port_id.to_owned(), up);
        let changed = previous != Some(up);
        if changed {
            debug!(ctrlr, port_id, up, "logical port state changed");
        }
        changed
    }

    pub fn port_state(&self, ctrlr: &str, port_id: &str) -> Option<bool> {
        self.port_states
            .get(ctrlr)
            .and_then(|ports| ports.get(port_id).copied())
    }

    /// Forget cached port states for a controller, e.g. after it reconnects.
    pub fn clear_port_states(&self, ctrlr: &str) -> BTreeMap<String, bool> {
        self.port_states
            .remove(ctrlr)
            .map(|(_, ports)| ports)
            .unwrap_or_default()
    }

    pub fn update_boundary_state(&self, boundary_id: &str, up: bool) -> bool {
        let previous = self.boundary_states.insert(boundary_id.to_owned(), up);
        previous != Some(up)
    }

    pub fn boundary_state(&self, boundary_id: &str) -> Option<bool> {
        self.boundary_states.get(boundary_id).map(|s| *s)
    }
}
