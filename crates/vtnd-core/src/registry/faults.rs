// ── Path faults and id exhaustion ──
//
// Both maps report a transition only on the 0→1 and 1→0 edges; callers
// raise or clear alarms off the returned bool.

use std::collections::BTreeMap;

use tracing::debug;

use super::ControllerRegistry;

/// Matches any controller, domain or VTN in fault and exhaustion queries.
pub const WILDCARD: &str = "*";

fn matches(pattern: &str, value: &str) -> bool {
    pattern == WILDCARD || pattern == value
}

impl ControllerRegistry {
    // ── Path faults ──────────────────────────────────────────────────

    /// Count one path-fault assert or clear for `(ctrlr, domain)`.
    ///
    /// Returns `true` when the counter crossed between zero and one.
    /// Clearing a domain with no outstanding fault is a no-op.
    pub fn update_fault(&self, ctrlr: &str, domain: &str, asserted: bool) -> bool {
        let mut faults = self.faults.write();
        if asserted {
            let count = faults
                .entry(ctrlr.to_owned())
                .or_default()
                .entry(domain.to_owned())
                .or_insert(0);
            *count += 1;
            debug!(ctrlr, domain, count = *count, "path fault asserted");
            return *count == 1;
        }

        let Some(domains) = faults.get_mut(ctrlr) else {
            return false;
        };
        let Some(count) = domains.get_mut(domain) else {
            return false;
        };
        *count = count.saturating_sub(1);
        debug!(ctrlr, domain, count = *count, "path fault cleared");
        if *count > 0 {
            return false;
        }
        domains.remove(domain);
        if domains.is_empty() {
            faults.remove(ctrlr);
        }
        true
    }

    /// Whether any outstanding fault matches. Either argument may be [`WILDCARD`].
    pub fn is_fault_active(&self, ctrlr: &str, domain: &str) -> bool {
        self.faults.read().iter().any(|(c, domains)| {
            matches(ctrlr, c) && domains.keys().any(|d| matches(domain, d))
        })
    }

    pub fn fault_count(&self, ctrlr: &str, domain: &str) -> u32 {
        self.faults
            .read()
            .get(ctrlr)
            .and_then(|d| d.get(domain))
            .copied()
            .unwrap_or(0)
    }

    /// Drop every fault matching the pattern and return the `(ctrlr, domain)`
    /// pairs that were active.
    pub fn clear_fault(&self, ctrlr: &str, domain: &str) -> Vec<(String, String)> {
        let mut faults = self.faults.write();
        let mut cleared = Vec::new();
        faults.retain(|c, domains| {
            if !matches(ctrlr, c) {
                return true;
            }
            domains.retain(|d, _| {
                if matches(domain, d) {
                    cleared.push((c.clone(), d.clone()));
                    false
                } else {
                    true
                }
            });
            !domains.is_empty()
        });
        cleared
    }

    // ── Resource exhaustion ──────────────────────────────────────────

    /// Record or clear id exhaustion for `(vtn, ctrlr, domain)`.
    ///
    /// Returns `true` when the membership actually changed.
    pub fn update_exhaustion(&self, vtn: &str, ctrlr: &str, domain: &str, asserted: bool) -> bool {
        let mut map = self.exhaustion.write();
        if asserted {
            return map
                .entry(vtn.to_owned())
                .or_default()
                .entry(ctrlr.to_owned())
                .or_default()
                .insert(domain.to_owned());
        }

        let Some(ctrlrs) = map.get_mut(vtn) else {
            return false;
        };
        let Some(domains) = ctrlrs.get_mut(ctrlr) else {
            return false;
        };
        let removed = domains.remove(domain);
        if domains.is_empty() {
            ctrlrs.remove(ctrlr);
        }
        if ctrlrs.is_empty() {
            map.remove(vtn);
        }
        removed
    }

    /// Whether any exhaustion entry matches. Every argument may be [`WILDCARD`].
    pub fn is_exhausted(&self, vtn: &str, ctrlr: &str, domain: &str) -> bool {
        self.exhaustion.read().iter().any(|(v, ctrlrs)| {
            matches(vtn, v)
                && ctrlrs.iter().any(|(c, domains)| {
                    matches(ctrlr, c) && domains.iter().any(|d| matches(domain, d))
                })
        })
    }

    /// Remove matching exhaustion entries, returning `(vtn, ctrlr, domain)`.
    pub fn clear_exhaustion(&self, vtn: &str, ctrlr: &str, domain: &str) -> Vec<(String, String, String)> {
        let mut map = self.exhaustion.write();
        let mut cleared = Vec::new();
        map.retain(|v, ctrlrs| {
            if !matches(vtn, v) {
                return true;
            }
            ctrlrs.retain(|c, domains| {
                if !matches(ctrlr, c) {
                    return true;
                }
                domains.retain(|d| {
                    let hit = matches(domain, d);
                    if hit {
                        cleared.push((v.clone(), c.clone(), d.clone()));
                    }
                    !hit
                });
                !domains.is_empty()
            });
            !ctrlrs.is_empty()
        });
        cleared
    }

    /// Snapshot of outstanding path faults, for diagnostics.
    pub fn fault_snapshot(&self) -> BTreeMap<String, BTreeMap<String, u32>> {
        self.faults.read().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::alarm::RecordingAlarmSink;

    fn registry() -> ControllerRegistry {
        ControllerRegistry::new(Arc::new(RecordingAlarmSink::new()))
    }

    #[test]
    fn fault_edges_fire_once_each_way() {
        let reg = registry();
        assert!(reg.update_fault("pfc1", "dom1", true));
        assert!(!reg.update_fault("pfc1", "dom1", true));
        assert_eq!(reg.fault_count("pfc1", "dom1"), 2);

        assert!(!reg.update_fault("pfc1", "dom1", false));
        assert!(reg.update_fault("pfc1", "dom1", false));
        assert!(!reg.update_fault("pfc1", "dom1", false));
        assert!(!reg.is_fault_active("pfc1", WILDCARD));
        assert!(reg.fault_snapshot().is_empty());
    }

    #[test]
    fn fault_wildcards_match_any_level() {
        let reg = registry();
        reg.update_fault("pfc1", "dom1", true);
        reg.update_fault("pfc1", "dom2", true);
        reg.update_fault("vnp1", "dom1", true);

        assert!(reg.is_fault_active(WILDCARD, "dom2"));
        assert!(reg.is_fault_active("vnp1", WILDCARD));
        assert!(!reg.is_fault_active("vnp1", "dom2"));

        let cleared = reg.clear_fault("pfc1", WILDCARD);
        assert_eq!(
            cleared,
            vec![
                ("pfc1".to_owned(), "dom1".to_owned()),
                ("pfc1".to_owned(), "dom2".to_owned())
            ]
        );
        assert!(!reg.is_fault_active("pfc1", WILDCARD));
        assert!(reg.is_fault_active(WILDCARD, WILDCARD));
    }

    #[test]
    fn exhaustion_is_set_membership() {
        let reg = registry();
        assert!(reg.update_exhaustion("vtn1", "pfc1", "dom1", true));
        assert!(!reg.update_exhaustion("vtn1", "pfc1", "dom1", true));
        assert!(reg.update_exhaustion("vtn2", "pfc1", "dom1", true));

        assert!(reg.is_exhausted(WILDCARD, "pfc1", "dom1"));
        assert!(reg.is_exhausted("vtn1", WILDCARD, WILDCARD));
        assert!(!reg.is_exhausted("vtn3", WILDCARD, WILDCARD));

        assert!(reg.update_exhaustion("vtn1", "pfc1", "dom1", false));
        assert!(!reg.update_exhaustion("vtn1", "pfc1", "dom1", false));

        let cleared = reg.clear_exhaustion(WILDCARD, "pfc1", WILDCARD);
        assert_eq!(cleared, vec![("vtn2".into(), "pfc1".into(), "dom1".into())]);
        assert!(!reg.is_exhausted(WILDCARD, WILDCARD, WILDCARD));
    }
}
