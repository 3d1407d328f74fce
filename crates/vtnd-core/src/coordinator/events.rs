// ── Event handling ──
//
// Callbacks behind the dispatch queue. They run one at a time on the
// dispatch worker, update the registry, notify managers of actual state
// changes and raise or clear alarms on fault edges.

use std::sync::Weak;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::lifecycle::NodeRole;
use super::{Coordinator, CoordinatorInner};
use crate::dispatch::EventHandler;
use crate::model::{Alarm, AlarmKind, ConfigKeyVal, ConfigMode, DataType, EngineEvent};
use crate::registry::WILDCARD;

/// Hands dequeued events to the coordinator without keeping it alive.
pub(super) struct EventRelay {
    inner: Weak<CoordinatorInner>,
}

impl EventRelay {
    pub(super) fn new(inner: Weak<CoordinatorInner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EventHandler for EventRelay {
    async fn handle(&self, event: EngineEvent) {
        if let Some(inner) = self.inner.upgrade() {
            Coordinator { inner }.dispatch_event(event);
        }
    }
}

impl Coordinator {
    fn dispatch_event(&self, event: EngineEvent) {
        if self.role() != NodeRole::Active {
            debug!(kind = %event.kind(), "event ignored outside the active role");
            return;
        }
        match event {
            EngineEvent::ControllerStatus { ctrlr, up } => self.on_controller_status(&ctrlr, up),
            EngineEvent::LogicalPortStatus {
                ctrlr,
                domain,
                port_id,
                up,
            } => self.on_port_status(&ctrlr, &domain, &port_id, up),
            EngineEvent::BoundaryStatus { boundary_id, up } => {
                if self.inner.registry.update_boundary_state(&boundary_id, up) {
                    info!(boundary = %boundary_id, up, "boundary status changed");
                }
            }
            EngineEvent::PathFault {
                ctrlr,
                domain,
                asserted,
            } => self.on_path_fault(&ctrlr, &domain, asserted),
            EngineEvent::PolicerFull {
                ctrlr,
                domain,
                key,
                asserted,
            } => self.raise_keyed(AlarmKind::PolicerFull, ctrlr, domain, key, asserted),
            EngineEvent::PolicerFail {
                ctrlr,
                domain,
                key,
                asserted,
            } => self.raise_keyed(AlarmKind::PolicerFail, ctrlr, domain, key, asserted),
            EngineEvent::NetworkMonitorFault {
                ctrlr,
                domain,
                key,
                asserted,
            } => self.raise_keyed(AlarmKind::NetworkMonitorFault, ctrlr, domain, key, asserted),
            EngineEvent::ResourceExhaustion {
                vtn,
                ctrlr,
                domain,
                asserted,
            } => {
                if self.inner.registry.update_exhaustion(&vtn, &ctrlr, &domain, asserted) {
                    self.inner.alarms.raise(
                        Alarm::new(AlarmKind::ResourceExhaustion, asserted)
                            .for_vtn(vtn)
                            .for_ctrlr(ctrlr)
                            .for_domain(domain),
                    );
                }
            }
        }
    }

    fn on_controller_status(&self, ctrlr: &str, up: bool) {
        if !self.inner.registry.set_disconnected(ctrlr, !up) {
            debug!(ctrlr, up, "controller status unchanged");
            return;
        }
        info!(ctrlr, up, "controller status changed");
        for manager in self.tx_managers(&ConfigMode::Global) {
            manager.on_controller_status(ctrlr, up);
        }

        if !up {
            for (c, d) in self.inner.registry.clear_fault(ctrlr, WILDCARD) {
                self.inner
                    .alarms
                    .raise(Alarm::new(AlarmKind::PathFault, false).for_ctrlr(c).for_domain(d));
            }
            return;
        }

        self.inner.registry.clear_port_states(ctrlr);
        let audit_on_reconnect = self
            .inner
            .registry
            .get_record(ctrlr, DataType::Running)
            .is_ok_and(|r| r.enable_audit);
        if audit_on_reconnect {
            let coordinator = self.clone();
            let ctrlr = ctrlr.to_owned();
            tokio::spawn(async move {
                match coordinator.run_audit(&ctrlr).await {
                    Ok(report) if report.is_success() => info!(%ctrlr, "reconnect audit finished"),
                    Ok(report) => warn!(%ctrlr, error = ?report.first_error(), "reconnect audit failed"),
                    Err(e) => warn!(%ctrlr, error = %e, "reconnect audit not run"),
                }
            });
        }
    }

    fn on_port_status(&self, ctrlr: &str, domain: &str, port_id: &str, up: bool) {
        if !self.inner.registry.update_port_state(ctrlr, port_id, up) {
            return;
        }
        debug!(ctrlr, domain, port_id, up, "logical port status changed");
        for manager in self.tx_managers(&ConfigMode::Global) {
            manager.on_port_status(ctrlr, domain, port_id, up);
        }
    }

    fn on_path_fault(&self, ctrlr: &str, domain: &str, asserted: bool) {
        if !self.inner.registry.update_fault(ctrlr, domain, asserted) {
            return;
        }
        self.inner
            .alarms
            .raise(Alarm::new(AlarmKind::PathFault, asserted).for_ctrlr(ctrlr).for_domain(domain));
        for manager in self.tx_managers(&ConfigMode::Global) {
            manager.on_path_fault(ctrlr, domain, asserted);
        }
    }

    fn raise_keyed(&self, kind: AlarmKind, ctrlr: String, domain: String, key: ConfigKeyVal, asserted: bool) {
        let alarm = Alarm::new(kind, asserted).for_ctrlr(ctrlr).for_domain(domain);
        let alarm = match key.vtn_name() {
            Some(vtn) => alarm.for_vtn(vtn),
            None => alarm,
        };
        self.inner.alarms.raise(alarm.with_key(key));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::alarm::RecordingAlarmSink;
    use crate::config::EngineConfig;
    use crate::coordinator::InMemoryEngine;
    use crate::model::{ConfigKey, ConfigRequest, CtrlrDomain, KeyType, Operation, SessionId};

    async fn engine(alarms: Arc<RecordingAlarmSink>) -> InMemoryEngine {
        let engine = Coordinator::in_memory(EngineConfig::default(), alarms).unwrap();
        engine.coordinator.become_active(false).await.unwrap();
        engine
    }

    async fn deliver(engine: &InMemoryEngine, events: impl IntoIterator<Item = EngineEvent>) {
        for event in events {
            engine.coordinator.enqueue_event(event);
        }
        engine.coordinator.events().wait_idle().await;
    }

    fn fault(asserted: bool) -> EngineEvent {
        EngineEvent::PathFault {
            ctrlr: "pfc1".into(),
            domain: "d1".into(),
            asserted,
        }
    }

    #[tokio::test]
    async fn path_fault_alarms_only_on_edges() {
        let alarms = Arc::new(RecordingAlarmSink::new());
        let engine = engine(alarms.clone()).await;

        deliver(&engine, [fault(true), fault(true), fault(false), fault(false)]).await;
        assert_eq!(
            alarms.transitions(AlarmKind::PathFault),
            [(true, Some("pfc1".into())), (false, Some("pfc1".into()))]
        );
    }

    #[tokio::test]
    async fn controller_down_clears_its_faults_and_fails_state_reads() {
        let alarms = Arc::new(RecordingAlarmSink::new());
        let engine = engine(alarms.clone()).await;
        deliver(
            &engine,
            [
                fault(true),
                EngineEvent::ControllerStatus {
                    ctrlr: "pfc1".into(),
                    up: false,
                },
            ],
        )
        .await;

        assert!(engine.coordinator.registry().is_disconnected("pfc1"));
        assert!(!engine.coordinator.registry().is_fault_active("pfc1", WILDCARD));
        assert_eq!(alarms.transitions(AlarmKind::PathFault).len(), 2);

        let ckv = ConfigKeyVal::new(KeyType::Vtn, ConfigKey::from_parts(["vtn1"]))
            .with_user_data(CtrlrDomain::default_domain("pfc1"));
        let req = ConfigRequest::new(SessionId(1), ConfigMode::Global, Operation::Read, DataType::State, ckv);
        let err = engine.coordinator.handle_request(&req).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ControllerDisconnected);
    }

    #[tokio::test]
    async fn port_changes_reach_state_reads() {
        let engine = engine(Arc::new(RecordingAlarmSink::new())).await;
        let port = |up| EngineEvent::LogicalPortStatus {
            ctrlr: "pfc1".into(),
            domain: "d1".into(),
            port_id: "p1".into(),
            up,
        };
        deliver(&engine, [port(true), port(true), port(false)]).await;
        assert_eq!(engine.coordinator.registry().port_state("pfc1", "p1"), Some(false));
    }

    #[tokio::test]
    async fn keyed_alarms_carry_scope() {
        let alarms = Arc::new(RecordingAlarmSink::new());
        let engine = engine(alarms.clone()).await;
        let key = ConfigKeyVal::new(KeyType::VbrPolicingmap, ConfigKey::from_parts(["vtn1", "vbr1"]))
            .with_value(json!({ "profile": "pp1" }));
        deliver(
            &engine,
            [
                EngineEvent::PolicerFull {
                    ctrlr: "pfc1".into(),
                    domain: "d1".into(),
                    key,
                    asserted: true,
                },
                EngineEvent::ResourceExhaustion {
                    vtn: "vtn1".into(),
                    ctrlr: "pfc1".into(),
                    domain: "d1".into(),
                    asserted: true,
                },
                EngineEvent::ResourceExhaustion {
                    vtn: "vtn1".into(),
                    ctrlr: "pfc1".into(),
                    domain: "d1".into(),
                    asserted: true,
                },
            ],
        )
        .await;

        let all = alarms.alarms();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].vtn.as_deref(), Some("vtn1"));
        assert!(all[0].key.is_some());
        assert_eq!(all[1].kind, AlarmKind::ResourceExhaustion);
    }

    #[tokio::test]
    async fn standby_ignores_events() {
        let alarms = Arc::new(RecordingAlarmSink::new());
        let engine = engine(alarms.clone()).await;
        engine.coordinator.become_standby().await;
        engine.coordinator.enqueue_event(fault(true));
        engine.coordinator.events().wait_idle().await;
        assert!(alarms.alarms().is_empty());
    }
}
