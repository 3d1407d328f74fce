// ── Audit ──
//
// Re-synchronizes one controller with RUNNING: fetch what the controller
// has, diff it against RUNNING, push the difference. Same phase shape as a
// regular commit, with a cooperative cancellation check at the start of
// each phase and again once its locks are held.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use strum::Display;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::Coordinator;
use super::locks::{Access, LockPlan};
use super::results::{PhaseReport, TxPhase};
use super::transaction::keys_of;
use crate::error::{CoreError, CoreResult};
use crate::manager::ConfigChange;
use crate::model::{ConfigKeyVal, ConfigMode, DataType, KeyType};
use crate::southbound::{CommitPhase, ResultCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum AuditState {
    Started,
    StartFailed,
    Voted,
    Committed,
}

pub(super) struct ActiveAudit {
    ctrlr: String,
    state: AuditState,
    vote_ok: bool,
    changes: Vec<ConfigChange>,
    _slot: OwnedMutexGuard<()>,
}

#[derive(Debug, Default)]
struct CancelFlag {
    ctrlr: Option<String>,
    cancelled: bool,
}

pub(super) struct AuditSlot {
    slot: Arc<Mutex<()>>,
    active: Mutex<Option<ActiveAudit>>,
    cancel: SyncMutex<CancelFlag>,
}

impl AuditSlot {
    pub(super) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            active: Mutex::new(None),
            cancel: SyncMutex::new(CancelFlag::default()),
        }
    }

    /// Drop the open audit, if any, returning its controller.
    pub(super) async fn abandon(&self) -> Option<String> {
        let audit = self.active.lock().await.take();
        *self.cancel.lock() = CancelFlag::default();
        audit.map(|a| a.ctrlr)
    }
}

fn not_audited(ctrlr: &str) -> CoreError {
    CoreError::no_such_instance(format!("audit of {ctrlr}"))
}

impl Coordinator {
    /// Fetch `ctrlr`'s realized configuration into the AUDIT image.
    ///
    /// Waits for any running audit to end. The audit exists from here on,
    /// whatever the report says, and must be closed with
    /// [`audit_end`](Self::audit_end).
    pub async fn audit_start(&self, ctrlr: &str) -> CoreResult<PhaseReport> {
        self.ensure_active()?;
        self.inner.registry.get_record(ctrlr, DataType::Running)?;
        let slot = Arc::clone(&self.inner.audit.slot).lock_owned().await;
        self.ensure_active()?;

        *self.inner.audit.cancel.lock() = CancelFlag {
            ctrlr: Some(ctrlr.to_owned()),
            cancelled: false,
        };
        let mut active = self.inner.audit.active.lock().await;
        let audit = active.insert(ActiveAudit {
            ctrlr: ctrlr.to_owned(),
            state: AuditState::StartFailed,
            vote_ok: false,
            changes: Vec::new(),
            _slot: slot,
        });
        info!(ctrlr, "audit started");

        let mut report = PhaseReport::new(TxPhase::Start);
        let nodes = if self.inner.registry.is_disconnected(ctrlr) {
            Err(ResultCode::Disconnected)
        } else {
            self.inner.southbound.fetch_config(ctrlr).await
        };
        let nodes = match nodes {
            Ok(nodes) => nodes,
            Err(code) => {
                report.record(ctrlr, code, Vec::new());
                return Ok(report);
            }
        };

        let _locks = self.inner.locks.acquire(&LockPlan::new().audit(Access::Write)).await;
        self.check_audit_cancel(ctrlr)?;

        let mut by_type: BTreeMap<KeyType, Vec<ConfigKeyVal>> = BTreeMap::new();
        for node in nodes {
            if self.inner.live_tree.is_valid(node.key_type) && !node.is_root() {
                by_type.entry(node.key_type).or_default().push(node);
            } else {
                debug!(ctrlr, node = %node, "audit data without a model counterpart skipped");
            }
        }
        let work = match self.begin_work().await {
            Ok(work) => work,
            Err(e) => return Ok(PhaseReport::local_failure(TxPhase::Start, e)),
        };
        for manager in self.tx_managers(&ConfigMode::Global) {
            if let Some(nodes) = by_type.remove(&manager.key_type()) {
                if let Err(e) = manager.load_audit(work, ctrlr, nodes).await {
                    self.rollback_persistence(work).await;
                    return Ok(PhaseReport::local_failure(TxPhase::Start, e));
                }
            }
        }
        if let Err(e) = self.persist(work).await {
            return Ok(PhaseReport::local_failure(TxPhase::Start, e));
        }

        audit.state = AuditState::Started;
        report.record(ctrlr, ResultCode::Success, Vec::new());
        Ok(report)
    }

    /// Compute what `ctrlr` lacks relative to RUNNING and ask it to prepare.
    pub async fn audit_vote(&self, ctrlr: &str) -> CoreResult<PhaseReport> {
        self.ensure_active()?;
        let mut active = self.inner.audit.active.lock().await;
        let audit = active
            .as_mut()
            .filter(|a| a.ctrlr == ctrlr)
            .ok_or_else(|| not_audited(ctrlr))?;
        if audit.state != AuditState::Started {
            return Err(CoreError::bad_request(format!(
                "audit of {ctrlr} is {}, cannot vote",
                audit.state
            )));
        }
        self.check_audit_cancel(ctrlr)?;
        let audit_type = self.inner.registry.get_audit_type(ctrlr, DataType::Running)?;

        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().running(Access::Read).audit(Access::Read))
            .await;
        self.check_audit_cancel(ctrlr)?;
        audit.state = AuditState::Voted;

        let mut changes = Vec::new();
        for manager in self.tx_managers(&ConfigMode::Global) {
            match manager.audit_changes(ctrlr, audit_type).await {
                Ok(found) => changes.extend(found),
                Err(e) => return Ok(PhaseReport::local_failure(TxPhase::Vote, e)),
            }
        }
        debug!(ctrlr, %audit_type, changes = changes.len(), "audit differences computed");

        let mut report = PhaseReport::new(TxPhase::Vote);
        let code = if changes.is_empty() {
            ResultCode::Success
        } else {
            self.send_phase(ctrlr, CommitPhase::Vote, &changes).await
        };
        report.record(ctrlr, code, keys_of(&changes));
        audit.vote_ok = report.is_success();
        audit.changes = changes;
        Ok(report)
    }

    /// Apply the prepared differences on `ctrlr`. Success clears the
    /// controller's invalid-config flag; failure sets it.
    pub async fn audit_global_commit(&self, ctrlr: &str) -> CoreResult<PhaseReport> {
        self.ensure_active()?;
        let mut active = self.inner.audit.active.lock().await;
        let audit = active
            .as_mut()
            .filter(|a| a.ctrlr == ctrlr)
            .ok_or_else(|| not_audited(ctrlr))?;
        if audit.state != AuditState::Voted || !audit.vote_ok {
            return Err(CoreError::bad_request(format!(
                "audit of {ctrlr} has no successful vote to commit"
            )));
        }
        self.check_audit_cancel(ctrlr)?;

        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().running(Access::Read).audit(Access::Write))
            .await;
        self.check_audit_cancel(ctrlr)?;

        let code = if audit.changes.is_empty() {
            ResultCode::Success
        } else {
            self.send_phase(ctrlr, CommitPhase::GlobalCommit, &audit.changes).await
        };
        let mut report = PhaseReport::new(TxPhase::GlobalCommit);
        report.record(ctrlr, code, keys_of(&audit.changes));

        if report.is_success() {
            for result in [
                self.inner.registry.update_audit_done(ctrlr, true),
                self.inner.registry.update_config_done(ctrlr, true),
            ] {
                if let Err(e) = result {
                    debug!(ctrlr, error = %e, "audit flags not updated");
                }
            }
            self.set_invalid_config(ctrlr, false);
        } else {
            self.set_invalid_config(ctrlr, true);
        }
        audit.state = AuditState::Committed;
        info!(ctrlr, changes = audit.changes.len(), success = report.is_success(), "audit committed");
        Ok(report)
    }

    /// Close the audit, discarding the AUDIT image. Never rejected by the
    /// node role or a cancellation.
    pub async fn audit_end(&self, ctrlr: &str) -> CoreResult<()> {
        let audit = {
            let mut active = self.inner.audit.active.lock().await;
            match active.as_ref() {
                Some(a) if a.ctrlr == ctrlr => active.take(),
                _ => None,
            }
        }
        .ok_or_else(|| not_audited(ctrlr))?;

        if audit.state == AuditState::Voted && audit.vote_ok && !audit.changes.is_empty() {
            let code = self.send_phase(ctrlr, CommitPhase::Abort, &[]).await;
            if !code.is_success() {
                warn!(ctrlr, %code, "audit abort not acknowledged");
            }
        }

        {
            let _locks = self.inner.locks.acquire(&LockPlan::new().audit(Access::Write)).await;
            let work = self.begin_work().await?;
            for manager in self.tx_managers(&ConfigMode::Global) {
                if let Err(e) = manager.clear_audit(work, ctrlr).await {
                    warn!(ctrlr, key_type = %manager.key_type(), error = %e, "audit image not cleared");
                }
            }
            if let Err(e) = self.persist(work).await {
                warn!(ctrlr, error = %e, "audit image clear not persisted");
            }
        }
        *self.inner.audit.cancel.lock() = CancelFlag::default();
        info!(ctrlr, state = %audit.state, "audit ended");
        Ok(())
    }

    /// Ask the running audit to stop at its next phase boundary.
    ///
    /// Returns `false` when no audit is running.
    pub fn audit_cancel(&self) -> bool {
        let mut flag = self.inner.audit.cancel.lock();
        let Some(ctrlr) = flag.ctrlr.clone() else {
            return false;
        };
        flag.cancelled = true;
        info!(%ctrlr, "audit cancellation requested");
        true
    }

    /// Run every audit phase for `ctrlr` and close it.
    ///
    /// Returns the last phase's report; a failed phase stops the run.
    pub async fn run_audit(&self, ctrlr: &str) -> CoreResult<PhaseReport> {
        let outcome = self.audit_phases(ctrlr).await;
        self.audit_end(ctrlr).await?;
        outcome
    }

    async fn audit_phases(&self, ctrlr: &str) -> CoreResult<PhaseReport> {
        let report = self.audit_start(ctrlr).await?;
        if !report.is_success() {
            return Ok(report);
        }
        let report = self.audit_vote(ctrlr).await?;
        if !report.is_success() {
            return Ok(report);
        }
        self.audit_global_commit(ctrlr).await
    }

    fn check_audit_cancel(&self, ctrlr: &str) -> CoreResult<()> {
        if self.inner.audit.cancel.lock().cancelled {
            debug!(ctrlr, "audit phase refused after cancellation");
            return Err(CoreError::AuditCancelled {
                ctrlr: ctrlr.to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alarm::RecordingAlarmSink;
    use crate::config::EngineConfig;
    use crate::coordinator::{InMemoryEngine, TxOutcome};
    use crate::error::ErrorKind;
    use crate::manager::ChangeOp;
    use crate::southbound::Southbound;
    use crate::model::{
        AlarmKind, AuditType, ConfigKey, ConfigRequest, ControllerRecord, ControllerType, CtrlrDomain, Operation,
        SessionId,
    };

    async fn committed_engine(alarms: Arc<RecordingAlarmSink>) -> InMemoryEngine {
        let engine = Coordinator::in_memory(EngineConfig::default(), alarms).unwrap();
        let c = &engine.coordinator;
        c.become_active(false).await.unwrap();
        for dt in [DataType::Candidate, DataType::Running] {
            c.create_controller(ControllerRecord::new("pfc1", ControllerType::Pfc, "7.0"), dt)
                .await
                .unwrap();
        }
        for name in ["vtn1", "vtn2"] {
            let ckv = ConfigKeyVal::new(KeyType::Vtn, ConfigKey::from_parts([name]))
                .with_user_data(CtrlrDomain::default_domain("pfc1"));
            let req = ConfigRequest::new(SessionId(1), ConfigMode::Global, Operation::Create, DataType::Candidate, ckv);
            c.handle_request(&req).await.unwrap();
        }
        let (id, _) = c.tx_start(SessionId(1), ConfigMode::Global).await.unwrap();
        c.tx_vote(id).await.unwrap();
        c.tx_global_commit(id).await.unwrap();
        c.tx_end(id, TxOutcome::Committed).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn audit_restores_drifted_controller() {
        let engine = committed_engine(Arc::new(RecordingAlarmSink::new())).await;
        // The controller lost vtn1, e.g. after a restart.
        let lost = ConfigKeyVal::new(KeyType::Vtn, ConfigKey::from_parts(["vtn1"]));
        engine
            .southbound
            .send("pfc1", CommitPhase::GlobalCommit, &[ConfigChange::new(ChangeOp::Delete, lost)])
            .await;
        assert_eq!(engine.southbound.realized("pfc1").len(), 1);

        let report = engine.coordinator.run_audit("pfc1").await.unwrap();
        assert!(report.is_success());
        assert_eq!(engine.southbound.realized("pfc1").len(), 2);
        assert!(engine.coordinator.registry().is_audit_done("pfc1", DataType::Running).unwrap());
        assert_eq!(engine.store.row_count(DataType::Audit), 0);
    }

    #[tokio::test]
    async fn simplified_audit_sends_only_differences() {
        let engine = committed_engine(Arc::new(RecordingAlarmSink::new())).await;
        let c = &engine.coordinator;
        c.update_controller(
            "pfc1",
            DataType::Running,
            crate::coordinator::ControllerUpdate {
                audit_type: Some(AuditType::Simplified),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        c.audit_start("pfc1").await.unwrap();
        let vote = c.audit_vote("pfc1").await.unwrap();
        assert!(vote.is_success());
        c.audit_global_commit("pfc1").await.unwrap();
        c.audit_end("pfc1").await.unwrap();

        let votes: Vec<_> = engine
            .southbound
            .sent()
            .into_iter()
            .filter(|(_, phase, _)| *phase == CommitPhase::Vote)
            .collect();
        // Only the regular commit voted; the in-sync audit had nothing to send.
        assert_eq!(votes.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_audit_refuses_next_phase() {
        let engine = committed_engine(Arc::new(RecordingAlarmSink::new())).await;
        let c = &engine.coordinator;
        assert!(!c.audit_cancel());

        assert!(c.audit_start("pfc1").await.unwrap().is_success());
        assert!(c.audit_cancel());
        let err = c.audit_vote("pfc1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuditCancelled);

        c.audit_end("pfc1").await.unwrap();
        assert!(!c.audit_cancel());
        assert!(c.run_audit("pfc1").await.unwrap().is_success());
    }

    #[tokio::test]
    async fn failed_audit_commit_raises_then_clears_invalid_config() {
        let alarms = Arc::new(RecordingAlarmSink::new());
        let engine = committed_engine(alarms.clone()).await;
        engine
            .southbound
            .script("pfc1", CommitPhase::GlobalCommit, ResultCode::Timeout);

        let report = engine.coordinator.run_audit("pfc1").await.unwrap();
        assert_eq!(report.first_error().map(CoreError::kind), Some(ErrorKind::Timeout));
        assert_eq!(engine.coordinator.invalid_config_controllers(), ["pfc1"]);

        assert!(engine.coordinator.run_audit("pfc1").await.unwrap().is_success());
        assert!(engine.coordinator.invalid_config_controllers().is_empty());
        assert_eq!(
            alarms.transitions(AlarmKind::InvalidConfig),
            [(true, Some("pfc1".into())), (false, Some("pfc1".into()))]
        );
    }

    #[tokio::test]
    async fn unreachable_controller_fails_start() {
        let engine = committed_engine(Arc::new(RecordingAlarmSink::new())).await;
        engine.southbound.set_reachable("pfc1", false);
        let report = engine.coordinator.run_audit("pfc1").await.unwrap();
        assert_eq!(report.phase, TxPhase::Start);
        assert_eq!(
            report.first_error().map(CoreError::kind),
            Some(ErrorKind::ControllerDisconnected)
        );
    }
}
