// ── Regular commit ──
//
// Start → Vote → GlobalCommit → End. The commit slot is taken in Start
// and held until End, so a second Start waits for the first transaction
// to finish.

use std::collections::BTreeMap;
use std::sync::Arc;

use strum::Display;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::Coordinator;
use super::locks::{Access, LockPlan};
use super::results::{PhaseReport, TxId, TxPhase};
use crate::error::{CoreError, CoreResult};
use crate::manager::ConfigChange;
use crate::model::{ConfigKeyVal, ConfigMode, SessionId};
use crate::southbound::{CommitPhase, ResultCode};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    /// Controllers that voted are told to abort. CANDIDATE is restored
    /// from RUNNING only when asked.
    Aborted { rollback_candidate: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum TxState {
    Started,
    StartFailed,
    Voted,
    Committed,
}

pub(super) struct ActiveTx {
    id: TxId,
    session: SessionId,
    mode: ConfigMode,
    state: TxState,
    vote_ok: bool,
    changes: BTreeMap<String, Vec<ConfigChange>>,
    voted: Vec<String>,
    _slot: OwnedMutexGuard<()>,
}

pub(super) struct TxSlot {
    slot: Arc<Mutex<()>>,
    pub(super) active: Mutex<Option<ActiveTx>>,
}

impl TxSlot {
    pub(super) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            active: Mutex::new(None),
        }
    }
}

/// Route changes to their controllers. Unbound changes stay local.
pub(super) fn by_controller(changes: Vec<ConfigChange>) -> BTreeMap<String, Vec<ConfigChange>> {
    let mut routed: BTreeMap<String, Vec<ConfigChange>> = BTreeMap::new();
    for change in changes {
        if let Some(ctrlr) = change.ctrlr().map(str::to_owned) {
            routed.entry(ctrlr).or_default().push(change);
        }
    }
    routed
}

pub(super) fn keys_of(changes: &[ConfigChange]) -> Vec<ConfigKeyVal> {
    changes.iter().map(|c| c.node.clone()).collect()
}

fn no_such_tx(id: TxId) -> CoreError {
    CoreError::no_such_instance(format!("transaction {id}"))
}

impl Coordinator {
    /// Begin a commit of `mode`'s candidate edits.
    ///
    /// Waits for any running transaction to end. A validation failure is
    /// reported in the returned report; the transaction still exists and
    /// must be ended.
    pub async fn tx_start(&self, session: SessionId, mode: ConfigMode) -> CoreResult<(TxId, PhaseReport)> {
        self.ensure_active()?;
        let slot = Arc::clone(&self.inner.tx.slot).lock_owned().await;
        self.ensure_active()?;

        let id = TxId::new();
        let mut report = PhaseReport::new(TxPhase::Start);
        {
            let _locks = self
                .inner
                .locks
                .acquire(&LockPlan::new().candidate(&mode, Access::Read))
                .await;
            for manager in self.tx_managers(&mode) {
                if let Err(e) = manager.tx_start(&mode).await {
                    report = PhaseReport::local_failure(TxPhase::Start, e);
                    break;
                }
            }
        }

        let state = if report.is_success() {
            TxState::Started
        } else {
            TxState::StartFailed
        };
        info!(tx = %id, %session, %mode, %state, "transaction started");
        *self.inner.tx.active.lock().await = Some(ActiveTx {
            id,
            session,
            mode,
            state,
            vote_ok: false,
            changes: BTreeMap::new(),
            voted: Vec::new(),
            _slot: slot,
        });
        Ok((id, report))
    }

    /// Collect the pending changes and ask every affected controller to
    /// prepare them.
    pub async fn tx_vote(&self, id: TxId) -> CoreResult<PhaseReport> {
        self.ensure_active()?;
        let mut active = self.inner.tx.active.lock().await;
        let tx = active.as_mut().filter(|t| t.id == id).ok_or_else(|| no_such_tx(id))?;
        if tx.state != TxState::Started {
            return Err(CoreError::bad_request(format!("transaction {id} is {}, cannot vote", tx.state)));
        }

        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().candidate(&tx.mode, Access::Write).running(Access::Read))
            .await;
        tx.state = TxState::Voted;

        let mut pending = Vec::new();
        for manager in self.tx_managers(&tx.mode) {
            match manager.pending_changes(&tx.mode).await {
                Ok(changes) => pending.extend(changes),
                Err(e) => return Ok(PhaseReport::local_failure(TxPhase::Vote, e)),
            }
        }
        debug!(tx = %id, changes = pending.len(), "pending changes collected");

        let mut report = PhaseReport::new(TxPhase::Vote);
        tx.changes = by_controller(pending);
        for (ctrlr, changes) in &tx.changes {
            let code = self.send_phase(ctrlr, CommitPhase::Vote, changes).await;
            report.record(ctrlr, code, keys_of(changes));
            if code.is_success() {
                tx.voted.push(ctrlr.clone());
            }
        }
        tx.vote_ok = report.is_success();
        Ok(report)
    }

    /// Tell controllers to apply what they prepared and move CANDIDATE into
    /// RUNNING. Controllers that fail here are flagged invalid-config; the
    /// local commit still goes ahead.
    pub async fn tx_global_commit(&self, id: TxId) -> CoreResult<PhaseReport> {
        self.ensure_active()?;
        let mut active = self.inner.tx.active.lock().await;
        let tx = active.as_mut().filter(|t| t.id == id).ok_or_else(|| no_such_tx(id))?;
        if tx.state != TxState::Voted || !tx.vote_ok {
            return Err(CoreError::bad_request(format!(
                "transaction {id} has no successful vote to commit"
            )));
        }

        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().candidate(&tx.mode, Access::Write).running(Access::Write))
            .await;

        let mut report = PhaseReport::new(TxPhase::GlobalCommit);
        for (ctrlr, changes) in &tx.changes {
            let code = self.send_phase(ctrlr, CommitPhase::GlobalCommit, changes).await;
            report.record(ctrlr, code, keys_of(changes));
            if code.is_success() {
                if let Err(e) = self.inner.registry.update_config_done(ctrlr, true) {
                    debug!(ctrlr, error = %e, "config-done flag not updated");
                }
            } else {
                self.set_invalid_config(ctrlr, true);
            }
        }

        let work = match self.begin_work().await {
            Ok(work) => work,
            Err(e) => return Ok(PhaseReport::local_failure(TxPhase::GlobalCommit, e)),
        };
        for manager in self.tx_managers(&tx.mode) {
            if let Err(e) = manager.commit_to_running(work, &tx.mode).await {
                self.rollback_persistence(work).await;
                return Ok(PhaseReport::local_failure(TxPhase::GlobalCommit, e));
            }
        }
        if let Err(e) = self.persist(work).await {
            return Ok(PhaseReport::local_failure(TxPhase::GlobalCommit, e));
        }

        self.inner.dirty.set(&tx.mode, false);
        tx.state = TxState::Committed;
        info!(tx = %id, controllers = tx.changes.len(), "transaction committed");
        Ok(report)
    }

    /// Close the transaction and release the commit slot.
    pub async fn tx_end(&self, id: TxId, outcome: TxOutcome) -> CoreResult<()> {
        let tx = {
            let mut active = self.inner.tx.active.lock().await;
            match active.as_ref() {
                Some(t) if t.id == id => active.take(),
                _ => None,
            }
        }
        .ok_or_else(|| no_such_tx(id))?;

        match outcome {
            TxOutcome::Committed => {
                if tx.state != TxState::Committed {
                    warn!(tx = %id, state = %tx.state, "transaction ended as committed without a global commit");
                }
            }
            TxOutcome::Aborted { rollback_candidate } => {
                if tx.state == TxState::Voted {
                    for ctrlr in &tx.voted {
                        let code = self.send_phase(ctrlr, CommitPhase::Abort, &[]).await;
                        if !code.is_success() {
                            warn!(tx = %id, ctrlr, %code, "abort not acknowledged");
                        }
                    }
                }
                if rollback_candidate {
                    self.restore_candidate(&tx.mode).await?;
                }
            }
        }

        info!(tx = %id, session = %tx.session, ?outcome, "transaction ended");
        Ok(())
    }

    async fn restore_candidate(&self, mode: &ConfigMode) -> CoreResult<()> {
        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().candidate(mode, Access::Write).running(Access::Read))
            .await;
        let work = self.begin_work().await?;
        for manager in self.tx_managers(mode) {
            if let Err(e) = manager.rollback_candidate(work, mode).await {
                self.rollback_persistence(work).await;
                return Err(e);
            }
        }
        self.persist(work).await?;
        self.inner.dirty.set(mode, false);
        debug!(%mode, "candidate restored from running");
        Ok(())
    }

    /// Send one phase, short-circuiting controllers known to be down.
    pub(super) async fn send_phase(&self, ctrlr: &str, phase: CommitPhase, changes: &[ConfigChange]) -> ResultCode {
        if self.inner.registry.is_disconnected(ctrlr) {
            return ResultCode::Disconnected;
        }
        self.inner.southbound.send(ctrlr, phase, changes).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::alarm::RecordingAlarmSink;
    use crate::config::EngineConfig;
    use crate::coordinator::InMemoryEngine;
    use crate::error::ErrorKind;
    use crate::manager::WorkId;
    use crate::model::{
        AlarmKind, ConfigKey, ConfigRequest, ControllerRecord, ControllerType, CtrlrDomain, DataType, KeyType,
        Operation,
    };

    async fn engine(alarms: Arc<RecordingAlarmSink>) -> InMemoryEngine {
        let engine = Coordinator::in_memory(EngineConfig::default(), alarms).unwrap();
        engine.coordinator.become_active(false).await.unwrap();
        for dt in [DataType::Candidate, DataType::Running] {
            engine
                .coordinator
                .create_controller(ControllerRecord::new("pfc1", ControllerType::Pfc, "7.0"), dt)
                .await
                .unwrap();
        }
        engine
    }

    async fn create(engine: &InMemoryEngine, kt: KeyType, parts: &[&str]) {
        let ckv = ConfigKeyVal::new(kt, ConfigKey::from_parts(parts.iter().copied()))
            .with_user_data(CtrlrDomain::default_domain("pfc1"));
        let req = ConfigRequest::new(SessionId(1), ConfigMode::Global, Operation::Create, DataType::Candidate, ckv);
        engine.coordinator.handle_request(&req).await.unwrap();
    }

    async fn commit(engine: &InMemoryEngine) -> PhaseReport {
        let c = &engine.coordinator;
        let (id, start) = c.tx_start(SessionId(1), ConfigMode::Global).await.unwrap();
        assert!(start.is_success());
        let vote = c.tx_vote(id).await.unwrap();
        assert!(vote.is_success());
        let report = c.tx_global_commit(id).await.unwrap();
        c.tx_end(id, TxOutcome::Committed).await.unwrap();
        report
    }

    #[tokio::test]
    async fn commit_realizes_candidate_on_controller() {
        let engine = engine(Arc::new(RecordingAlarmSink::new())).await;
        create(&engine, KeyType::Vtn, &["vtn1"]).await;
        create(&engine, KeyType::Vbridge, &["vtn1", "vbr1"]).await;
        assert!(engine.coordinator.is_candidate_dirty(&ConfigMode::Global, false).await.unwrap());

        let report = commit(&engine).await;
        assert!(report.is_success());
        assert_eq!(engine.southbound.realized("pfc1").len(), 2);
        assert_eq!(engine.store.row_count(DataType::Running), 2);
        assert!(!engine.coordinator.is_candidate_dirty(&ConfigMode::Global, false).await.unwrap());
        assert!(engine.coordinator.registry().is_config_done("pfc1", DataType::Running).unwrap());
    }

    #[tokio::test]
    async fn global_commit_failure_marks_controller_invalid() {
        let alarms = Arc::new(RecordingAlarmSink::new());
        let engine = engine(alarms.clone()).await;
        create(&engine, KeyType::Vtn, &["vtn1"]).await;
        engine
            .southbound
            .script("pfc1", CommitPhase::GlobalCommit, ResultCode::CfgSemantic);

        let report = commit(&engine).await;
        assert!(!report.is_success());
        assert_eq!(report.results[0].code, Some(ResultCode::CfgSemantic));
        assert_eq!(engine.coordinator.invalid_config_controllers(), ["pfc1"]);
        assert_eq!(alarms.transitions(AlarmKind::InvalidConfig), [(true, Some("pfc1".into()))]);
        // RUNNING moves regardless; the controller is left for audit.
        assert_eq!(engine.store.row_count(DataType::Running), 1);
    }

    #[tokio::test]
    async fn disconnected_controller_is_tolerated_in_vote_only() {
        let engine = engine(Arc::new(RecordingAlarmSink::new())).await;
        create(&engine, KeyType::Vtn, &["vtn1"]).await;
        engine.southbound.set_reachable("pfc1", false);
        let c = &engine.coordinator;

        let (id, _) = c.tx_start(SessionId(1), ConfigMode::Global).await.unwrap();
        let vote = c.tx_vote(id).await.unwrap();
        assert!(vote.is_success());
        assert_eq!(vote.results[0].code, Some(ResultCode::Disconnected));

        let commit = c.tx_global_commit(id).await.unwrap();
        assert_eq!(
            commit.first_error().map(CoreError::kind),
            Some(ErrorKind::ControllerDisconnected)
        );
        c.tx_end(id, TxOutcome::Committed).await.unwrap();
    }

    #[tokio::test]
    async fn failed_start_reports_anonymous_result_and_blocks_vote() {
        let engine = engine(Arc::new(RecordingAlarmSink::new())).await;
        let c = &engine.coordinator;
        create(&engine, KeyType::Vtn, &["vtn1"]).await;
        create(&engine, KeyType::Vbridge, &["vtn1", "vbr1"]).await;
        // Remove the parent behind the engine's back to leave an orphan.
        engine
            .store
            .table(DataType::Candidate)
            .remove(WorkId(0), KeyType::Vtn, &ConfigKey::from_parts(["vtn1"]));

        let (id, report) = c.tx_start(SessionId(1), ConfigMode::Global).await.unwrap();
        assert!(!report.is_success());
        assert!(report.results[0].ctrlr.is_empty());
        assert_eq!(c.tx_vote(id).await.unwrap_err().kind(), ErrorKind::BadRequest);
        c.tx_end(id, TxOutcome::Aborted { rollback_candidate: false }).await.unwrap();
    }

    #[tokio::test]
    async fn abort_with_rollback_restores_candidate() {
        let engine = engine(Arc::new(RecordingAlarmSink::new())).await;
        let c = &engine.coordinator;
        create(&engine, KeyType::Vtn, &["vtn1"]).await;
        commit(&engine).await;
        create(&engine, KeyType::Vtn, &["vtn2"]).await;

        let (id, _) = c.tx_start(SessionId(1), ConfigMode::Global).await.unwrap();
        c.tx_vote(id).await.unwrap();
        c.tx_end(id, TxOutcome::Aborted { rollback_candidate: true }).await.unwrap();

        assert_eq!(engine.store.row_count(DataType::Candidate), 1);
        assert!(!c.is_candidate_dirty(&ConfigMode::Global, true).await.unwrap());
        assert!(
            engine
                .southbound
                .sent()
                .iter()
                .any(|(ctrlr, phase, _)| ctrlr == "pfc1" && *phase == CommitPhase::Abort)
        );
    }

    #[tokio::test]
    async fn second_start_waits_for_first_end() {
        let engine = engine(Arc::new(RecordingAlarmSink::new())).await;
        let c = engine.coordinator.clone();
        let (first, _) = c.tx_start(SessionId(1), ConfigMode::Vtn("a".into())).await.unwrap();

        let other = c.clone();
        let second = tokio::spawn(async move { other.tx_start(SessionId(2), ConfigMode::Vtn("b".into())).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        c.tx_end(first, TxOutcome::Committed).await.unwrap();
        let (id, report) = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(report.is_success());
        c.tx_end(id, TxOutcome::Committed).await.unwrap();
    }

    #[tokio::test]
    async fn phases_are_rejected_on_standby() {
        let engine = Coordinator::in_memory(EngineConfig::default(), Arc::new(RecordingAlarmSink::new())).unwrap();
        let err = engine
            .coordinator
            .tx_start(SessionId(1), ConfigMode::Global)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedByStandby);
    }
}
