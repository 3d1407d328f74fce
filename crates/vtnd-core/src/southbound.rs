// ── Controller-facing seam ──
//
// How the engine talks to device controllers. The wire transport lives
// behind `Southbound`; the engine only sees result codes.
//
// `LoopbackSouthbound` is a complete in-process controller farm: it keeps
// each controller's realized configuration, applies changes on global
// commit and can be scripted to fail specific phases.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::manager::{ChangeOp, ConfigChange};
use crate::model::{ConfigKey, ConfigKeyVal, KeyType};

/// Controller-side phase a change set is sent for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommitPhase {
    Vote,
    GlobalCommit,
    Abort,
}

/// Result code reported by a controller for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultCode {
    Success,
    Disconnected,
    NotSentToController,
    CfgSyntax,
    CfgSemantic,
    NotSupported,
    Timeout,
    /// A code the engine has no mapping for.
    Unknown(u32),
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

#[async_trait]
pub trait Southbound: Send + Sync {
    /// Send one phase of a change set to `ctrlr`.
    async fn send(&self, ctrlr: &str, phase: CommitPhase, changes: &[ConfigChange]) -> ResultCode;

    /// Everything `ctrlr` currently has configured.
    async fn fetch_config(&self, ctrlr: &str) -> Result<Vec<ConfigKeyVal>, ResultCode>;

    async fn ping(&self, ctrlr: &str) -> ResultCode;
}

// ── Loopback implementation ─────────────────────────────────────────

type Realized = BTreeMap<(KeyType, ConfigKey), ConfigKeyVal>;

#[derive(Debug, Default)]
struct LoopbackState {
    realized: HashMap<String, Realized>,
    prepared: HashMap<String, Vec<ConfigChange>>,
    scripted: HashMap<(String, CommitPhase), VecDeque<ResultCode>>,
    unreachable: Vec<String>,
    sent: Vec<(String, CommitPhase, usize)>,
}

/// In-process controllers that accept everything unless told otherwise.
#[derive(Debug, Default)]
pub struct LoopbackSouthbound {
    state: Mutex<LoopbackState>,
}

impl LoopbackSouthbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `phase` sent to `ctrlr` answer `code`.
    pub fn script(&self, ctrlr: &str, phase: CommitPhase, code: ResultCode) {
        self.state
            .lock()
            .scripted
            .entry((ctrlr.to_owned(), phase))
            .or_default()
            .push_back(code);
    }

    pub fn set_reachable(&self, ctrlr: &str, reachable: bool) {
        let mut state = self.state.lock();
        state.unreachable.retain(|c| c != ctrlr);
        if !reachable {
            state.unreachable.push(ctrlr.to_owned());
        }
    }

    /// Seed the configuration a controller reports on fetch.
    pub fn seed(&self, ctrlr: &str, nodes: impl IntoIterator<Item = ConfigKeyVal>) {
        let mut state = self.state.lock();
        let realized = state.realized.entry(ctrlr.to_owned()).or_default();
        for node in nodes {
            realized.insert((node.key_type, node.key.clone()), node);
        }
    }

    /// Objects currently realized on `ctrlr`.
    pub fn realized(&self, ctrlr: &str) -> Vec<ConfigKeyVal> {
        self.state
            .lock()
            .realized
            .get(ctrlr)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    /// `(ctrlr, phase, change count)` for every send, in order.
    pub fn sent(&self) -> Vec<(String, CommitPhase, usize)> {
        self.state.lock().sent.clone()
    }
}

#[async_trait]
impl Southbound for LoopbackSouthbound {
    async fn send(&self, ctrlr: &str, phase: CommitPhase, changes: &[ConfigChange]) -> ResultCode {
        let mut state = self.state.lock();
        state.sent.push((ctrlr.to_owned(), phase, changes.len()));

        if state.unreachable.iter().any(|c| c == ctrlr) {
            return ResultCode::Disconnected;
        }
        if let Some(code) = state
            .scripted
            .get_mut(&(ctrlr.to_owned(), phase))
            .and_then(VecDeque::pop_front)
        {
            debug!(ctrlr, %phase, %code, "scripted controller answer");
            if !code.is_success() {
                state.prepared.remove(ctrlr);
                return code;
            }
        }

        match phase {
            CommitPhase::Vote => {
                state.prepared.insert(ctrlr.to_owned(), changes.to_vec());
            }
            CommitPhase::GlobalCommit => {
                let prepared = state.prepared.remove(ctrlr).unwrap_or_else(|| changes.to_vec());
                let realized = state.realized.entry(ctrlr.to_owned()).or_default();
                for change in prepared {
                    let key = (change.node.key_type, change.node.key.clone());
                    match change.op {
                        ChangeOp::Create | ChangeOp::Update => {
                            realized.insert(key, change.node);
                        }
                        ChangeOp::Delete => {
                            realized.remove(&key);
                        }
                    }
                }
            }
            CommitPhase::Abort => {
                state.prepared.remove(ctrlr);
            }
        }
        ResultCode::Success
    }

    async fn fetch_config(&self, ctrlr: &str) -> Result<Vec<ConfigKeyVal>, ResultCode> {
        let state = self.state.lock();
        if state.unreachable.iter().any(|c| c == ctrlr) {
            return Err(ResultCode::Disconnected);
        }
        Ok(state
            .realized
            .get(ctrlr)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self, ctrlr: &str) -> ResultCode {
        if self.state.lock().unreachable.iter().any(|c| c == ctrlr) {
            ResultCode::Disconnected
        } else {
            ResultCode::Success
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::CtrlrDomain;

    fn vtn(name: &str) -> ConfigKeyVal {
        ConfigKeyVal::new(KeyType::Vtn, ConfigKey::from_parts([name]))
            .with_user_data(CtrlrDomain::new("pfc1", "dom1"))
    }

    #[tokio::test]
    async fn global_commit_applies_prepared_changes() {
        let sb = LoopbackSouthbound::new();
        let changes = vec![ConfigChange::new(ChangeOp::Create, vtn("vtn1"))];
        assert_eq!(sb.send("pfc1", CommitPhase::Vote, &changes).await, ResultCode::Success);
        assert!(sb.realized("pfc1").is_empty());

        assert_eq!(
            sb.send("pfc1", CommitPhase::GlobalCommit, &changes).await,
            ResultCode::Success
        );
        assert_eq!(sb.realized("pfc1"), vec![vtn("vtn1")]);
        assert_eq!(sb.fetch_config("pfc1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scripted_codes_are_consumed_once() {
        let sb = LoopbackSouthbound::new();
        sb.script("pfc1", CommitPhase::Vote, ResultCode::CfgSemantic);
        assert_eq!(sb.send("pfc1", CommitPhase::Vote, &[]).await, ResultCode::CfgSemantic);
        assert_eq!(sb.send("pfc1", CommitPhase::Vote, &[]).await, ResultCode::Success);
        assert_eq!(sb.sent().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_controllers_report_disconnect() {
        let sb = LoopbackSouthbound::new();
        sb.set_reachable("pfc1", false);
        assert_eq!(sb.ping("pfc1").await, ResultCode::Disconnected);
        assert_eq!(sb.fetch_config("pfc1").await.unwrap_err(), ResultCode::Disconnected);
        sb.set_reachable("pfc1", true);
        assert_eq!(sb.ping("pfc1").await, ResultCode::Success);
    }
}
