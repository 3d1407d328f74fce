// ── Import and merge ──
//
// Pull one controller's configuration into IMPORT, check it against
// CANDIDATE, fold it in. The import slot is held from `start_import`
// until `clear_import`, so imports never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::Coordinator;
use super::locks::{Access, LockPlan};
use super::results;
use crate::config::UnmappedImportPolicy;
use crate::error::{CoreError, CoreResult};
use crate::model::{ConfigKeyVal, ConfigMode, DataType, KeyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImportKind {
    /// Import everything and keep CANDIDATE objects IMPORT lacks.
    Full,
    /// Import and remove CANDIDATE objects of the controller that IMPORT lacks.
    Partial,
}

/// What `start_import` brought in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub ctrlr: String,
    pub kind: ImportKind,
    pub imported: usize,
    /// Objects without a model counterpart that were dropped.
    pub ignored: usize,
}

pub(super) struct ActiveImport {
    ctrlr: String,
    kind: ImportKind,
    _slot: OwnedMutexGuard<()>,
}

pub(super) struct ImportSlot {
    slot: Arc<Mutex<()>>,
    pub(super) active: Mutex<Option<ActiveImport>>,
}

impl ImportSlot {
    pub(super) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(())),
            active: Mutex::new(None),
        }
    }
}

fn no_import() -> CoreError {
    CoreError::bad_request("no import in progress")
}

impl Coordinator {
    /// Fetch `ctrlr`'s configuration into IMPORT.
    ///
    /// Waits for any running import to be cleared. Data the import tree
    /// has no key type for is dropped or fails the import, per
    /// configuration.
    pub async fn start_import(&self, ctrlr: &str, kind: ImportKind) -> CoreResult<ImportSummary> {
        self.ensure_active()?;
        self.inner.registry.get_record(ctrlr, DataType::Candidate)?;
        let slot = Arc::clone(&self.inner.import.slot).lock_owned().await;
        self.ensure_active()?;

        if self.inner.registry.is_disconnected(ctrlr) {
            return Err(CoreError::ControllerDisconnected {
                ctrlr: ctrlr.to_owned(),
            });
        }
        let nodes = self
            .inner
            .southbound
            .fetch_config(ctrlr)
            .await
            .map_err(|code| results::to_error(ctrlr, code))?;

        let mut by_type: BTreeMap<KeyType, Vec<ConfigKeyVal>> = BTreeMap::new();
        let mut ignored = 0usize;
        for node in nodes {
            let kt = node.key_type;
            if kt.is_state_only() {
                ignored += 1;
                continue;
            }
            if self.inner.import_tree.is_valid(kt) && !node.is_root() && self.inner.managers.contains(kt) {
                by_type.entry(kt).or_default().push(node);
                continue;
            }
            match self.inner.config.unmapped_import {
                UnmappedImportPolicy::Ignore => {
                    debug!(ctrlr, node = %node, "unmapped import data dropped");
                    ignored += 1;
                }
                UnmappedImportPolicy::Error => {
                    return Err(CoreError::CfgSemantic {
                        message: format!("{ctrlr} reported {node}, which has no import mapping"),
                    });
                }
            }
        }

        let _locks = self.inner.locks.acquire(&LockPlan::new().import(Access::Write)).await;
        let work = self.begin_work().await?;
        let mut imported = 0usize;
        for manager in self.import_managers() {
            let Some(nodes) = by_type.remove(&manager.key_type()) else {
                continue;
            };
            imported += nodes.len();
            if let Err(e) = manager.load_import(work, ctrlr, nodes).await {
                self.rollback_persistence(work).await;
                return Err(e);
            }
        }
        self.persist(work).await?;

        *self.inner.import.active.lock().await = Some(ActiveImport {
            ctrlr: ctrlr.to_owned(),
            kind,
            _slot: slot,
        });
        if ignored > 0 {
            warn!(ctrlr, ignored, "import dropped data without a model counterpart");
        }
        info!(ctrlr, %kind, imported, "import loaded");
        Ok(ImportSummary {
            ctrlr: ctrlr.to_owned(),
            kind,
            imported,
            ignored,
        })
    }

    /// Check IMPORT against CANDIDATE for naming and binding conflicts.
    pub async fn merge_validate(&self) -> CoreResult<()> {
        self.ensure_active()?;
        let active = self.inner.import.active.lock().await;
        let import = active.as_ref().ok_or_else(no_import)?;
        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().candidate(&ConfigMode::Global, Access::Read).import(Access::Read))
            .await;
        self.validate_import(&import.ctrlr).await
    }

    /// Fold IMPORT into CANDIDATE. A partial import also purges the
    /// controller's CANDIDATE objects that IMPORT no longer has.
    pub async fn merge_import_to_candidate(&self) -> CoreResult<()> {
        self.ensure_active()?;
        let active = self.inner.import.active.lock().await;
        let import = active.as_ref().ok_or_else(no_import)?;
        let ctrlr = import.ctrlr.as_str();
        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().candidate(&ConfigMode::Global, Access::Write).import(Access::Read))
            .await;
        self.validate_import(ctrlr).await?;

        let work = self.begin_work().await?;
        let managers = self.import_managers();
        for manager in &managers {
            if let Err(e) = manager.merge_import(work, ctrlr).await {
                self.rollback_persistence(work).await;
                return Err(e);
            }
        }
        let mut purged = 0usize;
        if import.kind == ImportKind::Partial {
            for manager in managers.iter().rev() {
                match manager.purge_candidate(work, ctrlr).await {
                    Ok(n) => purged += n,
                    Err(e) => {
                        self.rollback_persistence(work).await;
                        return Err(e);
                    }
                }
            }
        }
        self.persist(work).await?;
        self.rebuild_dirty_cache().await?;
        info!(ctrlr, kind = %import.kind, purged, "import merged into candidate");
        Ok(())
    }

    /// Discard IMPORT and release the import slot. Clearing with no
    /// import in progress is a no-op.
    pub async fn clear_import(&self) -> CoreResult<()> {
        let Some(import) = self.inner.import.active.lock().await.take() else {
            debug!("no import to clear");
            return Ok(());
        };
        {
            let _locks = self.inner.locks.acquire(&LockPlan::new().import(Access::Write)).await;
            let work = self.begin_work().await?;
            for manager in self.import_managers() {
                if let Err(e) = manager.clear_import(work).await {
                    self.rollback_persistence(work).await;
                    return Err(e);
                }
            }
            self.persist(work).await?;
        }
        info!(ctrlr = %import.ctrlr, "import cleared");
        Ok(())
    }

    /// Controller whose import is in progress.
    pub async fn import_in_progress(&self) -> Option<String> {
        self.inner
            .import
            .active
            .lock()
            .await
            .as_ref()
            .map(|i| i.ctrlr.clone())
    }

    async fn validate_import(&self, ctrlr: &str) -> CoreResult<()> {
        for manager in self.import_managers() {
            manager.merge_validate(ctrlr).await?;
        }
        Ok(())
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
    use crate::error::ErrorKind;
    use crate::model::{
        ConfigKey, ConfigRequest, ControllerRecord, ControllerType, CtrlrDomain, Operation, SessionId,
    };

    fn node(kt: KeyType, parts: &[&str]) -> ConfigKeyVal {
        ConfigKeyVal::new(kt, ConfigKey::from_parts(parts.iter().copied()))
            .with_user_data(CtrlrDomain::default_domain("pfc1"))
    }

    async fn engine(config: EngineConfig) -> InMemoryEngine {
        let engine = Coordinator::in_memory(config, Arc::new(RecordingAlarmSink::new())).unwrap();
        engine.coordinator.become_active(false).await.unwrap();
        engine
            .coordinator
            .create_controller(ControllerRecord::new("pfc1", ControllerType::Pfc, "7.0"), DataType::Candidate)
            .await
            .unwrap();
        engine.southbound.seed(
            "pfc1",
            [
                node(KeyType::Vtn, &["vtn1"]),
                node(KeyType::Vbridge, &["vtn1", "vbr1"]),
                node(KeyType::VbrNwmonitorHost, &["vtn1", "vbr1", "nm1", "h1"]),
            ],
        );
        engine
    }

    async fn create(engine: &InMemoryEngine, ckv: ConfigKeyVal) {
        let req = ConfigRequest::new(SessionId(1), ConfigMode::Global, Operation::Create, DataType::Candidate, ckv);
        engine.coordinator.handle_request(&req).await.unwrap();
    }

    #[tokio::test]
    async fn full_import_merges_into_candidate() {
        let engine = engine(EngineConfig::default()).await;
        let c = &engine.coordinator;

        let summary = c.start_import("pfc1", ImportKind::Full).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.ignored, 1);
        assert_eq!(engine.store.row_count(DataType::Import), 2);

        c.merge_validate().await.unwrap();
        c.merge_import_to_candidate().await.unwrap();
        c.clear_import().await.unwrap();

        assert_eq!(engine.store.row_count(DataType::Candidate), 2);
        assert_eq!(engine.store.row_count(DataType::Import), 0);
        assert!(c.is_candidate_dirty(&ConfigMode::Vtn("vtn1".into()), false).await.unwrap());
        assert_eq!(c.import_in_progress().await, None);
    }

    #[tokio::test]
    async fn conflicting_candidate_object_blocks_merge() {
        let engine = engine(EngineConfig::default()).await;
        let c = &engine.coordinator;
        create(&engine, node(KeyType::Vtn, &["vtn1"]).with_value(json!({ "description": "local" }))).await;

        c.start_import("pfc1", ImportKind::Full).await.unwrap();
        let err = c.merge_validate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MergeConflict);
        assert_eq!(
            c.merge_import_to_candidate().await.unwrap_err().kind(),
            ErrorKind::MergeConflict
        );
        c.clear_import().await.unwrap();
    }

    #[tokio::test]
    async fn partial_import_purges_stale_candidate_objects() {
        let engine = engine(EngineConfig::default()).await;
        let c = &engine.coordinator;
        create(&engine, node(KeyType::Vtn, &["vtn9"])).await;

        c.start_import("pfc1", ImportKind::Partial).await.unwrap();
        c.merge_import_to_candidate().await.unwrap();
        c.clear_import().await.unwrap();

        let vtns = engine
            .store
            .table(DataType::Candidate)
            .select(KeyType::Vtn, |_| true);
        assert_eq!(vtns.len(), 1);
        assert_eq!(vtns[0].key.leaf(), Some("vtn1"));
    }

    #[tokio::test]
    async fn unmapped_data_fails_import_when_configured() {
        let config = EngineConfig {
            unmapped_import: UnmappedImportPolicy::Error,
            ..EngineConfig::default()
        };
        let engine = engine(config).await;
        engine.southbound.seed("pfc1", [ConfigKeyVal::root()]);

        let err = engine
            .coordinator
            .start_import("pfc1", ImportKind::Full)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CfgSemantic);
        // The slot was released with the failed import.
        engine.southbound.set_reachable("pfc1", false);
        let err = engine
            .coordinator
            .start_import("pfc1", ImportKind::Full)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ControllerDisconnected);
    }

    #[tokio::test]
    async fn merge_without_import_is_a_bad_request() {
        let engine = engine(EngineConfig::default()).await;
        let err = engine.coordinator.merge_validate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        engine.coordinator.clear_import().await.unwrap();
    }
}
