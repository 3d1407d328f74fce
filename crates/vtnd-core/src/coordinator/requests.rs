// ── Per-key-type requests ──
//
// Request path: cross-validate operation and datatype, check the node
// role, check the key type against the mode, take the datatype's lock,
// hand off to the key type's manager. A write runs in its own unit of
// work, committed or rolled back on its own.

use std::sync::Arc;

use tracing::{debug, trace};

use super::locks::{Access, LockPlan};
use super::{Coordinator, results, unknown_key_type};
use crate::bulk::BulkReader;
use crate::error::{CoreError, CoreResult};
use crate::keytree::KeyTypeTree;
use crate::manager::{KeyTypeManager, WorkId};
use crate::model::{ConfigMode, ConfigRequest, ConfigResponse, DataType, KeyType, Operation};

impl Coordinator {
    /// Execute one per-key-type request.
    pub async fn handle_request(&self, req: &ConfigRequest) -> CoreResult<ConfigResponse> {
        if !req.operation.allowed_on(req.datatype) {
            return Err(CoreError::NotAllowedForDatatype {
                operation: req.operation.to_string(),
                datatype: req.datatype,
            });
        }
        if req.operation.is_write() {
            self.ensure_active()?;
        } else {
            self.ensure_readable()?;
        }
        self.check_scope(req)?;
        if req.datatype == DataType::State {
            if let Some(ctrlr) = req.ckv.ctrlr() {
                if self.inner.registry.is_disconnected(ctrlr) {
                    return Err(CoreError::ControllerDisconnected {
                        ctrlr: ctrlr.to_owned(),
                    });
                }
            }
        }
        let access = if req.operation.is_write() {
            Access::Write
        } else {
            Access::Read
        };
        let locks = self
            .inner
            .locks
            .acquire(&LockPlan::for_datatype(&req.mode, req.datatype, access))
            .await;
        // Under the datatype lock so a controller delete cannot interleave.
        if req.operation.is_write() && req.datatype == DataType::Candidate {
            self.check_binding(req)?;
        }
        trace!(
            session = %req.session,
            operation = %req.operation,
            datatype = %req.datatype,
            node = %req.ckv,
            "request dispatched"
        );
        if !req.operation.is_write() {
            return self.execute_read(req).await;
        }

        let work = self.begin_work().await?;
        let outcome = match self.execute_write(req, work).await {
            Ok(()) => {
                if req.datatype == DataType::Candidate {
                    self.inner.dirty.mark(&req.ckv);
                }
                self.commit_write(req.session, work).await.map(|()| ConfigResponse::Done)
            }
            Err(e) => {
                self.rollback_persistence(work).await;
                Err(e)
            }
        };
        drop(locks);
        outcome
    }

    async fn execute_write(&self, req: &ConfigRequest, work: WorkId) -> CoreResult<()> {
        let dt = req.datatype;
        let ckv = &req.ckv;
        let manager = self.manager_for(req.operation, ckv.key_type)?;
        match req.operation {
            Operation::Create => manager.create(work, dt, ckv).await,
            Operation::Update => manager.update(work, dt, ckv).await,
            Operation::Delete => manager.delete(work, dt, ckv).await,
            Operation::Rename => {
                let name = req
                    .rename_to
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| CoreError::bad_request("rename needs a new name"))?;
                manager.rename(work, dt, ckv, name).await
            }
            op => Err(CoreError::bad_request(format!("{op} is not a write"))),
        }
    }

    async fn execute_read(&self, req: &ConfigRequest) -> CoreResult<ConfigResponse> {
        let dt = req.datatype;
        let ckv = &req.ckv;
        let max = self.budget(req.max_count);
        let manager = || self.manager_for(req.operation, ckv.key_type);

        match req.operation {
            Operation::Create | Operation::Update | Operation::Delete | Operation::Rename => Err(
                CoreError::bad_request(format!("{} is not a read", req.operation)),
            ),
            Operation::Read => manager()?.read(dt, ckv).await.map(ConfigResponse::Nodes),
            Operation::ReadSiblingBegin => manager()?
                .read_sibling_begin(dt, ckv, max)
                .await
                .map(ConfigResponse::Nodes),
            Operation::ReadSibling => manager()?.read_sibling(dt, ckv, max).await.map(ConfigResponse::Nodes),
            Operation::ReadSiblingCount => manager()?.read_sibling_count(dt, ckv).await.map(ConfigResponse::Count),
            Operation::ReadNext => manager()?.read_next(dt, ckv, max).await.map(ConfigResponse::Nodes),
            Operation::ReadBulk => {
                let reader = BulkReader::new(
                    self.tree_for(dt),
                    &self.inner.managers,
                    &req.mode,
                    dt,
                    self.inner.config.bulk_max_count,
                );
                reader.read(ckv, max).await.map(ConfigResponse::Nodes)
            }
            Operation::Control(op) => {
                manager()?.control(dt, ckv, op).await?;
                if let Some(ctrlr) = ckv.ctrlr() {
                    let code = self.inner.southbound.ping(ctrlr).await;
                    if !code.is_success() {
                        return Err(results::to_error(ctrlr, code));
                    }
                    debug!(ctrlr, node = %ckv, "ping answered");
                }
                Ok(ConfigResponse::Done)
            }
        }
    }

    /// Budget for sibling and bulk reads. Unset means as many as allowed.
    fn budget(&self, max_count: Option<usize>) -> usize {
        let limit = self.inner.config.bulk_max_count;
        max_count.map_or(limit, |n| n.min(limit))
    }

    fn tree_for(&self, dt: DataType) -> &KeyTypeTree {
        if dt == DataType::Import {
            &self.inner.import_tree
        } else {
            &self.inner.live_tree
        }
    }

    fn manager_for(&self, operation: Operation, kt: KeyType) -> CoreResult<&Arc<dyn KeyTypeManager>> {
        self.inner
            .managers
            .get(kt)
            .ok_or_else(|| unknown_key_type(operation, kt))
    }

    /// The key type must exist in the datatype's universe and the mode
    /// must see it. In VTN mode the key must name the session's VTN.
    fn check_scope(&self, req: &ConfigRequest) -> CoreResult<()> {
        let kt = req.ckv.key_type;
        let tree = self.tree_for(req.datatype);
        if kt == tree.root() {
            return if req.operation == Operation::ReadBulk {
                Ok(())
            } else {
                Err(unknown_key_type(req.operation, kt))
            };
        }
        if !tree.is_valid(kt) || !req.mode.is_visible(kt) {
            return Err(unknown_key_type(req.operation, kt));
        }
        if !req.mode.owns_vtn(req.ckv.vtn_name()) {
            return Err(CoreError::bad_request(format!(
                "{} is outside the {} scope",
                req.ckv, req.mode
            )));
        }
        Ok(())
    }

    /// Objects bound to a controller must name a known one.
    fn check_binding(&self, req: &ConfigRequest) -> CoreResult<()> {
        match req.ckv.ctrlr() {
            Some(ctrlr) if !self.inner.registry.contains(ctrlr, DataType::Candidate) => Err(CoreError::CfgSemantic {
                message: format!("{} is bound to unknown controller {ctrlr}", req.ckv),
            }),
            _ => Ok(()),
        }
    }

    // ── Global queries ───────────────────────────────────────────────

    /// Whether CANDIDATE differs from RUNNING within `mode`.
    ///
    /// The shallow check reads the cached per-scope flag without locking;
    /// the full check asks every manager under the scope's read locks.
    pub async fn is_candidate_dirty(&self, mode: &ConfigMode, full: bool) -> CoreResult<bool> {
        self.ensure_readable()?;
        if !full {
            return Ok(self.inner.dirty.is_dirty(mode));
        }

        let _locks = self
            .inner
            .locks
            .acquire(&LockPlan::new().candidate(mode, Access::Read).running(Access::Read))
            .await;
        for manager in self.tx_managers(mode) {
            if manager.is_candidate_dirty(mode).await? {
                return Ok(true);
            }
        }
        self.inner.dirty.set(mode, false);
        Ok(false)
    }

    /// Whether any CANDIDATE or RUNNING instance of `kt` exists. Key types
    /// without a manager are never in use.
    pub async fn is_key_type_in_use(&self, kt: KeyType) -> CoreResult<bool> {
        self.ensure_readable()?;
        let Some(manager) = self.inner.managers.get(kt) else {
            return Ok(false);
        };
        let _locks = self
            .inner
            .locks
            .acquire(
                &LockPlan::new()
                    .candidate(&ConfigMode::Global, Access::Read)
                    .running(Access::Read),
            )
            .await;
        manager.is_in_use().await
    }
}
