// ── Controller records ──
//
// Registry edits are mirrored to persistence. A failed store undoes the
// in-memory edit so both views stay in step.

use tracing::{info, warn};

use super::Coordinator;
use super::locks::{Access, LockPlan};
use crate::error::{CoreError, CoreResult};
use crate::model::{AuditType, ConfigMode, ControllerRecord, DataType};

/// Mutable fields of a controller record. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerUpdate {
    pub version: Option<String>,
    pub audit_type: Option<AuditType>,
    pub enable_audit: Option<bool>,
}

impl Coordinator {
    pub async fn create_controller(&self, record: ControllerRecord, datatype: DataType) -> CoreResult<()> {
        self.ensure_active()?;
        let name = record.name.clone();
        self.inner.registry.add(record.clone(), datatype)?;
        if let Err(e) = self.inner.persistence.store_controller(&record, datatype).await {
            if let Err(undo) = self.inner.registry.delete(&name, datatype) {
                warn!(ctrlr = %name, error = %undo, "controller add not undone");
            }
            return Err(e);
        }
        info!(ctrlr = %name, %datatype, ctrlr_type = %record.ctrlr_type, "controller created");
        Ok(())
    }

    pub async fn update_controller(&self, name: &str, datatype: DataType, update: ControllerUpdate) -> CoreResult<()> {
        self.ensure_active()?;
        let registry = &self.inner.registry;
        let before = registry.get_record(name, datatype)?;

        if let Some(version) = &update.version {
            registry.update_version(name, datatype, version)?;
        }
        if let Some(audit_type) = update.audit_type {
            registry.update_audit_type(name, datatype, audit_type)?;
        }
        if let Some(enable) = update.enable_audit {
            registry.update_enable_audit(name, datatype, enable)?;
        }

        let after = registry.get_record(name, datatype)?;
        if let Err(e) = self.inner.persistence.store_controller(&after, datatype).await {
            self.restore_record(before, datatype);
            return Err(e);
        }
        info!(ctrlr = name, %datatype, ?update, "controller updated");
        Ok(())
    }

    /// Remove a controller. Refused while any CANDIDATE or RUNNING object
    /// is still bound to it. The reference check and the removal happen
    /// under one hold of the CANDIDATE and RUNNING locks; the global
    /// CANDIDATE lock is taken for writing so no scoped writer can bind
    /// a new object in between.
    pub async fn delete_controller(&self, name: &str, datatype: DataType) -> CoreResult<()> {
        self.ensure_active()?;
        let _locks = self
            .inner
            .locks
            .acquire(
                &LockPlan::new()
                    .candidate(&ConfigMode::Global, Access::Write)
                    .running(Access::Read),
            )
            .await;
        for manager in self.tx_managers(&ConfigMode::Global) {
            if manager.is_referenced(name).await? {
                return Err(CoreError::instance_exists(format!(
                    "{} objects bound to controller {name}",
                    manager.key_type()
                )));
            }
        }

        let removed = self.inner.registry.delete(name, datatype)?;
        if let Err(e) = self.inner.persistence.remove_controller(name, datatype).await {
            if let Err(undo) = self.inner.registry.add(removed, datatype) {
                warn!(ctrlr = name, error = %undo, "controller delete not undone");
            }
            return Err(e);
        }
        info!(ctrlr = name, %datatype, "controller deleted");
        Ok(())
    }

    pub fn controller(&self, name: &str, datatype: DataType) -> CoreResult<ControllerRecord> {
        self.inner.registry.get_record(name, datatype)
    }

    /// Put back a record whose persisted update failed.
    fn restore_record(&self, before: ControllerRecord, datatype: DataType) {
        let registry = &self.inner.registry;
        let name = before.name.clone();
        let restored = registry
            .update_version(&name, datatype, &before.version)
            .and_then(|()| registry.update_audit_type(&name, datatype, before.audit_type))
            .and_then(|()| registry.update_enable_audit(&name, datatype, before.enable_audit));
        if let Err(e) = restored {
            warn!(ctrlr = %name, error = %e, "controller update not undone");
        }
    }
}
