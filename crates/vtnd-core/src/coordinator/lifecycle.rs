// ── Node lifecycle ──
//
// A cluster node is standby until told otherwise. Only the active node
// accepts writes; reads are served in every role but shutdown.

use std::sync::Arc;

use strum::Display;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Coordinator;
use super::events::EventRelay;
use crate::error::{CoreError, CoreResult};
use crate::model::{Alarm, AlarmKind, ConfigKey, ConfigKeyVal, ConfigMode, DataType, KeyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum NodeRole {
    Standby,
    Active,
    ShuttingDown,
}

impl Coordinator {
    pub fn role(&self) -> NodeRole {
        *self.inner.role.borrow()
    }

    pub fn subscribe_role(&self) -> watch::Receiver<NodeRole> {
        self.inner.role.subscribe()
    }

    /// Reject anything but the active role.
    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.role() {
            NodeRole::Active => Ok(()),
            NodeRole::Standby => Err(CoreError::NotSupportedByStandby),
            NodeRole::ShuttingDown => Err(CoreError::ShuttingDown),
        }
    }

    /// Reads are tolerated on standby.
    pub(crate) fn ensure_readable(&self) -> CoreResult<()> {
        match self.role() {
            NodeRole::ShuttingDown => Err(CoreError::ShuttingDown),
            NodeRole::Active | NodeRole::Standby => Ok(()),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Take over the active role.
    ///
    /// Reloads the controller directory from persistence and starts the
    /// event worker. A fail-over rebuilds the candidate-dirty cache from the
    /// stored images; a cold start begins clean.
    pub async fn become_active(&self, failover: bool) -> CoreResult<()> {
        match self.role() {
            NodeRole::ShuttingDown => return Err(CoreError::ShuttingDown),
            NodeRole::Active => {
                debug!("already active");
                return Ok(());
            }
            NodeRole::Standby => {}
        }

        let records = self.inner.persistence.load_controllers().await?;
        self.inner.registry.clear_all();
        let mut loaded = 0usize;
        for (record, datatype) in records {
            let invalid = datatype == DataType::Running && record.invalid_config;
            let name = record.name.clone();
            match self.inner.registry.add(record, datatype) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(ctrlr = %name, %datatype, error = %e, "controller record not restored"),
            }
            if invalid {
                self.inner
                    .alarms
                    .raise(Alarm::new(AlarmKind::InvalidConfig, true).for_ctrlr(name));
            }
        }

        if failover {
            self.rebuild_dirty_cache().await?;
        } else {
            self.inner.dirty.reset();
        }

        self.inner
            .events
            .start(Arc::new(EventRelay::new(Arc::downgrade(&self.inner))));
        self.inner.role.send_replace(NodeRole::Active);
        info!(failover, controllers = loaded, "node is active");
        Ok(())
    }

    /// Give up the active role. Forgets controllers, faults and pending
    /// events, and abandons any open transaction, audit, import or batch.
    pub async fn become_standby(&self) {
        if self.role() == NodeRole::ShuttingDown {
            return;
        }
        self.inner.role.send_replace(NodeRole::Standby);

        let dropped = self.inner.events.clear();
        self.abandon_batch().await;
        self.abandon_sessions().await;
        self.inner.registry.clear_all();
        self.inner.dirty.reset();
        info!(dropped_events = dropped, "node is standby");
    }

    /// Stop accepting work and stop the event worker.
    pub async fn shutdown(&self) {
        self.inner.role.send_replace(NodeRole::ShuttingDown);
        self.abandon_batch().await;
        self.inner.events.shutdown().await;
        info!("coordinator shut down");
    }

    async fn abandon_sessions(&self) {
        if self.inner.tx.active.lock().await.take().is_some() {
            warn!("open transaction abandoned");
        }
        if let Some(ctrlr) = self.inner.audit.abandon().await {
            warn!(%ctrlr, "open audit abandoned");
        }
        if self.inner.import.active.lock().await.take().is_some() {
            warn!("open import abandoned");
        }
    }

    // ── Dirty cache ──────────────────────────────────────────────────

    /// Recompute every scope's dirty flag from the stored images.
    pub(crate) async fn rebuild_dirty_cache(&self) -> CoreResult<()> {
        self.inner.dirty.reset();

        let mut scopes = vec![ConfigMode::Virtual];
        scopes.extend(self.vtn_names().await?.into_iter().map(ConfigMode::Vtn));
        for mode in scopes {
            for manager in self.tx_managers(&mode) {
                if manager.is_candidate_dirty(&mode).await? {
                    self.inner.dirty.set(&mode, true);
                    break;
                }
            }
        }
        debug!(dirty = self.inner.dirty.is_dirty(&ConfigMode::Global), "dirty cache rebuilt");
        Ok(())
    }

    /// Names of VTNs present in CANDIDATE or RUNNING.
    async fn vtn_names(&self) -> CoreResult<Vec<String>> {
        let Some(vtns) = self.inner.managers.get(KeyType::Vtn) else {
            return Ok(Vec::new());
        };
        let query = ConfigKeyVal::new(KeyType::Vtn, ConfigKey::root());
        let mut names = Vec::new();
        for dt in [DataType::Candidate, DataType::Running] {
            for node in vtns.read_sibling_begin(dt, &query, usize::MAX).await? {
                if let Some(name) = node.key.leaf() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
