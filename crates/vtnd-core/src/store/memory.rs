// ── In-memory backend ──

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::table::ConfigTable;
use crate::error::{CoreError, CoreResult};
use crate::manager::{Persistence, WorkId};
use crate::model::{ControllerRecord, DataType};

/// Process-local stand-in for the relational backend.
///
/// Holds one [`ConfigTable`] per stored datatype. STATE has no table of
/// its own; it is served from RUNNING.
pub struct MemoryStore {
    candidate: ConfigTable,
    running: ConfigTable,
    startup: ConfigTable,
    import: ConfigTable,
    audit: ConfigTable,
    controllers: Mutex<BTreeMap<(String, DataType), ControllerRecord>>,
    next_work: AtomicU64,
    commits: AtomicU64,
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            candidate: ConfigTable::new(),
            running: ConfigTable::new(),
            startup: ConfigTable::new(),
            import: ConfigTable::new(),
            audit: ConfigTable::new(),
            controllers: Mutex::new(BTreeMap::new()),
            next_work: AtomicU64::new(1),
            commits: AtomicU64::new(0),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    pub(crate) fn table(&self, dt: DataType) -> &ConfigTable {
        match dt {
            DataType::Candidate => &self.candidate,
            DataType::Running | DataType::State => &self.running,
            DataType::Startup => &self.startup,
            DataType::Import => &self.import,
            DataType::Audit => &self.audit,
        }
    }

    pub fn row_count(&self, dt: DataType) -> usize {
        self.table(dt).len()
    }

    /// Mutation counter of one image; changes whenever a row does.
    pub fn version(&self, dt: DataType) -> u64 {
        self.table(dt).version()
    }

    /// Units of work committed so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Make the next `commit` fail, for exercising rollback paths.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::Relaxed);
    }

    fn tables(&self) -> [&ConfigTable; 5] {
        [&self.candidate, &self.running, &self.startup, &self.import, &self.audit]
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("candidate", &self.candidate.len())
            .field("running", &self.running.len())
            .field("import", &self.import.len())
            .field("commits", &self.commit_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn begin(&self) -> CoreResult<WorkId> {
        Ok(WorkId(self.next_work.fetch_add(1, Ordering::Relaxed)))
    }

    async fn commit(&self, work: WorkId) -> CoreResult<()> {
        if self.fail_next_commit.swap(false, Ordering::Relaxed) {
            warn!(%work, "injected persistence commit failure");
            return Err(CoreError::Persistence {
                message: "commit rejected".into(),
            });
        }
        let rows: usize = self.tables().into_iter().map(|t| t.commit(work)).sum();
        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(%work, rows, "persistence commit");
        Ok(())
    }

    async fn rollback(&self, work: WorkId) -> CoreResult<()> {
        let rows: usize = self.tables().into_iter().map(|t| t.rollback(work)).sum();
        debug!(%work, rows, "persistence rollback");
        Ok(())
    }

    async fn load_controllers(&self) -> CoreResult<Vec<(ControllerRecord, DataType)>> {
        Ok(self
            .controllers
            .lock()
            .iter()
            .map(|((_, dt), record)| (record.clone(), *dt))
            .collect())
    }

    async fn store_controller(&self, record: &ControllerRecord, datatype: DataType) -> CoreResult<()> {
        self.controllers
            .lock()
            .insert((record.name.clone(), datatype), record.clone());
        Ok(())
    }

    async fn remove_controller(&self, name: &str, datatype: DataType) -> CoreResult<()> {
        self.controllers.lock().remove(&(name.to_owned(), datatype));
        Ok(())
    }
}
