// ── Batch mode ──
//
// A session can open a batch window in which its candidate edits are not
// committed to persistence one by one. Each edit keeps its own unit of
// work, so another session's rollback never touches them. The window
// closes on `batch_end` or after `idle_timeout` without `batch_alive`; a
// full window is flushed every `commit_limit` edits.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::manager::WorkId;
use crate::model::SessionId;

struct BatchWindow {
    session: SessionId,
    /// Units of work not yet committed to persistence, oldest first.
    pending: Vec<WorkId>,
    timer: CancellationToken,
}

pub(super) struct BatchState {
    window: Mutex<Option<BatchWindow>>,
}

impl BatchState {
    pub(super) fn new() -> Self {
        Self {
            window: Mutex::new(None),
        }
    }
}

fn no_batch(session: SessionId) -> CoreError {
    CoreError::no_such_instance(format!("batch window of session {session}"))
}

impl Coordinator {
    /// Open a batch window for `session`. Only one window exists at a time.
    pub fn batch_start(&self, session: SessionId) -> CoreResult<()> {
        self.ensure_active()?;
        let mut window = self.inner.batch.window.lock();
        if let Some(open) = window.as_ref() {
            return Err(if open.session == session {
                CoreError::bad_request(format!("session {session} already has a batch window"))
            } else {
                CoreError::instance_exists(format!("batch window of session {}", open.session))
            });
        }
        *window = Some(BatchWindow {
            session,
            pending: Vec::new(),
            timer: self.arm_batch_timer(session),
        });
        info!(%session, "batch window opened");
        Ok(())
    }

    /// Restart the idle timer of `session`'s window.
    pub fn batch_alive(&self, session: SessionId) -> CoreResult<()> {
        self.ensure_active()?;
        let mut window = self.inner.batch.window.lock();
        let open = window
            .as_mut()
            .filter(|w| w.session == session)
            .ok_or_else(|| no_batch(session))?;
        open.timer.cancel();
        open.timer = self.arm_batch_timer(session);
        debug!(%session, "batch window extended");
        Ok(())
    }

    /// Close the batch window and flush its edits.
    ///
    /// The idle timer calls this with `timed_out = true`, which skips the
    /// session check: the window is closed whoever owns it.
    pub async fn batch_end(&self, session: SessionId, timed_out: bool) -> CoreResult<()> {
        let closed = {
            let mut window = self.inner.batch.window.lock();
            match window.as_ref() {
                Some(w) if timed_out || w.session == session => window.take(),
                _ => None,
            }
        };
        let Some(closed) = closed else {
            return if timed_out { Ok(()) } else { Err(no_batch(session)) };
        };
        closed.timer.cancel();

        let flushed = closed.pending.len();
        self.flush_units(closed.pending).await?;
        info!(session = %closed.session, timed_out, flushed, "batch window closed");
        Ok(())
    }

    /// Session owning the open batch window.
    pub fn batch_session(&self) -> Option<SessionId> {
        self.inner.batch.window.lock().as_ref().map(|w| w.session)
    }

    /// Commit a successful write to persistence unless it falls inside the
    /// session's batch window.
    pub(super) async fn commit_write(&self, session: SessionId, work: WorkId) -> CoreResult<()> {
        let due = {
            let mut window = self.inner.batch.window.lock();
            match window.as_mut() {
                Some(w) if w.session == session => {
                    w.pending.push(work);
                    if w.pending.len() >= self.inner.config.batch.commit_limit {
                        debug!(%session, ops = w.pending.len(), "batch commit limit reached");
                        std::mem::take(&mut w.pending)
                    } else {
                        return Ok(());
                    }
                }
                _ => vec![work],
            }
        };
        self.flush_units(due).await
    }

    /// Commit `units` in order. On the first failure the rest are rolled
    /// back and the error returned.
    async fn flush_units(&self, units: Vec<WorkId>) -> CoreResult<()> {
        let mut units = units.into_iter();
        while let Some(work) = units.next() {
            if let Err(e) = self.persist(work).await {
                for rest in units {
                    self.rollback_persistence(rest).await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close the window and undo its uncommitted edits. Used on role
    /// changes.
    pub(super) async fn abandon_batch(&self) {
        let taken = self.inner.batch.window.lock().take();
        let Some(window) = taken else {
            return;
        };
        window.timer.cancel();
        warn!(session = %window.session, pending = window.pending.len(), "batch window abandoned");
        for work in window.pending.into_iter().rev() {
            self.rollback_persistence(work).await;
        }
    }

    fn arm_batch_timer(&self, session: SessionId) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let idle = self.inner.config.batch.idle_timeout;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(idle) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    debug!(%session, "batch window idle");
                    if let Err(e) = (Coordinator { inner }).batch_end(session, true).await {
                        warn!(%session, error = %e, "idle batch window did not flush");
                    }
                }
            }
        });
        cancel
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::alarm::RecordingAlarmSink;
    use crate::config::{BatchConfig, EngineConfig};
    use crate::coordinator::InMemoryEngine;
    use crate::error::ErrorKind;
    use crate::model::{ConfigKey, ConfigKeyVal, ConfigMode, ConfigRequest, DataType, KeyType, Operation};

    async fn engine(commit_limit: usize) -> InMemoryEngine {
        let config = EngineConfig {
            batch: BatchConfig {
                commit_limit,
                idle_timeout: Duration::from_secs(10),
            },
            ..EngineConfig::default()
        };
        let engine = Coordinator::in_memory(config, Arc::new(RecordingAlarmSink::new())).unwrap();
        engine.coordinator.become_active(false).await.unwrap();
        engine
    }

    async fn create_flowlist(engine: &InMemoryEngine, session: u32, name: &str) {
        let ckv = ConfigKeyVal::new(KeyType::Flowlist, ConfigKey::from_parts([name]));
        let req = ConfigRequest::new(SessionId(session), ConfigMode::Global, Operation::Create, DataType::Candidate, ckv);
        engine.coordinator.handle_request(&req).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn batch_defers_commits_until_end() {
        let engine = engine(100).await;
        let before = engine.store.commit_count();

        engine.coordinator.batch_start(SessionId(1)).unwrap();
        for name in ["fl1", "fl2", "fl3"] {
            create_flowlist(&engine, 1, name).await;
        }
        assert_eq!(engine.store.commit_count(), before);

        // Other sessions still commit per edit.
        create_flowlist(&engine, 2, "fl4").await;
        assert_eq!(engine.store.commit_count(), before + 1);

        engine.coordinator.batch_end(SessionId(1), false).await.unwrap();
        assert_eq!(engine.store.commit_count(), before + 4);
        assert_eq!(engine.coordinator.batch_session(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn another_sessions_failure_keeps_batched_edits() {
        let engine = engine(100).await;
        engine.coordinator.batch_start(SessionId(1)).unwrap();
        create_flowlist(&engine, 1, "fl1").await;

        let orphan = ConfigKeyVal::new(KeyType::Vbridge, ConfigKey::from_parts(["vtn1", "vbr1"]));
        let req = ConfigRequest::new(SessionId(2), ConfigMode::Global, Operation::Create, DataType::Candidate, orphan);
        assert_eq!(
            engine.coordinator.handle_request(&req).await.unwrap_err().kind(),
            ErrorKind::ParentDoesNotExist
        );
        assert_eq!(engine.store.row_count(DataType::Candidate), 1);

        engine.coordinator.batch_end(SessionId(1), false).await.unwrap();
        assert_eq!(engine.store.row_count(DataType::Candidate), 1);
        let read = ConfigRequest::new(
            SessionId(1),
            ConfigMode::Global,
            Operation::Read,
            DataType::Candidate,
            ConfigKeyVal::new(KeyType::Flowlist, ConfigKey::from_parts(["fl1"])),
        );
        assert_eq!(engine.coordinator.handle_request(&read).await.unwrap().into_nodes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn standby_undoes_a_pending_window() {
        let engine = engine(100).await;
        engine.coordinator.batch_start(SessionId(1)).unwrap();
        create_flowlist(&engine, 1, "fl1").await;
        create_flowlist(&engine, 2, "fl2").await;

        engine.coordinator.become_standby().await;
        assert_eq!(engine.coordinator.batch_session(), None);
        assert_eq!(engine.store.row_count(DataType::Candidate), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn commit_limit_flushes_inside_window() {
        let engine = engine(2).await;
        let before = engine.store.commit_count();
        engine.coordinator.batch_start(SessionId(1)).unwrap();
        for name in ["fl1", "fl2", "fl3"] {
            create_flowlist(&engine, 1, name).await;
        }
        assert_eq!(engine.store.commit_count(), before + 2);
        engine.coordinator.batch_end(SessionId(1), false).await.unwrap();
        assert_eq!(engine.store.commit_count(), before + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_times_out_and_alive_extends_it() {
        let engine = engine(100).await;
        let c = &engine.coordinator;
        c.batch_start(SessionId(1)).unwrap();
        create_flowlist(&engine, 1, "fl1").await;
        let before = engine.store.commit_count();

        tokio::time::sleep(Duration::from_secs(8)).await;
        c.batch_alive(SessionId(1)).unwrap();
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(c.batch_session(), Some(SessionId(1)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(c.batch_session(), None);
        assert_eq!(engine.store.commit_count(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_window_and_only_its_owner_ends_it() {
        let engine = engine(100).await;
        let c = &engine.coordinator;
        c.batch_start(SessionId(1)).unwrap();

        assert_eq!(c.batch_start(SessionId(1)).unwrap_err().kind(), ErrorKind::BadRequest);
        assert_eq!(c.batch_start(SessionId(2)).unwrap_err().kind(), ErrorKind::InstanceExists);
        assert_eq!(c.batch_alive(SessionId(2)).unwrap_err().kind(), ErrorKind::NoSuchInstance);
        assert_eq!(
            c.batch_end(SessionId(2), false).await.unwrap_err().kind(),
            ErrorKind::NoSuchInstance
        );
        c.batch_end(SessionId(1), false).await.unwrap();
    }
}
