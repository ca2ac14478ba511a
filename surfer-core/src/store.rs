//! Live Run cache with write-through to a [`RunRecordRepository`].
//!
//! The store is the only code that mutates Run, Task and Step records.
//! Creation and terminal transitions reach the repository before the call
//! returns; intermediate Task/Step ticks mark the Run dirty and are written
//! by [`RunStore::flush`].

use crate::error::{EntityKind, SurferError, SurferResult};
use crate::models::{Run, RunStatus, WorkStatus};
use crate::repo::RunRecordRepository;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub end_date: Option<DateTime<Utc>>,
    pub export_path: Option<PathBuf>,
    pub export_size: Option<u64>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn finished(status: RunStatus, end_date: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            end_date: Some(end_date),
            ..Self::default()
        }
    }

    pub fn with_export(mut self, path: PathBuf, size: u64) -> Self {
        self.export_path = Some(path);
        self.export_size = Some(size);
        self
    }
}

/// Partial update for a Task or Step. `None` fields keep their value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkPatch {
    pub status: Option<WorkStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub logs: Option<String>,
}

impl WorkPatch {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(WorkStatus::Running),
            start_time: Some(now),
            ..Self::default()
        }
    }

    pub fn finished(status: WorkStatus, now: DateTime<Utc>, logs: Option<String>) -> Self {
        Self {
            status: Some(status),
            end_time: Some(now),
            logs,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Run(RunPatch),
    Task {
        task_id: String,
        patch: WorkPatch,
    },
    Step {
        task_id: String,
        step_id: String,
        patch: WorkPatch,
    },
}

impl Transition {
    pub fn task(task_id: impl Into<String>, patch: WorkPatch) -> Self {
        Transition::Task {
            task_id: task_id.into(),
            patch,
        }
    }

    pub fn step(task_id: impl Into<String>, step_id: impl Into<String>, patch: WorkPatch) -> Self {
        Transition::Step {
            task_id: task_id.into(),
            step_id: step_id.into(),
            patch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Late update to a terminal Run, or a status that would move backwards.
    Discarded,
}

impl TransitionOutcome {
    pub fn is_applied(self) -> bool {
        self == TransitionOutcome::Applied
    }
}

#[derive(Default)]
struct StoreState {
    runs: Vec<Run>,
    dirty: HashSet<String>,
}

impl StoreState {
    fn position(&self, run_id: &str) -> Option<usize> {
        self.runs.iter().position(|r| r.id == run_id)
    }
}

pub struct RunStore {
    repo: Arc<dyn RunRecordRepository>,
    state: Mutex<StoreState>,
    // Serializes repository writes so a slow flush never lands after a newer snapshot.
    persist_lock: tokio::sync::Mutex<()>,
}

impl RunStore {
    pub fn new(repo: Arc<dyn RunRecordRepository>) -> Self {
        Self {
            repo,
            state: Mutex::new(StoreState::default()),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn create_run(&self, run: Run) -> SurferResult<()> {
        if run.is_terminal() {
            return Err(SurferError::Internal(format!(
                "run {} cannot be created in terminal status {}",
                run.id, run.status
            )));
        }

        if self.repo.get_by_id(&run.id).await?.is_some() {
            return Err(SurferError::DuplicateRun(run.id));
        }

        let run_id = run.id.clone();
        let _guard = self.persist_lock.lock().await;
        {
            let mut state = self.state.lock();
            if state.position(&run_id).is_some() {
                return Err(SurferError::DuplicateRun(run_id));
            }
            state.runs.push(run.clone());
        }

        // A Run that never reached the repository must not stay live either.
        if let Err(e) = self.repo.put(&run).await {
            let mut state = self.state.lock();
            state.dirty.remove(&run_id);
            if let Some(index) = state.position(&run_id) {
                state.runs.remove(index);
            }
            warn!(run_id = %run_id, error = %e, "Run creation rolled back");
            return Err(e);
        }

        debug!(run_id = %run_id, "Run created");
        Ok(())
    }

    pub async fn transition(
        &self,
        run_id: &str,
        transition: Transition,
    ) -> SurferResult<TransitionOutcome> {
        let now = Utc::now();
        let (outcome, terminal) = {
            let mut state = self.state.lock();
            let index = state
                .position(run_id)
                .ok_or_else(|| SurferError::not_found(EntityKind::Run, run_id))?;

            let run = &mut state.runs[index];
            let outcome = apply_transition(run, transition, now)?;
            let terminal = run.is_terminal();

            if outcome.is_applied() {
                state.dirty.insert(run_id.to_string());
            }
            (outcome, terminal)
        };

        match outcome {
            TransitionOutcome::Applied if terminal => self.flush().await.map(|_| outcome),
            TransitionOutcome::Applied => Ok(outcome),
            TransitionOutcome::Discarded => {
                debug!(run_id = %run_id, "Transition discarded");
                Ok(outcome)
            }
        }
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        let state = self.state.lock();
        state.position(run_id).map(|i| state.runs[i].clone())
    }

    /// Live Runs in insertion order.
    pub fn list(&self) -> Vec<Run> {
        self.state.lock().runs.clone()
    }

    pub fn active_runs(&self) -> Vec<Run> {
        self.state
            .lock()
            .runs
            .iter()
            .filter(|r| r.status.is_active())
            .cloned()
            .collect()
    }

    /// Removes the live and persisted record. Removing an unknown id is a no-op.
    pub async fn remove(&self, run_id: &str) -> SurferResult<bool> {
        let live = {
            let mut state = self.state.lock();
            state.dirty.remove(run_id);
            match state.position(run_id) {
                Some(index) => {
                    state.runs.remove(index);
                    true
                }
                None => false,
            }
        };

        let _guard = self.persist_lock.lock().await;
        let persisted = self.repo.delete(run_id).await?;

        if live || persisted {
            info!(run_id = %run_id, "Run removed");
        }
        Ok(live || persisted)
    }

    /// Writes every dirty Run to the repository. Returns how many were written.
    pub async fn flush(&self) -> SurferResult<usize> {
        let _guard = self.persist_lock.lock().await;

        let snapshots: Vec<Run> = {
            let mut state = self.state.lock();
            let ids: Vec<String> = state.dirty.drain().collect();
            ids.iter()
                .filter_map(|id| state.position(id).map(|i| state.runs[i].clone()))
                .collect()
        };

        for (i, run) in snapshots.iter().enumerate() {
            if let Err(e) = self.repo.put(run).await {
                let mut state = self.state.lock();
                for pending in &snapshots[i..] {
                    state.dirty.insert(pending.id.clone());
                }
                return Err(e);
            }
        }

        if !snapshots.is_empty() {
            debug!(count = snapshots.len(), "Flushed runs");
        }
        Ok(snapshots.len())
    }

    /// Flushes on a fixed interval until the store is dropped.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(e) = store.flush().await {
                    e.log();
                }
            }
        })
    }

    /// Loads persisted Runs that are not live yet, oldest first.
    pub async fn hydrate(&self) -> SurferResult<usize> {
        let persisted = self.repo.get_all().await?;

        let mut state = self.state.lock();
        let mut added = 0;
        for run in persisted {
            if state.position(&run.id).is_none() {
                state.runs.push(run);
                added += 1;
            }
        }

        debug!(added, "Hydrated runs from repository");
        Ok(added)
    }

    /// Finds persisted `running` Runs without a live session and moves their
    /// first incomplete Task and Step to `running`. Returns the orphan ids.
    pub async fn reconcile_orphans(&self, live_run_ids: &[String]) -> SurferResult<Vec<String>> {
        let persisted = self.repo.get_all().await?;
        let now = Utc::now();

        let mut orphans = Vec::new();
        {
            let mut state = self.state.lock();
            for run in persisted {
                if run.status != RunStatus::Running || live_run_ids.contains(&run.id) {
                    continue;
                }

                let index = match state.position(&run.id) {
                    Some(index) => index,
                    None => {
                        state.runs.push(run);
                        state.runs.len() - 1
                    }
                };

                let run = &mut state.runs[index];
                force_resume_point(run, now);
                let run_id = run.id.clone();

                warn!(run_id = %run_id, "Run was interrupted and has no live session");
                state.dirty.insert(run_id.clone());
                orphans.push(run_id);
            }
        }

        self.flush().await?;
        Ok(orphans)
    }
}

fn apply_transition(
    run: &mut Run,
    transition: Transition,
    now: DateTime<Utc>,
) -> SurferResult<TransitionOutcome> {
    if run.is_terminal() {
        return Ok(TransitionOutcome::Discarded);
    }

    match transition {
        Transition::Run(patch) => {
            if let Some(status) = patch.status {
                if !run.status.can_advance_to(status) {
                    return Ok(TransitionOutcome::Discarded);
                }
                run.status = status;
                if status.is_terminal() && patch.end_date.is_none() {
                    run.end_date = Some(now);
                }
            }
            if let Some(end_date) = patch.end_date {
                run.end_date = Some(end_date);
            }
            if let Some(path) = patch.export_path {
                run.export_path = Some(path);
            }
            if let Some(size) = patch.export_size {
                run.export_size = Some(size);
            }
            Ok(TransitionOutcome::Applied)
        }
        Transition::Task { task_id, patch } => {
            let task = run
                .task_mut(&task_id)
                .ok_or_else(|| SurferError::not_found(EntityKind::Task, &task_id))?;
            Ok(apply_work_patch(
                WorkFields {
                    status: &mut task.status,
                    start_time: &mut task.start_time,
                    end_time: &mut task.end_time,
                    logs: &mut task.logs,
                },
                patch,
            ))
        }
        Transition::Step {
            task_id,
            step_id,
            patch,
        } => {
            let task = run
                .task_mut(&task_id)
                .ok_or_else(|| SurferError::not_found(EntityKind::Task, &task_id))?;
            let step = task
                .step_mut(&step_id)
                .ok_or_else(|| SurferError::not_found(EntityKind::Step, &step_id))?;
            Ok(apply_work_patch(
                WorkFields {
                    status: &mut step.status,
                    start_time: &mut step.start_time,
                    end_time: &mut step.end_time,
                    logs: &mut step.logs,
                },
                patch,
            ))
        }
    }
}

struct WorkFields<'a> {
    status: &'a mut WorkStatus,
    start_time: &'a mut Option<DateTime<Utc>>,
    end_time: &'a mut Option<DateTime<Utc>>,
    logs: &'a mut Option<String>,
}

fn apply_work_patch(fields: WorkFields<'_>, patch: WorkPatch) -> TransitionOutcome {
    if let Some(status) = patch.status {
        if !fields.status.can_advance_to(status) {
            return TransitionOutcome::Discarded;
        }
        *fields.status = status;
    }
    if let Some(start) = patch.start_time {
        *fields.start_time = Some(start);
    }
    if let Some(end) = patch.end_time {
        *fields.end_time = Some(end);
    }
    if let Some(logs) = patch.logs {
        *fields.logs = Some(logs);
    }
    TransitionOutcome::Applied
}

fn force_resume_point(run: &mut Run, now: DateTime<Utc>) {
    let Some(task) = run.tasks.iter_mut().find(|t| !t.status.is_terminal()) else {
        return;
    };
    task.status = WorkStatus::Running;
    task.start_time.get_or_insert(now);

    if let Some(step) = task.steps.iter_mut().find(|s| !s.status.is_terminal()) {
        step.status = WorkStatus::Running;
        step.start_time.get_or_insert(now);
    }
}
