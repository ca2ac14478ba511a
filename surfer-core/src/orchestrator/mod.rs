//! Drives Runs through their Tasks and Steps.
//!
//! Each Run gets its own tokio task. Stop is cooperative: the flag is seen
//! at the next suspension point (attach settle, between Steps, pacing,
//! sign-in wait) and an in-flight driver call is allowed to finish; its
//! late updates are discarded by the store.

mod pacer;

pub use pacer::{Pacer, StopProbe, StopSignal};

use crate::artifact::{Artifact, ArtifactWriter};
use crate::bridge::{Command, Event, EventEmitter};
use crate::catalog::PlatformCatalog;
use crate::config::OrchestratorConfig;
use crate::driver::{
    DriverError, DriverRegistry, ExtractionDriver, StepContext, StepReport, StepTarget,
};
use crate::error::{EntityKind, SurferError, SurferResult};
use crate::models::{Run, RunStatus, Step, Task, WorkStatus};
use crate::session::SessionMultiplexer;
use crate::store::{RunPatch, RunStore, Transition, TransitionOutcome, WorkPatch};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveRun {
    platform_id: String,
    stop: StopSignal,
    resume: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<RunStore>,
    sessions: Arc<SessionMultiplexer>,
    drivers: DriverRegistry,
    catalog: PlatformCatalog,
    artifacts: ArtifactWriter,
    events: EventEmitter,
    config: OrchestratorConfig,
    active: Mutex<HashMap<String, ActiveRun>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<RunStore>,
        sessions: Arc<SessionMultiplexer>,
        drivers: DriverRegistry,
        catalog: PlatformCatalog,
        events: EventEmitter,
        config: OrchestratorConfig,
    ) -> Self {
        let artifacts = ArtifactWriter::new(config.export_dir.clone());
        Self {
            inner: Arc::new(Inner {
                store,
                sessions,
                drivers,
                catalog,
                artifacts,
                events,
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.inner.store
    }

    pub fn sessions(&self) -> &Arc<SessionMultiplexer> {
        &self.inner.sessions
    }

    pub fn catalog(&self) -> &PlatformCatalog {
        &self.inner.catalog
    }

    pub fn artifacts(&self) -> &ArtifactWriter {
        &self.inner.artifacts
    }

    /// Ids of Runs that currently own a driving loop.
    pub fn active_run_ids(&self) -> Vec<String> {
        self.inner.active.lock().keys().cloned().collect()
    }

    /// Creates a pending Run for the sub-run and spawns its driving loop.
    pub async fn start(&self, platform_id: &str, sub_run_id: &str) -> SurferResult<Run> {
        let (platform, sub_run) = self.inner.catalog.sub_run(platform_id, sub_run_id)?;
        let driver = self.inner.drivers.resolve(platform_id, sub_run_id)?;
        let run = Run::new(
            platform_id,
            sub_run_id,
            platform.start_url(sub_run),
            sub_run.instantiate(),
            Utc::now(),
        );

        let stop = StopSignal::new();
        let probe = stop.probe();
        let resume = Arc::new(Notify::new());
        {
            let mut active = self.inner.active.lock();
            if active.values().any(|a| a.platform_id == platform_id) {
                return Err(SurferError::RunAlreadyActive(platform_id.to_string()));
            }
            active.insert(
                run.id.clone(),
                ActiveRun {
                    platform_id: platform_id.to_string(),
                    stop,
                    resume: resume.clone(),
                    handle: None,
                },
            );
        }

        if let Err(e) = self.inner.store.create_run(run.clone()).await {
            self.inner.active.lock().remove(&run.id);
            return Err(e);
        }

        info!(
            run_id = %run.id,
            platform_id = %platform_id,
            sub_run_id = %sub_run_id,
            driver = driver.name(),
            "Run started"
        );
        self.inner.events.emit(Event::RunStarted { run: run.clone() });

        let handle = tokio::spawn(self.clone().drive(run.clone(), driver, probe, resume));
        if let Some(active) = self.inner.active.lock().get_mut(&run.id) {
            active.handle = Some(handle);
        }

        Ok(run)
    }

    /// Waits for a Run's driving loop to exit. Returns at once if none is running.
    pub async fn wait(&self, run_id: &str) {
        let handle = self
            .inner
            .active
            .lock()
            .get_mut(run_id)
            .and_then(|a| a.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(run_id = %run_id, error = %e, "Driving loop panicked");
            }
        }
    }

    /// Forces a pending or running Run to `stopped`. Task and Step history is
    /// left as it was. Returns false when the Run was already terminal.
    pub async fn stop(&self, run_id: &str) -> SurferResult<bool> {
        let run = self
            .inner
            .store
            .get(run_id)
            .ok_or_else(|| SurferError::not_found(EntityKind::Run, run_id))?;
        if run.is_terminal() {
            return Ok(false);
        }

        let result = self
            .inner
            .store
            .transition(
                run_id,
                Transition::Run(RunPatch::finished(RunStatus::Stopped, Utc::now())),
            )
            .await;

        // The driving loop must see the stop even if the write failed.
        if let Some(active) = self.inner.active.lock().get(run_id) {
            active.stop.stop();
        }
        self.release(run_id).await;

        match result {
            Ok(outcome) => {
                if outcome.is_applied() {
                    info!(run_id = %run_id, "Run stopped");
                    self.emit_completed(run_id);
                }
                Ok(outcome.is_applied())
            }
            Err(e) => {
                // Stopped in memory; the Run stays dirty for the next flush.
                if self
                    .inner
                    .store
                    .get(run_id)
                    .is_some_and(|r| r.status == RunStatus::Stopped)
                {
                    warn!(run_id = %run_id, error = %e, "Run stopped but not yet persisted");
                    self.emit_completed(run_id);
                }
                Err(e)
            }
        }
    }

    /// Stops the Run if needed, then removes it from the store.
    pub async fn delete(&self, run_id: &str) -> SurferResult<bool> {
        if let Some(run) = self.inner.store.get(run_id) {
            if run.status.is_active() {
                self.stop(run_id).await?;
            }
        }

        let removed = self.inner.store.remove(run_id).await?;
        self.inner.events.emit(Event::DbChanged);
        Ok(removed)
    }

    /// Resumes a Run that is waiting for the user to sign in.
    pub fn signal_reauthenticated(&self, run_id: &str) -> SurferResult<()> {
        let resume = self
            .inner
            .active
            .lock()
            .get(run_id)
            .map(|a| a.resume.clone())
            .ok_or_else(|| SurferError::not_found(EntityKind::Run, run_id))?;

        self.inner.sessions.set_connected(run_id, true);
        resume.notify_one();
        debug!(run_id = %run_id, "Sign-in signalled");
        Ok(())
    }

    /// Marks persisted running Runs without a live session as orphans and
    /// loads them for display. Call once at process start.
    pub async fn resume_orphans(&self) -> SurferResult<Vec<String>> {
        let live = self.inner.sessions.run_ids();
        let orphans = self.inner.store.reconcile_orphans(&live).await?;
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Reconciled interrupted runs");
        }
        self.inner.events.emit(Event::DbChanged);
        Ok(orphans)
    }

    /// Stops every active Run and flushes the store.
    pub async fn shutdown(&self) -> SurferResult<()> {
        for run_id in self.active_run_ids() {
            if let Err(e) = self.stop(&run_id).await {
                e.log();
            }
        }
        self.inner.store.flush().await?;
        Ok(())
    }

    /// Handles commands until every sender is gone. A failing command is
    /// reported as [`Event::CommandFailed`] and the loop keeps going.
    pub async fn serve(&self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Command loop started");
        while let Some(command) = commands.recv().await {
            let channel = command.channel();
            debug!(channel, "Command received");
            if let Err(e) = self.dispatch(command).await {
                e.log();
                self.inner.events.emit(Event::CommandFailed {
                    command: channel.to_string(),
                    message: e.to_string(),
                });
            }
        }
        info!("Command loop finished");
    }

    pub async fn dispatch(&self, command: Command) -> SurferResult<()> {
        match command {
            Command::StartExport {
                platform_id,
                sub_run_id,
            } => self.start(&platform_id, &sub_run_id).await.map(|_| ()),
            Command::StopRun { run_id } => self.stop(&run_id).await.map(|_| ()),
            Command::DeleteRun { run_id } => self.delete(&run_id).await.map(|_| ()),
            Command::SignedIn { run_id } => self.signal_reauthenticated(&run_id),
            Command::OpenArtifactFolder { path } => self.inner.artifacts.open_folder(&path),
            Command::GetArtifactFiles { path } => {
                let files = self.inner.artifacts.list_files(&path).await?;
                self.inner.events.emit(Event::ArtifactFiles { path, files });
                Ok(())
            }
        }
    }

    async fn drive(
        self,
        run: Run,
        driver: Arc<dyn ExtractionDriver>,
        stop: StopProbe,
        resume: Arc<Notify>,
    ) {
        let run_id = run.id.clone();
        match self.drive_run(&run, driver.as_ref(), &stop, &resume).await {
            Ok(Some(patch)) => self.finish(&run_id, patch).await,
            Ok(None) => debug!(run_id = %run_id, "Driving loop observed stop"),
            Err(e) if stop.is_stopped() => {
                debug!(run_id = %run_id, error = %e, "Ignoring error after stop");
            }
            Err(e) => {
                e.log();
                self.finish(&run_id, RunPatch::finished(RunStatus::Error, Utc::now()))
                    .await;
            }
        }
        self.release(&run_id).await;
    }

    /// Returns the terminal patch for the Run, or `None` once stop was observed.
    async fn drive_run(
        &self,
        run: &Run,
        driver: &dyn ExtractionDriver,
        stop: &StopProbe,
        resume: &Notify,
    ) -> SurferResult<Option<RunPatch>> {
        let session = self.inner.sessions.attach(run).await?;

        if stop.sleep(self.inner.config.attach_settle()).await.is_err() {
            return Ok(None);
        }
        let outcome = self
            .inner
            .store
            .transition(&run.id, Transition::Run(RunPatch::status(RunStatus::Running)))
            .await?;
        if !outcome.is_applied() {
            return Ok(None);
        }
        if let Some(current) = self.inner.store.get(&run.id) {
            debug!(run_id = %run.id, status = %current.status, "Run updated");
            self.inner.events.emit(Event::updated(&current));
        }

        let pacer = Arc::new(Pacer::new(self.inner.config.min_pacing(), stop.clone()));
        let mut artifacts: Vec<Artifact> = Vec::new();

        for task in &run.tasks {
            if stop.is_stopped() {
                return Ok(None);
            }
            self.update_task(&run.id, &task.id, WorkPatch::started(Utc::now()))
                .await?;

            for step in &task.steps {
                if stop.is_stopped() {
                    return Ok(None);
                }
                self.update_step(&run.id, &task.id, &step.id, WorkPatch::started(Utc::now()))
                    .await?;

                let ctx = StepContext {
                    session: session.clone(),
                    target: step_target(run, task, step),
                    pacer: pacer.clone(),
                    stop: stop.clone(),
                };

                match self.run_step(run, driver, &ctx, resume).await {
                    StepResult::Done(report) => {
                        self.update_step(
                            &run.id,
                            &task.id,
                            &step.id,
                            WorkPatch::finished(WorkStatus::Success, Utc::now(), report.logs),
                        )
                        .await?;
                        artifacts.extend(report.artifacts);
                    }
                    StepResult::Stopped => return Ok(None),
                    StepResult::Failed(message) => {
                        let now = Utc::now();
                        warn!(
                            run_id = %run.id,
                            task_id = %task.id,
                            step_id = %step.id,
                            error = %message,
                            "Step failed"
                        );
                        self.update_step(
                            &run.id,
                            &task.id,
                            &step.id,
                            WorkPatch::finished(WorkStatus::Error, now, Some(message.clone())),
                        )
                        .await?;
                        self.update_task(
                            &run.id,
                            &task.id,
                            WorkPatch::finished(
                                WorkStatus::Error,
                                now,
                                Some(format!("{} failed: {}", step.name, message)),
                            ),
                        )
                        .await?;
                        return Ok(Some(RunPatch::finished(RunStatus::Error, now)));
                    }
                }
            }

            self.update_task(
                &run.id,
                &task.id,
                WorkPatch::finished(WorkStatus::Success, Utc::now(), None),
            )
            .await?;
        }

        if stop.is_stopped() {
            return Ok(None);
        }

        let (path, size) = self
            .inner
            .artifacts
            .write(&run.platform_id, &run.id, &artifacts)
            .await?;
        Ok(Some(
            RunPatch::finished(RunStatus::Success, Utc::now()).with_export(path, size),
        ))
    }

    /// Invokes the driver, waiting out sign-in prompts and re-invoking the
    /// same step afterwards.
    async fn run_step(
        &self,
        run: &Run,
        driver: &dyn ExtractionDriver,
        ctx: &StepContext,
        resume: &Notify,
    ) -> StepResult {
        loop {
            match driver.run_step(ctx).await {
                Ok(report) => return StepResult::Done(report),
                Err(DriverError::AuthRequired) => {
                    if !self.await_sign_in(run, &ctx.stop, resume).await {
                        return StepResult::Stopped;
                    }
                }
                Err(DriverError::Cancelled) if ctx.stop.is_stopped() => return StepResult::Stopped,
                Err(e) => return StepResult::Failed(e.to_string()),
            }
        }
    }

    async fn await_sign_in(&self, run: &Run, stop: &StopProbe, resume: &Notify) -> bool {
        self.inner.sessions.set_connected(&run.id, false);
        self.inner.events.emit(Event::SessionAuthRequired {
            run_id: run.id.clone(),
            platform_id: run.platform_id.clone(),
        });
        info!(run_id = %run.id, platform_id = %run.platform_id, "Waiting for sign-in");

        tokio::select! {
            _ = resume.notified() => {
                self.inner.sessions.set_connected(&run.id, true);
                info!(run_id = %run.id, "Sign-in confirmed, resuming");
                true
            }
            _ = stop.stopped() => false,
        }
    }

    async fn update_task(
        &self,
        run_id: &str,
        task_id: &str,
        patch: WorkPatch,
    ) -> SurferResult<TransitionOutcome> {
        let outcome = self
            .inner
            .store
            .transition(run_id, Transition::task(task_id, patch))
            .await?;

        if outcome.is_applied() {
            if let Some(task) = self.inner.store.get(run_id).and_then(|r| r.task(task_id).cloned()) {
                debug!(run_id = %run_id, task_id = %task_id, status = %task.status, "Task updated");
                self.inner.events.emit(Event::TaskUpdated {
                    run_id: run_id.to_string(),
                    task_id: task.id,
                    status: task.status,
                    start_time: task.start_time,
                    end_time: task.end_time,
                    logs: task.logs,
                });
            }
        }
        Ok(outcome)
    }

    async fn update_step(
        &self,
        run_id: &str,
        task_id: &str,
        step_id: &str,
        patch: WorkPatch,
    ) -> SurferResult<TransitionOutcome> {
        let outcome = self
            .inner
            .store
            .transition(run_id, Transition::step(task_id, step_id, patch))
            .await?;

        if outcome.is_applied() {
            if let Some(step) = self
                .inner
                .store
                .get(run_id)
                .and_then(|r| r.step(task_id, step_id).cloned())
            {
                debug!(
                    run_id = %run_id,
                    task_id = %task_id,
                    step_id = %step_id,
                    status = %step.status,
                    "Step updated"
                );
                self.inner.events.emit(Event::StepUpdated {
                    run_id: run_id.to_string(),
                    task_id: task_id.to_string(),
                    step_id: step.id,
                    status: step.status,
                    start_time: step.start_time,
                    end_time: step.end_time,
                    logs: step.logs,
                });
            }
        }
        Ok(outcome)
    }

    async fn finish(&self, run_id: &str, patch: RunPatch) {
        match self
            .inner
            .store
            .transition(run_id, Transition::Run(patch))
            .await
        {
            Ok(TransitionOutcome::Applied) => self.emit_completed(run_id),
            Ok(TransitionOutcome::Discarded) => {
                debug!(run_id = %run_id, "Run already terminal");
            }
            Err(e) => {
                e.log();
                if self.inner.store.get(run_id).is_some_and(|r| r.is_terminal()) {
                    self.emit_completed(run_id);
                }
            }
        }
    }

    fn emit_completed(&self, run_id: &str) {
        if let Some(run) = self.inner.store.get(run_id) {
            info!(
                run_id = %run_id,
                status = %run.status,
                export_size = run.export_size,
                "Run completed"
            );
            self.inner.events.emit(Event::completed(&run));
        }
    }

    async fn release(&self, run_id: &str) {
        self.inner.active.lock().remove(run_id);
        self.inner.sessions.close(run_id).await;
    }
}

enum StepResult {
    Done(StepReport),
    Stopped,
    Failed(String),
}

fn step_target(run: &Run, task: &Task, step: &Step) -> StepTarget {
    StepTarget {
        run_id: run.id.clone(),
        platform_id: run.platform_id.clone(),
        sub_run_id: run.sub_run_id.clone(),
        task_id: task.id.clone(),
        step_id: step.id.clone(),
        step_name: step.name.clone(),
        url: run.url.clone(),
    }
}
