//! Display-side state rebuilt from bridge events.

use crate::bridge::Event;
use crate::models::Run;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

pub const NOTICE_TTL: Duration = Duration::from_secs(3);

/// Read-through cache of Runs. Applying the same event twice is harmless.
#[derive(Debug, Clone, Default)]
pub struct RunView {
    runs: Vec<Run>,
}

impl RunView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cache wholesale, e.g. after [`Event::DbChanged`].
    pub fn replace_all(&mut self, runs: Vec<Run>) {
        self.runs = runs;
    }

    /// Merges an event into the cache. Returns false if it referred to a Run,
    /// Task or Step the view does not know about.
    ///
    /// Statuses only move forward and terminal Runs are frozen, so replayed
    /// or duplicated events never roll the view back.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::RunStarted { run } => {
                if self.get(&run.id).is_none() {
                    self.runs.push(run.clone());
                }
                true
            }
            Event::RunUpdated {
                run_id,
                status,
                end_date,
            } => {
                let Some(run) = self.run_mut(run_id) else {
                    return false;
                };
                if !run.is_terminal() && run.status.can_advance_to(*status) {
                    run.status = *status;
                    run.end_date = end_date.or(run.end_date);
                }
                true
            }
            Event::TaskUpdated {
                run_id,
                task_id,
                status,
                start_time,
                end_time,
                logs,
            } => {
                let Some(run) = self.run_mut(run_id) else {
                    return false;
                };
                let frozen = run.is_terminal();
                let Some(task) = run.task_mut(task_id) else {
                    return false;
                };
                if !frozen && task.status.can_advance_to(*status) {
                    task.status = *status;
                    task.start_time = start_time.or(task.start_time);
                    task.end_time = end_time.or(task.end_time);
                    if logs.is_some() {
                        task.logs = logs.clone();
                    }
                }
                true
            }
            Event::StepUpdated {
                run_id,
                task_id,
                step_id,
                status,
                start_time,
                end_time,
                logs,
            } => {
                let Some(run) = self.run_mut(run_id) else {
                    return false;
                };
                let frozen = run.is_terminal();
                let Some(step) = run.task_mut(task_id).and_then(|t| t.step_mut(step_id)) else {
                    return false;
                };
                if !frozen && step.status.can_advance_to(*status) {
                    step.status = *status;
                    step.start_time = start_time.or(step.start_time);
                    step.end_time = end_time.or(step.end_time);
                    if logs.is_some() {
                        step.logs = logs.clone();
                    }
                }
                true
            }
            Event::RunCompleted {
                run_id,
                status,
                end_date,
                export_path,
                export_size,
                ..
            } => {
                let Some(run) = self.run_mut(run_id) else {
                    return false;
                };
                if !run.is_terminal() {
                    run.status = *status;
                    run.end_date = *end_date;
                    run.export_path = export_path.clone();
                    run.export_size = *export_size;
                }
                true
            }
            _ => true,
        }
    }

    pub fn get(&self, run_id: &str) -> Option<&Run> {
        self.runs.iter().find(|r| r.id == run_id)
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    /// The most recently started Run for a platform.
    pub fn latest_for_platform(&self, platform_id: &str) -> Option<&Run> {
        self.runs
            .iter()
            .filter(|r| r.platform_id == platform_id)
            .max_by_key(|r| r.start_date)
    }

    fn run_mut(&mut self, run_id: &str) -> Option<&mut Run> {
        self.runs.iter_mut().find(|r| r.id == run_id)
    }
}

/// Auto-dismissing "account not connected" notice.
#[derive(Debug, Clone)]
pub struct Notice {
    pub run_id: String,
    pub message: String,
    shown_at: Instant,
    ttl: Duration,
}

impl Notice {
    pub fn new(run_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_ttl(run_id, message, NOTICE_TTL)
    }

    pub fn with_ttl(run_id: impl Into<String>, message: impl Into<String>, ttl: Duration) -> Self {
        Self {
            run_id: run_id.into(),
            message: message.into(),
            shown_at: Instant::now(),
            ttl,
        }
    }

    pub fn not_connected(run_id: impl Into<String>, platform_name: &str) -> Self {
        Self::new(
            run_id,
            format!(
                "Not connected to {}. Sign in, then confirm to resume.",
                platform_name
            ),
        )
    }

    pub fn is_visible(&self, now: Instant) -> bool {
        now.duration_since(self.shown_at) < self.ttl
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.ttl.saturating_sub(now.duration_since(self.shown_at))
    }
}

/// `HH:MM:SS` between `start` and `end`, or `now` while the Run is open.
/// Presentation only.
pub fn format_elapsed(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    let seconds = (end.unwrap_or(now) - start).num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
