use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Error,
    Stopped,
}

impl RunStatus {
    pub fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Running => 1,
            RunStatus::Success | RunStatus::Error | RunStatus::Stopped => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` keeps the rank monotonic and never
    /// leaves a terminal status. `success` is only reachable from `running`.
    pub fn can_advance_to(self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        if next == RunStatus::Success {
            return self == RunStatus::Running;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Status shared by Tasks and Steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl WorkStatus {
    pub fn rank(self) -> u8 {
        match self {
            WorkStatus::Pending => 0,
            WorkStatus::Running => 1,
            WorkStatus::Success | WorkStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn can_advance_to(self, next: WorkStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkStatus::Pending => write!(f, "pending"),
            WorkStatus::Running => write!(f, "running"),
            WorkStatus::Success => write!(f, "success"),
            WorkStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkStatus::Pending,
            start_time: None,
            end_time: None,
            logs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: WorkStatus::Pending,
            start_time: None,
            end_time: None,
            logs: None,
            steps,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub platform_id: String,
    pub sub_run_id: String,
    pub status: RunStatus,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
    /// Total size of the exported artifacts in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_size: Option<u64>,
}

impl Run {
    pub fn new(
        platform_id: impl Into<String>,
        sub_run_id: impl Into<String>,
        url: impl Into<String>,
        tasks: Vec<Task>,
        now: DateTime<Utc>,
    ) -> Self {
        let platform_id = platform_id.into();
        Self {
            id: make_run_id(&platform_id, now),
            platform_id,
            sub_run_id: sub_run_id.into(),
            status: RunStatus::Pending,
            start_date: now,
            end_date: None,
            url: url.into(),
            tasks,
            export_path: None,
            export_size: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn step(&self, task_id: &str, step_id: &str) -> Option<&Step> {
        self.task(task_id).and_then(|t| t.step(step_id))
    }

    /// The outcome the Task list implies: `Error` if any Task failed,
    /// `Success` once every Task succeeded, `None` while work remains.
    pub fn implied_outcome(&self) -> Option<RunStatus> {
        if self.tasks.iter().any(|t| t.status == WorkStatus::Error) {
            Some(RunStatus::Error)
        } else if self.tasks.iter().all(|t| t.status == WorkStatus::Success) {
            Some(RunStatus::Success)
        } else {
            None
        }
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.end_date
            .map(|end| (end - self.start_date).num_seconds())
    }
}

/// Run ids are `{platform_id}-{unix millis}`.
pub fn make_run_id(platform_id: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", platform_id, now.timestamp_millis())
}
