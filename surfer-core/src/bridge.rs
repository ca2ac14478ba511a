//! Command and event channels between the display context and the
//! execution context.
//!
//! Commands travel over an unbounded mpsc channel. Events are broadcast:
//! each subscriber sees them in order, and a subscriber that lags behind the
//! channel capacity loses events and should reload from the store on the
//! next [`Event::DbChanged`].

use crate::error::{SurferError, SurferResult};
use crate::models::{Run, RunStatus, WorkStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum Command {
    #[serde(rename = "export-website")]
    StartExport {
        platform_id: String,
        sub_run_id: String,
    },
    #[serde(rename = "stop-run")]
    StopRun { run_id: String },
    #[serde(rename = "delete-run")]
    DeleteRun { run_id: String },
    #[serde(rename = "signed-in")]
    SignedIn { run_id: String },
    #[serde(rename = "open-folder")]
    OpenArtifactFolder { path: PathBuf },
    #[serde(rename = "get-artifact-files")]
    GetArtifactFiles { path: PathBuf },
}

impl Command {
    pub fn channel(&self) -> &'static str {
        match self {
            Command::StartExport { .. } => "export-website",
            Command::StopRun { .. } => "stop-run",
            Command::DeleteRun { .. } => "delete-run",
            Command::SignedIn { .. } => "signed-in",
            Command::OpenArtifactFolder { .. } => "open-folder",
            Command::GetArtifactFiles { .. } => "get-artifact-files",
        }
    }

    pub fn from_json(line: &str) -> SurferResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum Event {
    #[serde(rename = "run-started")]
    RunStarted { run: Run },
    /// Non-terminal Run status change, e.g. `pending -> running`.
    #[serde(rename = "run-updated")]
    RunUpdated {
        run_id: String,
        status: RunStatus,
        end_date: Option<DateTime<Utc>>,
    },
    #[serde(rename = "step-updated")]
    StepUpdated {
        run_id: String,
        task_id: String,
        step_id: String,
        status: WorkStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        logs: Option<String>,
    },
    #[serde(rename = "task-updated")]
    TaskUpdated {
        run_id: String,
        task_id: String,
        status: WorkStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        logs: Option<String>,
    },
    #[serde(rename = "export-complete")]
    RunCompleted {
        run_id: String,
        platform_id: String,
        status: RunStatus,
        end_date: Option<DateTime<Utc>>,
        export_path: Option<PathBuf>,
        export_size: Option<u64>,
    },
    #[serde(rename = "connect-website")]
    SessionAuthRequired { run_id: String, platform_id: String },
    #[serde(rename = "db-changed")]
    DbChanged,
    #[serde(rename = "artifact-files")]
    ArtifactFiles { path: PathBuf, files: Vec<String> },
    #[serde(rename = "command-failed")]
    CommandFailed { command: String, message: String },
}

impl Event {
    pub fn channel(&self) -> &'static str {
        match self {
            Event::RunStarted { .. } => "run-started",
            Event::RunUpdated { .. } => "run-updated",
            Event::StepUpdated { .. } => "step-updated",
            Event::TaskUpdated { .. } => "task-updated",
            Event::RunCompleted { .. } => "export-complete",
            Event::SessionAuthRequired { .. } => "connect-website",
            Event::DbChanged => "db-changed",
            Event::ArtifactFiles { .. } => "artifact-files",
            Event::CommandFailed { .. } => "command-failed",
        }
    }

    /// The Run this event is about, if any.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            Event::RunStarted { run } => Some(&run.id),
            Event::RunUpdated { run_id, .. }
            | Event::StepUpdated { run_id, .. }
            | Event::TaskUpdated { run_id, .. }
            | Event::RunCompleted { run_id, .. }
            | Event::SessionAuthRequired { run_id, .. } => Some(run_id),
            _ => None,
        }
    }

    pub fn updated(run: &Run) -> Self {
        Event::RunUpdated {
            run_id: run.id.clone(),
            status: run.status,
            end_date: run.end_date,
        }
    }

    /// The terminal event for a Run, built from its final record.
    pub fn completed(run: &Run) -> Self {
        Event::RunCompleted {
            run_id: run.id.clone(),
            platform_id: run.platform_id.clone(),
            status: run.status,
            end_date: run.end_date,
            export_path: run.export_path.clone(),
            export_size: run.export_size,
        }
    }

    pub fn to_json(&self) -> SurferResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Execution-side publisher of [`Event`]s.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes to every current subscriber. Never fails: with no
    /// subscriber the event is dropped and logged.
    pub fn emit(&self, event: Event) {
        let channel = event.channel();
        match self.tx.send(event) {
            Ok(receivers) => trace!(channel, receivers, "Event emitted"),
            Err(_) => warn!(channel, "No display subscribed, event dropped"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

/// Display-side sender of [`Command`]s.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    pub fn send(&self, command: Command) -> SurferResult<()> {
        let channel = command.channel();
        self.tx
            .send(command)
            .map_err(|_| SurferError::BridgeClosed(format!("command '{}' not delivered", channel)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ExecutionEndpoint {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub events: EventEmitter,
}

#[derive(Clone)]
pub struct DisplayEndpoint {
    commands: CommandSender,
    events: EventEmitter,
}

impl DisplayEndpoint {
    pub fn send(&self, command: Command) -> SurferResult<()> {
        self.commands.send(command)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn command_sender(&self) -> CommandSender {
        self.commands.clone()
    }
}

pub struct SyncBridge;

impl SyncBridge {
    pub fn new(capacity: usize) -> (ExecutionEndpoint, DisplayEndpoint) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let events = EventEmitter::new(capacity.max(1));

        let execution = ExecutionEndpoint {
            commands: command_rx,
            events: events.clone(),
        };
        let display = DisplayEndpoint {
            commands: CommandSender { tx: command_tx },
            events,
        };
        (execution, display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[test]
    fn test_command_wire_format() {
        let command = Command::StartExport {
            platform_id: "github-001".to_string(),
            sub_run_id: "github-001-repos".to_string(),
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["channel"], "export-website");
        assert_eq!(json["platform_id"], "github-001");

        let parsed =
            Command::from_json(r#"{"channel":"signed-in","run_id":"gmail-001-1"}"#).unwrap();
        assert_eq!(
            parsed,
            Command::SignedIn {
                run_id: "gmail-001-1".to_string()
            }
        );
        assert_eq!(parsed.channel(), "signed-in");
    }

    #[test]
    fn test_event_channel_names_match_wire_tags() {
        let events = vec![
            Event::DbChanged,
            Event::RunUpdated {
                run_id: "r".into(),
                status: RunStatus::Running,
                end_date: None,
            },
            Event::SessionAuthRequired {
                run_id: "r".into(),
                platform_id: "p".into(),
            },
            Event::CommandFailed {
                command: "stop-run".into(),
                message: "m".into(),
            },
            Event::ArtifactFiles {
                path: PathBuf::from("/tmp"),
                files: vec![],
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["channel"], event.channel());
        }
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let err = Command::from_json(r#"{"channel":"format-disk"}"#).unwrap_err();
        assert!(matches!(err, SurferError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_commands_and_events_flow() {
        let (mut execution, display) = SyncBridge::new(8);
        let mut events = display.subscribe();

        display
            .send(Command::StopRun {
                run_id: "github-001-1".into(),
            })
            .unwrap();
        let received = execution.commands.recv().await.unwrap();
        assert_eq!(received.channel(), "stop-run");

        execution.events.emit(Event::DbChanged);
        assert_eq!(events.recv().await.unwrap(), Event::DbChanged);
    }

    #[tokio::test]
    async fn test_send_after_execution_dropped_fails() {
        let (execution, display) = SyncBridge::new(8);
        drop(execution);

        let err = display
            .send(Command::DeleteRun { run_id: "r".into() })
            .unwrap_err();
        assert_eq!(err.error_code(), "E9002");
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_harmless() {
        let emitter = EventEmitter::new(4);
        emitter.emit(Event::DbChanged);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_loses_events() {
        let (execution, display) = SyncBridge::new(2);
        let mut events = display.subscribe();

        for _ in 0..4 {
            execution.events.emit(Event::DbChanged);
        }

        assert!(matches!(events.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(events.recv().await.unwrap(), Event::DbChanged);
    }
}
