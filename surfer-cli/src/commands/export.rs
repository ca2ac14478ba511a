use anyhow::bail;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use surfer_core::{
    Command, DisplayEndpoint, DriverRegistry, Event, HttpBackend, MemoryRunRepository, Notice,
    Orchestrator, PageSnapshotDriver, PlatformCatalog, Run, RunRecordRepository, RunStatus,
    RunStore, RunView, SessionMultiplexer, SurferConfig, SyncBridge, WorkStatus,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::runs::{colored_run_status, format_bytes, print_run};
use crate::config::{open_database, run_repository};

/// Runs one export to completion in this process, rendering progress from
/// bridge events. Ctrl-C stops the run; Enter confirms a sign-in.
/// An ephemeral export keeps the run in memory and never touches the database.
pub async fn cmd_export(
    config: &SurferConfig,
    platform_id: &str,
    sub_run_id: &str,
    json: bool,
    ephemeral: bool,
) -> anyhow::Result<()> {
    let db = if ephemeral {
        None
    } else {
        Some(open_database(config).await?)
    };
    let repo: Arc<dyn RunRecordRepository> = match &db {
        Some(db) => run_repository(db),
        None => Arc::new(MemoryRunRepository::new()),
    };
    let store = Arc::new(RunStore::new(repo));
    store.hydrate().await?;
    let flusher = store.spawn_flusher(config.store.flush_interval());

    let backend = HttpBackend::new(Duration::from_secs(config.sessions.request_timeout_secs))?;
    let sessions = Arc::new(SessionMultiplexer::new(Arc::new(backend), &config.sessions));
    let catalog = PlatformCatalog::from_config(&config.catalog)?;
    let drivers = DriverRegistry::new().with_fallback(Arc::new(PageSnapshotDriver::new(
        config.orchestrator.logged_out_markers.clone(),
    )));

    let (execution, display) = SyncBridge::new(config.bridge.event_capacity);
    let orchestrator = Orchestrator::new(
        store.clone(),
        sessions,
        drivers,
        catalog.clone(),
        execution.events.clone(),
        config.orchestrator.clone(),
    );

    let orphans = orchestrator.resume_orphans().await?;
    if !orphans.is_empty() && !json {
        println!(
            "  {} {} interrupted run(s) found; see 'surfer runs list --active'",
            "!".yellow(),
            orphans.len()
        );
    }

    let mut events = display.subscribe();
    let server = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let commands = execution.commands;
        async move { orchestrator.serve(commands).await }
    });

    display.send(Command::StartExport {
        platform_id: platform_id.to_string(),
        sub_run_id: sub_run_id.to_string(),
    })?;

    let watcher = RunWatcher {
        display: &display,
        store: &store,
        catalog: &catalog,
        platform_id,
        quiet: json,
    };
    let outcome = watcher.watch(&mut events).await;

    orchestrator.shutdown().await?;
    drop(display);
    if let Err(e) = server.await {
        warn!(error = %e, "Command loop ended abnormally");
    }
    flusher.abort();
    store.flush().await?;
    if let Some(db) = db {
        db.close().await;
    }

    let run = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        println!();
        print_run(&run);
        println!();
        match (&run.export_path, run.export_size) {
            (Some(path), Some(size)) => println!(
                "{} Exported {} to {}",
                "✓".green().bold(),
                format_bytes(size),
                path.display()
            ),
            _ => println!("  Run finished as {}", colored_run_status(run.status)),
        }
    }

    match run.status {
        RunStatus::Success | RunStatus::Stopped => Ok(()),
        status => bail!("Run {} finished with status {}", run.id, status),
    }
}

struct RunWatcher<'a> {
    display: &'a DisplayEndpoint,
    store: &'a RunStore,
    catalog: &'a PlatformCatalog,
    platform_id: &'a str,
    quiet: bool,
}

impl RunWatcher<'_> {
    async fn watch(&self, events: &mut broadcast::Receiver<Event>) -> anyhow::Result<Run> {
        let mut view = RunView::new();
        let mut run_id: Option<String> = None;
        let mut awaiting_sign_in = false;
        let mut stop_requested = false;
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                received = events.recv() => {
                    let event = match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Display fell behind, reloading runs");
                            view.replace_all(self.store.list());
                            continue;
                        }
                        Err(RecvError::Closed) => bail!("Execution context closed before the run finished"),
                    };
                    view.apply(&event);

                    match event {
                        Event::RunStarted { run } if run_id.is_none() && run.platform_id == self.platform_id => {
                            self.render_started(&run);
                            run_id = Some(run.id);
                        }
                        Event::CommandFailed { command, message } if run_id.is_none() && command == "export-website" => {
                            bail!("{}", message);
                        }
                        Event::CommandFailed { command, message } => {
                            warn!(command = %command, "{}", message);
                        }
                        Event::DbChanged => view.replace_all(self.store.list()),
                        Event::StepUpdated { run_id: ref id, ref task_id, ref step_id, status, ref logs, .. }
                            if Some(id) == run_id.as_ref() =>
                        {
                            self.render_step(&view, id, task_id, step_id, status, logs.as_deref());
                        }
                        Event::SessionAuthRequired { run_id: ref id, .. } if Some(id) == run_id.as_ref() => {
                            awaiting_sign_in = true;
                            let name = self
                                .catalog
                                .platform(self.platform_id)
                                .map(|p| p.name.clone())
                                .unwrap_or_else(|_| self.platform_id.to_string());
                            let notice = Notice::not_connected(id.clone(), &name);
                            eprintln!("  {} {}", "!".yellow().bold(), notice.message);
                            if stdin_open {
                                eprintln!("    {}", "Press Enter once you are signed in.".dimmed());
                            } else {
                                eprintln!("    {}", "Input is closed; press Ctrl-C to stop.".dimmed());
                            }
                        }
                        Event::RunCompleted { run_id: ref id, .. } if Some(id) == run_id.as_ref() => {
                            let run = self.store.get(id).or_else(|| view.get(id).cloned());
                            match run {
                                Some(run) => return Ok(run),
                                None => bail!("Run {} disappeared before it finished", id),
                            }
                        }
                        _ => {}
                    }
                }
                line = stdin.next_line(), if awaiting_sign_in && stdin_open => {
                    match line {
                        Ok(Some(_)) => {
                            if let Some(id) = &run_id {
                                self.display.send(Command::SignedIn { run_id: id.clone() })?;
                                awaiting_sign_in = false;
                                self.say(format!("  {} Resuming", "→".blue()));
                            }
                        }
                        Ok(None) | Err(_) => {
                            debug!("Standard input closed");
                            stdin_open = false;
                        }
                    }
                }
                signal = tokio::signal::ctrl_c(), if !stop_requested => {
                    signal?;
                    stop_requested = true;
                    match &run_id {
                        Some(id) => {
                            eprintln!("  {} Stopping {}", "!".yellow(), id);
                            self.display.send(Command::StopRun { run_id: id.clone() })?;
                        }
                        None => bail!("Interrupted before the run started"),
                    }
                }
            }
        }
    }

    fn say(&self, line: String) {
        if !self.quiet {
            println!("{}", line);
        }
    }

    fn render_started(&self, run: &Run) {
        self.say(format!(
            "{} {} {}",
            "Exporting".cyan().bold(),
            run.sub_run_id.bold(),
            format!("({})", run.id).dimmed()
        ));
        self.say(format!("  {} {}", "→".blue(), run.url));
    }

    fn render_step(
        &self,
        view: &RunView,
        run_id: &str,
        task_id: &str,
        step_id: &str,
        status: WorkStatus,
        logs: Option<&str>,
    ) {
        let Some(task) = view.get(run_id).and_then(|r| r.task(task_id)) else {
            return;
        };
        let step_name = task
            .step(step_id)
            .map(|s| s.name.as_str())
            .unwrap_or(step_id);

        let marker = match status {
            WorkStatus::Pending => return,
            WorkStatus::Running => "…".cyan(),
            WorkStatus::Success => "✓".green(),
            WorkStatus::Error => "✗".red(),
        };
        let detail = match (status, logs) {
            (WorkStatus::Running, _) | (_, None) => String::new(),
            (_, Some(logs)) => format!(" {}", format!("({})", logs).dimmed()),
        };
        self.say(format!(
            "  {} {} › {}{}",
            marker, task.name, step_name, detail
        ));
    }
}
