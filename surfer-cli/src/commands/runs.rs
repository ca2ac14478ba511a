use anyhow::bail;
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use surfer_core::{format_elapsed, ArtifactWriter, Run, RunStatus, SurferConfig, WorkStatus};

use crate::config::{open_database, open_store};

#[derive(Subcommand)]
pub enum RunsCommand {
    #[command(about = "List export runs, newest first")]
    List {
        #[arg(short, long, help = "Filter by platform id")]
        platform: Option<String>,

        #[arg(long, help = "Show only pending and running runs")]
        active: bool,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Show the tasks and steps of a run")]
    Show {
        #[arg(help = "Run ID")]
        run_id: String,

        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Delete a run and its record")]
    Delete {
        #[arg(help = "Run ID")]
        run_id: String,
    },

    #[command(about = "List the files a run exported")]
    Files {
        #[arg(help = "Run ID")]
        run_id: String,
    },
}

pub async fn handle_runs_command(
    config: &SurferConfig,
    cmd: Option<RunsCommand>,
) -> anyhow::Result<()> {
    match cmd.unwrap_or(RunsCommand::List {
        platform: None,
        active: false,
        format: "text".to_string(),
    }) {
        RunsCommand::List {
            platform,
            active,
            format,
        } => cmd_runs_list(config, platform.as_deref(), active, &format).await,
        RunsCommand::Show { run_id, format } => cmd_runs_show(config, &run_id, &format).await,
        RunsCommand::Delete { run_id } => cmd_runs_delete(config, &run_id).await,
        RunsCommand::Files { run_id } => cmd_runs_files(config, &run_id).await,
    }
}

async fn load_runs(config: &SurferConfig) -> anyhow::Result<Vec<Run>> {
    let db = open_database(config).await?;
    let store = open_store(&db).await?;
    let runs = store.list();
    db.close().await;
    Ok(runs)
}

async fn find_run(config: &SurferConfig, run_id: &str) -> anyhow::Result<Run> {
    match load_runs(config).await?.into_iter().find(|r| r.id == run_id) {
        Some(run) => Ok(run),
        None => bail!("Run '{}' not found", run_id),
    }
}

async fn cmd_runs_list(
    config: &SurferConfig,
    platform_filter: Option<&str>,
    active_only: bool,
    format: &str,
) -> anyhow::Result<()> {
    let mut runs = load_runs(config).await?;

    if let Some(platform_id) = platform_filter {
        runs.retain(|r| r.platform_id == platform_id);
    }
    if active_only {
        runs.retain(|r| r.status.is_active());
    }
    runs.sort_by(|a, b| b.start_date.cmp(&a.start_date));

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
        println!(
            "{}",
            "Start one with 'surfer export <platform> <sub-run>'.".dimmed()
        );
        return Ok(());
    }

    println!("{}", "Export Runs".cyan().bold());
    println!();

    let now = Utc::now();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::White),
            Cell::new("Sub-run").fg(Color::White),
            Cell::new("Status").fg(Color::White),
            Cell::new("Started").fg(Color::White),
            Cell::new("Elapsed").fg(Color::White),
            Cell::new("Progress").fg(Color::White),
            Cell::new("Export").fg(Color::White),
        ]);

    for run in &runs {
        let done = run
            .tasks
            .iter()
            .filter(|t| t.status == WorkStatus::Success)
            .count();

        table.add_row(vec![
            Cell::new(&run.id),
            Cell::new(&run.sub_run_id),
            run_status_cell(run.status),
            Cell::new(run.start_date.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(format_elapsed(run.start_date, run.end_date, now)),
            Cell::new(format!("{}/{} tasks", done, run.tasks.len())),
            Cell::new(
                run.export_size
                    .map(format_bytes)
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }

    println!("{table}");
    println!();
    let active_count = runs.iter().filter(|r| r.status.is_active()).count();
    println!("  Total: {} run(s) ({} active)", runs.len(), active_count);

    Ok(())
}

async fn cmd_runs_show(config: &SurferConfig, run_id: &str, format: &str) -> anyhow::Result<()> {
    let run = find_run(config, run_id).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    print_run(&run);
    Ok(())
}

pub(crate) fn print_run(run: &Run) {
    println!("{}", format!("Run {}", run.id).cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "Platform:".bold(), run.platform_id);
    println!("  {:<12} {}", "Sub-run:".bold(), run.sub_run_id);
    println!("  {:<12} {}", "URL:".bold(), run.url);
    println!("  {:<12} {}", "Status:".bold(), colored_run_status(run.status));
    println!(
        "  {:<12} {}",
        "Elapsed:".bold(),
        format_elapsed(run.start_date, run.end_date, Utc::now())
    );
    if let Some(path) = &run.export_path {
        println!(
            "  {:<12} {} ({})",
            "Export:".bold(),
            path.display(),
            format_bytes(run.export_size.unwrap_or(0))
        );
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Task / Step").fg(Color::White),
            Cell::new("Status").fg(Color::White),
            Cell::new("Log").fg(Color::White),
        ]);

    for task in &run.tasks {
        table.add_row(vec![
            Cell::new(&task.name),
            work_status_cell(task.status),
            Cell::new(task.logs.as_deref().unwrap_or("")),
        ]);
        for step in &task.steps {
            table.add_row(vec![
                Cell::new(format!("  └ {}", step.name)),
                work_status_cell(step.status),
                Cell::new(truncate_string(step.logs.as_deref().unwrap_or(""), 60)),
            ]);
        }
    }

    println!("{table}");
}

async fn cmd_runs_delete(config: &SurferConfig, run_id: &str) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let store = open_store(&db).await?;

    if let Some(run) = store.get(run_id) {
        if run.status.is_active() {
            println!(
                "  {} Run is still {}; its record will be removed anyway",
                "!".yellow(),
                run.status
            );
        }
    }

    let removed = store.remove(run_id).await?;
    db.close().await;

    if !removed {
        bail!("Run '{}' not found", run_id);
    }

    println!("{} Deleted run {}", "✓".green().bold(), run_id);
    Ok(())
}

async fn cmd_runs_files(config: &SurferConfig, run_id: &str) -> anyhow::Result<()> {
    let run = find_run(config, run_id).await?;
    let Some(path) = run.export_path else {
        bail!("Run '{}' has no exported files (status: {})", run_id, run.status);
    };

    let writer = ArtifactWriter::new(config.orchestrator.export_dir.clone());
    let files = writer.list_files(&path).await?;

    println!("{}", path.display().to_string().cyan().bold());
    for file in &files {
        println!("  {}", file);
    }
    println!();
    println!("  {} file(s)", files.len());
    Ok(())
}

pub(crate) fn colored_run_status(status: RunStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Pending => label.dimmed(),
        RunStatus::Running => label.cyan(),
        RunStatus::Success => label.green(),
        RunStatus::Error => label.red(),
        RunStatus::Stopped => label.yellow(),
    }
}

fn run_status_cell(status: RunStatus) -> Cell {
    let color = match status {
        RunStatus::Pending => Color::DarkGrey,
        RunStatus::Running => Color::Cyan,
        RunStatus::Success => Color::Green,
        RunStatus::Error => Color::Red,
        RunStatus::Stopped => Color::Yellow,
    };
    Cell::new(status.to_string()).fg(color)
}

fn work_status_cell(status: WorkStatus) -> Cell {
    let color = match status {
        WorkStatus::Pending => Color::DarkGrey,
        WorkStatus::Running => Color::Cyan,
        WorkStatus::Success => Color::Green,
        WorkStatus::Error => Color::Red,
    };
    Cell::new(status.to_string()).fg(color)
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
