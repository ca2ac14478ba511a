#![allow(
    dead_code,
    unused_imports,
    unused_variables,
    unused_mut,
    clippy::too_many_arguments,
    clippy::needless_borrows_for_generic_args,
    clippy::useless_format,
    clippy::len_zero,
    clippy::field_reassign_with_default
)]

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use surfer_core::{LoggingConfig, SurferConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{
    cmd_export, cmd_platforms, handle_config_command, handle_runs_command, ConfigCommand,
    RunsCommand,
};
use config::load_config;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Parser)]
#[command(name = "surfer")]
#[command(version = VERSION)]
#[command(about = "Surfer - export your personal data from the platforms you are signed into")]
#[command(long_about = r#"
Surfer drives export runs against web platforms you already use. Each run
walks the tasks and steps of one platform sub-run in its own session and
saves what it finds under the export directory.

Use 'surfer platforms' to see what can be exported, 'surfer export' to start
a run and 'surfer runs' to review past runs.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Export one platform sub-run and wait for it to finish")]
    Export {
        #[arg(help = "Platform id, e.g. github-001")]
        platform: String,

        #[arg(help = "Sub-run id, e.g. github-001-repos")]
        sub_run: String,

        #[arg(long, help = "Print the finished run as JSON")]
        json: bool,

        #[arg(long, help = "Keep the run in memory instead of the run database")]
        ephemeral: bool,
    },

    #[command(about = "List, inspect and delete export runs")]
    Runs {
        #[command(subcommand)]
        action: Option<RunsCommand>,
    },

    #[command(about = "List platforms and sub-runs that can be exported")]
    Platforms {
        #[arg(
            short,
            long,
            default_value = "text",
            help = "Output format (text, json)"
        )]
        format: String,
    },

    #[command(about = "Inspect configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommand>,
    },

    #[command(about = "Show version information")]
    Version {
        #[arg(short, long)]
        detailed: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version { detailed } = cli.command {
        cmd_version(detailed);
        return ExitCode::SUCCESS;
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(cli.verbose, &config.logging);

    match run(cli, &config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(cli: Cli, config: &SurferConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Export {
            platform,
            sub_run,
            json,
            ephemeral,
        } => cmd_export(config, &platform, &sub_run, json, ephemeral).await,
        Commands::Runs { action } => handle_runs_command(config, action).await,
        Commands::Platforms { format } => cmd_platforms(config, &format),
        Commands::Config { action } => handle_config_command(config, action),
        Commands::Version { detailed } => {
            cmd_version(detailed);
            Ok(())
        }
    }
}

fn cmd_version(detailed: bool) {
    if detailed {
        println!("{}", "Surfer Version Information".cyan().bold());
        println!("{}", "═".repeat(40).dimmed());
        println!("  {:<15} {}", "Version:".bold(), VERSION);
        println!("  {:<15} {}", "Name:".bold(), NAME);
        println!("  {:<15} Apache-2.0", "License:".bold());
        println!();
        println!("  {}", "Built-in Platforms:".bold());
        if let Ok(catalog) = surfer_core::PlatformCatalog::builtin() {
            for platform in &catalog.platforms {
                println!("    ◇ {} ({})", platform.name, platform.id);
            }
        }
        println!();
        println!("  {}", "Build Information:".bold());
        println!("    Rust Edition: 2021");
        #[cfg(debug_assertions)]
        println!("    Build:        Debug");
        #[cfg(not(debug_assertions))]
        println!("    Build:        Release");
    } else {
        println!("surfer {}", VERSION);
    }
}
