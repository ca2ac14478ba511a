use clap::Subcommand;
use colored::Colorize;
use surfer_core::SurferConfig;

use crate::config::get_config_dir;

#[derive(Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Print the effective configuration")]
    Show {
        #[arg(
            short,
            long,
            default_value = "toml",
            help = "Output format (toml, json)"
        )]
        format: String,
    },

    #[command(about = "Show where configuration is read from")]
    Paths,
}

pub fn handle_config_command(
    config: &SurferConfig,
    cmd: Option<ConfigCommand>,
) -> anyhow::Result<()> {
    match cmd.unwrap_or(ConfigCommand::Show {
        format: "toml".to_string(),
    }) {
        ConfigCommand::Show { format } => cmd_config_show(config, &format),
        ConfigCommand::Paths => cmd_config_paths(config),
    }
}

fn cmd_config_show(config: &SurferConfig, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        "toml" => print!("{}", toml::to_string_pretty(config)?),
        other => anyhow::bail!("Unknown format '{}'. Use toml or json", other),
    }
    Ok(())
}

fn cmd_config_paths(config: &SurferConfig) -> anyhow::Result<()> {
    println!("{}", "Configuration Sources".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());

    if let Ok(cwd) = std::env::current_dir() {
        println!("  {}", cwd.join("config").join("default.toml").display());
        println!("  {}", cwd.join("config").join("local.toml").display());
        println!("  {}", cwd.join("surfer.toml").display());
    }
    if let Some(dir) = get_config_dir() {
        println!("  {}", dir.join("config.toml").display());
    }
    if let Some(home) = dirs::home_dir() {
        println!("  {}", home.join(".surfer").join("config.toml").display());
    }
    println!("  {}", "SURFER_* environment variables".dimmed());
    println!();

    println!("  {:<12} {}", "Database:".bold(), config.database.url);
    println!(
        "  {:<12} {}",
        "Exports:".bold(),
        config.orchestrator.export_dir.display()
    );
    Ok(())
}
