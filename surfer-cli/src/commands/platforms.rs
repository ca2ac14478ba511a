use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use surfer_core::{PlatformCatalog, SurferConfig};

pub fn cmd_platforms(config: &SurferConfig, format: &str) -> anyhow::Result<()> {
    let catalog = PlatformCatalog::from_config(&config.catalog)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&catalog.platforms)?);
        return Ok(());
    }

    if catalog.platforms.is_empty() {
        println!("{}", "No platforms in the catalog.".yellow());
        return Ok(());
    }

    println!("{}", "Platforms".cyan().bold());
    if let Some(path) = &config.catalog.path {
        println!("{}", format!("Catalog: {}", path.display()).dimmed());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Platform").fg(Color::White),
            Cell::new("Company").fg(Color::White),
            Cell::new("Sub-run").fg(Color::White),
            Cell::new("Tasks").fg(Color::White),
            Cell::new("Start URL").fg(Color::White),
        ]);

    for platform in &catalog.platforms {
        for (i, sub_run) in platform.sub_runs.iter().enumerate() {
            let label = if i == 0 {
                format!("{} ({})", platform.name, platform.id)
            } else {
                String::new()
            };
            let company = if i == 0 { platform.company.as_str() } else { "" };

            table.add_row(vec![
                Cell::new(label),
                Cell::new(company),
                Cell::new(format!("{} ({})", sub_run.name, sub_run.id)),
                Cell::new(sub_run.tasks.len().to_string()),
                Cell::new(platform.start_url(sub_run)),
            ]);
        }
    }

    println!("{table}");
    println!();
    println!(
        "  {}",
        "Export one with 'surfer export <platform> <sub-run>'".dimmed()
    );

    Ok(())
}
