//! System status command.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use courier_infra::config::CONFIG_FILE;
use courier_infra::sqlite::pool::DATABASE_FILE;

use crate::state::AppState;

/// Display data directory, effective configuration and storage totals.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let totals = state.store.totals().await?;
    let config = &state.config;
    let config_present = state.data_dir.join(CONFIG_FILE).exists();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "database": state.data_dir.join(DATABASE_FILE).display().to_string(),
            "config_file": config_present,
            "config": &**config,
            "storage": totals,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Courier v{}", style("✉").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Paths ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).cyan());
    println!(
        "  Database: {}",
        style(state.data_dir.join(DATABASE_FILE).display()).cyan()
    );
    if config_present {
        println!("  Config:   {}", style(state.data_dir.join(CONFIG_FILE).display()).cyan());
    } else {
        println!("  Config:   {}", style("defaults (no config.toml)").dim());
    }
    println!();

    println!("  {}", style("── Runtime ──").dim());
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::White),
        Cell::new("Value").fg(Color::White),
    ]);
    let rows = [
        ("server", format!("{}:{}", config.server.host, config.server.port)),
        ("connect timeout", format!("{} ms", config.session.connect_timeout_ms)),
        ("pairing timeout", format!("{} ms", config.session.pairing_timeout_ms)),
        (
            "reconnect",
            format!(
                "{} attempts, {}..{} ms",
                config.session.reconnect.max_attempts,
                config.session.reconnect.base_delay_ms,
                config.session.reconnect.max_delay_ms
            ),
        ),
        (
            "send retry",
            format!(
                "{} attempts, {}..{} ms",
                config.outgoing.send_retry.max_attempts,
                config.outgoing.send_retry.base_delay_ms,
                config.outgoing.send_retry.max_delay_ms
            ),
        ),
        (
            "incoming queue",
            format!(
                "capacity {}, push timeout {} ms",
                config.incoming.capacity, config.incoming.push_timeout_ms
            ),
        ),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name).fg(Color::Cyan), Cell::new(value)]);
    }
    for line in table.to_string().lines() {
        println!("  {line}");
    }
    println!();

    println!("  {}", style("── Storage ──").dim());
    println!("  Organizations: {}", style(totals.organizations).bold());
    println!("  Conversations: {}", style(totals.conversations).bold());
    println!("  Messages:      {}", style(totals.messages).bold());
    println!();

    Ok(())
}
