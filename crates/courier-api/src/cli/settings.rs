//! Settings commands: show, set, validate, confirmation.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use courier_core::repository::settings::SettingsProvider;
use courier_types::confirmation::ConfirmationToken;
use courier_types::organization::OrganizationId;
use courier_types::settings::{MessagingSettings, StoredSettings, validate_settings};

use super::SettingsCommand;
use crate::state::AppState;

pub async fn handle(action: SettingsCommand, state: &AppState, json: bool) -> Result<()> {
    match action {
        SettingsCommand::Show { org } => show(state, parse_org(&org)?, json).await,
        SettingsCommand::Set { org, json: raw } => set(state, parse_org(&org)?, &raw, json).await,
        SettingsCommand::Validate { json: raw } => {
            let effective = validate_settings(&StoredSettings::from_json(&parse_blob(&raw)?));
            print_settings(&effective, json)
        }
        SettingsCommand::Confirmation { org, secret } => {
            let org = parse_org(&org)?;
            let secret = ConfirmationToken::new(secret);
            if secret.is_blank() {
                bail!("confirmation secret must not be blank");
            }
            state.settings.set_confirmation_secret(org, &secret).await?;
            if json {
                println!("{}", serde_json::json!({ "confirmationConfigured": true }));
            } else {
                println!("{} Confirmation secret set for {}", style("✓").green(), style(org).cyan());
            }
            Ok(())
        }
    }
}

fn parse_org(s: &str) -> Result<OrganizationId> {
    s.parse()
        .with_context(|| format!("invalid organization id '{s}' (expected a UUID)"))
}

fn parse_blob(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("settings must be valid JSON")?;
    if !value.is_object() {
        bail!("settings must be a JSON object");
    }
    Ok(value)
}

async fn show(state: &AppState, org: OrganizationId, json: bool) -> Result<()> {
    let effective = state.settings.load_settings(org).await?;
    let stored = state.settings.raw_settings(org).await?;
    let confirmation = state.settings.has_confirmation_secret(org).await?;

    if json {
        let out = serde_json::json!({
            "effective": effective,
            "stored": stored,
            "confirmationConfigured": confirmation,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  Settings for {}", style(org).cyan().bold());
    if stored.is_none() {
        println!("  {}", style("Nothing stored, defaults apply").dim());
    }
    print_settings(&effective, false)?;
    let secret = if confirmation {
        style("configured").green()
    } else {
        style("not configured").yellow()
    };
    println!("  Confirmation secret: {secret}");
    println!();
    Ok(())
}

async fn set(state: &AppState, org: OrganizationId, raw: &str, json: bool) -> Result<()> {
    let blob = parse_blob(raw)?;
    let effective = state.settings.store_settings(org, &blob).await?;
    if !json {
        println!("{} Settings stored for {}", style("✓").green(), style(org).cyan());
    }
    print_settings(&effective, json)
}

fn print_settings(settings: &MessagingSettings, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(settings)?);
        return Ok(());
    }

    let rate = &settings.rate_limiting;
    let safety = &settings.safety;
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::White),
        Cell::new("Effective").fg(Color::White),
    ]);
    let rows = [
        ("rateLimiting.messagesPerMinute", rate.messages_per_minute.to_string()),
        ("rateLimiting.messagesPerHour", rate.messages_per_hour.to_string()),
        ("rateLimiting.messagesPerDay", rate.messages_per_day.to_string()),
        ("rateLimiting.concurrency", rate.concurrency.to_string()),
        ("safety.enableMassSending", safety.enable_mass_sending.to_string()),
        ("safety.requireConfirmation", safety.require_confirmation.to_string()),
        ("safety.maxBatchSize", safety.max_batch_size.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name).fg(Color::Cyan), Cell::new(value)]);
    }
    for line in table.to_string().lines() {
        println!("  {line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_must_be_an_object() {
        assert!(parse_blob("[1,2]").is_err());
        assert!(parse_blob("not json").is_err());
        assert!(parse_blob(r#"{"safety":{}}"#).is_ok());
    }

    #[tokio::test]
    async fn set_then_show_uses_stored_values() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init_in(dir.path()).await.unwrap();
        let org = OrganizationId::new();

        set(&state, org, r#"{"safety":{"enableMassSending":true,"maxBatchSize":7}}"#, true)
            .await
            .unwrap();
        let effective = state.settings.load_settings(org).await.unwrap();
        assert!(effective.safety.enable_mass_sending);
        assert_eq!(effective.safety.max_batch_size, 7);

        state.shutdown().await;
    }
}
