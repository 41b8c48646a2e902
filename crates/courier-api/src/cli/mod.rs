//! CLI command definitions and dispatch for the `courier` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod settings;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Multi-tenant messaging gateway for the CRM.
#[derive(Parser)]
#[command(name = "courier", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API and messaging runtime.
    Serve {
        /// Port to listen on (defaults to `server.port` in config.toml).
        #[arg(long, short)]
        port: Option<u16>,

        /// Address to bind (defaults to `server.host` in config.toml).
        #[arg(long)]
        host: Option<String>,
    },

    /// Show data directory, configuration and storage totals.
    Status,

    /// Inspect and change an organization's messaging settings.
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Show effective and stored settings.
    Show {
        /// Organization id (UUID).
        org: String,
    },

    /// Replace the stored settings blob.
    Set {
        /// Organization id (UUID).
        org: String,

        /// Settings as a JSON object, e.g. '{"safety":{"enableMassSending":true}}'.
        #[arg(id = "settings_json", value_name = "JSON")]
        json: String,
    },

    /// Show the effective values a settings blob would produce, without storing it.
    Validate {
        /// Settings as a JSON object.
        #[arg(id = "settings_json", value_name = "JSON")]
        json: String,
    },

    /// Set the secret bulk sends must present.
    Confirmation {
        /// Organization id (UUID).
        org: String,

        /// The secret. Only its digest is stored.
        secret: String,
    },
}
