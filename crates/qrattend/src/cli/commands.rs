//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Kiosk session arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Lab to stamp on records (overrides configuration)
    #[arg(short, long)]
    pub lab: Option<String>,

    /// Attendance mode to stamp on records (overrides configuration)
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Index of the camera to start with
    #[arg(long, value_name = "N")]
    pub camera: Option<usize>,

    /// Keep the offline queue in memory only
    #[arg(long)]
    pub ephemeral: bool,
}

/// Parse command arguments.
#[derive(Debug, Args)]
pub struct ParseCommand {
    /// Raw scanned text
    pub raw: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// One-shot send arguments.
#[derive(Debug, Args)]
pub struct SendCommand {
    /// Raw scanned text
    pub raw: String,

    /// Lab to stamp on the record
    #[arg(short, long)]
    pub lab: Option<String>,

    /// Attendance mode to stamp on the record
    #[arg(short, long)]
    pub mode: Option<String>,
}

/// Offline queue commands.
#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// List queued records
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Send queued records now
    Flush,

    /// Discard every queued record
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}
