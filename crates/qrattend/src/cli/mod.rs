//! Command-line interface for qrattend.
//!
//! This module provides the CLI structure for the `qrattend` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, ParseCommand, QueueCommand, RunCommand, SendCommand, StatusCommand,
};

/// qrattend - Attendance kiosk for QR and barcode scans
///
/// Reads student identifiers from a scanner, sends attendance records to a
/// remote endpoint, and queues them on disk while the network is down.
#[derive(Debug, Parser)]
#[command(name = "qrattend")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scanning kiosk
    Run(RunCommand),

    /// Parse scanned text and show the identifier
    Parse(ParseCommand),

    /// Send one record, queuing it if delivery fails
    Send(SendCommand),

    /// Inspect or flush the offline queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Show endpoint, queue, and connectivity status
    Status(StatusCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
