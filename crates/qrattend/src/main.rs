//! `qrattend` - CLI for the attendance kiosk
//!
//! Runs the scanning kiosk and offers one-shot commands for parsing, sending,
//! and inspecting the offline queue.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use qrattend::cli::{
    Cli, Command, ConfigCommand, ParseCommand, QueueCommand, RunCommand, SendCommand,
};
use qrattend::connectivity::probe_endpoint;
use qrattend::session::ENDPOINT_MISSING_MESSAGE;
use qrattend::{
    identifier, init_logging, AttendanceRecord, Config, ConnectivityWatch, DeliveryClient,
    DeliveryOutcome, FlushOutcome, KeyValueStore, LineFeeder, LineScanner, MemoryStore,
    OfflineQueue, ScanSession, SessionCommand, SessionSettings, SqliteStore, TerminalFeedback,
};

type Queue = OfflineQueue<Box<dyn KeyValueStore>>;

const SESSION_HELP: &str = "Scan a code, or type a command: \
:start :stop :switch :camera N :torch :mode M :lab L :flush :quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    // Execute the command
    match cli.command {
        Command::Run(run_cmd) => handle_run(&config, run_cmd).await,
        Command::Parse(parse_cmd) => handle_parse(&parse_cmd),
        Command::Send(send_cmd) => handle_send(&config, send_cmd).await,
        Command::Queue(queue_cmd) => handle_queue(&config, queue_cmd).await,
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json).await,
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn open_queue(config: &Config, ephemeral: bool) -> anyhow::Result<Queue> {
    let store: Box<dyn KeyValueStore> = if ephemeral {
        Box::new(MemoryStore::new())
    } else {
        let path = config.database_path();
        Box::new(
            SqliteStore::open(&path)
                .with_context(|| format!("opening queue database {}", path.display()))?,
        )
    };
    Ok(OfflineQueue::new(store, config.queue.key.clone()).with_policy(config.queue.flush_policy))
}

fn delivery_client(config: &Config) -> DeliveryClient {
    DeliveryClient::new(config.endpoint_url().map(String::from))
}

async fn handle_run(config: &Config, cmd: RunCommand) -> anyhow::Result<()> {
    let mut settings = SessionSettings::from_config(config);
    if let Some(lab) = cmd.lab {
        settings.lab = lab;
    }
    if let Some(mode) = cmd.mode {
        settings.mode = mode;
    }
    if let Some(camera) = cmd.camera {
        settings.camera_index = camera;
    }

    let queue = Arc::new(open_queue(config, cmd.ephemeral)?);
    let client = delivery_client(config);
    if !client.is_configured() {
        warn!("{ENDPOINT_MISSING_MESSAGE}");
    }

    // Probe before the startup flush; a flush that believes it is online while
    // the network is down would clear the queue under the default policy.
    let connectivity = ConnectivityWatch::probed(config.endpoint_url()).await;
    let probe = match (config.endpoint_url(), config.probe_interval()) {
        (Some(url), Some(interval)) => Some(connectivity.spawn_probe(url, interval)),
        _ => None,
    };

    let scanner = LineScanner::new();
    let (commands_tx, commands_rx) = mpsc::channel(8);
    spawn_input_reader(scanner.feeder(), commands_tx.clone());

    let shutdown = commands_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(SessionCommand::Shutdown).await;
        }
    });

    println!("{SESSION_HELP}");
    let mut session = ScanSession::new(
        scanner,
        client,
        queue,
        Box::new(TerminalFeedback::default()),
        settings,
    );
    let result = session.run(commands_rx, connectivity).await;

    if let Some(probe) = probe {
        probe.abort();
    }
    result.context("scan session failed")
}

/// Read stdin on a plain thread: `:`-prefixed lines are commands, anything
/// else is a scan. End of input shuts the session down.
///
/// A detached thread does not hold up runtime shutdown the way a pending
/// tokio stdin read would.
fn spawn_input_reader(feeder: LineFeeder, commands: mpsc::Sender<SessionCommand>) {
    let runtime = tokio::runtime::Handle::current();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            };
            if line.trim_start().starts_with(':') {
                match line.parse::<SessionCommand>() {
                    Ok(command) => {
                        if commands.blocking_send(command).is_err() {
                            return;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            } else if !runtime.block_on(feeder.feed(&line)) {
                debug!("Scanner paused; input ignored");
            }
        }
        let _ = commands.blocking_send(SessionCommand::Shutdown);
    });
}

fn handle_parse(cmd: &ParseCommand) -> anyhow::Result<()> {
    let student = identifier::parse(&cmd.raw);
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&student)?);
    } else {
        println!("Code:     {}", student.code);
        println!("Name:     {}", student.name);
        println!("Document: {}", student.document);
    }
    Ok(())
}

async fn handle_send(config: &Config, cmd: SendCommand) -> anyhow::Result<()> {
    let student = identifier::parse(&cmd.raw);
    let mode = cmd.mode.unwrap_or_else(|| config.session.default_mode.clone());
    let lab = cmd.lab.unwrap_or_else(|| config.session.lab.clone());
    let record = AttendanceRecord::build(&student, Some(&mode), Some(&lab));

    match delivery_client(config).send(&record).await {
        DeliveryOutcome::Delivered => {
            println!("Record sent for {}.", student.display_name());
        }
        DeliveryOutcome::Failed { reason } => {
            open_queue(config, false)?.enqueue(&record).await?;
            println!("Not sent ({reason}). Queued.");
        }
        DeliveryOutcome::NotConfigured => {
            anyhow::bail!(ENDPOINT_MISSING_MESSAGE);
        }
    }
    Ok(())
}

async fn handle_queue(config: &Config, cmd: QueueCommand) -> anyhow::Result<()> {
    let queue = open_queue(config, false)?;
    match cmd {
        QueueCommand::Show { json } => {
            let pending = queue.pending().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else if pending.is_empty() {
                println!("Queue is empty.");
            } else {
                for record in &pending {
                    println!(
                        "{}  {:<12} {:<32} {:<8} {}",
                        record.client_ts.format("%Y-%m-%d %H:%M:%S"),
                        record.code,
                        record.name,
                        record.mode,
                        record.lab
                    );
                }
                println!();
                println!("{} queued record(s)", pending.len());
            }
        }
        QueueCommand::Flush => {
            let Some(url) = config.endpoint_url() else {
                anyhow::bail!(ENDPOINT_MISSING_MESSAGE);
            };
            let online = ConnectivityWatch::new(probe_endpoint(url).await);
            match queue.flush(&delivery_client(config), &online).await? {
                FlushOutcome::Offline => {
                    println!("Endpoint unreachable; {} record(s) stay queued.", queue.len().await?);
                }
                FlushOutcome::NotConfigured => println!("{ENDPOINT_MISSING_MESSAGE}"),
                FlushOutcome::Empty => println!("Queue is empty."),
                FlushOutcome::Flushed(report) => {
                    println!("Sent {} pending records.", report.attempted);
                    println!(
                        "  delivered: {}  failed: {}  kept: {}",
                        report.delivered, report.failed, report.retained
                    );
                }
            }
        }
        QueueCommand::Clear { yes } => {
            let pending = queue.len().await.unwrap_or(0);
            if yes {
                let removed = queue.clear().await?;
                println!("Discarded {removed} queued record(s).");
            } else {
                println!("This will discard {pending} queued record(s).");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let queue = open_queue(config, false)?;
    let queued = queue.len().await?;
    let endpoint = config.endpoint_url();
    let online = match endpoint {
        Some(url) => Some(probe_endpoint(url).await),
        None => None,
    };

    if json {
        let status = serde_json::json!({
            "endpoint_configured": endpoint.is_some(),
            "endpoint_reachable": online,
            "queued": queued,
            "queue_key": queue.key(),
            "flush_policy": queue.policy(),
            "database_path": config.database_path(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("qrattend status");
        println!("---------------");
        println!(
            "Endpoint:      {}",
            endpoint.unwrap_or("not configured (set GAS_ENDPOINT)")
        );
        match online {
            Some(true) => println!("Network:       reachable"),
            Some(false) => println!("Network:       unreachable"),
            None => println!("Network:       unknown"),
        }
        println!("Queued:        {queued}");
        println!("Database:      {}", config.database_path().display());
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Endpoint]");
                println!(
                    "  URL:                {}",
                    config.endpoint_url().unwrap_or("(not set)")
                );
                println!();
                println!("[Session]");
                println!("  Default mode:       {}", config.session.default_mode);
                println!("  Lab:                {}", config.session.lab);
                println!("  Restart delay (ms): {}", config.session.restart_delay_ms);
                println!("  FPS:                {}", config.session.fps);
                println!(
                    "  Scan box:           {}x{}",
                    config.session.qrbox_width, config.session.qrbox_height
                );
                println!("  Camera index:       {}", config.session.camera_index);
                println!();
                println!("[Queue]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Key:                {}", config.queue.key);
                println!("  Flush policy:       {:?}", config.queue.flush_policy);
                println!();
                println!("[Connectivity]");
                println!(
                    "  Probe interval (s): {}",
                    config.connectivity.probe_interval_secs
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
