//! OCR Pipeline
//!
//! Scheduler daemon with a console UI, plus one-shot maintenance commands.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ocr_pipeline::config::Config;
use ocr_pipeline::ledger::Ledger;
use ocr_pipeline::library::LibraryScanner;
use ocr_pipeline::ocr::{CommandDecryptor, OcrMyPdf};
use ocr_pipeline::orchestrator::RunOrchestrator;
use ocr_pipeline::recovery;
use ocr_pipeline::trigger::{RerunTrigger, Scheduler, TriggerHandle};
use ocr_pipeline::ui::{
    spawn_stdin_reader, ChannelNotifier, ConsoleUi, Notifier, TracingNotifier, UiCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "ocr-pipeline",
    version,
    about = "Scan a document tree and OCR every document exactly once"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run on a schedule with a console UI (default)
    Daemon,
    /// Run the pipeline once and print the report
    Once,
    /// Repair staging artifacts left by an interrupted run
    Sweep,
    /// Flag a ledger record for reprocessing on the next run
    MarkProblematic {
        /// Identity token as shown by `status`
        identity: String,
    },
    /// Print the ledger
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocr_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    tracing::info!("Starting OCR pipeline v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Working directory: {}", config.pipeline.working_dir.display());
    tracing::info!("Backup directory: {}", config.pipeline.backup_root().display());
    tracing::info!("Ledger: {}", config.ledger.path.display());

    match cli.command.unwrap_or(Command::Daemon) {
        Command::Daemon => run_daemon(config).await,
        Command::Once => run_once(config).await,
        Command::Sweep => {
            let scanner = LibraryScanner::new(
                &config.pipeline.working_dir,
                Some(config.pipeline.backup_root()),
            );
            let report = recovery::sweep(&scanner);
            println!(
                "Removed {} stale artifact(s), restored {} document(s), {} failure(s)",
                report.removed, report.restored, report.failed
            );
            Ok(())
        }
        Command::MarkProblematic { identity } => {
            let ledger = ledger(&config);
            if ledger.mark_problematic(&identity, &TracingNotifier).await? {
                println!("{} will be reprocessed on the next run", identity);
                Ok(())
            } else {
                anyhow::bail!("{} is not in {}", identity, ledger.path().display())
            }
        }
        Command::Status => {
            let ledger = ledger(&config);
            let entries = ledger.entries()?;
            for entry in &entries {
                let date = entry
                    .last_processed
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let flag = if entry.problematic { " (problematic)" } else { "" };
                println!("{}  {}  {}{}", entry.identity, date, entry.display_name, flag);
            }
            println!("{} record(s) in {}", entries.len(), ledger.path().display());
            Ok(())
        }
    }
}

fn ledger(config: &Config) -> Ledger {
    Ledger::new(&config.ledger.path).with_retry(config.ledger.retry_policy())
}

fn orchestrator(
    config: &Config,
    notifier: Arc<dyn Notifier>,
    trigger: TriggerHandle,
) -> RunOrchestrator {
    RunOrchestrator::new(
        config.clone(),
        Arc::new(OcrMyPdf::new(config.ocr.clone())),
        Arc::new(CommandDecryptor::new(&config.decrypt)),
        notifier,
        Arc::new(trigger),
    )
}

async fn run_once(mut config: Config) -> anyhow::Result<()> {
    // An explicit one-shot run always does work
    config.pipeline.run_on_startup = true;
    let mut orchestrator = orchestrator(&config, Arc::new(TracingNotifier), TriggerHandle::default());
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Stopping after the current document");
        cancel.cancel();
    });

    let report = orchestrator.run().await?;
    println!("{}", report);
    Ok(())
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let ui = ConsoleUi::new(config.pipeline.settings_path.clone(), config.defaults);
    let ui_task = tokio::spawn(ui.run(event_rx, spawn_stdin_reader(), control_tx));

    let mut scheduler = Scheduler::new(config.schedule.interval());
    let trigger = scheduler.handle();
    let mut orchestrator = orchestrator(
        &config,
        Arc::new(ChannelNotifier::new(event_tx)),
        trigger.clone(),
    );

    let cancel = orchestrator.cancel_flag();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested");
            cancel.cancel();
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!(
        "Scheduler started, running every {:?}. Type force-rescan, output-txt, notifications, run or exit.",
        scheduler.interval()
    );

    loop {
        tokio::select! {
            reason = scheduler.tick() => {
                tracing::debug!(?reason, "Scheduler woke up");
                if let Err(e) = orchestrator.run().await {
                    tracing::error!("Run failed: {}", e);
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            command = control_rx.recv() => match command {
                Some(UiCommand::RunNow) => trigger.request_rerun(),
                Some(UiCommand::Exit) | None => break,
                // Toggles are applied by the console and not forwarded
                Some(_) => {}
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    // Closes the event channel, which ends the UI task
    drop(orchestrator);
    if let Err(e) = ui_task.await {
        tracing::warn!("UI task ended abnormally: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
