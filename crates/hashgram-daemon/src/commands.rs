//! Command implementations for the hashgram binary.
//!
//! Handles:
//! - load: import a HASH:COUNT dump into the record store
//! - index: build or resume the n-gram index
//! - status: list saved checkpoints
//! - lookup: print the postings of one n-gram
//! - admin: stats, checkpoint reset, compaction

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::BufReader;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hashgram_indexing::{
    list_checkpoints, run_partitioned, LoggingProgressCallback, PartitionedReport,
};
use hashgram_storage::{RecordLoader, Storage};
use hashgram_types::Settings;

use crate::cli::{AdminCommands, Cli, Commands};

/// Exit status of an aborted or cancelled run.
pub const EXIT_ABORTED: u8 = 1;
/// Exit status of a configuration or startup failure.
pub const EXIT_STARTUP: u8 = 2;

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = &cli.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }

    if let Commands::Index {
        ngram_length,
        batch_size,
        max_retries,
        backoff_base_ms,
        partitions,
        malformed_policy,
    } = &cli.command
    {
        let indexing = &mut settings.indexing;
        if let Some(k) = ngram_length {
            indexing.ngram_length = *k;
        }
        if let Some(size) = batch_size {
            indexing.batch_size = *size;
        }
        if let Some(retries) = max_retries {
            indexing.max_retries = *retries;
        }
        if let Some(base) = backoff_base_ms {
            indexing.backoff_base_ms = *base;
        }
        if let Some(n) = partitions {
            indexing.partitions = *n;
        }
        if let Some(policy) = malformed_policy {
            indexing.malformed_policy = *policy;
        }
        indexing
            .validate()
            .context("Invalid indexing options")?;
    }

    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open (creating if needed) the RocksDB store named by `settings`.
pub fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    info!(path = ?db_path, "Opening storage");

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let storage = Storage::open(&db_path).context("Failed to open storage")?;
    Ok(Arc::new(storage))
}

/// Run one command against an open store.
pub async fn dispatch(
    storage: Arc<Storage>,
    settings: &Settings,
    command: Commands,
) -> Result<ExitCode> {
    match command {
        Commands::Load { file, batch_size } => load_dump(storage, &file, batch_size).await,
        Commands::Index { .. } => run_index(storage, settings).await,
        Commands::Status => show_status(&storage),
        Commands::Lookup { ngram } => lookup(&storage, settings, &ngram),
        Commands::Admin { command } => handle_admin(&storage, command),
    }
}

/// Import a dump file into the record store.
pub async fn load_dump(storage: Arc<Storage>, file: &str, batch_size: usize) -> Result<ExitCode> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open dump file {}", file))?,
    );
    info!(file = %file, batch_size, "Loading records");

    let stats = tokio::task::spawn_blocking(move || {
        RecordLoader::new(&storage)
            .with_batch_size(batch_size)
            .load(reader)
    })
    .await
    .context("Load task failed")?
    .context("Failed to load records")?;

    println!("Loaded {} records from {}", stats.records_loaded, file);
    println!("  Lines read:     {}", stats.lines_read);
    println!("  Invalid lines:  {}", stats.invalid_lines);
    println!("  Write batches:  {}", stats.batches_written);
    Ok(ExitCode::SUCCESS)
}

/// Build or resume the index; exit status reflects the run outcome.
pub async fn run_index(storage: Arc<Storage>, settings: &Settings) -> Result<ExitCode> {
    let indexing = &settings.indexing;
    info!(
        ngram_length = indexing.ngram_length,
        batch_size = indexing.batch_size,
        max_retries = indexing.max_retries,
        backoff_base_ms = indexing.backoff_base_ms,
        partitions = indexing.partitions,
        malformed_policy = %indexing.malformed_policy,
        "Starting indexing"
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let report = run_partitioned(
        storage.clone(),
        indexing,
        Arc::new(LoggingProgressCallback),
        cancel,
    )
    .await
    .context("Indexing run failed")?;

    if let Err(e) = storage.flush() {
        warn!(error = %e, "Failed to flush storage after run");
    }

    print!("{}", format_summary(&report));
    if report.is_completed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_ABORTED))
    }
}

/// Final counts, plus the error and resume point of every aborted partition.
pub fn format_summary(report: &PartitionedReport) -> String {
    let totals = report.totals();
    let mut out = String::new();

    let outcome = if report.is_completed() {
        "completed"
    } else {
        "aborted"
    };
    let _ = writeln!(out, "Indexing {}", outcome);
    let _ = writeln!(out, "  Records read:        {}", totals.records_read);
    let _ = writeln!(out, "  Records skipped:     {} (malformed)", totals.records_skipped);
    let _ = writeln!(out, "  Short records:       {}", totals.short_records);
    let _ = writeln!(out, "  Postings generated:  {}", totals.postings_generated);
    let _ = writeln!(out, "  Postings written:    {}", totals.postings_written);
    let _ = writeln!(out, "  Batches written:     {}", totals.batches_written);
    let _ = writeln!(out, "  Batches retried:     {}", totals.batches_retried);

    for aborted in report.aborted() {
        let error = aborted
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        let _ = writeln!(out, "Partition {} aborted: {}", aborted.partition, error);
        match aborted.resume_after() {
            Some(id) => {
                let _ = writeln!(out, "  Last checkpoint: record {}", id);
            }
            None => {
                let _ = writeln!(out, "  Last checkpoint: none (restarts from the beginning)");
            }
        }
    }
    out
}

/// List saved checkpoints.
pub fn show_status(storage: &Storage) -> Result<ExitCode> {
    let checkpoints = list_checkpoints(storage).context("Failed to read checkpoints")?;
    if checkpoints.is_empty() {
        println!("No checkpoints saved");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<20} {:>20} {:>16}  UPDATED", "PARTITION", "LAST RECORD", "RECORDS");
    for checkpoint in checkpoints {
        let last = checkpoint
            .last_record_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:>20} {:>16}  {}",
            checkpoint.partition,
            last,
            checkpoint.records_indexed,
            checkpoint.updated_at.to_rfc3339()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the record ids posted under `ngram`.
pub fn lookup(storage: &Storage, settings: &Settings, ngram: &str) -> Result<ExitCode> {
    if ngram.chars().count() != settings.indexing.ngram_length {
        warn!(
            ngram = %ngram,
            ngram_length = settings.indexing.ngram_length,
            "Lookup key length differs from configured n-gram length"
        );
    }

    let ids = storage
        .get_postings(ngram)
        .with_context(|| format!("Failed to read postings for {}", ngram))?;
    println!("{} record(s) contain {}", ids.len(), ngram);
    for id in ids {
        if let Some(record) = storage.get_record(id).context("Failed to read record")? {
            match record.hash {
                Some(hash) => println!("  {}  {}  count={}", id, hash, record.count),
                None => println!("  {}  <malformed>", id),
            }
        } else {
            println!("  {}  <missing record>", id);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Handle admin subcommands.
pub fn handle_admin(storage: &Storage, command: AdminCommands) -> Result<ExitCode> {
    match command {
        AdminCommands::Stats => {
            let stats = storage.get_stats().context("Failed to read statistics")?;
            println!("Records:      {}", stats.record_count);
            println!("Postings:     {}", stats.posting_count);
            println!("Checkpoints:  {}", stats.checkpoint_count);
            println!("Disk usage:   {} bytes", stats.disk_usage_bytes);
        }
        AdminCommands::Reset { partition } => match partition {
            Some(partition) => {
                if storage
                    .delete_checkpoint(&partition)
                    .context("Failed to delete checkpoint")?
                {
                    println!("Reset checkpoint {}", partition);
                } else {
                    println!("No checkpoint named {}", partition);
                }
            }
            None => {
                let removed = storage
                    .clear_checkpoints()
                    .context("Failed to clear checkpoints")?;
                println!("Reset {} checkpoint(s)", removed);
            }
        },
        AdminCommands::Compact => {
            storage.compact().context("Compaction failed")?;
            println!("Compaction complete");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Stop requested, finishing in-flight writes");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping...");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping...");
        }
    }
}
