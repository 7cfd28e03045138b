//! slot-run - Publish the due posting slots once

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use libslotcast::config::PlatformStatus;
use libslotcast::logging::LoggingConfig;
use libslotcast::platforms::build_publishers;
use libslotcast::scheduling::{due_slots, localize, select_named};
use libslotcast::{
    Config, DirectorySource, Ledger, Orchestrator, PlatformKind, PlatformPolicy, SlotcastError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "slot-run")]
#[command(version)]
#[command(about = "Publish the due posting slots once and report the outcome")]
#[command(long_about = "\
slot-run - Publish the due posting slots once

DESCRIPTION:
    slot-run checks which slots of the configured slot table are due right
    now, resolves each slot's latest video once and publishes it to every
    platform the slot targets. Platforms are published concurrently, slots
    one after another. Transient failures are retried with backoff.

    Meant to be invoked by cron or a systemd timer a few times a day. Slots
    that already ran today (according to the ledger) are not run again
    unless --force is given.

USAGE:
    # Run whatever is due now
    slot-run

    # Run specific slots regardless of time
    slot-run --slot reel_9am --slot std_9_30am

    # Evaluate the schedule at a given instant
    slot-run --now 2026-10-17T09:05:00+05:30

    # Give up on everything still running after 20 minutes
    slot-run --deadline 20m

SIGNALS:
    SIGTERM, SIGINT - Cancel the run; unfinished platforms are reported FAILED

CONFIGURATION:
    Configuration file: $SLOTCAST_CONFIG or ~/.config/slotcast/config.toml
    Access tokens are read from the variables named by each platform's
    token_env (IG_ACCESS_TOKEN, META_ACCESS_TOKEN, YT_ACCESS_TOKEN,
    X_ACCESS_TOKEN, TIKTOK_ACCESS_TOKEN by default). A platform without its
    token is disabled. SLOT_FILTER is the same as --slot; an empty value
    means no filter.

EXIT CODES:
    0 - Every platform succeeded or was skipped
    1 - At least one platform failed, or a runtime error
    2 - Configuration error
    3 - Invalid command-line input
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run only these slots, regardless of time (repeatable or comma-separated)
    #[arg(long = "slot", value_name = "ID", env = "SLOT_FILTER", value_delimiter = ',')]
    slots: Vec<String>,

    /// Evaluate the schedule at this RFC 3339 instant instead of now
    #[arg(long, value_name = "RFC3339")]
    now: Option<String>,

    /// Ignore the ledger and run slots that already ran today
    #[arg(long)]
    force: bool,

    /// Cancel the run after this long, e.g. "20m"
    #[arg(long, value_name = "DURATION")]
    deadline: Option<String>,

    /// Output format for the run summary
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<SlotcastError>()
                .map_or(1, SlotcastError::exit_code);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let now = parse_now(cli.now.as_deref())?;
    let deadline = parse_deadline(cli.deadline.as_deref())?;
    let offset = config.schedule.offset().map_err(SlotcastError::from)?;
    let local_now = localize(now, offset);
    let run_date = local_now.date_naive();

    let ledger = Ledger::new(&config.ledger.path).await?;

    // An empty SLOT_FILTER means no filter
    let selected: Vec<String> = cli
        .slots
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let slots = if selected.is_empty() {
        let already_ran = if cli.force {
            Default::default()
        } else {
            ledger.slots_run_on(run_date).await?
        };
        due_slots(local_now, &config.slots, config.schedule.tolerance, &already_ran)
            .map_err(SlotcastError::from)?
    } else {
        info!(slots = ?selected, "Running selected slots");
        select_named(&config.slots, &selected).map_err(SlotcastError::from)?
    };

    if slots.is_empty() {
        info!(now = %local_now, "No slots due");
        print_report(cli.format, &Default::default())?;
        return Ok(0);
    }

    for platform in PlatformKind::ALL {
        if let PlatformStatus::MissingToken(var) = config.platform_status(platform) {
            warn!(platform = %platform, token_env = %var, "Token missing, platform disabled for this run");
        }
    }

    let publishers = build_publishers(&config).map_err(SlotcastError::from)?;
    let root = shellexpand::tilde(&config.source.root).to_string();
    let resolver = DirectorySource::new(root, config.source.public_base_url.as_deref())
        .map_err(SlotcastError::from)?
        .with_offset(offset);
    let orchestrator = Orchestrator::new(
        publishers,
        Arc::new(resolver),
        PlatformPolicy::from_config(&config),
    );

    let cancel = CancellationToken::new();
    setup_signal_handlers(cancel.clone())?;
    if let Some(limit) = deadline {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!(deadline = %humantime::format_duration(limit), "Run deadline reached, cancelling");
            token.cancel();
        });
    }

    info!(
        slots = slots.len(),
        date = %run_date,
        "Starting run"
    );
    let report = orchestrator.run(&slots, &cancel).await;

    if let Err(e) = ledger.record_summary(run_date, &report.summary).await {
        error!(error = %e, "Failed to record run in ledger");
    }

    for line in report.summary.render().lines() {
        info!("RUN SUMMARY {}", line);
    }
    print_report(cli.format, &report)?;

    Ok(report.summary.exit_code())
}

fn parse_now(raw: Option<&str>) -> Result<DateTime<Utc>, SlotcastError> {
    match raw {
        None => Ok(Utc::now()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SlotcastError::InvalidInput(format!("--now '{}': {}", raw, e))),
    }
}

fn parse_deadline(raw: Option<&str>) -> Result<Option<Duration>, SlotcastError> {
    raw.map(|raw| {
        humantime::parse_duration(raw)
            .map_err(|e| SlotcastError::InvalidInput(format!("--deadline '{}': {}", raw, e)))
    })
    .transpose()
}

fn print_report(format: OutputFormat, report: &libslotcast::RunReport) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => println!("{}", report.summary.render()),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Cancel the run on SIGINT/SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(cancel: CancellationToken) -> Result<(), SlotcastError> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| SlotcastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, cancelling run");
            cancel.cancel();
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_cancel: CancellationToken) -> Result<(), SlotcastError> {
    Ok(())
}
