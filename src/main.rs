use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use visa_slot_watcher::notifiers::TelegramNotifier;
use visa_slot_watcher::scheduler::{PeriodicTrigger, ShutdownSignal};
use visa_slot_watcher::scraper::ChromeLauncher;
use visa_slot_watcher::utils::{logging, metrics};
use visa_slot_watcher::{AppConfig, ScanOrchestrator, ScanState};

/// Watches the visa appointment portal and alerts on earlier dates.
#[derive(Debug, Parser)]
#[command(
    name = "visa-slot-watcher",
    version,
    about,
    after_help = "Ctrl-C stops the loop once the scan in progress has finished. \
                  Press Ctrl-C a second time to abort that scan and close the browser."
)]
struct Cli {
    /// Run a single scan cycle and exit
    #[arg(long, conflicts_with = "test_notify")]
    once: bool,

    /// Send a test message to the configured chat and exit
    #[arg(long)]
    test_notify: bool,

    /// Show the browser window
    #[arg(long)]
    headful: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = AppConfig::from_env().context("failed to load configuration")?;
    if cli.headful {
        config.scraper.headless = false;
    }

    let _log_guard = logging::init_tracing(&config.logging)?;
    info!("Starting visa-slot-watcher...");
    metrics::install_exporter(&config.metrics)?;

    let notifier = TelegramNotifier::new(&config.telegram)?;
    if cli.test_notify {
        match notifier.test_connection().await {
            Ok(is_bot) => info!(is_bot, "telegram token accepted"),
            Err(err) => tracing::warn!(error = %err, "getMe failed, trying sendMessage anyway"),
        }
    }

    let launcher = ChromeLauncher::new(config.scraper.clone());
    let orchestrator = ScanOrchestrator::from_config(&config, Box::new(launcher), Box::new(notifier))?;

    if cli.test_notify {
        let result = orchestrator
            .send_test_message()
            .await
            .context("test notification failed")?;
        info!(message_id = ?result.message_id, "test notification sent");
        return Ok(());
    }

    if cli.once {
        let (state, report) = orchestrator.run_cycle(ScanState::new()).await;
        info!(outcome = ?report.outcome, watermark = %state.watermark, "single cycle complete");
        if report.is_failure() {
            anyhow::bail!("scan cycle failed");
        }
        return Ok(());
    }

    let trigger = PeriodicTrigger::every(config.scheduler.interval());
    info!(interval_minutes = config.scheduler.interval_minutes, "scan loop started");

    let signal = ShutdownSignal::ctrl_c();
    let orchestrator = &orchestrator;
    let run = trigger.run(
        ScanState::new(),
        move |state| async move { orchestrator.run_cycle(state).await.0 },
        signal.clone().requested(),
    );

    // Dropping the loop drops the cycle's browser session, which kills Chrome.
    let state = tokio::select! {
        state = run => state,
        _ = signal.forced() => {
            tracing::warn!("scan cycle aborted");
            return Ok(());
        }
    };

    info!(
        cycles = state.stats.cycles,
        failures = state.stats.failures,
        notifications = state.stats.notifications_sent,
        watermark = %state.watermark,
        "Shutting down..."
    );

    Ok(())
}
