use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::calendar::{CalendarExtractor, Extraction};
use crate::config::AppConfig;
use crate::models::{CalendarDate, Credentials, ScanResult, ScheduleTarget, Watermark};
use crate::navigator::{PortalUrls, SessionNavigator};
use crate::notifiers::{NotificationEvent, NotificationResult, Notifier, TEST_MESSAGE};
use crate::scraper::{save_screenshot, BrowserSession, SessionFactory};
use crate::tracker::{evaluate, Verdict};
use crate::utils::error::{AppError, Result};

/// Consecutive capped extractions before the widget is reported as changed.
pub const CAP_HIT_WARNING_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Navigating,
    Extracting,
    Evaluating,
    Notifying,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Navigating => "navigating",
            CyclePhase::Extracting => "extracting",
            CyclePhase::Evaluating => "evaluating",
            CyclePhase::Notifying => "notifying",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub cycles: u64,
    pub failures: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub consecutive_cap_hits: u32,
}

/// Everything carried from one cycle to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub watermark: Watermark,
    pub stats: ScanStats,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    NoneOpen,
    NotImproved { earliest: CalendarDate },
    Improved { earliest: CalendarDate, notified: bool },
    Failed { phase: CyclePhase, kind: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub months_scanned: usize,
    pub dates_found: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Failed { .. })
    }
}

/// Runs scan cycles: session, navigation, extraction, evaluation and,
/// on improvement, one alert.
pub struct ScanOrchestrator {
    sessions: Box<dyn SessionFactory>,
    notifier: Box<dyn Notifier>,
    recipient: String,
    credentials: Credentials,
    target: ScheduleTarget,
    navigator: SessionNavigator,
    extractor: CalendarExtractor,
    screenshot_dir: Option<PathBuf>,
}

impl ScanOrchestrator {
    pub fn new(
        sessions: Box<dyn SessionFactory>,
        notifier: Box<dyn Notifier>,
        recipient: impl Into<String>,
        credentials: Credentials,
        target: ScheduleTarget,
        navigator: SessionNavigator,
        extractor: CalendarExtractor,
    ) -> Self {
        Self {
            sessions,
            notifier,
            recipient: recipient.into(),
            credentials,
            target,
            navigator,
            extractor,
            screenshot_dir: None,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        sessions: Box<dyn SessionFactory>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self> {
        let urls = PortalUrls::new(&config.portal.base_url)?;
        let navigator = SessionNavigator::new(urls, config.scraper.element_timeout());
        let extractor = CalendarExtractor::new(config.scraper.page_turn_delay());

        let orchestrator = Self::new(
            sessions,
            notifier,
            config.telegram.chat_id.clone(),
            config.credentials(),
            config.schedule_target()?,
            navigator,
            extractor,
        );

        Ok(if config.screenshots.enabled {
            orchestrator.with_screenshots(&config.screenshots.directory)
        } else {
            orchestrator
        })
    }

    /// Capture a PNG into `dir` whenever a cycle fails with a live session.
    pub fn with_screenshots(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    /// Sends the fixed greeting to the configured recipient.
    pub async fn send_test_message(&self) -> Result<NotificationResult> {
        self.notifier.send(&self.recipient, TEST_MESSAGE).await
    }

    /// One full cycle. Never fails: errors are logged, counted and reported,
    /// and the watermark only moves on a successful evaluation.
    pub async fn run_cycle(&self, state: ScanState) -> (ScanState, CycleReport) {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("scan_cycle", cycle = %cycle_id);
        self.cycle(state, cycle_id).instrument(span).await
    }

    async fn cycle(&self, mut state: ScanState, cycle_id: Uuid) -> (ScanState, CycleReport) {
        let started_at = Utc::now();
        let clock = Instant::now();
        state.stats.cycles += 1;
        counter!("slotwatch_cycles_total").increment(1);
        tracing::info!(watermark = %state.watermark, "scan cycle started");

        let scan = self.scan().await;

        let mut report = CycleReport {
            cycle_id,
            started_at,
            duration_ms: 0,
            months_scanned: 0,
            dates_found: 0,
            outcome: CycleOutcome::NoneOpen,
        };

        report.outcome = match scan {
            Err((phase, err)) => {
                state.stats.failures += 1;
                counter!("slotwatch_cycle_failures_total", "kind" => err.kind()).increment(1);
                tracing::error!(%phase, kind = err.kind(), error = %err, "scan cycle failed");
                CycleOutcome::Failed {
                    phase,
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                }
            }
            Ok(extraction) => {
                report.months_scanned = extraction.months_scanned;
                report.dates_found = extraction.dates.len();
                self.track_cap_hits(&mut state.stats, &extraction);
                self.settle(&mut state, ScanResult::from_dates(extraction.dates)).await
            }
        };

        report.duration_ms = clock.elapsed().as_millis() as u64;
        tracing::info!(
            duration_ms = report.duration_ms,
            watermark = %state.watermark,
            "scan cycle finished"
        );
        (state, report)
    }

    /// Opens a session, navigates and extracts. The session is closed on
    /// every path out of here.
    async fn scan(&self) -> std::result::Result<Extraction, (CyclePhase, AppError)> {
        tracing::debug!(phase = %CyclePhase::Navigating, "opening browser session");
        let mut session = self
            .sessions
            .open()
            .await
            .map_err(|e| (CyclePhase::Navigating, e))?;

        let result = self.drive(session.as_ref()).await;

        if result.is_err() {
            self.capture_failure(session.as_ref()).await;
        }
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "browser session did not close cleanly");
        }

        result
    }

    async fn drive(&self, session: &dyn BrowserSession) -> std::result::Result<Extraction, (CyclePhase, AppError)> {
        self.navigator
            .navigate(session, &self.credentials, &self.target)
            .await
            .map_err(|e| (CyclePhase::Navigating, e))?;

        tracing::debug!(phase = %CyclePhase::Extracting, "reading calendar");
        let extraction = self
            .extractor
            .extract(session)
            .await
            .map_err(|e| (CyclePhase::Extracting, e))?;

        tracing::info!(
            months = extraction.months_scanned,
            open_days = extraction.dates.len(),
            "calendar extracted"
        );
        Ok(extraction)
    }

    async fn capture_failure(&self, session: &dyn BrowserSession) {
        let Some(dir) = &self.screenshot_dir else {
            return;
        };
        let saved = match session.screenshot().await {
            Ok(png) => save_screenshot(dir, &png),
            Err(err) => Err(err),
        };
        match saved {
            Ok(path) => tracing::info!(path = %path.display(), "failure screenshot saved"),
            Err(err) => tracing::warn!(error = %err, "failure screenshot not captured"),
        }
    }

    fn track_cap_hits(&self, stats: &mut ScanStats, extraction: &Extraction) {
        if !extraction.hit_cap {
            stats.consecutive_cap_hits = 0;
            return;
        }

        stats.consecutive_cap_hits += 1;
        counter!("slotwatch_paging_cap_hits_total").increment(1);
        if stats.consecutive_cap_hits >= CAP_HIT_WARNING_THRESHOLD {
            tracing::warn!(
                consecutive = stats.consecutive_cap_hits,
                "calendar never disabled its next-month control; widget behaviour changed?"
            );
        }
    }

    async fn settle(&self, state: &mut ScanState, scan: ScanResult) -> CycleOutcome {
        let candidates = match scan {
            ScanResult::Dates(dates) => dates,
            ScanResult::Empty => Default::default(),
        };

        let previous = state.watermark;
        let (watermark, verdict) = evaluate(&candidates, previous);
        state.watermark = watermark;
        tracing::debug!(phase = %CyclePhase::Evaluating, ?verdict, "scan evaluated");

        match (verdict, candidates.first().copied()) {
            (Verdict::Improved(earliest), _) => {
                tracing::info!(%earliest, previous = %previous, "earlier appointment found");
                let notified = self
                    .notify(&mut state.stats, NotificationEvent::new(earliest))
                    .await;
                CycleOutcome::Improved { earliest, notified }
            }
            (Verdict::NotImproved, Some(earliest)) => {
                tracing::info!(%earliest, best = %previous, "no earlier appointment");
                CycleOutcome::NotImproved { earliest }
            }
            _ => {
                tracing::info!("no open appointment days");
                CycleOutcome::NoneOpen
            }
        }
    }

    /// Single attempt. A failed send keeps the new watermark.
    async fn notify(&self, stats: &mut ScanStats, event: NotificationEvent) -> bool {
        tracing::debug!(phase = %CyclePhase::Notifying, recipient = %self.recipient, "sending alert");
        let delivered = match self.notifier.send(&self.recipient, &event.message()).await {
            Ok(result) if result.success => Ok(()),
            Ok(result) => Err(AppError::NotificationFailure(
                result.error.unwrap_or_else(|| "notifier reported failure".to_string()),
            )),
            Err(err) => Err(err),
        };

        match delivered {
            Ok(()) => {
                stats.notifications_sent += 1;
                counter!("slotwatch_notifications_total").increment(1);
                true
            }
            Err(err) => {
                stats.notification_failures += 1;
                counter!("slotwatch_notification_failures_total").increment(1);
                tracing::error!(kind = err.kind(), error = %err, "alert not delivered");
                false
            }
        }
    }
}
