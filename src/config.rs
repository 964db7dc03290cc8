use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

use crate::models::{is_valid_target, Credentials, ScheduleTarget};
use crate::utils::error::{AppError, Result};

/// Flat variable names from older `.env` files. They take precedence
/// over the prefixed `SLOTWATCH__*` form.
const LEGACY_VARS: &[(&str, &str)] = &[
    ("BOT_TOKEN", "telegram.bot_token"),
    ("CHAT_ID", "telegram.chat_id"),
    ("VISA_USER", "portal.identity"),
    ("VISA_PASS", "portal.secret"),
    ("PROFILE_ID", "portal.schedule_target"),
];

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub portal: PortalConfig,
    #[validate(nested)]
    pub telegram: TelegramConfig,
    #[validate(nested)]
    pub scraper: ScraperConfig,
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    pub screenshots: ScreenshotConfig,
    pub logging: LoggingConfig,
    #[validate(nested)]
    pub metrics: MetricsConfig,
}

#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct PortalConfig {
    #[validate(url(message = "portal.base_url must be a valid URL"))]
    pub base_url: String,
    #[validate(length(min = 1, message = "portal.identity must not be empty"))]
    pub identity: String,
    #[validate(length(min = 1, message = "portal.secret must not be empty"))]
    pub secret: String,
    #[validate(custom(function = "validate_schedule_target"))]
    pub schedule_target: String,
}

#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct TelegramConfig {
    #[validate(length(min = 1, message = "telegram.bot_token must not be empty"))]
    pub bot_token: String,
    #[validate(length(min = 1, message = "telegram.chat_id must not be empty"))]
    pub chat_id: String,
    #[validate(url(message = "telegram.api_base must be a valid URL"))]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScraperConfig {
    pub headless: bool,
    pub chrome_path: Option<String>,
    #[validate(range(min = 1, max = 600))]
    pub element_timeout_secs: u64,
    #[validate(range(min = 10, max = 10_000))]
    pub poll_interval_ms: u64,
    #[validate(range(max = 10_000))]
    pub page_turn_delay_ms: u64,
    #[validate(range(min = 320))]
    pub window_width: u32,
    #[validate(range(min = 240))]
    pub window_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    #[validate(range(min = 1, max = 1440, message = "scheduler.interval_minutes must be between 1 and 1440"))]
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    pub enabled: bool,
    pub directory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MetricsConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub port: u16,
}

fn validate_schedule_target(value: &str) -> std::result::Result<(), ValidationError> {
    if is_valid_target(value) {
        Ok(())
    } else {
        let mut err = ValidationError::new("schedule_target");
        err.message = Some("portal.schedule_target must be letters, digits, '-' or '_'".into());
        Err(err)
    }
}

impl std::fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_url", &self.base_url)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("schedule_target", &self.schedule_target)
            .finish()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl AppConfig {
    /// Defaults, then `config/default` and `config/local` (both optional),
    /// then the process environment.
    pub fn from_env() -> Result<Self> {
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        let mut config = Self::from_builder(builder, env::vars().collect())?;

        // Add Chrome path from environment if not set
        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        Ok(config)
    }

    /// Same layering as [`AppConfig::from_env`] minus the files, reading
    /// variables from the given map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::from_builder(Self::defaults()?, vars)
    }

    fn defaults() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("portal.base_url", "https://ais.usvisa-info.com/en-ca/niv")?
            .set_default("telegram.api_base", "https://api.telegram.org")?
            .set_default("scraper.headless", true)?
            .set_default("scraper.element_timeout_secs", 20)?
            .set_default("scraper.poll_interval_ms", 100)?
            .set_default("scraper.page_turn_delay_ms", 300)?
            .set_default("scraper.window_width", 1200)?
            .set_default("scraper.window_height", 800)?
            .set_default("scheduler.interval_minutes", 30)?
            .set_default("screenshots.enabled", false)?
            .set_default("screenshots.directory", "data/screenshots")?
            .set_default("logging.level", "info")?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9001)
    }

    fn from_builder(
        builder: ConfigBuilder<DefaultState>,
        vars: HashMap<String, String>,
    ) -> Result<Self> {
        let mut builder = builder.add_source(
            Environment::with_prefix("SLOTWATCH")
                .separator("__")
                .source(Some(vars.clone())),
        );

        for (var, key) in LEGACY_VARS {
            builder = builder.set_override_option(*key, vars.get(*var).cloned())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;

        let base = Url::parse(&self.portal.base_url)
            .map_err(|e| AppError::Validation(format!("portal.base_url: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(AppError::Validation(
                "portal.base_url cannot be used as a base URL".into(),
            ));
        }

        if self.screenshots.enabled && self.screenshots.directory.trim().is_empty() {
            return Err(AppError::Validation(
                "screenshots.directory must be set when screenshots are enabled".into(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(AppError::Validation(format!(
                "logging.level '{}' is not a tracing level",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.portal.identity, &self.portal.secret)
    }

    pub fn schedule_target(&self) -> Result<ScheduleTarget> {
        ScheduleTarget::new(self.portal.schedule_target.clone())
    }
}

impl ScraperConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn page_turn_delay(&self) -> Duration {
        Duration::from_millis(self.page_turn_delay_ms)
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}
