pub mod calendar;
pub mod config;
pub mod models;
pub mod navigator;
pub mod notifiers;
pub mod orchestrator;
pub mod scheduler;
pub mod scraper;
pub mod tracker;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use orchestrator::{ScanOrchestrator, ScanState};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
