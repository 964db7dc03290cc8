pub mod calendar_date;
pub mod portal;
pub mod scan;

// Re-exports for convenience
pub use calendar_date::*;
pub use portal::*;
pub use scan::*;
