//! Shared utilities
//!
//! Error aggregation, the typed event bus and owned background tasks.

pub(crate) mod duration_ms;
pub mod error;
pub mod events;
pub mod tasks;

pub use error::{AppError, AppResult, ErrorResponse};
pub use events::{BusEvent, EventBus, ListenerId};
pub use tasks::TaskHandle;
