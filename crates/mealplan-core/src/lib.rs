//! Core types: events, date ranges, tracing

pub mod event;
pub mod time;
pub mod tracing;

pub use event::{CacheMetadata, CachedEvent, sort_by_start};
pub use time::{DateRange, RangeSplit, refresh_window};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
