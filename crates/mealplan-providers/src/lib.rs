//! CalendarSource trait and the CalDAV implementation.
//!
//! This crate is the boundary to the upstream calendar service:
//!
//! - [`CalendarSource`] - the trait the cache layer consumes (and mocks)
//! - [`CalendarHandle`] - a named upstream calendar
//! - [`RawOccurrence`] - one expanded occurrence, naive wall-clock times
//! - [`CalDavProvider`] - the production CalDAV implementation
//! - [`ProviderError`] - coded error type for upstream operations
//!
//! The upstream service is treated as slow and sometimes unavailable; every
//! operation here can block on the network and returns a [`ProviderResult`].

pub mod caldav;
pub mod error;
pub mod occurrence;
pub mod source;

pub use caldav::{CalDavConfig, CalDavProvider};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use occurrence::{OccurrenceTime, RawOccurrence};
pub use source::{BoxFuture, CalendarHandle, CalendarSource};
