//! CalDAV implementation of [`CalendarSource`](crate::CalendarSource).
//!
//! Talks WebDAV/CalDAV to the upstream server:
//!
//! - HTTP Basic authentication (iCloud-style app passwords)
//! - PROPFIND for calendar discovery
//! - REPORT calendar-query with time-range filter, so the server expands
//!   recurring events
//! - ICS parsing into naive wall-clock occurrences

mod auth;
mod client;
mod config;
mod ics;
mod provider;
mod xml;

pub use config::CalDavConfig;
pub use provider::CalDavProvider;
