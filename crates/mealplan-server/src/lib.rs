//! Calendar sync core for the household meal planner.
//!
//! The service keeps a SQLite cache of calendar events around today,
//! refreshed in the background and extended on demand when a request falls
//! outside the synchronized window. Session tokens are revalidated against
//! an OIDC provider, and cache refreshes are fanned out to SSE subscribers.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod selection;
pub mod service;
pub mod session;
pub mod store;

pub use broadcast::{EventBroadcaster, PING_FRAME, Subscription, ready_frame, sse_frame};
pub use cache::{CacheStatus, EventRangeCache};
pub use config::{NetworkErrorPolicy, OidcConfig, Settings};
pub use error::{ServerError, ServerResult};
pub use scheduler::{RefreshScheduler, SchedulerConfig, SchedulerHandle, SchedulerState};
pub use selection::SelectionCache;
pub use service::{CalendarListing, CalendarService, RefreshOutcome};
pub use session::{Session, TokenValidator};
pub use store::EventStore;
