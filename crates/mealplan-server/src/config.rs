//! Server configuration.
//!
//! Settings are read from `MEALPLAN_*` environment variables with sane
//! defaults, and every knob has a builder method so tests can construct
//! configurations without touching the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between scheduled background refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Default time-to-live for the resolved calendar selection.
pub const DEFAULT_SELECTION_TTL: Duration = Duration::from_secs(10 * 60);

/// Default interval after which a session token is revalidated.
pub const DEFAULT_REVALIDATION_INTERVAL: Duration = Duration::from_secs(60);

/// Default timeout for identity-provider requests.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);

/// OIDC identity provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer base URL, e.g. `https://auth.example.com/realms/home`.
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
}

impl OidcConfig {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Userinfo endpoint derived from the issuer.
    pub fn userinfo_url(&self) -> String {
        format!("{}/userinfo", self.issuer.trim_end_matches('/'))
    }

    /// Token endpoint derived from the issuer.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.issuer.trim_end_matches('/'))
    }
}

/// What to do when the identity provider cannot be reached at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorPolicy {
    /// Treat the session as still valid so a provider outage does not log
    /// everyone out.
    #[default]
    FailOpen,
    /// Treat the session as invalid.
    FailClosed,
}

/// Top-level server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// CalDAV principal or collection URL.
    pub caldav_url: String,
    pub caldav_username: Option<String>,
    pub caldav_password: Option<String>,
    /// Calendar display names to sync. Empty means "first available".
    pub calendar_names: Vec<String>,
    /// Path of the SQLite cache database.
    pub database_path: PathBuf,
    pub refresh_interval: Duration,
    pub selection_ttl: Duration,
    pub revalidation_interval: Duration,
    pub identity_timeout: Duration,
    pub oidc: Option<OidcConfig>,
    pub network_error_policy: NetworkErrorPolicy,
    /// Log per-phase timings of cache operations at debug level.
    pub debug_timing: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            caldav_url: String::new(),
            caldav_username: None,
            caldav_password: None,
            calendar_names: Vec::new(),
            database_path: PathBuf::from("mealplan-cache.db"),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            selection_ttl: DEFAULT_SELECTION_TTL,
            revalidation_interval: DEFAULT_REVALIDATION_INTERVAL,
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
            oidc: None,
            network_error_policy: NetworkErrorPolicy::default(),
            debug_timing: false,
        }
    }
}

impl Settings {
    /// Builds settings from `MEALPLAN_*` environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(url) = env::var("MEALPLAN_CALDAV_URL") {
            settings.caldav_url = url;
        }
        settings.caldav_username = env::var("MEALPLAN_CALDAV_USERNAME").ok().filter(|s| !s.is_empty());
        settings.caldav_password = env::var("MEALPLAN_CALDAV_PASSWORD").ok().filter(|s| !s.is_empty());

        if let Ok(names) = env::var("MEALPLAN_CALENDAR_NAMES") {
            settings.calendar_names = parse_calendar_names(&names);
        }
        if let Ok(path) = env::var("MEALPLAN_DB_PATH") {
            settings.database_path = PathBuf::from(path);
        }
        if let Some(secs) = env_secs("MEALPLAN_REFRESH_INTERVAL_SECS") {
            settings.refresh_interval = secs;
        }
        if let Some(secs) = env_secs("MEALPLAN_SELECTION_TTL_SECS") {
            settings.selection_ttl = secs;
        }
        if let Some(secs) = env_secs("MEALPLAN_REVALIDATION_INTERVAL_SECS") {
            settings.revalidation_interval = secs;
        }

        if let (Ok(issuer), Ok(client_id), Ok(client_secret)) = (
            env::var("MEALPLAN_OIDC_ISSUER"),
            env::var("MEALPLAN_OIDC_CLIENT_ID"),
            env::var("MEALPLAN_OIDC_CLIENT_SECRET"),
        ) {
            settings.oidc = Some(OidcConfig::new(issuer, client_id, client_secret));
        }

        if env_flag("MEALPLAN_FAIL_CLOSED") {
            settings.network_error_policy = NetworkErrorPolicy::FailClosed;
        }
        settings.debug_timing = env_flag("MEALPLAN_DEBUG_TIMING");

        settings
    }

    pub fn with_caldav_url(mut self, url: impl Into<String>) -> Self {
        self.caldav_url = url.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.caldav_username = Some(username.into());
        self.caldav_password = Some(password.into());
        self
    }

    pub fn with_calendar_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.calendar_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_selection_ttl(mut self, ttl: Duration) -> Self {
        self.selection_ttl = ttl;
        self
    }

    pub fn with_oidc(mut self, oidc: OidcConfig) -> Self {
        self.oidc = Some(oidc);
        self
    }

    pub fn with_network_error_policy(mut self, policy: NetworkErrorPolicy) -> Self {
        self.network_error_policy = policy;
        self
    }

    /// Whether CalDAV credentials are configured.
    pub fn has_caldav_credentials(&self) -> bool {
        !self.caldav_url.is_empty()
            && self.caldav_username.is_some()
            && self.caldav_password.is_some()
    }
}

/// Splits a comma-separated list of calendar names, trimming whitespace
/// and dropping empty entries.
pub fn parse_calendar_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name).ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.refresh_interval, Duration::from_secs(1800));
        assert_eq!(settings.selection_ttl, Duration::from_secs(600));
        assert_eq!(settings.revalidation_interval, Duration::from_secs(60));
        assert_eq!(settings.network_error_policy, NetworkErrorPolicy::FailOpen);
        assert!(settings.calendar_names.is_empty());
        assert!(!settings.has_caldav_credentials());
    }

    #[test]
    fn parse_names_trims_and_drops_empty() {
        assert_eq!(
            parse_calendar_names("Family, Meals ,,  School "),
            vec!["Family", "Meals", "School"]
        );
        assert!(parse_calendar_names("").is_empty());
        assert!(parse_calendar_names(" , ").is_empty());
    }

    #[test]
    fn builder_chain() {
        let settings = Settings::default()
            .with_caldav_url("https://caldav.example.com/")
            .with_credentials("alice", "secret")
            .with_calendar_names(["Family"])
            .with_refresh_interval(Duration::from_secs(60));

        assert!(settings.has_caldav_credentials());
        assert_eq!(settings.calendar_names, vec!["Family"]);
        assert_eq!(settings.refresh_interval, Duration::from_secs(60));
    }

    #[test]
    fn oidc_endpoint_urls() {
        let oidc = OidcConfig::new("https://auth.example.com/realms/home/", "mealplan", "s3cret");
        assert_eq!(
            oidc.userinfo_url(),
            "https://auth.example.com/realms/home/userinfo"
        );
        assert_eq!(oidc.token_url(), "https://auth.example.com/realms/home/token");
    }
}
