//! CalDAV client configuration.

use std::time::Duration;
use url::Url;

/// Default Apple CalDAV endpoint.
pub const APPLE_CALDAV_URL: &str = "https://caldav.icloud.com/";

/// Configuration for the CalDAV client.
#[derive(Debug, Clone)]
pub struct CalDavConfig {
    /// Base URL of the CalDAV server (principal or calendar home).
    pub url: Url,

    /// Account username (email for iCloud).
    pub username: Option<String>,

    /// Account password (app-specific password for iCloud).
    pub password: Option<String>,

    /// Whether to verify TLS certificates.
    pub verify_tls: bool,

    /// Request timeout.
    pub timeout: Duration,

    /// User agent string.
    pub user_agent: String,
}

impl CalDavConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a new configuration for the given server URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn new(url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(url.as_ref())?;
        Ok(Self {
            url: parsed,
            username: None,
            password: None,
            verify_tls: true,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("mealplan/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Configuration pointed at Apple's CalDAV endpoint.
    pub fn apple() -> Self {
        Self::new(APPLE_CALDAV_URL).expect("default URL is valid")
    }

    /// Sets the credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Disables TLS verification (for testing only).
    pub fn with_insecure_tls(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL as a string.
    pub fn url_str(&self) -> &str {
        self.url.as_str()
    }

    /// Returns true if credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apple_default() {
        let config = CalDavConfig::apple();
        assert_eq!(config.url_str(), APPLE_CALDAV_URL);
        assert!(!config.has_credentials());
        assert!(config.verify_tls);
    }

    #[test]
    fn credentials_builder() {
        let config = CalDavConfig::apple().with_credentials("user@example.com", "app-pass");
        assert!(config.has_credentials());
        assert_eq!(config.username.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn invalid_url_returns_error() {
        assert!(CalDavConfig::new("not a valid url").is_err());
    }
}
