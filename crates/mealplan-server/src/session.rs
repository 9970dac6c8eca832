//! Session state and OIDC token validation.
//!
//! Tokens are revalidated against the identity provider's userinfo endpoint
//! at most once per interval. A rejected token gets one refresh-grant
//! attempt; an unreachable provider is, by default, treated as "still
//! valid" so an identity outage does not log the household out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{NetworkErrorPolicy, OidcConfig};
use crate::error::{ServerError, ServerResult};

/// Server-side session state for one signed-in user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// When the access token last passed validation.
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Wipes all session state, signing the user out.
    pub fn clear(&mut self) {
        *self = Session::default();
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// Successful response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Validates and refreshes session access tokens against an OIDC provider.
pub struct TokenValidator {
    http: reqwest::Client,
    oidc: Option<OidcConfig>,
    interval: chrono::Duration,
    policy: NetworkErrorPolicy,
}

impl TokenValidator {
    pub fn new(
        oidc: Option<OidcConfig>,
        revalidation_interval: Duration,
        identity_timeout: Duration,
        policy: NetworkErrorPolicy,
    ) -> ServerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(identity_timeout)
            .build()
            .map_err(|e| ServerError::config(format!("identity http client: {e}")))?;
        let interval = chrono::Duration::from_std(revalidation_interval)
            .map_err(|e| ServerError::config(format!("revalidation interval: {e}")))?;

        Ok(Self {
            http,
            oidc,
            interval,
            policy,
        })
    }

    /// Whether the session's token is due for revalidation.
    ///
    /// A session with no validation timestamp is never due: the timestamp is
    /// set on login, so its absence means there is nothing to revalidate.
    pub fn needs_revalidation(&self, session: &Session) -> bool {
        match session.last_validated_at {
            Some(validated_at) => Utc::now() - validated_at > self.interval,
            None => false,
        }
    }

    /// Checks the access token against the userinfo endpoint.
    ///
    /// Returns true when the session should be kept. On a definitive
    /// rejection the refresh grant is tried once before giving up.
    pub async fn validate(&self, session: &mut Session) -> bool {
        let Some(oidc) = &self.oidc else {
            return true;
        };
        let Some(token) = session.access_token.clone() else {
            return true;
        };

        let response = self
            .http
            .get(oidc.userinfo_url())
            .bearer_auth(&token)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                session.last_validated_at = Some(Utc::now());
                true
            }
            Ok(resp)
                if resp.status() == reqwest::StatusCode::UNAUTHORIZED
                    || resp.status() == reqwest::StatusCode::FORBIDDEN =>
            {
                debug!(status = %resp.status(), "access token rejected, attempting refresh");
                self.refresh(session).await
            }
            Ok(resp) => {
                // Unexpected provider behavior is not the user's fault.
                debug!(status = %resp.status(), "unexpected userinfo status, keeping session");
                true
            }
            Err(e) => self.on_network_error("userinfo", &e),
        }
    }

    /// Exchanges the refresh token for a new access token.
    pub async fn refresh(&self, session: &mut Session) -> bool {
        let Some(oidc) = &self.oidc else {
            return false;
        };
        let Some(refresh_token) = session.refresh_token.clone() else {
            debug!("no refresh token in session");
            return false;
        };

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", oidc.client_id.as_str()),
            ("client_secret", oidc.client_secret.as_str()),
        ];

        let response = self.http.post(oidc.token_url()).form(&params).send().await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<TokenResponse>().await {
                Ok(tokens) => {
                    session.access_token = Some(tokens.access_token);
                    if let Some(new_refresh) = tokens.refresh_token {
                        session.refresh_token = Some(new_refresh);
                    }
                    session.last_validated_at = Some(Utc::now());
                    info!("access token rotated via refresh grant");
                    true
                }
                Err(e) => self.on_network_error("token response", &e),
            },
            Ok(resp) => {
                info!(status = %resp.status(), "refresh token rejected");
                false
            }
            Err(e) => self.on_network_error("token refresh", &e),
        }
    }

    /// Revalidates if due; clears the session when validation fails.
    ///
    /// Returns true when the session is (still) valid.
    pub async fn ensure_valid(&self, session: &mut Session) -> bool {
        if !self.needs_revalidation(session) {
            return true;
        }
        if self.validate(session).await {
            true
        } else {
            info!("session invalidated, clearing");
            session.clear();
            false
        }
    }

    fn on_network_error(&self, operation: &str, error: &reqwest::Error) -> bool {
        match self.policy {
            NetworkErrorPolicy::FailOpen => {
                warn!(operation, error = %error, "identity provider unreachable, keeping session");
                true
            }
            NetworkErrorPolicy::FailClosed => {
                warn!(operation, error = %error, "identity provider unreachable, rejecting session");
                false
            }
        }
    }
}
