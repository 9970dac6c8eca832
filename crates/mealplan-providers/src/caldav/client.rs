//! HTTP client for CalDAV operations.
//!
//! Thin wrapper over `reqwest` that knows the two WebDAV verbs we need
//! (PROPFIND and REPORT), retries once with Basic auth on a 401 challenge,
//! and maps HTTP statuses to [`ProviderError`] codes.

use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, ProviderResult};

use super::auth::basic_auth;
use super::config::CalDavConfig;

/// HTTP client for CalDAV operations.
pub struct CalDavClient {
    client: Client,
    config: CalDavConfig,
}

impl CalDavClient {
    /// Creates a new CalDAV client with the given configuration.
    pub fn new(config: CalDavConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ProviderError::network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Performs a PROPFIND request (calendar discovery).
    pub async fn propfind(&self, url: &str, body: &str, depth: u8) -> ProviderResult<String> {
        self.request("PROPFIND", url, body, depth).await
    }

    /// Performs a REPORT request (calendar-query).
    pub async fn report(&self, url: &str, body: &str) -> ProviderResult<String> {
        self.request("REPORT", url, body, 1).await
    }

    /// Performs a WebDAV request, retrying once with credentials on 401.
    async fn request(&self, method: &str, url: &str, body: &str, depth: u8) -> ProviderResult<String> {
        let response = self.send(method, url, body, depth, false).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if !self.config.has_credentials() {
                return Err(ProviderError::authentication(
                    "server requires authentication but no credentials configured",
                ));
            }
            debug!("received 401, retrying with Basic auth");
            let response = self.send(method, url, body, depth, true).await?;
            return self.handle_response(response).await;
        }

        self.handle_response(response).await
    }

    async fn send(
        &self,
        method: &str,
        url: &str,
        body: &str,
        depth: u8,
        authenticate: bool,
    ) -> ProviderResult<Response> {
        let http_method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProviderError::internal(format!("invalid HTTP method: {}", method)))?;

        let mut request = self
            .client
            .request(http_method, url)
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", depth.to_string())
            .body(body.to_string());

        if authenticate {
            let (username, password) = match (&self.config.username, &self.config.password) {
                (Some(u), Some(p)) => (u.as_str(), p.as_str()),
                _ => {
                    return Err(ProviderError::authentication(
                        "credentials required but not configured",
                    ));
                }
            };
            request = request.header("Authorization", basic_auth(username, password));
        }

        trace!(method = %method, url = %url, "sending request");

        request
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("request failed: {}", e)))
    }

    /// Maps the HTTP status to an error code and extracts the body.
    async fn handle_response(&self, response: Response) -> ProviderResult<String> {
        let status = response.status();
        trace!(status = %status, "received response");

        match status {
            StatusCode::OK | StatusCode::MULTI_STATUS => response
                .text()
                .await
                .map_err(|e| ProviderError::network(format!("failed to read response: {}", e))),
            StatusCode::UNAUTHORIZED => Err(ProviderError::authentication(
                "authentication failed: invalid credentials",
            )),
            StatusCode::FORBIDDEN => Err(ProviderError::authorization("access denied to calendar")),
            StatusCode::NOT_FOUND => {
                Err(ProviderError::not_found("calendar or resource not found"))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                Err(ProviderError::rate_limited("too many requests to server"))
            }
            s if s.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::server(format!(
                    "server error ({}): {}",
                    s, body
                )))
            }
            s => {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %s, "unexpected response status");
                Err(ProviderError::invalid_response(format!(
                    "unexpected status {}: {}",
                    s, body
                )))
            }
        }
    }

    /// Returns the base URL from the configuration.
    pub fn base_url(&self) -> &str {
        self.config.url_str()
    }
}
