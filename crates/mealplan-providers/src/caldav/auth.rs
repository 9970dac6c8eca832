//! HTTP Basic authentication (RFC 7617).
//!
//! Apple's CalDAV endpoint authenticates app-specific passwords with Basic
//! auth, so that is all the client carries.

use base64::Engine;

/// Generates a Basic Authorization header value.
pub fn basic_auth(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
    format!("Basic {}", encoded)
}
