//! HTTP plumbing shared by the platform publishers
//!
//! Maps transport errors and HTTP statuses onto [`PublishError`] so that the
//! retry policy sees one classification for every platform: network
//! failures, 408, 429 and 5xx are transient; other 4xx are permanent.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::HttpSettings;
use crate::error::{ConfigError, PublishError};
use crate::types::PlatformKind;

/// Build the shared client with connect and request timeouts
pub fn build_client(settings: &HttpSettings) -> Result<Client, ConfigError> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .user_agent(concat!("slotcast/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("failed to build HTTP client: {}", e)))
}

/// Classify a transport-level error
pub fn transport_error(platform: PlatformKind, context: &str, err: reqwest::Error) -> PublishError {
    let message = format!("{} {}: {}", platform, context, err);
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        PublishError::Transient(message)
    } else if err.is_decode() {
        PublishError::Permanent(format!("{} {}: unexpected response body: {}", platform, context, err))
    } else {
        PublishError::Transient(message)
    }
}

/// Error envelope returned by the Graph API
#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    is_transient: bool,
}

// Graph rate-limit codes: app, user, page and custom-level throttling
const GRAPH_THROTTLE_CODES: [i64; 4] = [4, 17, 32, 613];

/// Classify a non-success response from its status and body
pub fn status_error(platform: PlatformKind, context: &str, status: StatusCode, body: &str) -> PublishError {
    if let Ok(envelope) = serde_json::from_str::<GraphErrorEnvelope>(body) {
        let graph = envelope.error;
        let message = format!(
            "{} {}: HTTP {} (code {}): {}",
            platform,
            context,
            status.as_u16(),
            graph.code.map_or_else(|| "-".to_string(), |c| c.to_string()),
            graph.message
        );
        let throttled = graph.code.is_some_and(|c| GRAPH_THROTTLE_CODES.contains(&c));
        if graph.is_transient || throttled || is_transient_status(status) {
            return PublishError::Transient(message);
        }
        return PublishError::Permanent(message);
    }

    let snippet: String = body.chars().take(300).collect();
    let message = format!("{} {}: HTTP {}: {}", platform, context, status.as_u16(), snippet.trim());
    if is_transient_status(status) {
        PublishError::Transient(message)
    } else {
        PublishError::Permanent(message)
    }
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Pass successful responses through, classify the rest
pub async fn check_response(
    platform: PlatformKind,
    context: &str,
    response: Response,
) -> Result<Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(platform = %platform, status = status.as_u16(), body = %body, "{} failed", context);
    Err(status_error(platform, context, status, &body))
}

/// Check the status and decode a JSON body
pub async fn json_response<T: DeserializeOwned>(
    platform: PlatformKind,
    context: &str,
    response: Response,
) -> Result<T, PublishError> {
    let response = check_response(platform, context, response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| transport_error(platform, context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_plain_body_errors() {
        let err = status_error(PlatformKind::YouTube, "upload", StatusCode::SERVICE_UNAVAILABLE, "busy");
        assert!(matches!(err, PublishError::Transient(_)));
        assert!(err.detail().contains("HTTP 503"));

        let err = status_error(PlatformKind::YouTube, "upload", StatusCode::FORBIDDEN, "quotaExceeded");
        assert!(matches!(err, PublishError::Permanent(_)));
    }

    #[test]
    fn test_graph_is_transient_flag() {
        let body = r#"{"error":{"message":"An unexpected error has occurred","code":2,"is_transient":true}}"#;
        let err = status_error(PlatformKind::Instagram, "create container", StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, PublishError::Transient(_)));
        assert!(err.detail().contains("code 2"));
    }

    #[test]
    fn test_graph_throttle_code() {
        let body = r#"{"error":{"message":"Application request limit reached","code":4}}"#;
        let err = status_error(PlatformKind::Facebook, "start upload", StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, PublishError::Transient(_)));
    }

    #[test]
    fn test_graph_auth_error_is_permanent() {
        let body = r#"{"error":{"message":"Error validating access token","type":"OAuthException","code":190}}"#;
        let err = status_error(PlatformKind::Instagram, "publish", StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, PublishError::Permanent(_)));
        assert!(err.detail().contains("Error validating access token"));
    }
}
