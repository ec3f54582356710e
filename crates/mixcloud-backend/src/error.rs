//! Error taxonomy and classification
//!
//! Every condition the client knows how to act on is an [`OAuthError`] tagged
//! with an [`ErrorKind`]. Raw transport failures that match none of the known
//! patterns pass through unchanged as [`ApiError::Transport`].

use std::time::Duration;
use thiserror::Error;

use crate::mixcloud::http::TransportError;

/// Boxed error used as the optional cause of an [`OAuthError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Command users run to (re)authorize the application
pub const REAUTH_COMMAND: &str = "mixcloud-updater auth";

/// Show URL format accepted by the client
pub const EXPECTED_SHOW_URL: &str = "https://www.mixcloud.com/<user>/<show>/";

/// Phrases identifying a rejected refresh credential
const INVALID_GRANT_PHRASES: &[&str] = &[
    "invalid_grant",
    "invalid refresh token",
    "refresh token is invalid",
    "refresh token expired",
    "refresh token has been revoked",
    "token has been expired or revoked",
];

/// Phrases identifying a rejected access credential
const AUTH_PHRASES: &[&str] = &[
    "unauthorized",
    "authentication failed",
    "invalid_token",
    "invalid access token",
    "oauthexception",
];

/// Phrases identifying transient network conditions
const NETWORK_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "refused",
    "reset",
    "unreachable",
    "temporary",
    "temporarily",
    "broken pipe",
    "dns error",
    "failed to lookup address",
];

/// Closed set of error kinds the client distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRefreshToken,
    NetworkFailure,
    ConfigWriteFailure,
    TokenExpired,
    AuthenticationFailed,
    RateLimited,
    InvalidShowUrl,
    ShowNotFound,
    DescriptionTooLong,
    ApiRequestFailed,
    RetryExhausted,
    Cancelled,
}

impl ErrorKind {
    /// Default retryability of the kind.
    ///
    /// `ApiRequestFailed` is terminal by default; its constructor decides per
    /// status code.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkFailure | Self::RateLimited | Self::ConfigWriteFailure
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRefreshToken => "invalid_refresh_token",
            Self::NetworkFailure => "network_failure",
            Self::ConfigWriteFailure => "config_write_failure",
            Self::TokenExpired => "token_expired",
            Self::AuthenticationFailed => "authentication_failed",
            Self::RateLimited => "rate_limited",
            Self::InvalidShowUrl => "invalid_show_url",
            Self::ShowNotFound => "show_not_found",
            Self::DescriptionTooLong => "description_too_long",
            Self::ApiRequestFailed => "api_request_failed",
            Self::RetryExhausted => "retry_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified OAuth/API failure
///
/// Immutable once built: the builder-style `with_*` methods consume and
/// return the error, so construction happens in one expression.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct OAuthError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    status: Option<u16>,
    retry_after: Option<Duration>,
    #[source]
    cause: Option<BoxError>,
}

impl OAuthError {
    /// Creates an error with the kind's default retryability
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            status: None,
            retry_after: None,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn authentication_failed(detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::AuthenticationFailed,
            format!("Authentication failed: {}", detail),
        )
    }

    pub fn invalid_refresh_token(detail: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidRefreshToken,
            format!("Refresh token rejected: {}", detail),
        )
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::new(ErrorKind::RateLimited, "Rate limited by Mixcloud")
            .with_status(429)
            .with_retry_after(retry_after)
    }

    pub fn network(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::NetworkFailure, format!("Network failure: {}", detail))
    }

    pub fn config_write(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::ConfigWriteFailure, "Failed to persist token").with_cause(cause)
    }

    pub fn token_expired() -> Self {
        Self::new(
            ErrorKind::TokenExpired,
            "Access token expired and no refresh token is available",
        )
    }

    pub fn invalid_show_url(url: &str, reason: &str) -> Self {
        Self::new(
            ErrorKind::InvalidShowUrl,
            format!("Invalid show URL '{}': {}", url, reason),
        )
    }

    pub fn show_not_found(key: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::ShowNotFound, format!("Show not found: {}", key)).with_status(404)
    }

    pub fn description_too_long(length: usize, limit: usize) -> Self {
        Self::new(
            ErrorKind::DescriptionTooLong,
            format!(
                "Description is {} characters, Mixcloud allows at most {}",
                length, limit
            ),
        )
    }

    /// A non-success API status. 502/503/504 are always retryable, 500 only
    /// when the request was idempotent.
    pub fn api_request_failed(status: u16, body: &str, idempotent: bool) -> Self {
        let retryable = match status {
            502..=504 => true,
            500 => idempotent,
            _ => false,
        };
        let message = if body.is_empty() {
            format!("Mixcloud API request failed with status {}", status)
        } else {
            format!("Mixcloud API request failed with status {}: {}", status, body)
        };
        Self::new(ErrorKind::ApiRequestFailed, message)
            .with_status(status)
            .with_retryable(retryable)
    }

    pub fn retry_exhausted(attempts: u32, last: impl Into<BoxError>) -> Self {
        Self::new(
            ErrorKind::RetryExhausted,
            format!("Giving up after {} attempts", attempts),
        )
        .with_cause(last)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Operation cancelled")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Actionable advice to show next to the error message, if any
    pub fn user_hint(&self) -> Option<String> {
        match self.kind {
            ErrorKind::AuthenticationFailed
            | ErrorKind::InvalidRefreshToken
            | ErrorKind::TokenExpired => Some(format!(
                "Run `{}` to authorize again.",
                REAUTH_COMMAND
            )),
            ErrorKind::RateLimited => Some(
                "Mixcloud is throttling requests; wait a while and try again later.".to_string(),
            ),
            ErrorKind::InvalidShowUrl => {
                Some(format!("Expected a show URL like {}", EXPECTED_SHOW_URL))
            }
            ErrorKind::RetryExhausted | ErrorKind::NetworkFailure => {
                Some("Check your network connection and try again.".to_string())
            }
            _ => None,
        }
    }
}

/// Error returned by API operations
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Failed to decode Mixcloud response: {0}")]
    Decode(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Kind of the classified error, `None` for passthrough errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::OAuth(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OAuth(e) if e.is_retryable())
    }

    pub fn as_oauth(&self) -> Option<&OAuthError> {
        match self {
            Self::OAuth(e) => Some(e),
            _ => None,
        }
    }
}

/// Maps an error message onto a kind using the ordered phrase rules
pub fn classify_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    let matches = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if matches(INVALID_GRANT_PHRASES) {
        Some(ErrorKind::InvalidRefreshToken)
    } else if matches(AUTH_PHRASES) {
        Some(ErrorKind::AuthenticationFailed)
    } else if matches(NETWORK_PHRASES) {
        Some(ErrorKind::NetworkFailure)
    } else {
        None
    }
}

/// Classifies a bare status code, treating the request as idempotent
pub fn classify_status(status: u16) -> Option<OAuthError> {
    classify_response(status, "", None, true)
}

/// Classifies a non-success response. Returns `None` for statuses that are
/// not OAuth-specific (e.g. 400, 403, 404); callers map those themselves.
pub fn classify_response(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
    idempotent: bool,
) -> Option<OAuthError> {
    match status {
        401 => Some(
            OAuthError::authentication_failed("Mixcloud rejected the access token").with_status(401),
        ),
        429 => Some(OAuthError::rate_limited(retry_after)),
        500..=599 => Some(
            OAuthError::api_request_failed(status, body, idempotent).with_retry_after(retry_after),
        ),
        _ => None,
    }
}

/// Classifies a raw transport failure, passing unmatched errors through
pub fn classify_transport(err: TransportError) -> ApiError {
    let kind = classify_message(&err.to_string()).or(match err {
        TransportError::Timeout(_) | TransportError::Connect(_) => Some(ErrorKind::NetworkFailure),
        _ => None,
    });

    match kind {
        Some(kind) => ApiError::OAuth(classified(kind, &err.to_string()).with_cause(err)),
        None => ApiError::Transport(err),
    }
}

/// Runs any error surfaced by a transport through the classifier
pub fn classify(err: ApiError) -> ApiError {
    match err {
        ApiError::Transport(e) => classify_transport(e),
        ApiError::Other(e) => {
            let message = format!("{:#}", e);
            match classify_message(&message) {
                Some(kind) => ApiError::OAuth(classified(kind, &message).with_cause(e)),
                None => ApiError::Other(e),
            }
        }
        other => other,
    }
}

fn classified(kind: ErrorKind, detail: &str) -> OAuthError {
    match kind {
        ErrorKind::InvalidRefreshToken => OAuthError::invalid_refresh_token(detail),
        ErrorKind::AuthenticationFailed => OAuthError::authentication_failed(detail),
        ErrorKind::NetworkFailure => OAuthError::network(detail),
        other => OAuthError::new(other, detail),
    }
}
