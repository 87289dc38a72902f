//! OAuth error types.

use std::time::Duration;

/// Token acquisition errors.
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The client assertion is not a structurally valid compact token or
    /// its payload lacks a usable subject claim.
    #[error("invalid client assertion: {0}")]
    InvalidAssertion(String),

    /// The token endpoint itself rate-limited us.
    #[error("token endpoint rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Wait requested via `Retry-After`, or the default fallback.
        retry_after: Duration,
    },

    /// Non-200 response from the token endpoint.
    #[error("token request failed: HTTP {status} - {body}")]
    TokenRequestFailed { status: u16, body: String },

    /// A 200 response without an `access_token` field.
    #[error("no access token in response: {0}")]
    MalformedTokenResponse(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl OAuthError {
    /// Whether retrying the acquisition can help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Http(_))
    }

    /// Explicit wait requested by the endpoint, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for OAuth operations.
pub type OAuthResult<T> = Result<T, OAuthError>;
