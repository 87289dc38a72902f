//! Token endpoint client.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{ClientAssertion, OAuthError, OAuthResult, scope_for_base_url};

/// Fixed vendor token endpoint.
pub const TOKEN_ENDPOINT: &str = "https://account.apple.com/auth/oauth2/token";

/// Assertion type URN for the client-credentials grant.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Fallback wait when a 429 carries no `Retry-After`.
pub const DEFAULT_TOKEN_RETRY_AFTER: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Parse a `Retry-After` header value given in whole seconds.
#[must_use]
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// HTTP client for the client-credentials exchange.
///
/// TLS verification stays on; both timeouts are bounded. The endpoint is
/// overridable for tests only.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TokenClient {
    /// Build a client against the fixed vendor endpoint.
    pub fn new() -> OAuthResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: TOKEN_ENDPOINT.to_string(),
        })
    }

    /// Point the client at a different token endpoint (tests).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Exchange a client assertion for a bearer token.
    ///
    /// The caller owns caching and any post-acquisition cooldown; this
    /// function performs exactly one request.
    pub async fn acquire(
        &self,
        assertion: &ClientAssertion,
        api_base_url: &str,
    ) -> OAuthResult<String> {
        let scope = scope_for_base_url(api_base_url);
        debug!(client_id = %assertion.client_id(), scope, "requesting access token");

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", assertion.client_id()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
            ("scope", scope),
        ];

        let response = self.http.post(&self.endpoint).form(&params).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after =
                parse_retry_after(response.headers()).unwrap_or(DEFAULT_TOKEN_RETRY_AFTER);
            return Err(OAuthError::RateLimited { retry_after });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(OAuthError::TokenRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|_| OAuthError::MalformedTokenResponse(body.clone()))?;
        match parsed.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(OAuthError::MalformedTokenResponse(body)),
        }
    }
}
