//! Client assertion parsing.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::{OAuthError, OAuthResult};

/// Scope for the business variant of the vendor API.
pub const BUSINESS_SCOPE: &str = "business.api";

/// Scope for the education variant of the vendor API.
pub const SCHOOL_SCOPE: &str = "school.api";

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    #[serde(default)]
    sub: Option<String>,
}

/// A validated compact signed token plus the client id extracted from its
/// payload. The signature is not verified locally; the vendor's token
/// endpoint is the authority on that.
#[derive(Debug, Clone)]
pub struct ClientAssertion {
    raw: String,
    client_id: String,
}

impl ClientAssertion {
    /// Parse an assertion as pasted into configuration: surrounding quotes
    /// and any interior whitespace are stripped, then the token must have
    /// exactly three dot-separated segments with a base64url JSON payload
    /// carrying a `sub` claim.
    pub fn parse(raw: &str) -> OAuthResult<Self> {
        let cleaned: String = raw
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let parts: Vec<&str> = cleaned.split('.').collect();
        if parts.len() != 3 {
            return Err(OAuthError::InvalidAssertion(format!(
                "expected three dot-separated segments, found {}",
                parts.len()
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .map_err(|err| {
                OAuthError::InvalidAssertion(format!("payload is not valid base64url: {err}"))
            })?;
        let claims: AssertionClaims = serde_json::from_slice(&payload).map_err(|err| {
            OAuthError::InvalidAssertion(format!("payload is not valid JSON: {err}"))
        })?;

        let client_id = claims
            .sub
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| OAuthError::InvalidAssertion("no subject claim in payload".into()))?;

        Ok(Self {
            raw: cleaned,
            client_id,
        })
    }

    /// The cleaned assertion exactly as it goes on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Client id from the payload's subject claim.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Pick the API scope from the base URL: the education variant is served
/// from an `api-school` host, everything else is business.
#[must_use]
pub fn scope_for_base_url(api_base_url: &str) -> &'static str {
    if api_base_url.contains("api-school") {
        SCHOOL_SCOPE
    } else {
        BUSINESS_SCOPE
    }
}
