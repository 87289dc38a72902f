//! Per-tenant credential resolution.
//!
//! A tenant is an organizational unit with its own API base URL, signed
//! client assertion, and rate limit, identified by a key prefix derived
//! from device metadata. Resolution cascades through three tiers, first
//! non-empty value wins per field:
//!
//! 1. keys derived from the device's machine-group identifier,
//! 2. keys derived from the device's client identifier (only consulted
//!    while URL or assertion is still missing),
//! 3. the global defaults.

use std::collections::HashMap;

use tracing::debug;

/// Default per-minute request budget when no tier configures one.
pub const DEFAULT_RATE_LIMIT: u32 = 40;

/// Tenant key used when the credentials came from the global tier.
pub const DEFAULT_TENANT_KEY: &str = "DEFAULT";

/// Key/value configuration source behind the resolver.
///
/// Implementations must treat empty values as unset.
pub trait CredentialSource: Send + Sync {
    /// Look up a configuration value by key.
    fn get(&self, key: &str) -> Option<String>;
}

impl<T: CredentialSource + ?Sized> CredentialSource for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// Process-environment backed source.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// In-memory source for tests and embedded hosts.
#[derive(Debug, Clone, Default)]
pub struct MapCredentials {
    values: HashMap<String, String>,
}

impl MapCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key/value pair, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl CredentialSource for MapCredentials {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Resolved credentials for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantConfig {
    /// Vendor API base URL, normalized to end with `/`.
    pub api_base_url: String,
    /// Cleaned compact client assertion.
    pub client_assertion: String,
    /// Requests per window budget for this tenant.
    pub rate_limit: u32,
}

/// A [`TenantConfig`] together with the tenant key that supplied the
/// assertion, which is the key the orchestrator caches tokens under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenant {
    pub key: String,
    pub config: TenantConfig,
}

/// Derive a tenant key from a device identifier: the substring before the
/// first hyphen, upper-cased. `None` for empty input or an empty prefix.
#[must_use]
pub fn tenant_key(identifier: &str) -> Option<String> {
    let prefix = identifier.trim().split('-').next()?.trim();
    if prefix.is_empty() {
        return None;
    }
    Some(prefix.to_uppercase())
}

/// Strip surrounding quotes and all interior whitespace from an assertion
/// as pasted into configuration.
#[must_use]
pub fn clean_assertion(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Cascading credential resolver over a [`CredentialSource`].
#[derive(Debug, Clone)]
pub struct CredentialResolver<S> {
    source: S,
}

impl<S: CredentialSource> CredentialResolver<S> {
    pub const fn new(source: S) -> Self {
        Self { source }
    }

    fn url_for(&self, key: &str) -> Option<String> {
        self.source.get(&format!("{key}_API_URL"))
    }

    fn assertion_for(&self, key: &str) -> Option<String> {
        self.source.get(&format!("{key}_CLIENT_ASSERTION"))
    }

    fn rate_limit_for(&self, key: &str) -> Option<u32> {
        self.source
            .get(&format!("{key}_RATE_LIMIT"))
            .and_then(|value| value.parse().ok())
            .filter(|limit| *limit > 0)
    }

    /// Resolve credentials for a device from its optional machine-group
    /// and client identifiers. Returns `None` when no tier yields both a
    /// base URL and an assertion.
    pub fn resolve(
        &self,
        machine_group: Option<&str>,
        client_identifier: Option<&str>,
    ) -> Option<ResolvedTenant> {
        let group_key = machine_group.and_then(tenant_key);
        let client_key = client_identifier.and_then(tenant_key);

        let mut api_url = None;
        let mut assertion = None;
        let mut rate_limit = None;
        let mut assertion_key: Option<String> = None;

        if let Some(key) = &group_key {
            api_url = self.url_for(key);
            assertion = self.assertion_for(key);
            rate_limit = self.rate_limit_for(key);
            if assertion.is_some() {
                assertion_key = Some(key.clone());
            }
        }

        // The alternate identity is only consulted while the essentials
        // are still missing.
        if api_url.is_none() || assertion.is_none() {
            if let Some(key) = &client_key {
                if api_url.is_none() {
                    api_url = self.url_for(key);
                }
                if assertion.is_none() {
                    assertion = self.assertion_for(key);
                    if assertion.is_some() {
                        assertion_key = Some(key.clone());
                    }
                }
                if rate_limit.is_none() {
                    rate_limit = self.rate_limit_for(key);
                }
            }
        }

        if api_url.is_none() {
            api_url = self.source.get("API_URL");
        }
        if assertion.is_none() {
            assertion = self.source.get("CLIENT_ASSERTION");
            if assertion.is_some() {
                assertion_key = Some(DEFAULT_TENANT_KEY.to_string());
            }
        }
        if rate_limit.is_none() {
            rate_limit = self
                .source
                .get("RATE_LIMIT")
                .and_then(|value| value.parse().ok())
                .filter(|limit| *limit > 0);
        }

        let api_base_url = normalize_base_url(&api_url?);
        let client_assertion = clean_assertion(&assertion?);
        if client_assertion.is_empty() {
            return None;
        }

        let key = assertion_key.unwrap_or_else(|| DEFAULT_TENANT_KEY.to_string());
        debug!(tenant = %key, rate_limit = rate_limit.unwrap_or(DEFAULT_RATE_LIMIT), "resolved tenant credentials");
        Some(ResolvedTenant {
            key,
            config: TenantConfig {
                api_base_url,
                client_assertion,
                rate_limit: rate_limit.unwrap_or(DEFAULT_RATE_LIMIT),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn source() -> MapCredentials {
        MapCredentials::new()
            .with("API_URL", "https://api-business.apple.com/v1")
            .with("CLIENT_ASSERTION", "global.assertion.sig")
            .with("RATE_LIMIT", "25")
            .with("ACME_API_URL", "https://api-business.apple.com/acme")
            .with("ACME_CLIENT_ASSERTION", "acme.assertion.sig")
            .with("ACME_RATE_LIMIT", "60")
            .with("EDU_CLIENT_ASSERTION", "edu.assertion.sig")
    }

    #[test]
    fn tenant_key_takes_upper_cased_prefix() {
        assert_eq!(tenant_key("acme-fleet-01"), Some("ACME".to_string()));
        assert_eq!(tenant_key("SOLO"), Some("SOLO".to_string()));
        assert_eq!(tenant_key(""), None);
        assert_eq!(tenant_key("-leading"), None);
    }

    #[test]
    fn clean_assertion_strips_quotes_and_whitespace() {
        assert_eq!(clean_assertion("  \"a.b.c\"  "), "a.b.c");
        assert_eq!(clean_assertion("'a .\nb. c'"), "a.b.c");
    }

    #[test]
    fn group_tier_wins_over_everything() {
        let resolver = CredentialResolver::new(source());
        let resolved = resolver
            .resolve(Some("acme-site1"), Some("edu-client"))
            .unwrap();

        assert_eq!(resolved.key, "ACME");
        assert_eq!(
            resolved.config.api_base_url,
            "https://api-business.apple.com/acme/"
        );
        assert_eq!(resolved.config.client_assertion, "acme.assertion.sig");
        assert_eq!(resolved.config.rate_limit, 60);
    }

    #[test]
    fn client_identifier_fills_missing_fields() {
        // EDU has an assertion but no URL; URL falls through to global.
        let resolver = CredentialResolver::new(source());
        let resolved = resolver.resolve(None, Some("edu-mac-007")).unwrap();

        assert_eq!(resolved.key, "EDU");
        assert_eq!(
            resolved.config.api_base_url,
            "https://api-business.apple.com/v1/"
        );
        assert_eq!(resolved.config.client_assertion, "edu.assertion.sig");
        // EDU sets no rate limit; global 25 applies.
        assert_eq!(resolved.config.rate_limit, 25);
    }

    #[test]
    fn global_tier_is_the_last_resort() {
        let resolver = CredentialResolver::new(source());
        let resolved = resolver.resolve(None, None).unwrap();

        assert_eq!(resolved.key, DEFAULT_TENANT_KEY);
        assert_eq!(resolved.config.client_assertion, "global.assertion.sig");
        assert_eq!(resolved.config.rate_limit, 25);
    }

    #[test]
    fn unresolvable_when_assertion_missing_everywhere() {
        let resolver = CredentialResolver::new(
            MapCredentials::new().with("API_URL", "https://api-business.apple.com/v1"),
        );
        assert!(resolver.resolve(Some("acme-x"), Some("edu-y")).is_none());
    }

    #[test]
    fn rate_limit_defaults_when_unset() {
        let resolver = CredentialResolver::new(
            MapCredentials::new()
                .with("API_URL", "https://api-business.apple.com/v1")
                .with("CLIENT_ASSERTION", "a.b.c"),
        );
        let resolved = resolver.resolve(None, None).unwrap();
        assert_eq!(resolved.config.rate_limit, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn garbage_rate_limit_falls_through() {
        let resolver = CredentialResolver::new(
            MapCredentials::new()
                .with("API_URL", "https://api-business.apple.com/v1")
                .with("CLIENT_ASSERTION", "a.b.c")
                .with("RATE_LIMIT", "not-a-number"),
        );
        let resolved = resolver.resolve(None, None).unwrap();
        assert_eq!(resolved.config.rate_limit, DEFAULT_RATE_LIMIT);
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let resolver = CredentialResolver::new(source());
        let resolved = resolver.resolve(None, None).unwrap();
        assert!(resolved.config.api_base_url.ends_with('/'));
    }
}
