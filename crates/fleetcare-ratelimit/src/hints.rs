//! Vendor rate-limit response headers.

use std::time::Duration;

/// Limit/remaining values gleaned from a 200 response's headers.
///
/// The vendor has been seen using both hyphenation variants, so both are
/// accepted, case-insensitively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHints {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

impl RateLimitHints {
    /// Scan header name/value pairs for rate-limit information.
    #[must_use]
    pub fn from_pairs<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hints = Self::default();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            match name.as_str() {
                "x-ratelimit-limit" | "x-rate-limit-limit" => {
                    hints.limit = value.trim().parse().ok();
                }
                "x-ratelimit-remaining" | "x-rate-limit-remaining" => {
                    hints.remaining = value.trim().parse().ok();
                }
                _ => {}
            }
        }
        hints
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none()
    }
}

/// Parse a `Retry-After` value given in whole seconds. HTTP-date forms are
/// not used by this vendor and come back as `None`.
#[must_use]
pub fn parse_retry_after_secs(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_hyphenation_variants() {
        let hints = RateLimitHints::from_pairs([("X-RateLimit-Limit", "40")]);
        assert_eq!(hints.limit, Some(40));

        let hints = RateLimitHints::from_pairs([
            ("X-Rate-Limit-Limit", "60"),
            ("X-Rate-Limit-Remaining", "12"),
        ]);
        assert_eq!(hints.limit, Some(60));
        assert_eq!(hints.remaining, Some(12));
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let hints = RateLimitHints::from_pairs([
            ("x-ratelimit-limit", "30"),
            ("X-RATELIMIT-REMAINING", "5"),
        ]);
        assert_eq!(hints.limit, Some(30));
        assert_eq!(hints.remaining, Some(5));
    }

    #[test]
    fn unrelated_headers_leave_hints_empty() {
        let hints = RateLimitHints::from_pairs([
            ("content-type", "application/json"),
            ("x-request-id", "abc"),
        ]);
        assert!(hints.is_empty());
    }

    #[test]
    fn garbage_values_are_ignored() {
        let hints = RateLimitHints::from_pairs([("X-RateLimit-Limit", "soon")]);
        assert!(hints.limit.is_none());
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(
            parse_retry_after_secs("5"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse_retry_after_secs(" 60 "),
            Some(Duration::from_secs(60))
        );
        assert_eq!(parse_retry_after_secs("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }
}
