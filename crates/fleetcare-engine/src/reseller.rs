//! Reseller id translation.

use std::collections::HashMap;

/// Optional directory translating a vendor purchase-source id into a
/// human-readable reseller name. Lookups never fail; an unknown id simply
/// stays untranslated.
pub trait ResellerDirectory: Send + Sync {
    fn resolve(&self, reseller_id: &str) -> Option<String>;
}

/// Directory with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResellers;

impl ResellerDirectory for NoResellers {
    fn resolve(&self, _reseller_id: &str) -> Option<String> {
        None
    }
}

/// In-memory directory loaded by the host. Exact id match first, then
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct StaticResellerDirectory {
    names: HashMap<String, String>,
}

impl StaticResellerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(id, name)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            names: pairs
                .into_iter()
                .map(|(id, name)| (id.into(), name.into()))
                .collect(),
        }
    }
}

impl ResellerDirectory for StaticResellerDirectory {
    fn resolve(&self, reseller_id: &str) -> Option<String> {
        if reseller_id.is_empty() {
            return None;
        }
        if let Some(name) = self.names.get(reseller_id) {
            return Some(name.clone());
        }
        self.names
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(reseller_id))
            .map(|(_, name)| name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_then_case_insensitive_match() {
        let directory =
            StaticResellerDirectory::from_pairs([("1AE4C0", "Example Reseller GmbH")]);

        assert_eq!(
            directory.resolve("1AE4C0").as_deref(),
            Some("Example Reseller GmbH")
        );
        assert_eq!(
            directory.resolve("1ae4c0").as_deref(),
            Some("Example Reseller GmbH")
        );
        assert_eq!(directory.resolve("FFFFFF"), None);
        assert_eq!(directory.resolve(""), None);
    }

    #[test]
    fn empty_directory_translates_nothing() {
        assert_eq!(NoResellers.resolve("1AE4C0"), None);
        assert_eq!(StaticResellerDirectory::new().resolve("1AE4C0"), None);
    }
}
