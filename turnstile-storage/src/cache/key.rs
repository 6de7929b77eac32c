//! Versioned cache keys.
//!
//! A [`CacheKey`] renders as `prefix:version:key`. The prefix lets several
//! deployments share one backend; the version lets callers invalidate a
//! whole generation of keys by bumping a number.

use std::fmt;

/// Separator between the key components.
const SEPARATOR: char = ':';

/// Prefix and default version applied by a store to every key it sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    default_version: i64,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>, default_version: i64) -> Self {
        Self {
            prefix: prefix.into(),
            default_version,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn default_version(&self) -> i64 {
        self.default_version
    }

    /// Build the full key for `key` at `version`, or the default version.
    pub fn key(&self, key: &str, version: Option<i64>) -> CacheKey {
        CacheKey::new(
            self.prefix.clone(),
            version.unwrap_or(self.default_version),
            key,
        )
    }

    /// Leading bytes shared by every key in this space.
    pub fn namespace(&self) -> String {
        format!("{}{}", self.prefix, SEPARATOR)
    }

    /// Pattern matching every key in this space, for backends that scan.
    pub fn match_pattern(&self) -> String {
        format!("{}*", self.namespace())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("", 1)
    }
}

/// A fully qualified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    prefix: String,
    version: i64,
    key: String,
}

impl CacheKey {
    pub fn new(prefix: impl Into<String>, version: i64, key: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version,
            key: key.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode for storage.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a rendered key.
    ///
    /// The prefix must not contain `:`; the user key may. Returns `None`
    /// when the version component is missing or not an integer.
    pub fn decode(rendered: &str) -> Option<Self> {
        let mut parts = rendered.splitn(3, SEPARATOR);
        let prefix = parts.next()?;
        let version = parts.next()?.parse().ok()?;
        let key = parts.next()?;
        Some(Self::new(prefix, version, key))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.prefix, SEPARATOR, self.version, SEPARATOR, self.key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_format() {
        let space = KeySpace::new("gw", 1);
        assert_eq!(space.key("session", None).encode(), "gw:1:session");
        assert_eq!(space.key("session", Some(7)).encode(), "gw:7:session");
    }

    #[test]
    fn test_empty_prefix_keeps_separator() {
        assert_eq!(KeySpace::default().key("up_test", None).encode(), ":1:up_test");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(CacheKey::decode("gw:x:session"), None);
        assert_eq!(CacheKey::decode("gw:1"), None);
        let key = CacheKey::decode("gw:2:a:b").expect("valid key");
        assert_eq!(key.key(), "a:b");
        assert_eq!(key.version(), 2);
    }

    #[test]
    fn test_match_pattern() {
        let space = KeySpace::new("gw", 1);
        assert_eq!(space.match_pattern(), "gw:*");
        assert!(space.key("k", Some(3)).encode().starts_with(&space.namespace()));
        assert!(!KeySpace::new("gw2", 1)
            .key("k", None)
            .encode()
            .starts_with(&space.namespace()));
    }

    proptest! {
        /// Different versions of the same key never collide.
        #[test]
        fn prop_versions_are_distinct(
            prefix in "[a-z]{0,8}",
            key in ".{0,32}",
            a in any::<i64>(),
            b in any::<i64>(),
        ) {
            let space = KeySpace::new(prefix, 1);
            let left = space.key(&key, Some(a)).encode();
            let right = space.key(&key, Some(b)).encode();
            prop_assert_eq!(left == right, a == b);
        }

        /// Every rendered key sits inside its space's scan pattern and decodes back.
        #[test]
        fn prop_key_in_space(prefix in "[a-z]{0,8}", key in ".{0,32}", version in any::<i64>()) {
            let space = KeySpace::new(prefix.clone(), 1);
            let rendered = space.key(&key, Some(version)).encode();
            let scan_prefix = space.match_pattern();
            prop_assert!(rendered.starts_with(scan_prefix.trim_end_matches('*')));
            prop_assert_eq!(CacheKey::decode(&rendered), Some(CacheKey::new(prefix, version, key)));
        }
    }
}
