//! Cache roles: which of the two stores a facade is currently serving from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two stores behind a fail-over cache.
///
/// Also used as the facade's active mode: `Primary` while the mode indicator
/// is absent, `Fallback` while it is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheRole {
    /// The normally preferred store
    Primary,
    /// The backup store used while the primary is unreachable
    Fallback,
}

impl CacheRole {
    /// Stable lowercase name, used in logs and error labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::Primary => "primary",
            CacheRole::Fallback => "fallback",
        }
    }

    /// The other store.
    pub fn other(&self) -> Self {
        match self {
            CacheRole::Primary => CacheRole::Fallback,
            CacheRole::Fallback => CacheRole::Primary,
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheRole {
    type Err = CacheRoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(CacheRole::Primary),
            "fallback" => Ok(CacheRole::Fallback),
            _ => Err(CacheRoleParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid cache role string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRoleParseError(pub String);

impl fmt::Display for CacheRoleParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid cache role: {}", self.0)
    }
}

impl std::error::Error for CacheRoleParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("Primary".parse::<CacheRole>(), Ok(CacheRole::Primary));
        assert_eq!("FALLBACK".parse::<CacheRole>(), Ok(CacheRole::Fallback));
        assert!("secondary".parse::<CacheRole>().is_err());
    }

    #[test]
    fn test_role_display_and_other() {
        assert_eq!(CacheRole::Primary.to_string(), "primary");
        assert_eq!(CacheRole::Primary.other(), CacheRole::Fallback);
        assert_eq!(CacheRole::Fallback.other(), CacheRole::Primary);
    }

    #[test]
    fn test_role_serde_lowercase() {
        let json = serde_json::to_string(&CacheRole::Fallback).expect("serialize");
        assert_eq!(json, "\"fallback\"");
    }
}
