//! OAuth2 access token helpers shared by the token endpoints.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ScopeError;

/// Placeholder returned instead of a token value outside the creation response.
pub const MASKED_TOKEN: &str = "$encrypted$";

/// A single OAuth2 scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
        }
    }
}

/// Validated, space-separated token scope string.
///
/// Only `read` and `write` are accepted and each may appear once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScope {
    scopes: Vec<Scope>,
}

impl TokenScope {
    /// Parse a scope string such as `"read write"`.
    pub fn parse(value: &str) -> Result<Self, ScopeError> {
        let mut scopes = Vec::new();
        for word in value.split_whitespace() {
            let scope = match word {
                "read" => Scope::Read,
                "write" => Scope::Write,
                other => {
                    return Err(ScopeError::Unknown {
                        scope: other.to_string(),
                    })
                }
            };
            if scopes.contains(&scope) {
                return Err(ScopeError::Duplicate {
                    scope: word.to_string(),
                });
            }
            scopes.push(scope);
        }
        if scopes.is_empty() {
            return Err(ScopeError::Empty);
        }
        Ok(Self { scopes })
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }
}

impl Default for TokenScope {
    fn default() -> Self {
        Self {
            scopes: vec![Scope::Write],
        }
    }
}

impl FromStr for TokenScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<&str> = self.scopes.iter().map(Scope::as_str).collect();
        f.write_str(&words.join(" "))
    }
}

/// Expiry instant for a freshly issued access token.
///
/// A zero lifetime is allowed but yields a token that is already expired.
pub fn access_token_expiry(now: DateTime<Utc>, expire_seconds: u32) -> DateTime<Utc> {
    if expire_seconds == 0 {
        tracing::warn!(
            "access token lifetime is 0 seconds, creating token that has already expired"
        );
    }
    now + ChronoDuration::seconds(i64::from(expire_seconds))
}

/// Whether a response may carry raw token values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenVisibility {
    /// Response to the request that created the token
    Revealed,
    /// Any later read
    Masked,
}

impl TokenVisibility {
    /// Render a token value for a response.
    pub fn render<'a>(&self, token: &'a str) -> &'a str {
        match self {
            TokenVisibility::Revealed => token,
            TokenVisibility::Masked => MASKED_TOKEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_valid_scopes() {
        let scope = TokenScope::parse("read write").expect("valid");
        assert!(scope.contains(Scope::Read));
        assert!(scope.contains(Scope::Write));
        assert_eq!(scope.to_string(), "read write");

        let scope: TokenScope = "  write ".parse().expect("valid");
        assert_eq!(scope.scopes(), &[Scope::Write]);
    }

    #[test]
    fn test_parse_rejects_bad_scopes() {
        assert_eq!(TokenScope::parse(""), Err(ScopeError::Empty));
        assert_eq!(
            TokenScope::parse("read admin"),
            Err(ScopeError::Unknown {
                scope: "admin".to_string()
            })
        );
        assert_eq!(
            TokenScope::parse("read read"),
            Err(ScopeError::Duplicate {
                scope: "read".to_string()
            })
        );
    }

    #[test]
    fn test_default_scope_is_write() {
        assert_eq!(TokenScope::default().to_string(), "write");
    }

    #[test]
    fn test_access_token_expiry() {
        let now = Utc::now();
        assert_eq!(access_token_expiry(now, 0), now);
        assert_eq!(
            access_token_expiry(now, 3600),
            now + ChronoDuration::hours(1)
        );
    }

    #[test]
    fn test_token_visibility() {
        assert_eq!(TokenVisibility::Revealed.render("abc"), "abc");
        assert_eq!(TokenVisibility::Masked.render("abc"), MASKED_TOKEN);
    }

    proptest! {
        /// Any accepted scope string renders back to an accepted string.
        #[test]
        fn prop_display_reparses(words in proptest::collection::vec("read|write|admin", 0..4)) {
            let input = words.join(" ");
            if let Ok(scope) = TokenScope::parse(&input) {
                let reparsed = TokenScope::parse(&scope.to_string());
                prop_assert_eq!(reparsed, Ok(scope));
            }
        }
    }
}
