//! Health reporting for a fail-over cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::CacheRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving from the primary store
    Healthy,
    /// Serving from the fallback store
    Degraded,
}

impl From<CacheRole> for HealthStatus {
    fn from(role: CacheRole) -> Self {
        match role {
            CacheRole::Primary => HealthStatus::Healthy,
            CacheRole::Fallback => HealthStatus::Degraded,
        }
    }
}

/// Point-in-time health of one cache component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    /// Store currently answering requests
    pub active_cache: CacheRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra fields, kept sorted so reports diff cleanly
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl HealthCheck {
    /// Health of a fail-over cache serving from `active`.
    ///
    /// The fallback still answers requests, so it is reported as degraded
    /// rather than down.
    pub fn for_cache(component: impl Into<String>, active: CacheRole) -> Self {
        let message = match active {
            CacheRole::Primary => None,
            CacheRole::Fallback => {
                Some("primary cache unavailable, serving from fallback".to_string())
            }
        };
        Self {
            status: active.into(),
            component: component.into(),
            active_cache: active,
            message,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_is_healthy() {
        let check = HealthCheck::for_cache("cache", CacheRole::Primary);
        assert_eq!(check.status, HealthStatus::Healthy);
        assert_eq!(check.active_cache, CacheRole::Primary);
        assert!(check.message.is_none());
    }

    #[test]
    fn test_fallback_is_degraded() {
        let check = HealthCheck::for_cache("cache", CacheRole::Fallback);
        assert_eq!(check.status, HealthStatus::Degraded);
        assert!(check.message.is_some());
    }

    #[test]
    fn test_report_json_shape() {
        let check = HealthCheck::for_cache("cache", CacheRole::Fallback)
            .with_metadata("failovers", serde_json::json!(2));
        let json = serde_json::to_value(&check).expect("serialize");
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["active_cache"], "fallback");
        assert_eq!(json["metadata"]["failovers"], 2);

        let healthy = serde_json::to_value(HealthCheck::for_cache("cache", CacheRole::Primary))
            .expect("serialize");
        assert!(healthy.get("message").is_none());
        assert!(healthy.get("metadata").is_none());
    }
}
