//! Cache operations as values.
//!
//! The fail-over facade routes every call through a single dispatch routine.
//! Turning each call into a [`CacheOp`] lets that routine run the same
//! operation against the primary and, after a failure, the fallback.

use std::time::Duration;

use turnstile_core::{CacheValue, StoreResult};

use super::traits::CacheStore;

/// One cache operation with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Add {
        key: String,
        value: CacheValue,
        ttl: Option<Duration>,
        version: Option<i64>,
    },
    Get {
        key: String,
        default: Option<CacheValue>,
        version: Option<i64>,
    },
    /// `set` carries no version: stores always write it at their default
    /// version, whatever the caller passed.
    Set {
        key: String,
        value: CacheValue,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
        version: Option<i64>,
    },
    Clear,
}

impl CacheOp {
    /// Operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            CacheOp::Add { .. } => "add",
            CacheOp::Get { .. } => "get",
            CacheOp::Set { .. } => "set",
            CacheOp::Delete { .. } => "delete",
            CacheOp::Clear => "clear",
        }
    }

    /// Run this operation against `store`.
    pub async fn apply(&self, store: &dyn CacheStore) -> StoreResult<CacheReply> {
        match self {
            CacheOp::Add {
                key,
                value,
                ttl,
                version,
            } => store
                .add(key, value.clone(), *ttl, *version)
                .await
                .map(CacheReply::Added),
            CacheOp::Get {
                key,
                default,
                version,
            } => store
                .get(key, default.clone(), *version)
                .await
                .map(CacheReply::Value),
            CacheOp::Set { key, value, ttl } => store
                .set(key, value.clone(), *ttl, None)
                .await
                .map(|()| CacheReply::Done),
            CacheOp::Delete { key, version } => {
                store.delete(key, *version).await.map(|()| CacheReply::Done)
            }
            CacheOp::Clear => store.clear().await.map(|()| CacheReply::Done),
        }
    }
}

/// Result of a [`CacheOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheReply {
    /// From `add`: whether the value was stored
    Added(bool),
    /// From `get`
    Value(Option<CacheValue>),
    /// From `set`, `delete` and `clear`
    Done,
}

impl CacheReply {
    pub fn into_added(self) -> bool {
        matches!(self, CacheReply::Added(true))
    }

    pub fn into_value(self) -> Option<CacheValue> {
        match self {
            CacheReply::Value(value) => value,
            _ => None,
        }
    }
}
