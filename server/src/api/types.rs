//! Shared API Request/Response Types

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::conditions::RequestContext;
use crate::scope;

use super::AppState;

/// Request-time context supplied by the caller on check and delegation calls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContextBody {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub payload: Option<Value>,
}

impl RequestContextBody {
    /// Convert to the evaluator's context. An unparseable IP is treated as
    /// absent, which whitelist conditions fail closed on.
    #[must_use]
    pub fn into_context(self) -> RequestContext {
        RequestContext {
            ip_address: self.ip_address.as_deref().and_then(|raw| raw.parse().ok()),
            user_agent: self.user_agent,
            payload: self.payload.unwrap_or(Value::Null),
        }
    }
}

/// Resolve an optional `"type:id"` scope key to a scope id.
///
/// Unknown entity types resolve to `None`: the check proceeds unscoped.
pub async fn resolve_scope_id(
    state: &AppState,
    scope_key: Option<&str>,
) -> sqlx::Result<Option<Uuid>> {
    let Some(key) = scope_key else {
        return Ok(None);
    };
    let scope = scope::resolve_key(&state.db, &state.scope_cache, key).await?;
    Ok(scope.map(|s| s.id))
}

/// Pagination defaults shared by list endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

const fn default_limit() -> i64 {
    50
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl Pagination {
    /// Clamp to sane bounds before hitting the store.
    #[must_use]
    pub fn clamped(self, max_limit: i64) -> Self {
        Self {
            limit: self.limit.clamp(1, max_limit),
            offset: self.offset.max(0),
        }
    }
}
