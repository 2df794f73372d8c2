//! API Router and Application State
//!
//! Central routing configuration and shared state for the collaborator-facing
//! surface (administrative UI, CLI maintenance jobs).

pub mod error;
pub mod types;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::checker::ResolutionCache;
use crate::conditions::ConditionEvaluator;
use crate::config::Config;
use crate::notify::Notifier;
use crate::scope::ScopeCache;
use crate::{audit, catalog, checker, delegation, hierarchy, scope, template, wildcard};

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,
    /// Server configuration
    pub config: Arc<Config>,
    /// Cached effective-permission sets
    pub resolution_cache: Arc<ResolutionCache>,
    /// Cached scope lookups
    pub scope_cache: Arc<ScopeCache>,
    /// Condition evaluator (carries the optional custom hook)
    pub evaluator: Arc<ConditionEvaluator>,
    /// Outbound notification sink
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(db: PgPool, config: Config, notifier: Arc<dyn Notifier>) -> Self {
        let resolution_cache = Arc::new(ResolutionCache::new(config.resolution_cache_ttl));
        Self {
            db,
            config: Arc::new(config),
            resolution_cache,
            scope_cache: Arc::new(ScopeCache::new()),
            evaluator: Arc::new(ConditionEvaluator::new()),
            notifier,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest(
            "/api/permissions",
            checker::handlers::router().merge(catalog::handlers::router()),
        )
        .nest("/api/users", user_router())
        .nest("/api/scopes", scope::handlers::router())
        .nest("/api/groups", groups_router())
        .nest("/api/delegations", delegation::handlers::router())
        .nest("/api/templates", template::handlers::router())
        .nest(
            "/api/template-versions",
            template::handlers::versions_router(),
        )
        .nest("/api/wildcards", wildcard::handlers::router())
        .nest("/api/maintenance", maintenance_router())
        .nest("/api/audit", audit::handlers::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Group-node creation for the non-template hierarchy families.
fn groups_router() -> Router<AppState> {
    use axum::routing::post;

    Router::new().route("/{family}", post(hierarchy::handlers::create_group))
}

/// Per-user read routes, backed by domain modules.
fn user_router() -> Router<AppState> {
    Router::new()
        .route(
            "/{id}/permissions",
            get(checker::handlers::list_user_permissions)
                .post(checker::handlers::grant)
                .delete(checker::handlers::revoke),
        )
        .route(
            "/{id}/delegations",
            get(delegation::handlers::list_user_delegations),
        )
}

/// Maintenance operations invoked by periodic jobs and operators.
fn maintenance_router() -> Router<AppState> {
    use axum::routing::post;

    Router::new()
        .route(
            "/wildcards/auto-expand",
            post(wildcard::handlers::auto_expand),
        )
        .route(
            "/hierarchy/{family}/rebuild",
            post(hierarchy::handlers::rebuild_family),
        )
        .route(
            "/delegations/expire-sweep",
            post(delegation::handlers::expire_sweep),
        )
        .route(
            "/grants/expire-sweep",
            post(checker::handlers::expired_grant_sweep),
        )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
