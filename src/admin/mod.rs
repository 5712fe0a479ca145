//! Admin API: runtime blocklist and cache management.
//!
//! Served on its own listener so management traffic never mixes with proxied
//! traffic. Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::cache::CacheStore;
use crate::security::AccessControl;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub access: Arc<AccessControl>,
    pub cache: Arc<CacheStore>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(access: Arc<AccessControl>, cache: Arc<CacheStore>, api_key: &str) -> Self {
        Self {
            access,
            cache,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route(
            "/admin/blocklist/{kind}",
            get(list_blocked).post(block).delete(unblock),
        )
        .route("/admin/cache", get(list_cached).delete(clear_cache))
        .route("/admin/cache/entry", get(get_cache_entry).delete(uncache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
