use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::cache::ValidatorEntry;
use crate::security::BlockKind;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub blocked_hosts: usize,
    pub blocked_urls: usize,
    pub cached_entries: usize,
}

#[derive(Deserialize)]
pub struct BlockRequest {
    pub value: String,
}

#[derive(Deserialize)]
pub struct ValueQuery {
    pub value: String,
}

#[derive(Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

#[derive(Serialize)]
pub struct BlockedList {
    pub kind: BlockKind,
    pub entries: Vec<String>,
}

#[derive(Serialize)]
pub struct CacheEntryStatus {
    pub url: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validators: Option<ValidatorEntry>,
}

#[derive(Serialize)]
pub struct Changed {
    pub added: bool,
}

#[derive(Serialize)]
pub struct Removed {
    pub removed: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        blocked_hosts: state.access.len(BlockKind::Host),
        blocked_urls: state.access.len(BlockKind::Url),
        cached_entries: state.cache.len(),
    })
}

pub async fn list_blocked(
    State(state): State<AdminState>,
    Path(kind): Path<BlockKind>,
) -> Json<BlockedList> {
    let mut entries: Vec<String> = state.access.list(kind).collect();
    entries.sort();
    Json(BlockedList { kind, entries })
}

pub async fn block(
    State(state): State<AdminState>,
    Path(kind): Path<BlockKind>,
    Json(request): Json<BlockRequest>,
) -> Result<(StatusCode, Json<Changed>), StatusCode> {
    let value = request.value.trim();
    if value.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let added = state.access.block(kind, value);
    tracing::info!(%kind, value, added, "Blocklist entry added");
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(Changed { added })))
}

pub async fn unblock(
    State(state): State<AdminState>,
    Path(kind): Path<BlockKind>,
    Query(query): Query<ValueQuery>,
) -> Json<Removed> {
    let removed = state.access.unblock(kind, &query.value);
    tracing::info!(%kind, value = %query.value, removed, "Blocklist entry removed");
    Json(Removed { removed })
}

pub async fn list_cached(State(state): State<AdminState>) -> Json<Vec<String>> {
    let mut urls: Vec<String> = state.cache.list().collect();
    urls.sort();
    Json(urls)
}

pub async fn get_cache_entry(
    State(state): State<AdminState>,
    Query(query): Query<UrlQuery>,
) -> Json<CacheEntryStatus> {
    let validators = state.cache.validators(&query.url);
    Json(CacheEntryStatus {
        cached: validators.is_some(),
        validators,
        url: query.url,
    })
}

pub async fn uncache(
    State(state): State<AdminState>,
    Query(query): Query<UrlQuery>,
) -> Json<Removed> {
    let removed = state.cache.remove(&query.url);
    tracing::info!(url = %query.url, removed, "Cache entry removed");
    Json(Removed { removed })
}

pub async fn clear_cache(State(state): State<AdminState>) -> StatusCode {
    state.cache.clear();
    tracing::info!("Cache index cleared");
    StatusCode::NO_CONTENT
}
