//! State Engine HTTP surface (§6.2): import, read, drift, and the two
//! address-level mutations, each guarded by an optional `expected_checksum`
//! for optimistic concurrency (§5).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::TokenService;
use crate::error::Error;
use crate::state::AppState;
use crate::state_engine::{analyze_drift, parse_state, BackendAdapter, BackendConfig, DriftSummary, OutputRow, ResourceRow, StateSnapshotSummary};

use super::extract::AuthenticatedUser;

fn default_workspace() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub project_id: Uuid,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    pub backend: BackendConfig,
}

/// `POST /state/import` — fetch from the configured backend (C1), parse
/// and normalize (C2), and persist (C4) in one call.
pub async fn import(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<StateSnapshotSummary>, Error> {
    TokenService::ensure_scopes(&claims, &["console:write"])?;

    let fetched = state.backend().fetch(&body.backend).await?;
    let parsed = parse_state(&fetched.raw_bytes, Some(fetched.backend_tag))?;
    let backend_config = serde_json::to_value(&body.backend)?;
    let summary = state
        .state_store()
        .persist(body.project_id, &body.workspace, fetched.backend_tag, &backend_config, &parsed)
        .await?;

    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_id: Uuid,
    pub workspace: Option<String>,
}

/// `GET /state?project_id=...&workspace=...`
pub async fn list(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StateSnapshotSummary>>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let rows = state.state_store().list(query.project_id, query.workspace.as_deref()).await?;
    Ok(Json(rows))
}

fn default_include_snapshot() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    #[serde(default = "default_include_snapshot")]
    pub include_snapshot: bool,
}

/// `GET /state/{id}?include_snapshot=false`
pub async fn get(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<GetQuery>,
) -> Result<Json<StateSnapshotSummary>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let row = state.state_store().get(id, query.include_snapshot).await?;
    Ok(Json(row))
}

fn default_resources_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct ResourcesQuery {
    #[serde(default = "default_resources_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// `GET /state/{id}/resources?limit=&offset=`
pub async fn resources(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ResourcesQuery>,
) -> Result<Json<Vec<ResourceRow>>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let rows = state.state_store().resources(id, query.limit.clamp(1, 10_000), query.offset.max(0)).await?;
    Ok(Json(rows))
}

/// `GET /state/{id}/outputs`
pub async fn outputs(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OutputRow>>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let rows = state.state_store().outputs(id).await?;
    Ok(Json(rows))
}

/// `GET /state/{id}/export` — the full canonical JSON document.
pub async fn export(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let row = state.state_store().get(id, true).await?;
    Ok(Json(row.canonical_json.unwrap_or(serde_json::Value::Null)))
}

#[derive(Debug, Deserialize)]
pub struct DriftRequest {
    pub plan: serde_json::Value,
    #[serde(default)]
    pub record_result: bool,
}

/// `POST /state/{id}/drift/plan` (C3) — diff the stored snapshot against a
/// supplied plan document, optionally persisting the result.
pub async fn drift(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DriftRequest>,
) -> Result<Json<DriftSummary>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;

    let row = state.state_store().get(id, true).await?;
    let raw = row.canonical_json.clone().ok_or_else(|| Error::Internal("snapshot is missing its canonical JSON".to_string()))?;
    let bytes = serde_json::to_vec(&raw)?;
    let parsed = parse_state(&bytes, Some(&row.backend_tag))?;
    let summary = analyze_drift(&parsed, &body.plan);

    if body.record_result {
        state.state_store().record_drift(row.project_id, &row.workspace, "plan", &summary, Some(id)).await?;
    }

    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub addresses: Vec<String>,
    #[serde(default)]
    pub expected_checksum: Option<String>,
}

/// `POST /state/{id}/operations/remove`
pub async fn remove(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RemoveRequest>,
) -> Result<Json<StateSnapshotSummary>, Error> {
    TokenService::ensure_scopes(&claims, &["console:write"])?;
    let summary = state
        .state_store()
        .remove_addresses(id, &body.addresses, body.expected_checksum.as_deref())
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub expected_checksum: Option<String>,
}

/// `POST /state/{id}/operations/move`
pub async fn move_resource(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MoveRequest>,
) -> Result<Json<StateSnapshotSummary>, Error> {
    TokenService::ensure_scopes(&claims, &["console:write"])?;
    let summary = state
        .state_store()
        .move_address(id, &body.source, &body.destination, body.expected_checksum.as_deref())
        .await?;
    Ok(Json(summary))
}
