//! Workspace Comparator HTTP surface (C10). Workspace and project CRUD
//! belongs to an external collaborator (§6.5); this surface only reads the
//! rows the comparator needs and runs comparisons.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::TokenService;
use crate::error::Error;
use crate::state::AppState;
use crate::workspace::{compare, ComparisonResult, ComparisonType, WorkspaceVariable};

use super::extract::AuthenticatedUser;

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub left_workspace_id: Uuid,
    pub right_workspace_id: Uuid,
    pub types: Vec<ComparisonType>,
    #[serde(default)]
    pub info_keys: Vec<String>,
}

/// `POST /state/workspaces/compare`
pub async fn compare_workspaces(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Json(body): Json<CompareRequest>,
) -> Result<Json<ComparisonResult>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let result = compare(
        state.workspaces(),
        state.state_store(),
        body.left_workspace_id,
        body.right_workspace_id,
        &body.types,
        &body.info_keys,
    )
    .await?;
    Ok(Json(result))
}

/// `GET /state/workspaces/{id}/variables`
pub async fn list_variables(
    AuthenticatedUser(claims): AuthenticatedUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<WorkspaceVariable>>, Error> {
    TokenService::ensure_scopes(&claims, &["console:read"])?;
    let rows = state.workspaces().list_variables(id).await?;
    Ok(Json(rows))
}
