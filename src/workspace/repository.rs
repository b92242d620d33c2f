//! Workspace and workspace-variable storage.
//!
//! Workspace and project CRUD is an external collaborator (out of scope
//! per spec); this repository only reads the rows the Comparator (C10)
//! needs and records comparison runs. Schema owned here: `workspaces`,
//! `workspace_variables`, `workspace_comparisons`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Error;

use super::comparator::{ComparisonType, Difference};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workspace {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A single workspace variable. `is_sensitive` drives the redaction
/// sentinel in C10's variable comparison.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkspaceVariable {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub key: String,
    pub value: String,
    pub is_sensitive: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkspaceComparisonRow {
    pub id: Uuid,
    pub left_workspace_id: Uuid,
    pub right_workspace_id: Uuid,
    pub comparison_types: Vec<String>,
    pub difference_count: i64,
    pub differences: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct WorkspaceRepository {
    pool: PgPool,
}

impl WorkspaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_workspace(&self, id: Uuid) -> Result<Workspace, Error> {
        sqlx::query_as::<_, Workspace>(
            "SELECT id, project_id, name, created_at FROM workspaces WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::StateNotFound(id.to_string()))
    }

    pub async fn list_variables(&self, workspace_id: Uuid) -> Result<Vec<WorkspaceVariable>, Error> {
        let rows = sqlx::query_as::<_, WorkspaceVariable>(
            r#"
            SELECT id, workspace_id, key, value, is_sensitive, description
            FROM workspace_variables
            WHERE workspace_id = $1
            ORDER BY key
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Persist a comparison run: the requested comparison types, the
    /// total difference count, and the full difference list.
    pub async fn record_comparison(
        &self,
        left_workspace_id: Uuid,
        right_workspace_id: Uuid,
        comparison_types: &[ComparisonType],
        differences: &[Difference],
    ) -> Result<Uuid, Error> {
        let types: Vec<String> = comparison_types.iter().map(|t| t.to_string()).collect();
        let payload = serde_json::to_value(differences)?;

        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO workspace_comparisons
                (left_workspace_id, right_workspace_id, comparison_types, difference_count, differences, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            RETURNING id
            "#,
        )
        .bind(left_workspace_id)
        .bind(right_workspace_id)
        .bind(&types)
        .bind(differences.len() as i64)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id.0)
    }
}
