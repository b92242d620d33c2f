//! Migration Runner (C11)
//!
//! Idempotent forward migrations against the persistence layer: every
//! table and column is checked for existence before it's created, the way
//! the Python original's `ensure_user_profile_columns` checks `PRAGMA
//! table_info` before `ALTER TABLE ADD COLUMN`. Nothing here ever rewrites
//! existing rows or drops a column — only additive, idempotent DDL.

use sqlx::PgPool;

use crate::error::Error;

/// `(table name, CREATE TABLE IF NOT EXISTS statement)`, applied in
/// dependency order (referenced tables before referencing ones).
const TABLES: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE users (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT true,
            superuser BOOLEAN NOT NULL DEFAULT false,
            scopes TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "auth_refresh_sessions",
        r#"
        CREATE TABLE auth_refresh_sessions (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            family_id UUID NOT NULL,
            token_hash TEXT NOT NULL,
            anti_csrf TEXT NOT NULL,
            scopes TEXT[] NOT NULL DEFAULT '{}',
            ip TEXT,
            user_agent TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_used_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            expires_at TIMESTAMPTZ NOT NULL,
            revoked_at TIMESTAMPTZ,
            revoked_reason TEXT,
            replaced_by UUID
        )
        "#,
    ),
    (
        "auth_audit_events",
        r#"
        CREATE TABLE auth_audit_events (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            event TEXT NOT NULL,
            user_id UUID REFERENCES users(id) ON DELETE SET NULL,
            subject TEXT,
            session_id UUID,
            scopes TEXT[] NOT NULL DEFAULT '{}',
            ip TEXT,
            user_agent TEXT,
            details JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "terraform_states",
        r#"
        CREATE TABLE terraform_states (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            project_id UUID NOT NULL,
            workspace TEXT NOT NULL,
            backend_tag TEXT NOT NULL,
            backend_config JSONB NOT NULL DEFAULT '{}',
            serial BIGINT,
            terraform_version TEXT,
            lineage TEXT,
            resource_count BIGINT NOT NULL DEFAULT 0,
            output_count BIGINT NOT NULL DEFAULT 0,
            size_bytes BIGINT NOT NULL DEFAULT 0,
            checksum TEXT NOT NULL,
            canonical_json JSONB NOT NULL,
            imported_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "terraform_state_resources",
        r#"
        CREATE TABLE terraform_state_resources (
            id BIGSERIAL PRIMARY KEY,
            snapshot_id UUID NOT NULL REFERENCES terraform_states(id) ON DELETE CASCADE,
            address TEXT NOT NULL,
            module_address TEXT,
            mode TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            name TEXT NOT NULL,
            provider TEXT,
            index_key TEXT,
            schema_version BIGINT,
            attributes JSONB NOT NULL DEFAULT '{}',
            sensitive_attributes TEXT[] NOT NULL DEFAULT '{}',
            dependencies TEXT[] NOT NULL DEFAULT '{}'
        )
        "#,
    ),
    (
        "terraform_state_outputs",
        r#"
        CREATE TABLE terraform_state_outputs (
            id BIGSERIAL PRIMARY KEY,
            snapshot_id UUID NOT NULL REFERENCES terraform_states(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            value JSONB,
            sensitive BOOLEAN NOT NULL DEFAULT false,
            type_hint JSONB
        )
        "#,
    ),
    (
        "terraform_plans",
        r#"
        CREATE TABLE terraform_plans (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            project_id UUID NOT NULL,
            workspace TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "drift_detections",
        r#"
        CREATE TABLE drift_detections (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            project_id UUID NOT NULL,
            snapshot_id UUID REFERENCES terraform_states(id) ON DELETE SET NULL,
            workspace TEXT NOT NULL,
            method TEXT NOT NULL,
            added BIGINT NOT NULL DEFAULT 0,
            modified BIGINT NOT NULL DEFAULT 0,
            destroyed BIGINT NOT NULL DEFAULT 0,
            total_drifted BIGINT NOT NULL DEFAULT 0,
            details JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
    (
        "workspaces",
        r#"
        CREATE TABLE workspaces (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            project_id UUID NOT NULL,
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (project_id, name)
        )
        "#,
    ),
    (
        "workspace_variables",
        r#"
        CREATE TABLE workspace_variables (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            UNIQUE (workspace_id, key)
        )
        "#,
    ),
    (
        "workspace_comparisons",
        r#"
        CREATE TABLE workspace_comparisons (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            left_workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            right_workspace_id UUID NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            comparison_types TEXT[] NOT NULL DEFAULT '{}',
            difference_count BIGINT NOT NULL DEFAULT 0,
            differences JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
];

/// `(table, column, ADD COLUMN definition)`. These are columns the base
/// schema above doesn't carry yet on a cluster that predates them — each
/// is the additive, forward-only change spec §4.11 describes.
const COLUMNS: &[(&str, &str, &str)] = &[
    ("terraform_plans", "plan_json", "JSONB"),
    ("terraform_plans", "resource_changes_count", "BIGINT NOT NULL DEFAULT 0"),
    ("terraform_plans", "snapshot_id", "UUID REFERENCES terraform_states(id) ON DELETE SET NULL"),
    ("workspace_variables", "is_sensitive", "BOOLEAN NOT NULL DEFAULT false"),
    ("workspace_variables", "description", "TEXT"),
    ("auth_audit_events", "severity", "TEXT NOT NULL DEFAULT 'info'"),
];

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply every table and column that doesn't already exist, in order.
    /// Safe to call on every startup.
    pub async fn run(&self) -> Result<(), Error> {
        for (table, create_sql) in TABLES {
            if self.table_exists(table).await? {
                tracing::debug!(table, "migration: table already present, skipping");
                continue;
            }
            tracing::info!(table, "migration: creating table");
            sqlx::query(create_sql).execute(&self.pool).await?;
        }

        for (table, column, definition) in COLUMNS {
            if self.column_exists(table, column).await? {
                tracing::debug!(table, column, "migration: column already present, skipping");
                continue;
            }
            tracing::info!(table, column, "migration: adding column");
            let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {definition}");
            sqlx::query(&sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, Error> {
        let row: (bool,) = sqlx::query_as(
            r#"SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )"#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, Error> {
        let row: (bool,) = sqlx::query_as(
            r#"SELECT EXISTS (
                SELECT 1 FROM information_schema.columns
                WHERE table_schema = 'public' AND table_name = $1 AND column_name = $2
            )"#,
        )
        .bind(table)
        .bind(column)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_additive_column_targets_a_table_in_the_base_set() {
        let table_names: Vec<&str> = TABLES.iter().map(|(name, _)| *name).collect();
        for (table, _, _) in COLUMNS {
            assert!(table_names.contains(table), "{table} is not in TABLES");
        }
    }

    #[test]
    fn all_eleven_tables_from_the_persisted_layout_are_present() {
        let expected = [
            "users",
            "auth_refresh_sessions",
            "auth_audit_events",
            "terraform_states",
            "terraform_state_resources",
            "terraform_state_outputs",
            "terraform_plans",
            "drift_detections",
            "workspaces",
            "workspace_variables",
            "workspace_comparisons",
        ];
        let table_names: Vec<&str> = TABLES.iter().map(|(name, _)| *name).collect();
        for table in expected {
            assert!(table_names.contains(&table), "{table} missing from migration set");
        }
    }
}
