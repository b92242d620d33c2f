//! State Store (C4)
//!
//! The only component that persists or rewrites snapshots. Import is one
//! transactional write of a `StateSnapshot` plus its resource/output rows;
//! mutations always re-parse the rewritten JSON through C2 and replace the
//! derived rows wholesale, so `checksum`, counts, addresses, and indexes
//! never drift out of sync with the canonical JSON.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::drift::DriftSummary;
use super::parser::{self, Output, ParsedState, ResourceInstance};
use crate::error::Error;

/// Row-level summary returned from import and list/get queries. The
/// canonical JSON is elided unless explicitly requested to keep list
/// responses small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshotSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub workspace: String,
    pub backend_tag: String,
    pub serial: Option<i64>,
    pub terraform_version: Option<String>,
    pub lineage: Option<String>,
    pub resource_count: i64,
    pub output_count: i64,
    pub size_bytes: i64,
    pub checksum: String,
    pub canonical_json: Option<serde_json::Value>,
    pub imported_at: DateTime<Utc>,
}

pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a freshly parsed state document: snapshot row + every
    /// resource/output row, as a single transactional unit.
    pub async fn persist(
        &self,
        project_id: Uuid,
        workspace: &str,
        backend_tag: &str,
        backend_config: &serde_json::Value,
        parsed: &ParsedState,
    ) -> Result<StateSnapshotSummary, Error> {
        let canonical_json = canonicalize(&parsed.raw);
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            INSERT INTO terraform_states
                (project_id, workspace, backend_tag, backend_config, serial, terraform_version,
                 lineage, resource_count, output_count, size_bytes, checksum, canonical_json, imported_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
            RETURNING id, project_id, workspace, backend_tag, serial, terraform_version, lineage,
                      resource_count, output_count, size_bytes, checksum, canonical_json, imported_at
            "#,
        )
        .bind(project_id)
        .bind(workspace)
        .bind(backend_tag)
        .bind(backend_config)
        .bind(parsed.serial)
        .bind(&parsed.terraform_version)
        .bind(&parsed.lineage)
        .bind(parsed.resources.len() as i64)
        .bind(parsed.outputs.len() as i64)
        .bind(parsed.size_bytes as i64)
        .bind(&parsed.checksum)
        .bind(&canonical_json)
        .fetch_one(&mut *tx)
        .await?;

        insert_children(&mut tx, row.id, &parsed.resources, &parsed.outputs).await?;

        tx.commit().await?;
        Ok(row.into_summary())
    }

    pub async fn list(&self, project_id: Uuid, workspace: Option<&str>) -> Result<Vec<StateSnapshotSummary>, Error> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, project_id, workspace, backend_tag, serial, terraform_version, lineage,
                   resource_count, output_count, size_bytes, checksum, NULL::jsonb as canonical_json, imported_at
            FROM terraform_states
            WHERE project_id = $1 AND ($2::text IS NULL OR workspace = $2)
            ORDER BY imported_at DESC
            "#,
        )
        .bind(project_id)
        .bind(workspace)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SnapshotRow::into_summary).collect())
    }

    pub async fn get(&self, id: Uuid, include_snapshot: bool) -> Result<StateSnapshotSummary, Error> {
        let json_clause = if include_snapshot { "canonical_json" } else { "NULL::jsonb as canonical_json" };
        let query = format!(
            r#"
            SELECT id, project_id, workspace, backend_tag, serial, terraform_version, lineage,
                   resource_count, output_count, size_bytes, checksum, {json_clause}, imported_at
            FROM terraform_states WHERE id = $1
            "#
        );
        let row = sqlx::query_as::<_, SnapshotRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::StateNotFound(id.to_string()))?;
        Ok(row.into_summary())
    }

    pub async fn resources(&self, id: Uuid, limit: i64, offset: i64) -> Result<Vec<ResourceRow>, Error> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT address, module_address, mode, resource_type, name, provider, index_key,
                   schema_version, attributes, sensitive_attributes, dependencies
            FROM terraform_state_resources
            WHERE snapshot_id = $1
            ORDER BY address
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn outputs(&self, id: Uuid) -> Result<Vec<OutputRow>, Error> {
        let rows = sqlx::query_as::<_, OutputRow>(
            r#"
            SELECT name, value, sensitive, type_hint
            FROM terraform_state_outputs
            WHERE snapshot_id = $1
            ORDER BY name
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Remove every instance whose effective address is in `addresses`.
    /// Drops a raw resource block entirely once it has no instances left.
    ///
    /// `expected_checksum`, when given, is compared against the snapshot's
    /// stored checksum under the row lock before any mutation is applied.
    /// A mismatch means another writer committed a change since the caller
    /// last read this snapshot, and the mutation is rejected rather than
    /// silently clobbering it (§5: read-modify-write of a snapshot must be
    /// serializable; a losing concurrent write fails rather than succeeds).
    pub async fn remove_addresses(
        &self,
        id: Uuid,
        addresses: &[String],
        expected_checksum: Option<&str>,
    ) -> Result<StateSnapshotSummary, Error> {
        let target: BTreeSet<&str> = addresses.iter().map(String::as_str).collect();
        let mut tx = self.pool.begin().await?;
        let (checksum, mut raw) = self.raw_json(&mut tx, id).await?;
        check_checksum(expected_checksum, &checksum)?;

        let matched = remove_matching_instances(&mut raw, &target);
        if !matched {
            return Err(Error::Mutation("none of the requested addresses matched".to_string()));
        }

        self.reparse_and_replace(tx, id, raw).await
    }

    /// Move a resource's address. Both endpoints are normalized by
    /// stripping any `[...]` index suffix first, since the index-key
    /// component cannot be moved independently of its parent resource.
    ///
    /// See `remove_addresses` for the `expected_checksum` contract.
    pub async fn move_address(
        &self,
        id: Uuid,
        source: &str,
        destination: &str,
        expected_checksum: Option<&str>,
    ) -> Result<StateSnapshotSummary, Error> {
        let source = strip_index_suffix(source);
        let destination = strip_index_suffix(destination);

        let mut tx = self.pool.begin().await?;
        let (checksum, mut raw) = self.raw_json(&mut tx, id).await?;
        check_checksum(expected_checksum, &checksum)?;

        let moved = move_matching_resource(&mut raw, &source, &destination);
        if !moved {
            return Err(Error::Mutation("source not found".to_string()));
        }

        self.reparse_and_replace(tx, id, raw).await
    }

    pub async fn record_drift(
        &self,
        project_id: Uuid,
        workspace: &str,
        method: &str,
        summary: &DriftSummary,
        snapshot_id: Option<Uuid>,
    ) -> Result<Uuid, Error> {
        let total_drifted = (summary.resources_added + summary.resources_changed + summary.resources_destroyed) as i64;
        let details = serde_json::to_value(&summary.details)?;

        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO drift_detections
                (project_id, snapshot_id, workspace, method, added, modified, destroyed, total_drifted, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(snapshot_id)
        .bind(workspace)
        .bind(method)
        .bind(summary.resources_added as i64)
        .bind(summary.resources_changed as i64)
        .bind(summary.resources_destroyed as i64)
        .bind(total_drifted)
        .bind(details)
        .fetch_one(&self.pool)
        .await?;

        Ok(id.0)
    }

    async fn raw_json(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<(String, serde_json::Value), Error> {
        let row: (String, serde_json::Value) =
            sqlx::query_as("SELECT checksum, canonical_json FROM terraform_states WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| Error::StateNotFound(id.to_string()))?;
        Ok(row)
    }

    /// Re-parse `raw` through the state parser and replace every derived
    /// row wholesale. This is the round-trip invariant C4 exists to
    /// enforce: after a mutation, checksum/counts/addresses are always
    /// derived from the same bytes that are persisted.
    async fn reparse_and_replace(
        &self,
        mut tx: Transaction<'_, Postgres>,
        id: Uuid,
        raw: serde_json::Value,
    ) -> Result<StateSnapshotSummary, Error> {
        let bytes = serde_json::to_vec(&raw)?;
        let parsed = parser::parse_state(&bytes, None)?;
        let canonical_json = canonicalize(&parsed.raw);

        sqlx::query("DELETE FROM terraform_state_resources WHERE snapshot_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM terraform_state_outputs WHERE snapshot_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        insert_children(&mut tx, id, &parsed.resources, &parsed.outputs).await?;

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            UPDATE terraform_states
            SET serial = $2, terraform_version = $3, lineage = $4, resource_count = $5,
                output_count = $6, size_bytes = $7, checksum = $8, canonical_json = $9
            WHERE id = $1
            RETURNING id, project_id, workspace, backend_tag, serial, terraform_version, lineage,
                      resource_count, output_count, size_bytes, checksum, canonical_json, imported_at
            "#,
        )
        .bind(id)
        .bind(parsed.serial)
        .bind(&parsed.terraform_version)
        .bind(&parsed.lineage)
        .bind(parsed.resources.len() as i64)
        .bind(parsed.outputs.len() as i64)
        .bind(parsed.size_bytes as i64)
        .bind(&parsed.checksum)
        .bind(&canonical_json)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into_summary())
    }
}

async fn insert_children(
    tx: &mut Transaction<'_, Postgres>,
    snapshot_id: Uuid,
    resources: &[ResourceInstance],
    outputs: &[Output],
) -> Result<(), Error> {
    for resource in resources {
        sqlx::query(
            r#"
            INSERT INTO terraform_state_resources
                (snapshot_id, address, module_address, mode, resource_type, name, provider,
                 index_key, schema_version, attributes, sensitive_attributes, dependencies)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(snapshot_id)
        .bind(&resource.address)
        .bind(&resource.module_address)
        .bind(&resource.mode)
        .bind(&resource.resource_type)
        .bind(&resource.name)
        .bind(&resource.provider)
        .bind(&resource.index_key)
        .bind(resource.schema_version)
        .bind(&resource.attributes)
        .bind(&resource.sensitive_attributes)
        .bind(&resource.dependencies)
        .execute(&mut **tx)
        .await?;
    }

    for output in outputs {
        sqlx::query(
            r#"
            INSERT INTO terraform_state_outputs (snapshot_id, name, value, sensitive, type_hint)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(snapshot_id)
        .bind(&output.name)
        .bind(&output.value)
        .bind(output.sensitive)
        .bind(&output.type_hint)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn check_checksum(expected: Option<&str>, actual: &str) -> Result<(), Error> {
    match expected {
        Some(expected) if expected != actual => {
            Err(Error::Mutation("snapshot changed".to_string()))
        }
        _ => Ok(()),
    }
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    // `serde_json::Value::Object` is backed by a `BTreeMap` unless the
    // `preserve_order` feature is enabled (it is not, here), so a plain
    // round-trip through `Value` already yields stably-sorted keys.
    value.clone()
}

fn strip_index_suffix(address: &str) -> String {
    match address.rfind('[') {
        Some(idx) if address.ends_with(']') => address[..idx].to_string(),
        _ => address.to_string(),
    }
}

fn remove_matching_instances(raw: &mut serde_json::Value, target: &BTreeSet<&str>) -> bool {
    let mut matched = false;
    let Some(resources) = raw.get_mut("resources").and_then(|v| v.as_array_mut()) else {
        return false;
    };

    resources.retain_mut(|resource| {
        let module_address = resource.get("module").and_then(|v| v.as_str()).map(str::to_string);
        let mode = resource.get("mode").and_then(|v| v.as_str()).unwrap_or("managed").to_string();
        let resource_type = resource.get("type").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let name = resource.get("name").and_then(|v| v.as_str()).unwrap_or("unnamed").to_string();
        let explicit_address = resource.get("address").and_then(|v| v.as_str()).map(str::to_string);

        let Some(instances) = resource.get_mut("instances").and_then(|v| v.as_array_mut()) else {
            let address = explicit_address
                .clone()
                .unwrap_or_else(|| parser::compose_address(module_address.as_deref(), &mode, &resource_type, &name, None));
            if target.contains(address.as_str()) {
                matched = true;
                return false;
            }
            return true;
        };

        // A block that already has zero instances carries no index to match
        // against; only drop it if its own (unindexed) address is targeted,
        // the same rule the missing-`instances`-key branch above applies.
        if instances.is_empty() {
            let address = explicit_address
                .clone()
                .unwrap_or_else(|| parser::compose_address(module_address.as_deref(), &mode, &resource_type, &name, None));
            if target.contains(address.as_str()) {
                matched = true;
                return false;
            }
            return true;
        }

        instances.retain(|instance| {
            let index_key = instance.get("index_key").map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            let address = explicit_address
                .clone()
                .map(|base| match &index_key {
                    Some(idx) if !base.ends_with(&format!("[{idx}]")) => format!("{base}[{idx}]"),
                    _ => base,
                })
                .unwrap_or_else(|| {
                    parser::compose_address(module_address.as_deref(), &mode, &resource_type, &name, index_key.as_deref())
                });

            if target.contains(address.as_str()) {
                matched = true;
                false
            } else {
                true
            }
        });

        !instances.is_empty()
    });

    matched
}

fn move_matching_resource(raw: &mut serde_json::Value, source: &str, destination: &str) -> bool {
    let Some(resources) = raw.get_mut("resources").and_then(|v| v.as_array_mut()) else {
        return false;
    };

    for resource in resources.iter_mut() {
        let module_address = resource.get("module").and_then(|v| v.as_str()).map(str::to_string);
        let mode = resource.get("mode").and_then(|v| v.as_str()).unwrap_or("managed").to_string();
        let resource_type = resource.get("type").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let name = resource.get("name").and_then(|v| v.as_str()).unwrap_or("unnamed").to_string();
        let explicit_address = resource.get("address").and_then(|v| v.as_str()).map(str::to_string);

        let effective = explicit_address
            .clone()
            .unwrap_or_else(|| parser::compose_address(module_address.as_deref(), &mode, &resource_type, &name, None));

        if effective == source {
            resource["address"] = serde_json::Value::String(destination.to_string());
            return true;
        }
    }

    false
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    project_id: Uuid,
    workspace: String,
    backend_tag: String,
    serial: Option<i64>,
    terraform_version: Option<String>,
    lineage: Option<String>,
    resource_count: i64,
    output_count: i64,
    size_bytes: i64,
    checksum: String,
    canonical_json: Option<serde_json::Value>,
    imported_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_summary(self) -> StateSnapshotSummary {
        StateSnapshotSummary {
            id: self.id,
            project_id: self.project_id,
            workspace: self.workspace,
            backend_tag: self.backend_tag,
            serial: self.serial,
            terraform_version: self.terraform_version,
            lineage: self.lineage,
            resource_count: self.resource_count,
            output_count: self.output_count,
            size_bytes: self.size_bytes,
            checksum: self.checksum,
            canonical_json: self.canonical_json,
            imported_at: self.imported_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct ResourceRow {
    pub address: String,
    pub module_address: Option<String>,
    pub mode: String,
    pub resource_type: String,
    pub name: String,
    pub provider: Option<String>,
    pub index_key: Option<String>,
    pub schema_version: Option<i64>,
    pub attributes: serde_json::Value,
    pub sensitive_attributes: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, sqlx::FromRow, Serialize, Deserialize)]
pub struct OutputRow {
    pub name: String,
    pub value: serde_json::Value,
    pub sensitive: bool,
    pub type_hint: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_index_suffix_removes_bracketed_index_only() {
        assert_eq!(strip_index_suffix("aws_instance.x[0]"), "aws_instance.x");
        assert_eq!(strip_index_suffix("aws_instance.x"), "aws_instance.x");
        assert_eq!(strip_index_suffix("aws_instance.x[\"key\"]"), "aws_instance.x");
    }

    #[test]
    fn remove_matching_instances_drops_empty_blocks() {
        let mut raw = json!({
            "resources": [
                {
                    "address": "aws_s3_bucket.example",
                    "mode": "managed",
                    "type": "aws_s3_bucket",
                    "name": "example",
                    "instances": [{"attributes": {}}]
                }
            ]
        });
        let target: BTreeSet<&str> = ["aws_s3_bucket.example"].into_iter().collect();
        let matched = remove_matching_instances(&mut raw, &target);
        assert!(matched);
        assert_eq!(raw["resources"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn remove_matching_instances_keeps_untargeted_empty_instance_block() {
        let mut raw = json!({
            "resources": [
                {
                    "address": "aws_iam_role.untouched",
                    "mode": "managed",
                    "type": "aws_iam_role",
                    "name": "untouched",
                    "instances": []
                },
                {
                    "address": "aws_s3_bucket.example",
                    "mode": "managed",
                    "type": "aws_s3_bucket",
                    "name": "example",
                    "instances": [{"attributes": {}}]
                }
            ]
        });
        let target: BTreeSet<&str> = ["aws_s3_bucket.example"].into_iter().collect();
        let matched = remove_matching_instances(&mut raw, &target);
        assert!(matched);
        let remaining = raw["resources"].as_array().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["address"], "aws_iam_role.untouched");
    }

    #[test]
    fn remove_matching_instances_drops_targeted_empty_instance_block() {
        let mut raw = json!({
            "resources": [
                {
                    "address": "aws_iam_role.targeted",
                    "mode": "managed",
                    "type": "aws_iam_role",
                    "name": "targeted",
                    "instances": []
                }
            ]
        });
        let target: BTreeSet<&str> = ["aws_iam_role.targeted"].into_iter().collect();
        let matched = remove_matching_instances(&mut raw, &target);
        assert!(matched);
        assert_eq!(raw["resources"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn remove_matching_instances_no_match_returns_false() {
        let mut raw = json!({
            "resources": [
                {"address": "aws_s3_bucket.example", "mode": "managed", "type": "aws_s3_bucket", "name": "example", "instances": [{"attributes": {}}]}
            ]
        });
        let target: BTreeSet<&str> = ["aws_iam_role.nonexistent"].into_iter().collect();
        assert!(!remove_matching_instances(&mut raw, &target));
    }

    #[test]
    fn check_checksum_rejects_mismatch_and_accepts_match_or_absence() {
        assert!(check_checksum(None, "abc").is_ok());
        assert!(check_checksum(Some("abc"), "abc").is_ok());
        assert!(matches!(
            check_checksum(Some("abc"), "def"),
            Err(Error::Mutation(_))
        ));
    }

    #[test]
    fn move_matching_resource_rewrites_address_field() {
        let mut raw = json!({
            "resources": [
                {"address": "aws_s3_bucket.old", "mode": "managed", "type": "aws_s3_bucket", "name": "old", "instances": [{"attributes": {}}]}
            ]
        });
        assert!(move_matching_resource(&mut raw, "aws_s3_bucket.old", "aws_s3_bucket.new"));
        assert_eq!(raw["resources"][0]["address"], "aws_s3_bucket.new");
    }
}
