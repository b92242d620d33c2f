//! Workspace Comparator (C10)
//!
//! Diffs two workspaces across up to three axes: variables, state metadata,
//! and resource sets. Each axis is a pure, synchronous function over plain
//! data so it can be exercised without a database; the async orchestration
//! in [`compare`] only gathers the inputs and persists the result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::state_engine::StateStore;

use super::repository::{Workspace, WorkspaceRepository, WorkspaceVariable};

const REDACTED: &str = "<redacted>";

/// Which axis produced a difference. Doubles as the requested-comparison
/// selector: requesting `ComparisonType::Config` runs the state-metadata
/// diff (which emits `config`-category differences); requesting
/// `ComparisonType::State` runs the resource-set diff (which emits
/// `state`-category differences). This cross-naming is the specification's,
/// not an accident of this implementation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    Variables,
    State,
    Config,
}

impl std::fmt::Display for ComparisonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Variables => "variables",
            Self::State => "state",
            Self::Config => "config",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceCategory {
    Variables,
    Config,
    State,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Difference {
    pub category: DifferenceCategory,
    pub key: String,
    pub severity: Severity,
    pub left: Option<String>,
    pub right: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub comparison_id: Uuid,
    pub difference_count: usize,
    pub differences: Vec<Difference>,
}

/// Key-by-key diff over the union of both workspaces' variables.
///
/// Sensitive variables are compared through a fixed redaction sentinel and
/// always produce a difference, regardless of whether the underlying
/// values happen to be equal — the point is to flag that a sensitive
/// value exists at all, not to leak whether it matches.
pub fn compare_variables(
    left: &[WorkspaceVariable],
    right: &[WorkspaceVariable],
    info_keys: &[String],
) -> Vec<Difference> {
    let left_by_key: BTreeMap<&str, &WorkspaceVariable> =
        left.iter().map(|v| (v.key.as_str(), v)).collect();
    let right_by_key: BTreeMap<&str, &WorkspaceVariable> =
        right.iter().map(|v| (v.key.as_str(), v)).collect();

    let keys: BTreeSet<&str> = left_by_key.keys().chain(right_by_key.keys()).copied().collect();

    let mut differences = Vec::new();
    for key in keys {
        let left_var = left_by_key.get(key);
        let right_var = right_by_key.get(key);
        let sensitive = left_var.map(|v| v.is_sensitive).unwrap_or(false)
            || right_var.map(|v| v.is_sensitive).unwrap_or(false);

        let left_value = left_var.map(|v| display_value(v, sensitive));
        let right_value = right_var.map(|v| display_value(v, sensitive));

        let differs = sensitive || left_value != right_value;
        if !differs {
            continue;
        }

        differences.push(Difference {
            category: DifferenceCategory::Variables,
            key: key.to_string(),
            severity: variable_severity(key, info_keys),
            left: left_value,
            right: right_value,
        });
    }

    differences
}

fn display_value(variable: &WorkspaceVariable, sensitive: bool) -> String {
    if sensitive {
        REDACTED.to_string()
    } else {
        variable.value.clone()
    }
}

fn variable_severity(key: &str, info_keys: &[String]) -> Severity {
    if info_keys.iter().any(|k| k == key) {
        Severity::Info
    } else if key.to_lowercase().contains("secret") || key.to_lowercase().contains("password") {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// State-metadata fields, each with a fixed severity, per spec §4.10.
pub struct StateMetadata {
    pub backend_tag: String,
    pub terraform_version: Option<String>,
    pub lineage: Option<String>,
    pub serial: Option<i64>,
}

pub fn compare_state_metadata(left: &StateMetadata, right: &StateMetadata) -> Vec<Difference> {
    let mut differences = Vec::new();

    if left.backend_tag != right.backend_tag {
        differences.push(Difference {
            category: DifferenceCategory::Config,
            key: "backend_type".to_string(),
            severity: Severity::Critical,
            left: Some(left.backend_tag.clone()),
            right: Some(right.backend_tag.clone()),
        });
    }
    if left.terraform_version != right.terraform_version {
        differences.push(Difference {
            category: DifferenceCategory::Config,
            key: "terraform_version".to_string(),
            severity: Severity::Warning,
            left: left.terraform_version.clone(),
            right: right.terraform_version.clone(),
        });
    }
    if left.lineage != right.lineage {
        differences.push(Difference {
            category: DifferenceCategory::Config,
            key: "lineage".to_string(),
            severity: Severity::Warning,
            left: left.lineage.clone(),
            right: right.lineage.clone(),
        });
    }
    if left.serial != right.serial {
        differences.push(Difference {
            category: DifferenceCategory::Config,
            key: "serial".to_string(),
            severity: Severity::Info,
            left: left.serial.map(|s| s.to_string()),
            right: right.serial.map(|s| s.to_string()),
        });
    }

    differences
}

/// Symmetric set diff over resource addresses. Each address that is
/// present on only one side produces a `state`-category `warning`
/// difference marked `present`/`absent`.
pub fn compare_resource_sets(left: &BTreeSet<String>, right: &BTreeSet<String>) -> Vec<Difference> {
    let mut differences = Vec::new();

    for address in left.difference(right) {
        differences.push(Difference {
            category: DifferenceCategory::State,
            key: address.clone(),
            severity: Severity::Warning,
            left: Some("present".to_string()),
            right: Some("absent".to_string()),
        });
    }
    for address in right.difference(left) {
        differences.push(Difference {
            category: DifferenceCategory::State,
            key: address.clone(),
            severity: Severity::Warning,
            left: Some("absent".to_string()),
            right: Some("present".to_string()),
        });
    }

    differences.sort_by(|a, b| a.key.cmp(&b.key));
    differences
}

/// Run the requested comparison axes between two workspaces and persist
/// the result.
pub async fn compare(
    repo: &WorkspaceRepository,
    state_store: &StateStore,
    left_workspace_id: Uuid,
    right_workspace_id: Uuid,
    types: &[ComparisonType],
    info_keys: &[String],
) -> Result<ComparisonResult, Error> {
    let left_workspace = repo.get_workspace(left_workspace_id).await?;
    let right_workspace = repo.get_workspace(right_workspace_id).await?;

    let mut differences = Vec::new();

    if types.contains(&ComparisonType::Variables) {
        let left_vars = repo.list_variables(left_workspace_id).await?;
        let right_vars = repo.list_variables(right_workspace_id).await?;
        differences.extend(compare_variables(&left_vars, &right_vars, info_keys));
    }

    if types.contains(&ComparisonType::Config) {
        let left_meta = latest_state_metadata(state_store, &left_workspace).await?;
        let right_meta = latest_state_metadata(state_store, &right_workspace).await?;
        if let (Some(left_meta), Some(right_meta)) = (left_meta, right_meta) {
            differences.extend(compare_state_metadata(&left_meta, &right_meta));
        }
    }

    if types.contains(&ComparisonType::State) {
        let left_addresses = latest_resource_addresses(state_store, &left_workspace).await?;
        let right_addresses = latest_resource_addresses(state_store, &right_workspace).await?;
        differences.extend(compare_resource_sets(&left_addresses, &right_addresses));
    }

    let comparison_id = repo
        .record_comparison(left_workspace_id, right_workspace_id, types, &differences)
        .await?;

    Ok(ComparisonResult {
        comparison_id,
        difference_count: differences.len(),
        differences,
    })
}

async fn latest_state_metadata(
    state_store: &StateStore,
    workspace: &Workspace,
) -> Result<Option<StateMetadata>, Error> {
    let snapshots = state_store.list(workspace.project_id, Some(&workspace.name)).await?;
    Ok(snapshots.into_iter().next().map(|s| StateMetadata {
        backend_tag: s.backend_tag,
        terraform_version: s.terraform_version,
        lineage: s.lineage,
        serial: s.serial,
    }))
}

async fn latest_resource_addresses(
    state_store: &StateStore,
    workspace: &Workspace,
) -> Result<BTreeSet<String>, Error> {
    let snapshots = state_store.list(workspace.project_id, Some(&workspace.name)).await?;
    let Some(latest) = snapshots.into_iter().next() else {
        return Ok(BTreeSet::new());
    };

    const PAGE: i64 = 10_000;
    let resources = state_store.resources(latest.id, PAGE, 0).await?;
    Ok(resources.into_iter().map(|r| r.address).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(key: &str, value: &str, sensitive: bool) -> WorkspaceVariable {
        WorkspaceVariable {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            key: key.to_string(),
            value: value.to_string(),
            is_sensitive: sensitive,
            description: None,
        }
    }

    #[test]
    fn identical_non_sensitive_variables_produce_no_difference() {
        let left = vec![var("region", "us-east-1", false)];
        let right = vec![var("region", "us-east-1", false)];
        assert!(compare_variables(&left, &right, &[]).is_empty());
    }

    #[test]
    fn sensitive_variable_always_differs_even_when_equal() {
        let left = vec![var("db_password", "hunter2", true)];
        let right = vec![var("db_password", "hunter2", true)];
        let diffs = compare_variables(&left, &right, &[]);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].left.as_deref(), Some(REDACTED));
        assert_eq!(diffs[0].severity, Severity::Critical);
    }

    #[test]
    fn severity_defaults_to_warning_unless_info_listed_or_secret_like() {
        let left = vec![var("instance_type", "t3.micro", false)];
        let right = vec![var("instance_type", "t3.large", false)];
        let diffs = compare_variables(&left, &right, &[]);
        assert_eq!(diffs[0].severity, Severity::Warning);

        let diffs = compare_variables(&left, &right, &["instance_type".to_string()]);
        assert_eq!(diffs[0].severity, Severity::Info);

        let left = vec![var("api_secret_key", "a", false)];
        let right = vec![var("api_secret_key", "b", false)];
        let diffs = compare_variables(&left, &right, &[]);
        assert_eq!(diffs[0].severity, Severity::Critical);
    }

    #[test]
    fn missing_on_one_side_is_a_difference() {
        let left = vec![var("region", "us-east-1", false)];
        let right: Vec<WorkspaceVariable> = Vec::new();
        let diffs = compare_variables(&left, &right, &[]);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].right, None);
    }

    #[test]
    fn state_metadata_emits_one_difference_per_mismatched_field() {
        let left = StateMetadata {
            backend_tag: "s3".to_string(),
            terraform_version: Some("1.7.0".to_string()),
            lineage: Some("abc".to_string()),
            serial: Some(3),
        };
        let right = StateMetadata {
            backend_tag: "local".to_string(),
            terraform_version: Some("1.7.0".to_string()),
            lineage: Some("def".to_string()),
            serial: Some(4),
        };
        let diffs = compare_state_metadata(&left, &right);
        assert_eq!(diffs.len(), 3);
        let backend_diff = diffs.iter().find(|d| d.key == "backend_type").unwrap();
        assert_eq!(backend_diff.severity, Severity::Critical);
        let serial_diff = diffs.iter().find(|d| d.key == "serial").unwrap();
        assert_eq!(serial_diff.severity, Severity::Info);
    }

    #[test]
    fn resource_set_symmetric_diff_marks_present_absent() {
        let left: BTreeSet<String> = ["a.one", "a.two"].into_iter().map(String::from).collect();
        let right: BTreeSet<String> = ["a.two", "a.three"].into_iter().map(String::from).collect();

        let diffs = compare_resource_sets(&left, &right);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.severity == Severity::Warning));
        assert!(diffs.iter().all(|d| d.category == DifferenceCategory::State));

        let one = diffs.iter().find(|d| d.key == "a.one").unwrap();
        assert_eq!(one.left.as_deref(), Some("present"));
        assert_eq!(one.right.as_deref(), Some("absent"));

        let three = diffs.iter().find(|d| d.key == "a.three").unwrap();
        assert_eq!(three.left.as_deref(), Some("absent"));
        assert_eq!(three.right.as_deref(), Some("present"));
    }
}
