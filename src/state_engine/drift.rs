//! Drift Analyzer (C3)
//!
//! Compares the resource addresses recorded in a parsed state snapshot
//! against the addresses and resource changes a Terraform plan document
//! carries, producing an action-categorized summary.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::parser::ParsedState;

/// Action-categorized drift summary, capped detail lists included.
#[derive(Debug, Clone, Serialize)]
pub struct DriftSummary {
    pub state_resource_count: usize,
    pub plan_resource_count: usize,
    pub resources_added: usize,
    pub resources_changed: usize,
    pub resources_destroyed: usize,
    pub state_only_resources: usize,
    pub plan_only_resources: usize,
    pub details: DriftDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftDetails {
    pub state_only: Vec<String>,
    pub plan_only: Vec<String>,
    pub plan_actions: BTreeMap<String, usize>,
}

/// Compare a parsed state snapshot against a plan document.
///
/// `plan` must carry `planned_values.root_module` (recursively nested via
/// `child_modules`, each with `resources[].address`) and
/// `resource_changes[].change.actions`.
pub fn analyze_drift(state: &ParsedState, plan: &serde_json::Value) -> DriftSummary {
    let plan_addresses = collect_plan_addresses(plan);
    let state_addresses: BTreeSet<String> = state.resources.iter().map(|r| r.address.clone()).collect();

    let state_only: Vec<String> = state_addresses.difference(&plan_addresses).cloned().collect();
    let plan_only: Vec<String> = plan_addresses.difference(&state_addresses).cloned().collect();

    let plan_actions = summarize_plan_actions(plan);

    let added = *plan_actions.get("create").unwrap_or(&0);
    let changed = *plan_actions.get("update").unwrap_or(&0);
    let destroyed = *plan_actions.get("delete").unwrap_or(&0);

    DriftSummary {
        state_resource_count: state_addresses.len(),
        plan_resource_count: plan_addresses.len(),
        resources_added: added,
        resources_changed: changed,
        resources_destroyed: destroyed,
        state_only_resources: state_only.len(),
        plan_only_resources: plan_only.len(),
        details: DriftDetails {
            state_only: state_only.into_iter().take(100).collect(),
            plan_only: plan_only.into_iter().take(100).collect(),
            plan_actions,
        },
    }
}

fn collect_plan_addresses(plan: &serde_json::Value) -> BTreeSet<String> {
    let mut addresses = BTreeSet::new();
    if let Some(root_module) = plan.pointer("/planned_values/root_module") {
        collect_module_addresses(root_module, &mut addresses);
    }
    addresses
}

fn collect_module_addresses(module: &serde_json::Value, out: &mut BTreeSet<String>) {
    if let Some(resources) = module.get("resources").and_then(|v| v.as_array()) {
        for resource in resources {
            if let Some(address) = resource.get("address").and_then(|v| v.as_str()) {
                out.insert(address.to_string());
            }
        }
    }
    if let Some(children) = module.get("child_modules").and_then(|v| v.as_array()) {
        for child in children {
            collect_module_addresses(child, out);
        }
    }
}

fn summarize_plan_actions(plan: &serde_json::Value) -> BTreeMap<String, usize> {
    let mut summary = BTreeMap::new();
    summary.insert("create".to_string(), 0);
    summary.insert("update".to_string(), 0);
    summary.insert("delete".to_string(), 0);

    let Some(changes) = plan.get("resource_changes").and_then(|v| v.as_array()) else {
        return summary;
    };

    for change in changes {
        let actions: Vec<&str> = change
            .pointer("/change/actions")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|a| a.as_str()).collect())
            .unwrap_or_default();

        let relevant: Vec<&str> = actions
            .into_iter()
            .filter(|a| matches!(*a, "create" | "update" | "delete"))
            .collect();

        if relevant.is_empty() {
            continue;
        }

        let key = if relevant == ["create"] {
            "create"
        } else if relevant == ["delete"] {
            "delete"
        } else {
            "update"
        };
        *summary.entry(key.to_string()).or_insert(0) += 1;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_engine::parser::parse_state;
    use serde_json::json;

    fn s1_state() -> ParsedState {
        let payload = json!({
            "resources": [
                {"address": "aws_s3_bucket.example", "mode": "managed", "type": "aws_s3_bucket", "name": "example", "instances": [{"attributes": {}}]},
                {"module": "module.logging", "address": "module.logging.aws_cloudwatch_log_group.this", "mode": "managed", "type": "aws_cloudwatch_log_group", "name": "this", "instances": [{"index_key": 0, "attributes": {}}]}
            ]
        });
        parse_state(&serde_json::to_vec(&payload).unwrap(), None).unwrap()
    }

    #[test]
    fn s2_drift_scenario() {
        let state = s1_state();
        let plan = json!({
            "planned_values": {
                "root_module": {
                    "resources": [
                        {"address": "aws_s3_bucket.example"},
                        {"address": "module.logging.aws_cloudwatch_log_group.this[0]"}
                    ]
                }
            },
            "resource_changes": [
                {"address": "aws_s3_bucket.example", "change": {"actions": ["update"]}},
                {"address": "module.logging.aws_cloudwatch_log_group.this[0]", "change": {"actions": ["delete"]}},
                {"address": "aws_iam_role.state", "change": {"actions": ["create"]}}
            ]
        });

        let summary = analyze_drift(&state, &plan);
        assert_eq!(summary.resources_added, 1);
        assert_eq!(summary.resources_changed, 1);
        assert_eq!(summary.resources_destroyed, 1);
        assert_eq!(summary.state_only_resources, 0);
        assert_eq!(summary.plan_only_resources, 0);
    }

    #[test]
    fn irrelevant_and_mixed_actions_are_classified_as_update() {
        let state = s1_state();
        let plan = json!({
            "planned_values": {"root_module": {"resources": []}},
            "resource_changes": [
                {"address": "a", "change": {"actions": ["no-op"]}},
                {"address": "b", "change": {"actions": ["create", "delete"]}}
            ]
        });
        let summary = analyze_drift(&state, &plan);
        assert_eq!(summary.resources_added, 0);
        assert_eq!(summary.resources_destroyed, 0);
        assert_eq!(summary.resources_changed, 1);
    }

    #[test]
    fn detail_lists_are_capped_and_sorted() {
        let state = s1_state();
        let mut resources = Vec::new();
        for i in 0..150 {
            resources.push(json!({"address": format!("zz_plan_only_{i:04}")}));
        }
        let plan = json!({
            "planned_values": {"root_module": {"resources": resources}},
            "resource_changes": []
        });
        let summary = analyze_drift(&state, &plan);
        assert_eq!(summary.plan_only_resources, 150);
        assert_eq!(summary.details.plan_only.len(), 100);
        assert!(summary.details.plan_only.windows(2).all(|w| w[0] < w[1]));
    }
}
