//! State Parser (C2)
//!
//! Decodes raw state bytes, flattens `resources[].instances[]` into
//! addressable `ResourceInstance` rows, and computes the sha256 checksum
//! of the *original* bytes (never a re-serialization).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// One addressable row extracted from a state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceInstance {
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

/// One entry from the state's `outputs` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Output {
    pub name: String,
    pub value: serde_json::Value,
    pub sensitive: bool,
    pub type_hint: Option<serde_json::Value>,
}

/// Fully parsed and normalized state document.
#[derive(Debug, Clone)]
pub struct ParsedState {
    pub serial: Option<i64>,
    pub terraform_version: Option<String>,
    pub lineage: Option<String>,
    pub resources: Vec<ResourceInstance>,
    pub outputs: Vec<Output>,
    pub size_bytes: usize,
    /// sha256 hex digest of the original input bytes.
    pub checksum: String,
    /// The parsed raw JSON object, retained so mutations (C4) can rewrite
    /// it directly and re-parse through this same module.
    pub raw: serde_json::Value,
}

/// Parse raw state bytes into a normalized document.
///
/// `backend_tag` is accepted for parity with callers that want to record
/// provenance but does not affect normalization.
pub fn parse_state(data: &[u8], _backend_tag: Option<&str>) -> Result<ParsedState, Error> {
    let size_bytes = data.len();
    let checksum = sha256_hex(data);

    let text = std::str::from_utf8(data).map_err(|e| Error::Parse(e.to_string()))?;
    let raw: serde_json::Value = serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;

    let serial = raw.get("serial").and_then(|v| v.as_i64());
    let terraform_version = raw.get("terraform_version").and_then(|v| v.as_str()).map(str::to_string);
    let lineage = raw.get("lineage").and_then(|v| v.as_str()).map(str::to_string);

    let resources = extract_resources(&raw);
    let outputs = extract_outputs(&raw);

    Ok(ParsedState {
        serial,
        terraform_version,
        lineage,
        resources,
        outputs,
        size_bytes,
        checksum,
        raw,
    })
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").unwrap();
    }
    out
}

pub(crate) fn extract_resources(raw: &serde_json::Value) -> Vec<ResourceInstance> {
    let mut normalized = Vec::new();

    let Some(resources) = raw.get("resources").and_then(|v| v.as_array()) else {
        return normalized;
    };

    for resource in resources {
        let explicit_address = resource.get("address").and_then(|v| v.as_str());
        let module_address = resource.get("module").and_then(|v| v.as_str()).map(str::to_string);
        let mode = resource.get("mode").and_then(|v| v.as_str()).unwrap_or("managed").to_string();
        let resource_type = resource.get("type").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
        let name = resource.get("name").and_then(|v| v.as_str()).unwrap_or("unnamed").to_string();
        let provider = resource.get("provider").and_then(|v| v.as_str()).map(str::to_string);
        let instances = resource.get("instances").and_then(|v| v.as_array()).cloned().unwrap_or_default();

        if instances.is_empty() {
            let address = explicit_address
                .map(str::to_string)
                .unwrap_or_else(|| compose_address(module_address.as_deref(), &mode, &resource_type, &name, None));
            normalized.push(ResourceInstance {
                address,
                module_address,
                mode,
                resource_type,
                name,
                provider,
                index_key: None,
                schema_version: None,
                attributes: serde_json::Value::Object(Default::default()),
                sensitive_attributes: Vec::new(),
                dependencies: Vec::new(),
            });
            continue;
        }

        for instance in &instances {
            let index_key = instance.get("index_key");
            let index_key_str = index_key.map(index_value_to_string);
            let schema_version = instance.get("schema_version").and_then(|v| v.as_i64());
            let attributes = instance.get("attributes").cloned().unwrap_or(serde_json::Value::Object(Default::default()));
            let sensitive = instance
                .get("sensitive_attributes")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let dependencies = instance
                .get("dependencies")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().map(value_to_string).collect())
                .unwrap_or_default();

            let address = compose_instance_address(
                explicit_address,
                module_address.as_deref(),
                &mode,
                &resource_type,
                &name,
                index_key_str.as_deref(),
            );

            normalized.push(ResourceInstance {
                address,
                module_address: module_address.clone(),
                mode: mode.clone(),
                resource_type: resource_type.clone(),
                name: name.clone(),
                provider: provider.clone(),
                index_key: index_key_str,
                schema_version,
                attributes,
                sensitive_attributes: normalize_sensitive_attributes(&sensitive),
                dependencies,
            });
        }
    }

    normalized
}

fn index_value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => value_to_string(other),
    }
}

fn value_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn normalize_sensitive_attributes(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(parts) => parts.iter().map(value_to_string).collect::<Vec<_>>().join("."),
            other => value_to_string(other),
        })
        .collect()
}

/// Compose an address from its constituent parts (no explicit `address`
/// present on the raw resource).
pub(crate) fn compose_address(
    module_address: Option<&str>,
    mode: &str,
    resource_type: &str,
    name: &str,
    index: Option<&str>,
) -> String {
    let mut base = format!("{mode}.{resource_type}.{name}");
    if let Some(module) = module_address {
        base = format!("{module}.{base}");
    }
    if let Some(index) = index {
        base = format!("{base}[{index}]");
    }
    base
}

fn compose_instance_address(
    explicit_address: Option<&str>,
    module_address: Option<&str>,
    mode: &str,
    resource_type: &str,
    name: &str,
    index: Option<&str>,
) -> String {
    let base = match explicit_address {
        Some(addr) => addr.to_string(),
        None => compose_address(module_address, mode, resource_type, name, None),
    };
    let Some(index) = index else {
        return base;
    };
    let suffix = format!("[{index}]");
    if base.ends_with(&suffix) {
        base
    } else {
        format!("{base}{suffix}")
    }
}

fn extract_outputs(raw: &serde_json::Value) -> Vec<Output> {
    let Some(outputs) = raw.get("outputs").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    outputs
        .iter()
        .map(|(name, payload)| Output {
            name: name.clone(),
            value: payload.get("value").cloned().unwrap_or(serde_json::Value::Null),
            sensitive: payload.get("sensitive").and_then(|v| v.as_bool()).unwrap_or(false),
            type_hint: payload.get("type").cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> Vec<u8> {
        let payload = json!({
            "serial": 4,
            "terraform_version": "1.8.5",
            "lineage": "1234",
            "outputs": {
                "bucket_name": {"value": "example-bucket", "sensitive": false, "type": "string"}
            },
            "resources": [
                {
                    "address": "aws_s3_bucket.example",
                    "mode": "managed",
                    "type": "aws_s3_bucket",
                    "name": "example",
                    "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                    "instances": [
                        {
                            "schema_version": 1,
                            "attributes": {"bucket": "example-bucket"},
                            "sensitive_attributes": [["bucket"]],
                            "dependencies": ["aws_kms_key.state"]
                        }
                    ]
                },
                {
                    "module": "module.logging",
                    "address": "module.logging.aws_cloudwatch_log_group.this",
                    "mode": "managed",
                    "type": "aws_cloudwatch_log_group",
                    "name": "this",
                    "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                    "instances": [
                        {
                            "index_key": 0,
                            "schema_version": 1,
                            "attributes": {"name": "log-group"},
                            "sensitive_attributes": [],
                            "dependencies": []
                        }
                    ]
                }
            ]
        });
        serde_json::to_vec(&payload).unwrap()
    }

    #[test]
    fn s1_ingest_and_list_shape() {
        let data = sample_state();
        let parsed = parse_state(&data, Some("local")).unwrap();

        assert_eq!(parsed.resources.len(), 2);
        assert_eq!(parsed.outputs.len(), 1);
        assert_eq!(parsed.resources[0].address, "aws_s3_bucket.example");
        assert_eq!(parsed.resources[1].module_address.as_deref(), Some("module.logging"));
        assert!(parsed.resources[1].address.ends_with("[0]"));
    }

    #[test]
    fn checksum_is_sha256_of_original_bytes() {
        let data = sample_state();
        let parsed = parse_state(&data, None).unwrap();
        assert_eq!(parsed.checksum, sha256_hex(&data));
        assert_eq!(parsed.size_bytes, data.len());
    }

    #[test]
    fn missing_instances_emits_single_empty_instance() {
        let payload = json!({
            "resources": [
                {"type": "aws_iam_role", "name": "state", "mode": "managed", "instances": []}
            ]
        });
        let data = serde_json::to_vec(&payload).unwrap();
        let parsed = parse_state(&data, None).unwrap();
        assert_eq!(parsed.resources.len(), 1);
        assert_eq!(parsed.resources[0].address, "managed.aws_iam_role.state");
        assert!(parsed.resources[0].index_key.is_none());
    }

    #[test]
    fn data_source_mode_includes_mode_segment_when_composed() {
        let payload = json!({
            "resources": [
                {"type": "aws_ami", "name": "latest", "mode": "data", "instances": []}
            ]
        });
        let data = serde_json::to_vec(&payload).unwrap();
        let parsed = parse_state(&data, None).unwrap();
        assert_eq!(parsed.resources[0].address, "data.aws_ami.latest");
    }

    #[test]
    fn managed_mode_address_always_carries_the_mode_segment() {
        assert_eq!(compose_address(None, "managed", "aws_s3_bucket", "example", None), "managed.aws_s3_bucket.example");
        assert_eq!(compose_address(Some("module.logging"), "managed", "aws_iam_role", "state", None), "module.logging.managed.aws_iam_role.state");
        assert_eq!(compose_address(None, "managed", "aws_instance", "x", Some("0")), "managed.aws_instance.x[0]");
    }

    #[test]
    fn unparseable_json_yields_parse_error() {
        let err = parse_state(b"{not json", None).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn sensitive_attribute_arrays_are_joined_with_dot() {
        let payload = json!({
            "resources": [{
                "address": "aws_s3_bucket.x",
                "type": "aws_s3_bucket",
                "name": "x",
                "instances": [{
                    "attributes": {},
                    "sensitive_attributes": [["a", "b"], "plain"],
                }]
            }]
        });
        let data = serde_json::to_vec(&payload).unwrap();
        let parsed = parse_state(&data, None).unwrap();
        assert_eq!(parsed.resources[0].sensitive_attributes, vec!["a.b".to_string(), "plain".to_string()]);
    }
}
