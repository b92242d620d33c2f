//! Backend Adapters (C1)
//!
//! Fetches raw state bytes from wherever a workspace's state actually lives.
//! Every adapter maps transport, authorization, and missing-object failures
//! onto a single `Error::Backend{kind, ..}` so C2 never has to special-case
//! the origin of the bytes it receives.

use std::time::Duration;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{BackendErrorKind, Error};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tagged backend configuration, one variant per supported origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Local {
        path: String,
    },
    S3 {
        bucket: String,
        key: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        profile: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        session_token: Option<String>,
    },
    Azurerm {
        storage_account: String,
        container: String,
        key: String,
        #[serde(default)]
        sas_token: Option<String>,
        #[serde(default)]
        connection_string: Option<String>,
    },
    Gcs {
        bucket: String,
        prefix: String,
        #[serde(default)]
        credentials_file: Option<String>,
        #[serde(default)]
        project: Option<String>,
    },
    Remote {
        #[serde(default)]
        hostname: Option<String>,
        organization: String,
        workspace: String,
        #[serde(default)]
        token: Option<String>,
    },
}

impl BackendConfig {
    /// A short tag identifying which adapter produced a fetch, recorded
    /// alongside the fetched bytes for provenance.
    pub fn tag(&self) -> &'static str {
        match self {
            BackendConfig::Local { .. } => "local",
            BackendConfig::S3 { .. } => "s3",
            BackendConfig::Azurerm { .. } => "azurerm",
            BackendConfig::Gcs { .. } => "gcs",
            BackendConfig::Remote { .. } => "remote",
        }
    }
}

/// Raw bytes fetched from a backend, plus provenance.
#[derive(Debug, Clone)]
pub struct FetchedState {
    pub backend_tag: &'static str,
    pub size_bytes: usize,
    pub raw_bytes: Vec<u8>,
}

/// Fetches the full state document for a given configuration as a byte
/// buffer. Implementations must not hold any lock across the fetch.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn fetch(&self, config: &BackendConfig) -> Result<FetchedState, Error>;
}

/// Dispatches to the adapter implied by the config's tag.
pub struct StateBackend {
    http: reqwest::Client,
}

impl Default for StateBackend {
    fn default() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

impl StateBackend {
    /// Build a backend adapter with a configured fetch timeout, in seconds.
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

#[async_trait]
impl BackendAdapter for StateBackend {
    async fn fetch(&self, config: &BackendConfig) -> Result<FetchedState, Error> {
        match config {
            BackendConfig::Local { path } => fetch_local(path).await,
            BackendConfig::S3 { bucket, key, region, endpoint, .. } => {
                fetch_object_store(build_s3_store(bucket, region.as_deref(), endpoint.as_deref())?, key, "s3").await
            }
            BackendConfig::Azurerm { storage_account, container, key, sas_token, connection_string } => {
                fetch_object_store(
                    build_azure_store(storage_account, container, sas_token.as_deref(), connection_string.as_deref())?,
                    key,
                    "azurerm",
                )
                .await
            }
            BackendConfig::Gcs { bucket, prefix, credentials_file, .. } => {
                fetch_object_store(build_gcs_store(bucket, credentials_file.as_deref())?, prefix, "gcs").await
            }
            BackendConfig::Remote { hostname, organization, workspace, token } => {
                self.fetch_remote(hostname.as_deref(), organization, workspace, token.as_deref()).await
            }
        }
    }
}

impl StateBackend {
    /// Two-hop Terraform Cloud fetch: resolve the current state version's
    /// download URL, then GET it.
    async fn fetch_remote(
        &self,
        hostname: Option<&str>,
        organization: &str,
        workspace: &str,
        token: Option<&str>,
    ) -> Result<FetchedState, Error> {
        let host = hostname.unwrap_or("app.terraform.io");
        let bearer = token
            .map(str::to_string)
            .or_else(|| std::env::var("TERRAFORM_CLOUD_TOKEN").ok())
            .ok_or_else(|| Error::Backend { kind: BackendErrorKind::Unauthorized, cause: "no Terraform Cloud token configured".to_string() })?;

        let workspace_url = format!(
            "https://{host}/api/v2/organizations/{organization}/workspaces/{workspace}"
        );
        let workspace_resp = self
            .http
            .get(&workspace_url)
            .bearer_auth(&bearer)
            .header("Content-Type", "application/vnd.api+json")
            .send()
            .await
            .map_err(|e| map_reqwest_error(e))?;

        let workspace_body: serde_json::Value = workspace_resp.json().await.map_err(|e| Error::Backend {
            kind: BackendErrorKind::Transport,
            cause: e.to_string(),
        })?;
        let workspace_id = workspace_body
            .pointer("/data/id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Backend { kind: BackendErrorKind::NotFound, cause: "workspace id missing from response".to_string() })?;

        let current_url = format!("https://{host}/api/v2/workspaces/{workspace_id}/current-state-version");
        let current_resp = self
            .http
            .get(&current_url)
            .bearer_auth(&bearer)
            .header("Content-Type", "application/vnd.api+json")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if current_resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Backend { kind: BackendErrorKind::NotFound, cause: "workspace has no current state version".to_string() });
        }

        let current_body: serde_json::Value = current_resp.json().await.map_err(|e| Error::Backend {
            kind: BackendErrorKind::Transport,
            cause: e.to_string(),
        })?;
        let download_url = current_body
            .pointer("/data/attributes/hosted-state-download-url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Backend { kind: BackendErrorKind::NotFound, cause: "hosted-state-download-url missing".to_string() })?;

        let state_resp = self.http.get(download_url).send().await.map_err(map_reqwest_error)?;
        let bytes = state_resp.bytes().await.map_err(|e| Error::Backend { kind: BackendErrorKind::Transport, cause: e.to_string() })?;

        Ok(FetchedState { backend_tag: "remote", size_bytes: bytes.len(), raw_bytes: bytes.to_vec() })
    }
}

async fn fetch_local(path: &str) -> Result<FetchedState, Error> {
    let store = LocalFileSystem::new();
    let object_path = ObjectPath::from_filesystem_path(path)
        .map_err(|e| Error::Backend { kind: BackendErrorKind::NotFound, cause: e.to_string() })?;
    let result = store.get(&object_path).await.map_err(map_object_store_error)?;
    let bytes = result.bytes().await.map_err(map_object_store_error)?;
    Ok(FetchedState { backend_tag: "local", size_bytes: bytes.len(), raw_bytes: bytes.to_vec() })
}

async fn fetch_object_store(
    store: Box<dyn ObjectStore>,
    key: &str,
    tag: &'static str,
) -> Result<FetchedState, Error> {
    let path = ObjectPath::from(key);
    let result = store.get(&path).await.map_err(map_object_store_error)?;
    let bytes = result.bytes().await.map_err(map_object_store_error)?;
    Ok(FetchedState { backend_tag: tag, size_bytes: bytes.len(), raw_bytes: bytes.to_vec() })
}

fn build_s3_store(bucket: &str, region: Option<&str>, endpoint: Option<&str>) -> Result<Box<dyn ObjectStore>, Error> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if let Some(region) = region {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    let store = builder
        .build()
        .map_err(|e| Error::Backend { kind: BackendErrorKind::Transport, cause: format!("failed to build s3 client: {e}") })?;
    Ok(Box::new(store))
}

fn build_azure_store(
    storage_account: &str,
    container: &str,
    sas_token: Option<&str>,
    connection_string: Option<&str>,
) -> Result<Box<dyn ObjectStore>, Error> {
    let mut builder = MicrosoftAzureBuilder::from_env()
        .with_account(storage_account)
        .with_container_name(container);
    if let Some(sas) = sas_token {
        builder = builder.with_config(object_store::azure::AzureConfigKey::SasKey, sas);
    }
    if let Some(conn) = connection_string {
        builder = builder.with_config(object_store::azure::AzureConfigKey::ConnectionString, conn);
    }
    let store = builder
        .build()
        .map_err(|e| Error::Backend { kind: BackendErrorKind::Transport, cause: format!("failed to build azure client: {e}") })?;
    Ok(Box::new(store))
}

fn build_gcs_store(bucket: &str, credentials_file: Option<&str>) -> Result<Box<dyn ObjectStore>, Error> {
    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
    if let Some(path) = credentials_file {
        builder = builder.with_service_account_path(path);
    }
    let store = builder
        .build()
        .map_err(|e| Error::Backend { kind: BackendErrorKind::Transport, cause: format!("failed to build gcs client: {e}") })?;
    Ok(Box::new(store))
}

fn map_object_store_error(err: object_store::Error) -> Error {
    let kind = match &err {
        object_store::Error::NotFound { .. } => BackendErrorKind::NotFound,
        object_store::Error::Unauthenticated { .. } | object_store::Error::PermissionDenied { .. } => BackendErrorKind::Unauthorized,
        _ => BackendErrorKind::Transport,
    };
    Error::Backend { kind, cause: err.to_string() }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    let kind = if err.is_timeout() {
        BackendErrorKind::Timeout
    } else if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) || err.status() == Some(reqwest::StatusCode::FORBIDDEN) {
        BackendErrorKind::Unauthorized
    } else if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
        BackendErrorKind::NotFound
    } else {
        BackendErrorKind::Transport
    };
    Error::Backend { kind, cause: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_adapter_fetches_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("terraform.tfstate");
        std::fs::write(&file_path, b"{\"serial\":1}").unwrap();

        let backend = StateBackend::default();
        let config = BackendConfig::Local { path: file_path.to_string_lossy().to_string() };
        let fetched = backend.fetch(&config).await.unwrap();

        assert_eq!(fetched.backend_tag, "local");
        assert_eq!(fetched.raw_bytes, b"{\"serial\":1}");
        assert_eq!(fetched.size_bytes, 12);
    }

    #[tokio::test]
    async fn local_adapter_missing_file_maps_to_not_found() {
        let backend = StateBackend::default();
        let config = BackendConfig::Local { path: "/nonexistent/path/terraform.tfstate".to_string() };
        let err = backend.fetch(&config).await.unwrap_err();
        assert!(matches!(err, Error::Backend { kind: BackendErrorKind::NotFound, .. }));
    }

    #[test]
    fn config_tag_matches_variant() {
        assert_eq!(BackendConfig::Local { path: "x".into() }.tag(), "local");
        assert_eq!(
            BackendConfig::Remote { hostname: None, organization: "o".into(), workspace: "w".into(), token: None }.tag(),
            "remote"
        );
    }
}
