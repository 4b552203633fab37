//! Source of service and deployment metadata.
//!
//! `KubernetesClient` reads from the Kubernetes REST API. It only needs two
//! endpoints, so it talks to the API server directly instead of pulling in a
//! full client.

use crate::config::KubernetesConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("kubernetes request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("kubernetes API returned {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("invalid kubernetes API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("could not read {path}: {source}")]
    Credentials {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no kubernetes API URL configured and KUBERNETES_SERVICE_HOST is not set")]
    NotConfigured,
}

/// A service as seen by the scanner.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Replicas {
    pub desired: i32,
    pub current: i32,
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Lists services across all namespaces.
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, MetadataError>;

    /// Desired and ready replica counts of a deployment.
    async fn deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Replicas, MetadataError>;
}

#[derive(Deserialize)]
struct ObjectList<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    namespace: String,
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct ServiceObject {
    metadata: ObjectMeta,
    spec: Option<ServiceSpec>,
}

#[derive(Deserialize)]
struct ServiceSpec {
    selector: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct DeploymentObject {
    spec: Option<DeploymentSpec>,
    status: Option<DeploymentStatus>,
}

#[derive(Deserialize)]
struct DeploymentSpec {
    replicas: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    ready_replicas: Option<i32>,
}

impl From<ServiceObject> for ServiceInfo {
    fn from(service: ServiceObject) -> Self {
        ServiceInfo {
            name: service.metadata.name,
            namespace: service.metadata.namespace,
            annotations: service.metadata.annotations.unwrap_or_default(),
            selector: service
                .spec
                .and_then(|spec| spec.selector)
                .unwrap_or_default(),
        }
    }
}

impl From<DeploymentObject> for Replicas {
    fn from(deployment: DeploymentObject) -> Self {
        Replicas {
            // The API server defaults spec.replicas to 1 when it is omitted.
            desired: deployment
                .spec
                .and_then(|spec| spec.replicas)
                .unwrap_or(1),
            current: deployment
                .status
                .and_then(|status| status.ready_replicas)
                .unwrap_or(0),
        }
    }
}

pub struct KubernetesClient {
    client: reqwest::Client,
    base_url: Url,
    // Re-read on every request, the kubelet rotates projected tokens.
    token_path: Option<PathBuf>,
}

impl KubernetesClient {
    /// Builds a client from explicit configuration, falling back to the
    /// in-cluster service account when no API URL is configured.
    pub fn new(config: &KubernetesConfig) -> Result<Self, MetadataError> {
        match &config.api_url {
            Some(api_url) => Self::with_credentials(
                api_url.clone(),
                config.token_path.clone(),
                config.ca_cert_path.as_deref(),
            ),
            None => Self::in_cluster(),
        }
    }

    pub fn in_cluster() -> Result<Self, MetadataError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| MetadataError::NotConfigured)?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let account_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let ca_cert_path = account_dir.join("ca.crt");
        Self::with_credentials(
            Url::parse(&format!("https://{host}:{port}"))?,
            Some(account_dir.join("token")),
            Some(ca_cert_path.as_path()),
        )
    }

    pub fn with_credentials(
        base_url: Url,
        token_path: Option<PathBuf>,
        ca_cert_path: Option<&Path>,
    ) -> Result<Self, MetadataError> {
        let mut builder = reqwest::Client::builder();
        if let Some(path) = ca_cert_path {
            let pem = std::fs::read(path).map_err(|source| MetadataError::Credentials {
                path: path.to_path_buf(),
                source,
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        Ok(KubernetesClient {
            client: builder.build()?,
            base_url,
            token_path,
        })
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn url_for(&self, segments: &[&str]) -> Result<Url, MetadataError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, MetadataError> {
        let mut request = self.client.get(url.clone());

        if let Some(token_path) = &self.token_path {
            let token = tokio::fs::read_to_string(token_path)
                .await
                .map_err(|source| MetadataError::Credentials {
                    path: token_path.clone(),
                    source,
                })?;
            request = request.bearer_auth(token.trim());
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => Ok(Some(response.json::<T>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(MetadataError::Status {
                status,
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MetadataSource for KubernetesClient {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, MetadataError> {
        let url = self.url_for(&["api", "v1", "services"])?;
        let list: ObjectList<ServiceObject> =
            self.get(url.clone())
                .await?
                .ok_or_else(|| MetadataError::Status {
                    status: StatusCode::NOT_FOUND,
                    url: url.to_string(),
                })?;

        Ok(list.items.into_iter().map(ServiceInfo::from).collect())
    }

    async fn deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Replicas, MetadataError> {
        let not_found = || MetadataError::NotFound {
            kind: "deployment",
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        // No object can carry these names, and the URL crate drops dot segments
        if [namespace, name]
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(not_found());
        }

        let url = self.url_for(&[
            "apis", "apps", "v1", "namespaces", namespace, "deployments", name,
        ])?;
        let deployment: DeploymentObject = self.get(url).await?.ok_or_else(not_found)?;

        Ok(deployment.into())
    }
}
