//! Kubernetes integration
//!
//! [`ClusterQuery`] is what the diagnosis needs from the API server: the DNS
//! service, its endpoints, deployment, pods, configmap and pod logs. The
//! `client` module implements it with `kube`.

use async_trait::async_trait;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// kube-backed ClusterQuery
#[cfg(feature = "k8s")]
pub mod client;

#[derive(Debug, Display, Error)]
pub enum ClusterError {
    #[display(fmt = "kubernetes API request failed: {}", message)]
    Api { message: String },
    #[display(fmt = "{} {}/{} not found", kind, namespace, name)]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[display(fmt = "{} {} has no {}", kind, name, field)]
    MissingField {
        kind: &'static str,
        name: String,
        field: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Names of the cluster objects that make up the DNS backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsBackendObjects {
    pub service: String,
    pub deployment: String,
    pub configmap: String,
    pub configmap_key: String,
}

impl Default for DnsBackendObjects {
    fn default() -> Self {
        DnsBackendObjects {
            service: "kube-dns".to_string(),
            deployment: "coredns".to_string(),
            configmap: "coredns".to_string(),
            configmap_key: "Corefile".to_string(),
        }
    }
}

/// Endpoint addresses of the DNS service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointAddresses {
    pub ready: Vec<String>,
    pub not_ready: Vec<String>,
}

/// Running image tag and desired replica count of the DNS deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentImage {
    pub tag: String,
    pub replicas: i32,
}

#[async_trait]
pub trait ClusterQuery: Send + Sync {
    /// API server git version, e.g. `v1.28.3-eks-4f4795d`
    async fn server_version(&self) -> Result<String>;

    async fn get_service_cluster_ip(&self, namespace: &str) -> Result<String>;

    async fn get_endpoint_addresses(&self, namespace: &str) -> Result<EndpointAddresses>;

    async fn get_deployment_image_tag(&self, namespace: &str) -> Result<DeploymentImage>;

    async fn list_pod_names(&self, namespace: &str, label_selector: &str) -> Result<Vec<String>>;

    async fn get_config_blob(&self, namespace: &str) -> Result<String>;

    async fn patch_config_blob(&self, namespace: &str, blob: &str) -> Result<()>;

    async fn stream_pod_logs(&self, namespace: &str, pod: &str) -> Result<String>;
}

/// Tag portion of a container image reference; `latest` when untagged.
pub fn image_tag(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    // a ':' before the last '/' belongs to a registry port
    let name_start = without_digest.rfind('/').map(|i| i + 1).unwrap_or(0);
    match without_digest[name_start..].rfind(':') {
        Some(i) => &without_digest[name_start + i + 1..],
        None => "latest",
    }
}
