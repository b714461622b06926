//! Cloud network policy checks
//!
//! The evaluators (`security_group`, `nacl`) are pure functions over rule
//! sets. [`CloudQuery`] is the seam to the provider; `aws` implements it
//! against the instance metadata service, EC2 and EKS.

use async_trait::async_trait;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Cluster security group verification
pub mod security_group;

/// Network ACL verification
pub mod nacl;

/// AWS implementation of `CloudQuery`
pub mod aws;

use self::nacl::NetworkAcl;
use self::security_group::SecurityGroupRuleSet;

#[derive(Debug, Display, Error)]
pub enum CloudError {
    #[display(fmt = "instance metadata unavailable: {}", message)]
    MetadataUnavailable { message: String },
    #[display(fmt = "no AWS credentials found in environment or instance profile")]
    MissingCredentials,
    #[display(fmt = "HTTP request to {} failed: {}", endpoint, source)]
    Http { endpoint: String, source: reqwest::Error },
    #[display(fmt = "{} returned {}: {}", action, status, body)]
    Api { action: String, status: u16, body: String },
    #[display(fmt = "failed to decode {} response: {}", action, message)]
    Decode { action: String, message: String },
    #[display(fmt = "no {:?} tag on instance {}", tag_prefix, instance_id)]
    ClusterTagMissing { instance_id: String, tag_prefix: String },
    #[display(fmt = "{} not found: {}", kind, id)]
    NotFound { kind: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, CloudError>;

/// Identity of the instance the tool runs on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    pub region: String,
    pub instance_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub availability_zone: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub private_ip: String,
}

/// The parts of a managed cluster description the checks depend on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescription {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub platform_version: String,
    pub vpc_id: String,
    pub cluster_security_group_id: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

/// Provider-side lookups used by the diagnosis
#[async_trait]
pub trait CloudQuery: Send + Sync {
    async fn get_instance_identity(&self) -> Result<InstanceIdentity>;

    /// Cluster the instance belongs to, from its `kubernetes.io/cluster/<name>` tag
    async fn get_cluster_name(&self, instance_id: &str) -> Result<String>;

    async fn get_attached_security_group_ids(&self, instance_id: &str) -> Result<Vec<String>>;

    async fn get_cluster_by_name(&self, name: &str) -> Result<ClusterDescription>;

    /// `group` is a group id when it starts with `sg-`, a group name otherwise
    async fn get_security_group_rules(&self, group: &str) -> Result<SecurityGroupRuleSet>;

    async fn get_network_acls(&self, vpc_id: &str) -> Result<Vec<NetworkAcl>>;
}

pub const CLUSTER_TAG_PREFIX: &str = "kubernetes.io/cluster/";

/// Cluster name from a tag key such as `kubernetes.io/cluster/prod`.
pub fn cluster_name_from_tag(key: &str) -> Option<&str> {
    if !key.contains(CLUSTER_TAG_PREFIX) {
        return None;
    }
    key.split('/').nth(2).filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_name_from_tag() {
        assert_eq!(cluster_name_from_tag("kubernetes.io/cluster/prod-east"), Some("prod-east"));
        assert_eq!(cluster_name_from_tag("Name"), None);
        assert_eq!(cluster_name_from_tag("kubernetes.io/cluster/"), None);
        assert_eq!(cluster_name_from_tag("eks:cluster-name"), None);
    }

    #[test]
    fn test_cloud_error_display() {
        let err = CloudError::ClusterTagMissing {
            instance_id: "i-0abc".to_string(),
            tag_prefix: CLUSTER_TAG_PREFIX.to_string(),
        };
        assert_eq!(err.to_string(), "no \"kubernetes.io/cluster/\" tag on instance i-0abc");

        let err = CloudError::Api {
            action: "DescribeTags".to_string(),
            status: 403,
            body: "UnauthorizedOperation".to_string(),
        };
        assert!(err.to_string().contains("403"));
    }
}
