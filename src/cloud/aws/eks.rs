//! EKS `DescribeCluster` response model

use serde::Deserialize;

use crate::cloud::{ClusterDescription, CloudError, Result};

#[derive(Debug, Deserialize)]
pub struct DescribeClusterResponse {
    pub cluster: ClusterBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBody {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub platform_version: String,
    pub resources_vpc_config: VpcConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcConfig {
    pub vpc_id: String,
    #[serde(default)]
    pub cluster_security_group_id: String,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

pub fn cluster_path(name: &str) -> String {
    format!("/clusters/{}", name)
}

pub fn decode(body: &str) -> Result<ClusterDescription> {
    let resp: DescribeClusterResponse = serde_json::from_str(body).map_err(|e| CloudError::Decode {
        action: "DescribeCluster".to_string(),
        message: e.to_string(),
    })?;

    let cluster = resp.cluster;
    let vpc = cluster.resources_vpc_config;
    Ok(ClusterDescription {
        name: cluster.name,
        version: cluster.version,
        status: cluster.status,
        platform_version: cluster.platform_version,
        vpc_id: vpc.vpc_id,
        cluster_security_group_id: vpc.cluster_security_group_id,
        security_group_ids: vpc.security_group_ids,
        subnet_ids: vpc.subnet_ids,
    })
}
