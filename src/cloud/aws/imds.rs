//! Instance metadata service client (IMDSv2)

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use super::sigv4::Credentials;
use crate::cloud::{CloudError, InstanceIdentity, Result};

pub const DEFAULT_ENDPOINT: &str = "http://169.254.169.254";

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "21600";

/// Instance role credentials as served under `iam/security-credentials/<role>`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
}

#[derive(Clone)]
pub struct ImdsClient {
    http: Client,
    endpoint: String,
}

impl ImdsClient {
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        ImdsClient {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    async fn token(&self) -> Result<String> {
        let url = format!("{}/latest/api/token", self.endpoint);
        let resp = self
            .http
            .put(&url)
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| CloudError::MetadataUnavailable {
                message: format!("token request failed: {}", e),
            })?;

        if !resp.status().is_success() {
            return Err(CloudError::MetadataUnavailable {
                message: format!("token request returned {}", resp.status()),
            });
        }

        resp.text().await.map_err(|e| CloudError::MetadataUnavailable {
            message: e.to_string(),
        })
    }

    /// GET a metadata path such as `/latest/meta-data/mac`
    pub async fn get(&self, path: &str) -> Result<String> {
        let token = self.token().await?;
        let url = format!("{}{}", self.endpoint, path);

        let resp = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| CloudError::MetadataUnavailable {
                message: format!("{}: {}", path, e),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound {
                kind: "metadata path",
                id: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(CloudError::MetadataUnavailable {
                message: format!("{} returned {}", path, status),
            });
        }

        resp.text().await.map_err(|e| CloudError::MetadataUnavailable {
            message: e.to_string(),
        })
    }

    pub async fn instance_identity(&self) -> Result<InstanceIdentity> {
        let body = self.get("/latest/dynamic/instance-identity/document").await?;
        parse_identity(&body)
    }

    /// Security groups attached to the primary network interface
    pub async fn security_group_ids(&self) -> Result<Vec<String>> {
        let mac = self.get("/latest/meta-data/mac").await?;
        let body = self
            .get(&format!(
                "/latest/meta-data/network/interfaces/macs/{}/security-group-ids",
                mac.trim()
            ))
            .await?;
        Ok(split_lines(&body))
    }

    pub async fn role_credentials(&self) -> Result<Credentials> {
        let roles = self.get("/latest/meta-data/iam/security-credentials/").await?;
        let role = split_lines(&roles).into_iter().next().ok_or(CloudError::MissingCredentials)?;

        let body = self
            .get(&format!("/latest/meta-data/iam/security-credentials/{}", role))
            .await?;
        parse_role_credentials(&body)
    }
}

fn parse_identity(body: &str) -> Result<InstanceIdentity> {
    serde_json::from_str(body).map_err(|e| CloudError::Decode {
        action: "instance-identity".to_string(),
        message: e.to_string(),
    })
}

fn parse_role_credentials(body: &str) -> Result<Credentials> {
    let creds: RoleCredentials = serde_json::from_str(body).map_err(|e| CloudError::Decode {
        action: "security-credentials".to_string(),
        message: e.to_string(),
    })?;
    Ok(Credentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: creds.token,
    })
}

fn split_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
