//! `CloudQuery` over plain HTTPS: instance metadata, EC2 query API and the
//! EKS REST API, signed with SigV4.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use tokio::sync::OnceCell;

use super::nacl::NetworkAcl;
use super::security_group::SecurityGroupRuleSet;
use super::{cluster_name_from_tag, CloudError, CloudQuery, ClusterDescription, InstanceIdentity, Result, CLUSTER_TAG_PREFIX};

pub mod ec2;
pub mod eks;
pub mod imds;
pub mod sigv4;

use self::imds::ImdsClient;
use self::sigv4::{Credentials, SigningRequest};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

pub struct AwsCloud {
    http: Client,
    imds: ImdsClient,
    identity: OnceCell<InstanceIdentity>,
    credentials: OnceCell<Credentials>,
}

impl AwsCloud {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| CloudError::Http {
                endpoint: "client".to_string(),
                source,
            })?;

        Ok(AwsCloud {
            imds: ImdsClient::new(http.clone(), imds::DEFAULT_ENDPOINT),
            http,
            identity: OnceCell::new(),
            credentials: OnceCell::new(),
        })
    }

    async fn identity(&self) -> Result<&InstanceIdentity> {
        self.identity.get_or_try_init(|| self.imds.instance_identity()).await
    }

    async fn credentials(&self) -> Result<&Credentials> {
        self.credentials
            .get_or_try_init(|| async {
                if let Some(creds) = env_credentials() {
                    log::debug!("Using AWS credentials from environment");
                    return Ok(creds);
                }
                log::debug!("Using AWS credentials from instance profile");
                self.imds.role_credentials().await
            })
            .await
    }

    async fn send_signed(
        &self,
        service: &str,
        action: &str,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: String,
    ) -> Result<String> {
        let region = self.identity().await?.region.clone();
        let credentials = self.credentials().await?;
        let host = format!("{}.{}.amazonaws.com", service, region);
        let url = format!("https://{}{}", host, path);

        let signed = sigv4::sign(
            &SigningRequest {
                method: method.as_str(),
                host: &host,
                path,
                content_type,
                payload: body.as_bytes(),
                region: &region,
                service,
            },
            credentials,
            Utc::now(),
        );

        let mut request = self.http.request(method, &url);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        for (name, value) in signed {
            request = request.header(name, value);
        }

        log::debug!("Calling {} {}", service, action);
        let resp = request.body(body).send().await.map_err(|source| CloudError::Http {
            endpoint: url.clone(),
            source,
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|source| CloudError::Http { endpoint: url, source })?;
        if !status.is_success() {
            return Err(CloudError::Api {
                action: action.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn ec2<T: serde::de::DeserializeOwned>(&self, action: &str, params: Vec<(String, String)>) -> Result<T> {
        let body = form_body(action, &params);
        let text = self
            .send_signed("ec2", action, Method::POST, "/", Some(FORM_CONTENT_TYPE), body)
            .await?;
        ec2::decode(action, &text)
    }
}

fn env_credentials() -> Option<Credentials> {
    let access_key_id = env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty())?;
    let secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok().filter(|v| !v.is_empty())?;
    Some(Credentials {
        access_key_id,
        secret_access_key,
        session_token: env::var("AWS_SESSION_TOKEN").ok().filter(|v| !v.is_empty()),
    })
}

fn form_body(action: &str, params: &[(String, String)]) -> String {
    let mut pairs = vec![
        format!("Action={}", action),
        format!("Version={}", ec2::API_VERSION),
    ];
    pairs.extend(
        params
            .iter()
            .map(|(k, v)| format!("{}={}", sigv4::uri_encode(k), sigv4::uri_encode(v))),
    );
    pairs.join("&")
}

#[async_trait]
impl CloudQuery for AwsCloud {
    async fn get_instance_identity(&self) -> Result<InstanceIdentity> {
        self.identity().await.map(Clone::clone)
    }

    async fn get_cluster_name(&self, instance_id: &str) -> Result<String> {
        let resp: ec2::DescribeTagsResponse = self
            .ec2("DescribeTags", ec2::describe_tags_params(instance_id))
            .await?;

        resp.tag_set
            .items
            .iter()
            .find_map(|tag| cluster_name_from_tag(&tag.key))
            .map(String::from)
            .ok_or_else(|| CloudError::ClusterTagMissing {
                instance_id: instance_id.to_string(),
                tag_prefix: CLUSTER_TAG_PREFIX.to_string(),
            })
    }

    async fn get_attached_security_group_ids(&self, instance_id: &str) -> Result<Vec<String>> {
        let identity = self.identity().await?;
        if identity.instance_id != instance_id {
            log::warn!(
                "Security groups requested for {} but metadata describes {}",
                instance_id,
                identity.instance_id
            );
        }
        self.imds.security_group_ids().await
    }

    async fn get_cluster_by_name(&self, name: &str) -> Result<ClusterDescription> {
        let path = eks::cluster_path(&sigv4::uri_encode(name));
        let text = self
            .send_signed("eks", "DescribeCluster", Method::GET, &path, None, String::new())
            .await?;
        eks::decode(&text)
    }

    async fn get_security_group_rules(&self, group: &str) -> Result<SecurityGroupRuleSet> {
        let resp: ec2::DescribeSecurityGroupsResponse = self
            .ec2("DescribeSecurityGroups", ec2::describe_security_groups_params(group))
            .await?;

        resp.security_group_info
            .items
            .into_iter()
            .next()
            .map(SecurityGroupRuleSet::from)
            .ok_or_else(|| CloudError::NotFound {
                kind: "security group",
                id: group.to_string(),
            })
    }

    async fn get_network_acls(&self, vpc_id: &str) -> Result<Vec<NetworkAcl>> {
        let resp: ec2::DescribeNetworkAclsResponse = self
            .ec2("DescribeNetworkAcls", ec2::describe_network_acls_params(vpc_id))
            .await?;
        Ok(resp.network_acl_set.items.into_iter().map(NetworkAcl::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_body_encodes_params() {
        let body = form_body("DescribeTags", &ec2::describe_tags_params("i-0abc"));
        assert_eq!(
            body,
            "Action=DescribeTags&Version=2016-11-15&Filter.1.Name=resource-id&Filter.1.Value.1=i-0abc"
        );

        let body = form_body("DescribeSecurityGroups", &ec2::describe_security_groups_params("my group"));
        assert!(body.ends_with("GroupName.1=my%20group"));
    }
}
