//! EC2 query API: request parameters and XML response models

use serde::Deserialize;

use crate::cloud::nacl::{AclAction, NetworkAcl, NetworkAclEntry, PortRange};
use crate::cloud::security_group::{InboundPermission, OutboundPermission, SecurityGroupRuleSet};
use crate::cloud::{CloudError, Result};

pub const API_VERSION: &str = "2016-11-15";

/// EC2 wraps every list in repeated `<item>` elements
#[derive(Debug, Deserialize)]
pub struct ItemSet<T> {
    #[serde(rename = "item", default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        ItemSet { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTagsResponse {
    #[serde(default)]
    pub tag_set: ItemSet<TagItem>,
}

#[derive(Debug, Deserialize)]
pub struct TagItem {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeSecurityGroupsResponse {
    #[serde(default)]
    pub security_group_info: ItemSet<SecurityGroupItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupItem {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub ip_permissions: ItemSet<IpPermission>,
    #[serde(default)]
    pub ip_permissions_egress: ItemSet<IpPermission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpPermission {
    pub ip_protocol: String,
    #[serde(default)]
    pub groups: ItemSet<UserIdGroupPair>,
    #[serde(default)]
    pub ip_ranges: ItemSet<IpRange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdGroupPair {
    pub group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpRange {
    pub cidr_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeNetworkAclsResponse {
    #[serde(default)]
    pub network_acl_set: ItemSet<NetworkAclItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAclItem {
    pub network_acl_id: String,
    #[serde(default)]
    pub entry_set: ItemSet<AclEntryItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntryItem {
    pub rule_number: u32,
    pub protocol: String,
    pub rule_action: String,
    pub egress: bool,
    pub port_range: Option<XmlPortRange>,
}

#[derive(Debug, Deserialize)]
pub struct XmlPortRange {
    pub from: u16,
    pub to: u16,
}

pub fn decode<T: serde::de::DeserializeOwned>(action: &str, body: &str) -> Result<T> {
    quick_xml::de::from_str(body).map_err(|e| CloudError::Decode {
        action: action.to_string(),
        message: e.to_string(),
    })
}

/// `DescribeTags` filtered to one resource
pub fn describe_tags_params(resource_id: &str) -> Vec<(String, String)> {
    vec![
        ("Filter.1.Name".to_string(), "resource-id".to_string()),
        ("Filter.1.Value.1".to_string(), resource_id.to_string()),
    ]
}

/// `DescribeSecurityGroups` by id for `sg-` prefixed input, by name otherwise
pub fn describe_security_groups_params(group: &str) -> Vec<(String, String)> {
    if group.starts_with("sg-") {
        vec![("GroupId.1".to_string(), group.to_string())]
    } else {
        vec![("GroupName.1".to_string(), group.to_string())]
    }
}

pub fn describe_network_acls_params(vpc_id: &str) -> Vec<(String, String)> {
    vec![
        ("Filter.1.Name".to_string(), "vpc-id".to_string()),
        ("Filter.1.Value.1".to_string(), vpc_id.to_string()),
    ]
}

impl From<SecurityGroupItem> for SecurityGroupRuleSet {
    fn from(group: SecurityGroupItem) -> Self {
        let inbound = group
            .ip_permissions
            .items
            .into_iter()
            .map(|perm| InboundPermission {
                protocol: perm.ip_protocol,
                referenced_group_ids: perm.groups.items.into_iter().filter_map(|pair| pair.group_id).collect(),
            })
            .collect();

        let outbound = group
            .ip_permissions_egress
            .items
            .into_iter()
            .map(|perm| OutboundPermission {
                protocol: perm.ip_protocol,
                cidr_ranges: perm.ip_ranges.items.into_iter().map(|range| range.cidr_ip).collect(),
            })
            .collect();

        SecurityGroupRuleSet { inbound, outbound }
    }
}

impl From<NetworkAclItem> for NetworkAcl {
    fn from(acl: NetworkAclItem) -> Self {
        let entries = acl
            .entry_set
            .items
            .into_iter()
            .map(|entry| NetworkAclEntry {
                rule_number: entry.rule_number,
                is_egress: entry.egress,
                action: if entry.rule_action.eq_ignore_ascii_case("allow") {
                    AclAction::Allow
                } else {
                    AclAction::Deny
                },
                protocol: entry.protocol,
                port_range: entry.port_range.map(|r| PortRange { from: r.from, to: r.to }),
            })
            .collect();

        NetworkAcl {
            network_acl_id: acl.network_acl_id,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAGS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DescribeTagsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>7a62c49f-347e-4fc4-9331-6e8eEXAMPLE</requestId>
    <tagSet>
        <item>
            <resourceId>i-0abc</resourceId>
            <resourceType>instance</resourceType>
            <key>Name</key>
            <value>worker</value>
        </item>
        <item>
            <resourceId>i-0abc</resourceId>
            <resourceType>instance</resourceType>
            <key>kubernetes.io/cluster/prod</key>
            <value>owned</value>
        </item>
    </tagSet>
</DescribeTagsResponse>"#;

    const SG_XML: &str = r#"<DescribeSecurityGroupsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <securityGroupInfo>
        <item>
            <ownerId>123456789012</ownerId>
            <groupId>sg-abc</groupId>
            <groupName>eks-cluster-sg-prod</groupName>
            <groupDescription>EKS created security group</groupDescription>
            <vpcId>vpc-1</vpcId>
            <ipPermissions>
                <item>
                    <ipProtocol>-1</ipProtocol>
                    <groups>
                        <item>
                            <userId>123456789012</userId>
                            <groupId>sg-abc</groupId>
                        </item>
                    </groups>
                    <ipRanges/>
                    <ipv6Ranges/>
                    <prefixListIds/>
                </item>
            </ipPermissions>
            <ipPermissionsEgress>
                <item>
                    <ipProtocol>-1</ipProtocol>
                    <groups/>
                    <ipRanges>
                        <item>
                            <cidrIp>0.0.0.0/0</cidrIp>
                        </item>
                    </ipRanges>
                    <ipv6Ranges/>
                    <prefixListIds/>
                </item>
            </ipPermissionsEgress>
        </item>
    </securityGroupInfo>
</DescribeSecurityGroupsResponse>"#;

    const NACL_XML: &str = r#"<DescribeNetworkAclsResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
    <requestId>59dbff89-35bd-4eac-99ed-be587EXAMPLE</requestId>
    <networkAclSet>
        <item>
            <networkAclId>acl-5fb85d36</networkAclId>
            <vpcId>vpc-1</vpcId>
            <default>true</default>
            <entrySet>
                <item>
                    <ruleNumber>100</ruleNumber>
                    <protocol>17</protocol>
                    <ruleAction>allow</ruleAction>
                    <egress>true</egress>
                    <cidrBlock>0.0.0.0/0</cidrBlock>
                    <portRange>
                        <from>53</from>
                        <to>53</to>
                    </portRange>
                </item>
                <item>
                    <ruleNumber>32767</ruleNumber>
                    <protocol>-1</protocol>
                    <ruleAction>deny</ruleAction>
                    <egress>true</egress>
                    <cidrBlock>0.0.0.0/0</cidrBlock>
                </item>
            </entrySet>
            <associationSet/>
            <tagSet/>
        </item>
    </networkAclSet>
</DescribeNetworkAclsResponse>"#;

    #[test]
    fn test_decode_tags() {
        let resp: DescribeTagsResponse = decode("DescribeTags", TAGS_XML).unwrap();
        let keys: Vec<&str> = resp.tag_set.items.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["Name", "kubernetes.io/cluster/prod"]);
    }

    #[test]
    fn test_decode_security_group_rules() {
        let resp: DescribeSecurityGroupsResponse = decode("DescribeSecurityGroups", SG_XML).unwrap();
        let group = resp.security_group_info.items.into_iter().next().unwrap();
        assert_eq!(group.group_id, "sg-abc");

        let rules = SecurityGroupRuleSet::from(group);
        assert_eq!(rules.inbound[0].protocol, "-1");
        assert_eq!(rules.inbound[0].referenced_group_ids, vec!["sg-abc"]);
        assert_eq!(rules.outbound[0].cidr_ranges, vec!["0.0.0.0/0"]);
    }

    #[test]
    fn test_decode_network_acls() {
        let resp: DescribeNetworkAclsResponse = decode("DescribeNetworkAcls", NACL_XML).unwrap();
        let acl = NetworkAcl::from(resp.network_acl_set.items.into_iter().next().unwrap());

        assert_eq!(acl.network_acl_id, "acl-5fb85d36");
        assert_eq!(acl.entries.len(), 2);
        assert_eq!(acl.entries[0].action, AclAction::Allow);
        assert_eq!(acl.entries[0].port_range, Some(PortRange { from: 53, to: 53 }));
        assert_eq!(acl.entries[1].rule_number, 32767);
        assert_eq!(acl.entries[1].port_range, None);
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode::<DescribeTagsResponse>("DescribeTags", "<DescribeTagsResponse><tagSet><item>").unwrap_err();
        assert!(matches!(err, CloudError::Decode { .. }));
    }

    #[test]
    fn test_security_group_lookup_params() {
        assert_eq!(describe_security_groups_params("sg-abc")[0].0, "GroupId.1");
        assert_eq!(describe_security_groups_params("eks-cluster-sg")[0].0, "GroupName.1");
    }
}
