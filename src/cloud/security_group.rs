//! Cluster security group verification
//!
//! Worker nodes talk to the DNS backend pods through the cluster security
//! group, so the group has to admit all traffic from itself and let all
//! traffic out.

use serde::{Deserialize, Serialize};

/// Protocol value meaning "all protocols"
pub const ALL_PROTOCOLS: &str = "-1";

/// CIDR meaning "anywhere"
pub const ANYWHERE_V4: &str = "0.0.0.0/0";

const SG_REQS_DOC: &str = "https://docs.aws.amazon.com/eks/latest/userguide/sec-group-reqs.html#cluster-sg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundPermission {
    pub protocol: String,
    pub referenced_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundPermission {
    pub protocol: String,
    pub cidr_ranges: Vec<String>,
}

/// Inbound and outbound permissions of one security group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRuleSet {
    pub inbound: Vec<InboundPermission>,
    pub outbound: Vec<OutboundPermission>,
}

/// Outcome of [`evaluate`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupVerdict {
    pub self_referencing_inbound: bool,
    pub open_egress_outbound: bool,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_detail: Option<String>,
}

/// Check `rules` for an all-protocol self reference inbound and an
/// all-protocol egress to 0.0.0.0/0. Entry order does not matter.
pub fn evaluate(rules: &SecurityGroupRuleSet, self_group_id: &str) -> SecurityGroupVerdict {
    let inbound = rules.inbound.iter().any(|perm| {
        perm.protocol == ALL_PROTOCOLS && perm.referenced_group_ids.iter().any(|id| id == self_group_id)
    });

    let outbound = rules
        .outbound
        .iter()
        .any(|perm| perm.protocol == ALL_PROTOCOLS && perm.cidr_ranges.iter().any(|cidr| cidr == ANYWHERE_V4));

    log::info!(
        "Security group {}: self-referencing inbound: {} open egress: {}",
        self_group_id,
        inbound,
        outbound
    );

    let inbound_detail = if inbound {
        None
    } else {
        Some(format!(
            "cluster Security Group {:?} is not configured correctly, please make sure that it has an inbound rule \
             allowing all traffic which references itself. Refer: {}",
            self_group_id, SG_REQS_DOC
        ))
    };

    let outbound_detail = if outbound {
        None
    } else {
        Some(format!(
            "cluster Security Group {:?} is not configured correctly, outbound rules are not allowing all traffic \
             to {}. Refer: {}",
            self_group_id, ANYWHERE_V4, SG_REQS_DOC
        ))
    };

    SecurityGroupVerdict {
        self_referencing_inbound: inbound,
        open_egress_outbound: outbound,
        is_correct: inbound && outbound,
        inbound_detail,
        outbound_detail,
    }
}
