//! Network ACL check for outbound DNS (UDP/53)
//!
//! The scan is a monotonic OR over egress allow rules: once an allow covering
//! port 53 is seen, nothing later in the list turns it back off. A lower
//! numbered explicit deny does not win over a higher numbered allow here,
//! which differs from how AWS evaluates ACLs; see DESIGN.md.

use serde::{Deserialize, Serialize};

pub const DNS_PORT: u16 = 53;

/// Rule number AWS reserves for the implicit deny-all entry
pub const DEFAULT_DENY_RULE: u32 = 32767;

/// IANA protocol number for UDP
pub const PROTOCOL_UDP: &str = "17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Allow,
    Deny,
}

/// Closed port interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAclEntry {
    pub rule_number: u32,
    pub is_egress: bool,
    pub action: AclAction,
    pub protocol: String,
    pub port_range: Option<PortRange>,
}

/// One network ACL and its entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAcl {
    pub network_acl_id: String,
    pub entries: Vec<NetworkAclEntry>,
}

/// Outcome over every ACL of a VPC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAclVerdict {
    pub port53_egress_allowed: bool,
    pub acls_evaluated: Vec<String>,
    /// ACLs whose entries allow UDP/53 egress
    pub allowing_acls: Vec<String>,
}

/// true when the entries allow UDP/53 egress.
///
/// Entries are scanned in ascending rule number order.
pub fn evaluate(entries: &[NetworkAclEntry]) -> bool {
    let mut ordered: Vec<&NetworkAclEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.rule_number);

    let mut allowed = false;
    for rule in ordered.into_iter().filter(|e| e.is_egress) {
        match (rule.action, rule.port_range) {
            (AclAction::Allow, None) => {
                log::info!("Rule number: {} is not blocking any egress traffic", rule.rule_number);
                allowed = true;
            }
            _ if rule.rule_number == DEFAULT_DENY_RULE => {
                log::info!("Hit the default egress rule of NACL...continuing with next rule");
            }
            (AclAction::Allow, Some(range)) => {
                if rule.protocol == PROTOCOL_UDP && range.contains(DNS_PORT) {
                    log::info!("UDP port 53 is allowed in the NACL rule number: {}", rule.rule_number);
                    allowed = true;
                }
            }
            (AclAction::Deny, _) => {}
        }
    }

    allowed
}

/// Evaluate every ACL of a VPC; port 53 egress counts as allowed if any ACL allows it.
pub fn evaluate_all(acls: &[NetworkAcl]) -> NetworkAclVerdict {
    let mut verdict = NetworkAclVerdict::default();

    for acl in acls {
        log::info!("Evaluating NACL: {}", acl.network_acl_id);
        verdict.acls_evaluated.push(acl.network_acl_id.clone());
        if evaluate(&acl.entries) {
            verdict.allowing_acls.push(acl.network_acl_id.clone());
        }
    }

    verdict.port53_egress_allowed = !verdict.allowing_acls.is_empty();
    if !verdict.port53_egress_allowed {
        log::info!("NACL rules are not allowing egress for port 53");
    }
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rule_number: u32, action: AclAction, protocol: &str, range: Option<(u16, u16)>) -> NetworkAclEntry {
        NetworkAclEntry {
            rule_number,
            is_egress: true,
            action,
            protocol: protocol.to_string(),
            port_range: range.map(|(from, to)| PortRange { from, to }),
        }
    }

    fn default_deny() -> NetworkAclEntry {
        entry(DEFAULT_DENY_RULE, AclAction::Deny, "-1", None)
    }

    #[test]
    fn test_udp_53_allow_then_default_deny() {
        let entries = vec![entry(100, AclAction::Allow, "17", Some((53, 53))), default_deny()];
        assert!(evaluate(&entries));
    }

    #[test]
    fn test_udp_53_deny_then_default_deny() {
        let entries = vec![entry(100, AclAction::Deny, "17", Some((53, 53))), default_deny()];
        assert!(!evaluate(&entries));
    }

    #[test]
    fn test_allow_all_without_range() {
        let entries = vec![entry(100, AclAction::Allow, "-1", None), default_deny()];
        assert!(evaluate(&entries));
    }

    #[test]
    fn test_ephemeral_range_containing_53() {
        let entries = vec![entry(120, AclAction::Allow, "17", Some((1, 1024))), default_deny()];
        assert!(evaluate(&entries));

        let entries = vec![entry(120, AclAction::Allow, "17", Some((1024, 65535))), default_deny()];
        assert!(!evaluate(&entries));
    }

    #[test]
    fn test_tcp_only_allow_does_not_count() {
        let entries = vec![entry(100, AclAction::Allow, "6", Some((53, 53))), default_deny()];
        assert!(!evaluate(&entries));
    }

    #[test]
    fn test_ingress_entries_ignored() {
        let mut ingress = entry(100, AclAction::Allow, "-1", None);
        ingress.is_egress = false;
        assert!(!evaluate(&[ingress, default_deny()]));
    }

    #[test]
    fn test_lower_deny_does_not_override_later_allow() {
        // Monotonic OR: the deny at 90 does not win over the allow at 100
        let entries = vec![
            entry(100, AclAction::Allow, "17", Some((53, 53))),
            entry(90, AclAction::Deny, "17", Some((53, 53))),
            default_deny(),
        ];
        assert!(evaluate(&entries));
    }

    #[test]
    fn test_inverted_range_contains_nothing() {
        let entries = vec![entry(100, AclAction::Allow, "17", Some((60, 50)))];
        assert!(!evaluate(&entries));
    }

    #[test]
    fn test_empty_entries() {
        assert!(!evaluate(&[]));
    }

    #[test]
    fn test_evaluate_all_ors_acls() {
        let acls = vec![
            NetworkAcl {
                network_acl_id: "acl-1".to_string(),
                entries: vec![default_deny()],
            },
            NetworkAcl {
                network_acl_id: "acl-2".to_string(),
                entries: vec![entry(100, AclAction::Allow, "-1", None), default_deny()],
            },
        ];

        let verdict = evaluate_all(&acls);
        assert!(verdict.port53_egress_allowed);
        assert_eq!(verdict.acls_evaluated, vec!["acl-1", "acl-2"]);
        assert_eq!(verdict.allowing_acls, vec!["acl-2"]);

        assert!(!evaluate_all(&[]).port53_egress_allowed);
    }
}
