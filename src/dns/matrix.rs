//! Domain × nameserver resolution matrix
//!
//! Every configured domain is probed against every candidate nameserver (the
//! pod's configured resolver first, then a bounded number of backend pod IPs).
//! The matrix passes only when every pair passes.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::dns::probe::{DomainTestResult, ResolverProbe, ResolverTarget, Verdict};

pub const DEFAULT_DESCRIPTION: &str =
    "Tests the internal and external DNS queries against ClusterIP and two Coredns Pod IPs";

/// Aggregated outcome of a matrix run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsTestReport {
    #[serde(rename = "dnsResolution")]
    pub overall: Verdict,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "domainsTested", default)]
    pub domains_tested: Vec<String>,
    #[serde(rename = "detailedResultForEachDomain", default)]
    pub results: Vec<DomainTestResult>,
}

impl DnsTestReport {
    /// Build a report from per-pair results; overall passes iff every pair passed.
    pub fn from_results(description: &str, domains: Vec<String>, results: Vec<DomainTestResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.verdict.is_success()).count();
        let overall = if succeeded == results.len() {
            Verdict::Success
        } else {
            Verdict::Failed
        };

        log::debug!(
            "DNS test completed: {}/{} pairs succeeded, overall {:?}",
            succeeded,
            results.len(),
            overall
        );

        DnsTestReport {
            overall,
            description: description.to_string(),
            domains_tested: domains,
            results,
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.verdict.is_success()).count()
    }
}

/// Candidate servers: resolver-configured nameservers first, then at most
/// `max_endpoints` backend endpoint IPs.
pub fn build_nameservers(configured: &[String], endpoint_ips: &[String], max_endpoints: usize) -> Vec<String> {
    let take = endpoint_ips.len().min(max_endpoints);
    let mut nameservers = Vec::with_capacity(configured.len() + take);
    nameservers.extend(configured.iter().cloned());
    nameservers.extend(endpoint_ips[..take].iter().cloned());
    nameservers
}

/// Drives a [`ResolverProbe`] over every (domain, server) pair
pub struct DnsTestMatrix {
    probe: ResolverProbe,
    concurrency: usize,
    description: String,
}

impl DnsTestMatrix {
    pub fn new(probe: ResolverProbe) -> Self {
        DnsTestMatrix {
            probe,
            concurrency: 1,
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }

    /// Number of pairs probed at once. Results keep (domain, server) order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub async fn run(&self, domains: &[String], nameservers: &[String]) -> DnsTestReport {
        let domains = dedup_preserving_order(domains);

        // Domains outer, servers inner
        let targets: Vec<ResolverTarget> = domains
            .iter()
            .flat_map(|domain| nameservers.iter().map(move |server| ResolverTarget::new(domain, server)))
            .collect();

        log::info!(
            "Running DNS test matrix: {} domains x {} nameservers ({} pairs)",
            domains.len(),
            nameservers.len(),
            targets.len()
        );

        let probe = &self.probe;
        let results: Vec<DomainTestResult> = stream::iter(targets.iter())
            .map(|target| probe.probe(target))
            .buffered(self.concurrency)
            .collect()
            .await;

        for result in &results {
            if result.verdict.is_success() {
                log::info!("DNS queries succeeded for domain: {} server: {}", result.domain, result.server);
            } else {
                log::error!("DNS queries failed for domain: {} server: {}", result.domain, result.server);
            }
        }

        DnsTestReport::from_results(&self.description, domains, results)
    }
}

fn dedup_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}
