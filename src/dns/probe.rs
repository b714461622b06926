//! Single-question DNS probes against an explicit nameserver
//!
//! A probe asks one server for the addresses of one domain a fixed number of
//! times and classifies the pair as `success` only when every attempt answered.
//! The network side sits behind [`DnsLookup`] so the retry and verdict policy
//! can be exercised without a live resolver.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use derive_more::{Display, Error};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};

/// Why a single lookup attempt failed. Folded into `Verdict::Failed` by the probe.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[display(fmt = "query timed out")]
    Timeout,
    #[display(fmt = "no records found for {}", domain)]
    NxDomain { domain: String },
    #[display(fmt = "nameserver {} unreachable", server)]
    Unreachable { server: String },
    #[display(fmt = "invalid nameserver address {:?}", server)]
    InvalidServer { server: String },
    #[display(fmt = "resolver error: {}", message)]
    Resolver { message: String },
}

type Result<T> = std::result::Result<T, ProbeError>;

/// Outcome of a (domain, server) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failed,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        self == Verdict::Success
    }
}

/// One domain to be resolved by one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverTarget {
    pub domain: String,
    pub server: String,
}

impl ResolverTarget {
    pub fn new(domain: &str, server: &str) -> Self {
        ResolverTarget {
            domain: domain.to_string(),
            server: server.to_string(),
        }
    }
}

/// Result of probing one (domain, server) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainTestResult {
    #[serde(rename = "domain")]
    pub domain: String,
    pub server: String,
    #[serde(rename = "result")]
    pub verdict: Verdict,
    #[serde(rename = "answer", default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<IpAddr>,
}

/// Resolves a domain against exactly one nameserver
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, domain: &str, server: &str) -> Result<Vec<IpAddr>>;
}

/// `DnsLookup` backed by hickory-resolver, pinned to the given server over UDP/53
pub struct HickoryLookup {
    timeout: Duration,
}

impl HickoryLookup {
    pub fn new(timeout: Duration) -> Self {
        HickoryLookup { timeout }
    }

    fn resolver_for(&self, server: &str) -> Result<TokioAsyncResolver> {
        let addr = parse_server(server)?;

        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));

        // No cache and a single attempt: retries are counted by the probe.
        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup(&self, domain: &str, server: &str) -> Result<Vec<IpAddr>> {
        let resolver = self.resolver_for(server)?;

        match resolver.lookup_ip(fqdn(domain)).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) => Err(match e.kind() {
                ResolveErrorKind::Timeout => ProbeError::Timeout,
                ResolveErrorKind::NoRecordsFound { .. } => ProbeError::NxDomain {
                    domain: domain.to_string(),
                },
                ResolveErrorKind::NoConnections | ResolveErrorKind::Io(_) => {
                    ProbeError::Unreachable {
                        server: server.to_string(),
                    }
                }
                _ => ProbeError::Resolver {
                    message: e.to_string(),
                },
            }),
        }
    }
}

/// Accepts `10.100.0.10`, `10.100.0.10:53` or `[fd00::a]:53`.
fn parse_server(server: &str) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    server
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| ProbeError::InvalidServer {
            server: server.to_string(),
        })
}

/// Names are sent fully qualified so no search path is appended.
fn fqdn(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{}.", domain)
    }
}

/// Repeats a lookup against one server and classifies the pair
#[derive(Clone)]
pub struct ResolverProbe {
    lookup: Arc<dyn DnsLookup>,
    attempts: u32,
}

impl ResolverProbe {
    pub const DEFAULT_ATTEMPTS: u32 = 3;

    pub fn new(lookup: Arc<dyn DnsLookup>, attempts: u32) -> Self {
        ResolverProbe {
            lookup,
            attempts: attempts.max(1),
        }
    }

    /// Probe `domain` against the first entry of `servers`.
    ///
    /// Returns `None` when `servers` is empty.
    pub async fn resolve(&self, domain: &str, servers: &[String]) -> Option<DomainTestResult> {
        match servers.first() {
            Some(server) => Some(self.probe(&ResolverTarget::new(domain, server)).await),
            None => {
                log::error!("No nameserver supplied for DNS query {}", domain);
                None
            }
        }
    }

    /// Every attempt must succeed for the pair to pass. `answers` holds the
    /// addresses of the last successful attempt.
    pub async fn probe(&self, target: &ResolverTarget) -> DomainTestResult {
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut answers = Vec::new();

        for attempt in 1..=self.attempts {
            log::info!(
                "DNS query: {} server: {} attempt: {}/{}",
                target.domain,
                target.server,
                attempt,
                self.attempts
            );
            match self.lookup.lookup(&target.domain, &target.server).await {
                Ok(ips) => {
                    succeeded += 1;
                    answers = ips;
                }
                Err(e) => {
                    failed += 1;
                    log::error!(
                        "Failed to resolve DNS query: {} server: {} ==> {}",
                        target.domain,
                        target.server,
                        e
                    );
                }
            }
        }

        log::debug!(
            "success: {} fail: {} domain: {} server: {}",
            succeeded,
            failed,
            target.domain,
            target.server
        );

        let verdict = if failed > 0 {
            log::error!("DNS query failed {} times", failed);
            Verdict::Failed
        } else {
            log::info!("DNS queries succeeded {} times", succeeded);
            Verdict::Success
        };

        DomainTestResult {
            domain: target.domain.clone(),
            server: target.server.clone(),
            verdict,
            answers,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// Replays a scripted sequence of lookup outcomes
    pub(crate) struct ScriptedLookup {
        outcomes: Mutex<VecDeque<Result<Vec<IpAddr>>>>,
    }

    impl ScriptedLookup {
        pub(crate) fn new(outcomes: Vec<Result<Vec<IpAddr>>>) -> Self {
            ScriptedLookup {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl DnsLookup for ScriptedLookup {
        async fn lookup(&self, _domain: &str, _server: &str) -> Result<Vec<IpAddr>> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProbeError::Timeout))
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn test_all_attempts_succeed() {
        let lookup = ScriptedLookup::new(vec![Ok(vec![ip(1)]), Ok(vec![ip(2)]), Ok(vec![ip(3)])]);
        let probe = ResolverProbe::new(Arc::new(lookup), 3);

        let result = probe.probe(&ResolverTarget::new("amazon.com", "10.100.0.10")).await;

        assert_eq!(result.verdict, Verdict::Success);
        assert_eq!(result.server, "10.100.0.10");
        // Answers come from the last successful attempt
        assert_eq!(result.answers, vec![ip(3)]);
    }

    #[tokio::test]
    async fn test_single_failure_fails_pair() {
        let lookup = ScriptedLookup::new(vec![
            Ok(vec![ip(1)]),
            Ok(vec![ip(2)]),
            Err(ProbeError::Timeout),
        ]);
        let probe = ResolverProbe::new(Arc::new(lookup), 3);

        let result = probe.probe(&ResolverTarget::new("amazon.com", "10.100.0.10")).await;

        assert_eq!(result.verdict, Verdict::Failed);
        assert_eq!(result.answers, vec![ip(2)]);
    }

    #[tokio::test]
    async fn test_all_failures_leave_answers_empty() {
        let lookup = ScriptedLookup::new(vec![]);
        let probe = ResolverProbe::new(Arc::new(lookup), 3);

        let result = probe.probe(&ResolverTarget::new("example.com", "10.0.0.2")).await;

        assert_eq!(result.verdict, Verdict::Failed);
        assert!(result.answers.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_uses_first_server() {
        let lookup = ScriptedLookup::new(vec![Ok(vec![ip(9)]); 3]);
        let probe = ResolverProbe::new(Arc::new(lookup), 3);
        let servers = vec!["10.100.0.10".to_string(), "192.168.1.1".to_string()];

        let result = probe.resolve("amazon.com", &servers).await.unwrap();
        assert_eq!(result.server, "10.100.0.10");

        assert!(probe.resolve("amazon.com", &[]).await.is_none());
    }

    #[test]
    fn test_parse_server_forms() {
        assert_eq!(
            parse_server("10.100.0.10").unwrap(),
            "10.100.0.10:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_server("10.100.0.10:5353").unwrap(),
            "10.100.0.10:5353".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(
            parse_server("not-an-ip"),
            Err(ProbeError::InvalidServer { .. })
        ));
    }

    #[test]
    fn test_fqdn() {
        assert_eq!(fqdn("amazon.com"), "amazon.com.");
        assert_eq!(fqdn("kubernetes.default.svc.cluster.local."), "kubernetes.default.svc.cluster.local.");
    }

    #[test]
    fn test_verdict_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Verdict::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&Verdict::Failed).unwrap(), "\"failed\"");
    }
}
