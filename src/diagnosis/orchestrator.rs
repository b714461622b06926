//! Runs every check once, in order, against one cluster

use std::sync::Arc;

use tracing::Instrument;

use super::summary::{DiagnosisSummary, EksClusterChecks, SummaryBuilder};
use super::DiagError;
use crate::cloud::{nacl, security_group, CloudQuery};
use crate::config::DiagConfig;
use crate::dns::corefile::{CorefileDocument, DirectiveEditor, HeuristicEditor};
use crate::dns::log_scan::{LogScanResult, LogScanner};
use crate::dns::matrix::{build_nameservers, DnsTestMatrix};
use crate::dns::probe::{DnsLookup, ResolverProbe};
use crate::dns::resolv_conf::LocalResolverConfig;
use crate::k8s::ClusterQuery;
use crate::logging::RunContext;

/// Cloud side of a run
enum CloudAccess {
    Disabled,
    Ready(Arc<dyn CloudQuery>),
    /// The client could not be built; reported as a failed step
    Unavailable(String),
}

pub struct DiagnosticOrchestrator {
    config: DiagConfig,
    cluster: Arc<dyn ClusterQuery>,
    cloud: CloudAccess,
    resolver_config: Arc<dyn LocalResolverConfig>,
    editor: Arc<dyn DirectiveEditor>,
    matrix: DnsTestMatrix,
    scanner: LogScanner,
}

impl DiagnosticOrchestrator {
    pub fn new(
        config: DiagConfig,
        cluster: Arc<dyn ClusterQuery>,
        resolver_config: Arc<dyn LocalResolverConfig>,
        lookup: Arc<dyn DnsLookup>,
    ) -> Result<Self, DiagError> {
        let scanner = LogScanner::new(&config.log_error_pattern).map_err(|source| DiagError::InvalidPattern {
            pattern: config.log_error_pattern.clone(),
            source,
        })?;
        let matrix = DnsTestMatrix::new(ResolverProbe::new(lookup, config.probe_attempts))
            .with_concurrency(config.probe_concurrency);

        Ok(DiagnosticOrchestrator {
            config,
            cluster,
            cloud: CloudAccess::Disabled,
            resolver_config,
            editor: Arc::new(HeuristicEditor),
            matrix,
            scanner,
        })
    }

    /// Enables the security group and network ACL checks
    pub fn with_cloud(mut self, cloud: Arc<dyn CloudQuery>) -> Self {
        self.cloud = CloudAccess::Ready(cloud);
        self
    }

    /// Cloud checks were requested but the client failed to build
    pub fn with_cloud_error(mut self, error: impl std::fmt::Display) -> Self {
        self.cloud = CloudAccess::Unavailable(error.to_string());
        self
    }

    pub fn with_editor(mut self, editor: Arc<dyn DirectiveEditor>) -> Self {
        self.editor = editor;
        self
    }

    /// One full pass. Never fails: step errors end up in `diagnosisError`.
    pub async fn run(&self, run: &RunContext) -> DiagnosisSummary {
        let span = tracing::info_span!("diagnosis", run_id = %run.id);
        let summary = self.run_steps(run).instrument(span).await;
        log::info!("Diagnosis finished in {:?}", run.elapsed());
        summary
    }

    async fn run_steps(&self, run: &RunContext) -> DiagnosisSummary {
        let mut sum = SummaryBuilder::new(run.id);
        let ns = self.config.namespace.as_str();
        sum.coredns().namespace = ns.to_string();
        sum.coredns().recommended_version = self.config.recommended_version.clone();

        match self.cluster.server_version().await {
            Ok(version) => {
                log::info!("Running on Kubernetes {}", version);
                sum.set_eks_version(version);
            }
            Err(e) => sum.record(DiagError::discovery("kubernetes version", e)),
        }

        match self.cluster.get_service_cluster_ip(ns).await {
            Ok(ip) => {
                log::info!("{} service ClusterIP: {}", self.config.service_name, ip);
                sum.coredns().cluster_ip = ip;
            }
            Err(e) => sum.record(DiagError::discovery("kube-dns service", e)),
        }

        match self.cluster.get_endpoint_addresses(ns).await {
            Ok(addresses) => {
                log::info!(
                    "{} endpoint IPs: {:?} not ready: {:?}",
                    self.config.service_name,
                    addresses.ready,
                    addresses.not_ready
                );
                if !addresses.not_ready.is_empty() {
                    log::warn!("{} DNS backend pods are not ready", addresses.not_ready.len());
                }
                sum.coredns().endpoints_ip = addresses.ready;
                sum.coredns().not_ready_endpoints = addresses.not_ready;
            }
            Err(e) => sum.record(DiagError::discovery("kube-dns endpoints", e)),
        }

        self.check_version(&mut sum).await;
        self.check_resolv_conf(&mut sum);
        self.run_dns_test(&mut sum).await;

        match self.cluster.list_pod_names(ns, &self.config.pod_selector).await {
            Ok(pods) => {
                log::info!("DNS backend pods: {:?}", pods);
                sum.coredns().pod_names = pods;
            }
            Err(e) => sum.record(DiagError::discovery("coredns pods", e)),
        }

        self.check_corefile(&mut sum).await;

        match (&self.cloud, self.config.skip_cloud) {
            (CloudAccess::Ready(cloud), false) => {
                let checks = self
                    .cloud_checks(cloud.as_ref(), &mut sum)
                    .instrument(tracing::info_span!("cloud_checks"))
                    .await;
                sum.set_cluster_checks(checks);
            }
            (CloudAccess::Unavailable(message), false) => {
                sum.record(DiagError::discovery("aws client", message));
                sum.set_cluster_checks(EksClusterChecks::default());
            }
            _ => log::info!("Skipping security group and network ACL checks"),
        }

        sum.mark_complete();
        sum.finish()
    }

    async fn check_version(&self, sum: &mut SummaryBuilder) {
        let (tag, replicas) = match self.cluster.get_deployment_image_tag(&self.config.namespace).await {
            Ok(image) => (image.tag, image.replicas),
            Err(e) => {
                sum.record(DiagError::discovery("coredns version", e));
                return;
            }
        };

        let recommended = tag == self.config.recommended_version;
        if recommended {
            log::info!("Recommended coredns version {} is running", tag);
        } else {
            log::info!(
                "coredns is running {}, recommended version is {}",
                tag,
                self.config.recommended_version
            );
        }
        sum.coredns().replicas = replicas;
        sum.coredns().image_version = tag;
        sum.coredns().is_recommended_version = recommended;
    }

    fn check_resolv_conf(&self, sum: &mut SummaryBuilder) {
        let conf = match self.resolver_config.read() {
            Ok(conf) => conf,
            Err(e) => {
                sum.record(DiagError::discovery("resolv.conf", e));
                return;
            }
        };
        log::info!("resolv.conf: {:?}", conf);

        if let Some(primary) = conf.primary_nameserver() {
            let cluster_ip = sum.coredns().cluster_ip.clone();
            if primary == self.config.node_local_cache_ip {
                log::info!("Pod is using the node-local DNS cache at {}", primary);
                sum.coredns().is_node_local_cache_enabled = true;
            } else if primary == cluster_ip {
                log::info!("Pod is using the {} ClusterIP {} as nameserver", self.config.service_name, primary);
            } else {
                log::warn!(
                    "Nameserver {} is neither the {} ClusterIP {:?} nor the node-local cache {}; \
                     check kubelet --cluster-dns and the pod dnsPolicy",
                    primary,
                    self.config.service_name,
                    cluster_ip,
                    self.config.node_local_cache_ip
                );
            }
        }

        sum.coredns().resolvconf = conf;
    }

    async fn run_dns_test(&self, sum: &mut SummaryBuilder) {
        let configured = sum.coredns().resolvconf.nameservers.clone();
        let endpoints = sum.coredns().endpoints_ip.clone();
        let nameservers = build_nameservers(&configured, &endpoints, self.config.max_endpoint_servers);

        if nameservers.is_empty() {
            sum.record(DiagError::discovery("dns test", "no nameservers to probe"));
            return;
        }

        let report = self
            .matrix
            .run(&self.config.domains, &nameservers)
            .instrument(tracing::info_span!("dns_test", pairs = self.config.domains.len() * nameservers.len()))
            .await;
        log::info!(
            "DNS test {:?}: {}/{} pairs succeeded",
            report.overall,
            report.success_count(),
            report.results.len()
        );
        sum.coredns().dnstest_results = Some(report);
    }

    /// Patch the logging directive in when missing; otherwise scan pod logs.
    async fn check_corefile(&self, sum: &mut SummaryBuilder) {
        let ns = self.config.namespace.as_str();
        let directive = self.config.logging_directive.as_str();

        let raw = match self.cluster.get_config_blob(ns).await {
            Ok(raw) => raw,
            Err(e) => {
                sum.record(DiagError::discovery("coredns configmap", e));
                return;
            }
        };
        let doc = CorefileDocument::inspect(self.editor.as_ref(), raw, directive);

        if doc.has_logging_directive {
            sum.coredns().corefile = doc.raw;
            let pods = sum.coredns().pod_names.clone();
            let scan = self.scan_logs(&pods, sum).await;
            sum.coredns().error_check_in_coredns_logs = Some(scan);
            return;
        }

        let patched = match self.editor.insert_directive(&doc.raw, directive) {
            Ok(patched) => patched,
            Err(e) => {
                sum.record(DiagError::MalformedConfig { message: e.to_string() });
                sum.coredns().corefile = doc.raw;
                return;
            }
        };

        match self.cluster.patch_config_blob(ns, &patched).await {
            Ok(()) => {
                log::info!("Enabled the {:?} directive in the Corefile", directive);
                sum.coredns().corefile = patched;
                sum.coredns().log_plugin_enabled_by_diagnosis = true;
            }
            Err(e) => {
                sum.record(DiagError::discovery("coredns configmap patch", e));
                sum.coredns().corefile = doc.raw;
            }
        }
    }

    async fn scan_logs(&self, pods: &[String], sum: &mut SummaryBuilder) -> LogScanResult {
        let mut result = LogScanResult::default();
        for pod in pods {
            match self.cluster.stream_pod_logs(&self.config.namespace, pod).await {
                Ok(logs) => self.scanner.scan_into(&mut result, pod, &logs),
                Err(e) => sum.record(DiagError::discovery("coredns logs", format!("{}: {}", pod, e))),
            }
        }
        if result.errors_in_logs {
            log::warn!("Errors found in DNS backend logs: {:?}", result.errors);
        }
        result
    }

    async fn cloud_checks(&self, cloud: &dyn CloudQuery, sum: &mut SummaryBuilder) -> EksClusterChecks {
        let mut checks = EksClusterChecks::default();

        let identity = match cloud.get_instance_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                sum.record(DiagError::discovery("instance identity", e));
                return checks;
            }
        };
        log::info!("Worker node {} in {}", identity.instance_id, identity.region);
        checks.region = identity.region.clone();

        match cloud.get_attached_security_group_ids(&identity.instance_id).await {
            Ok(ids) => {
                log::info!("SGs attached to instance: {:?}", ids);
                checks.security_group_ids = ids;
            }
            Err(e) => sum.record(DiagError::discovery("attached security groups", e)),
        }

        let instance_id = identity.instance_id.clone();
        checks.instance_identity_document = Some(identity);

        let cluster_name = match cloud.get_cluster_name(&instance_id).await {
            Ok(name) => name,
            Err(e) => {
                sum.record(DiagError::discovery("cluster name", e));
                return checks;
            }
        };
        log::info!("Cluster name is {}", cluster_name);
        checks.cluster_name = cluster_name.clone();

        let cluster = match cloud.get_cluster_by_name(&cluster_name).await {
            Ok(cluster) => cluster,
            Err(e) => {
                sum.record(DiagError::discovery("cluster details", e));
                return checks;
            }
        };

        let cluster_sg = if cluster.cluster_security_group_id.is_empty() {
            cluster.security_group_ids.first().cloned().unwrap_or_default()
        } else {
            cluster.cluster_security_group_id.clone()
        };
        checks.cluster_security_group = cluster_sg.clone();
        let vpc_id = cluster.vpc_id.clone();
        checks.cluster_details = Some(cluster);

        if cluster_sg.is_empty() {
            sum.record(DiagError::discovery("cluster security group", "cluster has no security group"));
        } else {
            match cloud.get_security_group_rules(&cluster_sg).await {
                Ok(rules) => checks.security_group_checks = Some(security_group::evaluate(&rules, &cluster_sg)),
                Err(e) => sum.record(DiagError::discovery("cluster security group", e)),
            }
        }

        match cloud.get_network_acls(&vpc_id).await {
            Ok(acls) => {
                let verdict = nacl::evaluate_all(&acls);
                checks.nacl_rules_check = verdict.port53_egress_allowed;
                checks.nacl_details = Some(verdict);
            }
            Err(e) => sum.record(DiagError::discovery("network ACLs", e)),
        }

        checks
    }
}
