//! Diagnosis report
//!
//! [`SummaryBuilder`] collects partial results and errors while the pass runs;
//! [`SummaryBuilder::finish`] derives the `Analysis` map and the joined
//! `diagnosisError` and hands back the immutable [`DiagnosisSummary`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::DiagError;
use crate::cloud::nacl::NetworkAclVerdict;
use crate::cloud::security_group::SecurityGroupVerdict;
use crate::cloud::{ClusterDescription, InstanceIdentity};
use crate::config::OutputFormat;
use crate::dns::log_scan::LogScanResult;
use crate::dns::matrix::DnsTestReport;
use crate::dns::resolv_conf::ResolvConf;
use crate::version::DiagToolInfo;

#[derive(Debug, Display, Error)]
pub enum ReportError {
    #[display(fmt = "failed to serialize report: {}", source)]
    Serialize { source: serde_json::Error },
    #[display(fmt = "failed to render report as YAML: {}", source)]
    Yaml { source: serde_yaml::Error },
    #[display(fmt = "failed to write report to {}: {}", path, source)]
    Write { path: String, source: io::Error },
}

/// DNS backend state and the resolver matrix. `dnstest_results` is absent
/// when the matrix could not run; the reason is in `diagnosisError`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorednsChecks {
    #[serde(rename = "clusterIP")]
    pub cluster_ip: String,
    #[serde(rename = "endpointsIP")]
    pub endpoints_ip: Vec<String>,
    pub not_ready_endpoints: Vec<String>,
    pub namespace: String,
    pub image_version: String,
    pub recommended_version: String,
    pub is_recommended_version: bool,
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dnstest_results: Option<DnsTestReport>,
    pub pod_names: Vec<String>,
    pub corefile: String,
    pub resolvconf: ResolvConf,
    pub is_node_local_cache_enabled: bool,
    pub log_plugin_enabled_by_diagnosis: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_check_in_coredns_logs: Option<LogScanResult>,
}

/// Cloud side: instance, cluster, security group and network ACL results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksClusterChecks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_checks: Option<SecurityGroupVerdict>,
    pub nacl_rules_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nacl_details: Option<NetworkAclVerdict>,
    pub region: String,
    pub security_group_ids: Vec<String>,
    pub cluster_name: String,
    pub cluster_security_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_identity_document: Option<InstanceIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_details: Option<ClusterDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisSummary {
    pub diagnosis_completion: bool,
    pub diagnosis_tool_info: DiagToolInfo,
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis_error: Option<String>,
    #[serde(rename = "Analysis", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub analysis: BTreeMap<String, Value>,
    pub eks_version: String,
    pub coredns_checks: CorednsChecks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eks_cluster_checks: Option<EksClusterChecks>,
}

impl DiagnosisSummary {
    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        serde_json::to_string_pretty(self).map_err(|source| ReportError::Serialize { source })
    }

    pub fn render(&self, format: OutputFormat) -> Result<String, ReportError> {
        match format {
            OutputFormat::Json => self.to_json_pretty(),
            OutputFormat::Yaml => serde_yaml::to_string(self).map_err(|source| ReportError::Yaml { source }),
        }
    }

    /// Serialize as pretty JSON and write to `path`, creating parent directories.
    pub fn write_report(&self, path: &Path) -> Result<(), ReportError> {
        let report = self.to_json_pretty()?;
        let write_err = |source| ReportError::Write {
            path: path.display().to_string(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        fs::write(path, report).map_err(write_err)?;

        log::info!("Diagnosis report written to {}", path.display());
        Ok(())
    }
}

pub struct SummaryBuilder {
    run_id: Uuid,
    completed: bool,
    eks_version: String,
    coredns: CorednsChecks,
    cluster: Option<EksClusterChecks>,
    errors: Vec<DiagError>,
}

impl SummaryBuilder {
    pub fn new(run_id: Uuid) -> Self {
        SummaryBuilder {
            run_id,
            completed: false,
            eks_version: String::new(),
            coredns: CorednsChecks::default(),
            cluster: None,
            errors: Vec::new(),
        }
    }

    /// Report for a run that could not start. Completion stays false.
    pub fn aborted(run_id: Uuid, err: DiagError) -> DiagnosisSummary {
        let mut builder = SummaryBuilder::new(run_id);
        builder.record(err);
        builder.finish()
    }

    /// Log and keep the error; the pass goes on.
    pub fn record(&mut self, err: DiagError) {
        log::error!("{}", err);
        self.errors.push(err);
    }

    pub fn coredns(&mut self) -> &mut CorednsChecks {
        &mut self.coredns
    }

    pub fn set_eks_version(&mut self, version: String) {
        self.eks_version = version;
    }

    pub fn set_cluster_checks(&mut self, checks: EksClusterChecks) {
        self.cluster = Some(checks);
    }

    pub fn mark_complete(&mut self) {
        self.completed = true;
    }

    pub fn finish(self) -> DiagnosisSummary {
        let analysis = analyze(&self.coredns, self.cluster.as_ref());
        let diagnosis_error = if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        DiagnosisSummary {
            diagnosis_completion: self.completed,
            diagnosis_tool_info: DiagToolInfo::default(),
            run_id: self.run_id,
            diagnosis_error,
            analysis,
            eks_version: self.eks_version,
            coredns_checks: self.coredns,
            eks_cluster_checks: self.cluster,
        }
    }
}

/// Human readable verdicts per check. A misconfigured security group embeds
/// the full verdict so the failing direction and remediation are visible.
pub fn analyze(coredns: &CorednsChecks, cluster: Option<&EksClusterChecks>) -> BTreeMap<String, Value> {
    let mut res = BTreeMap::new();

    let dnstest = match &coredns.dnstest_results {
        None => "DNS resolution test could not be run, see diagnosisError",
        Some(report) if report.overall.is_success() => "DNS resolution is working correctly in the cluster",
        Some(_) => {
            "DNS resolution is failing for one or more domain and nameserver pairs, see corednsChecks.dnstestResults"
        }
    };
    res.insert("dnstest".to_string(), json!(dnstest));

    let cluster = match cluster {
        Some(cluster) => cluster,
        None => {
            res.insert(
                "cloudChecks".to_string(),
                json!("security group and network ACL checks were skipped"),
            );
            return res;
        }
    };

    let nacl = match (&cluster.nacl_details, cluster.nacl_rules_check) {
        (None, _) => "naclRules could not be verified",
        (Some(_), true) => "naclRules are configured correctly...NOT blocking any DNS communication",
        (Some(_), false) => "naclRules are NOT configured correctly...blocking DNS communication",
    };
    res.insert("naclRules".to_string(), json!(nacl));

    let sg = match &cluster.security_group_checks {
        None => json!("securityGroups could not be verified"),
        Some(verdict) if verdict.is_correct => {
            json!("securityGroups are configured correctly...not blocking any DNS communication")
        }
        Some(verdict) => json!(verdict),
    };
    res.insert("securityGroupConfigurations".to_string(), sg);

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::security_group::{self, SecurityGroupRuleSet};
    use crate::dns::probe::{DomainTestResult, Verdict};
    use crate::dns::matrix::DEFAULT_DESCRIPTION;

    fn passing_dns() -> DnsTestReport {
        DnsTestReport::from_results(
            DEFAULT_DESCRIPTION,
            vec!["amazon.com".to_string()],
            vec![DomainTestResult {
                domain: "amazon.com".to_string(),
                server: "10.100.0.10".to_string(),
                verdict: Verdict::Success,
                answers: vec!["205.251.242.103".parse().unwrap()],
            }],
        )
    }

    #[test]
    fn test_errors_joined() {
        let mut builder = SummaryBuilder::new(Uuid::new_v4());
        builder.record(DiagError::discovery("kube-dns service", "not found"));
        builder.record(DiagError::MalformedConfig {
            message: "no '{'".to_string(),
        });

        let summary = builder.finish();
        assert_eq!(
            summary.diagnosis_error.as_deref(),
            Some("kube-dns service: not found; no '{'")
        );
        assert!(!summary.diagnosis_completion);
    }

    #[test]
    fn test_aborted_run_carries_error() {
        let source = regex::Regex::new("error(").unwrap_err();
        let summary = SummaryBuilder::aborted(
            Uuid::new_v4(),
            DiagError::InvalidPattern {
                pattern: "error(".to_string(),
                source,
            },
        );

        assert!(!summary.diagnosis_completion);
        assert!(summary.diagnosis_error.unwrap().contains("error("));
        assert!(summary.coredns_checks.dnstest_results.is_none());
    }

    #[test]
    fn test_no_errors_omits_field() {
        let mut builder = SummaryBuilder::new(Uuid::new_v4());
        builder.mark_complete();
        let json = serde_json::to_value(builder.finish()).unwrap();

        assert_eq!(json["diagnosisCompletion"], true);
        assert!(json.get("diagnosisError").is_none());
        assert!(json.get("eksClusterChecks").is_none());
        assert!(json["corednsChecks"].get("dnstestResults").is_none());
    }

    #[test]
    fn test_analysis_without_cloud() {
        let coredns = CorednsChecks {
            dnstest_results: Some(passing_dns()),
            ..CorednsChecks::default()
        };
        let analysis = analyze(&coredns, None);

        assert_eq!(analysis["dnstest"], "DNS resolution is working correctly in the cluster");
        assert!(analysis.contains_key("cloudChecks"));
        assert!(!analysis.contains_key("naclRules"));
    }

    #[test]
    fn test_analysis_embeds_failing_security_group() {
        let verdict = security_group::evaluate(&SecurityGroupRuleSet::default(), "sg-abc");
        let cluster = EksClusterChecks {
            security_group_checks: Some(verdict),
            nacl_rules_check: true,
            nacl_details: Some(NetworkAclVerdict::default()),
            ..EksClusterChecks::default()
        };

        let analysis = analyze(&CorednsChecks::default(), Some(&cluster));

        assert_eq!(analysis["securityGroupConfigurations"]["isCorrect"], false);
        assert!(analysis["naclRules"].as_str().unwrap().starts_with("naclRules are configured correctly"));
        assert!(analysis["dnstest"].as_str().unwrap().contains("could not be run"));
    }

    #[test]
    fn test_report_field_names() {
        let mut builder = SummaryBuilder::new(Uuid::new_v4());
        builder.coredns().cluster_ip = "10.100.0.10".to_string();
        builder.coredns().endpoints_ip = vec!["192.168.1.5".to_string()];
        builder.coredns().dnstest_results = Some(passing_dns());
        builder.coredns().replicas = 2;
        builder.set_eks_version("v1.28.3-eks-4f4795d".to_string());

        let json = serde_json::to_value(builder.finish()).unwrap();

        assert_eq!(json["eksVersion"], "v1.28.3-eks-4f4795d");
        assert_eq!(json["corednsChecks"]["clusterIP"], "10.100.0.10");
        assert_eq!(json["corednsChecks"]["endpointsIP"][0], "192.168.1.5");
        assert_eq!(json["corednsChecks"]["replicas"], 2);
        let pair = &json["corednsChecks"]["dnstestResults"]["detailedResultForEachDomain"][0];
        assert_eq!(pair["result"], "success");
        assert_eq!(pair["answer"][0], "205.251.242.103");
        assert!(json["Analysis"].is_object());
        assert!(json["diagnosisToolInfo"]["release"].is_string());
    }

    #[test]
    fn test_write_report_creates_file() {
        let dir = std::env::temp_dir().join(format!("dnsdoctor-report-{}", Uuid::new_v4()));
        let path = dir.join("summary.json");

        let summary = SummaryBuilder::new(Uuid::new_v4()).finish();
        summary.write_report(&path).unwrap();

        let written: DiagnosisSummary = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.run_id, summary.run_id);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_write_report_into_file_path_fails() {
        let file = std::env::temp_dir().join(format!("dnsdoctor-blocker-{}", Uuid::new_v4()));
        fs::write(&file, "x").unwrap();

        let err = SummaryBuilder::new(Uuid::new_v4())
            .finish()
            .write_report(&file.join("summary.json"))
            .unwrap_err();

        assert!(matches!(err, ReportError::Write { .. }));
        let _ = fs::remove_file(file);
    }

    #[test]
    fn test_render_yaml() {
        let yaml = SummaryBuilder::new(Uuid::new_v4())
            .finish()
            .render(OutputFormat::Yaml)
            .unwrap();
        assert!(yaml.contains("diagnosisCompletion: false"));
    }
}
