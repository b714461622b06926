//! Run configuration
//!
//! Built-in defaults, overlaid by an optional TOML file, overlaid by command
//! line flags and their environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::dns::log_scan::DEFAULT_ERROR_PATTERN;
use crate::k8s::DnsBackendObjects;
use crate::logging::{LogLevel, LoggerConfig, DEFAULT_LOG_PATH};

pub const DEFAULT_REPORT_PATH: &str = "/var/log/eks-dns-diag-summary.json";

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display(fmt = "cannot read config file {}: {}", path, source)]
    Read { path: String, source: std::io::Error },
    #[display(fmt = "invalid config file {}: {}", path, source)]
    Parse { path: String, source: toml::de::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    pub namespace: String,
    pub service_name: String,
    pub deployment_name: String,
    pub configmap_name: String,
    pub configmap_key: String,
    pub pod_selector: String,
    pub domains: Vec<String>,
    /// Backend pod IPs added to the nameserver list
    pub max_endpoint_servers: usize,
    pub probe_attempts: u32,
    pub probe_timeout_secs: u64,
    /// Concurrent probes; 1 runs the matrix sequentially
    pub probe_concurrency: usize,
    pub node_local_cache_ip: String,
    pub recommended_version: String,
    pub logging_directive: String,
    pub log_error_pattern: String,
    pub resolv_conf_path: PathBuf,
    pub report_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub log_level: LogLevel,
    pub aws_timeout_secs: u64,
    pub skip_cloud: bool,
    pub hold: bool,
}

impl Default for DiagConfig {
    fn default() -> Self {
        DiagConfig {
            namespace: "kube-system".to_string(),
            service_name: "kube-dns".to_string(),
            deployment_name: "coredns".to_string(),
            configmap_name: "coredns".to_string(),
            configmap_key: "Corefile".to_string(),
            pod_selector: "k8s-app=kube-dns".to_string(),
            domains: vec![
                "amazon.com".to_string(),
                "kubernetes.default.svc.cluster.local".to_string(),
            ],
            max_endpoint_servers: 2,
            probe_attempts: 3,
            probe_timeout_secs: 5,
            probe_concurrency: 1,
            node_local_cache_ip: "169.254.20.10".to_string(),
            recommended_version: "v1.6.6".to_string(),
            logging_directive: "log".to_string(),
            log_error_pattern: DEFAULT_ERROR_PATTERN.to_string(),
            resolv_conf_path: PathBuf::from("/etc/resolv.conf"),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            log_path: Some(PathBuf::from(DEFAULT_LOG_PATH)),
            log_level: LogLevel::Debug,
            aws_timeout_secs: 10,
            skip_cloud: false,
            hold: false,
        }
    }
}

impl DiagConfig {
    pub fn from_toml_str(path: &str, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&display, &content)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn aws_timeout(&self) -> Duration {
        Duration::from_secs(self.aws_timeout_secs)
    }

    pub fn backend_objects(&self) -> DnsBackendObjects {
        DnsBackendObjects {
            service: self.service_name.clone(),
            deployment: self.deployment_name.clone(),
            configmap: self.configmap_name.clone(),
            configmap_key: self.configmap_key.clone(),
        }
    }

    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            level: self.log_level,
            file_output: self.log_path.clone(),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}

/// Diagnose in-cluster DNS resolution on EKS and write a JSON report
#[derive(Parser, Debug)]
#[command(name = "dnsdoctor")]
#[command(version)]
#[command(about = "Diagnose in-cluster DNS resolution failures on EKS", long_about = None)]
pub struct Cli {
    /// TOML file with configuration overrides
    #[arg(short, long, env = "DNSDOCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Namespace of the DNS backend
    #[arg(short, long, env = "DNSDOCTOR_NAMESPACE")]
    pub namespace: Option<String>,

    /// Domain to resolve (repeatable)
    #[arg(short, long = "domain", env = "DNSDOCTOR_DOMAINS", value_delimiter = ',')]
    pub domains: Vec<String>,

    /// Backend pod IPs to probe in addition to the configured resolver
    #[arg(long, env = "DNSDOCTOR_MAX_ENDPOINTS")]
    pub max_endpoints: Option<usize>,

    /// Resolution attempts per domain and nameserver
    #[arg(long, env = "DNSDOCTOR_ATTEMPTS")]
    pub attempts: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "DNSDOCTOR_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Probes in flight at once
    #[arg(long, env = "DNSDOCTOR_CONCURRENCY")]
    pub concurrency: Option<usize>,

    #[arg(long, env = "DNSDOCTOR_RESOLV_CONF")]
    pub resolv_conf: Option<PathBuf>,

    /// Where the JSON report is written
    #[arg(short, long, env = "DNSDOCTOR_REPORT_PATH")]
    pub report_path: Option<PathBuf>,

    #[arg(long, env = "DNSDOCTOR_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    #[arg(long, value_enum, env = "DNSDOCTOR_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Skip security group and network ACL checks
    #[arg(long, env = "DNSDOCTOR_SKIP_CLOUD")]
    pub skip_cloud: bool,

    /// Keep running after the report is written
    #[arg(long, env = "DNSDOCTOR_HOLD")]
    pub hold: bool,

    /// Format of the report echoed to stdout
    #[arg(short, long, value_enum, default_value = "json")]
    pub output: OutputFormat,
}

impl Cli {
    /// Defaults, then `--config`, then flags
    pub fn resolve(&self) -> Result<DiagConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => DiagConfig::load(path)?,
            None => DiagConfig::default(),
        };
        Ok(self.apply(base))
    }

    pub fn apply(&self, mut config: DiagConfig) -> DiagConfig {
        if let Some(namespace) = &self.namespace {
            config.namespace = namespace.clone();
        }
        if !self.domains.is_empty() {
            config.domains = self.domains.clone();
        }
        if let Some(n) = self.max_endpoints {
            config.max_endpoint_servers = n;
        }
        if let Some(n) = self.attempts {
            config.probe_attempts = n;
        }
        if let Some(secs) = self.timeout {
            config.probe_timeout_secs = secs;
        }
        if let Some(n) = self.concurrency {
            config.probe_concurrency = n;
        }
        if let Some(path) = &self.resolv_conf {
            config.resolv_conf_path = path.clone();
        }
        if let Some(path) = &self.report_path {
            config.report_path = path.clone();
        }
        if let Some(path) = &self.log_path {
            config.log_path = Some(path.clone());
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.skip_cloud |= self.skip_cloud;
        config.hold |= self.hold;
        config
    }
}
