//! DNS Doctor
//!
//! One-shot diagnosis of in-cluster DNS resolution failures on EKS.
//!
//! # Checks
//!
//! * CoreDNS service, endpoints, image version and pods
//! * Live resolution of a domain set against the pod's resolver and backend pod IPs
//! * Corefile query logging, enabled on the fly when missing, and a log error scan when present
//! * Cluster security group and VPC network ACL rules that could block port 53
//!
//! # Architecture
//!
//! * `dns` - resolver probes, the test matrix and Corefile / resolv.conf handling
//! * `cloud` - security group and network ACL evaluation, AWS discovery
//! * `k8s` - cluster discovery
//! * `diagnosis` - step sequencing and the JSON report

/// DNS probing and DNS backend configuration
pub mod dns;

/// Cloud network policy checks
pub mod cloud;

/// Kubernetes discovery
pub mod k8s;

/// Orchestration and report
pub mod diagnosis;

/// Defaults, TOML file and command line
pub mod config;

/// Subscriber setup and run ids
pub mod logging;

/// Release, commit and repository of this build
pub mod version;
