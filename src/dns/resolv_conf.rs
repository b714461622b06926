//! Local resolver configuration (`/etc/resolv.conf`)

use std::fs;
use std::io;
use std::path::PathBuf;

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

#[derive(Debug, Display, From, Error)]
pub enum ResolvConfError {
    Io(io::Error),
    #[from(ignore)]
    #[display(fmt = "line {}: invalid ndots option {:?}", line, value)]
    InvalidNdots { line: usize, value: String },
}

type Result<T> = std::result::Result<T, ResolvConfError>;

/// Parsed resolver configuration of the pod the tool runs in
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvConf {
    #[serde(rename = "SearchPath")]
    pub search_paths: Vec<String>,
    #[serde(rename = "Nameserver")]
    pub nameservers: Vec<String>,
    #[serde(rename = "Options")]
    pub options: Vec<String>,
    #[serde(rename = "Ndots")]
    pub ndots: u32,
}

impl ResolvConf {
    pub fn parse(content: &str) -> Result<Self> {
        let mut conf = ResolvConf {
            ndots: 1,
            ..Default::default()
        };

        for (idx, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let keyword = match fields.next() {
                Some(k) if !k.starts_with('#') && !k.starts_with(';') => k,
                _ => continue,
            };

            match keyword {
                "nameserver" => conf.nameservers.extend(fields.map(String::from)),
                "search" | "domain" => conf.search_paths = fields.map(String::from).collect(),
                "options" => {
                    for opt in fields {
                        if let Some(value) = opt.strip_prefix("ndots:") {
                            conf.ndots = value.parse().map_err(|_| ResolvConfError::InvalidNdots {
                                line: idx + 1,
                                value: value.to_string(),
                            })?;
                        }
                        conf.options.push(opt.to_string());
                    }
                }
                other => log::debug!("Ignoring resolv.conf keyword {:?}", other),
            }
        }

        Ok(conf)
    }

    pub fn primary_nameserver(&self) -> Option<&str> {
        self.nameservers.first().map(String::as_str)
    }
}

/// Source of the local resolver configuration
pub trait LocalResolverConfig: Send + Sync {
    fn read(&self) -> Result<ResolvConf>;
}

/// Reads resolver configuration from a file
pub struct FileResolverConfig {
    path: PathBuf,
}

impl FileResolverConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileResolverConfig { path: path.into() }
    }
}

impl Default for FileResolverConfig {
    fn default() -> Self {
        FileResolverConfig::new("/etc/resolv.conf")
    }
}

impl LocalResolverConfig for FileResolverConfig {
    fn read(&self) -> Result<ResolvConf> {
        log::info!("Reading {}", self.path.display());
        let content = fs::read_to_string(&self.path)?;
        let conf = ResolvConf::parse(&content)?;
        log::info!("resolv.conf values: {:?}", conf);
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POD_RESOLV_CONF: &str = "nameserver 10.100.0.10\nsearch default.svc.cluster.local svc.cluster.local cluster.local us-west-2.compute.internal\noptions ndots:5\n";

    #[test]
    fn test_parse_pod_resolv_conf() {
        let conf = ResolvConf::parse(POD_RESOLV_CONF).unwrap();

        assert_eq!(conf.nameservers, vec!["10.100.0.10"]);
        assert_eq!(conf.search_paths.len(), 4);
        assert_eq!(conf.search_paths[0], "default.svc.cluster.local");
        assert_eq!(conf.ndots, 5);
        assert_eq!(conf.options, vec!["ndots:5"]);
        assert_eq!(conf.primary_nameserver(), Some("10.100.0.10"));
    }

    #[test]
    fn test_parse_multiple_nameservers_and_comments() {
        let content = "# generated\n\nnameserver 169.254.20.10\n; legacy\nnameserver 10.100.0.10\noptions timeout:2 attempts:3\n";
        let conf = ResolvConf::parse(content).unwrap();

        assert_eq!(conf.nameservers, vec!["169.254.20.10", "10.100.0.10"]);
        assert_eq!(conf.ndots, 1);
        assert_eq!(conf.options, vec!["timeout:2", "attempts:3"]);
    }

    #[test]
    fn test_invalid_ndots() {
        match ResolvConf::parse("options ndots:five\n") {
            Err(ResolvConfError::InvalidNdots { line, value }) => {
                assert_eq!(line, 1);
                assert_eq!(value, "five");
            }
            other => panic!("Expected InvalidNdots, got {:?}", other),
        }
    }

    #[test]
    fn test_file_reader_missing_file() {
        let reader = FileResolverConfig::new("/nonexistent/resolv.conf");
        assert!(matches!(reader.read(), Err(ResolvConfError::Io(_))));
    }
}
