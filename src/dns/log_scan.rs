//! Error keyword scan over DNS backend pod logs

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ERROR_PATTERN: &str = "error|timeout|unreachable";

lazy_static! {
    static ref DEFAULT_ERROR_REGEX: Regex =
        Regex::new(DEFAULT_ERROR_PATTERN).expect("Failed to compile log error regex");
}

/// Keyword hits found across the scanned pods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogScanResult {
    #[serde(rename = "errorsInLogs")]
    pub errors_in_logs: bool,
    /// keyword -> occurrences
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, usize>,
    #[serde(rename = "podsScanned", default)]
    pub pods_scanned: Vec<String>,
}

pub struct LogScanner {
    pattern: Regex,
}

impl Default for LogScanner {
    fn default() -> Self {
        LogScanner {
            pattern: DEFAULT_ERROR_REGEX.clone(),
        }
    }
}

impl LogScanner {
    /// The default keyword set reuses the precompiled regex.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern == DEFAULT_ERROR_PATTERN {
            return Ok(LogScanner::default());
        }
        Ok(LogScanner {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Fold one pod's log text into `result`.
    pub fn scan_into(&self, result: &mut LogScanResult, pod: &str, logs: &str) {
        let mut hits = 0;
        for m in self.pattern.find_iter(logs) {
            *result.errors.entry(m.as_str().to_string()).or_insert(0) += 1;
            hits += 1;
        }

        if hits > 0 {
            log::debug!("Seeing {} error keywords in logs of pod {}", hits, pod);
            result.errors_in_logs = true;
        } else {
            log::debug!("NO errors in logs of pod {}", pod);
        }
        result.pods_scanned.push(pod.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_counts_keywords() {
        let logs = "[INFO] 10.0.0.5:41234 - 1 \"A IN amazon.com. udp\" NOERROR\n\
                    [ERROR] plugin/errors: 2 amazon.com. A: read udp 10.0.0.2:53: i/o timeout\n\
                    [ERROR] plugin/errors: 2 example.com. A: read udp: i/o timeout\n";
        let scanner = LogScanner::default();
        let mut result = LogScanResult::default();

        scanner.scan_into(&mut result, "coredns-abc", logs);

        assert!(result.errors_in_logs);
        assert_eq!(result.errors.get("errors"), None);
        assert_eq!(result.errors.get("error"), Some(&2));
        assert_eq!(result.errors.get("timeout"), Some(&2));
        assert_eq!(result.pods_scanned, vec!["coredns-abc"]);
    }

    #[test]
    fn test_clean_logs() {
        let scanner = LogScanner::default();
        let mut result = LogScanResult::default();

        scanner.scan_into(&mut result, "coredns-abc", "[INFO] Reloading complete\n");
        scanner.scan_into(&mut result, "coredns-def", "");

        assert!(!result.errors_in_logs);
        assert!(result.errors.is_empty());
        assert_eq!(result.pods_scanned.len(), 2);
    }

    #[test]
    fn test_custom_pattern() {
        let scanner = LogScanner::new("SERVFAIL").unwrap();
        let mut result = LogScanResult::default();

        scanner.scan_into(&mut result, "coredns-abc", "x SERVFAIL y SERVFAIL");
        assert_eq!(result.errors.get("SERVFAIL"), Some(&2));

        assert!(LogScanner::new("(unclosed").is_err());
    }

    #[test]
    fn test_default_pattern_uses_precompiled_regex() {
        let scanner = LogScanner::new(DEFAULT_ERROR_PATTERN).unwrap();
        assert_eq!(scanner.pattern.as_str(), DEFAULT_ERROR_REGEX.as_str());

        let mut result = LogScanResult::default();
        scanner.scan_into(&mut result, "coredns-1", "[ERROR] plugin/errors: 2 amazon.com. A: read udp i/o timeout");
        assert_eq!(result.errors.get("timeout"), Some(&1));
    }
}
