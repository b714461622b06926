//! Build identity of the tool

use serde::{Deserialize, Serialize};

pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

/// Source repository, injected at build time through `DNSDOCTOR_REPO`
pub const REPO: &str = match option_env!("DNSDOCTOR_REPO") {
    Some(repo) => repo,
    None => "UNKNOWN",
};

/// Short commit sha, injected at build time through `DNSDOCTOR_COMMIT`
pub const COMMIT: &str = match option_env!("DNSDOCTOR_COMMIT") {
    Some(commit) => commit,
    None => "UNKNOWN",
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagToolInfo {
    pub release: String,
    pub repo: String,
    pub commit: String,
}

impl Default for DiagToolInfo {
    fn default() -> Self {
        DiagToolInfo {
            release: RELEASE.to_string(),
            repo: REPO.to_string(),
            commit: COMMIT.to_string(),
        }
    }
}

pub fn banner() -> String {
    let rule = "-".repeat(71);
    format!(
        "{rule}\nEKS DNS Doctor\nRelease:    {}\nBuild:      {}\nRepository: {}\n{rule}",
        RELEASE,
        COMMIT,
        REPO,
        rule = rule
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_lists_release_and_build() {
        let banner = banner();
        assert!(banner.contains(&format!("Release:    {}", RELEASE)));
        assert!(banner.contains(&format!("Build:      {}", COMMIT)));
    }

    #[test]
    fn test_tool_info_json() {
        let json = serde_json::to_value(DiagToolInfo::default()).unwrap();
        assert_eq!(json["release"], RELEASE);
        assert!(json.get("commit").is_some());
    }
}
