use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::github::api::{OwnerId, RepoId};

mod batch;
mod diagnostics;
mod executor;

pub use batch::GITHUB_MAX_ANNOTATIONS;
pub use diagnostics::{Diagnostic, Severity};
pub use executor::{CheckExecutionError, CheckExecutor};

/// Findings submitted by a CI job for a single commit.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub installation_id: u64,
    pub owner: String,
    pub repo: String,
    pub sha: String,
    #[serde(default)]
    pub pr_number: Option<u64>,
    /// Name of the check run. Falls back to the configured name.
    #[serde(default)]
    pub name: Option<String>,
    /// Report diagnostics on files the pull request doesn't touch.
    #[serde(default)]
    pub outside_diff: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl CheckRequest {
    pub fn owner(&self) -> OwnerId {
        OwnerId::new(&self.owner)
    }

    pub fn repo(&self) -> RepoId {
        RepoId::new(&self.repo)
    }
}

/// What is sent back to the CI job once annotations have been published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub conclusion: Conclusion,
    pub reported_count: usize,
    pub filtered_count: usize,
    pub check_run_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Neutral,
    Failure,
}

impl Conclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Neutral => "neutral",
            Conclusion::Failure => "failure",
        }
    }
}

impl Display for Conclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy applied to every check request.
#[derive(Debug, Clone)]
pub struct CheckSettings {
    /// Check run name used when the request doesn't provide one.
    pub check_name: String,
    pub max_batch_size: usize,
    /// Whether warnings make the check fail.
    pub warnings_block: bool,
}

impl Default for CheckSettings {
    fn default() -> Self {
        CheckSettings {
            check_name: "doghouse".to_owned(),
            max_batch_size: GITHUB_MAX_ANNOTATIONS,
            warnings_block: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request() {
        let request: CheckRequest = serde_json::from_str(
            r#"{
                "installation_id": 42,
                "owner": "haya14busa",
                "repo": "reviewdog",
                "sha": "abc123",
                "pr_number": 7,
                "diagnostics": [
                    {"path": "main.go", "line": 3, "severity": "warning", "message": "unused", "rule": "U1000"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(request.installation_id, 42);
        assert_eq!(request.pr_number, Some(7));
        assert_eq!(request.name, None);
        assert!(!request.outside_diff);
        assert_eq!(request.diagnostics.len(), 1);
        assert_eq!(request.diagnostics[0].rule.as_deref(), Some("U1000"));
        assert_eq!(request.owner().to_string(), "haya14busa");
    }

    #[test]
    fn request_without_diagnostics_is_rejected() {
        let err = serde_json::from_str::<CheckRequest>(
            r#"{"installation_id": 1, "owner": "o", "repo": "r", "sha": "s"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("diagnostics"));
    }

    #[test]
    fn result_wire_format() {
        let result = CheckResult {
            conclusion: Conclusion::Neutral,
            reported_count: 0,
            filtered_count: 3,
            check_run_url: "https://github.com/o/r/runs/1".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "conclusion": "neutral",
                "reported_count": 0,
                "filtered_count": 3,
                "check_run_url": "https://github.com/o/r/runs/1",
            })
        );
    }
}
