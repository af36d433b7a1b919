use std::fmt::Display;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::check::Conclusion;

use super::{ApiError, ApiResult, GitHub, InstallationToken, JsonExt, OwnerId, RepoId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSuiteAction {
    /// A check suite was requested (when code is pushed)
    Requested,
    /// A check suite was re-requested (when re-running on code that was previously pushed)
    Rerequested,
    /// A check suite has finished running
    Completed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunAction {
    Created,
    RequestedAction,
    Rerequested,
    Completed,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct CheckRunId(u64);

impl Display for CheckRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckRun {
    pub id: CheckRunId,
    pub name: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSuite {
    pub head_sha: String,
}

#[derive(Deserialize)]
struct CheckRunList {
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Serialize)]
pub struct CheckRunOutput<'a> {
    pub title: &'a str,
    pub summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<&'a [Annotation]>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub annotation_level: AnnotationLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

impl GitHub<InstallationToken> {
    /// Find the check run with the given name on a commit, if there is one.
    #[tracing::instrument(skip(self))]
    pub async fn find_check_run(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        check_run_name: &str,
        head_sha: &str,
    ) -> ApiResult<Option<CheckRun>> {
        let response = self
            .get(format!("repos/{owner}/{repo}/commits/{head_sha}/check-runs"))
            .query(&[("check_name", check_run_name), ("filter", "latest")])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ApiError::UnexpectedResponse(response.text().await?));
        }

        let list: CheckRunList = response.parse_json().await?;
        Ok(list
            .check_runs
            .into_iter()
            .find(|run| run.name == check_run_name))
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_check_run(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        check_run_name: &str,
        head_sha: &str,
    ) -> ApiResult<CheckRun> {
        let response = self
            .post(format!("repos/{owner}/{repo}/check-runs"))
            .json(&serde_json::json!({
                "name": check_run_name,
                "head_sha": head_sha,
                "status": "in_progress",
            }))
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(ApiError::UnexpectedResponse(response.text().await?));
        }

        response.parse_json().await
    }

    /// Mark an existing check run as in progress again, before new
    /// annotations are added to it.
    #[tracing::instrument(skip(self))]
    pub async fn restart_check_run(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        check_run: CheckRunId,
    ) -> ApiResult<CheckRun> {
        self.patch_check_run(
            owner,
            repo,
            check_run,
            serde_json::json!({ "status": "in_progress" }),
        )
        .await
    }

    /// Add annotations to a check run. GitHub appends them to the ones that
    /// were already submitted.
    #[tracing::instrument(skip(self, output), fields(annotations = output.annotations.map_or(0, |a| a.len())))]
    pub async fn annotate_check_run<'a>(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        check_run: CheckRunId,
        output: CheckRunOutput<'a>,
    ) -> ApiResult<CheckRun> {
        self.patch_check_run(
            owner,
            repo,
            check_run,
            serde_json::json!({ "output": output }),
        )
        .await
    }

    #[tracing::instrument(skip(self, output))]
    pub async fn complete_check_run<'a>(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        check_run: CheckRunId,
        conclusion: Conclusion,
        output: CheckRunOutput<'a>,
    ) -> ApiResult<CheckRun> {
        self.patch_check_run(
            owner,
            repo,
            check_run,
            serde_json::json!({
                "status": "completed",
                "conclusion": conclusion.as_str(),
                "output": output,
            }),
        )
        .await
    }

    async fn patch_check_run(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        check_run: CheckRunId,
        body: serde_json::Value,
    ) -> ApiResult<CheckRun> {
        let response = self
            .patch(format!("repos/{owner}/{repo}/check-runs/{check_run}"))
            .json(&body)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let text = response.text().await?;
            debug!("GitHub said: {}", text);
            return Err(ApiError::UnexpectedResponse(text));
        }

        response.parse_json().await
    }
}
