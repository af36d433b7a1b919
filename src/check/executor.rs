use std::{borrow::Cow, fmt::Display};

use tracing::{debug, info};

use crate::github::api::{
    check::CheckRunOutput, ApiError, InstallationTokenProvider, TokenExchangeError,
};

use super::{
    batch::{batch, conclude},
    CheckRequest, CheckResult, CheckSettings, Diagnostic,
};

const OUTPUT_TITLE: &str = "doghouse report";

/// Where a check request was when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticating,
    FilteringDiff,
    CreatingCheckRun,
    SubmittingAnnotations { batch: usize, of: usize },
    Finalizing,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Authenticating => f.write_str("authenticating"),
            Stage::FilteringDiff => f.write_str("listing the files of the pull request"),
            Stage::CreatingCheckRun => f.write_str("creating the check run"),
            Stage::SubmittingAnnotations { batch, of } => {
                write!(f, "submitting annotation batch {batch}/{of}")
            }
            Stage::Finalizing => f.write_str("finalizing the check run"),
        }
    }
}

#[derive(Debug)]
pub enum ExecutionFailure {
    Token(TokenExchangeError),
    Api(ApiError),
}

impl From<TokenExchangeError> for ExecutionFailure {
    fn from(value: TokenExchangeError) -> Self {
        ExecutionFailure::Token(value)
    }
}

impl From<ApiError> for ExecutionFailure {
    fn from(value: ApiError) -> Self {
        ExecutionFailure::Api(value)
    }
}

/// A check request that could not be carried out. Annotations submitted
/// before the failure stay on GitHub.
#[derive(Debug)]
pub struct CheckExecutionError {
    pub installation_id: u64,
    pub stage: Stage,
    /// Reported and filtered counts, when they were known at the time of
    /// the failure.
    pub counts: Option<(usize, usize)>,
    pub source: ExecutionFailure,
}

impl std::error::Error for CheckExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            ExecutionFailure::Token(e) => Some(e),
            ExecutionFailure::Api(e) => Some(e),
        }
    }
}

impl Display for CheckExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Check failed while {} (installation {}",
            self.stage, self.installation_id
        )?;
        if let Some((reported, filtered)) = self.counts {
            write!(f, ", {reported} reported, {filtered} filtered")?;
        }
        f.write_str("): ")?;
        match &self.source {
            ExecutionFailure::Token(e) => e.fmt(f),
            ExecutionFailure::Api(e) => e.fmt(f),
        }
    }
}

struct Progress {
    installation_id: u64,
    stage: Stage,
    counts: Option<(usize, usize)>,
}

impl Progress {
    fn fail(&self, source: impl Into<ExecutionFailure>) -> CheckExecutionError {
        CheckExecutionError {
            installation_id: self.installation_id,
            stage: self.stage,
            counts: self.counts,
            source: source.into(),
        }
    }
}

/// Publishes the diagnostics of a [`CheckRequest`] as a GitHub check run.
pub struct CheckExecutor<'a> {
    tokens: &'a InstallationTokenProvider,
    settings: &'a CheckSettings,
}

impl<'a> CheckExecutor<'a> {
    pub fn new(tokens: &'a InstallationTokenProvider, settings: &'a CheckSettings) -> Self {
        CheckExecutor { tokens, settings }
    }

    #[tracing::instrument(skip_all, fields(
        installation = request.installation_id,
        owner = %request.owner,
        repo = %request.repo,
        sha = %request.sha,
    ))]
    pub async fn execute(&self, request: &CheckRequest) -> Result<CheckResult, CheckExecutionError> {
        let owner = request.owner();
        let repo = request.repo();
        let check_name = request
            .name
            .as_deref()
            .unwrap_or(&self.settings.check_name);

        let mut progress = Progress {
            installation_id: request.installation_id,
            stage: Stage::Authenticating,
            counts: None,
        };

        let api = self
            .tokens
            .client(request.installation_id)
            .await
            .map_err(|e| progress.fail(e))?;

        progress.stage = Stage::FilteringDiff;
        let (diagnostics, outside_diff) = match request.pr_number {
            Some(pr) if !request.outside_diff => {
                let files = api
                    .pull_request_files(&owner, &repo, pr)
                    .await
                    .map_err(|e| progress.fail(e))?;
                let (inside, outside): (Vec<&Diagnostic>, Vec<&Diagnostic>) = request
                    .diagnostics
                    .iter()
                    .partition(|d| files.contains(d.path.trim_start_matches("./")));
                debug!(
                    pr,
                    outside = outside.len(),
                    "Filtered diagnostics outside of the diff"
                );
                let inside: Vec<Diagnostic> = inside.into_iter().cloned().collect();
                (Cow::Owned(inside), outside.len())
            }
            _ => (Cow::Borrowed(request.diagnostics.as_slice()), 0),
        };

        let batches = batch(
            &diagnostics,
            self.settings.max_batch_size,
            self.settings.warnings_block,
        );
        // Diagnostics outside the diff are not annotated, but still count
        // towards the conclusion.
        let conclusion = conclude(&request.diagnostics, self.settings.warnings_block);
        let reported = batches.reported;
        let filtered = batches.filtered + outside_diff;
        progress.counts = Some((reported, filtered));

        progress.stage = Stage::CreatingCheckRun;
        let existing = api
            .find_check_run(&owner, &repo, check_name, &request.sha)
            .await
            .map_err(|e| progress.fail(e))?;
        let check_run = match existing {
            Some(run) => {
                debug!(id = %run.id, "Reusing existing check run");
                api.restart_check_run(&owner, &repo, run.id).await
            }
            None => {
                api.create_check_run(&owner, &repo, check_name, &request.sha)
                    .await
            }
        }
        .map_err(|e| progress.fail(e))?;

        let summary = summary(reported, filtered);
        let total = batches.len();
        for (index, annotations) in batches.batches.iter().enumerate() {
            progress.stage = Stage::SubmittingAnnotations {
                batch: index + 1,
                of: total,
            };
            api.annotate_check_run(
                &owner,
                &repo,
                check_run.id,
                CheckRunOutput {
                    title: OUTPUT_TITLE,
                    summary: &summary,
                    annotations: Some(annotations.as_slice()),
                },
            )
            .await
            .map_err(|e| progress.fail(e))?;
        }

        progress.stage = Stage::Finalizing;
        let completed = api
            .complete_check_run(
                &owner,
                &repo,
                check_run.id,
                conclusion,
                CheckRunOutput {
                    title: OUTPUT_TITLE,
                    summary: &summary,
                    annotations: None,
                },
            )
            .await
            .map_err(|e| progress.fail(e))?;

        info!(
            conclusion = %conclusion,
            reported,
            filtered,
            "Check run completed"
        );

        Ok(CheckResult {
            conclusion,
            reported_count: reported,
            filtered_count: filtered,
            check_run_url: completed
                .html_url
                .or(check_run.html_url)
                .unwrap_or_default(),
        })
    }
}

fn summary(reported: usize, filtered: usize) -> String {
    let mut summary = match reported {
        0 => "No findings.".to_owned(),
        1 => "1 finding.".to_owned(),
        n => format!("{n} findings."),
    };
    if filtered > 0 {
        summary.push_str(&format!(" {filtered} filtered out."));
    }
    summary
}
