use std::collections::HashSet;

use reqwest::StatusCode;
use serde::Deserialize;

use super::{ApiError, ApiResult, GitHub, InstallationToken, JsonExt, OwnerId, RepoId};

const FILES_PER_PAGE: usize = 100;
/// GitHub stops listing files after this many.
const MAX_FILES: usize = 3000;

#[derive(Deserialize)]
struct PullRequestFile {
    filename: String,
}

impl GitHub<InstallationToken> {
    /// Paths of all the files changed by a pull request.
    #[tracing::instrument(skip(self))]
    pub async fn pull_request_files(
        &self,
        owner: &OwnerId,
        repo: &RepoId,
        pr: u64,
    ) -> ApiResult<HashSet<String>> {
        let mut files = HashSet::new();

        for page in 1..=MAX_FILES / FILES_PER_PAGE {
            let response = self
                .get(format!("repos/{owner}/{repo}/pulls/{pr}/files"))
                .query(&[("per_page", FILES_PER_PAGE), ("page", page)])
                .send()
                .await?;

            if response.status() != StatusCode::OK {
                return Err(ApiError::UnexpectedResponse(response.text().await?));
            }

            let batch: Vec<PullRequestFile> = response.parse_json().await?;
            let last_page = batch.len() < FILES_PER_PAGE;
            files.extend(batch.into_iter().map(|f| f.filename));
            if last_page {
                break;
            }
        }

        Ok(files)
    }
}
