//! Run a check request directly from CI, without going through the server.

use std::path::Path;

use eyre::Context;

use crate::{
    check::{CheckExecutor, CheckRequest, Conclusion},
    config::Config,
};

pub async fn main(config: Config, request_file: &Path) -> eyre::Result<Conclusion> {
    let raw = tokio::fs::read(request_file)
        .await
        .with_context(|| format!("Cannot read {}", request_file.display()))?;
    let request: CheckRequest = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a valid check request", request_file.display()))?;

    let tokens = config.token_provider()?;
    let result = CheckExecutor::new(&tokens, &config.check)
        .execute(&request)
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.conclusion)
}
