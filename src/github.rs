use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use eyre::Context;
use tracing::{debug, info, warn};

use crate::{
    check::{CheckExecutionError, CheckExecutor, CheckRequest, CheckResult, CheckSettings},
    config::Config,
};

use self::api::{
    hook::{HookPayload, InstallationAction, WebhookVerifier},
    InstallationTokenProvider,
};

pub mod api;

/// Check requests from large CI jobs and GitHub webhook payloads (up to
/// 25 MB) both fit under this.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<InstallationTokenProvider>,
    pub webhook: Arc<WebhookVerifier>,
    pub settings: Arc<CheckSettings>,
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(
        tokens: InstallationTokenProvider,
        webhook: WebhookVerifier,
        settings: CheckSettings,
        max_request_bytes: usize,
    ) -> Self {
        AppState {
            tokens: Arc::new(tokens),
            webhook: Arc::new(webhook),
            settings: Arc::new(settings),
            max_request_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_request_bytes);
    Router::new()
        .route("/", get(index))
        .route("/check", post(check))
        .route("/webhook", post(github_hook))
        .layer(body_limit)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn main(config: Config) -> eyre::Result<()> {
    let Some(webhook_secret) = config.webhook_secret.clone() else {
        eyre::bail!("GITHUB_WEBHOOK_SECRET is not set");
    };
    let tokens = config.token_provider()?;
    info!(app_id = config.app_id, "Loaded GitHub App credentials");

    let state = AppState::new(
        tokens,
        WebhookVerifier::new(webhook_secret),
        config.check.clone(),
        config.max_request_bytes,
    );

    info!("Starting…");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Cannot listen on {}", config.listen_addr))?;
    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}

async fn index() -> &'static str {
    "doghouse is running"
}

async fn check(State(state): State<AppState>, body: Bytes) -> Result<Json<CheckResult>, WebError> {
    let request: CheckRequest = serde_json::from_slice(&body).map_err(WebError::Decode)?;
    let executor = CheckExecutor::new(&state.tokens, &state.settings);
    let result = executor.execute(&request).await?;
    Ok(Json(result))
}

async fn github_hook(
    State(state): State<AppState>,
    payload: HookPayload,
) -> Result<&'static str, WebError> {
    if let Some(installation) = payload.installation() {
        debug!(installation = installation.id, "Verified webhook");
    }

    match payload {
        HookPayload::Ping(ping) => {
            info!(zen = ping.zen.as_deref().unwrap_or_default(), "Ping from GitHub");
            Ok("pong")
        }
        HookPayload::Installation(event) => {
            info!(
                installation = event.installation.id,
                action = ?event.action,
                "Installation event"
            );
            if matches!(
                event.action,
                InstallationAction::Deleted | InstallationAction::Suspend
            ) {
                state.tokens.forget(event.installation.id);
            }
            Ok("ok")
        }
        HookPayload::CheckSuite(event) => {
            info!(
                repository = %event.repository.full_name,
                head_sha = %event.check_suite.head_sha,
                action = ?event.action,
                "Check suite event"
            );
            Ok("ok")
        }
        HookPayload::CheckRun(event) => {
            info!(
                repository = %event.repository.full_name,
                check_run = %event.check_run.id,
                name = %event.check_run.name,
                action = ?event.action,
                "Check run event"
            );
            Ok("ok")
        }
    }
}

#[derive(Debug)]
enum WebError {
    Decode(serde_json::Error),
    Check(CheckExecutionError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> axum::response::Response {
        let message = match self {
            WebError::Decode(e) => format!("failed to decode request: {}", e),
            WebError::Check(e) => {
                warn!("{}", e);
                e.to_string()
            }
        };
        Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Body::from(message))
            .unwrap_or_else(|_| StatusCode::BAD_REQUEST.into_response())
    }
}

impl From<CheckExecutionError> for WebError {
    fn from(value: CheckExecutionError) -> Self {
        WebError::Check(value)
    }
}
