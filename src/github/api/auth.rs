//! Authentication as a GitHub App.
//!
//! The App proves its identity with a short-lived JWT signed with its private
//! key ([`AppCredential`]), and trades it for an installation token that can
//! act on the repositories of one installation ([`InstallationTokenProvider`]).

use std::{collections::HashMap, fmt::Display};

use chrono::{DateTime, TimeDelta, Utc};
use jwt_simple::{
    algorithms::{RS256KeyPair, RSAKeyPairLike},
    claims::Claims,
    reexports::coarsetime::Duration,
};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Endpoint, GitHub, JsonExt};

/// GitHub clocks may be slightly ahead of ours.
const CLOCK_SKEW_SECS: i64 = 60;
/// GitHub rejects App JWTs that live longer than 10 minutes.
const ASSERTION_LIFETIME_SECS: i64 = 600;
/// Cached installation tokens are not handed out when they expire sooner
/// than this.
const SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Debug)]
pub enum CredentialError {
    InvalidKey(String),
    Signing(String),
}

impl std::error::Error for CredentialError {}

impl Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialError::InvalidKey(e) => {
                write!(f, "The App private key cannot be parsed as PEM: {}", e)
            }
            CredentialError::Signing(e) => write!(f, "Couldn't sign JWT claims: {}", e),
        }
    }
}

/// The private key and identifier of the GitHub App.
pub struct AppCredential {
    key: RS256KeyPair,
    app_id: u64,
}

impl std::fmt::Debug for AppCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredential")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl AppCredential {
    pub fn from_pem(pem: &str, app_id: u64) -> Result<Self, CredentialError> {
        let key = RS256KeyPair::from_pem(pem)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))?;
        Ok(AppCredential { key, app_id })
    }

    /// Sign a JWT that identifies the App, valid from a minute before `now`
    /// to ten minutes after it.
    pub fn sign(&self, now: DateTime<Utc>) -> Result<SignedAssertion, CredentialError> {
        let issued_at = now - TimeDelta::seconds(CLOCK_SKEW_SECS);
        let expires_at = now + TimeDelta::seconds(ASSERTION_LIFETIME_SECS);

        let mut claims = Claims::create(Duration::from_secs(ASSERTION_LIFETIME_SECS as u64))
            .with_issuer(self.app_id.to_string());
        claims.issued_at = Some(unix_timestamp(issued_at)?);
        claims.invalid_before = Some(unix_timestamp(issued_at)?);
        claims.expires_at = Some(unix_timestamp(expires_at)?);

        let token = self
            .key
            .sign(claims)
            .map_err(|e| CredentialError::Signing(e.to_string()))?;

        Ok(SignedAssertion {
            token,
            issued_at,
            expires_at,
        })
    }
}

fn unix_timestamp(time: DateTime<Utc>) -> Result<Duration, CredentialError> {
    u64::try_from(time.timestamp())
        .map(Duration::from_secs)
        .map_err(|_| CredentialError::Signing(format!("{time} is before the UNIX epoch")))
}

/// A JWT proving the identity of the App.
pub struct SignedAssertion {
    token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Display for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.token.fmt(f)
    }
}

/// A token scoped to the repositories of one installation of the App.
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    pub expires_at: DateTime<Utc>,
    pub installation_id: u64,
}

impl InstallationToken {
    /// Whether this token can still be handed out at `now`.
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - TimeDelta::seconds(SAFETY_MARGIN_SECS) > now
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }
}

impl Display for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("installation_id", &self.installation_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct TokenExchangeError {
    pub installation_id: u64,
    pub reason: ExchangeFailure,
}

#[derive(Debug)]
pub enum ExchangeFailure {
    Credential(CredentialError),
    Network(reqwest::Error),
    Status(StatusCode, String),
    Decode(String),
    AlreadyExpired(DateTime<Utc>),
}

impl std::error::Error for TokenExchangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.reason {
            ExchangeFailure::Credential(e) => Some(e),
            ExchangeFailure::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for TokenExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to get a token for installation {}: ",
            self.installation_id
        )?;
        match &self.reason {
            ExchangeFailure::Credential(e) => e.fmt(f),
            ExchangeFailure::Network(e) => write!(f, "network error: {}", e),
            ExchangeFailure::Status(status, body) => {
                write!(f, "GitHub answered {}: {}", status, body)
            }
            ExchangeFailure::Decode(e) => write!(f, "cannot decode the response: {}", e),
            ExchangeFailure::AlreadyExpired(at) => write!(f, "token expired at {}", at),
        }
    }
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

impl GitHub<SignedAssertion> {
    #[tracing::instrument(skip(self))]
    async fn create_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, ExchangeFailure> {
        let response = self
            .post(format!("app/installations/{installation_id}/access_tokens"))
            .send()
            .await
            .map_err(ExchangeFailure::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeFailure::Status(status, body));
        }

        let parsed: AccessTokenResponse = response
            .parse_json()
            .await
            .map_err(|e| ExchangeFailure::Decode(e.to_string()))?;

        Ok(InstallationToken {
            token: parsed.token,
            expires_at: parsed.expires_at,
            installation_id,
        })
    }
}

/// Hands out installation tokens, exchanging a new one only when the cached
/// token is about to expire.
pub struct InstallationTokenProvider {
    credential: AppCredential,
    endpoint: Endpoint,
    cache: Mutex<HashMap<u64, InstallationToken>>,
}

impl InstallationTokenProvider {
    pub fn new(credential: AppCredential, endpoint: Endpoint) -> Self {
        InstallationTokenProvider {
            credential,
            endpoint,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, TokenExchangeError> {
        self.get_token_at(installation_id, Utc::now()).await
    }

    /// A client authenticated as the given installation.
    pub async fn client(
        &self,
        installation_id: u64,
    ) -> Result<GitHub<InstallationToken>, TokenExchangeError> {
        let token = self.get_token(installation_id).await?;
        Ok(self.endpoint.client(token))
    }

    /// Drop the cached token of an installation, if any.
    pub fn forget(&self, installation_id: u64) {
        if self.cache.lock().remove(&installation_id).is_some() {
            info!(installation_id, "Forgot cached installation token");
        }
    }

    async fn get_token_at(
        &self,
        installation_id: u64,
        now: DateTime<Utc>,
    ) -> Result<InstallationToken, TokenExchangeError> {
        // The lock must not be held while talking to GitHub.
        if let Some(token) = self.cached(installation_id, now) {
            debug!(installation_id, "Using cached installation token");
            return Ok(token);
        }

        let fail = |reason| TokenExchangeError {
            installation_id,
            reason,
        };

        let assertion = self
            .credential
            .sign(now)
            .map_err(|e| fail(ExchangeFailure::Credential(e)))?;
        debug!(
            app_id = self.credential.app_id,
            expires_at = %assertion.expires_at,
            "Signed App JWT"
        );
        let token = self
            .endpoint
            .client(assertion)
            .create_installation_token(installation_id)
            .await
            .map_err(fail)?;

        if token.expires_at <= now {
            return Err(fail(ExchangeFailure::AlreadyExpired(token.expires_at)));
        }

        info!(
            installation_id,
            expires_at = %token.expires_at,
            "Exchanged a new installation token"
        );
        self.cache.lock().insert(installation_id, token.clone());
        Ok(token)
    }

    fn cached(&self, installation_id: u64, now: DateTime<Utc>) -> Option<InstallationToken> {
        self.cache
            .lock()
            .get(&installation_id)
            .filter(|token| token.is_fresh(now))
            .cloned()
    }
}
