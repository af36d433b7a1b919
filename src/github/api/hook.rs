use std::fmt::Display;

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use hmac::{digest::KeyInit, Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::github::AppState;

use super::{
    check::{CheckRun, CheckRunAction, CheckSuite, CheckSuiteAction},
    Installation, Repository,
};

/// Checks that webhook payloads were signed by GitHub with the shared secret.
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        WebhookVerifier {
            secret: secret.into(),
        }
    }

    /// Whether `signature_header` (`sha256=<hex>`, or the legacy
    /// `sha1=<hex>`) is the HMAC of `raw_body`.
    ///
    /// The digests are compared in constant time.
    pub fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> bool {
        let Some(signature_header) = signature_header else {
            debug!("Signature header is missing");
            return false;
        };
        if self.secret.is_empty() {
            warn!("Webhook secret is empty, refusing every hook.");
            return false;
        }

        let Some((method, their_digest)) = signature_header.split_once('=') else {
            debug!("Malformed signature header");
            return false;
        };
        // GitHub provides their hash as a hexadecimal string.
        let Ok(their_digest) = hex::decode(their_digest) else {
            debug!("Signature is not hexadecimal");
            return false;
        };

        match method {
            "sha256" => verify_mac::<Hmac<Sha256>>(&self.secret, raw_body, &their_digest),
            "sha1" => verify_mac::<Hmac<Sha1>>(&self.secret, raw_body, &their_digest),
            _ => {
                warn!(
                    "A hook with a {} signature was received, and rejected",
                    method
                );
                false
            }
        }
    }
}

fn verify_mac<M: Mac + KeyInit>(secret: &[u8], raw_body: &[u8], their_digest: &[u8]) -> bool {
    let Ok(mut mac) = <M as KeyInit>::new_from_slice(secret) else {
        warn!("Webhook secret is invalid.");
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(their_digest).is_ok()
}

#[derive(Debug)]
pub enum WebhookVerificationFailure {
    MissingSignature,
    InvalidSignature,
}

impl std::error::Error for WebhookVerificationFailure {}

impl Display for WebhookVerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl WebhookVerificationFailure {
    fn message(&self) -> &'static str {
        match self {
            WebhookVerificationFailure::MissingSignature => {
                "Neither X-Hub-Signature-256 nor X-Hub-Signature is present"
            }
            WebhookVerificationFailure::InvalidSignature => "Invalid hook signature",
        }
    }
}

impl From<WebhookVerificationFailure> for (StatusCode, &'static str) {
    fn from(value: WebhookVerificationFailure) -> Self {
        (StatusCode::UNAUTHORIZED, value.message())
    }
}

pub enum HookPayload {
    Ping(PingPayload),
    Installation(InstallationPayload),
    CheckSuite(CheckSuitePayload),
    CheckRun(CheckRunPayload),
}

impl HookPayload {
    pub fn installation(&self) -> Option<&Installation> {
        match self {
            HookPayload::Ping(_) => None,
            HookPayload::CheckSuite(cs) => Some(&cs.installation),
            HookPayload::Installation(i) => Some(&i.installation),
            HookPayload::CheckRun(cr) => Some(&cr.installation),
        }
    }
}

/// Request extractor that reads and check a GitHub hook payload.
///
/// Nothing in the payload is looked at before its signature is verified.
#[async_trait::async_trait]
impl FromRequest<AppState> for HookPayload {
    type Rejection = (StatusCode, &'static str);

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        debug!("Received a webhook event…");
        let headers = req.headers();
        let event_type = headers
            .get("X-GitHub-Event")
            .map(|v| v.as_bytes().to_owned());
        let signature = headers
            .get("X-Hub-Signature-256")
            .or_else(|| headers.get("X-Hub-Signature"))
            .map(|v| v.to_str().unwrap_or_default().to_owned());

        let Ok(raw_payload) = Bytes::from_request(req, state).await else {
            return Err((StatusCode::BAD_REQUEST, "Cannot read request body."));
        };

        if signature.is_none() {
            return Err(WebhookVerificationFailure::MissingSignature.into());
        }
        if !state.webhook.verify(&raw_payload, signature.as_deref()) {
            debug!("Invalid hook signature");
            return Err(WebhookVerificationFailure::InvalidSignature.into());
        }
        debug!("Event type is {:?}", event_type);

        macro_rules! try_deser {
            ($variant:ident, $json:expr) => {
                match serde_json::from_slice($json) {
                    Ok(x) => Ok(HookPayload::$variant(x)),
                    Err(_) => return Err((StatusCode::BAD_REQUEST, "Invalid JSON data")),
                }
            };
        }

        match event_type.as_deref() {
            Some(b"ping") => try_deser!(Ping, &raw_payload),
            Some(b"installation") => try_deser!(Installation, &raw_payload),
            Some(b"check_suite") => try_deser!(CheckSuite, &raw_payload),
            Some(b"check_run") => try_deser!(CheckRun, &raw_payload),
            Some(x) => {
                debug!(
                    "Unknown event type: {}",
                    std::str::from_utf8(x).unwrap_or("[UTF-8 error]")
                );
                Err((StatusCode::BAD_REQUEST, "Unknown event type"))
            }
            None => Err((StatusCode::BAD_REQUEST, "Unspecified event type")),
        }
    }
}

#[derive(Deserialize)]
pub struct PingPayload {
    #[serde(default)]
    pub zen: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationAction {
    Created,
    Deleted,
    Suspend,
    Unsuspend,
    NewPermissionsAccepted,
}

#[derive(Deserialize)]
pub struct InstallationPayload {
    pub action: InstallationAction,
    pub installation: Installation,
}

#[derive(Deserialize)]
pub struct CheckSuitePayload {
    pub action: CheckSuiteAction,
    pub installation: Installation,
    pub repository: Repository,
    pub check_suite: CheckSuite,
}

#[derive(Deserialize)]
pub struct CheckRunPayload {
    pub installation: Installation,
    pub action: CheckRunAction,
    pub repository: Repository,
    pub check_run: CheckRun,
}

#[cfg(test)]
pub fn sign_sha1(secret: &[u8], body: &[u8]) -> String {
    let mut mac = <Hmac<Sha1> as KeyInit>::new_from_slice(secret).unwrap();
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
pub fn sign_sha256(secret: &[u8], body: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as KeyInit>::new_from_slice(secret).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"action":"opened"}"#;

    #[test]
    fn valid_signature() {
        let verifier = WebhookVerifier::new("s");
        assert!(verifier.verify(BODY, Some(&sign_sha256(b"s", BODY))));
    }

    #[test]
    fn legacy_sha1_signature() {
        let header = sign_sha1(b"s", BODY);
        let verifier = WebhookVerifier::new("s");
        assert!(verifier.verify(BODY, Some(&header)));
    }

    #[test]
    fn tampered_body() {
        let verifier = WebhookVerifier::new("s");
        let signature = sign_sha256(b"s", BODY);
        assert!(!verifier.verify(br#"{"action":"closed"}"#, Some(&signature)));

        for i in 0..BODY.len() {
            let mut body = BODY.to_vec();
            body[i] ^= 0x01;
            assert!(!verifier.verify(&body, Some(&signature)), "byte {i}");
        }
    }

    #[test]
    fn tampered_signature() {
        let verifier = WebhookVerifier::new("s");
        let signature = sign_sha256(b"s", BODY);
        let digest_start = "sha256=".len();

        for i in digest_start..signature.len() {
            let mut tampered = signature.clone().into_bytes();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            assert!(!verifier.verify(BODY, Some(&tampered)), "char {i}");
        }

        assert!(!verifier.verify(BODY, Some(&signature[..signature.len() - 2])));
        assert!(!verifier.verify(BODY, Some(&signature.replace("sha256", "md5"))));
        assert!(!verifier.verify(BODY, Some("sha256=not-hex")));
        assert!(!verifier.verify(BODY, Some("garbage")));
    }

    #[test]
    fn missing_signature() {
        let verifier = WebhookVerifier::new("s");
        assert!(!verifier.verify(BODY, None));
    }

    #[test]
    fn empty_secret_never_verifies() {
        let verifier = WebhookVerifier::new(Vec::<u8>::new());
        assert!(!verifier.verify(BODY, Some(&sign_sha256(b"", BODY))));
    }

    #[test]
    fn wrong_secret() {
        let verifier = WebhookVerifier::new("other");
        assert!(!verifier.verify(BODY, Some(&sign_sha256(b"s", BODY))));
    }
}
