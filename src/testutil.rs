//! Shared fixtures for tests.

use std::sync::OnceLock;

use jwt_simple::algorithms::RS256KeyPair;

use crate::github::api::AppCredential;

pub const APP_ID: u64 = 1234;

/// Generating RSA keys is slow, so every test shares the same one.
pub fn private_key_pem() -> &'static str {
    static PEM: OnceLock<String> = OnceLock::new();
    PEM.get_or_init(|| {
        RS256KeyPair::generate(2048)
            .and_then(|key| key.to_pem())
            .expect("RSA key generation failed")
    })
}

pub fn key_pair() -> RS256KeyPair {
    RS256KeyPair::from_pem(private_key_pem()).expect("test key should parse")
}

pub fn credential() -> AppCredential {
    AppCredential::from_pem(private_key_pem(), APP_ID).expect("test key should parse")
}
