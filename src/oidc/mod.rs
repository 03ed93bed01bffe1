//! OIDC token validation: discovery, key-set caching, RSA signature checks.
//!
//! # Validation flow
//!
//! 1. [`KeySetCache::get`] returns the issuer's JWKS bytes, refreshing them
//!    through [`DiscoveryResolver`] when older than the freshness window.
//! 2. [`TokenValidator::validate`] reads the token header (unverified), rejects
//!    non-RSA algorithms, parses the key set, resolves the signing key by
//!    `kid` ([`keys::resolve_signing_key`]) and verifies signature, `exp`, `nbf`
//!    and `iss`.
//! 3. The resulting [`Claims`](gateway_core::Claims) go to the policy engine.
//!
//! Every [`OidcError`] is answered with the same opaque `401`; the variant is
//! only logged.

pub mod cache;
pub mod discovery;
pub mod keys;
pub mod validator;

use std::time::Duration;

pub use cache::{CachedKeySet, KeySetCache};
pub use discovery::DiscoveryResolver;
pub use keys::{KeyRecord, KeySetDocument, RsaComponents};
pub use validator::TokenValidator;

/// Error variants for the validation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// The discovery document could not be fetched or lacks `jwks_uri`.
    #[error("OIDC discovery failed for {issuer}: {reason}")]
    Discovery {
        /// Issuer base URL.
        issuer: String,
        /// What went wrong.
        reason: String,
    },

    /// Discovery or the JWKS download failed while refreshing the cache.
    #[error("JWKS fetch error: {0}")]
    KeySetFetch(String),

    /// The cached key-set bytes are not a JWKS document.
    #[error("JWKS parse error: {0}")]
    KeySetParse(#[source] serde_json::Error),

    /// No key in the key set carries the token's `kid`.
    #[error("Unknown key ID: {0}")]
    UnknownKey(String),

    /// The matching key record could not be turned into an RSA public key.
    #[error("Key '{kid}' could not be decoded: {reason}")]
    KeyDecode {
        /// Key identifier.
        kid: String,
        /// What went wrong.
        reason: String,
    },

    /// The token is signed with something other than RSA PKCS#1 v1.5.
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Malformed token, bad signature, or failed temporal/issuer claim.
    #[error("JWT verification failed: {0}")]
    TokenInvalid(#[from] jsonwebtoken::errors::Error),
}

impl OidcError {
    /// Short stable code for logs and audit records.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery { .. } => "discovery",
            Self::KeySetFetch(_) => "key_set_fetch",
            Self::KeySetParse(_) => "key_set_parse",
            Self::UnknownKey(_) => "unknown_key",
            Self::KeyDecode { .. } => "key_decode",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::TokenInvalid(_) => "token_invalid",
        }
    }
}

/// Build the HTTP client used for discovery and JWKS fetches.
///
/// The timeout bounds each request end to end so a slow issuer cannot stall
/// validation indefinitely.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("actions-oidc-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
}
