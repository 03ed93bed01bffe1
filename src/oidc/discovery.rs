//! OIDC discovery: locate the issuer's JWKS endpoint.

use axum::http::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use super::OidcError;

/// Fields of the discovery document the gateway needs.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// Fetches `<issuer>/.well-known/openid-configuration` and extracts `jwks_uri`.
///
/// No retries: a failure surfaces to the current request and the next request
/// tries again.
#[derive(Debug, Clone)]
pub struct DiscoveryResolver {
    http: reqwest::Client,
}

impl DiscoveryResolver {
    /// Create a resolver on top of a (timeout-bounded) client.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Resolve the JWKS URL for `issuer`.
    ///
    /// # Errors
    ///
    /// [`OidcError::Discovery`] if the request fails, returns a non-success
    /// status, or the body is not JSON with a string `jwks_uri`.
    pub async fn resolve(&self, issuer: &str) -> Result<String, OidcError> {
        let url = discovery_url(issuer);
        debug!(issuer = %issuer, "Fetching OIDC discovery document from {url}");

        let fail = |reason: String| OidcError::Discovery {
            issuer: issuer.to_string(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fail(format!("reading body failed: {e}")))?;

        jwks_uri_from(&body).map_err(|e| fail(format!("invalid discovery document: {e}")))
    }
}

/// Discovery URL for an issuer base URL (trailing `/` tolerated).
#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    let base = issuer.trim_end_matches('/');
    format!("{base}/.well-known/openid-configuration")
}

fn jwks_uri_from(body: &[u8]) -> Result<String, serde_json::Error> {
    serde_json::from_slice::<DiscoveryDocument>(body).map(|doc| doc.jwks_uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_appends_well_known() {
        assert_eq!(
            discovery_url("https://token.actions.githubusercontent.com"),
            "https://token.actions.githubusercontent.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn discovery_url_handles_trailing_slash() {
        assert_eq!(
            discovery_url("https://issuer.example/tenant/"),
            "https://issuer.example/tenant/.well-known/openid-configuration"
        );
    }

    #[test]
    fn extracts_jwks_uri_and_ignores_other_fields() {
        let body = br#"{
            "issuer": "https://token.actions.githubusercontent.com",
            "jwks_uri": "https://token.actions.githubusercontent.com/.well-known/jwks",
            "claims_supported": ["sub", "repository"]
        }"#;
        assert_eq!(
            jwks_uri_from(body).unwrap(),
            "https://token.actions.githubusercontent.com/.well-known/jwks"
        );
    }

    #[test]
    fn rejects_missing_or_non_string_jwks_uri() {
        assert!(jwks_uri_from(br#"{"issuer":"x"}"#).is_err());
        assert!(jwks_uri_from(br#"{"jwks_uri": 42}"#).is_err());
        assert!(jwks_uri_from(b"<html>").is_err());
    }
}
