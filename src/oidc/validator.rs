//! Token validation: header inspection, key lookup, signature and claims.

use std::time::Duration;

use gateway_core::Claims;
use jsonwebtoken::{Algorithm, TokenData, Validation};

use super::OidcError;
use super::keys::{KeySetDocument, is_supported_algorithm, resolve_signing_key};

/// Verifies bearer tokens against a key-set document.
///
/// Stateless apart from configuration; the caller supplies the key-set bytes
/// fetched for this request so one request never mixes two documents.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    issuers: Vec<String>,
    leeway: u64,
}

impl TokenValidator {
    /// Validator for tokens minted by `issuer`, tolerating `leeway` clock skew.
    #[must_use]
    pub fn new(issuer: &str, leeway: Duration) -> Self {
        let trimmed = issuer.trim_end_matches('/');
        Self {
            // `iss` may be written with or without the trailing slash
            issuers: vec![trimmed.to_string(), format!("{trimmed}/")],
            leeway: leeway.as_secs(),
        }
    }

    /// Verify `token` and return its claims.
    ///
    /// Order: header (unverified) -> algorithm family -> key-set parse ->
    /// key lookup by `kid` -> signature + `exp`/`nbf`/`iss`.
    ///
    /// # Errors
    ///
    /// - [`OidcError::TokenInvalid`] for a malformed token or failed verification
    /// - [`OidcError::UnsupportedAlgorithm`] for anything but RS256/384/512
    /// - [`OidcError::KeySetParse`] when `key_set` is not a JWKS document
    /// - [`OidcError::UnknownKey`] when no key matches (or `kid` is absent)
    /// - [`OidcError::KeyDecode`] when the matching key is unusable
    pub fn validate(&self, token: &str, key_set: &[u8]) -> Result<Claims, OidcError> {
        let header = jsonwebtoken::decode_header(token)?;

        if !is_supported_algorithm(header.alg) {
            return Err(OidcError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let document = KeySetDocument::from_slice(key_set)?;

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| OidcError::UnknownKey("<missing kid>".to_string()))?;
        let key = resolve_signing_key(&document, kid)?;

        let data: TokenData<Claims> = jsonwebtoken::decode(token, &key, &self.validation(header.alg))?;
        Ok(data.claims)
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway;
        // Temporal claims are checked when present, not required
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // Audience is a policy decision
        validation.validate_aud = false;
        validation.set_issuer(self.issuers.as_slice());
        validation
    }
}
