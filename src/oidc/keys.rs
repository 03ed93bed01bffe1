//! Signing key resolution: JWKS records to RSA public keys.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};

use super::OidcError;

/// Token algorithms the gateway verifies (RSA PKCS#1 v1.5).
pub const SUPPORTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// True for the RSA algorithms in [`SUPPORTED_ALGORITHMS`].
#[must_use]
pub fn is_supported_algorithm(alg: Algorithm) -> bool {
    SUPPORTED_ALGORITHMS.contains(&alg)
}

/// One entry of a JWKS document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key type (`RSA`)
    #[serde(default)]
    pub kty: String,
    /// Key identifier
    #[serde(default)]
    pub kid: String,
    /// Intended algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Intended use (`sig`)
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url without padding
    #[serde(default)]
    pub n: String,
    /// RSA exponent, base64url without padding
    #[serde(default)]
    pub e: String,
    /// Certificate chain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x5c: Vec<String>,
    /// Certificate thumbprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,
}

/// A parsed JWKS document. Key order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySetDocument {
    /// Keys in document order
    #[serde(default)]
    pub keys: Vec<KeyRecord>,
}

impl KeySetDocument {
    /// Parse raw JWKS bytes.
    ///
    /// # Errors
    ///
    /// [`OidcError::KeySetParse`] if the bytes are not a JWKS JSON object.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OidcError> {
        serde_json::from_slice(bytes).map_err(OidcError::KeySetParse)
    }

    /// First record with the given `kid`.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// RSA public key components as unsigned big-endian integers.
///
/// Leading zero octets are stripped so equal integers compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaComponents {
    /// Modulus `n`
    pub modulus: Vec<u8>,
    /// Public exponent `e`
    pub exponent: Vec<u8>,
}

impl RsaComponents {
    /// Decode `n` and `e` of a key record.
    ///
    /// # Errors
    ///
    /// [`OidcError::KeyDecode`] for invalid base64url, a zero value, or an
    /// exponent wider than 64 bits.
    pub fn from_record(record: &KeyRecord) -> Result<Self, OidcError> {
        let fail = |reason: String| OidcError::KeyDecode {
            kid: record.kid.clone(),
            reason,
        };

        let modulus = decode_component(&record.n).map_err(|r| fail(format!("modulus: {r}")))?;
        let exponent = decode_component(&record.e).map_err(|r| fail(format!("exponent: {r}")))?;
        if exponent.len() > 8 {
            return Err(fail(format!("exponent is {} bytes wide", exponent.len())));
        }

        Ok(Self { modulus, exponent })
    }

    /// Exponent as an integer (fits by construction).
    #[must_use]
    pub fn exponent_value(&self) -> u64 {
        self.exponent
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn modulus_bits(&self) -> usize {
        match self.modulus.first() {
            Some(first) => self.modulus.len() * 8 - first.leading_zeros() as usize,
            None => 0,
        }
    }

    /// Public key usable for signature verification.
    #[must_use]
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }
}

/// Decode one base64url (unpadded) unsigned integer into its big-endian
/// magnitude.
///
/// # Errors
///
/// Returns a description when the input is not base64url or encodes zero.
pub fn decode_component(encoded: &str) -> Result<Vec<u8>, String> {
    let raw = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| format!("invalid base64url: {e}"))?;

    let first_nonzero = raw.iter().position(|b| *b != 0).ok_or("value is zero or empty")?;
    Ok(raw[first_nonzero..].to_vec())
}

/// Locate the record for `kid` and reconstruct its RSA public key.
///
/// # Errors
///
/// [`OidcError::UnknownKey`] when no record matches, [`OidcError::KeyDecode`]
/// when the record is not an RSA key or its components do not decode.
pub fn resolve_signing_key(document: &KeySetDocument, kid: &str) -> Result<DecodingKey, OidcError> {
    let record = document
        .find(kid)
        .ok_or_else(|| OidcError::UnknownKey(kid.to_string()))?;

    if record.kty != "RSA" {
        return Err(OidcError::KeyDecode {
            kid: kid.to_string(),
            reason: format!("key type '{}' is not RSA", record.kty),
        });
    }

    Ok(RsaComponents::from_record(record)?.decoding_key())
}
