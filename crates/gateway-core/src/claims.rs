//! Typed access to a verified token's claim set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by the typed claim accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The claim is not present in the token.
    #[error("claim '{claim}' is missing")]
    Missing {
        /// Claim name.
        claim: String,
    },

    /// The claim is present but holds a different JSON type.
    #[error("claim '{claim}' is not a {expected}")]
    WrongType {
        /// Claim name.
        claim: String,
        /// Expected JSON type.
        expected: &'static str,
    },
}

/// Claim set of a verified token.
///
/// Lives for the duration of one request only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Wrap a decoded JSON object.
    #[must_use]
    pub fn new(inner: Map<String, Value>) -> Self {
        Self(inner)
    }

    /// Raw claim value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String claim value.
    pub fn get_str(&self, name: &str) -> Result<&str, ClaimError> {
        match self.0.get(name) {
            None => Err(ClaimError::Missing {
                claim: name.to_string(),
            }),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ClaimError::WrongType {
                claim: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// `sub` claim, when present as a string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub").ok()
    }

    /// `repository` claim (CI identity providers put `owner/name` here).
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.get_str("repository").ok()
    }

    /// Number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the claim set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(inner: Map<String, Value>) -> Self {
        Self(inner)
    }
}
