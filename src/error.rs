//! Error types for the OIDC gateway

use std::io;

use thiserror::Error;

use crate::oidc::OidcError;

/// Result type alias for the OIDC gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway process-level errors.
///
/// Per-request failures live in [`crate::gateway::GatewayError`]; these are
/// the errors that stop the process or a subcommand.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// OIDC error outside a request (the `check-config` issuer probe)
    #[error("OIDC error: {0}")]
    Oidc(#[from] OidcError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
