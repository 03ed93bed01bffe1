//! Gateway server implementation

pub mod audit;
mod handler;
pub mod passthrough;
mod server;
pub mod tunnel;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gateway_core::DenyCause;

use crate::oidc::OidcError;

pub use handler::{AppState, create_router, extract_token};
pub use server::Gateway;
pub use tunnel::{RelayStats, TunnelError, TunnelRelay};

/// Per-request failure, terminal for the request.
///
/// The response carries only the canonical reason phrase; the detail is
/// logged server-side.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Neither a CONNECT to `host:port` nor the passthrough path.
    #[error("unsupported request shape")]
    NotFound,

    /// No identity token header.
    #[error("missing identity token")]
    MissingToken,

    /// Token failed validation.
    #[error(transparent)]
    Validation(#[from] OidcError),

    /// Validation did not finish within the request timeout.
    #[error("token validation timed out")]
    ValidationTimeout,

    /// A policy rule rejected the claims.
    #[error("claim '{claim}' rejected: {cause:?}")]
    ClaimMismatch {
        /// Claim that failed.
        claim: String,
        /// How it failed.
        cause: DenyCause,
    },

    /// Tunnel establishment failed.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// Passthrough upstream request failed.
    #[error("passthrough upstream failed: {0}")]
    Upstream(#[source] reqwest::Error),

    /// Response construction failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status sent to the caller.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MissingToken
            | Self::Validation(_)
            | Self::ValidationTimeout
            | Self::ClaimMismatch { .. } => StatusCode::UNAUTHORIZED,
            Self::Tunnel(e) => e.status(),
            Self::Upstream(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short stable code for logs and audit records.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::MissingToken => "missing_token",
            Self::Validation(e) => e.code(),
            Self::ValidationTimeout => "validation_timeout",
            Self::ClaimMismatch { .. } => "claim_mismatch",
            Self::Tunnel(e) => e.code(),
            Self::Upstream(_) => "upstream",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");
        (status, format!("{reason}\n")).into_response()
    }
}
