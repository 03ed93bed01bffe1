//! OIDC Gateway Library
//!
//! Authorization gateway that opens a TCP tunnel to an arbitrary destination
//! only for callers presenting a valid, policy-satisfying identity token from
//! a CI/CD OpenID Connect provider.
//!
//! # Request pipeline
//!
//! ```text
//! Receive -> ExtractToken -> Validate -> Authorize(repository)
//!         -> Authorize(audience) -> Dispatch (CONNECT tunnel | passthrough)
//! ```
//!
//! - **Validation**: discovery document -> cached JWKS -> RSA signature and
//!   temporal claims ([`oidc`])
//! - **Authorization**: ordered exact-match claim rules ([`gateway_core`])
//! - **Tunnel**: dial with a bounded timeout, answer `200`, take over the
//!   connection and relay bytes both ways ([`gateway::tunnel`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oidc;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
        _ => {
            subscriber
                .with(fmt::layer())
                .try_init()
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
    }

    Ok(())
}
