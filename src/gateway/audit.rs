//! Audit logging for authorization decisions and tunnel lifecycle.
//!
//! Every event is emitted via `tracing::info!` with the serialized event in
//! an `audit` field, making the trail queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `request.denied` | Token missing/invalid or a claim rule failed |
//! | `tunnel.opened` | Dial succeeded and the caller's connection was taken over |
//! | `tunnel.closed` | Both relay directions finished |
//! | `passthrough.served` | The passthrough upstream answered |

use std::net::IpAddr;

use gateway_core::Claims;
use serde::Serialize;

use super::tunnel::RelayStats;

/// Who a request was authorized as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// `repository` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// `sub` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Identity {
    /// Pick the identifying claims out of a verified claim set.
    #[must_use]
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            repository: claims.repository().map(str::to_string),
            subject: claims.subject().map(str::to_string),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"tunnel.opened"`).
    pub event: &'static str,
    /// Identity, once the token has been verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Tunnel destination (`host:port`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Caller address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Reason code for denials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Bytes relayed caller -> destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_to_target: Option<u64>,
    /// Bytes relayed destination -> caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_to_client: Option<u64>,
    /// Upstream status for passthrough.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            identity: None,
            target: None,
            client_ip: None,
            reason: None,
            bytes_to_target: None,
            bytes_to_client: None,
            status: None,
        }
    }

    /// Construct a `request.denied` event.
    #[must_use]
    pub fn denied(reason: impl Into<String>, target: Option<&str>, client_ip: Option<IpAddr>) -> Self {
        Self {
            reason: Some(reason.into()),
            target: target.map(str::to_string),
            client_ip,
            ..Self::new("request.denied")
        }
    }

    /// Construct a `tunnel.opened` event.
    #[must_use]
    pub fn tunnel_opened(identity: &Identity, target: &str, client_ip: Option<IpAddr>) -> Self {
        Self {
            identity: Some(identity.clone()),
            target: Some(target.to_string()),
            client_ip,
            ..Self::new("tunnel.opened")
        }
    }

    /// Construct a `tunnel.closed` event.
    #[must_use]
    pub fn tunnel_closed(identity: &Identity, target: &str, stats: RelayStats) -> Self {
        Self {
            identity: Some(identity.clone()),
            target: Some(target.to_string()),
            bytes_to_target: Some(stats.to_target),
            bytes_to_client: Some(stats.to_client),
            ..Self::new("tunnel.closed")
        }
    }

    /// Construct a `passthrough.served` event.
    #[must_use]
    pub fn passthrough_served(identity: &Identity, status: u16, client_ip: Option<IpAddr>) -> Self {
        Self {
            identity: Some(identity.clone()),
            status: Some(status),
            client_ip,
            ..Self::new("passthrough.served")
        }
    }
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO gateway::audit audit={"event":"tunnel.opened","identity":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, event = event.event, "gateway audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
