//! CONNECT tunnel: outbound dial, connection takeover and byte relay.
//!
//! Establishment order matters: the outbound connection is dialed *before*
//! the caller is answered, so a caller only ever sees `200` for a tunnel
//! whose far end is already connected.
//!
//! ```text
//! dial(target, timeout) --err--> 408
//!        | ok
//! take over inbound connection --unsupported--> 417
//!        | ok
//! 200 -> relay both directions until either side closes
//! ```

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{StatusCode, header::HOST},
    response::Response,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::audit::{self, AuditEvent, Identity};

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Tunnel establishment and relay errors.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Outbound dial did not complete in time.
    #[error("dial to {target} timed out after {timeout:?}")]
    DialTimeout {
        /// Destination `host:port`
        target: String,
        /// Configured dial timeout
        timeout: Duration,
    },

    /// Outbound dial was refused or could not resolve.
    #[error("dial to {target} failed: {source}")]
    Dial {
        /// Destination `host:port`
        target: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The inbound connection cannot be taken over.
    #[error("connection does not support takeover")]
    HijackUnsupported,

    /// Taking over the inbound connection failed after `200` was sent.
    #[error("connection takeover failed: {0}")]
    Handoff(#[source] hyper::Error),

    /// Copying bytes failed mid-stream.
    #[error("relay I/O error: {0}")]
    Relay(#[from] io::Error),
}

impl TunnelError {
    /// HTTP status for errors raised before the caller was answered.
    ///
    /// `Handoff` and `Relay` happen after `200` went out; their statuses are
    /// only used for logging.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::DialTimeout { .. } | Self::Dial { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::HijackUnsupported => StatusCode::EXPECTATION_FAILED,
            Self::Handoff(_) => StatusCode::BAD_REQUEST,
            Self::Relay(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short stable code for logs and audit records.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DialTimeout { .. } => "dial_timeout",
            Self::Dial { .. } => "dial_failed",
            Self::HijackUnsupported => "hijack_unsupported",
            Self::Handoff(_) => "handoff_failed",
            Self::Relay(_) => "relay_failed",
        }
    }
}

/// Bytes moved by one tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Caller -> destination
    pub to_target: u64,
    /// Destination -> caller
    pub to_client: u64,
}

/// Destination of a CONNECT request: the request authority, or the `Host`
/// header when the authority is absent.
///
/// Returns `None` unless the value has the form `host:port` with a non-zero
/// port.
#[must_use]
pub fn connect_target(request: &Request) -> Option<String> {
    let target = match request.uri().authority() {
        Some(authority) => authority.as_str().to_string(),
        None => request.headers().get(HOST)?.to_str().ok()?.to_string(),
    };
    is_host_port(&target).then_some(target)
}

fn is_host_port(target: &str) -> bool {
    if target.contains(['@', '/']) {
        return false;
    }
    match target.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0),
        None => false,
    }
}

/// Dials destinations and hands established connections to [`relay`].
#[derive(Debug, Clone)]
pub struct TunnelRelay {
    dial_timeout: Duration,
}

impl TunnelRelay {
    /// Relay whose outbound dials give up after `dial_timeout`.
    #[must_use]
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }

    /// Open a TCP connection to `target`.
    ///
    /// # Errors
    ///
    /// [`TunnelError::DialTimeout`] or [`TunnelError::Dial`].
    pub async fn dial(&self, target: &str) -> Result<TcpStream, TunnelError> {
        bounded_dial(target, self.dial_timeout, TcpStream::connect(target)).await
    }

    /// Dial `target`, then answer `200` and relay the caller's connection to
    /// it in a background task.
    ///
    /// The returned response must be sent as-is; the takeover completes
    /// once it is on the wire.
    ///
    /// # Errors
    ///
    /// Dial errors, or [`TunnelError::HijackUnsupported`] when the request
    /// did not arrive on a connection that can be taken over.
    pub async fn establish(
        &self,
        mut request: Request,
        target: String,
        identity: Identity,
        client_ip: Option<IpAddr>,
    ) -> Result<Response, TunnelError> {
        let outbound = self.dial(&target).await?;

        let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
            return Err(TunnelError::HijackUnsupported);
        };

        tokio::spawn(handoff(on_upgrade, outbound, target, identity, client_ip));

        Ok(Response::new(Body::empty()))
    }
}

/// Await `connect` for at most `timeout`.
async fn bounded_dial<S, F>(target: &str, timeout: Duration, connect: F) -> Result<S, TunnelError>
where
    F: Future<Output = io::Result<S>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TunnelError::Dial {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(TunnelError::DialTimeout {
            target: target.to_string(),
            timeout,
        }),
    }
}

/// Wait for the caller's connection to be released after the `200`, then
/// relay it to `outbound`. `tunnel.opened` is audited only once the takeover
/// has succeeded.
async fn handoff(
    on_upgrade: OnUpgrade,
    outbound: TcpStream,
    target: String,
    identity: Identity,
    client_ip: Option<IpAddr>,
) -> Result<RelayStats, TunnelError> {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            let err = TunnelError::Handoff(e);
            warn!(destination = %target, code = err.code(), error = %err, "Tunnel handoff failed");
            return Err(err);
        }
    };

    info!(destination = %target, repository = ?identity.repository, "Tunnel opened");
    audit::emit(&AuditEvent::tunnel_opened(&identity, &target, client_ip));

    let stats = relay(TokioIo::new(upgraded), outbound).await;
    info!(
        destination = %target,
        to_target = stats.to_target,
        to_client = stats.to_client,
        "Tunnel closed"
    );
    audit::emit(&AuditEvent::tunnel_closed(&identity, &target, stats));
    Ok(stats)
}

/// Copy bytes both ways between `inbound` and `outbound` until either side
/// closes or fails, then close both.
pub async fn relay<I, O>(inbound: I, outbound: O) -> RelayStats
where
    I: AsyncRead + AsyncWrite + Send + 'static,
    O: AsyncRead + AsyncWrite + Send + 'static,
{
    let (inbound_read, inbound_write) = tokio::io::split(inbound);
    let (outbound_read, outbound_write) = tokio::io::split(outbound);
    let closed = CancellationToken::new();

    let upstream = tokio::spawn(pipe("to_target", inbound_read, outbound_write, closed.clone()));
    let downstream = tokio::spawn(pipe("to_client", outbound_read, inbound_write, closed));

    let (to_target, to_client) = tokio::join!(upstream, downstream);
    RelayStats {
        to_target: to_target.unwrap_or_default(),
        to_client: to_client.unwrap_or_default(),
    }
}

/// One relay direction. Cancels `closed` when it stops for any reason, and
/// stops when `closed` is cancelled by the other direction.
async fn pipe<R, W>(direction: &'static str, mut reader: R, mut writer: W, closed: CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;

    let result: io::Result<()> = loop {
        let n = tokio::select! {
            () = closed.cancelled() => break Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e),
            },
        };
        tokio::select! {
            () = closed.cancelled() => break Ok(()),
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    break Err(e);
                }
            }
        }
        total += n as u64;
    };

    closed.cancel();
    let _ = writer.shutdown().await;

    match result {
        Ok(()) => debug!(direction, bytes = total, "Relay direction finished"),
        Err(e) => {
            let err = TunnelError::from(e);
            debug!(direction, bytes = total, error = %err, "Relay direction failed");
        }
    }
    total
}
