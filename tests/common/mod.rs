//! Shared fixtures: an in-process issuer, token minting and gateway startup.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oidc_gateway::config::Config;
use oidc_gateway::gateway::Gateway;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const PRIVATE_KEY_PEM: &str = include_str!("../fixtures/rsa_private.pem");

pub const MODULUS_B64: &str = "wT4jv6l74iTR3eTVWpDO0RITBsqbD8iTQPHEoNxDXxFWAKk6oa5-oIDUblNzTztSiJDvtzKGvNyrfcssIK3Zw85kxu1chp-4T5gfL0eRSZNqD3udbdfKK_YEs_Owyqi5a1KGUQGNe07L2A7n7Q--oQO1gzFySl1sXMgd0uFq5m2bbRUgxet-9LngKHwF51v9dirQNdr8dwaLY3aG2eImlvs6WtxQu98Hubu1c-B56azj6bH-7oGpLnktBeBoq62fmRorLwRz2FHzOEOfDMIi9G25j0wZUg7M7yje9RKV-gInf-l2DL5XA3yOANwOpZ9BazXsU1fjyHFGXcsM79QThQ";

pub const REPOSITORY: &str = "octo/playground";
pub const AUDIENCE: &str = "api://Gateway";
pub const KID: &str = "k1";

// ============================================================================
// Mock issuer
// ============================================================================

/// Request counters and failure switch of a [`MockIssuer`].
#[derive(Default)]
pub struct IssuerStats {
    pub discovery_hits: AtomicUsize,
    pub jwks_hits: AtomicUsize,
    pub failing: AtomicBool,
    jwks_delay_ms: AtomicUsize,
    base_url: std::sync::OnceLock<String>,
}

/// Discovery + JWKS endpoints on an ephemeral port.
pub struct MockIssuer {
    pub url: String,
    pub stats: Arc<IssuerStats>,
}

impl MockIssuer {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Issuer whose JWKS endpoint answers after `delay`.
    pub async fn start_with_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let stats = Arc::new(IssuerStats::default());
        stats
            .jwks_delay_ms
            .store(usize::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
        stats.base_url.set(url.clone()).unwrap();

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery_handler))
            .route("/keys", get(jwks_handler))
            .with_state(Arc::clone(&stats));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, stats }
    }

    pub fn discovery_hits(&self) -> usize {
        self.stats.discovery_hits.load(Ordering::SeqCst)
    }

    pub fn jwks_hits(&self) -> usize {
        self.stats.jwks_hits.load(Ordering::SeqCst)
    }

    /// Make the JWKS endpoint answer 503 from now on.
    pub fn fail(&self) {
        self.stats.failing.store(true, Ordering::SeqCst);
    }
}

async fn discovery_handler(State(stats): State<Arc<IssuerStats>>) -> Json<Value> {
    stats.discovery_hits.fetch_add(1, Ordering::SeqCst);
    let base = stats.base_url.get().cloned().unwrap_or_default();
    Json(json!({
        "issuer": base,
        "jwks_uri": format!("{base}/keys"),
        "response_types_supported": ["id_token"],
        "id_token_signing_alg_values_supported": ["RS256"]
    }))
}

async fn jwks_handler(State(stats): State<Arc<IssuerStats>>) -> Response {
    stats.jwks_hits.fetch_add(1, Ordering::SeqCst);
    let delay = stats.jwks_delay_ms.load(Ordering::SeqCst) as u64;
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    if stats.failing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(jwks(KID)).into_response()
}

pub fn jwks(kid: &str) -> Value {
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": kid,
            "alg": "RS256",
            "use": "sig",
            "n": MODULUS_B64,
            "e": "AQAB"
        }]
    })
}

// ============================================================================
// Tokens
// ============================================================================

pub fn now() -> u64 {
    jsonwebtoken::get_current_timestamp()
}

/// Claims a workflow in [`REPOSITORY`] would present.
pub fn claims(issuer: &str) -> Value {
    json!({
        "iss": issuer,
        "sub": format!("repo:{REPOSITORY}:ref:refs/heads/main"),
        "aud": AUDIENCE,
        "repository": REPOSITORY,
        "ref": "refs/heads/main",
        "iat": now(),
        "nbf": now() - 5,
        "exp": now() + 300,
    })
}

pub fn mint(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_KEY_PEM.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

// ============================================================================
// Gateway
// ============================================================================

pub fn gateway_config(issuer: &str) -> Config {
    let mut config = Config::default();
    config.oidc.issuer = issuer.to_string();
    config.oidc.leeway = Duration::ZERO;
    config.policy.repository = REPOSITORY.to_string();
    config.policy.audience = AUDIENCE.to_string();
    config.tunnel.dial_timeout = Duration::from_secs(2);
    config.server.request_timeout = Duration::from_secs(5);
    config
}

/// Serve a gateway on an ephemeral port; returns its address.
pub async fn spawn_gateway(config: Config) -> SocketAddr {
    let gateway = Gateway::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        gateway
            .serve(listener, std::future::pending::<()>())
            .await
            .unwrap();
    });
    addr
}

/// Address nothing listens on.
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ============================================================================
// Raw HTTP
// ============================================================================

/// Send a CONNECT for `target` and return the stream plus the response head.
pub async fn connect(gateway: SocketAddr, target: &str, token: Option<&str>) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(gateway).await.unwrap();
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(token) = token {
        request.push_str(&format!("Gateway-Authorization: Bearer {token}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Read up to and including the blank line ending a response head, one
/// byte at a time so no tunnelled bytes are consumed.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(10), stream.read(&mut byte))
            .await
            .expect("response head timed out")
            .unwrap();
        assert!(n > 0, "connection closed before response head: {head:?}");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Status code of a response head.
pub fn status_of(head: &str) -> u16 {
    head.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("malformed response head: {head}"))
}

/// TCP server echoing every connection back to itself.
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// TCP server that writes `greeting` to each connection and hangs up.
pub async fn spawn_greeter(greeting: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(greeting).await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}
