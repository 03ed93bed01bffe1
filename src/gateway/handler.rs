//! Request dispatcher

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use gateway_core::{AuthorizationDecision, Claims, PolicyEngine};
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::GatewayError;
use super::audit::{self, AuditEvent, Identity};
use super::passthrough::Passthrough;
use super::tunnel::{TunnelRelay, connect_target};
use crate::config::Config;
use crate::oidc::{KeySetCache, TokenValidator, http_client};
use crate::Result;

/// Shared application state
pub struct AppState {
    /// Trusted issuer
    pub issuer: String,
    /// Header carrying the identity token
    pub auth_header: String,
    /// Key-set cache shared by all requests
    pub key_sets: Arc<KeySetCache>,
    /// Token validator
    pub validator: TokenValidator,
    /// Claim policy
    pub policy: PolicyEngine,
    /// Tunnel dialer and relay
    pub tunnel: TunnelRelay,
    /// Passthrough endpoint, when enabled
    pub passthrough: Option<Passthrough>,
    /// Bound on validation + authorization
    pub request_timeout: Duration,
    /// Bound on producing a response head for one request
    pub read_timeout: Duration,
}

impl AppState {
    /// Build request-handling state from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] when an HTTP client cannot be constructed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key_sets = KeySetCache::new(http_client(config.oidc.fetch_timeout)?, config.oidc.key_set_ttl);
        let passthrough = Passthrough::from_config(
            http_client(config.server.request_timeout)?,
            &config.passthrough,
        );

        Ok(Self {
            issuer: config.oidc.issuer.clone(),
            auth_header: config.oidc.auth_header.clone(),
            key_sets: Arc::new(key_sets),
            validator: TokenValidator::new(&config.oidc.issuer, config.oidc.leeway),
            policy: PolicyEngine::for_repository(
                &config.policy.repository,
                &config.policy.audience,
                config.policy.claims.clone(),
            ),
            tunnel: TunnelRelay::new(config.tunnel.dial_timeout),
            passthrough,
            request_timeout: config.server.request_timeout,
            read_timeout: config.server.read_timeout,
        })
    }

    /// Extract, validate and authorize the caller's token.
    ///
    /// # Errors
    ///
    /// Any [`GatewayError`] that maps to `401`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<Claims, GatewayError> {
        let token = extract_token(headers, &self.auth_header).ok_or(GatewayError::MissingToken)?;

        let claims = tokio::time::timeout(self.request_timeout, self.validate(token))
            .await
            .map_err(|_| GatewayError::ValidationTimeout)??;

        match self.policy.authorize(&claims) {
            AuthorizationDecision::Allow => Ok(claims),
            AuthorizationDecision::Deny { claim, cause } => Err(GatewayError::ClaimMismatch { claim, cause }),
        }
    }

    async fn validate(&self, token: &str) -> std::result::Result<Claims, GatewayError> {
        let key_set = self.key_sets.get(&self.issuer).await?;
        Ok(self.validator.validate(token, &key_set)?)
    }
}

/// Token from the `header_name` header, without an optional `Bearer ` prefix.
#[must_use]
pub fn extract_token<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
    let value = headers.get(header_name)?.to_str().ok()?.trim();
    let token = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim_start(),
        None if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// What a request asks the gateway to do.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RequestShape {
    Tunnel { target: String },
    Passthrough,
}

impl RequestShape {
    fn classify(request: &Request, passthrough: Option<&Passthrough>) -> Option<Self> {
        if request.method() == Method::CONNECT {
            return connect_target(request).map(|target| Self::Tunnel { target });
        }
        match passthrough {
            Some(p) if request.method() == Method::GET && request.uri().path() == p.path() => {
                Some(Self::Passthrough)
            }
            _ => None,
        }
    }

    fn target(&self) -> Option<&str> {
        match self {
            Self::Tunnel { target } => Some(target),
            Self::Passthrough => None,
        }
    }
}

/// Create the router
///
/// Requests that have not produced a response head within
/// `state.read_timeout` are answered `408`. An established tunnel is not
/// affected: its relay runs after the response.
pub fn create_router(state: Arc<AppState>) -> Router {
    let read_timeout = state.read_timeout;
    Router::new()
        .fallback(handle_request)
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, read_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let client_ip: Option<IpAddr> = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    let Some(shape) = RequestShape::classify(&request, state.passthrough.as_ref()) else {
        debug!(method = %request.method(), uri = %request.uri(), "Unsupported request shape");
        return GatewayError::NotFound.into_response();
    };

    let claims = match state.authenticate(request.headers()).await {
        Ok(claims) => claims,
        Err(err) => {
            warn!(code = err.reason_code(), error = %err, "Request denied");
            audit::emit(&AuditEvent::denied(err.reason_code(), shape.target(), client_ip));
            return err.into_response();
        }
    };
    let identity = Identity::from_claims(&claims);

    match shape {
        RequestShape::Tunnel { target } => {
            match state.tunnel.establish(request, target.clone(), identity, client_ip).await {
                Ok(response) => {
                    debug!(destination = %target, "Destination dialed, awaiting handoff");
                    response
                }
                Err(e) => {
                    let err = GatewayError::from(e);
                    warn!(destination = %target, code = err.reason_code(), error = %err, "Tunnel not established");
                    err.into_response()
                }
            }
        }
        RequestShape::Passthrough => {
            let Some(passthrough) = state.passthrough.as_ref() else {
                return GatewayError::NotFound.into_response();
            };
            match passthrough.forward().await {
                Ok(response) => {
                    audit::emit(&AuditEvent::passthrough_served(
                        &identity,
                        response.status().as_u16(),
                        client_ip,
                    ));
                    response
                }
                Err(err) => {
                    warn!(code = err.reason_code(), error = %err, "Passthrough failed");
                    err.into_response()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{self, HeaderValue};
    use tower::ServiceExt;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.policy.repository = "octo/playground".to_string();
        config.policy.audience = "api://Gateway".to_string();
        config
    }

    #[test]
    fn token_is_read_from_configured_header() {
        let h = headers("gateway-authorization", "eyJ.abc.def");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), Some("eyJ.abc.def"));
        assert_eq!(extract_token(&h, "Authorization"), None);
    }

    #[test]
    fn bearer_prefix_is_optional() {
        let h = headers("gateway-authorization", "Bearer eyJ.abc.def");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), Some("eyJ.abc.def"));
        let h = headers("gateway-authorization", "bearer   eyJ.abc.def");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), Some("eyJ.abc.def"));
    }

    #[test]
    fn empty_token_counts_as_missing() {
        let h = headers("gateway-authorization", "Bearer ");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), None);
        let h = headers("gateway-authorization", "");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), None);
    }

    #[test]
    fn bare_bearer_scheme_is_missing_token() {
        for value in ["Bearer", "bearer", "BEARER   ", "Bearer\t"] {
            let h = headers("gateway-authorization", value);
            assert_eq!(extract_token(&h, "Gateway-Authorization"), None, "{value:?}");
        }
    }

    #[test]
    fn bearer_must_be_a_separate_word() {
        let h = headers("gateway-authorization", "Bearertoken");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), Some("Bearertoken"));
        let h = headers("gateway-authorization", "Bearer\teyJ.abc.def");
        assert_eq!(extract_token(&h, "Gateway-Authorization"), Some("eyJ.abc.def"));
    }

    #[test]
    fn shapes_are_classified() {
        let state = AppState::from_config(&test_config()).unwrap();
        let passthrough = state.passthrough.as_ref();

        let connect = http::Request::builder()
            .method(Method::CONNECT)
            .uri("db.internal:5432")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            RequestShape::classify(&connect, passthrough),
            Some(RequestShape::Tunnel {
                target: "db.internal:5432".to_string()
            })
        );

        let example = http::Request::get("/apiExample").body(Body::empty()).unwrap();
        assert_eq!(RequestShape::classify(&example, passthrough), Some(RequestShape::Passthrough));

        let post = http::Request::post("/apiExample").body(Body::empty()).unwrap();
        assert_eq!(RequestShape::classify(&post, passthrough), None);

        let other = http::Request::get("/other").body(Body::empty()).unwrap();
        assert_eq!(RequestShape::classify(&other, passthrough), None);

        assert_eq!(RequestShape::classify(&example, None), None);
    }

    #[tokio::test]
    async fn unknown_shape_is_404_before_any_token_check() {
        let app = create_router(Arc::new(AppState::from_config(&test_config()).unwrap()));

        let response = app
            .oneshot(http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let app = create_router(Arc::new(AppState::from_config(&test_config()).unwrap()));

        let response = app
            .oneshot(http::Request::get("/apiExample").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn slow_request_is_cut_off_with_408() {
        // GIVEN: an issuer that accepts connections but never answers, and a
        // read deadline well below the validation bound
        let silent_issuer = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config();
        config.oidc.issuer = format!("http://{}", silent_issuer.local_addr().unwrap());
        config.server.request_timeout = Duration::from_secs(30);
        config.server.read_timeout = Duration::from_millis(200);
        let app = create_router(Arc::new(AppState::from_config(&config).unwrap()));

        // WHEN: a request carrying a token waits on key-set discovery
        let request = http::Request::get("/apiExample")
            .header("Gateway-Authorization", "eyJ.abc.def")
            .body(Body::empty())
            .unwrap();
        let response = tokio::time::timeout(Duration::from_secs(5), app.oneshot(request))
            .await
            .expect("read deadline should fire first")
            .unwrap();

        // THEN: the read deadline answers 408
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
