//! Key-set cache: last fetched JWKS bytes plus fetch time.
//!
//! # Concurrency
//!
//! The current snapshot is an `Arc<CachedKeySet>` behind a read-mostly
//! `RwLock`: readers clone the `Arc` and never observe a partially written
//! entry, a refresh swaps the whole snapshot.
//!
//! Refreshes are single-flight. A task that finds the snapshot stale takes
//! `refresh_lock`, then re-checks freshness before fetching, so tasks that
//! queued behind an in-flight refresh reuse its result instead of issuing
//! their own discovery + JWKS round trip.
//!
//! A failed refresh leaves the previous snapshot untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{DiscoveryResolver, OidcError};

/// Raw JWKS bytes of one issuer and the moment they were fetched.
#[derive(Debug)]
pub struct CachedKeySet {
    issuer: String,
    bytes: Bytes,
    fetched_at: Instant,
}

impl CachedKeySet {
    /// Issuer the bytes were fetched for.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The JWKS document as fetched.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Time since the fetch completed.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    fn is_fresh_for(&self, issuer: &str, freshness: Duration) -> bool {
        self.issuer == issuer && self.age() <= freshness
    }
}

/// JWKS cache with single-flight refresh.
pub struct KeySetCache {
    current: RwLock<Option<Arc<CachedKeySet>>>,
    refresh_lock: Mutex<()>,
    discovery: DiscoveryResolver,
    http: reqwest::Client,
    freshness: Duration,
}

impl KeySetCache {
    /// Create an empty cache. `http` should carry a request timeout
    /// (see [`super::http_client`]).
    #[must_use]
    pub fn new(http: reqwest::Client, freshness: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            discovery: DiscoveryResolver::new(http.clone()),
            http,
            freshness,
        }
    }

    /// Freshness window.
    #[must_use]
    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// JWKS bytes for `issuer`, refreshed first when stale or empty.
    ///
    /// # Errors
    ///
    /// [`OidcError::KeySetFetch`] when a needed refresh fails.
    pub async fn get(&self, issuer: &str) -> Result<Bytes, OidcError> {
        let snapshot = self.refresh_if_stale(issuer).await?;
        Ok(snapshot.bytes.clone())
    }

    /// Current snapshot for `issuer`, fetching a new one if the cached one is
    /// missing, for another issuer, or older than the freshness window.
    ///
    /// # Errors
    ///
    /// [`OidcError::KeySetFetch`] when discovery or the JWKS download fails.
    pub async fn refresh_if_stale(&self, issuer: &str) -> Result<Arc<CachedKeySet>, OidcError> {
        if let Some(fresh) = self.fresh_snapshot(issuer).await {
            return Ok(fresh);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another task may have completed a refresh while this one waited.
        if let Some(fresh) = self.fresh_snapshot(issuer).await {
            debug!(issuer = %issuer, "Key set refreshed by a concurrent request");
            return Ok(fresh);
        }

        let bytes = match self.fetch(issuer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(issuer = %issuer, error = %e, "Key set refresh failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let snapshot = Arc::new(CachedKeySet {
            issuer: issuer.to_string(),
            bytes,
            fetched_at: Instant::now(),
        });
        *self.current.write().await = Some(Arc::clone(&snapshot));

        info!(issuer = %issuer, size = snapshot.bytes.len(), "Key set refreshed");
        Ok(snapshot)
    }

    /// Current snapshot without triggering a refresh.
    pub async fn peek(&self) -> Option<Arc<CachedKeySet>> {
        self.current.read().await.clone()
    }

    async fn fresh_snapshot(&self, issuer: &str) -> Option<Arc<CachedKeySet>> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.is_fresh_for(issuer, self.freshness))
            .cloned()
    }

    async fn fetch(&self, issuer: &str) -> Result<Bytes, OidcError> {
        let jwks_uri = self
            .discovery
            .resolve(issuer)
            .await
            .map_err(|e| OidcError::KeySetFetch(e.to_string()))?;

        debug!(issuer = %issuer, "Fetching JWKS from {jwks_uri}");
        let response = self
            .http
            .get(&jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::KeySetFetch(format!("GET {jwks_uri}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::KeySetFetch(format!("GET {jwks_uri}: HTTP {status}")));
        }

        response
            .bytes()
            .await
            .map_err(|e| OidcError::KeySetFetch(format!("reading {jwks_uri}: {e}")))
    }
}
