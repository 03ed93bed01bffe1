//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use gateway_core::ClaimRule;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Issuer of GitHub Actions workflow identity tokens.
pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token validation configuration
    pub oidc: OidcConfig,
    /// Claim policy configuration
    pub policy: PolicyConfig,
    /// Tunnel configuration
    pub tunnel: TunnelConfig,
    /// Illustrative passthrough endpoint
    pub passthrough: PassthroughConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (OIDC_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("OIDC_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in policy values
        config.expand_env_vars();

        Ok(config)
    }

    /// Reject configurations that would leave the gateway open or unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.oidc.issuer.trim().is_empty() {
            return Err(Error::Config("oidc.issuer must be set".to_string()));
        }
        if self.policy.repository.trim().is_empty() {
            return Err(Error::Config("policy.repository must be set".to_string()));
        }
        if self.policy.audience.trim().is_empty() {
            return Err(Error::Config("policy.audience must be set".to_string()));
        }
        if self.oidc.auth_header.parse::<axum::http::HeaderName>().is_err() {
            return Err(Error::Config(format!(
                "oidc.auth_header is not a valid header name: {}",
                self.oidc.auth_header
            )));
        }
        if let Some(rule) = self.policy.claims.iter().find(|r| r.claim.trim().is_empty()) {
            return Err(Error::Config(format!(
                "policy.claims contains a rule without a claim name (equals: {})",
                rule.equals
            )));
        }
        if self.passthrough.enabled && !self.passthrough.path.starts_with('/') {
            return Err(Error::Config(format!(
                "passthrough.path must start with '/': {}",
                self.passthrough.path
            )));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in policy values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.policy.repository = Self::expand_string(&re, &self.policy.repository);
        self.policy.audience = Self::expand_string(&re, &self.policy.audience);
        for rule in &mut self.policy.claims {
            rule.equals = Self::expand_string(&re, &rule.equals);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Upper bound on token validation and authorization for one request.
    /// Does not apply to an established tunnel.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Deadline for one request to produce a response head (`408` when
    /// exceeded). Does not apply to an established tunnel.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Trusted issuer base URL
    pub issuer: String,
    /// Header carrying the identity token
    pub auth_header: String,
    /// How long a fetched key set is served before a refresh
    #[serde(with = "humantime_serde")]
    pub key_set_ttl: Duration,
    /// Timeout for discovery and key-set fetches
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Clock skew tolerance for `exp` / `nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            auth_header: "Gateway-Authorization".to_string(),
            key_set_ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(10),
            leeway: Duration::from_secs(60),
        }
    }
}

/// Claim policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Required `repository` claim (supports `${VAR}`)
    pub repository: String,
    /// Required `aud` claim (supports `${VAR}`)
    pub audience: String,
    /// Additional exact-match rules, checked after repository and audience
    pub claims: Vec<ClaimRule>,
}

/// Tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Outbound connect timeout
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
        }
    }
}

/// Illustrative passthrough endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Serve the passthrough path
    pub enabled: bool,
    /// Request path
    pub path: String,
    /// Fixed upstream fetched on every authorized request
    pub upstream_url: String,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/apiExample".to_string(),
            upstream_url: "https://www.bing.com".to_string(),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s" or "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" must be tried before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
