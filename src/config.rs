//! Configuration management

use std::{collections::HashMap, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Static file fallback configuration
    pub static_files: StaticConfig,
    /// Authenticator configuration
    pub authenticator: AuthenticatorConfig,
    /// Pricer configuration
    pub pricer: PricerConfig,
    /// Service descriptors, matched in order
    pub services: Vec<ServiceConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// gRPC status code reported in the `grpc-status` metadata header on
    /// direct (non-proxied) error responses. Defaults to 13 (internal),
    /// matching the historic behavior of reporting every direct error as
    /// internal regardless of the HTTP status.
    pub grpc_error_status: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            grpc_error_status: 13,
        }
    }
}

/// Static file fallback configuration.
///
/// Disabled by default: unmatched requests get a plain 404. Serving files
/// from `root` has to be enabled intentionally.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StaticConfig {
    /// Enable serving files for requests that match no service
    pub enabled: bool,
    /// Directory that contains the files to serve (must hold index.html)
    pub root: String,
}

/// Authenticator configuration for the built-in static-token authenticator.
///
/// The credential format is opaque to the gateway; this built-in
/// implementation simply compares the presented token against `token`.
/// Deployments with a real credential scheme plug in their own
/// [`crate::auth::Authenticator`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthenticatorConfig {
    /// Accepted token value. Empty means no credential is ever accepted,
    /// which makes every paid service challenge unconditionally.
    pub token: String,
}

/// Pricer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PricerConfig {
    /// URL of a remote price server. When empty, services with
    /// `dynamic_price` fall back to their static price.
    pub url: String,
}

/// One backend service descriptor
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identifier, used for authenticator and pricer lookups
    pub name: String,
    /// Regex matched against the request host
    pub host_regexp: String,
    /// Regex matched against the request path; empty matches any path
    pub path_regexp: String,
    /// Backend address (`host:port`)
    pub address: String,
    /// Backend protocol (`http` or `https`)
    pub protocol: String,
    /// Auth level: `on` (credential required), `off` (open), or
    /// `freebie N` (N free requests per client IP before a credential
    /// is required)
    pub auth: String,
    /// Path regexes within this service that never require auth
    pub auth_whitelist_paths: Vec<String>,
    /// Price charged for this service's resources
    pub price: i64,
    /// Resolve the price per-path through the configured pricer instead of
    /// using the static `price`
    pub dynamic_price: bool,
    /// Extra headers appended to every forwarded request
    pub headers: HashMap<String, String>,
    /// Path to a PEM certificate trusted for this backend
    pub tls_cert_path: String,
}

impl Config {
    /// Load configuration from an optional YAML file plus `TOLLGATE_`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed("TOLLGATE_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration.
    pub fn validate(&self) -> Result<()> {
        if self.static_files.enabled && self.static_files.root.trim().is_empty() {
            return Err(Error::Config(
                "static root cannot be empty, must contain path to directory \
                 that contains index.html"
                    .to_string(),
            ));
        }

        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(Error::Config("service name cannot be empty".to_string()));
            }
            if service.address.trim().is_empty() {
                return Err(Error::Config(format!(
                    "service {}: address cannot be empty",
                    service.name
                )));
            }
            if !matches!(service.protocol.as_str(), "http" | "https") {
                return Err(Error::Config(format!(
                    "service {}: protocol must be http or https, got {:?}",
                    service.name, service.protocol
                )));
            }
        }

        Ok(())
    }
}
