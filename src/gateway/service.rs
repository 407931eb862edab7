//! Service descriptors, the service registry, and request routing.
//!
//! A [`Service`] pairs a routing pattern (host + path regexes) with a
//! forwarding target and an authorization policy. The [`ServiceRegistry`] is
//! an ordered, immutable sequence of services built once from configuration;
//! it is replaced wholesale on reconfiguration, never mutated in place.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use regex::Regex;
use tracing::trace;

use crate::config::ServiceConfig;
use crate::freebie::{FreebieDb, MemFreebieDb};
use crate::{Error, Result};

/// Authorization level required for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    /// No credential required
    Open,
    /// A valid credential is required
    Paid,
    /// A per-identity free budget applies before a credential is required
    LimitedFree {
        /// Free requests granted per client identity
        budget: u64,
    },
}

impl AuthLevel {
    /// Parse the config form: `off`, `on`, or `freebie N`.
    /// An empty string means `on` - auth is the secure default.
    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "" | "on" => Ok(Self::Paid),
            "off" => Ok(Self::Open),
            _ => {
                let budget = s
                    .strip_prefix("freebie")
                    .map(str::trim)
                    .and_then(|n| n.parse::<u64>().ok())
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "invalid auth level {s:?}, expected \"on\", \"off\" or \"freebie N\""
                        ))
                    })?;
                Ok(Self::LimitedFree { budget })
            }
        }
    }
}

/// A configured backend service: routing pattern, forwarding target and
/// authorization policy. Patterns are compiled once at build time.
pub struct Service {
    /// Identifier used for authenticator and pricer lookups
    pub name: String,
    /// Forwarding target (`host:port`)
    pub address: String,
    /// Forwarding protocol (`http` or `https`)
    pub protocol: String,
    /// Static price charged for this service's resources
    pub price: i64,
    /// Resolve the price per-path through the pricer at challenge time
    pub dynamic_price: bool,
    /// Extra headers appended to every forwarded request
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// PEM certificate path trusted for this backend, empty if none
    pub tls_cert_path: String,
    /// Freebie tracker, present exactly when the level is limited-free
    pub freebie: Option<Arc<dyn FreebieDb>>,
    level: AuthLevel,
    host_re: Regex,
    path_re: Option<Regex>,
    whitelist: Vec<Regex>,
}

impl Service {
    /// Build a service from its config descriptor, compiling all patterns.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| Error::Pattern {
                service: config.name.clone(),
                source,
            })
        };

        let host_re = compile(&config.host_regexp)?;
        let path_re = if config.path_regexp.is_empty() {
            None
        } else {
            Some(compile(&config.path_regexp)?)
        };
        let whitelist = config
            .auth_whitelist_paths
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;

        let mut headers = Vec::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            let name: HeaderName = name
                .parse()
                .map_err(|_| Error::Config(format!("invalid header name {name:?}")))?;
            let value: HeaderValue = value
                .parse()
                .map_err(|_| Error::Config(format!("invalid header value for {name}")))?;
            headers.push((name, value));
        }

        let level = AuthLevel::parse(&config.auth)?;
        let freebie: Option<Arc<dyn FreebieDb>> = match level {
            AuthLevel::LimitedFree { budget } => Some(Arc::new(MemFreebieDb::new(budget))),
            _ => None,
        };

        Ok(Self {
            name: config.name.clone(),
            address: config.address.clone(),
            protocol: config.protocol.clone(),
            price: config.price,
            dynamic_price: config.dynamic_price,
            headers,
            tls_cert_path: config.tls_cert_path.clone(),
            freebie,
            level,
            host_re,
            path_re,
            whitelist,
        })
    }

    /// Whether this service matches the request host and path. An absent
    /// path pattern matches any path.
    #[must_use]
    pub fn matches(&self, host: &str, path: &str) -> bool {
        if !self.host_re.is_match(host) {
            trace!(host, pattern = %self.host_re, "Host does not match");
            return false;
        }
        match &self.path_re {
            None => true,
            Some(re) => {
                let matched = re.is_match(path);
                if !matched {
                    trace!(path, pattern = %re, "Path does not match");
                }
                matched
            }
        }
    }

    /// Effective authorization level for a request path. Whitelisted
    /// sub-paths are always open regardless of the service level.
    #[must_use]
    pub fn auth_level(&self, path: &str) -> AuthLevel {
        if self.whitelist.iter().any(|re| re.is_match(path)) {
            return AuthLevel::Open;
        }
        self.level
    }
}

/// Ordered, immutable sequence of services. Matching walks the registry in
/// order and the first structurally matching entry wins - no overlap
/// resolution beyond ordering.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

impl ServiceRegistry {
    /// Build a registry from config descriptors, preserving their order.
    pub fn from_configs(configs: &[ServiceConfig]) -> Result<Self> {
        let services = configs
            .iter()
            .map(Service::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { services })
    }

    /// Match a request to a service. Returns `None` when no entry matches;
    /// the caller falls back to the static handler.
    #[must_use]
    pub fn match_service(&self, host: &str, path: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.matches(host, path))
    }

    /// All services in registry order.
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }
}
