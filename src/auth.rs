//! Authenticator capability and credential header handling.
//!
//! The credential token itself is opaque to the gateway: it is extracted from
//! whichever header variant the client used, validated through the
//! [`Authenticator`] trait, and re-serialized into the single canonical form
//! the backends expect. No assumption is made about its internal structure.

use axum::http::{HeaderMap, HeaderValue, header};

use crate::{Error, Result};

/// Canonical credential scheme written to forwarded requests.
pub const CREDENTIAL_SCHEME: &str = "L402";

/// Legacy scheme still accepted on inbound requests.
const LEGACY_SCHEME: &str = "LSAT";

/// gRPC clients present the credential through this metadata header instead
/// of `Authorization`.
const GRPC_CREDENTIAL_HEADER: &str = "grpc-metadata-macaroon";

/// Validates presented credentials and mints challenges for priced services.
///
/// Implementations are external collaborators; the gateway only relies on the
/// two operations below. `accept` must not be used as the sole gate for
/// charging - it answers "is this credential valid for this service", nothing
/// more.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate the credential presented in `headers` for `service_name`.
    /// Returns `false` for missing, invalid or expired credentials.
    async fn accept(&self, headers: &HeaderMap, service_name: &str) -> bool;

    /// Produce the response header fields a client needs to obtain a valid
    /// credential for `service_name` at `price`.
    async fn fresh_challenge_header(&self, service_name: &str, price: i64) -> Result<HeaderMap>;
}

/// Extract the opaque credential token from any accepted header variant.
///
/// Accepted variants, in order of precedence:
/// 1. `Authorization: L402 <token>` (canonical)
/// 2. `Authorization: LSAT <token>` (legacy scheme)
/// 3. `Grpc-Metadata-Macaroon: <token>` (gRPC client metadata)
///
/// Returns `None` when no variant is present - which is not an error, some
/// requests are legitimately anonymous.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        for scheme in [CREDENTIAL_SCHEME, LEGACY_SCHEME] {
            if let Some(token) = value
                .strip_prefix(scheme)
                .and_then(|rest| rest.strip_prefix(' '))
            {
                let token = token.trim_start();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
        return None;
    }

    headers
        .get(GRPC_CREDENTIAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// Write the credential back in the canonical `Authorization` form.
pub fn set_credential_header(headers: &mut HeaderMap, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("{CREDENTIAL_SCHEME} {token}"))
        .map_err(|e| Error::Internal(format!("could not set credential header: {e}")))?;
    headers.insert(header::AUTHORIZATION, value);
    Ok(())
}

/// Built-in authenticator that accepts a single configured token.
///
/// This is the stand-in wired up by the binary; deployments with a real
/// credential scheme provide their own [`Authenticator`] implementation.
pub struct StaticAuthenticator {
    token: String,
}

impl StaticAuthenticator {
    /// Create an authenticator accepting exactly `token`. An empty token
    /// means no credential is ever accepted.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for StaticAuthenticator {
    async fn accept(&self, headers: &HeaderMap, _service_name: &str) -> bool {
        if self.token.is_empty() {
            return false;
        }
        credential_from_headers(headers).is_some_and(|t| t == self.token)
    }

    async fn fresh_challenge_header(&self, service_name: &str, price: i64) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = format!("{CREDENTIAL_SCHEME} service=\"{service_name}\", price=\"{price}\"");
        let value = HeaderValue::from_str(&value)
            .map_err(|e| Error::Challenge(format!("invalid challenge value: {e}")))?;
        headers.insert(header::WWW_AUTHENTICATE, value);
        Ok(headers)
    }
}
