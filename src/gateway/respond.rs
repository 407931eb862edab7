//! Direct responses: CORS, challenges, and the dual-protocol translator.
//!
//! Everything here produces responses the gateway originates itself -
//! challenges and internal errors. Successfully proxied traffic never passes
//! through this module.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Response, StatusCode, header},
};
use tracing::{debug, error, info};

use crate::auth::Authenticator;

/// Content-type prefix identifying gRPC-over-HTTP/2 clients.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Add the header fields required for Cross Origin Resource Sharing. These
/// signal to the browser that it's ok to allow requests to sub domains, even
/// if the JS was served from the top level domain.
pub fn add_cors_headers(headers: &mut HeaderMap) {
    debug!("Adding CORS headers to response");

    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-expose-headers",
        HeaderValue::from_static("WWW-Authenticate"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Authorization, Grpc-Metadata-macaroon, WWW-Authenticate"),
    );
}

/// Whether the request came from a gRPC client, judged by its content-type.
#[must_use]
pub fn is_grpc_request(request_headers: &HeaderMap) -> bool {
    request_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(GRPC_CONTENT_TYPE))
}

/// Send a response directly to the client without proxying anything to a
/// backend, encoded so the client can understand it.
///
/// gRPC clients look for `grpc-status`/`grpc-message` metadata headers
/// instead of interpreting the HTTP status and body, so for them the outcome
/// is carried in those headers with an empty body; `grpc_status` is the
/// configured metadata code. Plain HTTP clients get a text body. CORS headers
/// are attached either way.
#[must_use]
pub fn send_direct(
    request_headers: &HeaderMap,
    status: StatusCode,
    message: &str,
    grpc_status: u32,
) -> Response<Body> {
    let mut response = if is_grpc_request(request_headers) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        response.headers_mut().insert(
            "grpc-status",
            HeaderValue::from_str(&grpc_status.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("13")),
        );
        response.headers_mut().insert(
            "grpc-message",
            HeaderValue::from_str(message).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        response
    } else {
        let body = if message.is_empty() {
            Body::empty()
        } else {
            Body::from(format!("{message}\n"))
        };
        let mut response = Response::new(body);
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    };

    add_cors_headers(response.headers_mut());
    response
}

/// Issue a 402 challenge: fresh challenge headers from the authenticator plus
/// a "payment required" status, encoded per client family.
///
/// If the authenticator cannot produce a challenge this degrades to a 500
/// "challenge failure" - fatal for this request, never retried.
pub async fn payment_required(
    authenticator: &dyn Authenticator,
    request_headers: &HeaderMap,
    service_name: &str,
    price: i64,
    grpc_status: u32,
) -> Response<Body> {
    let challenge = match authenticator
        .fresh_challenge_header(service_name, price)
        .await
    {
        Ok(header) => header,
        Err(e) => {
            error!(service = %service_name, error = %e, "Error creating new challenge header");
            return send_direct(
                request_headers,
                StatusCode::INTERNAL_SERVER_ERROR,
                "challenge failure",
                grpc_status,
            );
        }
    };

    info!(service = %service_name, price, "Authentication failed. Sending 402.");

    let mut response = send_direct(
        request_headers,
        StatusCode::PAYMENT_REQUIRED,
        "payment required",
        grpc_status,
    );

    // First value replaces anything already set for the name, further values
    // append - multi-valued challenge headers survive the merge.
    let headers = response.headers_mut();
    for name in challenge.keys() {
        let mut values = challenge.get_all(name).iter();
        if let Some(first) = values.next() {
            headers.insert(name.clone(), first.clone());
        }
        for value in values {
            headers.append(name.clone(), value.clone());
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderName;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::{Error, Result};

    fn grpc_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/grpc+proto"),
        );
        headers
    }

    #[test]
    fn grpc_detection_by_content_type_prefix() {
        assert!(is_grpc_request(&grpc_headers()));

        let mut plain = HeaderMap::new();
        plain.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        assert!(!is_grpc_request(&plain));
        assert!(!is_grpc_request(&HeaderMap::new()));
    }

    #[test]
    fn plain_client_gets_text_body_with_status() {
        let response = send_direct(
            &HeaderMap::new(),
            StatusCode::PAYMENT_REQUIRED,
            "payment required",
            13,
        );

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert!(response.headers().get("grpc-status").is_none());
    }

    #[test]
    fn grpc_client_gets_metadata_headers_and_no_body() {
        let response = send_direct(
            &grpc_headers(),
            StatusCode::PAYMENT_REQUIRED,
            "payment required",
            13,
        );

        // The HTTP status is still emitted, but the outcome travels in the
        // metadata headers.
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(response.headers().get("grpc-status").unwrap(), "13");
        assert_eq!(
            response.headers().get("grpc-message").unwrap(),
            "payment required"
        );
    }

    #[test]
    fn configured_grpc_status_is_used() {
        let response = send_direct(&grpc_headers(), StatusCode::PAYMENT_REQUIRED, "x", 16);
        assert_eq!(response.headers().get("grpc-status").unwrap(), "16");
    }

    #[test]
    fn direct_responses_carry_cors_headers() {
        let response = send_direct(&HeaderMap::new(), StatusCode::OK, "", 13);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-expose-headers")
                .unwrap(),
            "WWW-Authenticate"
        );
    }

    #[tokio::test]
    async fn challenge_is_402_with_challenge_headers() {
        let auth = StaticAuthenticator::new("tok");
        let response = payment_required(&auth, &HeaderMap::new(), "prices", 100, 13).await;

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("service=\"prices\""));
    }

    #[tokio::test]
    async fn multi_valued_challenge_headers_survive() {
        struct MultiHeaderAuth;

        #[async_trait::async_trait]
        impl Authenticator for MultiHeaderAuth {
            async fn accept(&self, _: &HeaderMap, _: &str) -> bool {
                false
            }

            async fn fresh_challenge_header(&self, _: &str, _: i64) -> Result<HeaderMap> {
                let mut headers = HeaderMap::new();
                let name: HeaderName = "www-authenticate".parse().unwrap();
                headers.append(name.clone(), HeaderValue::from_static("L402 first"));
                headers.append(name, HeaderValue::from_static("Basic second"));
                Ok(headers)
            }
        }

        let response = payment_required(&MultiHeaderAuth, &HeaderMap::new(), "svc", 1, 13).await;
        let values: Vec<_> = response
            .headers()
            .get_all(header::WWW_AUTHENTICATE)
            .iter()
            .collect();
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn failing_challenge_degrades_to_500() {
        struct BrokenAuth;

        #[async_trait::async_trait]
        impl Authenticator for BrokenAuth {
            async fn accept(&self, _: &HeaderMap, _: &str) -> bool {
                false
            }

            async fn fresh_challenge_header(&self, _: &str, _: i64) -> Result<HeaderMap> {
                Err(Error::Challenge("minting offline".to_string()))
            }
        }

        let response = payment_required(&BrokenAuth, &HeaderMap::new(), "svc", 1, 13).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
