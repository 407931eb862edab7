//! The reverse dispatcher: rewrites an authorized request for its backend and
//! streams the proxied response back to the client.
//!
//! Forwarding happens over the snapshot's [`reqwest`] client, so each request
//! observes one consistent (registry, transport) pair even across a live
//! reconfiguration. Response bodies are passed through as a stream - nothing
//! is buffered, so long-lived backend streams reach the client immediately.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header},
};
use tracing::{debug, error};

use crate::auth::{credential_from_headers, set_credential_header};
use crate::gateway::reconcile::GatewayState;
use crate::gateway::respond::{add_cors_headers, send_direct};
use crate::gateway::service::Service;

/// Hop-by-hop headers that must not be copied from the backend response.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "transfer-encoding",
    "upgrade",
];

/// Rewrite the request target for a backend service: scheme and authority
/// come from the service descriptor, path and query are preserved.
#[must_use]
pub fn target_url(service: &Service, uri: &axum::http::Uri) -> String {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!(
        "{}://{}{}",
        service.protocol, service.address, path_and_query
    )
}

/// Normalize whatever credential variant the client sent into the canonical
/// header form the backend expects. Absence of a credential is fine - some
/// forwarded requests are legitimately anonymous.
pub fn normalize_credentials(headers: &mut HeaderMap) {
    if let Some(token) = credential_from_headers(headers) {
        if let Err(e) = set_credential_header(headers, &token) {
            error!(error = %e, "Could not set credential header");
        }
    }
}

/// Forward an authorized request to its backend and stream the response back.
///
/// Applied only after a `Forward` decision. Transport failures (unreachable
/// backend, TLS failure) surface as a 502 to the client and are not retried.
/// CORS headers are attached to every response, success or backend error.
pub async fn forward(
    state: &GatewayState,
    service: &Service,
    request: Request<Body>,
    grpc_status: u32,
) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let url = target_url(service, &parts.uri);

    let mut headers = parts.headers.clone();
    normalize_credentials(&mut headers);

    // Hop-by-hop headers are per-connection; the body is re-framed as a
    // stream, so the original content-length no longer applies either.
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::CONTENT_LENGTH);

    // The backend sees itself as the request host.
    match HeaderValue::from_str(&service.address) {
        Ok(host) => {
            headers.insert(header::HOST, host);
        }
        Err(e) => {
            error!(address = %service.address, error = %e, "Invalid backend address");
        }
    }

    // Extra headers from the service descriptor are additive - they may
    // duplicate a header the client already set.
    for (name, value) in &service.headers {
        headers.append(name.clone(), value.clone());
    }

    debug!(service = %service.name, url = %url, "Forwarding request to backend");

    let result = state
        .client
        .request(parts.method.clone(), url.as_str())
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    let backend_response = match result {
        Ok(response) => response,
        Err(e) => {
            error!(service = %service.name, error = %e, "Backend dispatch failed");
            return send_direct(
                &parts.headers,
                StatusCode::BAD_GATEWAY,
                "backend dispatch failure",
                grpc_status,
            );
        }
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = backend_response.status();

    for (name, value) in backend_response.headers() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    add_cors_headers(response.headers_mut());

    *response.body_mut() = Body::from_stream(backend_response.bytes_stream());
    response
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::gateway::service::Service;

    fn service(address: &str, protocol: &str) -> Service {
        let mut headers = std::collections::HashMap::new();
        headers.insert("x-extra".to_string(), "added".to_string());
        Service::from_config(&ServiceConfig {
            name: "backend".to_string(),
            host_regexp: ".*".to_string(),
            address: address.to_string(),
            protocol: protocol.to_string(),
            auth: "off".to_string(),
            headers,
            ..ServiceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn target_url_preserves_path_and_query() {
        let service = service("backend:10009", "https");
        let uri: axum::http::Uri = "http://gateway.example/v1/rates?pair=btc".parse().unwrap();
        assert_eq!(
            target_url(&service, &uri),
            "https://backend:10009/v1/rates?pair=btc"
        );
    }

    #[test]
    fn target_url_defaults_to_root_path() {
        let service = service("backend:10009", "http");
        let uri: axum::http::Uri = "http://gateway.example".parse().unwrap();
        assert_eq!(target_url(&service, &uri), "http://backend:10009/");
    }

    #[test]
    fn credential_variants_normalize_to_canonical() {
        let mut headers = HeaderMap::new();
        headers.insert("grpc-metadata-macaroon", "mac".parse().unwrap());
        normalize_credentials(&mut headers);
        assert_eq!(headers.get("authorization").unwrap(), "L402 mac");
    }

    #[test]
    fn anonymous_requests_pass_normalization_unchanged() {
        let mut headers = HeaderMap::new();
        normalize_credentials(&mut headers);
        assert!(headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn forward_streams_backend_response_with_cors() {
        use axum::{Router, routing::get};

        // A backend that echoes a marker header and checks the rewrite.
        let app = Router::new().route(
            "/v1/echo",
            get(|headers: HeaderMap| async move {
                assert_eq!(headers.get("x-extra").unwrap(), "added");
                assert_eq!(headers.get("authorization").unwrap(), "L402 tok");
                ([("x-backend", "yes")], "backend body")
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let state = GatewayState::build(&[]).unwrap();
        let service = service(&addr.to_string(), "http");

        let request = Request::builder()
            .method("GET")
            .uri("http://gateway.example/v1/echo")
            .header("authorization", "LSAT tok")
            .body(Body::empty())
            .unwrap();

        let response = forward(&state, &service, request, 13).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-backend").unwrap(), "yes");
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&body[..], b"backend body");
    }

    #[tokio::test]
    async fn unreachable_backend_becomes_502() {
        let state = GatewayState::build(&[]).unwrap();
        // Nothing listens on this port.
        let service = service("127.0.0.1:1", "http");

        let request = Request::builder()
            .uri("http://gateway.example/x")
            .body(Body::empty())
            .unwrap();

        let response = forward(&state, &service, request, 13).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
