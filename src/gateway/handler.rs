//! The request pipeline: access logging, the OPTIONS short-circuit, service
//! matching, the auth decision engine, and dispatch.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, Request, Response, StatusCode, header},
};
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, error, info};

use crate::auth::Authenticator;
use crate::config::StaticConfig;
use crate::gateway::dispatch;
use crate::gateway::reconcile::LiveState;
use crate::gateway::respond::{payment_required, send_direct};
use crate::gateway::service::{AuthLevel, Service};
use crate::pricer::Pricer;

/// Shared application state
pub struct AppState {
    /// Live (registry, transport) snapshot holder
    pub live: LiveState,
    /// Credential validator / challenge minter
    pub authenticator: Arc<dyn Authenticator>,
    /// Price source for dynamically priced services
    pub pricer: Option<Arc<dyn Pricer>>,
    /// Fallback for requests that match no service
    pub static_handler: StaticHandler,
    /// gRPC status code reported on direct error responses
    pub grpc_error_status: u32,
}

/// Outcome of the auth decision engine for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Pass the request to the backend
    Forward,
    /// Challenge the caller with a 402
    Challenge,
    /// A collaborator failed; answer 500 with this message
    InternalError(String),
}

/// Fallback for unmatched requests. The default only returns 404 answers for
/// security reasons; serving files has to be enabled intentionally.
pub enum StaticHandler {
    /// Respond 404 to everything
    NotFound,
    /// Serve files from a directory
    Dir(ServeDir),
}

impl StaticHandler {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &StaticConfig) -> Self {
        if config.enabled {
            Self::Dir(ServeDir::new(&config.root))
        } else {
            Self::NotFound
        }
    }

    /// Handle an unmatched request.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        match self {
            Self::NotFound => {
                let mut response = Response::new(Body::from("404 page not found\n"));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
            Self::Dir(dir) => match dir.clone().oneshot(request).await {
                Ok(response) => response.map(Body::new),
                Err(never) => match never {},
            },
        }
    }
}

/// Decide whether a request may pass to its matched service.
///
/// Credential validity is checked before quota consumption so that
/// authenticated callers never burn free quota; the freebie path is only a
/// fallback for anonymous callers. The `can_pass`/`tally` pair is two calls -
/// an accepted approximate limit near the budget boundary.
pub async fn authorize(
    service: &Service,
    headers: &HeaderMap,
    path: &str,
    authenticator: &dyn Authenticator,
    identity: IpAddr,
) -> AuthDecision {
    match service.auth_level(path) {
        AuthLevel::Open => AuthDecision::Forward,

        AuthLevel::Paid => {
            if authenticator.accept(headers, &service.name).await {
                AuthDecision::Forward
            } else {
                AuthDecision::Challenge
            }
        }

        AuthLevel::LimitedFree { .. } => {
            // A valid credential always overrides the freebie path.
            if authenticator.accept(headers, &service.name).await {
                return AuthDecision::Forward;
            }

            let Some(freebie) = service.freebie.as_ref() else {
                error!(service = %service.name, "Limited-free service without freebie tracker");
                return AuthDecision::InternalError("freebie DB failure".to_string());
            };

            match freebie.can_pass(identity).await {
                Err(e) => {
                    error!(service = %service.name, error = %e, "Error querying freebie db");
                    AuthDecision::InternalError("freebie DB failure".to_string())
                }
                Ok(false) => AuthDecision::Challenge,
                Ok(true) => match freebie.tally(identity).await {
                    Err(e) => {
                        error!(service = %service.name, error = %e, "Error updating freebie db");
                        AuthDecision::InternalError("freebie DB failure".to_string())
                    }
                    Ok(_) => AuthDecision::Forward,
                },
            }
        }
    }
}

/// Resolve the price to advertise in a challenge for `service`.
async fn resolve_price(
    service: &Service,
    pricer: Option<&Arc<dyn Pricer>>,
    path: &str,
) -> crate::Result<i64> {
    match (service.dynamic_price, pricer) {
        (true, Some(pricer)) => pricer.get_price(path).await,
        _ => Ok(service.price),
    }
}

/// Host the request was addressed to: the URI authority when present
/// (HTTP/2), the `Host` header otherwise.
fn request_host(request: &Request<Body>) -> String {
    if let Some(authority) = request.uri().authority() {
        return authority.to_string();
    }
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// The gateway entry point: checks a client's headers for appropriate
/// authorization and either returns a challenge or forwards the request to
/// the target backend service.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    // Capture the access-log fields before the request is consumed.
    let remote_ip = addr.ip();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();
    let referer = header_str(request.headers(), header::REFERER);
    let user_agent = header_str(request.headers(), header::USER_AGENT);

    let response = route(&state, remote_ip, request).await;

    // Loosely oriented on the apache combined log format.
    info!(
        "{} - - \"{} {} {:?}\" \"{}\" \"{}\"",
        remote_ip, method, uri, version, referer, user_agent
    );

    response
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn route(state: &AppState, remote_ip: IpAddr, request: Request<Body>) -> Response<Body> {
    // For OPTIONS requests we only need to set the CORS headers, not serve
    // any content. Browser preflights never reach the decision engine.
    if request.method() == Method::OPTIONS {
        return send_direct(
            request.headers(),
            StatusCode::OK,
            "",
            state.grpc_error_status,
        );
    }

    // Every component below reads this one consistent snapshot.
    let snapshot = state.live.load();

    let host = request_host(&request);
    let path = request.uri().path().to_string();

    let Some(service) = snapshot.registry.match_service(&host, &path) else {
        // Requests that can't be matched to a service backend are dispatched
        // to the static file server, which answers 404 for missing paths.
        debug!(path = %path, "Dispatching request to static file server");
        return state.static_handler.serve(request).await;
    };

    let decision = authorize(
        service,
        request.headers(),
        &path,
        state.authenticator.as_ref(),
        remote_ip,
    )
    .await;

    match decision {
        AuthDecision::Forward => {
            dispatch::forward(&snapshot, service, request, state.grpc_error_status).await
        }

        AuthDecision::Challenge => {
            let price = match resolve_price(service, state.pricer.as_ref(), &path).await {
                Ok(price) => price,
                Err(e) => {
                    error!(service = %service.name, error = %e, "Error querying price");
                    return send_direct(
                        request.headers(),
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "price lookup failure",
                        state.grpc_error_status,
                    );
                }
            };
            payment_required(
                state.authenticator.as_ref(),
                request.headers(),
                &service.name,
                price,
                state.grpc_error_status,
            )
            .await
        }

        AuthDecision::InternalError(message) => send_direct(
            request.headers(),
            StatusCode::INTERNAL_SERVER_ERROR,
            &message,
            state.grpc_error_status,
        ),
    }
}
