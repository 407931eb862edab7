//! Gateway module - routing, authorization, dispatch and serving

pub mod dispatch;
pub mod handler;
pub mod reconcile;
pub mod respond;
pub mod server;
pub mod service;

pub use handler::{AppState, AuthDecision};
pub use reconcile::{GatewayState, LiveState};
pub use server::Gateway;
pub use service::{AuthLevel, Service, ServiceRegistry};
