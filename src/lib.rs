//! Tollgate - Paywall Reverse Proxy
//!
//! A gateway that sits in front of HTTP and gRPC backend services and decides,
//! per request, whether to forward it, challenge the caller with an HTTP 402,
//! or fail it. Authorization comes in three levels per service: open, paid
//! (credential required) and limited-free (a per-client freebie budget before
//! a credential is required).
//!
//! # Features
//!
//! - **Dual-protocol errors**: plain HTTP clients get text bodies, gRPC
//!   clients get `grpc-status`/`grpc-message` metadata headers
//! - **Streaming dispatch**: proxied responses are flushed chunk by chunk,
//!   suitable for long-lived backend streams
//! - **Live reconfiguration**: the service set and backend trust pool are
//!   swapped atomically; in-flight requests finish on their old snapshot
//! - **Pluggable collaborators**: authenticator, freebie tracker and pricer
//!   are traits, not hardwired implementations

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod freebie;
pub mod gateway;
pub mod pricer;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
