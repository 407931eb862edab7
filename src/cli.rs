//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Tollgate - paywall reverse proxy for HTTP and gRPC backends
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TOLLGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TOLLGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TOLLGATE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TOLLGATE_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Serve files from the static root for unmatched requests
    #[arg(long)]
    pub serve_static: bool,

    /// Directory served for requests that match no service
    #[arg(long, env = "TOLLGATE_STATIC_ROOT")]
    pub static_root: Option<PathBuf>,
}
