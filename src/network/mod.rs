//! Network layer for Detour
//!
//! Accepts page connections with bounded concurrency and forwards routed
//! requests to the archive backend or their own origin.

mod client;
mod handler;
mod http;

pub use client::{ForwardedResponse, HttpClient};
pub use handler::NetworkHandler;
pub use http::HttpHandler;

/// Maximum number of concurrent connections
pub const MAX_CONNECTIONS: usize = 4096;

/// Upstream connect timeout
pub const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
