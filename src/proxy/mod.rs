//! Adapter between hyper and the routers
//!
//! Turns incoming HTTP requests into [`crate::request::Request`] values, asks
//! the active router for a decision, and performs the resulting I/O.

mod http;

pub use http::InterceptProxy;
