//! Detour - request interception and URL rewriting for web archive record/replay
//!
//! Every outgoing request of a recorded or replayed page is routed through a
//! pure decision function (`Router`) and a thin hyper adapter that performs the
//! actual I/O.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod namespace;
pub mod network;
pub mod proxy;
pub mod registrar;
pub mod request;
pub mod rewrite;
pub mod routing;

pub use error::{DetourError, Result};
