//! # mimiq-api
//!
//! HTTP/JSON facade for the mimiq Cloud Tasks emulator.
//!
//! This crate is responsible for:
//! - The Cloud Tasks v2 REST surface (queues, tasks, and their verbs)
//! - The OIDC discovery and JWKS endpoints backing token verification
//! - Translating between wire resources and engine types
//! - Process configuration and the `mimiq` server binary
//!
//! The dispatch semantics live in `mimiq-flow`; handlers here only
//! decode requests, call the registry, and encode responses.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;
pub mod wire;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{AppState, Server};
