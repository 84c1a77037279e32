//! # mimiq-core
//!
//! Shared primitives for the mimiq Cloud Tasks emulator.
//!
//! This crate provides the foundational types used across all mimiq components:
//!
//! - **Resource Names**: Strongly-typed queue and task names with grammar validation
//! - **Clock**: The single source of "now" and delayed firings, substitutable in tests
//! - **OIDC Signer**: Process-lifetime RSA key pair for self-signed ID tokens
//! - **Error Types**: The client-facing error taxonomy shared by engine and API
//!
//! ## Crate Boundary
//!
//! `mimiq-core` is the only crate allowed to define shared primitives.
//! The dispatch engine (`mimiq-flow`) and the HTTP facade (`mimiq-api`)
//! both build on the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod clock;
pub mod error;
pub mod name;
pub mod observability;
pub mod oidc;

pub use clock::{Clock, SystemClock, TestClock};
pub use error::{Error, Result};
pub use name::{LocationPath, QueueName, TaskName};
pub use observability::{LogFormat, init_logging};
pub use oidc::{DiscoveryDocument, JwkSet, OidcSigner, DEFAULT_ISSUER};
