//! # mimiq-flow
//!
//! The dispatch engine of the mimiq Cloud Tasks emulator.
//!
//! This crate implements the emulator's core semantics:
//!
//! - **Queues**: named containers with rate limits, a concurrency cap, and
//!   a retry policy, each driving its own long-running dispatch loop
//! - **Tasks**: future outbound HTTP requests with retry state and timers
//! - **Token bucket**: `max_dispatches_per_second` / `max_burst_size`
//!   enforcement with continuous fractional refill
//! - **Retry machine**: exponential backoff with doubling cap and retry
//!   duration limits
//! - **Registry**: the process-wide queue map and the tombstone set of
//!   ever-issued task names
//!
//! The engine is time-agnostic: all scheduling goes through the
//! [`mimiq_core::Clock`] abstraction, so tests drive it with a virtual
//! clock. Outbound HTTP goes through the [`dispatch::Dispatcher`] trait;
//! production wires in the reqwest-backed [`dispatch::HttpDispatcher`].

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod dispatch;
pub mod queue;
pub mod rate;
pub mod registry;
pub mod retry;
pub mod task;

pub use config::{AppEngineRouting, QueueConfig, RateLimits, RetryConfig};
pub use dispatch::{DispatchOutcome, DispatchRequest, Dispatcher, HttpDispatcher};
pub use queue::{QueueSnapshot, QueueState};
pub use registry::{Registry, RegistryOptions};
pub use task::{
    AppEngineTarget, Attempt, HttpTarget, NewTask, OidcTokenSpec, TaskPayload, TaskSnapshot,
};
