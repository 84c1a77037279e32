//! Route handlers for the v2 REST surface and the OIDC endpoints.

pub mod oidc;
pub mod queues;
pub mod tasks;
