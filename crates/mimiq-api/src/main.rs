//! `mimiq` binary entrypoint.
//!
//! Parses configuration from flags and environment variables, then runs
//! the emulator until interrupted.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;
use clap::Parser;

use mimiq_api::{Config, Server};
use mimiq_core::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.log_format());

    let server = Server::new(config)?;
    server.serve().await
}
