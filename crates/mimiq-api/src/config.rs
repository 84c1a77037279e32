//! Server configuration.
//!
//! Flags and `MIMIQ_*` environment variables, parsed with clap. Initial
//! queue names are validated up front so a typo aborts startup instead of
//! surfacing as runtime NOT_FOUND errors.

use clap::Parser;

use mimiq_core::{LogFormat, QueueName, Result};
use mimiq_flow::RegistryOptions;

/// Process configuration for the emulator.
#[derive(Debug, Clone, Parser)]
#[command(name = "mimiq", about = "Local Cloud Tasks v2 emulator", version)]
pub struct Config {
    /// Interface to listen on.
    #[arg(long, env = "MIMIQ_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "MIMIQ_PORT", default_value_t = 8123)]
    pub port: u16,

    /// Fully qualified queue name to create at startup. Repeatable;
    /// the environment variable takes a comma-separated list.
    #[arg(long = "initial-queue", env = "MIMIQ_INITIAL_QUEUES", value_delimiter = ',')]
    pub initial_queues: Vec<String>,

    /// Base host for rewriting App Engine task targets. App Engine
    /// dispatch fails non-retryably when unset.
    #[arg(long, env = "MIMIQ_APP_ENGINE_EMULATOR_HOST")]
    pub app_engine_emulator_host: Option<String>,

    /// Issuer for minted OIDC tokens; setting it also enables the
    /// discovery endpoint.
    #[arg(long, env = "MIMIQ_OPENID_ISSUER")]
    pub openid_issuer: Option<String>,

    /// Make PurgeQueue synchronous and forget the purged queue's task
    /// names.
    #[arg(long, env = "MIMIQ_HARD_RESET_ON_PURGE_QUEUE")]
    pub hard_reset_on_purge_queue: bool,

    /// Pretty-printed logs for development.
    #[arg(long, env = "MIMIQ_DEBUG")]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8123,
            initial_queues: Vec::new(),
            app_engine_emulator_host: None,
            openid_issuer: None,
            hard_reset_on_purge_queue: false,
            debug: false,
        }
    }
}

impl Config {
    /// Parses and validates the configured initial queue names.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for any malformed name.
    pub fn initial_queue_names(&self) -> Result<Vec<QueueName>> {
        self.initial_queues.iter().map(|name| name.parse()).collect()
    }

    /// Engine options derived from this configuration.
    #[must_use]
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            app_engine_emulator_host: self.app_engine_emulator_host.clone(),
            hard_reset_on_purge_queue: self.hard_reset_on_purge_queue,
        }
    }

    /// Log format selected by the debug flag.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        if self.debug {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}
