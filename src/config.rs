//! Environment-sourced application configuration.

use serde::Deserialize;

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_shutdown_timeout() -> u64 {
    10
}

/// Application configuration, extracted from environment variables via figment.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Postgres connection string (the score database).
    pub database_url: String,
    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base log level for the crate's own modules.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds to wait for in-flight requests on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}
