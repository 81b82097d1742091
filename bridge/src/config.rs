use anyhow::{Context, Result};
use clap::Parser;
use uwsgi_interface::DEFAULT_CONTENT_TYPE;

/// Bridge settings. uWSGI owns the process arguments, so these only come
/// from the environment (and a `.env` file, if present).
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "uwsgi-rust")]
#[command(about = "Rust request handler bridge for uWSGI", long_about = None)]
pub struct BridgeConfig {
    /// Tracing filter directives (e.g. `info,uwsgi_rust=debug`)
    #[arg(long, env = "UWSGI_RUST_LOG", default_value = "info")]
    pub log_filter: String,

    /// Colour log output
    #[arg(long, env = "UWSGI_RUST_LOG_ANSI", default_value = "false")]
    pub log_ansi: bool,

    /// Name of the uWSGI plugin signal registrations are tagged with
    #[arg(long, env = "UWSGI_RUST_PLUGIN", default_value = "rust")]
    pub plugin_name: String,

    /// Content-Type sent when a handler sets none
    #[arg(long, env = "UWSGI_RUST_DEFAULT_CONTENT_TYPE", default_value = DEFAULT_CONTENT_TYPE)]
    pub default_content_type: String,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::try_parse_from(["uwsgi-rust"]).context("Failed to read bridge configuration")
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_ansi: false,
            plugin_name: "rust".to_string(),
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}
