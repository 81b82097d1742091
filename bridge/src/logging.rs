use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

/// Install the global fmt subscriber. Returns false if the host process
/// already installed one, which is then left in place.
pub fn init_tracing(config: &BridgeConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?} ({err}); falling back to info", config.log_filter);
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.log_ansi)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
