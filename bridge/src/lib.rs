//! Serve Rust HTTP handlers from inside uWSGI.
//!
//! The uWSGI core owns sockets, parsing and process supervision. For every
//! request it builds an environment through the exported entry points in
//! [`exports`], then asks the installed [`Bridge`] to dispatch it to the
//! application's [`AppInterface`]. Responses go straight back through the
//! core via a [`ResponseSink`].

mod bridge;
mod capabilities;
mod config;
mod environ;
pub mod exports;
mod logging;
pub mod native;
mod registry;
mod request;
mod response;

pub use bridge::Bridge;
pub use capabilities::Capabilities;
pub use config::BridgeConfig;
pub use environ::{Environment, EnvironmentStore};
pub use logging::init_tracing;
pub use registry::{HandleRegistry, SignalCallback, SignalTable};
pub use request::{BodyReader, RemoteAddr, build_request};
pub use response::{ResponseSink, canonical_header_name, header_block, sanitize_header_value};
pub use uwsgi_interface::{
    self as interface, App, AppInterface, BridgeError, BridgeResult, Handler, RequestBody,
    ResponseWriter, ServeMux,
};

/// Native services of the installed bridge, if there is one.
pub fn capabilities() -> Option<Capabilities<'static>> {
    Bridge::installed().map(Bridge::capabilities)
}

/// Boot uWSGI with `app` as the request handler. Returns once the core
/// has taken over the process arguments.
#[cfg(feature = "libuwsgi")]
pub fn run(app: impl AppInterface + 'static) -> anyhow::Result<()> {
    use std::sync::Arc;

    use anyhow::Context;

    let config = BridgeConfig::from_env()?;
    init_tracing(&config);

    let bridge = Bridge::new(Arc::new(native::UwsgiCore), Arc::new(app), config)?
        .install()
        .context("Failed to install bridge")?;
    bridge.app().banner();

    native::UwsgiCore::boot(std::env::args()).context("Failed to start uWSGI")
}
