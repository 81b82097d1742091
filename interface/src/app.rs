use http::Request;

use crate::body::RequestBody;
use crate::mux::{Handler, ServeMux};
use crate::writer::ResponseWriter;

/// The contract an application implements to be served by the bridge.
pub trait AppInterface: Send + Sync {
    /// Called once at startup, before the server is initialised.
    fn banner(&self) {}

    /// Called in each worker after `fork()`.
    fn post_fork(&self) {}

    /// Called once the engine has been initialised.
    fn post_init(&self) {}

    /// Called for every request. The response must be written through `w`
    /// before returning; nothing is sent if the handler writes nothing.
    fn request_handler(&self, w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>);
}

/// Default application: every request goes through a [`ServeMux`].
#[derive(Debug, Default)]
pub struct App {
    mux: ServeMux,
}

impl App {
    pub fn new(mux: ServeMux) -> Self {
        Self { mux }
    }

    pub fn mux(&self) -> &ServeMux {
        &self.mux
    }

    pub fn mux_mut(&mut self) -> &mut ServeMux {
        &mut self.mux
    }
}

impl AppInterface for App {
    fn request_handler(&self, w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
        self.mux.serve(w, r);
    }
}
