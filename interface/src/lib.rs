//! What application code is written against.
//!
//! An application implements [`AppInterface`]; the bridge hands it a
//! [`ResponseWriter`] and an `http::Request` whose body reads straight from
//! the native request.

mod app;
mod body;
mod error;
mod mux;
mod writer;

pub use app::{App, AppInterface};
pub use body::RequestBody;
pub use error::{BridgeError, BridgeResult};
pub use mux::{Handler, ServeMux, not_found};
pub use writer::{RecordedResponse, ResponseWriter};

pub use bytes;
pub use http;

/// Content-Type sent when a handler commits headers without setting one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";
