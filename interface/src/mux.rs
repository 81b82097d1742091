use std::fmt;
use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use http::{Request, StatusCode};
use tracing::{debug, warn};

use crate::body::RequestBody;
use crate::writer::ResponseWriter;

/// Anything that can answer a request.
pub trait Handler: Send + Sync {
    fn serve(&self, w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>);
}

impl<F> Handler for F
where
    F: for<'a> Fn(&mut dyn ResponseWriter, Request<RequestBody<'a>>) + Send + Sync,
{
    fn serve(&self, w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
        self(w, r)
    }
}

struct Route {
    pattern: String,
    handler: Arc<dyn Handler>,
}

/// Path-based request router.
///
/// A pattern ending in `/` matches its whole subtree, any other pattern only
/// the exact path. The longest matching pattern wins.
#[derive(Default)]
pub struct ServeMux {
    routes: Vec<Route>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern`, replacing an earlier registration.
    pub fn handle(&mut self, pattern: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        let pattern = pattern.into();
        let handler: Arc<dyn Handler> = Arc::new(handler);
        match self.routes.iter_mut().find(|route| route.pattern == pattern) {
            Some(route) => {
                debug!("replacing handler for {pattern}");
                route.handler = handler;
            }
            None => self.routes.push(Route { pattern, handler }),
        }
        self
    }

    pub fn handle_fn<F>(&mut self, pattern: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(&mut dyn ResponseWriter, Request<RequestBody<'a>>) + Send + Sync + 'static,
    {
        self.handle(pattern, f)
    }

    /// The pattern that would serve `path`, if any.
    pub fn matched_pattern(&self, path: &str) -> Option<&str> {
        self.lookup(path).map(|route| route.pattern.as_str())
    }

    fn lookup(&self, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| pattern_matches(&route.pattern, path))
            .max_by_key(|route| route.pattern.len())
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

impl Handler for ServeMux {
    fn serve(&self, w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
        match self.lookup(r.uri().path()) {
            Some(route) => route.handler.serve(w, r),
            None => not_found(w),
        }
    }
}

impl fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|route| &route.pattern))
            .finish()
    }
}

/// Plain-text 404.
pub fn not_found(w: &mut dyn ResponseWriter) {
    let headers = w.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    let result = w
        .write_header(StatusCode::NOT_FOUND)
        .and_then(|_| w.write_body(b"404 page not found\n"));
    if let Err(err) = result {
        warn!("failed to send 404: {err}");
    }
}
