//! A small application served through the uWSGI bridge.

use bytes::Bytes;
use http::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use http::{Method, Request, StatusCode, Uri};
use tracing::{info, warn};
use url::form_urlencoded;
use uwsgi_rust::{App, AppInterface, Capabilities, RequestBody, ResponseWriter, ServeMux};

pub const BANNER: &str = "uwsgi-hello: Rust handlers on uWSGI";

/// Signal each worker listens on after fork.
pub const WORKER_SIGNAL: u8 = 17;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub struct HelloApp {
    app: App,
}

impl HelloApp {
    pub fn new() -> Self {
        let mut mux = ServeMux::new();
        mux.handle_fn("/", index)
            .handle_fn("/hello", hello)
            .handle_fn("/echo", echo)
            .handle_fn("/cache/", |w: &mut dyn ResponseWriter, r| {
                cache(w, r, uwsgi_rust::capabilities())
            });
        Self { app: App::new(mux) }
    }

    pub fn mux(&self) -> &ServeMux {
        self.app.mux()
    }
}

impl Default for HelloApp {
    fn default() -> Self {
        Self::new()
    }
}

impl AppInterface for HelloApp {
    fn banner(&self) {
        info!("{BANNER}");
    }

    fn post_fork(&self) {
        let Some(caps) = uwsgi_rust::capabilities() else {
            return;
        };
        let worker = caps.worker_id();
        let registered = caps.register_signal(WORKER_SIGNAL, "worker", move |signum| {
            info!(worker, signum, "worker signalled");
        });
        if !registered {
            warn!(worker, signum = WORKER_SIGNAL, "could not register worker signal");
        }
    }

    fn request_handler(&self, w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
        self.app.request_handler(w, r);
    }
}

fn text(w: &mut dyn ResponseWriter, status: StatusCode, body: &str) {
    w.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    if w.write_header(status).is_ok() && !body.is_empty() {
        if let Err(err) = w.write_body(body.as_bytes()) {
            warn!(%err, %status, "response aborted");
        }
    }
}

fn index(w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
    if r.uri().path() != "/" {
        uwsgi_rust::interface::not_found(w);
        return;
    }
    text(w, StatusCode::OK, &format!("{BANNER}\n"));
}

/// Value of `name` in the query string, form-urlencoded decoded.
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn hello(w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
    let name = query_param(r.uri(), "name")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "World".to_string());
    text(w, StatusCode::OK, &format!("Hello, {name}!\n"));
}

fn echo(w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>) {
    let content_type = r.headers().get(CONTENT_TYPE).cloned();
    let body = match r.into_body().read_to_bytes() {
        Ok(body) => body,
        Err(err) => {
            warn!(%err, "failed to read request body");
            text(w, StatusCode::BAD_REQUEST, "unreadable request body\n");
            return;
        }
    };
    if let Some(content_type) = content_type {
        w.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    if let Err(err) = w.write_body(&body) {
        warn!(%err, "echo response aborted");
    }
}

/// `/cache/<key>` backed by the uWSGI cache: GET reads, PUT and POST store
/// the body (`?ttl=` seconds), DELETE removes.
pub fn cache(w: &mut dyn ResponseWriter, r: Request<RequestBody<'_>>, caps: Option<Capabilities<'_>>) {
    let Some(caps) = caps else {
        text(w, StatusCode::SERVICE_UNAVAILABLE, "cache unavailable\n");
        return;
    };
    let key = r.uri().path().strip_prefix("/cache/").unwrap_or("").to_string();
    if key.is_empty() {
        text(w, StatusCode::BAD_REQUEST, "missing cache key\n");
        return;
    }

    let method = r.method().clone();
    if method == Method::GET {
        match caps.cache_get(&key) {
            Some(value) => send_value(w, value),
            None => text(w, StatusCode::NOT_FOUND, "not cached\n"),
        }
    } else if method == Method::PUT || method == Method::POST {
        let ttl = query_param(r.uri(), "ttl")
            .and_then(|ttl| ttl.parse().ok())
            .unwrap_or(0);
        let value = match r.into_body().read_to_bytes() {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, key = %key, "failed to read value");
                text(w, StatusCode::BAD_REQUEST, "unreadable request body\n");
                return;
            }
        };
        if caps.cache_set(&key, &value, ttl) {
            text(w, StatusCode::CREATED, "");
        } else {
            text(w, StatusCode::INTERNAL_SERVER_ERROR, "cache write failed\n");
        }
    } else if method == Method::DELETE {
        if caps.cache_delete(&key) {
            text(w, StatusCode::NO_CONTENT, "");
        } else {
            text(w, StatusCode::NOT_FOUND, "not cached\n");
        }
    } else {
        w.headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET, PUT, POST, DELETE"));
        text(w, StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
    }
}

fn send_value(w: &mut dyn ResponseWriter, value: Bytes) {
    w.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Err(err) = w.write_body(&value) {
        warn!(%err, "cache response aborted");
    }
}
