use std::sync::Arc;

use once_cell::sync::Lazy;
use uwsgi_hello::{HelloApp, WORKER_SIGNAL};
use uwsgi_rust::native::{CoreEvent, MemoryCore, NativeCore, RequestHandle};
use uwsgi_rust::{Bridge, BridgeConfig};

static CORE: Lazy<Arc<MemoryCore>> = Lazy::new(|| Arc::new(MemoryCore::new()));
static BRIDGE: Lazy<&'static Bridge> = Lazy::new(|| {
    let core: Arc<dyn NativeCore> = CORE.clone();
    Bridge::new(core, Arc::new(HelloApp::new()), BridgeConfig::default())
        .unwrap()
        .install()
        .unwrap()
});

fn request(method: &str, uri: &str, body: &[u8]) -> RequestHandle {
    let bridge = *BRIDGE;
    let req = CORE.open_request();
    if !body.is_empty() {
        CORE.push_body(req, body.to_vec());
    }
    let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
    let len = body.len().to_string();

    let env = bridge.env_new(req);
    for (key, value) in [
        ("REQUEST_METHOD", method),
        ("PATH_INFO", path),
        ("QUERY_STRING", query),
        ("SERVER_PROTOCOL", "HTTP/1.1"),
        ("HTTP_HOST", "localhost"),
        ("CONTENT_LENGTH", len.as_str()),
        ("CONTENT_TYPE", "text/plain"),
    ] {
        bridge.env_add(env, key.as_bytes(), value.as_bytes());
    }
    bridge.dispatch(env, req);
    req
}

fn body_of(req: RequestHandle) -> String {
    let wire = CORE.wire_text(req);
    wire.split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default()
}

#[test]
fn hello_over_the_bridge() {
    let req = request("GET", "/hello?name=uWSGI", b"");
    assert_eq!(CORE.status(req), Some(200));
    assert!(CORE.wire_text(req).contains("Content-Type: text/plain; charset=utf-8\r\n"));
    assert_eq!(body_of(req), "Hello, uWSGI!\n");
}

#[test]
fn echo_streams_body_back() {
    let req = request("POST", "/echo", b"ping pong");
    assert_eq!(CORE.status(req), Some(200));
    assert!(CORE.wire_text(req).contains("Content-Type: text/plain\r\n"));
    assert_eq!(body_of(req), "ping pong");
}

#[test]
fn cache_round_trip() {
    let put = request("PUT", "/cache/greeting?ttl=30", b"hi there");
    assert_eq!(CORE.status(put), Some(201));
    assert!(CORE.events().contains(&CoreEvent::CacheSet { flags: 0, expires: 30 }));

    let get = request("GET", "/cache/greeting", b"");
    assert_eq!(CORE.status(get), Some(200));
    assert!(CORE.wire_text(get).contains("Content-Type: application/octet-stream\r\n"));
    assert_eq!(body_of(get), "hi there");

    let delete = request("DELETE", "/cache/greeting", b"");
    assert_eq!(CORE.status(delete), Some(204));

    let miss = request("GET", "/cache/greeting", b"");
    assert_eq!(CORE.status(miss), Some(404));
}

#[test]
fn cache_rejects_unknown_methods_and_empty_keys() {
    let patch = request("PATCH", "/cache/k", b"");
    assert_eq!(CORE.status(patch), Some(405));
    assert!(CORE.wire_text(patch).contains("Allow: GET, PUT, POST, DELETE\r\n"));

    let empty = request("GET", "/cache/", b"");
    assert_eq!(CORE.status(empty), Some(400));
}

#[test]
fn unknown_paths_are_404() {
    let req = request("GET", "/missing", b"");
    assert_eq!(CORE.status(req), Some(404));
    assert_eq!(body_of(req), "404 page not found\n");
}

#[test]
fn post_fork_registers_worker_signal() {
    let bridge = *BRIDGE;
    bridge.post_fork();

    assert!(CORE.signal_registered(WORKER_SIGNAL));
    assert_eq!(bridge.dispatch_signal(WORKER_SIGNAL), 0);
}
