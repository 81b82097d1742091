use std::ffi::{c_char, c_int};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use uwsgi_ffi::signal_tag;
use uwsgi_rust::exports::*;
use uwsgi_rust::native::{CoreEvent, MemoryCore, NativeCore, RequestHandle};
use uwsgi_rust::{App, AppInterface, Bridge, BridgeConfig, RequestBody, ResponseWriter, ServeMux};

struct TestApp {
    inner: App,
    forks: AtomicUsize,
    inits: AtomicUsize,
}

impl AppInterface for TestApp {
    fn post_fork(&self) {
        self.forks.fetch_add(1, Ordering::SeqCst);
    }

    fn post_init(&self) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn request_handler(&self, w: &mut dyn ResponseWriter, r: http::Request<RequestBody<'_>>) {
        self.inner.request_handler(w, r);
    }
}

static CORE: Lazy<Arc<MemoryCore>> = Lazy::new(|| Arc::new(MemoryCore::new()));
static APP: Lazy<Arc<TestApp>> = Lazy::new(|| {
    let mut mux = ServeMux::new();
    mux.handle_fn("/ping", |w: &mut dyn ResponseWriter, _r| {
        w.write_body(b"pong").unwrap();
    })
    .handle_fn("/panic", |_w: &mut dyn ResponseWriter, _r| {
        panic!("handler exploded");
    });
    Arc::new(TestApp {
        inner: App::new(mux),
        forks: AtomicUsize::new(0),
        inits: AtomicUsize::new(0),
    })
});
static BRIDGE: Lazy<&'static Bridge> = Lazy::new(|| {
    let core: Arc<dyn NativeCore> = CORE.clone();
    let app: Arc<dyn AppInterface> = APP.clone();
    Bridge::new(core, app, BridgeConfig::default())
        .unwrap()
        .install()
        .unwrap()
});

fn setup() -> &'static MemoryCore {
    Lazy::force(&BRIDGE);
    &CORE
}

fn add(env: usize, key: &str, value: &str) -> c_int {
    unsafe {
        uwsgi_rust_helper_env_add(
            env,
            key.as_ptr().cast::<c_char>(),
            key.len() as c_int,
            value.as_ptr().cast::<c_char>(),
            value.len() as c_int,
        )
    }
}

fn serve(core: &MemoryCore, path: &str) -> (RequestHandle, c_int) {
    let req = core.open_request();
    let env = uwsgi_rust_helper_env_new(req.as_ptr());
    assert_eq!(env, req.token());
    assert_eq!(add(env, "REQUEST_METHOD", "GET"), 0);
    assert_eq!(add(env, "PATH_INFO", path), 0);
    (req, uwsgi_rust_helper_request(env, req.as_ptr()))
}

#[test]
fn request_round_trip_through_exports() {
    let core = setup();

    let (req, rc) = serve(core, "/ping");

    assert_eq!(rc, 0);
    assert_eq!(
        core.wire_text(req),
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\npong"
    );
}

#[test]
fn panicking_handler_does_not_unwind_into_the_core() {
    let core = setup();

    let (_, rc) = serve(core, "/panic");
    assert_eq!(rc, -1);

    let (req, rc) = serve(core, "/ping");
    assert_eq!(rc, 0);
    assert!(core.wire_text(req).ends_with("pong"));
}

#[test]
fn invalid_arguments_are_absorbed() {
    let core = setup();

    assert_eq!(uwsgi_rust_helper_env_new(std::ptr::null_mut()), 0);
    assert_eq!(uwsgi_rust_helper_request(0, std::ptr::null_mut()), -1);
    assert_eq!(uwsgi_rust_helper_env_free(0), -1);

    let req = core.open_request();
    let env = uwsgi_rust_helper_env_new(req.as_ptr());
    let rc = unsafe { uwsgi_rust_helper_env_add(env, std::ptr::null(), 4, std::ptr::null(), 0) };
    assert_eq!(rc, -1);
    let key = "K";
    let rc = unsafe {
        uwsgi_rust_helper_env_add(env, key.as_ptr().cast(), -1, key.as_ptr().cast(), 1)
    };
    assert_eq!(rc, -1);
    assert_eq!(add(0xdead0, "K", "V"), -1);

    assert_eq!(uwsgi_rust_helper_env_free(env), 0);
    assert_eq!(uwsgi_rust_helper_env_free(env), -1);
    assert_eq!(uwsgi_rust_helper_request(env, req.as_ptr()), 0);
    assert!(core.wire(req).is_empty());
}

#[test]
fn signals_dispatch_by_number() {
    setup();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let caps = uwsgi_rust::capabilities().unwrap();

    assert!(caps.register_signal(42, "worker", move |signum| {
        counter.fetch_add(usize::from(signum), Ordering::SeqCst);
    }));

    assert_eq!(uwsgi_rust_helper_signal_handler(42, signal_tag(42)), 0);
    assert_eq!(uwsgi_rust_helper_signal_handler(43, signal_tag(43)), -1);
    assert_eq!(uwsgi_rust_helper_signal_handler(300, std::ptr::null_mut()), -1);
    assert_eq!(uwsgi_rust_helper_signal_handler(-1, std::ptr::null_mut()), -1);
    assert_eq!(hits.load(Ordering::SeqCst), 42);

    let zero = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&zero);
    assert!(caps.register_signal(0, "worker", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(!signal_tag(0).is_null());
    assert_eq!(uwsgi_rust_helper_signal_handler(0, signal_tag(0)), 0);
    assert_eq!(zero.load(Ordering::SeqCst), 1);
}

#[test]
fn lifecycle_hooks_reach_the_app() {
    setup();
    uwsgi_rust_helper_post_fork();
    uwsgi_rust_helper_post_init();
    assert!(APP.forks.load(Ordering::SeqCst) >= 1);
    assert!(APP.inits.load(Ordering::SeqCst) >= 1);
}

#[test]
fn run_core_starts_the_core_loop() {
    let core = setup();
    uwsgi_rust_helper_run_core(7);

    for _ in 0..200 {
        if core.events().contains(&CoreEvent::CoreLoop(7)) {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("core loop 7 never ran");
}

#[test]
fn second_install_is_refused() {
    setup();
    let core: Arc<dyn NativeCore> = Arc::new(MemoryCore::new());
    let bridge = Bridge::new(core, Arc::new(App::default()), BridgeConfig::default()).unwrap();
    assert!(bridge.install().is_err());
}
