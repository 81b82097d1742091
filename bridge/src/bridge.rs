//! The installed bridge: one application, one core, and the state native
//! callbacks need between calls.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use http::header::HeaderValue;
use once_cell::sync::OnceCell;
use tracing::{debug, info};
use uwsgi_interface::{AppInterface, BridgeError, BridgeResult, RequestBody};

use crate::capabilities::Capabilities;
use crate::config::BridgeConfig;
use crate::environ::EnvironmentStore;
use crate::native::{NativeCore, RequestHandle};
use crate::registry::SignalTable;
use crate::request::{BodyReader, build_request};
use crate::response::ResponseSink;

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

pub struct Bridge {
    core: Arc<dyn NativeCore>,
    app: Arc<dyn AppInterface>,
    environments: EnvironmentStore,
    signals: SignalTable,
    modifier1: OnceCell<u8>,
    config: BridgeConfig,
    default_content_type: HeaderValue,
}

impl Bridge {
    pub fn new(
        core: Arc<dyn NativeCore>,
        app: Arc<dyn AppInterface>,
        config: BridgeConfig,
    ) -> Result<Self> {
        let default_content_type = HeaderValue::from_str(&config.default_content_type)
            .with_context(|| {
                format!("Invalid default content type {:?}", config.default_content_type)
            })?;
        Ok(Self {
            core,
            app,
            environments: EnvironmentStore::new(),
            signals: SignalTable::new(),
            modifier1: OnceCell::new(),
            config,
            default_content_type,
        })
    }

    /// Make this the bridge every exported entry point talks to.
    pub fn install(self) -> BridgeResult<&'static Bridge> {
        BRIDGE.set(self).map_err(|_| BridgeError::AlreadyInstalled)?;
        let bridge = BRIDGE.get().ok_or(BridgeError::AlreadyInstalled)?;
        info!(plugin = %bridge.config.plugin_name, "bridge installed");
        Ok(bridge)
    }

    pub fn installed() -> Option<&'static Bridge> {
        BRIDGE.get()
    }

    pub fn app(&self) -> &dyn AppInterface {
        self.app.as_ref()
    }

    pub fn core(&self) -> &dyn NativeCore {
        self.core.as_ref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities<'_> {
        Capabilities::new(
            self.core.as_ref(),
            &self.signals,
            &self.modifier1,
            &self.config.plugin_name,
        )
    }

    /// Start collecting the environment of `req`.
    pub fn env_new(&self, req: RequestHandle) -> RequestHandle {
        self.environments.create(req)
    }

    pub fn env_add(&self, env: RequestHandle, key: &[u8], value: &[u8]) -> bool {
        self.environments.add(env, key, value)
    }

    /// Forget an environment whose request will not be dispatched.
    pub fn env_release(&self, env: RequestHandle) -> bool {
        self.environments.discard(env)
    }

    pub fn pending_environments(&self) -> usize {
        self.environments.pending()
    }

    /// Serve one request on the calling thread.
    ///
    /// The environment is released here whatever the outcome. Unknown
    /// environments and malformed requests produce no response.
    pub fn dispatch(&self, env: RequestHandle, req: RequestHandle) {
        let Some(vars) = self.environments.take(env) else {
            debug!(?env, ?req, "no environment for request; nothing to serve");
            return;
        };
        let body = RequestBody::new(BodyReader::new(self.core.as_ref(), req));
        let request = match build_request(vars, body) {
            Ok(request) => request,
            Err(err) => {
                debug!(?req, %err, "dropping request");
                return;
            }
        };

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let mut sink = ResponseSink::new(
            self.core.as_ref(),
            req,
            request.version(),
            &self.default_content_type,
        );
        self.app.request_handler(&mut sink, request);

        match sink.status() {
            Some(status) => debug!(?req, %method, path = %path, %status, failed = sink.is_failed(), "request served"),
            None => debug!(?req, %method, path = %path, "handler returned without responding"),
        }
    }

    /// Run the callback registered for `signum`: 0 if one ran, -1 otherwise.
    pub fn dispatch_signal(&self, signum: u8) -> i32 {
        match self.signals.get(signum) {
            Some(callback) => {
                callback.call(signum);
                0
            }
            None => {
                debug!(signum, "no callback registered for signal");
                -1
            }
        }
    }

    /// Drive the core's event loop for `core_id` on its own thread.
    pub fn run_core(&self, core_id: i32) -> io::Result<JoinHandle<()>> {
        let core = Arc::clone(&self.core);
        thread::Builder::new()
            .name(format!("uwsgi-core-{core_id}"))
            .spawn(move || {
                debug!(core_id, "core loop starting");
                core.run_core_loop(core_id);
                debug!(core_id, "core loop finished");
            })
    }

    pub fn post_fork(&self) {
        self.app.post_fork();
    }

    pub fn post_init(&self) {
        self.app.post_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{CoreEvent, MemoryCore};
    use http::StatusCode;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uwsgi_interface::{App, ResponseWriter, ServeMux};

    fn demo_app() -> App {
        let mut mux = ServeMux::new();
        mux.handle_fn("/hello", |w: &mut dyn ResponseWriter, _r| {
            w.write_body(b"hi").unwrap();
        })
        .handle_fn("/missing", |w: &mut dyn ResponseWriter, _r| {
            w.write_header(StatusCode::NOT_FOUND).unwrap();
        })
        .handle_fn("/upload", |w: &mut dyn ResponseWriter, r| {
            let mut body = Vec::new();
            r.into_body().read_to_end(&mut body).unwrap();
            write!(w, "{} bytes", body.len()).unwrap();
        })
        .handle_fn("/silent", |_w: &mut dyn ResponseWriter, _r| {});
        App::new(mux)
    }

    fn bridge_with(core: &Arc<MemoryCore>) -> Bridge {
        let core: Arc<dyn NativeCore> = core.clone();
        Bridge::new(core, Arc::new(demo_app()), BridgeConfig::default()).unwrap()
    }

    fn submit(bridge: &Bridge, core: &MemoryCore, vars: &[(&str, &str)]) -> RequestHandle {
        let req = core.open_request();
        let env = bridge.env_new(req);
        for (key, value) in vars {
            assert!(bridge.env_add(env, key.as_bytes(), value.as_bytes()));
        }
        bridge.dispatch(env, req);
        req
    }

    #[test]
    fn get_hello_writes_default_headers_and_body() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);

        let req = submit(&bridge, &core, &[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/hello")]);

        assert_eq!(
            core.wire_text(req),
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\nhi"
        );
        assert_eq!(core.header_writes(req), 1);
        assert_eq!(bridge.pending_environments(), 0);
    }

    #[test]
    fn explicit_404_sends_headers_only() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);

        let req = submit(&bridge, &core, &[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/missing")]);

        assert_eq!(
            core.wire_text(req),
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/html; charset=utf-8\r\n\r\n"
        );
        assert_eq!(core.body_writes(req), 0);
        assert_eq!(core.status(req), Some(404));
    }

    #[test]
    fn body_is_read_through_the_core() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);
        let req = core.open_request();
        core.push_body(req, b"abc".to_vec());
        core.push_body(req, b"defg".to_vec());

        let env = bridge.env_new(req);
        bridge.env_add(env, b"REQUEST_METHOD", b"POST");
        bridge.env_add(env, b"PATH_INFO", b"/upload");
        bridge.env_add(env, b"CONTENT_LENGTH", b"7");
        bridge.dispatch(env, req);

        assert!(core.wire_text(req).ends_with("\r\n\r\n7 bytes"));
    }

    #[test]
    fn unrouted_path_gets_mux_404() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);

        let req = submit(&bridge, &core, &[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/nope")]);

        let wire = core.wire_text(req);
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(wire.ends_with("404 page not found\n"));
    }

    #[test]
    fn missing_environment_produces_nothing() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);
        let req = core.open_request();

        bridge.dispatch(req, req);

        assert!(core.wire(req).is_empty());
        assert_eq!(core.status(req), None);
    }

    #[test]
    fn malformed_request_is_dropped_and_released() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);

        let req = submit(&bridge, &core, &[("PATH_INFO", "/hello")]);

        assert!(core.wire(req).is_empty());
        assert_eq!(bridge.pending_environments(), 0);
    }

    #[test]
    fn silent_handler_sends_nothing() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);

        let req = submit(&bridge, &core, &[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/silent")]);

        assert!(core.wire(req).is_empty());
    }

    #[test]
    fn abandoned_environment_can_be_released() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);
        let req = core.open_request();

        let env = bridge.env_new(req);
        assert_eq!(bridge.pending_environments(), 1);
        assert!(bridge.env_release(env));
        assert!(!bridge.env_release(env));
        assert!(!bridge.env_add(env, b"K", b"V"));
    }

    #[test]
    fn signals_reach_their_registered_callback() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        assert!(bridge.capabilities().register_signal(30, "worker", move |signum| {
            counter.fetch_add(usize::from(signum), Ordering::SeqCst);
        }));

        assert_eq!(bridge.dispatch_signal(30), 0);
        assert_eq!(bridge.dispatch_signal(31), -1);
        assert_eq!(hits.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn core_loop_runs_on_named_thread() {
        let core = Arc::new(MemoryCore::new());
        let bridge = bridge_with(&core);

        let handle = bridge.run_core(2).unwrap();
        assert_eq!(handle.thread().name(), Some("uwsgi-core-2"));
        handle.join().unwrap();

        assert_eq!(core.events(), vec![CoreEvent::CoreLoop(2)]);
    }

    #[test]
    fn invalid_default_content_type_is_rejected() {
        let core: Arc<dyn NativeCore> = Arc::new(MemoryCore::new());
        let config = BridgeConfig {
            default_content_type: "text/html\r\n".to_string(),
            ..BridgeConfig::default()
        };
        assert!(Bridge::new(core, Arc::new(App::default()), config).is_err());
    }
}
