//! Entry points called by the plugin's C glue.
//!
//! None of these may unwind into the core: each one runs inside
//! `catch_unwind` and turns every failure into a status code.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::slice;

use libc::{c_char, c_int, c_void};
use tracing::{error, warn};
use uwsgi_ffi::{signal_from_tag, wsgi_request};

use crate::bridge::Bridge;
use crate::native::RequestHandle;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn with_bridge<R>(entry: &'static str, fallback: R, f: impl FnOnce(&'static Bridge) -> R) -> R {
    let Some(bridge) = Bridge::installed() else {
        warn!(entry, "called before the bridge was installed");
        return fallback;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| f(bridge))) {
        Ok(result) => result,
        Err(payload) => {
            error!(entry, panic = panic_message(payload.as_ref()), "panic caught at the native boundary");
            fallback
        }
    }
}

/// # Safety
///
/// When `len` is positive, `ptr` must be valid for reads of `len` bytes for `'a`.
unsafe fn raw_bytes<'a>(ptr: *const c_char, len: c_int) -> Option<&'a [u8]> {
    let len = usize::try_from(len).ok()?;
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and valid for `len` bytes per the caller contract.
    Some(unsafe { slice::from_raw_parts(ptr.cast::<u8>(), len) })
}

#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_post_fork() {
    with_bridge("post_fork", (), |bridge| bridge.post_fork());
}

#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_post_init() {
    with_bridge("post_init", (), |bridge| bridge.post_init());
}

/// Returns the environment reference for `req`, or 0.
#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_env_new(req: *mut wsgi_request) -> usize {
    let Some(req) = RequestHandle::from_raw(req) else {
        warn!("env_new called with a null request");
        return 0;
    };
    with_bridge("env_new", 0, |bridge| bridge.env_new(req).token())
}

/// Add one variable to an environment: 0 when stored, -1 otherwise.
///
/// # Safety
///
/// `key` and `value` must be valid for `key_len` and `value_len` bytes for
/// the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn uwsgi_rust_helper_env_add(
    env: usize,
    key: *const c_char,
    key_len: c_int,
    value: *const c_char,
    value_len: c_int,
) -> c_int {
    let Some(env) = RequestHandle::from_token(env) else {
        return -1;
    };
    // SAFETY: forwarded from this function's contract.
    let (Some(key), Some(value)) = (unsafe { raw_bytes(key, key_len) }, unsafe {
        raw_bytes(value, value_len)
    }) else {
        warn!(?env, key_len, value_len, "env_add called with an invalid byte range");
        return -1;
    };
    with_bridge("env_add", -1, |bridge| if bridge.env_add(env, key, value) { 0 } else { -1 })
}

/// Drop an environment that will never be dispatched.
#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_env_free(env: usize) -> c_int {
    let Some(env) = RequestHandle::from_token(env) else {
        return -1;
    };
    with_bridge("env_free", -1, |bridge| if bridge.env_release(env) { 0 } else { -1 })
}

/// Serve `req` with the environment collected under `env`.
#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_request(env: usize, req: *mut wsgi_request) -> c_int {
    let (Some(env), Some(req)) = (RequestHandle::from_token(env), RequestHandle::from_raw(req)) else {
        warn!("request called with a null handle");
        return -1;
    };
    with_bridge("request", -1, |bridge| {
        bridge.dispatch(env, req);
        0
    })
}

/// Run the callback for `signum`. `handler` is the tag stored at
/// registration (see [`uwsgi_ffi::signal_tag`]) and is not dereferenced.
#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_signal_handler(signum: c_int, handler: *mut c_void) -> c_int {
    let Ok(signum) = u8::try_from(signum) else {
        warn!(signum, "signal number out of range");
        return -1;
    };
    if signal_from_tag(handler) != Some(signum) {
        warn!(signum, handler = handler as usize, "signal handler tag does not match signal");
    }
    with_bridge("signal_handler", -1, |bridge| bridge.dispatch_signal(signum))
}

#[unsafe(no_mangle)]
pub extern "C" fn uwsgi_rust_helper_run_core(core_id: c_int) {
    with_bridge("run_core", (), |bridge| {
        if let Err(err) = bridge.run_core(core_id) {
            error!(core_id, %err, "failed to start core thread");
        }
    });
}
