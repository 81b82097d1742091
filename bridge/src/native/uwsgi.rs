use std::ffi::{CString, c_char, c_int};
use std::slice;

use anyhow::{Context, Result};
use tracing::warn;
use uwsgi_ffi as ffi;

use super::{NativeCore, RequestHandle};

/// [`NativeCore`] backed by libuwsgi.
#[derive(Debug, Clone, Copy, Default)]
pub struct UwsgiCore;

impl UwsgiCore {
    /// Hand `args` to `uwsgi_init`. Returns only if the server shuts down.
    pub fn boot(args: impl IntoIterator<Item = String>) -> Result<()> {
        let mut argv = args
            .into_iter()
            .map(|arg| {
                CString::new(arg)
                    .map(CString::into_raw)
                    .context("process argument contains a NUL byte")
            })
            .collect::<Result<Vec<*mut c_char>>>()?;
        let argc = c_int::try_from(argv.len()).context("too many process arguments")?;
        argv.push(std::ptr::null_mut());
        // uWSGI keeps argv (and rewrites it for process titles) for the life of the process.
        let argv = Box::leak(argv.into_boxed_slice());

        // SAFETY: argv is a leaked, NULL-terminated array of NUL-terminated strings.
        unsafe { ffi::uwsgi_init(argc, argv.as_mut_ptr(), std::ptr::null_mut()) };
        Ok(())
    }
}

fn key_len(key: &[u8]) -> u16 {
    // Capabilities reject longer keys before reaching the core.
    u16::try_from(key.len()).unwrap_or(u16::MAX)
}

impl NativeCore for UwsgiCore {
    fn write_header_block(&self, req: RequestHandle, block: &[u8]) -> i32 {
        // SAFETY: req is live for the current dispatch and block outlives the call.
        unsafe { ffi::uwsgi_simple_response_write_header(req.as_ptr(), block.as_ptr().cast(), block.len()) }
    }

    fn write_body_chunk(&self, req: RequestHandle, chunk: &[u8]) -> i32 {
        // SAFETY: as above.
        unsafe { ffi::uwsgi_simple_response_write(req.as_ptr(), chunk.as_ptr().cast(), chunk.len()) }
    }

    fn set_status(&self, req: RequestHandle, status: u16) {
        unsafe { ffi::uwsgi_simple_set_status(req.as_ptr(), c_int::from(status)) }
    }

    fn count_header(&self, req: RequestHandle) {
        unsafe { ffi::uwsgi_simple_inc_headers(req.as_ptr()) }
    }

    fn read_chunk(&self, req: RequestHandle, buf: &mut [u8]) -> isize {
        // SAFETY: the core writes at most buf.len() bytes into buf.
        unsafe { ffi::uwsgi_simple_request_read(req.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) }
    }

    fn cache_enabled(&self) -> bool {
        unsafe { ffi::uwsgi_cache_enabled() != 0 }
    }

    fn cache_read_lock(&self) {
        unsafe { ffi::uwsgi_cache_rlock() }
    }

    fn cache_write_lock(&self) {
        unsafe { ffi::uwsgi_cache_wlock() }
    }

    fn cache_unlock(&self) {
        unsafe { ffi::uwsgi_cache_rwunlock() }
    }

    fn cache_get(&self, key: &[u8], visit: &mut dyn FnMut(&[u8])) -> bool {
        let mut len: u64 = 0;
        // SAFETY: caller holds the cache read lock; the returned item stays
        // valid until it is released, which cannot happen inside this call.
        let value = unsafe { ffi::uwsgi_cache_get(key.as_ptr().cast(), key_len(key), &mut len) };
        if value.is_null() {
            return false;
        }
        let Ok(len) = usize::try_from(len) else {
            return false;
        };
        let bytes = unsafe { slice::from_raw_parts(value.cast::<u8>(), len) };
        visit(bytes);
        true
    }

    fn cache_exists(&self, key: &[u8]) -> bool {
        unsafe { ffi::uwsgi_cache_exists(key.as_ptr().cast(), key_len(key)) > 0 }
    }

    fn cache_delete(&self, key: &[u8]) -> i32 {
        unsafe { ffi::uwsgi_cache_del(key.as_ptr().cast(), key_len(key), 0) }
    }

    fn cache_set(&self, key: &[u8], value: &[u8], expires: u64, flags: u16) -> i32 {
        unsafe {
            ffi::uwsgi_cache_set(
                key.as_ptr().cast(),
                key_len(key),
                value.as_ptr().cast(),
                value.len() as u64,
                expires,
                flags,
            )
        }
    }

    fn signal_send(&self, signum: u8) {
        unsafe {
            ffi::uwsgi_signal_send(ffi::uwsgi_rust_signal_socket(), signum);
        }
    }

    fn user_lock(&self, slot: i32) {
        unsafe { ffi::uwsgi_user_lock(slot) }
    }

    fn user_unlock(&self, slot: i32) {
        unsafe { ffi::uwsgi_user_unlock(slot) }
    }

    fn add_timer(&self, signum: u8, seconds: i32) -> i32 {
        unsafe { ffi::uwsgi_add_timer(signum, seconds) }
    }

    fn add_rb_timer(&self, signum: u8, seconds: i32) -> i32 {
        // zero iterations: fire until the process exits
        unsafe { ffi::uwsgi_signal_add_rb_timer(signum, seconds, 0) }
    }

    fn signal_registered(&self, signum: u8) -> bool {
        unsafe { ffi::uwsgi_signal_registered(signum) != 0 }
    }

    fn plugin_modifier1(&self, plugin: &str) -> i32 {
        let Ok(name) = CString::new(plugin) else {
            warn!("plugin name {plugin:?} contains a NUL byte");
            return -1;
        };
        unsafe { ffi::uwsgi_plugin_modifier1(name.as_ptr()) }
    }

    fn register_signal(&self, signum: u8, receiver: &str, modifier1: u8) -> i32 {
        let Ok(receiver) = CString::new(receiver) else {
            warn!("signal receiver {receiver:?} contains a NUL byte");
            return -1;
        };
        // The handler argument comes back to uwsgi_rust_helper_signal_handler;
        // callbacks are looked up by signal number, so it only carries that number.
        let handler = ffi::signal_tag(signum);
        unsafe { ffi::uwsgi_register_signal(signum, receiver.as_ptr(), handler, modifier1) }
    }

    fn worker_id(&self) -> i32 {
        unsafe { ffi::uwsgi_rust_worker_id() }
    }

    fn mule_id(&self) -> i32 {
        unsafe { ffi::uwsgi_rust_mule_id() }
    }

    fn log_size(&self) -> i64 {
        unsafe { ffi::uwsgi_rust_log_size() }
    }

    fn run_core_loop(&self, core_id: i32) {
        unsafe { ffi::simple_loop_run_int(core_id) }
    }
}
