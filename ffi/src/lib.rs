//! Raw declarations shared between the uWSGI core and the Rust request bridge.
//!
//! Nothing here is safe to call directly; `uwsgi-rust` wraps every primitive
//! behind its `NativeCore` trait.

#![allow(non_camel_case_types)]

use std::marker::{PhantomData, PhantomPinned};

#[cfg(feature = "link")]
use libc::{c_char, c_int, c_void, size_t, ssize_t};

/// `struct wsgi_request`. Owned by the uWSGI core and only ever seen through a pointer.
#[repr(C)]
pub struct wsgi_request {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// One slot per uWSGI signal number (`uint8_t`).
pub const SIGNAL_TABLE_SIZE: usize = u8::MAX as usize + 1;

/// `uwsgi_cache_set` flags: insert or replace.
pub const CACHE_FLAG_REPLACE: u16 = 0;
/// `UWSGI_CACHE_FLAG_UPDATE`: only touch an existing item.
pub const CACHE_FLAG_UPDATE: u16 = 1 << 1;

/// Longest key `uwsgi_cache_*` accept (`uint16_t` key length).
pub const CACHE_MAX_KEY_LEN: usize = u16::MAX as usize;

/// Opaque `handler` registered with `uwsgi_register_signal` for `signum`.
///
/// The core treats a NULL handler as an empty slot, so the tag is offset by one.
pub fn signal_tag(signum: u8) -> *mut std::ffi::c_void {
    (usize::from(signum) + 1) as *mut std::ffi::c_void
}

/// Signal number carried by a tag from [`signal_tag`].
pub fn signal_from_tag(tag: *mut std::ffi::c_void) -> Option<u8> {
    (tag as usize).checked_sub(1).and_then(|signum| u8::try_from(signum).ok())
}

#[cfg(feature = "link")]
unsafe extern "C" {
    // request i/o
    pub fn uwsgi_simple_response_write(
        wsgi_req: *mut wsgi_request,
        buf: *const c_char,
        len: size_t,
    ) -> c_int;
    pub fn uwsgi_simple_response_write_header(
        wsgi_req: *mut wsgi_request,
        buf: *const c_char,
        len: size_t,
    ) -> c_int;
    pub fn uwsgi_simple_set_status(wsgi_req: *mut wsgi_request, status: c_int);
    pub fn uwsgi_simple_inc_headers(wsgi_req: *mut wsgi_request);
    pub fn uwsgi_simple_request_read(
        wsgi_req: *mut wsgi_request,
        buf: *mut c_char,
        len: size_t,
    ) -> ssize_t;

    // cache
    pub fn uwsgi_cache_enabled() -> c_int;
    pub fn uwsgi_cache_rlock();
    pub fn uwsgi_cache_wlock();
    pub fn uwsgi_cache_rwunlock();
    pub fn uwsgi_cache_get(key: *const c_char, keylen: u16, valsize: *mut u64) -> *mut c_char;
    pub fn uwsgi_cache_exists(key: *const c_char, keylen: u16) -> u32;
    pub fn uwsgi_cache_del(key: *const c_char, keylen: u16, index: u64) -> c_int;
    pub fn uwsgi_cache_set(
        key: *const c_char,
        keylen: u16,
        val: *const c_char,
        vallen: u64,
        expires: u64,
        flags: u16,
    ) -> c_int;

    // signals, timers, locks
    pub fn uwsgi_signal_send(fd: c_int, sig: u8) -> c_int;
    pub fn uwsgi_user_lock(num: c_int);
    pub fn uwsgi_user_unlock(num: c_int);
    pub fn uwsgi_add_timer(sig: u8, secs: c_int) -> c_int;
    pub fn uwsgi_signal_add_rb_timer(sig: u8, secs: c_int, iterations: c_int) -> c_int;
    pub fn uwsgi_signal_registered(sig: u8) -> c_int;
    pub fn uwsgi_register_signal(
        sig: u8,
        receiver: *const c_char,
        handler: *mut c_void,
        modifier1: u8,
    ) -> c_int;
    pub fn uwsgi_plugin_modifier1(plugin: *const c_char) -> c_int;

    // engine
    pub fn simple_loop_run_int(core_id: c_int);
    pub fn uwsgi_init(argc: c_int, argv: *mut *mut c_char, envp: *mut *mut c_char);

    // Accessors exported by the plugin's C glue; `struct uwsgi_server` is not mirrored here.
    pub fn uwsgi_rust_signal_socket() -> c_int;
    pub fn uwsgi_rust_worker_id() -> c_int;
    pub fn uwsgi_rust_mule_id() -> c_int;
    pub fn uwsgi_rust_log_size() -> i64;
}
