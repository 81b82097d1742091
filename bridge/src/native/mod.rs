//! The seam between the bridge and the native server core.

mod memory;
#[cfg(feature = "libuwsgi")]
mod uwsgi;

use std::fmt;
use std::ptr::NonNull;

use uwsgi_ffi::wsgi_request;

pub use memory::{CoreEvent, MemoryCore};
#[cfg(feature = "libuwsgi")]
pub use uwsgi::UwsgiCore;

/// Token for one in-flight native request.
///
/// Never dereferenced on the Rust side; it is only passed back to the core.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(NonNull<wsgi_request>);

// SAFETY: the handle is an opaque token. The core guarantees one execution
// context drives a given request, and the bridge never reads through it.
unsafe impl Send for RequestHandle {}
unsafe impl Sync for RequestHandle {}

impl RequestHandle {
    pub fn from_raw(ptr: *mut wsgi_request) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn from_token(token: usize) -> Option<Self> {
        Self::from_raw(token as *mut wsgi_request)
    }

    pub fn as_ptr(self) -> *mut wsgi_request {
        self.0.as_ptr()
    }

    pub fn token(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestHandle({:#x})", self.token())
    }
}

/// Every primitive the bridge calls in the native core.
///
/// Integer results keep the core's conventions: negative means failure.
pub trait NativeCore: Send + Sync {
    fn write_header_block(&self, req: RequestHandle, block: &[u8]) -> i32;
    fn write_body_chunk(&self, req: RequestHandle, chunk: &[u8]) -> i32;
    fn set_status(&self, req: RequestHandle, status: u16);
    fn count_header(&self, req: RequestHandle);
    /// Read the next chunk of request body into `buf`: bytes read, 0 at end, negative on error.
    fn read_chunk(&self, req: RequestHandle, buf: &mut [u8]) -> isize;

    fn cache_enabled(&self) -> bool;
    fn cache_read_lock(&self);
    fn cache_write_lock(&self);
    fn cache_unlock(&self);
    /// Look up `key`, handing the stored bytes to `visit` while they are valid.
    fn cache_get(&self, key: &[u8], visit: &mut dyn FnMut(&[u8])) -> bool;
    fn cache_exists(&self, key: &[u8]) -> bool;
    fn cache_delete(&self, key: &[u8]) -> i32;
    fn cache_set(&self, key: &[u8], value: &[u8], expires: u64, flags: u16) -> i32;

    fn signal_send(&self, signum: u8);
    fn user_lock(&self, slot: i32);
    fn user_unlock(&self, slot: i32);
    fn add_timer(&self, signum: u8, seconds: i32) -> i32;
    fn add_rb_timer(&self, signum: u8, seconds: i32) -> i32;
    fn signal_registered(&self, signum: u8) -> bool;
    fn plugin_modifier1(&self, plugin: &str) -> i32;
    fn register_signal(&self, signum: u8, receiver: &str, modifier1: u8) -> i32;

    fn worker_id(&self) -> i32;
    fn mule_id(&self) -> i32;
    fn log_size(&self) -> i64;

    /// Run the core's event loop for `core_id`. Blocks for the life of the worker.
    fn run_core_loop(&self, core_id: i32);
}
