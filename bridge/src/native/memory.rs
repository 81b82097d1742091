use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};

use dashmap::DashMap;
use uwsgi_ffi::{CACHE_FLAG_UPDATE, wsgi_request};

use super::{NativeCore, RequestHandle};

/// Side effects recorded by [`MemoryCore`] outside of request i/o.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    ReadLock,
    WriteLock,
    Unlock,
    CacheGet,
    CacheExists,
    CacheDelete,
    CacheSet { flags: u16, expires: u64 },
    Signal(u8),
    UserLock(i32),
    UserUnlock(i32),
    Timer { signum: u8, seconds: i32, recurring: bool },
    ModifierLookup(String),
    RegisterSignal { signum: u8, receiver: String, modifier1: u8 },
    CoreLoop(i32),
}

#[derive(Debug, Default)]
struct Exchange {
    input: VecDeque<Vec<u8>>,
    fail_reads: bool,
    fail_writes: bool,
    wire: Vec<u8>,
    status: Option<u16>,
    header_count: usize,
    header_writes: usize,
    body_writes: usize,
}

/// An in-process core.
///
/// Captures what would go on the wire for every request, keeps a real
/// key/value cache and records everything else as [`CoreEvent`]s. Failures
/// of the real core can be switched on per request or globally.
#[derive(Debug)]
pub struct MemoryCore {
    next_token: AtomicUsize,
    exchanges: DashMap<RequestHandle, Exchange>,
    cache: DashMap<Vec<u8>, Vec<u8>>,
    cache_enabled: AtomicBool,
    events: Mutex<Vec<CoreEvent>>,
    registered: DashMap<u8, String>,
    modifier1: AtomicI32,
    fail_registrations: AtomicBool,
    fail_timers: AtomicBool,
    worker_id: AtomicI32,
    mule_id: AtomicI32,
    log_size: AtomicI64,
}

impl Default for MemoryCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCore {
    pub fn new() -> Self {
        Self {
            next_token: AtomicUsize::new(0x1000),
            exchanges: DashMap::new(),
            cache: DashMap::new(),
            cache_enabled: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
            registered: DashMap::new(),
            modifier1: AtomicI32::new(18),
            fail_registrations: AtomicBool::new(false),
            fail_timers: AtomicBool::new(false),
            worker_id: AtomicI32::new(1),
            mule_id: AtomicI32::new(0),
            log_size: AtomicI64::new(0),
        }
    }

    /// A fresh request handle with nothing written and no body queued.
    pub fn open_request(&self) -> RequestHandle {
        let token = self.next_token.fetch_add(0x10, Ordering::Relaxed);
        let handle = RequestHandle(NonNull::new(token as *mut wsgi_request).unwrap_or(NonNull::dangling()));
        self.exchanges.insert(handle, Exchange::default());
        handle
    }

    /// Queue a chunk of request body; each native read returns at most one chunk.
    pub fn push_body(&self, req: RequestHandle, chunk: impl Into<Vec<u8>>) {
        self.exchanges
            .entry(req)
            .or_default()
            .input
            .push_back(chunk.into());
    }

    pub fn fail_reads(&self, req: RequestHandle) {
        self.exchanges.entry(req).or_default().fail_reads = true;
    }

    pub fn fail_writes(&self, req: RequestHandle) {
        self.exchanges.entry(req).or_default().fail_writes = true;
    }

    /// Header block and body bytes, in the order they were written.
    pub fn wire(&self, req: RequestHandle) -> Vec<u8> {
        self.exchanges
            .get(&req)
            .map(|ex| ex.wire.clone())
            .unwrap_or_default()
    }

    pub fn wire_text(&self, req: RequestHandle) -> String {
        String::from_utf8_lossy(&self.wire(req)).into_owned()
    }

    pub fn status(&self, req: RequestHandle) -> Option<u16> {
        self.exchanges.get(&req).and_then(|ex| ex.status)
    }

    pub fn header_count(&self, req: RequestHandle) -> usize {
        self.exchanges.get(&req).map_or(0, |ex| ex.header_count)
    }

    pub fn header_writes(&self, req: RequestHandle) -> usize {
        self.exchanges.get(&req).map_or(0, |ex| ex.header_writes)
    }

    pub fn body_writes(&self, req: RequestHandle) -> usize {
        self.exchanges.get(&req).map_or(0, |ex| ex.body_writes)
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Number of items currently held by the cache.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// What `plugin_modifier1` answers; negative means the plugin is unknown.
    pub fn set_modifier1(&self, modifier1: i32) {
        self.modifier1.store(modifier1, Ordering::Relaxed);
    }

    pub fn set_fail_registrations(&self, fail: bool) {
        self.fail_registrations.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_timers(&self, fail: bool) {
        self.fail_timers.store(fail, Ordering::Relaxed);
    }

    pub fn set_identity(&self, worker_id: i32, mule_id: i32, log_size: i64) {
        self.worker_id.store(worker_id, Ordering::Relaxed);
        self.mule_id.store(mule_id, Ordering::Relaxed);
        self.log_size.store(log_size, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: CoreEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn write(&self, req: RequestHandle, bytes: &[u8], header: bool) -> i32 {
        let Some(mut ex) = self.exchanges.get_mut(&req) else {
            return -1;
        };
        if ex.fail_writes {
            return -1;
        }
        if header {
            ex.header_writes += 1;
        } else {
            ex.body_writes += 1;
        }
        ex.wire.extend_from_slice(bytes);
        0
    }
}

impl NativeCore for MemoryCore {
    fn write_header_block(&self, req: RequestHandle, block: &[u8]) -> i32 {
        self.write(req, block, true)
    }

    fn write_body_chunk(&self, req: RequestHandle, chunk: &[u8]) -> i32 {
        self.write(req, chunk, false)
    }

    fn set_status(&self, req: RequestHandle, status: u16) {
        if let Some(mut ex) = self.exchanges.get_mut(&req) {
            ex.status = Some(status);
        }
    }

    fn count_header(&self, req: RequestHandle) {
        if let Some(mut ex) = self.exchanges.get_mut(&req) {
            ex.header_count += 1;
        }
    }

    fn read_chunk(&self, req: RequestHandle, buf: &mut [u8]) -> isize {
        let Some(mut ex) = self.exchanges.get_mut(&req) else {
            return -1;
        };
        if ex.fail_reads {
            return -1;
        }
        let Some(mut chunk) = ex.input.pop_front() else {
            return 0;
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            ex.input.push_front(chunk.split_off(n));
        }
        n as isize
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    fn cache_read_lock(&self) {
        self.record(CoreEvent::ReadLock);
    }

    fn cache_write_lock(&self) {
        self.record(CoreEvent::WriteLock);
    }

    fn cache_unlock(&self) {
        self.record(CoreEvent::Unlock);
    }

    fn cache_get(&self, key: &[u8], visit: &mut dyn FnMut(&[u8])) -> bool {
        self.record(CoreEvent::CacheGet);
        match self.cache.get(key) {
            Some(value) => {
                visit(value.value());
                true
            }
            None => false,
        }
    }

    fn cache_exists(&self, key: &[u8]) -> bool {
        self.record(CoreEvent::CacheExists);
        self.cache.contains_key(key)
    }

    fn cache_delete(&self, key: &[u8]) -> i32 {
        self.record(CoreEvent::CacheDelete);
        if self.cache.remove(key).is_some() { 0 } else { -1 }
    }

    fn cache_set(&self, key: &[u8], value: &[u8], expires: u64, flags: u16) -> i32 {
        self.record(CoreEvent::CacheSet { flags, expires });
        if flags & CACHE_FLAG_UPDATE != 0 && !self.cache.contains_key(key) {
            return -1;
        }
        self.cache.insert(key.to_vec(), value.to_vec());
        0
    }

    fn signal_send(&self, signum: u8) {
        self.record(CoreEvent::Signal(signum));
    }

    fn user_lock(&self, slot: i32) {
        self.record(CoreEvent::UserLock(slot));
    }

    fn user_unlock(&self, slot: i32) {
        self.record(CoreEvent::UserUnlock(slot));
    }

    fn add_timer(&self, signum: u8, seconds: i32) -> i32 {
        self.record(CoreEvent::Timer { signum, seconds, recurring: false });
        if self.fail_timers.load(Ordering::Relaxed) { -1 } else { 0 }
    }

    fn add_rb_timer(&self, signum: u8, seconds: i32) -> i32 {
        self.record(CoreEvent::Timer { signum, seconds, recurring: true });
        if self.fail_timers.load(Ordering::Relaxed) { -1 } else { 0 }
    }

    fn signal_registered(&self, signum: u8) -> bool {
        self.registered.contains_key(&signum)
    }

    fn plugin_modifier1(&self, plugin: &str) -> i32 {
        self.record(CoreEvent::ModifierLookup(plugin.to_string()));
        self.modifier1.load(Ordering::Relaxed)
    }

    fn register_signal(&self, signum: u8, receiver: &str, modifier1: u8) -> i32 {
        self.record(CoreEvent::RegisterSignal {
            signum,
            receiver: receiver.to_string(),
            modifier1,
        });
        if self.fail_registrations.load(Ordering::Relaxed) {
            return -1;
        }
        self.registered.insert(signum, receiver.to_string());
        0
    }

    fn worker_id(&self) -> i32 {
        self.worker_id.load(Ordering::Relaxed)
    }

    fn mule_id(&self) -> i32 {
        self.mule_id.load(Ordering::Relaxed)
    }

    fn log_size(&self) -> i64 {
        self.log_size.load(Ordering::Relaxed)
    }

    fn run_core_loop(&self, core_id: i32) {
        self.record(CoreEvent::CoreLoop(core_id));
    }
}
